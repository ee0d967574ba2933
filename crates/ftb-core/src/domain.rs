use chrono::{DateTime, Utc};

/// Stable forum post identifier (Discuz thread id). Sole key for dedup:
/// two fetches returning the same id are the same post regardless of
/// content drift.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PostId(pub u64);

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque token linking an operator's reply to the specific pending captcha
/// challenge it answers.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// One forum submission as scraped from the listing page.
#[derive(Clone, Debug)]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub author: String,
    pub summary: String,
    pub published_at: Option<DateTime<Utc>>,
    pub url: String,
}

/// Opaque session credentials (serialized cookie snapshot). The core never
/// looks inside; it only stores and persists it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialBlob(pub String);

/// Pending human-verification payload relayed to the operator.
#[derive(Clone, Debug)]
pub struct CaptchaPayload {
    pub image: Vec<u8>,
    pub mime: String,
}

/// Forum session lifecycle. Only `Authenticated` sessions may fetch posts;
/// `Expired` is detected (via an auth error from a fetch), never assumed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionStatus {
    #[default]
    Unauthenticated,
    Authenticated,
    AwaitingCaptcha,
    Expired,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SessionStatus::Unauthenticated => "unauthenticated",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::AwaitingCaptcha => "awaiting captcha",
            SessionStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}
