use async_trait::async_trait;

use crate::{
    domain::{CaptchaPayload, CredentialBlob, Post},
    Result,
};

/// Outcome of a login submission against the forum.
#[derive(Clone, Debug)]
pub enum LoginOutcome {
    /// Logged in; the blob is a snapshot of the fresh session cookies, kept
    /// by the session manager for persistence across restarts.
    Success(CredentialBlob),
    /// The forum wants a human to solve a captcha before it will log us in.
    CaptchaRequired(CaptchaPayload),
    /// Hard rejection (bad credentials, locked account, ...).
    Rejected(String),
}

/// Fetch-side failure, with authentication errors distinguishable so the
/// fetcher can invalidate the session and retry once.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("forum rejected the session as unauthenticated")]
    Auth,
    #[error("{0}")]
    Other(String),
}

/// Hexagonal port for the forum HTTP client.
///
/// The adapter owns the live cookie jar; `submit_login` reports a snapshot
/// on success and `restore_credentials` re-installs a persisted one.
#[async_trait]
pub trait ForumClient: Send + Sync {
    /// Submit the configured account credentials, optionally with a captcha
    /// answer from a previous `CaptchaRequired` outcome.
    async fn submit_login(&self, captcha_answer: Option<&str>) -> Result<LoginOutcome>;

    /// Fetch the forum's most recent posts, newest first.
    async fn fetch_latest(&self, limit: usize) -> std::result::Result<Vec<Post>, FetchError>;

    /// Install a previously exported credential snapshot. The session is
    /// still treated as unauthenticated until a fetch or login proves it.
    async fn restore_credentials(&self, blob: &CredentialBlob) -> Result<()>;
}

/// Hexagonal port for outbound messaging.
///
/// Telegram is the first implementation; the bot targets exactly one
/// destination channel and one administrative contact, so the addressing
/// lives in the adapter, not here.
#[async_trait]
pub trait MessagingPort: Send + Sync {
    /// Deliver a formatted post to the destination channel.
    async fn send_channel_message(&self, html: &str) -> Result<()>;

    /// Alert the operator on their private chat.
    async fn send_operator_message(&self, html: &str) -> Result<()>;

    /// Send a captcha image to the operator; the caption carries the
    /// correlation id the reply must match.
    async fn send_operator_photo(&self, image: &[u8], caption: &str) -> Result<()>;
}
