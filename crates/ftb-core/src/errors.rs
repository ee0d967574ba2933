/// Core error type for the relay bot.
///
/// Adapter crates map their specific errors into this type so the poll loop
/// can classify failures consistently (operator-visible vs retry-only).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Login rejected, or a captcha challenge expired/mismatched beyond
    /// recovery. The operator has already been alerted when this surfaces.
    #[error("auth failure: {0}")]
    Auth(String),

    /// Forum unreachable or malformed listing after the single re-login retry.
    #[error("fetch failure: {0}")]
    Fetch(String),

    /// Outbound send failed for a specific post.
    #[error("dispatch failure: {0}")]
    Dispatch(String),

    /// The durable delivery ledger is unavailable. Fatal for the current
    /// cycle only: dispatching without a ledger risks duplicate delivery.
    #[error("ledger failure: {0}")]
    Ledger(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
