//! Forum session manager: login, captcha relay, expiry handling.
//!
//! Captcha handling is a suspend point in an otherwise synchronous state
//! machine: the poll task that triggered the login awaits a single-slot
//! oneshot until a correlated operator reply arrives or the wait window
//! closes. The reply itself comes in on the Telegram dispatcher task, so
//! the relay never blocks anything but the login that asked for it.

use std::{fs, path::Path, sync::Arc};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout;

use crate::{
    config::Config,
    domain::{CaptchaPayload, CorrelationId, CredentialBlob, SessionStatus},
    errors::Error,
    formatting::escape_html,
    ports::{ForumClient, LoginOutcome, MessagingPort},
    Result,
};

struct PendingChallenge {
    id: CorrelationId,
    created_at: DateTime<Utc>,
    tx: oneshot::Sender<String>,
}

#[derive(Default)]
struct SessionState {
    status: SessionStatus,
    credentials: Option<CredentialBlob>,
    last_refreshed: Option<DateTime<Utc>>,
    pending: Option<PendingChallenge>,
}

/// Point-in-time view of the session for `/status`.
#[derive(Clone, Debug)]
pub struct SessionSnapshot {
    pub status: SessionStatus,
    pub last_refreshed: Option<DateTime<Utc>>,
    pub pending_captcha_since: Option<DateTime<Utc>>,
}

/// Owns the forum's authenticated state. Created empty at startup; mutated
/// by login attempts and captcha resolution; never destroyed, only marked
/// expired when a fetch proves the credentials stale.
pub struct ForumSession {
    cfg: Arc<Config>,
    forum: Arc<dyn ForumClient>,
    notifier: Arc<dyn MessagingPort>,
    state: Mutex<SessionState>,
}

#[derive(Serialize, Deserialize)]
struct PersistedSession {
    credentials: String,
    saved_at: String,
}

impl ForumSession {
    pub fn new(
        cfg: Arc<Config>,
        forum: Arc<dyn ForumClient>,
        notifier: Arc<dyn MessagingPort>,
    ) -> Self {
        Self {
            cfg,
            forum,
            notifier,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Re-install a credential snapshot persisted by a previous run, if any.
    ///
    /// Restored credentials are not trusted: the status stays
    /// `Unauthenticated` until a login or a successful fetch proves them.
    pub async fn restore_persisted(&self) -> Result<bool> {
        let Some(blob) = load_persisted(&self.cfg.session_file)? else {
            return Ok(false);
        };

        self.forum.restore_credentials(&blob).await?;
        let mut st = self.state.lock().await;
        st.credentials = Some(blob);
        tracing::info!("restored persisted forum credentials");
        Ok(true)
    }

    /// Return once the session is authenticated, performing a fresh login
    /// if needed. If already authenticated this makes no network call.
    pub async fn ensure_authenticated(&self) -> Result<()> {
        if self.state.lock().await.status == SessionStatus::Authenticated {
            return Ok(());
        }
        self.login().await
    }

    /// Submit credentials to the forum. Captcha challenges are relayed to
    /// the operator and resubmitted with the answer, up to the configured
    /// attempt limit; a hard rejection alerts the operator and fails.
    pub async fn login(&self) -> Result<()> {
        let mut answer: Option<String> = None;

        for attempt in 1..=self.cfg.captcha_max_attempts {
            match self.forum.submit_login(answer.as_deref()).await? {
                LoginOutcome::Success(blob) => {
                    {
                        let mut st = self.state.lock().await;
                        st.status = SessionStatus::Authenticated;
                        st.credentials = Some(blob.clone());
                        st.last_refreshed = Some(Utc::now());
                        st.pending = None;
                    }
                    if let Err(e) = persist_credentials(&self.cfg.session_file, &blob) {
                        tracing::warn!("could not persist session credentials: {e}");
                    }
                    tracing::info!("forum login succeeded");
                    return Ok(());
                }
                LoginOutcome::CaptchaRequired(payload) => {
                    if attempt == self.cfg.captcha_max_attempts {
                        // No submission is left for an answer to ride on;
                        // don't ask the operator to solve this one.
                        break;
                    }
                    tracing::info!(attempt, "forum login requires a captcha");
                    answer = Some(self.relay_captcha(payload).await?);
                }
                LoginOutcome::Rejected(reason) => {
                    self.reset_unauthenticated().await;
                    let _ = self
                        .notifier
                        .send_operator_message(&format!(
                            "Forum login was rejected: {}. Check the account credentials.",
                            escape_html(&reason)
                        ))
                        .await;
                    return Err(Error::Auth(format!("login rejected: {reason}")));
                }
            }
        }

        self.reset_unauthenticated().await;
        let _ = self
            .notifier
            .send_operator_message("Forum login gave up: the captcha answer was not accepted.")
            .await;
        Err(Error::Auth("captcha attempts exhausted".to_string()))
    }

    /// Deliver an operator reply to the outstanding captcha challenge.
    ///
    /// A mismatched or stale correlation id is logged and ignored (returns
    /// false); a match wakes the suspended login exactly once.
    pub async fn resolve_captcha(&self, id: &CorrelationId, answer: &str) -> bool {
        let mut st = self.state.lock().await;
        match st.pending.take() {
            Some(pending) if pending.id == *id => {
                if pending.tx.send(answer.to_string()).is_err() {
                    tracing::warn!(%id, "captcha reply arrived after the login wait ended");
                    return false;
                }
                true
            }
            Some(other) => {
                tracing::warn!(%id, "ignoring captcha reply with mismatched correlation id");
                st.pending = Some(other);
                false
            }
            None => {
                tracing::warn!(%id, "ignoring captcha reply: no outstanding challenge");
                false
            }
        }
    }

    /// Correlation id of the outstanding challenge, if one is pending.
    pub async fn pending_challenge_id(&self) -> Option<CorrelationId> {
        self.state.lock().await.pending.as_ref().map(|p| p.id.clone())
    }

    /// Called by the fetcher when the forum rejects the session: the next
    /// `ensure_authenticated` performs a real login instead of trusting the
    /// stale credentials.
    pub async fn mark_expired(&self) {
        let mut st = self.state.lock().await;
        if st.status != SessionStatus::Expired {
            tracing::warn!("forum session marked expired");
        }
        st.status = SessionStatus::Expired;
    }

    pub async fn snapshot(&self) -> SessionSnapshot {
        let st = self.state.lock().await;
        SessionSnapshot {
            status: st.status,
            last_refreshed: st.last_refreshed,
            pending_captcha_since: st.pending.as_ref().map(|p| p.created_at),
        }
    }

    async fn reset_unauthenticated(&self) {
        let mut st = self.state.lock().await;
        st.status = SessionStatus::Unauthenticated;
        st.pending = None;
    }

    /// Send the challenge to the operator, then suspend until the
    /// correlated reply arrives or the wait window closes.
    async fn relay_captcha(&self, payload: CaptchaPayload) -> Result<String> {
        let id = CorrelationId::new();
        let (tx, rx) = oneshot::channel();

        {
            let mut st = self.state.lock().await;
            if st.pending.is_some() {
                // At most one challenge is outstanding; a leftover here
                // means a previous wait already ended.
                tracing::warn!("replacing a stale captcha challenge");
            }
            st.status = SessionStatus::AwaitingCaptcha;
            st.pending = Some(PendingChallenge {
                id: id.clone(),
                created_at: Utc::now(),
                tx,
            });
        }

        let caption = format!(
            "Forum login needs a captcha. Reply to this photo with the code. #{id}"
        );
        if let Err(e) = self
            .notifier
            .send_operator_photo(&payload.image, &caption)
            .await
        {
            self.reset_unauthenticated().await;
            return Err(Error::Auth(format!(
                "could not relay captcha to operator: {e}"
            )));
        }

        // The state mutex is NOT held across this await; `resolve_captcha`
        // runs on the Telegram dispatcher task and needs it.
        match timeout(self.cfg.captcha_wait, rx).await {
            Ok(Ok(answer)) => {
                tracing::info!(%id, "captcha answer received");
                Ok(answer)
            }
            Ok(Err(_)) => {
                self.reset_unauthenticated().await;
                Err(Error::Auth("captcha challenge was dropped".to_string()))
            }
            Err(_) => {
                self.reset_unauthenticated().await;
                tracing::warn!(%id, "captcha challenge expired with no reply");
                let _ = self
                    .notifier
                    .send_operator_message(
                        "The captcha challenge expired with no reply; forum login aborted.",
                    )
                    .await;
                Err(Error::Auth(
                    "captcha expired before an operator reply".to_string(),
                ))
            }
        }
    }
}

fn persist_credentials(path: &Path, blob: &CredentialBlob) -> Result<()> {
    let data = PersistedSession {
        credentials: blob.0.clone(),
        saved_at: Utc::now().to_rfc3339(),
    };
    fs::write(path, serde_json::to_string_pretty(&data)?)?;
    Ok(())
}

fn load_persisted(path: &Path) -> Result<Option<CredentialBlob>> {
    let contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    match serde_json::from_str::<PersistedSession>(&contents) {
        Ok(data) => Ok(Some(CredentialBlob(data.credentials))),
        Err(e) => {
            tracing::warn!("ignoring unreadable session file: {e}");
            Ok(None)
        }
    }
}
