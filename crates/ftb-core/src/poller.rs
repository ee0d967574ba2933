//! The polling loop: fetch → diff against ledger → dispatch → sleep.
//!
//! Designed to run unattended indefinitely: every failure class is logged
//! and retried on a later cycle, never allowed to kill the loop.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, Notify};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config, dispatch::DispatchPipeline, errors::Error, fetcher::PostFetcher, Result,
};

/// What the last completed cycle did, for `/status`.
#[derive(Clone, Debug)]
pub struct TickReport {
    pub at: DateTime<Utc>,
    pub summary: String,
}

pub struct PollScheduler {
    cfg: Arc<Config>,
    fetcher: Arc<PostFetcher>,
    dispatch: Arc<DispatchPipeline>,
    poke: Notify,
    cancel: CancellationToken,
    last_tick: Mutex<Option<TickReport>>,
}

impl PollScheduler {
    pub fn new(
        cfg: Arc<Config>,
        fetcher: Arc<PostFetcher>,
        dispatch: Arc<DispatchPipeline>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cfg,
            fetcher,
            dispatch,
            poke: Notify::new(),
            cancel,
            last_tick: Mutex::new(None),
        }
    }

    /// Wake the loop for an immediate cycle (operator `/check`).
    pub fn request_poll(&self) {
        self.poke.notify_one();
    }

    pub async fn last_tick(&self) -> Option<TickReport> {
        self.last_tick.lock().await.clone()
    }

    /// Run until the cancellation token fires. The first cycle happens
    /// immediately; afterwards the loop sleeps for the poll interval, or
    /// longer after an auth failure.
    pub async fn run(&self) {
        tracing::info!(
            interval_secs = self.cfg.poll_interval.as_secs(),
            "poll loop started"
        );

        loop {
            let delay = match self.tick().await {
                Ok(summary) => {
                    self.report(summary).await;
                    self.cfg.poll_interval
                }
                Err(Error::Auth(e)) => {
                    // The session manager already alerted the operator.
                    tracing::warn!("cycle aborted on auth failure, backing off: {e}");
                    self.report(format!("auth failure: {e}")).await;
                    self.cfg.auth_backoff
                }
                Err(Error::Ledger(e)) => {
                    tracing::error!("delivery ledger unavailable, cycle abandoned: {e}");
                    self.report(format!("ledger failure: {e}")).await;
                    self.cfg.poll_interval
                }
                Err(e) => {
                    tracing::warn!("poll cycle failed: {e}");
                    self.report(format!("failed: {e}")).await;
                    self.cfg.poll_interval
                }
            };

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep(delay) => {}
                _ = self.poke.notified() => {
                    tracing::info!("immediate poll requested");
                }
            }
        }

        tracing::info!("poll loop stopped");
    }

    async fn tick(&self) -> Result<String> {
        let posts = self.fetcher.latest_posts().await?;
        let outcome = self.dispatch.process_new_posts(&posts).await?;
        Ok(format!(
            "fetched {}, sent {}, failed {}, already delivered {}",
            posts.len(),
            outcome.sent,
            outcome.failed,
            outcome.skipped
        ))
    }

    async fn report(&self, summary: String) {
        *self.last_tick.lock().await = Some(TickReport {
            at: Utc::now(),
            summary,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CredentialBlob, Post, PostId};
    use crate::ledger::DeliveryLedger;
    use crate::ports::{FetchError, ForumClient, LoginOutcome, MessagingPort};
    use crate::session::ForumSession;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct FakeForum {
        reject_login: bool,
        posts: Vec<Post>,
    }

    #[async_trait]
    impl ForumClient for FakeForum {
        async fn submit_login(&self, _captcha_answer: Option<&str>) -> Result<LoginOutcome> {
            if self.reject_login {
                Ok(LoginOutcome::Rejected("locked".to_string()))
            } else {
                Ok(LoginOutcome::Success(CredentialBlob("{}".to_string())))
            }
        }

        async fn fetch_latest(
            &self,
            _limit: usize,
        ) -> std::result::Result<Vec<Post>, FetchError> {
            Ok(self.posts.clone())
        }

        async fn restore_credentials(&self, _blob: &CredentialBlob) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingMessenger {
        channel: StdMutex<Vec<String>>,
        operator: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl MessagingPort for RecordingMessenger {
        async fn send_channel_message(&self, html: &str) -> Result<()> {
            self.channel.lock().unwrap().push(html.to_string());
            Ok(())
        }
        async fn send_operator_message(&self, html: &str) -> Result<()> {
            self.operator.lock().unwrap().push(html.to_string());
            Ok(())
        }
        async fn send_operator_photo(&self, _image: &[u8], _caption: &str) -> Result<()> {
            Ok(())
        }
    }

    fn test_config() -> Arc<Config> {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let data_dir = std::path::PathBuf::from("/tmp");
        Arc::new(Config {
            forum_base_url: "https://forum.example".to_string(),
            forum_username: "bot".to_string(),
            forum_password: "secret".to_string(),
            telegram_bot_token: "token".to_string(),
            telegram_channel_id: -100,
            telegram_operator_id: 1,
            poll_interval: Duration::from_secs(300),
            auth_backoff: Duration::from_secs(900),
            max_posts_per_check: 10,
            send_spacing: Duration::ZERO,
            captcha_wait: Duration::from_secs(5),
            captcha_max_attempts: 3,
            session_file: data_dir.join(format!("ftb-poll-session-{ts}.json")),
            ledger_file: data_dir.join(format!("ftb-poll-ledger-{ts}.jsonl")),
            data_dir,
        })
    }

    fn post(id: u64) -> Post {
        Post {
            id: PostId(id),
            title: format!("P{id}"),
            author: "dave".to_string(),
            summary: String::new(),
            published_at: None,
            url: format!("https://forum.example/forum.php?mod=viewthread&tid={id}"),
        }
    }

    fn scheduler(
        forum: FakeForum,
        messenger: Arc<RecordingMessenger>,
    ) -> (PollScheduler, CancellationToken) {
        let cfg = test_config();
        let forum = Arc::new(forum);
        let session = Arc::new(ForumSession::new(cfg.clone(), forum.clone(), messenger.clone()));
        let fetcher = Arc::new(PostFetcher::new(session, forum, cfg.max_posts_per_check));
        let ledger = Arc::new(DeliveryLedger::open(&cfg.ledger_file).unwrap());
        let dispatch = Arc::new(DispatchPipeline::new(ledger, messenger, Duration::ZERO));
        let cancel = CancellationToken::new();
        (
            PollScheduler::new(cfg, fetcher, dispatch, cancel.clone()),
            cancel,
        )
    }

    #[tokio::test]
    async fn tick_fetches_and_dispatches_chronologically() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (scheduler, _cancel) = scheduler(
            FakeForum {
                reject_login: false,
                posts: vec![post(3), post(2), post(1)],
            },
            messenger.clone(),
        );

        let summary = scheduler.tick().await.unwrap();
        assert!(summary.contains("sent 3"));

        let sent = messenger.channel.lock().unwrap().clone();
        assert!(sent[0].contains("P1"));
        assert!(sent[2].contains("P3"));
    }

    #[tokio::test]
    async fn auth_failure_aborts_the_cycle_without_dispatch() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (scheduler, _cancel) = scheduler(
            FakeForum {
                reject_login: true,
                posts: vec![post(1)],
            },
            messenger.clone(),
        );

        let err = scheduler.tick().await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert!(messenger.channel.lock().unwrap().is_empty());
        // The session manager raised the operator alert.
        assert_eq!(messenger.operator.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ledger_failure_abandons_the_cycle() {
        let messenger = Arc::new(RecordingMessenger::default());
        let cfg = test_config();
        let forum = Arc::new(FakeForum {
            reject_login: false,
            posts: vec![post(2), post(1)],
        });
        let session = Arc::new(ForumSession::new(cfg.clone(), forum.clone(), messenger.clone()));
        let fetcher = Arc::new(PostFetcher::new(session, forum, cfg.max_posts_per_check));
        let ledger = Arc::new(DeliveryLedger::open(&cfg.ledger_file).unwrap());
        // Turn the ledger path into a directory so the commit fails.
        std::fs::create_dir_all(&cfg.ledger_file).unwrap();
        let dispatch = Arc::new(DispatchPipeline::new(
            ledger,
            messenger.clone(),
            Duration::ZERO,
        ));
        let scheduler = PollScheduler::new(cfg, fetcher, dispatch, CancellationToken::new());

        let err = scheduler.tick().await.unwrap_err();
        assert!(matches!(err, Error::Ledger(_)));
        // Only the post whose commit failed went out; nothing after it.
        assert_eq!(messenger.channel.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_survives_auth_failures_and_stops_on_cancel() {
        let messenger = Arc::new(RecordingMessenger::default());
        let (scheduler, cancel) = scheduler(
            FakeForum {
                reject_login: true,
                posts: vec![],
            },
            messenger,
        );
        let scheduler = Arc::new(scheduler);

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        // Give the first cycle a moment to complete, then shut down.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(scheduler.last_tick().await.is_some());
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop did not stop on cancel")
            .unwrap();
    }
}
