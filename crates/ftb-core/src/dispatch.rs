//! Formats new posts and hands them to the outbound messenger.

use std::{sync::Arc, time::Duration};

use chrono::Utc;

use crate::{
    domain::Post,
    formatting::format_post,
    ledger::DeliveryLedger,
    ports::MessagingPort,
    Result,
};

/// Per-cycle dispatch accounting, for logs and `/status`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchOutcome {
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct DispatchPipeline {
    ledger: Arc<DeliveryLedger>,
    messenger: Arc<dyn MessagingPort>,
    send_spacing: Duration,
}

impl DispatchPipeline {
    pub fn new(
        ledger: Arc<DeliveryLedger>,
        messenger: Arc<dyn MessagingPort>,
        send_spacing: Duration,
    ) -> Self {
        Self {
            ledger,
            messenger,
            send_spacing,
        }
    }

    /// Deliver every not-yet-delivered post, oldest first, so the channel
    /// reads chronologically even though the fetch is newest-first.
    ///
    /// Each successful send is committed to the ledger immediately, so a
    /// mid-batch crash loses at most the posts not yet sent and never
    /// double-sends one already sent. A send failure skips that post (it is
    /// retried next cycle, having never been recorded); a ledger failure
    /// aborts the batch.
    pub async fn process_new_posts(&self, posts: &[Post]) -> Result<DispatchOutcome> {
        let mut outcome = DispatchOutcome::default();

        for post in posts.iter().rev() {
            if self.ledger.is_delivered(post.id) {
                outcome.skipped += 1;
                continue;
            }

            let message = format_post(post);
            match self.messenger.send_channel_message(&message).await {
                Ok(()) => {
                    self.ledger.record_delivered(post.id, Utc::now())?;
                    outcome.sent += 1;
                    tracing::info!(post_id = %post.id, title = %post.title, "post delivered");
                }
                Err(e) => {
                    outcome.failed += 1;
                    tracing::warn!(post_id = %post.id, "send failed, will retry next cycle: {e}");
                    continue;
                }
            }

            if !self.send_spacing.is_zero() {
                tokio::time::sleep(self.send_spacing).await;
            }
        }

        if outcome.sent > 0 || outcome.failed > 0 {
            tracing::info!(
                sent = outcome.sent,
                failed = outcome.failed,
                skipped = outcome.skipped,
                "dispatch cycle finished"
            );
        }
        Ok(outcome)
    }
}
