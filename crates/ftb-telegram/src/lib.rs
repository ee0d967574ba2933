//! Telegram adapter (teloxide).
//!
//! Implements the `ftb-core` MessagingPort over the Telegram Bot API and
//! hosts the update router that feeds operator replies back into the
//! captcha relay.

use async_trait::async_trait;

use teloxide::{
    prelude::*,
    types::{InputFile, ParseMode},
};

use tokio::time::sleep;

pub mod router;

use ftb_core::{config::Config, errors::Error, ports::MessagingPort, Result};

pub use teloxide::Bot;

pub fn bot_from_config(cfg: &Config) -> Bot {
    Bot::new(cfg.telegram_bot_token.clone())
}

#[derive(Clone)]
pub struct TelegramMessenger {
    bot: Bot,
    channel: teloxide::types::ChatId,
    operator: teloxide::types::ChatId,
}

impl TelegramMessenger {
    pub fn new(bot: Bot, cfg: &Config) -> Self {
        Self {
            bot,
            channel: teloxide::types::ChatId(cfg.telegram_channel_id),
            operator: teloxide::types::ChatId(cfg.telegram_operator_id),
        }
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Dispatch(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }
}

#[async_trait]
impl MessagingPort for TelegramMessenger {
    async fn send_channel_message(&self, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_message(self.channel, html.to_string())
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn send_operator_message(&self, html: &str) -> Result<()> {
        self.with_retry(|| {
            self.bot
                .send_message(self.operator, html.to_string())
                .parse_mode(ParseMode::Html)
        })
        .await?;
        Ok(())
    }

    async fn send_operator_photo(&self, image: &[u8], caption: &str) -> Result<()> {
        let bytes = image.to_vec();
        self.with_retry(|| {
            self.bot
                .send_photo(self.operator, InputFile::memory(bytes.clone()))
                .caption(caption.to_string())
        })
        .await?;
        Ok(())
    }
}
