//! Operator-side update routing.
//!
//! The bot listens to exactly one private chat (the operator). Anything
//! else is dropped. Text replies to a captcha photo resolve the pending
//! challenge via the correlation id embedded in the photo caption.

use std::sync::Arc;

use regex::Regex;
use teloxide::{dispatching::Dispatcher, dptree, prelude::*, types::ParseMode};

use ftb_core::{
    config::Config,
    domain::CorrelationId,
    formatting::escape_html,
    ledger::DeliveryLedger,
    poller::PollScheduler,
    session::ForumSession,
};

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub session: Arc<ForumSession>,
    pub ledger: Arc<DeliveryLedger>,
    pub scheduler: Arc<PollScheduler>,
}

pub async fn run_dispatcher(bot: Bot, state: Arc<AppState>) -> anyhow::Result<()> {
    if let Ok(me) = bot.get_me().await {
        tracing::info!("telegram dispatcher started as @{}", me.username());
    }

    let handler = dptree::entry().branch(Update::filter_message().endpoint(handle_message));

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    // Single administrative contact: everything else is ignored.
    if msg.chat.id.0 != state.cfg.telegram_operator_id {
        return Ok(());
    }
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if text.starts_with('/') {
        return handle_command(bot, &msg, &state, text).await;
    }

    handle_captcha_reply(bot, &msg, &state, text).await
}

async fn handle_command(
    bot: Bot,
    msg: &Message,
    state: &Arc<AppState>,
    text: &str,
) -> ResponseResult<()> {
    let command = text.split_whitespace().next().unwrap_or(text);
    match command {
        "/status" => {
            let html = status_html(state).await;
            bot.send_message(msg.chat.id, html)
                .parse_mode(ParseMode::Html)
                .await?;
        }
        "/check" => {
            state.scheduler.request_poll();
            bot.send_message(msg.chat.id, "Polling the forum now.")
                .await?;
        }
        "/start" | "/help" => {
            bot.send_message(
                msg.chat.id,
                "Forum relay bot.\n\
                 /status — session and delivery state\n\
                 /check — poll the forum immediately\n\
                 Reply to a captcha photo with the code to unblock a login.",
            )
            .await?;
        }
        other => {
            bot.send_message(msg.chat.id, format!("Unknown command: {other}"))
                .await?;
        }
    }
    Ok(())
}

async fn handle_captcha_reply(
    bot: Bot,
    msg: &Message,
    state: &Arc<AppState>,
    text: &str,
) -> ResponseResult<()> {
    // Prefer the correlation id from the replied-to caption; fall back to
    // the outstanding challenge for a bare text (still validated below).
    let from_reply = msg
        .reply_to_message()
        .and_then(|m| m.caption())
        .and_then(extract_correlation_id);

    let id = match from_reply {
        Some(id) => Some(id),
        None => state.session.pending_challenge_id().await,
    };

    let Some(id) = id else {
        bot.send_message(msg.chat.id, "No captcha is waiting for an answer right now.")
            .await?;
        return Ok(());
    };

    if state.session.resolve_captcha(&id, text.trim()).await {
        bot.send_message(msg.chat.id, "Captcha answer passed along.")
            .await?;
    } else {
        bot.send_message(msg.chat.id, "That captcha challenge is no longer active.")
            .await?;
    }
    Ok(())
}

/// Pull the `#<uuid>` correlation marker out of a captcha photo caption.
fn extract_correlation_id(caption: &str) -> Option<CorrelationId> {
    static RE: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"#([0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12})")
            .expect("valid regex")
    });
    re.captures(caption).map(|c| CorrelationId(c[1].to_string()))
}

async fn status_html(state: &Arc<AppState>) -> String {
    let snap = state.session.snapshot().await;

    let mut lines = Vec::new();
    lines.push(format!("<b>Session</b>: {}", snap.status));
    if let Some(t) = snap.last_refreshed {
        lines.push(format!("Last login: {}", t.format("%Y-%m-%d %H:%M:%S UTC")));
    }
    if let Some(t) = snap.pending_captcha_since {
        lines.push(format!(
            "Captcha pending since: {}",
            t.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    lines.push(format!("Delivered posts: {}", state.ledger.len()));
    match state.scheduler.last_tick().await {
        Some(tick) => lines.push(format!(
            "Last cycle {}: {}",
            tick.at.format("%Y-%m-%d %H:%M:%S UTC"),
            escape_html(&tick.summary)
        )),
        None => lines.push("No poll cycle completed yet.".to_string()),
    }
    lines.join("\n")
}
