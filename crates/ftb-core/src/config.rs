use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, Result};

/// Typed configuration, loaded from environment variables (with an optional
/// `.env` file for local runs).
#[derive(Clone, Debug)]
pub struct Config {
    // Forum account
    pub forum_base_url: String,
    pub forum_username: String,
    pub forum_password: String,

    // Telegram
    pub telegram_bot_token: String,
    pub telegram_channel_id: i64,
    pub telegram_operator_id: i64,

    // Polling
    pub poll_interval: Duration,
    pub auth_backoff: Duration,
    pub max_posts_per_check: usize,
    pub send_spacing: Duration,

    // Captcha relay
    pub captcha_wait: Duration,
    pub captcha_max_attempts: u32,

    // Durable state
    pub data_dir: PathBuf,
    pub ledger_file: PathBuf,
    pub session_file: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let forum_base_url = require_str("FORUM_BASE_URL")?
            .trim_end_matches('/')
            .to_string();
        let forum_username = require_str("FORUM_USERNAME")?;
        let forum_password = require_str("FORUM_PASSWORD")?;

        let telegram_bot_token = require_str("TELEGRAM_BOT_TOKEN")?;
        let telegram_channel_id = require_i64("TELEGRAM_CHANNEL_ID")?;
        let telegram_operator_id = require_i64("TELEGRAM_OPERATOR_ID")?;

        let poll_interval = Duration::from_secs(env_u64("POLL_INTERVAL_SECS").unwrap_or(300));
        let auth_backoff = Duration::from_secs(env_u64("AUTH_BACKOFF_SECS").unwrap_or(900));
        let max_posts_per_check = env_usize("MAX_POSTS_PER_CHECK").unwrap_or(10);
        let send_spacing = Duration::from_millis(env_u64("SEND_SPACING_MS").unwrap_or(2000));

        let captcha_wait = Duration::from_secs(env_u64("CAPTCHA_WAIT_SECS").unwrap_or(300));
        let captcha_max_attempts = env_u32("CAPTCHA_MAX_ATTEMPTS").unwrap_or(3).max(1);

        let data_dir = PathBuf::from(env_str("DATA_DIR").unwrap_or_else(|| "data".to_string()));
        fs::create_dir_all(&data_dir)?;
        let ledger_file = data_dir.join("delivered.jsonl");
        let session_file = data_dir.join("forum-session.json");

        Ok(Self {
            forum_base_url,
            forum_username,
            forum_password,
            telegram_bot_token,
            telegram_channel_id,
            telegram_operator_id,
            poll_interval,
            auth_backoff,
            max_posts_per_check,
            send_spacing,
            captcha_wait,
            captcha_max_attempts,
            data_dir,
            ledger_file,
            session_file,
        })
    }
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn require_str(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn require_i64(key: &str) -> Result<i64> {
    require_str(key)?
        .trim()
        .parse::<i64>()
        .map_err(|_| Error::Config(format!("{key} must be a numeric chat id")))
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn non_empty(s: String) -> Option<String> {
    let t = s.trim().to_string();
    if t.is_empty() {
        None
    } else {
        Some(t)
    }
}
