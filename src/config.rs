use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;

use crate::queue::{QueueSettings, DEFAULT_COLORS};
use crate::retry::RetryPolicy;

static COLOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#[0-9a-fA-F]{6}$").expect("static regex"));

/// Read-modify-write conflict retries on interactions.
const INTERACTION_RETRIES: u32 = 5;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// `memory://` or a CouchDB URL, credentials in the userinfo part.
    pub store_url: String,
    pub tokens_db: String,
    pub interactions_db: String,
    /// Set via TOKENQ_QUEUE_LIMIT. Default: 10.
    pub queue_limit: usize,
    /// Seconds between `request_interaction` and the latest accepted deposit.
    /// Set via TOKENQ_DEPOSIT_MAX_AGE_SECS (fractional allowed). Default: 300.
    pub deposit_max_age_secs: f64,
    /// Default and upper bound for long-poll `timeout` parameters.
    pub longpoll_timeout_secs: u64,
    pub max_page_size: usize,
    /// Retries on token id collisions. Default: 10.
    pub id_max_retries: u32,
    pub colors: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            store_url: "memory://".into(),
            tokens_db: "tokens".into(),
            interactions_db: "interactions".into(),
            queue_limit: 10,
            deposit_max_age_secs: 300.0,
            longpoll_timeout_secs: 60,
            max_page_size: 100,
            id_max_retries: 10,
            colors: DEFAULT_COLORS.iter().map(|c| c.to_string()).collect(),
        }
    }
}

impl Config {
    pub fn longpoll_timeout(&self) -> Duration {
        Duration::from_secs(self.longpoll_timeout_secs)
    }

    pub fn deposit_max_age(&self) -> Duration {
        Duration::try_from_secs_f64(self.deposit_max_age_secs)
            .unwrap_or_else(|_| Duration::from_secs(300))
    }

    pub fn token_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.id_max_retries)
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            limit: self.queue_limit,
            deposit_max_age: self.deposit_max_age(),
            colors: self.colors.clone(),
            retry: RetryPolicy::new(INTERACTION_RETRIES),
            tokens_collection: self.tokens_db.clone(),
        }
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build a config from an arbitrary variable source.
pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> anyhow::Result<Config> {
    let defaults = Config::default();

    let colors = match var("TOKENQ_COLORS") {
        Some(raw) if !raw.trim().is_empty() => parse_colors(&raw)?,
        _ => defaults.colors,
    };

    Ok(Config {
        port: parse_or(&var, "TOKENQ_PORT", defaults.port),
        store_url: var("TOKENQ_STORE_URL").unwrap_or(defaults.store_url),
        tokens_db: var("TOKENQ_TOKENS_DB").unwrap_or(defaults.tokens_db),
        interactions_db: var("TOKENQ_INTERACTIONS_DB").unwrap_or(defaults.interactions_db),
        queue_limit: parse_or(&var, "TOKENQ_QUEUE_LIMIT", defaults.queue_limit),
        deposit_max_age_secs: parse_or(&var, "TOKENQ_DEPOSIT_MAX_AGE_SECS", defaults.deposit_max_age_secs)
            .max(0.0),
        longpoll_timeout_secs: parse_or(&var, "TOKENQ_LONGPOLL_TIMEOUT_SECS", defaults.longpoll_timeout_secs),
        max_page_size: parse_or(&var, "TOKENQ_MAX_PAGE_SIZE", defaults.max_page_size).max(1),
        id_max_retries: parse_or(&var, "TOKENQ_ID_MAX_RETRIES", defaults.id_max_retries),
        colors,
    })
}

fn parse_or<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_colors(raw: &str) -> anyhow::Result<Vec<String>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|c| {
            if COLOR_RE.is_match(c) {
                Ok(c.to_lowercase())
            } else {
                anyhow::bail!("TOKENQ_COLORS: invalid color {:?}, expected #rrggbb", c)
            }
        })
        .collect()
}
