//! Gateway configuration
//!
//! Reads and validates the gateway's environment options. This replaces
//! the legacy pattern of a YAML config file with a type-safe loader over
//! `std::env` — every field below has a documented default, following a
//! per-field `#[serde(default = "...")]` convention but without a file to
//! parse.

use std::time::Duration;

use anyhow::{Context, Result};

/// Partition size: how many bot accounts a single [`crate::worker::Worker`]
/// shard owns.
const DEFAULT_BOTS_PER_WORKER: usize = 50;
/// Admission cap: the maximum number of in-flight inspect requests.
const DEFAULT_MAX_QUEUE_SIZE: usize = 100;
/// Client-visible admission deadline, in milliseconds.
const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 5_000;
/// Cross-bot retries performed by the Worker Manager before surfacing a
/// timeout to the caller.
const DEFAULT_MAX_INSPECT_RETRIES: u32 = 3;
/// Bot initialization retries before a bot is left in `ERROR`.
const DEFAULT_MAX_RETRIES: u32 = 3;
/// How often a Worker pushes unsolicited stats upstream, in milliseconds.
const DEFAULT_STATS_UPDATE_INTERVAL_MS: u64 = 3_000;
/// Per-bot inspect deadline, in milliseconds.
const DEFAULT_BOT_INSPECT_TIMEOUT_MS: u64 = 2_000;
/// Per-bot cooldown after an inspect deadline fires, in milliseconds.
const DEFAULT_BOT_COOLDOWN_MS: u64 = 30_000;
/// Worker Manager's per-attempt deadline, in milliseconds.
const DEFAULT_AGGREGATOR_TIMEOUT_MS: u64 = 10_000;
/// Overall bot initialization deadline, in seconds.
const DEFAULT_BOT_INIT_TIMEOUT_SECS: u64 = 60;
/// How long a LOGIN_THROTTLED account is held out of rotation, in minutes.
const DEFAULT_LOGIN_THROTTLE_MINUTES: u64 = 30;
/// Sessions older than this are discarded rather than reused.
const DEFAULT_SESSION_MAX_AGE_DAYS: i64 = 180;
/// Background sweeper period for stale pending-request entries, in seconds.
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;
/// A pending-request entry older than this is force-rejected by the
/// sweeper, regardless of retry count.
const DEFAULT_PENDING_MAX_AGE_SECS: u64 = 60;

/// Gateway-wide configuration, assembled once at startup from the process
/// environment.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bots_per_worker: usize,
    pub worker_enabled: bool,
    pub max_queue_size: usize,
    pub queue_timeout: Duration,
    pub max_inspect_retries: u32,
    pub max_retries: u32,
    pub stats_update_interval: Duration,
    pub bot_inspect_timeout: Duration,
    pub bot_cooldown: Duration,
    pub aggregator_timeout: Duration,
    pub bot_init_timeout: Duration,
    pub login_throttle: Duration,
    pub session_max_age_days: i64,
    pub sweep_interval: Duration,
    pub pending_max_age: Duration,

    pub proxy_url: Option<String>,
    pub accounts_file: String,
    pub session_path: String,
    pub blacklist_path: String,
    pub last_id_file: Option<String>,
    pub database_url: String,
    pub schema_url: String,
    pub http_bind: String,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(val) if !val.is_empty() => val
            .parse()
            .with_context(|| format!("invalid value for {key}: {val:?}")),
        _ => Ok(default),
    }
}

fn env_bool(key: &str, default: bool) -> Result<bool> {
    match std::env::var(key) {
        Ok(val) if !val.is_empty() => match val.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => anyhow::bail!("invalid boolean for {key}: {other:?}"),
        },
        _ => Ok(default),
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

impl GatewayConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        let config = Self {
            bots_per_worker: env_or("BOTS_PER_WORKER", DEFAULT_BOTS_PER_WORKER)?,
            worker_enabled: env_bool("WORKER_ENABLED", true)?,
            max_queue_size: env_or("MAX_QUEUE_SIZE", DEFAULT_MAX_QUEUE_SIZE)?,
            queue_timeout: Duration::from_millis(env_or(
                "QUEUE_TIMEOUT",
                DEFAULT_QUEUE_TIMEOUT_MS,
            )?),
            max_inspect_retries: env_or("MAX_INSPECT_RETRIES", DEFAULT_MAX_INSPECT_RETRIES)?,
            max_retries: env_or("MAX_RETRIES", DEFAULT_MAX_RETRIES)?,
            stats_update_interval: Duration::from_millis(env_or(
                "STATS_UPDATE_INTERVAL",
                DEFAULT_STATS_UPDATE_INTERVAL_MS,
            )?),
            bot_inspect_timeout: Duration::from_millis(DEFAULT_BOT_INSPECT_TIMEOUT_MS),
            bot_cooldown: Duration::from_millis(DEFAULT_BOT_COOLDOWN_MS),
            aggregator_timeout: Duration::from_millis(DEFAULT_AGGREGATOR_TIMEOUT_MS),
            bot_init_timeout: Duration::from_secs(DEFAULT_BOT_INIT_TIMEOUT_SECS),
            login_throttle: Duration::from_secs(DEFAULT_LOGIN_THROTTLE_MINUTES * 60),
            session_max_age_days: DEFAULT_SESSION_MAX_AGE_DAYS,
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            pending_max_age: Duration::from_secs(DEFAULT_PENDING_MAX_AGE_SECS),

            proxy_url: std::env::var("PROXY_URL").ok().filter(|v| !v.is_empty()),
            accounts_file: env_string("ACCOUNTS_FILE", "conf/accounts.txt"),
            session_path: env_string("SESSION_PATH", "conf/sessions"),
            blacklist_path: env_string("BLACKLIST_PATH", "conf/blacklist.txt"),
            last_id_file: std::env::var("LAST_ID_FILE").ok().filter(|v| !v.is_empty()),
            database_url: env_string("DATABASE_URL", "mysql://localhost/inspect_gateway"),
            schema_url: env_string(
                "SCHEMA_URL",
                "https://raw.githubusercontent.com/csgofloat/cs-files/master/items.json",
            ),
            http_bind: env_string("HTTP_BIND", "0.0.0.0:3000"),
        };

        config.validate()?;
        Ok(config)
    }

    /// Substitute `[session]` in `proxy_url` with `${username}_${sessionId}`
    /// for a single bot's reconnect attempt.
    pub fn proxy_for_session(&self, username: &str, session_id: u64) -> Option<String> {
        self.proxy_url
            .as_ref()
            .map(|tpl| tpl.replace("[session]", &format!("{username}_{session_id}")))
    }

    fn validate(&self) -> Result<()> {
        anyhow::ensure!(self.bots_per_worker > 0, "BOTS_PER_WORKER must be positive");
        anyhow::ensure!(self.max_queue_size > 0, "MAX_QUEUE_SIZE must be positive");
        anyhow::ensure!(
            !self.accounts_file.is_empty(),
            "ACCOUNTS_FILE cannot be empty"
        );
        anyhow::ensure!(
            !self.database_url.is_empty(),
            "DATABASE_URL cannot be empty"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_known_vars() {
        for key in [
            "BOTS_PER_WORKER",
            "WORKER_ENABLED",
            "MAX_QUEUE_SIZE",
            "QUEUE_TIMEOUT",
            "MAX_INSPECT_RETRIES",
            "MAX_RETRIES",
            "PROXY_URL",
            "ACCOUNTS_FILE",
            "SESSION_PATH",
            "BLACKLIST_PATH",
            "LAST_ID_FILE",
            "DATABASE_URL",
            "SCHEMA_URL",
            "HTTP_BIND",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn defaults_match_spec() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.bots_per_worker, 50);
        assert_eq!(config.max_queue_size, 100);
        assert_eq!(config.queue_timeout, Duration::from_secs(5));
        assert_eq!(config.max_inspect_retries, 3);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.bot_inspect_timeout, Duration::from_secs(2));
        assert_eq!(config.bot_cooldown, Duration::from_secs(30));
        assert_eq!(config.aggregator_timeout, Duration::from_secs(10));
        assert!(config.proxy_url.is_none());
    }

    #[test]
    fn env_overrides_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        std::env::set_var("BOTS_PER_WORKER", "25");
        std::env::set_var("MAX_QUEUE_SIZE", "2");
        std::env::set_var("QUEUE_TIMEOUT", "1500");

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(config.bots_per_worker, 25);
        assert_eq!(config.max_queue_size, 2);
        assert_eq!(config.queue_timeout, Duration::from_millis(1500));

        clear_known_vars();
    }

    #[test]
    fn proxy_template_substitution() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        std::env::set_var("PROXY_URL", "socks5://proxy.example/[session]");

        let config = GatewayConfig::from_env().unwrap();
        assert_eq!(
            config.proxy_for_session("alice", 7).unwrap(),
            "socks5://proxy.example/alice_7"
        );

        clear_known_vars();
    }

    #[test]
    fn rejects_zero_bots_per_worker() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        std::env::set_var("BOTS_PER_WORKER", "0");

        assert!(GatewayConfig::from_env().is_err());

        clear_known_vars();
    }

    #[test]
    fn rejects_invalid_integer() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_known_vars();
        std::env::set_var("MAX_QUEUE_SIZE", "not_a_number");

        assert!(GatewayConfig::from_env().is_err());

        clear_known_vars();
    }
}
