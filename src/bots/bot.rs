//! The Bot: one authenticated GC client session.
//!
//! A Bot serves at most one inspect at a time. Its state machine
//! (`BotState`) and the transitions that drive it are the load-bearing
//! invariant of the whole dispatch core — everything upstream (Worker,
//! Worker Manager) exists only to pick a bot that is `READY` and hand it
//! work.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::bots::session::{self, SessionFile};
use crate::bots::state::{BotCounters, BotState};
use crate::bots::transport::{GcTransport, LoginOutcome, TransportError};
use crate::config::GatewayConfig;
use crate::identity::reinterpret_wear;
use crate::models::Decal;

/// Ring buffer capacity for recent response times.
const RESPONSE_TIME_CAPACITY: usize = 100;

/// Failure taxonomy for `initialize()`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BotInitError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("rate limited")]
    RateLimited,
    #[error("account disabled")]
    AccountDisabled,
    #[error("login throttled")]
    LoginThrottled,
    #[error("connection error: {0}")]
    ConnectionError(String),
    #[error("initialization error: {0}")]
    InitializationError(String),
    #[error("initialization timed out")]
    Timeout,
}

impl BotInitError {
    /// Terminal faults blacklist the account and the bot never returns to
    /// READY.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BotInitError::AccountDisabled)
    }

    /// Retryable faults are attempted again, up to `maxRetries`.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BotInitError::ConnectionError(_) | BotInitError::InitializationError(_)
        )
    }
}

impl From<TransportError> for BotInitError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::InvalidCredentials => BotInitError::InvalidCredentials,
            TransportError::RateLimited => BotInitError::RateLimited,
            TransportError::AccountDisabled => BotInitError::AccountDisabled,
            TransportError::LoginThrottled => BotInitError::LoginThrottled,
            TransportError::ConnectionError(msg) => BotInitError::ConnectionError(msg),
            TransportError::InitializationError(msg) => BotInitError::InitializationError(msg),
            TransportError::GcDisconnect => {
                BotInitError::InitializationError("gc disconnected during handshake".to_string())
            }
        }
    }
}

/// Failure taxonomy for `inspectItem()`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BotInspectError {
    #[error("bot is not ready (state={0})")]
    NotReady(&'static str),
    #[error("inspect timed out")]
    Timeout,
    #[error("gc disconnected")]
    GcDisconnect,
    #[error("transport error: {0}")]
    Transport(String),
}

/// The reinterpreted, caller-facing reply to a successful inspect — the
/// same shape as [`crate::bots::transport::GcInspectReply`] but with
/// `paint_wear` already decoded from its wire integer.
#[derive(Debug, Clone, Default)]
pub struct InspectReply {
    pub paint_seed: Option<i64>,
    pub paint_index: Option<i64>,
    pub paint_wear_raw: Option<i32>,
    pub paint_wear: Option<f32>,
    pub def_index: Option<i64>,
    pub quality: Option<i64>,
    pub rarity: Option<i64>,
    pub origin: Option<i64>,
    pub custom_name: Option<String>,
    pub quest_id: Option<i64>,
    pub reason: Option<i64>,
    pub music_index: Option<i64>,
    pub ent_index: Option<i64>,
    pub stickers: Vec<Decal>,
    pub keychains: Vec<Decal>,
    pub killeater_score_type: Option<i32>,
    pub killeater_value: Option<i64>,
    pub pet_index: Option<i32>,
    pub inventory: Option<i64>,
    pub drop_reason: Option<i64>,
}

/// A read-only snapshot of a bot's state for stats reporting.
#[derive(Debug, Clone)]
pub struct BotSnapshot {
    pub username: String,
    pub state: BotState,
    pub counters: BotCounters,
}

struct BotInner {
    state: BotState,
    counters: BotCounters,
    response_times: VecDeque<u64>,
    refresh_token: Option<String>,
}

/// One authenticated GC client session. Generic over the transport so unit
/// tests can drive a [`crate::bots::transport::mock::MockTransport`]
/// instead of a real Steam client.
pub struct Bot<T: GcTransport> {
    pub username: String,
    password: String,
    transport: Arc<T>,
    inner: Mutex<BotInner>,
    session_id: AtomicU64,

    session_path: String,
    blacklist_path: String,
    proxy_url: Option<String>,
    session_max_age_days: i64,

    inspect_timeout: Duration,
    cooldown: Duration,
    init_timeout: Duration,
    login_throttle: Duration,
}

impl<T: GcTransport + 'static> Bot<T> {
    pub fn new(username: String, password: String, transport: Arc<T>, config: &GatewayConfig) -> Self {
        Self {
            username,
            password,
            transport,
            inner: Mutex::new(BotInner {
                state: BotState::Idle,
                counters: BotCounters::default(),
                response_times: VecDeque::with_capacity(RESPONSE_TIME_CAPACITY),
                refresh_token: None,
            }),
            session_id: AtomicU64::new(0),
            session_path: config.session_path.clone(),
            blacklist_path: config.blacklist_path.clone(),
            proxy_url: config.proxy_url.clone(),
            session_max_age_days: config.session_max_age_days,
            inspect_timeout: config.bot_inspect_timeout,
            cooldown: config.bot_cooldown,
            init_timeout: config.bot_init_timeout,
            login_throttle: config.login_throttle,
        }
    }

    pub async fn state(&self) -> BotState {
        self.inner.lock().await.state
    }

    pub async fn is_selectable(&self) -> bool {
        self.inner.lock().await.state.is_selectable()
    }

    pub async fn snapshot(&self) -> BotSnapshot {
        let inner = self.inner.lock().await;
        BotSnapshot {
            username: self.username.chars().take(10).collect(),
            state: inner.state,
            counters: inner.counters,
        }
    }

    /// Brings the session to READY. Prefers a saved refresh
    /// token younger than `session_max_age_days`; falls back to password
    /// login.
    pub async fn initialize(&self) -> Result<(), BotInitError> {
        {
            let mut inner = self.inner.lock().await;
            inner.state = BotState::Initializing;
        }

        let outcome = tokio::time::timeout(self.init_timeout, self.do_login())
            .await
            .map_err(|_| BotInitError::Timeout)
            .and_then(|res| res);

        match outcome {
            Ok(login) => {
                let mut inner = self.inner.lock().await;
                inner.refresh_token = Some(login.refresh_token.clone());
                inner.state = BotState::Ready;
                drop(inner);

                let session = SessionFile {
                    refresh_token: login.refresh_token,
                    timestamp: chrono::Utc::now(),
                    username: self.username.clone(),
                    has_guard: login.has_guard,
                };
                if let Err(err) = session::save(&self.session_path, &session).await {
                    tracing::warn!(
                        "[bot] [session_save_failed] username={} err={}",
                        self.username,
                        err
                    );
                }
                tracing::info!("[bot] [ready] username={}", self.username);
                Ok(())
            }
            Err(err) => {
                let mut inner = self.inner.lock().await;
                inner.state = BotState::Error;
                inner.counters.errors += 1;
                drop(inner);

                if err.is_terminal() {
                    if let Err(blacklist_err) =
                        crate::bots::blacklist::append(&self.blacklist_path, &self.username, reason_tag(&err))
                            .await
                    {
                        tracing::warn!(
                            "[bot] [blacklist_write_failed] username={} err={}",
                            self.username,
                            blacklist_err
                        );
                    }
                    tracing::warn!(
                        "[bot] [blacklisted] username={} reason={}",
                        self.username,
                        reason_tag(&err)
                    );
                }
                Err(err)
            }
        }
    }

    async fn do_login(&self) -> Result<LoginOutcome, BotInitError> {
        let saved = session::load(&self.session_path, &self.username)
            .await
            .ok()
            .flatten();
        let refresh_token = saved
            .filter(|s| s.is_fresh(self.session_max_age_days, chrono::Utc::now()))
            .map(|s| s.refresh_token);

        let session_id = self.session_id.fetch_add(1, Ordering::Relaxed);
        let proxy = self.proxy_for_session(session_id);

        self.transport
            .login(&self.username, &self.password, refresh_token.as_deref(), proxy.as_deref())
            .await
            .map_err(BotInitError::from)
    }

    fn proxy_for_session(&self, session_id: u64) -> Option<String> {
        self.proxy_url
            .as_ref()
            .map(|tpl| tpl.replace("[session]", &format!("{}_{session_id}", self.username)))
    }

    /// Submits one inspect request. Requires state READY; transitions
    /// READY→BUSY→READY on success, READY→BUSY→COOLDOWN→READY on a bot
    /// inspect-deadline timeout.
    pub async fn inspect_item(
        &self,
        owner: &str,
        asset_id: &str,
        descriptor: &str,
    ) -> Result<InspectReply, BotInspectError> {
        {
            let mut inner = self.inner.lock().await;
            if inner.state != BotState::Ready {
                return Err(BotInspectError::NotReady(inner.state.as_str()));
            }
            inner.state = BotState::Busy;
            inner.counters.inspects += 1;
        }

        let start = Instant::now();
        let result = tokio::time::timeout(
            self.inspect_timeout,
            self.transport.inspect(owner, asset_id, descriptor),
        )
        .await;

        match result {
            Ok(Ok(reply)) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                let mut inner = self.inner.lock().await;
                inner.state = BotState::Ready;
                inner.counters.successes += 1;
                push_response_time(&mut inner.response_times, elapsed_ms);
                drop(inner);

                Ok(InspectReply {
                    paint_seed: reply.paint_seed,
                    paint_index: reply.paint_index,
                    paint_wear_raw: reply.paint_wear_raw,
                    paint_wear: reply.paint_wear_raw.map(reinterpret_wear),
                    def_index: reply.def_index,
                    quality: reply.quality,
                    rarity: reply.rarity,
                    origin: reply.origin,
                    custom_name: reply.custom_name,
                    quest_id: reply.quest_id,
                    reason: reply.reason,
                    music_index: reply.music_index,
                    ent_index: reply.ent_index,
                    stickers: reply.stickers,
                    keychains: reply.keychains,
                    killeater_score_type: reply.killeater_score_type,
                    killeater_value: reply.killeater_value,
                    pet_index: reply.pet_index,
                    inventory: reply.inventory,
                    drop_reason: reply.drop_reason,
                })
            }
            Ok(Err(TransportError::GcDisconnect)) => {
                let mut inner = self.inner.lock().await;
                inner.state = BotState::Error;
                inner.counters.errors += 1;
                Err(BotInspectError::GcDisconnect)
            }
            Ok(Err(other)) => {
                let mut inner = self.inner.lock().await;
                inner.counters.failures += 1;
                self.enter_cooldown(&mut inner);
                Err(BotInspectError::Transport(other.to_string()))
            }
            Err(_elapsed) => {
                let mut inner = self.inner.lock().await;
                inner.counters.failures += 1;
                inner.counters.cooldowns += 1;
                self.enter_cooldown(&mut inner);
                tracing::warn!(
                    "[bot] [inspect_timeout] username={} asset_id={}",
                    self.username,
                    asset_id
                );
                Err(BotInspectError::Timeout)
            }
        }
    }

    /// Transitions BUSY→COOLDOWN. The COOLDOWN→READY
    /// transition itself is driven by the owning [`crate::worker::Worker`],
    /// which holds bots behind `Arc` and spawns a
    /// `sleep(cooldown_duration()).then(recover_from_cooldown())` task —
    /// `Bot` itself has no `Arc<Self>` to spawn a 'static task against.
    fn enter_cooldown(&self, inner: &mut BotInner) {
        inner.state = BotState::Cooldown;
    }

    /// Used by the owning [`crate::worker::Worker`] to flip a cooled-down
    /// bot back to READY once `cooldownTime` has elapsed. Idempotent: a
    /// bot not currently in COOLDOWN is left untouched.
    pub async fn recover_from_cooldown(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == BotState::Cooldown {
            inner.state = BotState::Ready;
        }
    }

    pub fn cooldown_duration(&self) -> Duration {
        self.cooldown
    }

    /// Best-effort logoff; always ends in DISCONNECTED.
    pub async fn destroy(&self) {
        self.transport.logoff().await;
        let mut inner = self.inner.lock().await;
        inner.state = BotState::Disconnected;
        tracing::info!("[bot] [destroyed] username={}", self.username);
    }

    /// Response-time percentile helper used by [`crate::worker`]'s stats
    /// aggregation.
    pub async fn response_times(&self) -> Vec<u64> {
        self.inner.lock().await.response_times.iter().copied().collect()
    }
}

fn push_response_time(buf: &mut VecDeque<u64>, value: u64) {
    if buf.len() == RESPONSE_TIME_CAPACITY {
        buf.pop_front();
    }
    buf.push_back(value);
}

fn reason_tag(err: &BotInitError) -> &'static str {
    match err {
        BotInitError::InvalidCredentials => "INVALID_CREDENTIALS",
        BotInitError::RateLimited => "RATE_LIMITED",
        BotInitError::AccountDisabled => "ACCOUNT_DISABLED",
        BotInitError::LoginThrottled => "LOGIN_THROTTLED",
        BotInitError::ConnectionError(_) => "CONNECTION_ERROR",
        BotInitError::InitializationError(_) => "INITIALIZATION_ERROR",
        BotInitError::Timeout => "TIMEOUT",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::transport::mock::MockTransport;
    use crate::bots::transport::GcInspectReply;

    fn test_config(tmp: &std::path::Path) -> GatewayConfig {
        let mut config = GatewayConfig::from_env().unwrap();
        config.session_path = tmp.join("sessions").to_str().unwrap().to_string();
        config.blacklist_path = tmp.join("blacklist.txt").to_str().unwrap().to_string();
        config.bot_inspect_timeout = Duration::from_millis(100);
        config.bot_cooldown = Duration::from_millis(50);
        config
    }

    fn tmp_dir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("inspect-gateway-bot-test-{}", uuid::Uuid::new_v4()));
        dir
    }

    #[tokio::test]
    async fn initialize_transitions_idle_to_ready() {
        let tmp = tmp_dir();
        let config = test_config(&tmp);
        let transport = Arc::new(MockTransport::new());
        let bot = Bot::new("alice".into(), "pw".into(), transport, &config);

        assert_eq!(bot.state().await, BotState::Idle);
        bot.initialize().await.unwrap();
        assert_eq!(bot.state().await, BotState::Ready);

        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn account_disabled_is_terminal_and_blacklists() {
        let tmp = tmp_dir();
        let config = test_config(&tmp);
        let transport =
            Arc::new(MockTransport::new().with_login_result(Err(TransportError::AccountDisabled)));
        let bot = Bot::new("bob".into(), "pw".into(), transport, &config);

        let err = bot.initialize().await.unwrap_err();
        assert!(err.is_terminal());
        assert_eq!(bot.state().await, BotState::Error);

        let entries = crate::bots::blacklist::load(&config.blacklist_path).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].username, "bob");
        assert_eq!(entries[0].reason, "ACCOUNT_DISABLED");

        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn connection_error_is_retryable_not_terminal() {
        let tmp = tmp_dir();
        let config = test_config(&tmp);
        let transport = Arc::new(
            MockTransport::new().with_login_result(Err(TransportError::ConnectionError("refused".into()))),
        );
        let bot = Bot::new("carol".into(), "pw".into(), transport, &config);

        let err = bot.initialize().await.unwrap_err();
        assert!(!err.is_terminal());
        assert!(err.is_retryable());

        let entries = crate::bots::blacklist::load(&config.blacklist_path).await.unwrap();
        assert!(entries.is_empty());

        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn inspect_requires_ready_state() {
        let tmp = tmp_dir();
        let config = test_config(&tmp);
        let transport = Arc::new(MockTransport::new());
        let bot = Bot::new("dave".into(), "pw".into(), transport, &config);

        let err = bot.inspect_item("76561198000000001", "1", "d").await.unwrap_err();
        assert!(matches!(err, BotInspectError::NotReady("idle")));

        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn single_flight_rejects_second_concurrent_inspect() {
        let tmp = tmp_dir();
        let config = test_config(&tmp);
        let transport = Arc::new(MockTransport::new().with_hanging_inspect());
        let bot = Arc::new(Bot::new("erin".into(), "pw".into(), transport.clone(), &config));
        bot.inner.lock().await.state = BotState::Ready;

        let bot_clone = Arc::clone(&bot);
        let first = tokio::spawn(async move { bot_clone.inspect_item("s", "1", "d").await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second_err = bot.inspect_item("s", "1", "d").await.unwrap_err();
        assert!(matches!(second_err, BotInspectError::NotReady("busy")));

        transport.release_hang();
        first.await.unwrap().unwrap();
        assert_eq!(bot.state().await, BotState::Ready);

        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn inspect_timeout_enters_cooldown_then_recovers() {
        let tmp = tmp_dir();
        let config = test_config(&tmp);
        let transport = Arc::new(MockTransport::new().with_hanging_inspect());
        let bot = Bot::new("frank".into(), "pw".into(), transport, &config);
        bot.inner.lock().await.state = BotState::Ready;

        let err = bot.inspect_item("s", "1", "d").await.unwrap_err();
        assert!(matches!(err, BotInspectError::Timeout));
        assert_eq!(bot.state().await, BotState::Cooldown);
        assert!(!bot.is_selectable().await);

        bot.recover_from_cooldown().await;
        assert_eq!(bot.state().await, BotState::Ready);

        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn recover_from_cooldown_is_noop_outside_cooldown() {
        let tmp = tmp_dir();
        let config = test_config(&tmp);
        let transport = Arc::new(MockTransport::new());
        let bot = Bot::new("grace".into(), "pw".into(), transport, &config);

        bot.recover_from_cooldown().await;
        assert_eq!(bot.state().await, BotState::Idle);

        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn successful_inspect_records_response_time_and_reinterprets_wear() {
        let tmp = tmp_dir();
        let config = test_config(&tmp);
        let transport = Arc::new(MockTransport::new().with_inspect_result(Ok(GcInspectReply {
            paint_wear_raw: Some(1065353216),
            ..Default::default()
        })));
        let bot = Bot::new("heidi".into(), "pw".into(), transport, &config);
        bot.inner.lock().await.state = BotState::Ready;

        let reply = bot.inspect_item("s", "1", "d").await.unwrap();
        assert_eq!(reply.paint_wear, Some(1.0));
        assert_eq!(bot.response_times().await.len(), 1);
        assert_eq!(bot.state().await, BotState::Ready);

        tokio::fs::remove_dir_all(&tmp).await.ok();
    }

    #[tokio::test]
    async fn gc_disconnect_leaves_bot_in_error_not_cooldown() {
        let tmp = tmp_dir();
        let config = test_config(&tmp);
        let transport =
            Arc::new(MockTransport::new().with_inspect_result(Err(TransportError::GcDisconnect)));
        let bot = Bot::new("ivan".into(), "pw".into(), transport, &config);
        bot.inner.lock().await.state = BotState::Ready;

        let err = bot.inspect_item("s", "1", "d").await.unwrap_err();
        assert!(matches!(err, BotInspectError::GcDisconnect));
        assert_eq!(bot.state().await, BotState::Error);

        tokio::fs::remove_dir_all(&tmp).await.ok();
    }
}
