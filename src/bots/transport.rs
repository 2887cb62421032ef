//! The Steam/GC protocol adapter seam.
//!
//! The Steam client library and the GC inspect verb are explicit external
//! collaborators — this crate never speaks the
//! Steam wire protocol itself. [`GcTransport`] is the boundary a real
//! integration would implement against `steam-vent`/`steamworks`-style
//! crates; [`MockTransport`] is the test double every unit test in
//! [`crate::bots::bot`] and [`crate::worker`] drives instead.

use async_trait::async_trait;

use crate::models::Decal;

/// Outcome of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub refresh_token: String,
    pub has_guard: bool,
}

/// The raw reply to an `inspectItem` call, before `paint_wear` has been
/// reinterpreted from its wire integer — that conversion
/// happens in [`crate::bots::bot::Bot::inspect_item`], not here, so every
/// transport implementation (real or mock) agrees on the same wire shape.
#[derive(Debug, Clone, Default)]
pub struct GcInspectReply {
    pub paint_seed: Option<i64>,
    pub paint_index: Option<i64>,
    /// Big-endian signed 32-bit wire integer; see [`crate::identity::reinterpret_wear`].
    pub paint_wear_raw: Option<i32>,
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

/// Errors a transport implementation may raise, covering both the
/// `initialize()` login path and an in-flight inspect call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
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
    #[error("gc disconnected")]
    GcDisconnect,
}

/// A single authenticated game-coordinator session.
///
/// Implementors own their own network I/O; every method here is
/// cancel-safe from the caller's perspective because [`crate::bots::bot::Bot`]
/// always races it against a deadline with `tokio::time::timeout`.
#[async_trait]
pub trait GcTransport: Send + Sync {
    /// Logs in with a saved refresh token, if provided, else password.
    async fn login(
        &self,
        username: &str,
        password: &str,
        refresh_token: Option<&str>,
        proxy_url: Option<&str>,
    ) -> Result<LoginOutcome, TransportError>;

    /// Submits the GC `inspectItem` verb and awaits its reply. The caller
    /// supplies the already-resolved owner id (`s` or `m`), asset id, and
    /// descriptor.
    async fn inspect(
        &self,
        owner: &str,
        asset_id: &str,
        descriptor: &str,
    ) -> Result<GcInspectReply, TransportError>;

    /// Best-effort logoff. Transport implementations should not block or
    /// retry here; the bot transitions to DISCONNECTED regardless of the
    /// outcome.
    async fn logoff(&self);
}

/// An in-memory [`GcTransport`] used by tests. Every response is
/// pre-programmed; `inspect` calls that should simulate a GC hang instead
/// never resolve, letting tests exercise the bot's own deadline logic.
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    pub struct MockTransport {
        login_result: Mutex<Option<Result<LoginOutcome, TransportError>>>,
        inspect_result: Mutex<Option<Result<GcInspectReply, TransportError>>>,
        /// When set, `inspect` waits on this instead of returning immediately
        /// — used to simulate a GC reply that never arrives within a bot's
        /// inspect deadline.
        hang_inspect: Mutex<bool>,
        release: Notify,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self {
                login_result: Mutex::new(Some(Ok(LoginOutcome {
                    refresh_token: "mock-refresh-token".to_string(),
                    has_guard: false,
                }))),
                inspect_result: Mutex::new(Some(Ok(GcInspectReply::default()))),
                hang_inspect: Mutex::new(false),
                release: Notify::new(),
            }
        }

        pub fn with_login_result(self, result: Result<LoginOutcome, TransportError>) -> Self {
            *self.login_result.lock().unwrap() = Some(result);
            self
        }

        pub fn with_inspect_result(self, result: Result<GcInspectReply, TransportError>) -> Self {
            *self.inspect_result.lock().unwrap() = Some(result);
            self
        }

        pub fn with_hanging_inspect(self) -> Self {
            *self.hang_inspect.lock().unwrap() = true;
            self
        }

        /// Releases a hung `inspect` call, simulating a very late GC reply.
        pub fn release_hang(&self) {
            *self.hang_inspect.lock().unwrap() = false;
            self.release.notify_one();
        }
    }

    impl Default for MockTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl GcTransport for MockTransport {
        async fn login(
            &self,
            _username: &str,
            _password: &str,
            _refresh_token: Option<&str>,
            _proxy_url: Option<&str>,
        ) -> Result<LoginOutcome, TransportError> {
            self.login_result
                .lock()
                .unwrap()
                .clone()
                .expect("MockTransport login result consumed twice without reset")
        }

        async fn inspect(
            &self,
            _owner: &str,
            _asset_id: &str,
            _descriptor: &str,
        ) -> Result<GcInspectReply, TransportError> {
            if *self.hang_inspect.lock().unwrap() {
                self.release.notified().await;
            }
            self.inspect_result
                .lock()
                .unwrap()
                .clone()
                .expect("MockTransport inspect result consumed twice without reset")
        }

        async fn logoff(&self) {}
    }
}
