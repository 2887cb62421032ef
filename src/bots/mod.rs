//! Bot lifecycle: login, GC handshake, single-flight inspect, cooldown,
//! reconnection, session persistence, blacklisting.

/// The accounts-file loader: `username:password` lines, shuffled and
/// partitioned into per-worker shards.
pub mod accounts;
/// Append-only blacklist file for terminally failed accounts.
pub mod blacklist;
/// The `Bot` type itself: state machine, single-flight inspect, retries.
pub mod bot;
/// Per-username refresh-token session persistence.
pub mod session;
/// Per-bot lifecycle state.
pub mod state;
/// The Steam/GC protocol adapter seam.
pub mod transport;

pub use bot::{Bot, BotInitError, BotInspectError, BotSnapshot};
pub use state::{BotCounters, BotState};
