//! inspect-gateway — bot-pool dispatch core for an item-inspection service.
//!
//! A Rust reimplementation of the dispatch core described by the project's
//! specification: a fleet of long-lived, authenticated game-coordinator
//! client sessions ("bots") multiplexed across incoming inspect requests,
//! with per-bot serialization, health tracking, retries, and queue
//! admission control.

/// Environment-driven configuration (replaces a YAML config file — every
/// option here is read from the process environment).
pub mod config;
/// Process lifecycle: shutdown signal plumbing shared by every long-running
/// task (HTTP listener, worker manager sweeper, bot destroy paths).
pub mod core;

/// The deterministic content-hash identity contract (`unique_id`) and the
/// GC wear-integer reinterpretation rule.
pub mod identity;
/// Persisted data model: Asset, History, and the read-only Ranking row.
pub mod models;
/// The immutable, startup-loaded weapon/sticker/agent/graffiti/keychain
/// catalog, plus the bundled pattern-name tables.
pub mod schema;
/// Pure formatting: Asset + Ranking + ItemSchema → the `iteminfo` response.
pub mod formatter;

/// Bot lifecycle: login, GC handshake, single-flight inspect, cooldown,
/// reconnection, session persistence, blacklisting.
pub mod bots;
/// Worker shard: owns a partition of bots, dispatches within that
/// partition, reports aggregate stats.
pub mod worker;
/// Worker Manager (aggregator): round-robins inspect requests across
/// workers, owns the pending-request table, applies cross-bot retries and
/// per-request timeouts.
pub mod worker_manager;
/// Bounded admission set guarding the whole pipeline against overload.
pub mod queue;
/// Request entry point: parses input, consults the asset cache, dispatches
/// through the Worker Manager, persists and formats the result.
pub mod inspect_service;

/// Relational persistence (sqlx, MySQL in production / SQLite in tests)
/// for Asset and History.
pub mod db;
/// The thin HTTP adapter (axum) fronting the gateway.
pub mod http;
