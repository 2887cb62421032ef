//! Accounts-file loader.
//!
//! One `username:password` per line; `#`-prefixed and blank lines are
//! ignored. The Worker Manager shuffles the parsed list before partitioning
//! it into `BOTS_PER_WORKER`-sized shards, so that restarts don't always
//! hand the same accounts to the same (possibly still-cooling) shard.

use anyhow::{Context, Result};
use rand::seq::SliceRandom;

/// One bot credential pair, as read from the accounts file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub password: String,
}

/// Parses the accounts file contents. Does not shuffle —
/// callers that want startup randomization call [`shuffle`] separately so
/// tests can assert on parse order.
pub fn parse(contents: &str) -> Result<Vec<Account>> {
    let mut accounts = Vec::new();
    for (lineno, raw_line) in contents.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (username, password) = line
            .split_once(':')
            .with_context(|| format!("accounts file line {}: missing ':' separator", lineno + 1))?;
        accounts.push(Account {
            username: username.trim().to_string(),
            password: password.trim().to_string(),
        });
    }
    Ok(accounts)
}

/// Reads and parses the accounts file from disk.
pub async fn load(path: &str) -> Result<Vec<Account>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading accounts file {path:?}"))?;
    parse(&contents)
}

/// Shuffles accounts in place.
pub fn shuffle(accounts: &mut [Account]) {
    accounts.shuffle(&mut rand::rng());
}

/// Divides accounts into partitions of at most `bots_per_worker`, one
/// partition per [`crate::worker::Worker`] shard.
pub fn partition(accounts: Vec<Account>, bots_per_worker: usize) -> Vec<Vec<Account>> {
    if accounts.is_empty() {
        return Vec::new();
    }
    accounts
        .chunks(bots_per_worker.max(1))
        .map(|chunk| chunk.to_vec())
        .collect()
}
