//! Append-only blacklist file: `username:reason:ISO-8601-timestamp` per
//! line. Written when a bot's `initialize()` fails with a
//! terminal reason.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;

/// One parsed blacklist entry.
#[derive(Debug, Clone, PartialEq)]
pub struct BlacklistEntry {
    pub username: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Appends one entry to the blacklist file, creating it if necessary.
/// Concurrent writers are never an issue here: bot lifecycle is sequential
/// per bot, and only one bot can reach a terminal state at a time across
/// the whole account.
pub async fn append(blacklist_path: &str, username: &str, reason: &str) -> Result<()> {
    let timestamp = Utc::now();
    append_at(blacklist_path, username, reason, timestamp).await
}

async fn append_at(
    blacklist_path: &str,
    username: &str,
    reason: &str,
    timestamp: DateTime<Utc>,
) -> Result<()> {
    if let Some(parent) = std::path::Path::new(blacklist_path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating blacklist directory {parent:?}"))?;
        }
    }

    let line = format!("{username}:{reason}:{}\n", timestamp.to_rfc3339());
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(blacklist_path)
        .await
        .with_context(|| format!("opening blacklist file {blacklist_path:?}"))?;
    file.write_all(line.as_bytes())
        .await
        .context("appending blacklist entry")
}

/// Parses a blacklist file's contents into entries, skipping malformed
/// lines rather than failing the whole read.
pub fn parse(contents: &str) -> Vec<BlacklistEntry> {
    contents
        .lines()
        .filter_map(|line| {
            let mut parts = line.splitn(3, ':');
            let username = parts.next()?.to_string();
            let reason = parts.next()?.to_string();
            let timestamp = DateTime::parse_from_rfc3339(parts.next()?)
                .ok()?
                .with_timezone(&Utc);
            Some(BlacklistEntry { username, reason, timestamp })
        })
        .collect()
}

/// Loads and parses the blacklist file. A missing file means nobody has
/// been blacklisted yet — not an error.
pub async fn load(blacklist_path: &str) -> Result<Vec<BlacklistEntry>> {
    match tokio::fs::read_to_string(blacklist_path).await {
        Ok(contents) => Ok(parse(&contents)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(err) => Err(err).with_context(|| format!("reading blacklist file {blacklist_path:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_lines() {
        let entries = parse("alice:ACCOUNT_DISABLED:2026-01-01T00:00:00Z\n");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].username, "alice");
        assert_eq!(entries[0].reason, "ACCOUNT_DISABLED");
    }

    #[test]
    fn skips_malformed_lines() {
        let entries = parse("not enough fields\nalice:ACCOUNT_DISABLED:2026-01-01T00:00:00Z\n");
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn append_then_load_round_trips() {
        let mut path = std::env::temp_dir();
        path.push(format!("inspect-gateway-blacklist-test-{}.txt", uuid::Uuid::new_v4()));
        let path = path.to_str().unwrap().to_string();

        append(&path, "alice", "ACCOUNT_DISABLED").await.unwrap();
        append(&path, "bob", "INVALID_CREDENTIALS").await.unwrap();

        let entries = load(&path).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].username, "alice");
        assert_eq!(entries[1].username, "bob");

        tokio::fs::remove_file(&path).await.ok();
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let entries = load("/tmp/inspect-gateway-blacklist-does-not-exist.txt").await.unwrap();
        assert!(entries.is_empty());
    }
}
