//! Per-username refresh-token session persistence, written to
//! `${SESSION_PATH}/${username}.json`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The on-disk shape of a bot's saved session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    pub refresh_token: String,
    pub timestamp: DateTime<Utc>,
    pub username: String,
    pub has_guard: bool,
}

impl SessionFile {
    /// A session older than `max_age_days` is discarded rather than reused.
    pub fn is_fresh(&self, max_age_days: i64, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.timestamp) < chrono::Duration::days(max_age_days)
    }
}

fn session_file_path(session_path: &str, username: &str) -> std::path::PathBuf {
    std::path::Path::new(session_path).join(format!("{username}.json"))
}

/// Loads a bot's session file, if present and parseable. A missing file is
/// not an error — a bot with no saved session just falls back to password
/// login — but a malformed one is, so callers can tell "never logged in"
/// apart from "session file is corrupt".
pub async fn load(session_path: &str, username: &str) -> Result<Option<SessionFile>> {
    let path = session_file_path(session_path, username);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => {
            let session: SessionFile = serde_json::from_str(&contents)
                .with_context(|| format!("parsing session file {path:?}"))?;
            Ok(Some(session))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err).with_context(|| format!("reading session file {path:?}")),
    }
}

/// Writes a refreshed session to disk. Best-effort: failures are logged by
/// the caller and never block the bot's login path.
pub async fn save(session_path: &str, session: &SessionFile) -> Result<()> {
    tokio::fs::create_dir_all(session_path)
        .await
        .with_context(|| format!("creating session directory {session_path:?}"))?;
    let path = session_file_path(session_path, &session.username);
    let body = serde_json::to_string_pretty(session).context("serializing session file")?;
    tokio::fs::write(&path, body)
        .await
        .with_context(|| format!("writing session file {path:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(username: &str, timestamp: DateTime<Utc>) -> SessionFile {
        SessionFile {
            refresh_token: "abc123".to_string(),
            timestamp,
            username: username.to_string(),
            has_guard: false,
        }
    }

    #[test]
    fn fresh_session_within_max_age() {
        let now = Utc::now();
        let session = sample("alice", now - chrono::Duration::days(10));
        assert!(session.is_fresh(180, now));
    }

    #[test]
    fn stale_session_past_max_age() {
        let now = Utc::now();
        let session = sample("alice", now - chrono::Duration::days(181));
        assert!(!session.is_fresh(180, now));
    }

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempdir();
        let session = sample("alice", Utc::now());
        save(dir.to_str().unwrap(), &session).await.unwrap();

        let loaded = load(dir.to_str().unwrap(), "alice").await.unwrap().unwrap();
        assert_eq!(loaded.refresh_token, session.refresh_token);
        assert_eq!(loaded.username, "alice");

        tokio::fs::remove_dir_all(dir).await.ok();
    }

    #[tokio::test]
    async fn missing_session_is_none_not_an_error() {
        let dir = tempdir();
        let result = load(dir.to_str().unwrap(), "nobody").await.unwrap();
        assert!(result.is_none());
    }

    fn tempdir() -> std::path::PathBuf {
        let mut dir = std::env::temp_dir();
        dir.push(format!("inspect-gateway-session-test-{}", uuid::Uuid::new_v4()));
        dir
    }
}
