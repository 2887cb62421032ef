//! Inspect Service: the request entry point.
//!
//! Parses the caller's query, checks the asset cache, admits the request
//! into the bounded in-flight set, dispatches through the Worker Manager
//! under a client-visible deadline, persists the result, and formats the
//! response. Everything above this layer (`http.rs`) is a thin adapter;
//! everything below it (`worker_manager.rs`, `db.rs`, `formatter.rs`) is
//! already unaware of HTTP or admission.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::bots::transport::GcTransport;
use crate::config::GatewayConfig;
use crate::db::AssetRepository;
use crate::formatter::{self, ItemInfo};
use crate::queue::{AdmissionSet, AdmitOutcome};
use crate::schema::ItemSchema;
use crate::worker_manager::{DispatchError, WorkerManagerHandle};

static STEAM_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^7656\d{13}$").unwrap());
static URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^steam://rungame/730/\d+/\s*csgo_econ_action_preview\s+(?P<sm>[SM])(?P<sid>\d{17})A(?P<a>\d+)D(?P<d>\d+)$",
    )
    .unwrap()
});

/// A parsed, validated inspect query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectQuery {
    pub s: Option<String>,
    pub m: Option<String>,
    pub a: String,
    pub d: String,
    pub refresh: bool,
}

/// Everything that can go wrong parsing, admitting, or dispatching a
/// request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InspectServiceError {
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("queue full")]
    QueueFull,
    #[error("request timed out")]
    QueueTimeout,
    #[error("no worker has ready bots")]
    Unavailable,
    #[error("timed out after {0} attempts")]
    DispatchTimeout(u32),
    #[error("processing error: {0}")]
    Processing(String),
}

impl From<DispatchError> for InspectServiceError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NoReadyWorker => InspectServiceError::Unavailable,
            DispatchError::TimedOut(attempts) => InspectServiceError::DispatchTimeout(attempts),
        }
    }
}

/// Parses either an explicit `{s|m, a, d}` triple or a `url` of the form
/// `steam://rungame/730/<n>/ csgo_econ_action_preview [SM]<20digits>A<digits>D<digits>`.
/// Exactly one of `s`/`m` is populated, matching the `[SM]` tag in the URL
/// form.
pub fn parse_query(
    s: Option<&str>,
    m: Option<&str>,
    a: Option<&str>,
    d: Option<&str>,
    url: Option<&str>,
    refresh: bool,
) -> Result<InspectQuery, InspectServiceError> {
    if let Some(url) = url {
        let caps = URL_RE
            .captures(url)
            .ok_or_else(|| InspectServiceError::MalformedInput("unrecognized url".to_string()))?;
        let sid = caps["sid"].to_string();
        let query = if &caps["sm"] == "S" {
            InspectQuery { s: Some(sid), m: None, a: caps["a"].to_string(), d: caps["d"].to_string(), refresh }
        } else {
            InspectQuery { s: None, m: Some(sid), a: caps["a"].to_string(), d: caps["d"].to_string(), refresh }
        };
        return validate(query);
    }

    let a = a.ok_or_else(|| InspectServiceError::MalformedInput("missing a".to_string()))?;
    let d = d.ok_or_else(|| InspectServiceError::MalformedInput("missing d".to_string()))?;
    if s.is_none() && m.is_none() {
        return Err(InspectServiceError::MalformedInput("missing s or m".to_string()));
    }
    validate(InspectQuery {
        s: s.map(str::to_string),
        m: m.map(str::to_string),
        a: a.to_string(),
        d: d.to_string(),
        refresh,
    })
}

fn validate(query: InspectQuery) -> Result<InspectQuery, InspectServiceError> {
    if let Some(s) = &query.s {
        if !STEAM_ID_RE.is_match(s) {
            return Err(InspectServiceError::MalformedInput(format!("invalid steam id: {s}")));
        }
    }
    if query.a.parse::<i64>().is_err() {
        return Err(InspectServiceError::MalformedInput(format!("invalid asset id: {}", query.a)));
    }
    Ok(query)
}

/// Cumulative counters the `/stats` surface reports alongside the Worker
/// Manager's own.
#[derive(Debug, Clone, Default)]
pub struct InspectServiceCounters {
    pub cached: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

/// The request entry point proper, wired once at startup and shared
/// behind an `Arc` by every HTTP handler.
pub struct InspectService<T: GcTransport> {
    worker_manager: WorkerManagerHandle,
    db: AssetRepository,
    schema: Arc<ItemSchema>,
    admission: AdmissionSet<ItemInfo, InspectServiceError>,
    queue_timeout: std::time::Duration,
    _transport: std::marker::PhantomData<T>,
}

impl<T: GcTransport + 'static> InspectService<T> {
    pub fn new(
        worker_manager: WorkerManagerHandle,
        db: AssetRepository,
        schema: Arc<ItemSchema>,
        config: &GatewayConfig,
    ) -> Self {
        Self {
            worker_manager,
            db,
            schema,
            admission: AdmissionSet::new(config.max_queue_size),
            queue_timeout: config.queue_timeout,
            _transport: std::marker::PhantomData,
        }
    }

    /// Serves one inspect request end-to-end.
    pub async fn inspect(&self, query: InspectQuery) -> Result<ItemInfo, InspectServiceError> {
        if !query.refresh {
            if let Some(info) = self.try_cache(&query.a).await? {
                return Ok(info);
            }
        }

        match self.admission.admit(&query.a).await {
            AdmitOutcome::Full => Err(InspectServiceError::QueueFull),
            AdmitOutcome::Joined(rx) => rx.await.unwrap_or(Err(InspectServiceError::Unavailable)),
            AdmitOutcome::Admitted => {
                let result = tokio::time::timeout(self.queue_timeout, self.dispatch_and_persist(&query))
                    .await
                    .unwrap_or(Err(InspectServiceError::QueueTimeout));
                self.admission.complete(&query.a, result.clone()).await;
                result
            }
        }
    }

    async fn try_cache(&self, asset_id: &str) -> Result<Option<ItemInfo>, InspectServiceError> {
        let parsed: i64 = asset_id
            .parse()
            .map_err(|_| InspectServiceError::MalformedInput(format!("invalid asset id: {asset_id}")))?;
        let asset = self
            .db
            .get_by_asset_id(parsed)
            .await
            .map_err(|e| InspectServiceError::Processing(e.to_string()))?;
        let Some(asset) = asset else { return Ok(None) };

        self.worker_manager.record_cached().await;
        let ranking = self
            .db
            .get_ranking(&asset.unique_id)
            .await
            .map_err(|e| InspectServiceError::Processing(e.to_string()))?;
        Ok(Some(formatter::format(&asset, ranking.as_ref(), &self.schema)))
    }

    async fn dispatch_and_persist(&self, query: &InspectQuery) -> Result<ItemInfo, InspectServiceError> {
        let s = query.s.as_deref().unwrap_or_default();
        let reply = self
            .worker_manager
            .inspect_item(s, &query.a, &query.d, query.m.as_deref())
            .await?;

        let asset_id: i64 = query
            .a
            .parse()
            .map_err(|_| InspectServiceError::MalformedInput(format!("invalid asset id: {}", query.a)))?;
        // `m` (market-listing id) takes precedence over `s` (owner steam id)
        // when both are present, matching the owner resolution `worker.rs`
        // uses to pick the id it hands the bot. The wire value is a signed
        // 64-bit integer that must be reinterpreted as unsigned (spec.md
        // §3/§8) before it's stored.
        let ms_signed = match query.m.as_deref() {
            Some(m) if m != "0" => m.parse::<i64>().ok(),
            _ => None,
        }
        .or_else(|| query.s.as_deref().and_then(|s| s.parse::<i64>().ok()))
        .unwrap_or(0);
        let ms = crate::identity::signed_to_unsigned_ms(ms_signed);
        let now = chrono::Utc::now();
        let asset = AssetRepository::build_asset(asset_id, ms, &query.d, &reply, now);

        let previous = self
            .db
            .latest_by_unique_id(&asset.unique_id)
            .await
            .map_err(|e| InspectServiceError::Processing(e.to_string()))?;

        self.db
            .upsert(&asset)
            .await
            .map_err(|e| InspectServiceError::Processing(e.to_string()))?;

        if let Some(previous) = previous {
            if history_differs(&previous, &asset) {
                let history = build_history(&previous, &asset, now);
                self.db
                    .insert_history(&history)
                    .await
                    .map_err(|e| InspectServiceError::Processing(e.to_string()))?;
            }
        }

        let ranking = self
            .db
            .get_ranking(&asset.unique_id)
            .await
            .map_err(|e| InspectServiceError::Processing(e.to_string()))?;
        Ok(formatter::format(&asset, ranking.as_ref(), &self.schema))
    }
}

/// Decides whether the incoming observation diverges from the previous
/// one in a way worth recording.
fn history_differs(previous: &crate::models::Asset, current: &crate::models::Asset) -> bool {
    previous.ms != current.ms
        || previous.stickers != current.stickers
        || previous.keychains != current.keychains
}

fn build_history(
    previous: &crate::models::Asset,
    current: &crate::models::Asset,
    now: chrono::DateTime<chrono::Utc>,
) -> crate::models::History {
    use crate::models::HistoryKind;

    let kind = if previous.ms != current.ms {
        HistoryKind::Trade
    } else if previous.stickers != current.stickers {
        HistoryKind::StickerChange
    } else {
        HistoryKind::StickerChange
    };

    crate::models::History {
        id: 0,
        kind,
        prev_owner: Some(previous.ms),
        current_owner: Some(current.ms),
        prev_asset_id: Some(previous.asset_id),
        current_asset_id: current.asset_id,
        prev_stickers: previous.stickers.clone(),
        current_stickers: current.stickers.clone(),
        prev_keychains: previous.keychains.clone(),
        current_keychains: current.keychains.clone(),
        created_at: now,
    }
}
