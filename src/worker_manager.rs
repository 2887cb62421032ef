//! Worker Manager / aggregator: shard coordinator. Loads the
//! accounts file, spawns one [`crate::worker::Worker`] per partition,
//! round-robins inspect requests across workers with ready bots, owns the
//! pending-request table, and applies cross-bot retries and per-request
//! timeouts.
//!
//! Every piece of mutable state here — the pending table, the round-robin cursor,
//! the cumulative counters — lives inside one task (`WorkerManagerActor`)
//! that nothing else ever touches directly. [`WorkerManagerHandle`] is the
//! only way callers reach it, by sending a command and awaiting a oneshot
//! reply.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::bots::accounts::{self, Account};
use crate::bots::bot::InspectReply;
use crate::bots::transport::GcTransport;
use crate::config::GatewayConfig;
use crate::worker::{AggregatorMessage, Worker, WorkerCommand, WorkerHandle, WorkerStats};

/// Failure taxonomy surfaced by the Worker Manager to its callers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("no worker has ready bots")]
    NoReadyWorker,
    #[error("timed out after {0} attempts")]
    TimedOut(u32),
}

/// Percentile summary over recent successful response times.
#[derive(Debug, Clone, Default)]
pub struct ResponseTimePercentiles {
    pub p50: Option<u64>,
    pub p90: Option<u64>,
    pub p95: Option<u64>,
}

/// Aggregate stats returned by `WorkerManagerHandle::get_stats`.
#[derive(Debug, Clone, Default)]
pub struct AggregateStats {
    pub workers: Vec<WorkerStats>,
    pub percentiles: ResponseTimePercentiles,
    pub successful: u64,
    pub failed: u64,
    pub cached: u64,
    pub timeouts: u64,
    pub retried_inspections: u64,
    pub success_after_retry: u64,
}

enum ManagerCommand {
    Inspect {
        s: String,
        a: String,
        d: String,
        m: Option<String>,
        retry_count: u32,
        resolve: oneshot::Sender<Result<InspectReply, DispatchError>>,
    },
    AttemptTimeout {
        asset_id: String,
        request_id: u64,
    },
    RecordCached,
    GetStats {
        resolve: oneshot::Sender<AggregateStats>,
    },
    Sweep,
    Shutdown,
}

/// A request in flight in the Worker Manager's pending table, keyed by
/// asset id.
struct PendingEntry {
    request_id: u64,
    s: String,
    a: String,
    d: String,
    m: Option<String>,
    retry_count: u32,
    started: Instant,
    resolve: oneshot::Sender<Result<InspectReply, DispatchError>>,
}

/// Shared handle callers (the Inspect Service) use to reach the aggregator.
#[derive(Clone)]
pub struct WorkerManagerHandle {
    cmd_tx: mpsc::Sender<ManagerCommand>,
}

impl WorkerManagerHandle {
    /// Dispatches one inspect request through the worker pool, retrying
    /// across bots up to `MAX_INSPECT_RETRIES` times before surfacing a
    /// timeout.
    pub async fn inspect_item(
        &self,
        s: &str,
        a: &str,
        d: &str,
        m: Option<&str>,
    ) -> Result<InspectReply, DispatchError> {
        let (resolve, rx) = oneshot::channel();
        self.cmd_tx
            .send(ManagerCommand::Inspect {
                s: s.to_string(),
                a: a.to_string(),
                d: d.to_string(),
                m: m.map(str::to_string),
                retry_count: 0,
                resolve,
            })
            .await
            .map_err(|_| DispatchError::NoReadyWorker)?;
        rx.await.unwrap_or(Err(DispatchError::NoReadyWorker))
    }

    pub async fn get_stats(&self) -> AggregateStats {
        let (resolve, rx) = oneshot::channel();
        if self.cmd_tx.send(ManagerCommand::GetStats { resolve }).await.is_err() {
            return AggregateStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Records a cache hit for the `/stats` cumulative counter — the
    /// Inspect Service's cache path never touches a worker, so it reports
    /// through this side channel instead of `inspect_item`.
    pub async fn record_cached(&self) {
        let _ = self.cmd_tx.send(ManagerCommand::RecordCached).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(ManagerCommand::Shutdown).await;
    }
}

struct WorkerManagerActor<T: GcTransport> {
    workers: Vec<WorkerHandle>,
    up_rx: mpsc::Receiver<AggregatorMessage>,
    cmd_rx: mpsc::Receiver<ManagerCommand>,
    cmd_tx: mpsc::Sender<ManagerCommand>,
    pending: HashMap<String, PendingEntry>,
    next_request_id: AtomicU64,
    round_robin: usize,
    last_stats: HashMap<usize, WorkerStats>,
    response_times: Vec<(Instant, u64)>,
    successful: u64,
    failed: u64,
    cached: u64,
    timeouts: u64,
    retried_inspections: u64,
    success_after_retry: u64,

    max_inspect_retries: u32,
    aggregator_timeout: Duration,
    retry_wait: Duration,
    sweep_interval: Duration,
    pending_max_age: Duration,

    _transport: std::marker::PhantomData<T>,
}

/// Builds the full Worker Manager: loads the accounts file, partitions it,
/// spawns one Worker per partition, and spawns the aggregator task itself.
pub async fn spawn<T: GcTransport + 'static>(
    config: &GatewayConfig,
    transport_factory: impl Fn(&Account) -> Arc<T> + Clone + Send + 'static,
) -> anyhow::Result<WorkerManagerHandle> {
    let mut loaded = accounts::load(&config.accounts_file).await?;
    accounts::shuffle(&mut loaded);
    let partitions = accounts::partition(loaded, config.bots_per_worker);

    let (up_tx, up_rx) = mpsc::channel(4096);
    let mut workers = Vec::with_capacity(partitions.len().max(1));
    for (id, partition) in partitions.into_iter().enumerate() {
        let factory = transport_factory.clone();
        workers.push(Worker::spawn(id, partition, move |a| factory(a), config, up_tx.clone()));
    }

    let (cmd_tx, cmd_rx) = mpsc::channel(4096);
    let actor = WorkerManagerActor::<T> {
        workers,
        up_rx,
        cmd_rx,
        cmd_tx: cmd_tx.clone(),
        pending: HashMap::new(),
        next_request_id: AtomicU64::new(1),
        round_robin: 0,
        last_stats: HashMap::new(),
        response_times: Vec::new(),
        successful: 0,
        failed: 0,
        cached: 0,
        timeouts: 0,
        retried_inspections: 0,
        success_after_retry: 0,
        max_inspect_retries: config.max_inspect_retries,
        aggregator_timeout: config.aggregator_timeout,
        retry_wait: Duration::from_secs(1),
        sweep_interval: config.sweep_interval,
        pending_max_age: config.pending_max_age,
        _transport: std::marker::PhantomData,
    };

    tokio::spawn(actor.run());

    let sweep_tx = cmd_tx.clone();
    let sweep_interval = config.sweep_interval;
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            if sweep_tx.send(ManagerCommand::Sweep).await.is_err() {
                return;
            }
        }
    });

    Ok(WorkerManagerHandle { cmd_tx })
}

impl<T: GcTransport + 'static> WorkerManagerActor<T> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => {
                    if self.handle_command(cmd).await {
                        return;
                    }
                }
                Some(msg) = self.up_rx.recv() => {
                    self.handle_worker_message(msg).await;
                }
            }
        }
    }

    async fn handle_command(&mut self, cmd: ManagerCommand) -> bool {
        match cmd {
            ManagerCommand::Inspect { s, a, d, m, retry_count, resolve } => {
                self.execute_inspection(s, a, d, m, retry_count, resolve).await;
            }
            ManagerCommand::AttemptTimeout { asset_id, request_id } => {
                self.handle_timeout(asset_id, request_id).await;
            }
            ManagerCommand::RecordCached => {
                self.cached += 1;
            }
            ManagerCommand::GetStats { resolve } => {
                let _ = resolve.send(self.build_stats());
            }
            ManagerCommand::Sweep => {
                self.sweep_stale();
            }
            ManagerCommand::Shutdown => {
                for worker in &self.workers {
                    let (ack, rx) = oneshot::channel();
                    let _ = worker.cmd_tx.send(WorkerCommand::Shutdown { ack }).await;
                    let _ = rx.await;
                }
                return true;
            }
        }
        false
    }

    /// Picks an available worker (round-robin over workers whose last
    /// known stats report a ready bot) and dispatches, arming the
    /// aggregator's per-attempt timeout.
    async fn execute_inspection(
        &mut self,
        s: String,
        a: String,
        d: String,
        m: Option<String>,
        retry_count: u32,
        resolve: oneshot::Sender<Result<InspectReply, DispatchError>>,
    ) {
        let Some(worker) = self.pick_available_worker() else {
            let _ = resolve.send(Err(DispatchError::NoReadyWorker));
            return;
        };

        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        self.pending.insert(
            a.clone(),
            PendingEntry {
                request_id,
                s: s.clone(),
                a: a.clone(),
                d: d.clone(),
                m: m.clone(),
                retry_count,
                started: Instant::now(),
                resolve,
            },
        );

        let _ = worker
            .cmd_tx
            .send(WorkerCommand::InspectItem { request_id, s, a: a.clone(), d, m })
            .await;

        let timeout_tx = self.cmd_tx.clone();
        let timeout_duration = self.aggregator_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout_duration).await;
            let _ = timeout_tx.send(ManagerCommand::AttemptTimeout { asset_id: a, request_id }).await;
        });
    }

    fn pick_available_worker(&mut self) -> Option<WorkerHandle> {
        if self.workers.is_empty() {
            return None;
        }
        let n = self.workers.len();
        for offset in 0..n {
            let idx = (self.round_robin + offset) % n;
            let worker = &self.workers[idx];
            let has_ready = self
                .last_stats
                .get(&worker.id)
                .map(|s| s.ready_bots > 0)
                .unwrap_or(true); // no stats yet: optimistically try it
            if has_ready {
                self.round_robin = (idx + 1) % n;
                return Some(worker.clone());
            }
        }
        None
    }

    async fn handle_worker_message(&mut self, msg: AggregatorMessage) {
        match msg {
            AggregatorMessage::InspectResult { request_id, asset_id, reply, .. } => {
                self.resolve_pending(&asset_id, request_id, Ok(reply));
            }
            AggregatorMessage::InspectError { request_id, asset_id, reason, .. } => {
                self.resolve_pending_or_retry(asset_id, request_id, reason).await;
            }
            AggregatorMessage::Stats { worker_id, stats } => {
                self.last_stats.insert(worker_id, stats);
            }
            AggregatorMessage::BotStatusChange { .. } => {}
        }
    }

    async fn handle_timeout(&mut self, asset_id: String, request_id: u64) {
        let matches_current = self.pending.get(&asset_id).map(|p| p.request_id) == Some(request_id);
        if !matches_current {
            return; // already resolved or retried under a new attempt id
        }
        self.resolve_pending_or_retry(asset_id, request_id, "inspect deadline expired".to_string())
            .await;
    }

    /// On a failure or a fired timeout: retry on a different worker up to
    /// `MAX_INSPECT_RETRIES`, else resolve as a terminal timeout.
    async fn resolve_pending_or_retry(&mut self, asset_id: String, request_id: u64, reason: String) {
        let Some(entry) = self.pending.remove(&asset_id) else { return };
        if entry.request_id != request_id {
            self.pending.insert(asset_id, entry);
            return;
        }

        if entry.retry_count < self.max_inspect_retries {
            self.retried_inspections += 1;
            let next_retry = entry.retry_count + 1;
            let cmd_tx = self.cmd_tx.clone();
            let retry_wait = self.retry_wait;
            let PendingEntry { s, a, d, m, resolve, .. } = entry;
            tokio::spawn(async move {
                tokio::time::sleep(retry_wait).await;
                let (inner_resolve, inner_rx) = oneshot::channel();
                if cmd_tx
                    .send(ManagerCommand::Inspect { s, a, d, m, retry_count: next_retry, resolve: inner_resolve })
                    .await
                    .is_err()
                {
                    let _ = resolve.send(Err(DispatchError::NoReadyWorker));
                    return;
                }
                let _ = resolve.send(inner_rx.await.unwrap_or(Err(DispatchError::NoReadyWorker)));
            });
        } else {
            self.timeouts += 1;
            self.failed += 1;
            let _ = entry.resolve.send(Err(DispatchError::TimedOut(entry.retry_count + 1)));
            tracing::warn!(
                "[worker_manager] [timeout] asset_id={} reason={} attempts={}",
                entry.a,
                reason,
                entry.retry_count + 1
            );
        }
    }

    fn resolve_pending(&mut self, asset_id: &str, request_id: u64, result: Result<InspectReply, DispatchError>) {
        let Some(entry) = self.pending.remove(asset_id) else { return };
        if entry.request_id != request_id {
            self.pending.insert(asset_id.to_string(), entry);
            return;
        }
        let elapsed_ms = entry.started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => {
                self.successful += 1;
                if entry.retry_count > 0 {
                    self.success_after_retry += 1;
                }
                self.response_times.push((Instant::now(), elapsed_ms));
            }
            Err(_) => {
                self.failed += 1;
            }
        }
        let _ = entry.resolve.send(result);
    }

    /// Fail-safe sweeper: rejects any pending entry older than
    /// `pending_max_age`, regardless of retry count.
    fn sweep_stale(&mut self) {
        let now = Instant::now();
        let stale: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.started) > self.pending_max_age)
            .map(|(asset_id, _)| asset_id.clone())
            .collect();
        for asset_id in stale {
            if let Some(entry) = self.pending.remove(&asset_id) {
                self.timeouts += 1;
                self.failed += 1;
                let _ = entry.resolve.send(Err(DispatchError::TimedOut(entry.retry_count + 1)));
                tracing::warn!("[worker_manager] [sweep_stale] asset_id={}", asset_id);
            }
        }
    }

    fn build_stats(&mut self) -> AggregateStats {
        let cutoff = Instant::now() - Duration::from_secs(300);
        self.response_times.retain(|(at, _)| *at >= cutoff);
        let mut values: Vec<u64> = self.response_times.iter().map(|(_, v)| *v).collect();
        values.sort_unstable();

        AggregateStats {
            workers: self.last_stats.values().cloned().collect(),
            percentiles: ResponseTimePercentiles {
                p50: percentile(&values, 50),
                p90: percentile(&values, 90),
                p95: percentile(&values, 95),
            },
            successful: self.successful,
            failed: self.failed,
            cached: self.cached,
            timeouts: self.timeouts,
            retried_inspections: self.retried_inspections,
            success_after_retry: self.success_after_retry,
        }
    }
}

fn percentile(sorted: &[u64], pct: usize) -> Option<u64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (sorted.len() * pct / 100).min(sorted.len() - 1);
    Some(sorted[idx])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_of_empty_is_none() {
        assert_eq!(percentile(&[], 50), None);
    }

    #[test]
    fn percentile_picks_expected_bucket() {
        let values: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&values, 50), Some(51));
        assert_eq!(percentile(&values, 90), Some(91));
    }
}
