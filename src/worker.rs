//! Worker shard: owns a fixed partition of bots, dispatches
//! within that partition, and reports aggregate stats upstream to the
//! Worker Manager.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::IteratorRandom;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::bots::accounts::Account;
use crate::bots::bot::{Bot, BotSnapshot, InspectReply};
use crate::bots::state::BotState;
use crate::bots::transport::GcTransport;
use crate::config::GatewayConfig;

/// A command sent down from the Worker Manager to one Worker.
pub enum WorkerCommand {
    InspectItem {
        request_id: u64,
        s: String,
        a: String,
        d: String,
        m: Option<String>,
    },
    GetStats,
    Shutdown {
        ack: oneshot::Sender<()>,
    },
}

/// Aggregate counters a Worker reports about its own partition.
#[derive(Debug, Clone, Default)]
pub struct WorkerStats {
    pub total_bots: usize,
    pub ready_bots: usize,
    pub busy_bots: usize,
    pub cooldown_bots: usize,
    pub error_bots: usize,
    pub inspects: u64,
    pub successes: u64,
    pub failures: u64,
    pub bots: Vec<BotSnapshot>,
}

/// Events a Worker posts upstream to the Worker Manager.
#[derive(Debug)]
pub enum AggregatorMessage {
    InspectResult {
        worker_id: usize,
        request_id: u64,
        asset_id: String,
        reply: InspectReply,
    },
    InspectError {
        worker_id: usize,
        request_id: u64,
        asset_id: String,
        reason: String,
    },
    Stats {
        worker_id: usize,
        stats: WorkerStats,
    },
    BotStatusChange {
        worker_id: usize,
        username: String,
        status: BotState,
    },
}

/// A shard owning `BOTS_PER_WORKER` bot accounts.
pub struct Worker<T: GcTransport> {
    id: usize,
    bots: Vec<Arc<Bot<T>>>,
    cmd_rx: mpsc::Receiver<WorkerCommand>,
    up_tx: mpsc::Sender<AggregatorMessage>,
    throttled: HashMap<String, Instant>,
    login_throttle: Duration,
    max_retries: u32,
    stats_interval: Duration,
}

/// A handle the Worker Manager holds for one Worker task.
#[derive(Clone)]
pub struct WorkerHandle {
    pub id: usize,
    pub cmd_tx: mpsc::Sender<WorkerCommand>,
}

impl<T: GcTransport + 'static> Worker<T> {
    /// Builds a Worker shard and spawns its event loop, returning the
    /// handle the Worker Manager dispatches through.
    pub fn spawn(
        id: usize,
        accounts: Vec<Account>,
        transport_factory: impl Fn(&Account) -> Arc<T>,
        config: &GatewayConfig,
        up_tx: mpsc::Sender<AggregatorMessage>,
    ) -> WorkerHandle {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let bots = accounts
            .iter()
            .map(|account| {
                Arc::new(Bot::new(
                    account.username.clone(),
                    account.password.clone(),
                    transport_factory(account),
                    config,
                ))
            })
            .collect();

        let worker = Worker {
            id,
            bots,
            cmd_rx,
            up_tx,
            throttled: HashMap::new(),
            login_throttle: config.login_throttle,
            max_retries: config.max_retries,
            stats_interval: config.stats_update_interval,
        };

        tokio::spawn(async move {
            worker.initialize_bots().await;
            worker.run().await;
        });
        WorkerHandle { id, cmd_tx }
    }

    /// Logs every bot in with up to `max_retries` attempts each. Accounts that come back
    /// `ACCOUNT_DISABLED` are dropped from the partition entirely;
    /// `LOGIN_THROTTLED` accounts are parked in the throttle table instead
    /// of being retried immediately.
    pub async fn initialize_bots(&mut self) {
        let mut surviving = Vec::with_capacity(self.bots.len());
        for bot in std::mem::take(&mut self.bots) {
            if self.throttled.contains_key(&bot.username) {
                surviving.push(bot);
                continue;
            }

            let mut attempt = 0;
            loop {
                attempt += 1;
                match bot.initialize().await {
                    Ok(()) => {
                        surviving.push(bot);
                        break;
                    }
                    Err(err) if err.is_terminal() => {
                        tracing::warn!(
                            "[worker] [account_disabled] worker={} username={}",
                            self.id,
                            bot.username
                        );
                        break; // dropped from the partition
                    }
                    Err(crate::bots::bot::BotInitError::LoginThrottled) => {
                        self.throttled.insert(bot.username.clone(), Instant::now());
                        surviving.push(bot);
                        break;
                    }
                    Err(err) if err.is_retryable() && attempt < self.max_retries => {
                        tracing::info!(
                            "[worker] [init_retry] worker={} username={} attempt={} err={}",
                            self.id,
                            bot.username,
                            attempt,
                            err
                        );
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(
                            "[worker] [init_failed] worker={} username={} err={}",
                            self.id,
                            bot.username,
                            err
                        );
                        surviving.push(bot);
                        break;
                    }
                }
            }
        }
        self.bots = surviving;
    }

    async fn run(mut self) {
        let mut stats_ticker = tokio::time::interval(self.stats_interval);
        loop {
            tokio::select! {
                Some(cmd) = self.cmd_rx.recv() => {
                    if self.handle_command(cmd).await {
                        return;
                    }
                }
                _ = stats_ticker.tick() => {
                    self.unthrottle_expired().await;
                    let stats = self.collect_stats().await;
                    let _ = self.up_tx.send(AggregatorMessage::Stats { worker_id: self.id, stats }).await;
                }
            }
        }
    }

    /// Returns `true` when the worker should stop its loop (Shutdown).
    async fn handle_command(&mut self, cmd: WorkerCommand) -> bool {
        match cmd {
            WorkerCommand::InspectItem { request_id, s, a, d, m } => {
                self.dispatch_inspect(request_id, s, a, d, m).await;
                false
            }
            WorkerCommand::GetStats => {
                let stats = self.collect_stats().await;
                let _ = self
                    .up_tx
                    .send(AggregatorMessage::Stats { worker_id: self.id, stats })
                    .await;
                false
            }
            WorkerCommand::Shutdown { ack } => {
                for bot in &self.bots {
                    bot.destroy().await;
                }
                let _ = ack.send(());
                true
            }
        }
    }

    async fn dispatch_inspect(&self, request_id: u64, s: String, a: String, d: String, m: Option<String>) {
        let Some(bot) = self.select_ready_bot().await else {
            let _ = self
                .up_tx
                .send(AggregatorMessage::InspectError {
                    worker_id: self.id,
                    request_id,
                    asset_id: a,
                    reason: "no ready bots in partition".to_string(),
                })
                .await;
            return;
        };

        let owner = match &m {
            Some(m) if m != "0" => m.clone(),
            _ => s.clone(),
        };

        let _ = self
            .up_tx
            .send(AggregatorMessage::BotStatusChange {
                worker_id: self.id,
                username: bot.username.clone(),
                status: BotState::Busy,
            })
            .await;
        let stats = self.collect_stats().await;
        let _ = self.up_tx.send(AggregatorMessage::Stats { worker_id: self.id, stats }).await;

        let worker_id = self.id;
        let up_tx = self.up_tx.clone();
        let bot = Arc::clone(&bot);
        let cooldown = bot.cooldown_duration();

        tokio::spawn(async move {
            let result = bot.inspect_item(&owner, &a, &d).await;
            let message = match result {
                Ok(reply) => {
                    tracing::debug!(
                        "[worker] [inspect_ok] worker={} username={} asset_id={}",
                        worker_id,
                        bot.username,
                        a
                    );
                    AggregatorMessage::InspectResult { worker_id, request_id, asset_id: a, reply }
                }
                Err(err) => {
                    tracing::warn!(
                        "[worker] [inspect_failed] worker={} username={} asset_id={} err={}",
                        worker_id,
                        bot.username,
                        a,
                        err
                    );
                    AggregatorMessage::InspectError {
                        worker_id,
                        request_id,
                        asset_id: a,
                        reason: err.to_string(),
                    }
                }
            };
            let _ = up_tx.send(message).await;

            if bot.state().await == BotState::Cooldown {
                tokio::time::sleep(cooldown).await;
                bot.recover_from_cooldown().await;
            }

            let _ = up_tx
                .send(AggregatorMessage::BotStatusChange {
                    worker_id,
                    username: bot.username.clone(),
                    status: bot.state().await,
                })
                .await;
        });
    }

    async fn select_ready_bot(&self) -> Option<Arc<Bot<T>>> {
        let mut candidates = Vec::with_capacity(self.bots.len());
        for bot in &self.bots {
            if bot.is_selectable().await {
                candidates.push(Arc::clone(bot));
            }
        }
        candidates.into_iter().choose(&mut rand::rng())
    }

    async fn unthrottle_expired(&mut self) {
        let now = Instant::now();
        let timeout = self.login_throttle;
        self.throttled.retain(|_, started| now.duration_since(*started) < timeout);
    }

    async fn collect_stats(&self) -> WorkerStats {
        let mut stats = WorkerStats {
            total_bots: self.bots.len(),
            ..Default::default()
        };
        for bot in &self.bots {
            let snapshot = bot.snapshot().await;
            match snapshot.state {
                BotState::Ready => stats.ready_bots += 1,
                BotState::Busy => stats.busy_bots += 1,
                BotState::Cooldown => stats.cooldown_bots += 1,
                BotState::Error => stats.error_bots += 1,
                _ => {}
            }
            stats.inspects += snapshot.counters.inspects;
            stats.successes += snapshot.counters.successes;
            stats.failures += snapshot.counters.failures;
            stats.bots.push(snapshot);
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bots::transport::mock::MockTransport;
    use tokio::time::timeout;

    fn test_config() -> GatewayConfig {
        let mut config = GatewayConfig::from_env().unwrap();
        config.bot_inspect_timeout = Duration::from_millis(50);
        config.bot_cooldown = Duration::from_millis(20);
        config.stats_update_interval = Duration::from_secs(30);
        config.session_path = format!("/tmp/inspect-gateway-worker-test-{}", uuid::Uuid::new_v4());
        config.blacklist_path = format!("/tmp/inspect-gateway-worker-test-{}.txt", uuid::Uuid::new_v4());
        config
    }

    fn account(name: &str) -> Account {
        Account { username: name.to_string(), password: "pw".to_string() }
    }

    async fn recv_bot_status(up_rx: &mut mpsc::Receiver<AggregatorMessage>, want: BotState) {
        loop {
            match timeout(Duration::from_secs(1), up_rx.recv()).await {
                Ok(Some(AggregatorMessage::BotStatusChange { status, .. })) if status == want => return,
                Ok(Some(_)) => continue,
                other => panic!("expected BotStatusChange({want:?}), got {other:?} instead"),
            }
        }
    }

    #[tokio::test]
    async fn dispatch_picks_a_ready_bot_and_reports_result() {
        let config = test_config();
        let (up_tx, mut up_rx) = mpsc::channel(32);
        let handle = Worker::spawn(0, vec![account("alice")], |_| Arc::new(MockTransport::new()), &config, up_tx);

        // Give the worker's spawned task a moment to log the bot in.
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle
            .cmd_tx
            .send(WorkerCommand::InspectItem {
                request_id: 1,
                s: "76561198000000001".to_string(),
                a: "100".to_string(),
                d: "desc".to_string(),
                m: None,
            })
            .await
            .unwrap();

        recv_bot_status(&mut up_rx, BotState::Busy).await;

        let result = timeout(Duration::from_secs(1), up_rx.recv()).await.unwrap().unwrap();
        match result {
            AggregatorMessage::InspectResult { request_id, asset_id, .. } => {
                assert_eq!(request_id, 1);
                assert_eq!(asset_id, "100");
            }
            _ => panic!("expected InspectResult"),
        }
    }

    #[tokio::test]
    async fn no_ready_bots_surfaces_inspect_error() {
        let config = test_config();
        let (up_tx, mut up_rx) = mpsc::channel(32);
        // An account whose login never succeeds (hangs forever is not
        // modeled here — use account-disabled so it's dropped from the
        // partition, leaving zero bots to select from).
        let handle = Worker::spawn(
            0,
            vec![account("bob")],
            |_| Arc::new(MockTransport::new().with_login_result(Err(crate::bots::transport::TransportError::AccountDisabled))),
            &config,
            up_tx,
        );
        tokio::time::sleep(Duration::from_millis(20)).await;

        handle
            .cmd_tx
            .send(WorkerCommand::InspectItem {
                request_id: 7,
                s: "76561198000000001".to_string(),
                a: "200".to_string(),
                d: "d".to_string(),
                m: None,
            })
            .await
            .unwrap();

        let result = timeout(Duration::from_secs(1), up_rx.recv()).await.unwrap().unwrap();
        assert!(matches!(result, AggregatorMessage::InspectError { request_id: 7, .. }));
    }

    #[tokio::test]
    async fn shutdown_destroys_bots_and_acks() {
        let config = test_config();
        let (up_tx, _up_rx) = mpsc::channel(32);
        let handle = Worker::spawn(0, vec![account("carol")], |_| Arc::new(MockTransport::new()), &config, up_tx);
        tokio::time::sleep(Duration::from_millis(20)).await;

        let (ack_tx, ack_rx) = oneshot::channel();
        handle.cmd_tx.send(WorkerCommand::Shutdown { ack: ack_tx }).await.unwrap();
        timeout(Duration::from_secs(1), ack_rx).await.unwrap().unwrap();
    }
}
