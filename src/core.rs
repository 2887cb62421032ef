//! Process lifecycle
//!
//! Provides a single shutdown signal shared by every long-running task in
//! the gateway — the HTTP listener, the Worker Manager's sweeper, and each
//! Bot's `destroy()` path. The teacher's `core.rs` drove this off raw libc
//! signal numbers because it had a C callback boundary to match; there's no
//! C here, so shutdown is plumbed with `tokio::signal` and a broadcast
//! channel instead.

use tokio::sync::broadcast;

/// Handle shared by every task that needs to observe shutdown.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: broadcast::Sender<()>,
}

impl ShutdownHandle {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal. Each subscriber gets its own
    /// receiver; firing `shutdown()` wakes all of them.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Request shutdown. Idempotent: firing twice is harmless.
    pub fn shutdown(&self) {
        // An error here just means every receiver has already been dropped.
        let _ = self.tx.send(());
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        let _ = rx.recv().await;
    }
}

impl Default for ShutdownHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Waits for SIGINT or SIGTERM and triggers `handle.shutdown()`.
///
/// Spawned once from `main()`; every other task should instead
/// `handle.subscribe()` or `handle.wait()`.
pub async fn listen_for_signals(handle: ShutdownHandle) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        let mut int = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        tokio::select! {
            _ = term.recv() => tracing::info!("[core] [signal] SIGTERM received"),
            _ = int.recv() => tracing::info!("[core] [signal] SIGINT received"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("[core] [signal] ctrl-c received");
    }

    handle.shutdown();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn shutdown_wakes_all_subscribers() {
        let handle = ShutdownHandle::new();
        let mut a = handle.subscribe();
        let mut b = handle.subscribe();

        handle.shutdown();

        a.recv().await.unwrap();
        b.recv().await.unwrap();
    }

    #[tokio::test]
    async fn wait_resolves_after_shutdown() {
        let handle = ShutdownHandle::new();
        let waiter = handle.clone();

        let task = tokio::spawn(async move {
            waiter.wait().await;
            true
        });

        handle.shutdown();
        assert!(task.await.unwrap());
    }

    #[tokio::test]
    async fn shutdown_before_subscribe_is_not_observed() {
        // Broadcast channels don't replay past sends — a subscriber that
        // joins after shutdown() has already fired will hang. Callers must
        // subscribe before the signal can plausibly arrive, which every
        // task here does during its own setup.
        let handle = ShutdownHandle::new();
        handle.shutdown();

        let mut rx = handle.subscribe();
        let result = tokio::time::timeout(std::time::Duration::from_millis(50), rx.recv()).await;
        assert!(result.is_err(), "late subscriber should not see a stale signal");
    }
}
