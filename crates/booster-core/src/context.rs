//! Runtime context handed to every long-running component.
//!
//! Carries the loaded configuration, the shared chart store and the
//! shutdown signal. Components receive a clone at construction and never
//! reach for process-wide state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::chart::ChartStore;
use crate::config::Config;

// ---------------------------------------------------------------------------
// Shutdown
// ---------------------------------------------------------------------------

/// Owner side of the shutdown channel.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

/// Observer side of the shutdown channel. A dropped trigger counts as
/// shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

pub fn shutdown_channel() -> (ShutdownTrigger, ShutdownSignal) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx: Arc::new(tx) }, ShutdownSignal { rx })
}

impl ShutdownTrigger {
    pub fn fire(&self) {
        if !self.tx.send_replace(true) {
            tracing::info!("shutdown requested");
        }
    }

    pub fn is_fired(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl ShutdownSignal {
    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown fires.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|fired| *fired).await;
    }

    /// Sleep for `duration` unless shutdown fires first. Returns `true` when
    /// the caller should stop.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_shutdown(),
            _ = self.wait() => true,
        }
    }
}

// ---------------------------------------------------------------------------
// RuntimeContext
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RuntimeContext {
    pub config: Arc<Config>,
    pub store: Arc<ChartStore>,
    pub shutdown: ShutdownSignal,
}

impl RuntimeContext {
    pub fn new(config: Arc<Config>, store: Arc<ChartStore>, shutdown: ShutdownSignal) -> Self {
        Self {
            config,
            store,
            shutdown,
        }
    }
}
