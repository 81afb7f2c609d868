use super::TransactionRegistry;
use crate::config::TimeoutPolicy;
use crate::core::{KernelError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Level, event};

/// How often the reaper sweeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Fixed interval, never longer than the current timeout.
    Every(Duration),
    /// Half the current timeout.
    HalfTimeout,
}

impl Cadence {
    /// Interval for the next sleep, from the timeout as configured right now.
    pub fn interval(&self, policy: &TimeoutPolicy) -> Duration {
        let interval = match self {
            Cadence::Every(interval) => (*interval).min(policy.timeout()),
            Cadence::HalfTimeout => policy.timeout() / 2,
        };
        interval.max(Duration::from_millis(1))
    }
}

/// Background task that periodically calls
/// [`TransactionRegistry::reap_expired`].
///
/// The interval is recomputed before every sleep, so a timeout lowered
/// through the registry's policy speeds sweeps up from the next one.
pub struct Reaper {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
    cadence: Cadence,
    policy: TimeoutPolicy,
}

impl Reaper {
    /// Spawn the sweep loop on the current tokio runtime.
    pub fn spawn(registry: Arc<TransactionRegistry>, cadence: Cadence) -> Result<Self> {
        if cadence == Cadence::Every(Duration::ZERO) {
            return Err(KernelError::ConfigError(
                "reaper interval must be greater than 0".to_string(),
            ));
        }

        let policy = registry.policy().clone();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let loop_policy = policy.clone();
        let join_handle = tokio::spawn(async move {
            loop {
                let interval = cadence.interval(&loop_policy);
                tokio::select! {
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = sleep(interval) => {
                        registry.reap_expired().await;
                    }
                }
            }
            event!(Level::DEBUG, "reaper stopped");
        });

        event!(Level::DEBUG, cadence = ?cadence, "reaper started");
        Ok(Self {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
            cadence,
            policy,
        })
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Interval of the next sleep.
    pub fn interval(&self) -> Duration {
        self.cadence.interval(&self.policy)
    }

    /// Signals the reaper to stop and waits for the current sweep to finish.
    pub async fn stop(mut self) -> Result<()> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| KernelError::StoreUnavailable(format!("reaper join: {}", err)))?;
        }
        Ok(())
    }
}

impl Drop for Reaper {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
