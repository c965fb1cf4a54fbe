//! Periodic liveness probing of the managed session.

use std::{sync::Arc, time::Duration};

use device_logs_core::{RemoteSession, Transport, TransportError};
use thiserror::Error;
use tokio::{
    sync::mpsc,
    time::{Instant, MissedTickBehavior},
};

use crate::{
    command::PROBE_COMMAND,
    connection::{ConnectError, ConnectionManager, SessionHandle},
    signals::{Signals, heartbeat_stopped},
    tailer::SupervisorEvent,
};

/// Probe error.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Probe timed out after {0:?}")]
    TimedOut(Duration),
    #[error("Probe failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Probe task failed: {0}")]
    Join(String),
}

/// Result of one heartbeat cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Healthy,
    /// A (possibly different) live session was obtained.
    Reconnected,
    ReconnectFailed,
    Stopped,
}

/// Probes the live session every `interval` and drives recovery when a
/// probe fails or no session exists.
///
/// On a failed probe the tailing flag is cleared first, so the tail loop
/// releases the dead session instead of racing the reconnect.
pub struct HeartbeatMonitor<T: Transport> {
    manager: Arc<ConnectionManager<T>>,
    signals: Signals,
    events: mpsc::Sender<SupervisorEvent>,
    interval: Duration,
    probe_timeout: Duration,
    retry_pause: Duration,
}

impl<T: Transport> HeartbeatMonitor<T> {
    #[must_use]
    pub fn new(
        manager: Arc<ConnectionManager<T>>,
        signals: Signals,
        events: mpsc::Sender<SupervisorEvent>,
        interval: Duration,
        probe_timeout: Duration,
        retry_pause: Duration,
    ) -> Self {
        Self {
            manager,
            signals,
            events,
            interval,
            probe_timeout,
            retry_pause,
        }
    }

    /// Run until the heartbeat flag clears or the manager stops.
    pub async fn run(self) {
        let mut flags = self.signals.subscribe();
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        while self.signals.heartbeat_active() {
            tokio::select! {
                biased;
                () = heartbeat_stopped(&mut flags) => break,
                _ = ticker.tick() => {}
            }
            let outcome = tokio::select! {
                biased;
                () = heartbeat_stopped(&mut flags) => break,
                outcome = self.cycle() => outcome,
            };
            if outcome == CycleOutcome::Stopped {
                break;
            }
        }
        tracing::debug!("Heartbeat stopped");
    }

    /// One probe and, if needed, one recovery.
    pub async fn cycle(&self) -> CycleOutcome {
        let Some(handle) = self.manager.current() else {
            tracing::info!("No live session, reconnecting");
            return self.reconnect(None).await;
        };

        match self.probe(&handle).await {
            Ok(()) => {
                tracing::debug!(generation = handle.generation(), "Heartbeat ok");
                CycleOutcome::Healthy
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    generation = handle.generation(),
                    "Heartbeat failed, reconnecting"
                );
                self.signals.set_tailing(false);
                if !self.pause().await {
                    return CycleOutcome::Stopped;
                }
                self.reconnect(Some(handle.generation())).await
            }
        }
    }

    async fn reconnect(&self, stale: Option<u64>) -> CycleOutcome {
        match self.manager.reestablish(stale).await {
            Ok(handle) => {
                let event = SupervisorEvent::Reconnected {
                    generation: handle.generation(),
                };
                if self.events.send(event).await.is_err() {
                    return CycleOutcome::Stopped;
                }
                CycleOutcome::Reconnected
            }
            Err(ConnectError::Stopped) => CycleOutcome::Stopped,
            Err(e) => {
                tracing::error!(error = %e, "Heartbeat reconnect failed");
                CycleOutcome::ReconnectFailed
            }
        }
    }

    /// Run the probe command with a bound.
    ///
    /// On timeout the probe is aborted when the transport can interrupt an
    /// in-flight command, and detached otherwise.
    async fn probe(&self, handle: &SessionHandle<T::Session>) -> Result<(), ProbeError> {
        let session = handle.shared();
        let interruptible = session.interruptible();
        let mut task =
            tokio::spawn(async move { session.exec(PROBE_COMMAND, false).await.map(drop) });

        tokio::select! {
            joined = &mut task => match joined {
                Ok(result) => result.map_err(ProbeError::from),
                Err(e) => Err(ProbeError::Join(e.to_string())),
            },
            () = tokio::time::sleep(self.probe_timeout) => {
                if interruptible {
                    task.abort();
                } else {
                    tracing::warn!("Probe cannot be interrupted, detaching it");
                }
                Err(ProbeError::TimedOut(self.probe_timeout))
            }
        }
    }

    async fn pause(&self) -> bool {
        let mut flags = self.signals.subscribe();
        tokio::select! {
            () = tokio::time::sleep(self.retry_pause) => self.signals.heartbeat_active(),
            () = heartbeat_stopped(&mut flags) => false,
        }
    }
}
