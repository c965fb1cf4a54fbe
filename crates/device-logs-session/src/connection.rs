//! Ownership of the live remote session.

use std::{
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use device_logs_core::{
    ConnectParams, ConnectionState, RemoteSession, TailConfig, Transport, TransportError,
};
use thiserror::Error;
use tokio::sync::{Mutex, watch};

/// Connection error.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("Failed to connect after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: TransportError },
    #[error("Connection manager stopped")]
    Stopped,
}

/// Retry budget for one attempt sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    /// Delay after failed attempt `attempt` (0-based): `base * 2^attempt`.
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor)
    }
}

impl From<&TailConfig> for RetryPolicy {
    fn from(config: &TailConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_backoff: config.base_backoff,
        }
    }
}

/// Shared reference to the live session.
///
/// `generation` increases with every successful establish, letting callers
/// tell whether the session they saw fail has already been replaced.
pub struct SessionHandle<S> {
    session: Arc<S>,
    generation: u64,
}

impl<S> Clone for SessionHandle<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            generation: self.generation,
        }
    }
}

impl<S> SessionHandle<S> {
    #[must_use]
    pub fn session(&self) -> &S {
        &self.session
    }

    #[must_use]
    pub fn shared(&self) -> Arc<S> {
        Arc::clone(&self.session)
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// Owns the live session and the attempt sequences that (re)create it.
///
/// At most one attempt sequence runs at a time; concurrent callers queue on
/// `attempt_lock`. The previous session is closed before a new one is
/// opened, so only one live handle exists at any moment.
pub struct ConnectionManager<T: Transport> {
    transport: T,
    params: ConnectParams,
    policy: RetryPolicy,
    attempt_lock: Mutex<()>,
    live: RwLock<Option<SessionHandle<T::Session>>>,
    generation: AtomicU64,
    state: watch::Sender<ConnectionState>,
}

impl<T: Transport> ConnectionManager<T> {
    #[must_use]
    pub fn new(transport: T, params: ConnectParams, policy: RetryPolicy) -> Self {
        Self {
            transport,
            params,
            policy,
            attempt_lock: Mutex::new(()),
            live: RwLock::new(None),
            generation: AtomicU64::new(0),
            state: watch::channel(ConnectionState::Disconnected).0,
        }
    }

    #[must_use]
    pub const fn params(&self) -> &ConnectParams {
        &self.params
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The live session, if any.
    #[must_use]
    pub fn current(&self) -> Option<SessionHandle<T::Session>> {
        self.live
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace whatever session exists with a fresh one.
    ///
    /// # Errors
    /// Returns `RetriesExhausted` after `max_retries` consecutive failures,
    /// or `Stopped` if the manager was shut down meanwhile.
    pub async fn establish(&self) -> Result<SessionHandle<T::Session>, ConnectError> {
        let _guard = self.attempt_lock.lock().await;
        self.establish_locked().await
    }

    /// Replace the session with generation `stale`, unless someone else
    /// already did. With `stale == None`, only connect if nothing is live.
    ///
    /// # Errors
    /// Same as [`Self::establish`].
    pub async fn reestablish(
        &self,
        stale: Option<u64>,
    ) -> Result<SessionHandle<T::Session>, ConnectError> {
        let _guard = self.attempt_lock.lock().await;
        if let Some(current) = self.current() {
            if stale != Some(current.generation) {
                tracing::debug!(
                    generation = current.generation,
                    "Session already replaced, reusing it"
                );
                return Ok(current);
            }
        }
        self.establish_locked().await
    }

    async fn establish_locked(&self) -> Result<SessionHandle<T::Session>, ConnectError> {
        if self.state().is_terminal() {
            return Err(ConnectError::Stopped);
        }

        let previous = self.take_live();
        let reconnecting = previous.is_some();
        if let Some(previous) = previous {
            close_quietly(previous.session()).await;
        }
        self.set_state(if reconnecting {
            ConnectionState::Reconnecting
        } else {
            ConnectionState::Connecting
        });

        let mut state_rx = self.state.subscribe();
        let max_retries = self.policy.max_retries.max(1);
        let mut attempt = 0;
        loop {
            tracing::info!(
                host = %self.params.host,
                port = self.params.port,
                attempt = attempt + 1,
                max_retries,
                "Attempting connection"
            );

            let error = tokio::select! {
                result = self.connect_once() => match result {
                    Ok(session) => return self.install_unless_stopped(session).await,
                    Err(e) => e,
                },
                () = stopped(&mut state_rx) => return Err(ConnectError::Stopped),
            };

            attempt += 1;
            if attempt >= max_retries {
                tracing::error!(
                    host = %self.params.host,
                    attempts = attempt,
                    error = %error,
                    "Giving up on connection"
                );
                self.set_state(ConnectionState::Disconnected);
                return Err(ConnectError::RetriesExhausted {
                    attempts: attempt,
                    last: error,
                });
            }

            let delay = self.policy.backoff(attempt - 1);
            tracing::warn!(
                host = %self.params.host,
                error = %error,
                retry_in = ?delay,
                "Connection failed"
            );
            if !self.sleep_unless_stopped(delay).await {
                return Err(ConnectError::Stopped);
            }
        }
    }

    async fn connect_once(&self) -> Result<T::Session, TransportError> {
        match tokio::time::timeout(
            self.params.connect_timeout,
            self.transport.connect(&self.params),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::ConnectTimeout),
        }
    }

    /// A session that finishes connecting after `shutdown()` is closed
    /// instead of installed.
    async fn install_unless_stopped(
        &self,
        session: T::Session,
    ) -> Result<SessionHandle<T::Session>, ConnectError> {
        if self.state().is_terminal() {
            close_quietly(&session).await;
            return Err(ConnectError::Stopped);
        }
        Ok(self.install(session))
    }

    fn install(&self, session: T::Session) -> SessionHandle<T::Session> {
        let handle = SessionHandle {
            session: Arc::new(session),
            generation: self.generation.fetch_add(1, Ordering::SeqCst) + 1,
        };
        *self.live.write().unwrap_or_else(PoisonError::into_inner) = Some(handle.clone());
        self.set_state(ConnectionState::Connected);
        tracing::info!(
            host = %self.params.host,
            generation = handle.generation,
            "Connected"
        );
        handle
    }

    fn take_live(&self) -> Option<SessionHandle<T::Session>> {
        self.live
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Close the live session without waiting for a running attempt
    /// sequence. Commands streaming over it end.
    pub async fn release(&self) {
        if let Some(handle) = self.take_live() {
            close_quietly(handle.session()).await;
        }
    }

    /// Close the live session. Errors are logged, never returned.
    pub async fn close(&self) {
        let _guard = self.attempt_lock.lock().await;
        if let Some(handle) = self.take_live() {
            close_quietly(handle.session()).await;
        }
        self.set_state(ConnectionState::Disconnected);
    }

    /// Enter the terminal state. Pending backoff sleeps return early and no
    /// further attempts are made.
    pub fn shutdown(&self) {
        self.state.send_replace(ConnectionState::Stopped);
    }

    /// Mark whether a follow command is streaming over session `generation`.
    pub(crate) fn mark_tailing(&self, generation: u64, tailing: bool) {
        let is_current = self
            .current()
            .is_some_and(|handle| handle.generation == generation);
        if is_current {
            self.set_state(if tailing {
                ConnectionState::Tailing
            } else {
                ConnectionState::Connected
            });
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|state| {
            if state.is_terminal() || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    async fn sleep_unless_stopped(&self, delay: Duration) -> bool {
        let mut rx = self.state.subscribe();
        tokio::select! {
            () = tokio::time::sleep(delay) => true,
            () = stopped(&mut rx) => false,
        }
    }
}

async fn stopped(rx: &mut watch::Receiver<ConnectionState>) {
    let _ = rx.wait_for(|state| state.is_terminal()).await;
}

async fn close_quietly<S: RemoteSession>(session: &S) {
    if let Err(e) = session.close().await {
        tracing::debug!(error = %e, "Error closing session");
    }
}
