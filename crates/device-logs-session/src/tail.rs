//! Streaming a follow command into the record pipeline.

use std::{sync::Arc, time::Duration};

use device_logs_core::{OutputStream, RemoteSession, SinkError, Transport, TransportError};
use device_logs_parse::LineReassembler;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    connection::{ConnectError, ConnectionManager, SessionHandle},
    pipeline::RecordPipeline,
    signals::{Signals, tailing_stopped},
};

/// Tail loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TailState {
    #[default]
    Idle,
    Connecting,
    Running,
    Reconnecting,
    Stopped,
}

/// Tail error.
#[derive(Debug, Error)]
pub enum TailError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("Follow command ended")]
    StreamEnded,
}

/// Follows one command over the managed session and feeds every complete
/// line through the pipeline.
///
/// Runs while the tailing flag is set. Stream or sink failures trigger a
/// paused reconnect and a restart of the follow command; an exhausted
/// reconnect ends the loop.
pub struct TailSession<T: Transport> {
    manager: Arc<ConnectionManager<T>>,
    pipeline: Arc<RecordPipeline>,
    command: String,
    signals: Signals,
    retry_pause: Duration,
    state: Arc<watch::Sender<TailState>>,
}

impl<T: Transport> TailSession<T> {
    #[must_use]
    pub fn new(
        manager: Arc<ConnectionManager<T>>,
        pipeline: Arc<RecordPipeline>,
        command: String,
        signals: Signals,
        retry_pause: Duration,
        state: Arc<watch::Sender<TailState>>,
    ) -> Self {
        Self {
            manager,
            pipeline,
            command,
            signals,
            retry_pause,
            state,
        }
    }

    /// Run until the tailing flag clears or reconnecting gives up.
    ///
    /// # Errors
    /// Returns the connection error that ended the loop.
    pub async fn run(self) -> Result<(), TailError> {
        let result = match self.run_inner().await {
            Err(TailError::Connect(ConnectError::Stopped)) => Ok(()),
            other => other,
        };
        if let Err(e) = &result {
            tracing::error!(error = %e, command = %self.command, "Tail loop exiting");
        }
        self.set_state(TailState::Idle);
        result
    }

    async fn run_inner(&self) -> Result<(), TailError> {
        if !self.signals.tailing() {
            return Ok(());
        }
        self.set_state(TailState::Connecting);
        let mut handle = match self.manager.current() {
            Some(handle) => handle,
            None => self.manager.reestablish(None).await?,
        };

        while self.signals.tailing() {
            self.set_state(TailState::Running);
            match self.stream(&handle).await {
                Ok(()) => break,
                Err(e) => tracing::warn!(
                    error = %e,
                    generation = handle.generation(),
                    "Tail stream interrupted"
                ),
            }

            if !self.signals.tailing() {
                break;
            }
            self.set_state(TailState::Reconnecting);
            if !self.pause().await {
                break;
            }
            handle = self.manager.reestablish(Some(handle.generation())).await?;
        }
        Ok(())
    }

    /// Stream one follow command. `Ok` means tailing was switched off.
    async fn stream(&self, handle: &SessionHandle<T::Session>) -> Result<(), TailError> {
        let mut output = handle.session().run(&self.command, true).await?;
        tracing::info!(
            command = %self.command,
            generation = handle.generation(),
            "Tailing started"
        );

        self.manager.mark_tailing(handle.generation(), true);
        let result = self.pump(&mut output).await;
        self.manager.mark_tailing(handle.generation(), false);
        result
    }

    async fn pump(&self, output: &mut OutputStream) -> Result<(), TailError> {
        let mut flags = self.signals.subscribe();
        let mut reassembler = LineReassembler::new();
        loop {
            let chunk = tokio::select! {
                biased;
                () = tailing_stopped(&mut flags) => return Ok(()),
                chunk = output.next() => chunk,
            };
            let Some(chunk) = chunk else {
                return Err(TailError::StreamEnded);
            };
            for line in reassembler.feed(&chunk?) {
                self.pipeline.handle_line(&line).await?;
            }
        }
    }

    /// Wait out the retry pause. False if tailing was switched off meanwhile.
    async fn pause(&self) -> bool {
        let mut flags = self.signals.subscribe();
        tokio::select! {
            () = tokio::time::sleep(self.retry_pause) => self.signals.tailing(),
            () = tailing_stopped(&mut flags) => false,
        }
    }

    fn set_state(&self, next: TailState) {
        self.state.send_if_modified(|state| {
            if *state == TailState::Stopped || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }
}
