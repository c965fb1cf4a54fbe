//! Scripted transport for exercising the session machinery without a device.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use device_logs_core::{ConnectParams, OutputStream, RemoteSession, Transport, TransportError};
use futures::StreamExt;
use tokio::sync::watch;

use crate::command::PROBE_COMMAND;

/// How a session answers the liveness probe.
#[derive(Debug, Clone, Copy, Default)]
pub enum Probe {
    #[default]
    Answer,
    /// Never answers.
    Stall,
    /// Fails immediately.
    Fail,
}

/// What a follow stream does after its scripted chunks.
#[derive(Debug, Clone, Copy, Default)]
pub enum FollowEnd {
    /// Stay open until the session is closed, then error out.
    #[default]
    Hold,
    /// End cleanly.
    Eof,
    /// Yield a transport error.
    Fail,
}

/// Behavior of the session returned by one successful connect.
#[derive(Debug, Clone)]
pub struct SessionScript {
    pub probe: Probe,
    pub chunks: Vec<&'static [u8]>,
    pub end: FollowEnd,
    /// Whether commands started on the session can be aborted.
    pub interruptible: bool,
}

impl Default for SessionScript {
    fn default() -> Self {
        Self::follow(&[], FollowEnd::Hold)
    }
}

impl SessionScript {
    pub fn follow(chunks: &[&'static [u8]], end: FollowEnd) -> Self {
        Self {
            probe: Probe::Answer,
            chunks: chunks.to_vec(),
            end,
            interruptible: true,
        }
    }

    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_interruptible(mut self, interruptible: bool) -> Self {
        self.interruptible = interruptible;
        self
    }
}

/// Counts a stalled command for as long as its stream is alive.
struct InFlight(Arc<Inner>);

impl InFlight {
    fn new(inner: &Arc<Inner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(inner))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct Inner {
    scripts: Mutex<VecDeque<SessionScript>>,
    connects: AtomicUsize,
    sessions: AtomicUsize,
    closes: AtomicUsize,
    in_flight: AtomicUsize,
    fail_first: usize,
    hang_first: usize,
    refuse_after: Option<usize>,
    runs: Mutex<Vec<(usize, String)>>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Inner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse the first `n` connects.
    pub fn failing_first(n: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                fail_first: n,
                ..Inner::default()
            }),
        }
    }

    /// Never answer the first `n` connects.
    pub fn hanging_first(n: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                hang_first: n,
                ..Inner::default()
            }),
        }
    }

    /// Accept the first `n` connects, refuse the rest.
    pub fn refusing_after(n: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                refuse_after: Some(n),
                ..Inner::default()
            }),
        }
    }

    /// Sessions consume scripts in connect order; once exhausted they
    /// answer probes and hold an empty follow stream.
    pub fn with_scripts(self, scripts: impl IntoIterator<Item = SessionScript>) -> Self {
        self.inner.scripts.lock().unwrap().extend(scripts);
        self
    }

    pub fn connect_count(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.inner.closes.load(Ordering::SeqCst)
    }

    /// Stalled heartbeat commands whose output has not been dropped yet.
    pub fn stalled_in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Every command started, as `(session index, command)`.
    pub fn runs(&self) -> Vec<(usize, String)> {
        self.inner.runs.lock().unwrap().clone()
    }

    /// Follow commands only, skipping probes.
    pub fn follow_runs(&self) -> Vec<(usize, String)> {
        self.runs()
            .into_iter()
            .filter(|(_, command)| command != PROBE_COMMAND)
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Session = MockSession;

    async fn connect(&self, params: &ConnectParams) -> Result<MockSession, TransportError> {
        let n = self.inner.connects.fetch_add(1, Ordering::SeqCst);
        if n < self.inner.hang_first {
            std::future::pending::<()>().await;
        }
        let refused = self.inner.refuse_after.is_some_and(|limit| n >= limit);
        if n < self.inner.fail_first || refused {
            return Err(TransportError::HostUnreachable(params.host.clone()));
        }

        let index = self.inner.sessions.fetch_add(1, Ordering::SeqCst);
        let script = self
            .inner
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        Ok(MockSession {
            index,
            script,
            closed: watch::channel(false).0,
            closed_once: AtomicBool::new(false),
            inner: Arc::clone(&self.inner),
        })
    }
}

pub struct MockSession {
    index: usize,
    script: SessionScript,
    closed: watch::Sender<bool>,
    closed_once: AtomicBool,
    inner: Arc<Inner>,
}

impl MockSession {
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    fn until_closed(&self) -> OutputStream {
        let mut rx = self.closed.subscribe();
        futures::stream::once(async move {
            let _ = rx.wait_for(|closed| *closed).await;
            Err(TransportError::Closed)
        })
        .boxed()
    }

    fn stalled(&self) -> OutputStream {
        let guard = InFlight::new(&self.inner);
        let mut rx = self.closed.subscribe();
        futures::stream::once(async move {
            let _guard = guard;
            let _ = rx.wait_for(|closed| *closed).await;
            Err(TransportError::Closed)
        })
        .boxed()
    }
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn run(&self, command: &str, _pty: bool) -> Result<OutputStream, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.inner
            .runs
            .lock()
            .unwrap()
            .push((self.index, command.to_string()));

        if command == PROBE_COMMAND {
            return match self.script.probe {
                Probe::Answer => {
                    Ok(futures::stream::iter([Ok(Bytes::from_static(b"heartbeat\n"))]).boxed())
                }
                Probe::Stall => Ok(self.stalled()),
                Probe::Fail => Err(TransportError::CommandFailed {
                    status: "exit status: 1".into(),
                    output: String::new(),
                }),
            };
        }

        let chunks = futures::stream::iter(
            self.script
                .chunks
                .clone()
                .into_iter()
                .map(|chunk| Ok(Bytes::from_static(chunk))),
        );
        let stream = match self.script.end {
            FollowEnd::Hold => chunks.chain(self.until_closed()).boxed(),
            FollowEnd::Eof => chunks.boxed(),
            FollowEnd::Fail => chunks
                .chain(futures::stream::iter([Err(TransportError::Closed)]))
                .boxed(),
        };
        Ok(stream)
    }

    fn interruptible(&self) -> bool {
        self.script.interruptible
    }

    async fn close(&self) -> Result<(), TransportError> {
        if !self.closed_once.swap(true, Ordering::SeqCst) {
            self.inner.closes.fetch_add(1, Ordering::SeqCst);
        }
        self.closed.send_replace(true);
        Ok(())
    }
}
