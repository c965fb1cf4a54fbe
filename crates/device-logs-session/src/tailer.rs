//! Tailer for orchestrating connection, tail loop and heartbeat.

use std::sync::Arc;

use device_logs_core::{
    ConfigError, ConnectParams, ConnectionState, LogSink, TailConfig, Transport,
};
use device_logs_parse::LogParser;
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
};

use crate::{
    command::{CommandBuildError, follow_command},
    connection::{ConnectionManager, RetryPolicy},
    heartbeat::HeartbeatMonitor,
    pipeline::RecordPipeline,
    signals::Signals,
    tail::{TailSession, TailState},
};

/// Tailer error.
#[derive(Debug, thiserror::Error)]
pub enum TailerError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Failed to build follow command: {0}")]
    Command(#[from] CommandBuildError),
    #[error("Tailer already running")]
    AlreadyRunning,
    #[error("Tailer stopped")]
    Stopped,
}

/// Messages to the supervisor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorEvent {
    /// The heartbeat obtained a live session with this generation.
    Reconnected { generation: u64 },
    Shutdown,
}

/// Supervisor task state.
struct Running {
    events: mpsc::Sender<SupervisorEvent>,
    supervisor: JoinHandle<()>,
}

/// Streams a device's logs into a sink and keeps doing so across link
/// failures until stopped.
pub struct Tailer<T: Transport> {
    config: TailConfig,
    manager: Arc<ConnectionManager<T>>,
    pipeline: Arc<RecordPipeline>,
    signals: Signals,
    tail_state: Arc<watch::Sender<TailState>>,
    running: Mutex<Option<Running>>,
}

impl<T: Transport> Tailer<T> {
    /// Create a tailer with the built-in line formats.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid.
    pub fn new(
        transport: T,
        params: ConnectParams,
        config: TailConfig,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self, TailerError> {
        Self::with_parser(transport, params, config, sink, LogParser::new())
    }

    /// Create a tailer with a custom parser.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid.
    pub fn with_parser(
        transport: T,
        params: ConnectParams,
        config: TailConfig,
        sink: Arc<dyn LogSink>,
        parser: LogParser,
    ) -> Result<Self, TailerError> {
        config.validate()?;
        let policy = RetryPolicy::from(&config);
        Ok(Self {
            manager: Arc::new(ConnectionManager::new(transport, params, policy)),
            pipeline: Arc::new(RecordPipeline::new(Arc::new(parser), sink)),
            config,
            signals: Signals::new(),
            tail_state: Arc::new(watch::channel(TailState::Idle).0),
            running: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.manager.state()
    }

    #[must_use]
    pub fn subscribe_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.manager.subscribe_state()
    }

    #[must_use]
    pub fn tail_state(&self) -> TailState {
        *self.tail_state.borrow()
    }

    #[must_use]
    pub fn subscribe_tail_state(&self) -> watch::Receiver<TailState> {
        self.tail_state.subscribe()
    }

    #[must_use]
    pub const fn manager(&self) -> &Arc<ConnectionManager<T>> {
        &self.manager
    }

    /// Start tailing and heartbeat in the background.
    ///
    /// Without a configured target this logs and returns without connecting.
    ///
    /// # Errors
    /// Returns error if already running, stopped, or the follow command
    /// cannot be built.
    pub async fn start(&self) -> Result<(), TailerError> {
        let Some(target) = &self.config.target else {
            tracing::warn!("No tail target configured, tailing disabled");
            return Ok(());
        };

        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(TailerError::AlreadyRunning);
        }
        if self.tail_state() == TailState::Stopped {
            return Err(TailerError::Stopped);
        }

        let command = follow_command(target)?;
        tracing::info!(
            host = %self.manager.params().host,
            target = %target,
            "Starting tailer"
        );

        self.signals.set_tailing(true);
        self.signals.set_heartbeat(true);

        let (tx, rx) = mpsc::channel(16);
        let supervisor = Supervisor {
            manager: Arc::clone(&self.manager),
            pipeline: Arc::clone(&self.pipeline),
            signals: self.signals.clone(),
            tail_state: Arc::clone(&self.tail_state),
            command,
            config: self.config.clone(),
        };
        let heartbeat = HeartbeatMonitor::new(
            Arc::clone(&self.manager),
            self.signals.clone(),
            tx.clone(),
            self.config.heartbeat_interval,
            self.config.probe_timeout,
            self.config.base_backoff,
        );

        *running = Some(Running {
            events: tx,
            supervisor: tokio::spawn(supervisor.run(heartbeat, rx)),
        });
        Ok(())
    }

    /// Stop tailing, stop the heartbeat and close the session.
    ///
    /// Idempotent. Pending backoff sleeps end early; close errors are
    /// swallowed.
    pub async fn stop(&self) {
        self.signals.clear();
        self.manager.shutdown();
        self.manager.release().await;

        if let Some(running) = self.running.lock().await.take() {
            let _ = running.events.send(SupervisorEvent::Shutdown).await;
            if let Err(e) = running.supervisor.await {
                tracing::warn!(error = %e, "Supervisor task failed");
            }
        }

        self.manager.close().await;
        self.tail_state.send_replace(TailState::Stopped);
        tracing::info!("Tailer stopped");
    }
}

/// Owns the tail and heartbeat tasks; restarts the tail after the
/// heartbeat recovers the link.
struct Supervisor<T: Transport> {
    manager: Arc<ConnectionManager<T>>,
    pipeline: Arc<RecordPipeline>,
    signals: Signals,
    tail_state: Arc<watch::Sender<TailState>>,
    command: String,
    config: TailConfig,
}

impl<T: Transport> Supervisor<T> {
    async fn run(
        self,
        heartbeat: HeartbeatMonitor<T>,
        mut events: mpsc::Receiver<SupervisorEvent>,
    ) {
        let heartbeat = tokio::spawn(heartbeat.run());
        let mut tail = self.spawn_tail();

        while let Some(event) = events.recv().await {
            match event {
                SupervisorEvent::Reconnected { generation } => {
                    tail = self.restart_if_idle(tail, generation).await;
                }
                SupervisorEvent::Shutdown => break,
            }
        }

        self.signals.clear();
        for (name, task) in [("tail", tail), ("heartbeat", heartbeat)] {
            if let Err(e) = task.await {
                tracing::warn!(task = name, error = %e, "Task failed");
            }
        }
    }

    fn spawn_tail(&self) -> JoinHandle<()> {
        let session = TailSession::new(
            Arc::clone(&self.manager),
            Arc::clone(&self.pipeline),
            self.command.clone(),
            self.signals.clone(),
            self.config.base_backoff,
            Arc::clone(&self.tail_state),
        );
        tokio::spawn(async move {
            // Errors are logged by the tail loop itself.
            let _ = session.run().await;
        })
    }

    async fn restart_if_idle(&self, tail: JoinHandle<()>, generation: u64) -> JoinHandle<()> {
        if !tail.is_finished() && self.signals.tailing() {
            return tail;
        }
        if let Err(e) = tail.await {
            tracing::warn!(error = %e, "Tail task failed");
        }
        if !self.signals.heartbeat_active() {
            return tokio::spawn(async {});
        }

        tracing::info!(generation, "Restarting tail after reconnect");
        self.signals.set_tailing(true);
        self.spawn_tail()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use device_logs_core::TailTarget;

    use super::*;
    use crate::{
        mock::{FollowEnd, MockTransport, Probe, SessionScript},
        storage::MemorySink,
    };

    fn config(max_retries: u32) -> TailConfig {
        TailConfig {
            max_retries,
            ..TailConfig::new(Some(TailTarget::File("/var/log/robot.log".into())))
        }
    }

    fn tailer(
        transport: MockTransport,
        config: TailConfig,
    ) -> (Tailer<MockTransport>, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let tailer = Tailer::new(
            transport,
            ConnectParams::new("robot.local", "root"),
            config,
            sink.clone(),
        )
        .unwrap();
        (tailer, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_streams_into_sink() {
        let transport = MockTransport::new().with_scripts([SessionScript::follow(
            &[b"2024-04-09 13:38:32.723 INFO booted\n"],
            FollowEnd::Hold,
        )]);
        let (tailer, sink) = tailer(transport.clone(), config(5));

        tailer.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(sink.messages().unwrap(), ["booted"]);
        assert_eq!(tailer.tail_state(), TailState::Running);
        assert_eq!(tailer.connection_state(), ConnectionState::Tailing);

        tailer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_target_never_connects() {
        let transport = MockTransport::new();
        let (tailer, _sink) = tailer(transport.clone(), TailConfig::default());

        tailer.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(transport.connect_count(), 0);
        assert_eq!(tailer.tail_state(), TailState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_closes_session_and_is_idempotent() {
        let transport = MockTransport::new();
        let (tailer, _sink) = tailer(transport.clone(), config(5));

        tailer.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        tailer.stop().await;
        tailer.stop().await;

        assert_eq!(transport.close_count(), 1);
        assert_eq!(tailer.connection_state(), ConnectionState::Stopped);
        assert_eq!(tailer.tail_state(), TailState::Stopped);
        assert!(matches!(tailer.start().await, Err(TailerError::Stopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let (tailer, _sink) = tailer(MockTransport::new(), config(5));
        tailer.start().await.unwrap();
        assert!(matches!(
            tailer.start().await,
            Err(TailerError::AlreadyRunning)
        ));
        tailer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_schedule_on_startup() {
        let transport = MockTransport::failing_first(3);
        let (tailer, _sink) = tailer(transport.clone(), config(5));

        tailer.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(34)).await;
        assert_eq!(transport.connect_count(), 3);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(transport.connect_count(), 4);
        assert_eq!(tailer.tail_state(), TailState::Running);

        tailer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_heartbeat_restarts_tail_on_new_session() {
        let transport = MockTransport::new().with_scripts([
            SessionScript::follow(&[b"2024-04-09 13:38:32.723 INFO before\n"], FollowEnd::Hold)
                .with_probe(Probe::Stall),
            SessionScript::follow(
                &[
                    b"2024-04-09 13:38:32.723 INFO before\n",
                    b"2024-04-09 13:38:50.000 INFO after\n",
                ],
                FollowEnd::Hold,
            ),
        ]);
        let (tailer, sink) = tailer(transport.clone(), config(5));

        tailer.start().await.unwrap();
        // Probe at 30s, timeout at 40s, pause until 45s, then reconnect.
        tokio::time::sleep(Duration::from_secs(50)).await;

        assert_eq!(transport.connect_count(), 2);
        let follows: Vec<usize> = transport
            .follow_runs()
            .into_iter()
            .map(|(session, _)| session)
            .collect();
        assert_eq!(follows, [0, 1]);
        assert_eq!(sink.messages().unwrap(), ["before", "after"]);
        assert_eq!(tailer.tail_state(), TailState::Running);

        tailer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_interrupts_backoff() {
        let transport = MockTransport::failing_first(usize::MAX);
        let (tailer, _sink) = tailer(transport.clone(), config(5));

        tailer.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        tokio_test::assert_ok!(
            tokio::time::timeout(Duration::from_secs(1), tailer.stop()).await
        );
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_stalled_heartbeat_is_prompt() {
        let transport = MockTransport::new().with_scripts([SessionScript::follow(
            &[b"2024-04-09 13:38:32.723 INFO booted\n"],
            FollowEnd::Hold,
        )
        .with_probe(Probe::Stall)
        .with_interruptible(false)]);
        let (tailer, _sink) = tailer(transport.clone(), config(5));

        tailer.start().await.unwrap();
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(transport.stalled_in_flight(), 1);

        let started = tokio::time::Instant::now();
        tailer.stop().await;

        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(transport.connect_count(), 1);
        assert_eq!(transport.close_count(), 1);
        assert_eq!(tailer.tail_state(), TailState::Stopped);

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.stalled_in_flight(), 0);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let result = Tailer::new(
            MockTransport::new(),
            ConnectParams::new("robot.local", "root"),
            config(0),
            Arc::new(MemorySink::new()),
        );
        assert!(matches!(
            result,
            Err(TailerError::Config(ConfigError::ZeroRetries))
        ));
    }
}
