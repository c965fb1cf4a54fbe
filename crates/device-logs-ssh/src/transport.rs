//! SSH transport built on the system OpenSSH client.
//!
//! `connect` starts a control master (`ssh -M -N -S <socket>`) and waits
//! until it answers `-O check`. Every command afterwards is multiplexed over
//! that socket, so a session is one authenticated TCP connection no matter
//! how many follow or probe commands run on it.

use std::{
    path::{Path, PathBuf},
    process::{ExitStatus, Stdio},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use device_logs_core::{
    ConnectParams, Credential, OutputStream, RemoteSession, Transport, TransportError,
};
use futures::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncReadExt},
    process::{Child, ChildStdout, Command},
    sync::Mutex,
    task::JoinHandle,
};
use uuid::Uuid;

use crate::resolve::resolve_executable_path;

const READ_CHUNK: usize = 8 * 1024;
const MASTER_CHECK_INTERVAL: Duration = Duration::from_millis(100);
/// Exit status ssh itself uses for connection-level failures.
const SSH_CONNECTION_ERROR: i32 = 255;

/// SSH client options.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub ssh_program: String,
    /// Only needed for password credentials.
    pub sshpass_program: String,
    /// Where control sockets are created. Keep the path short; unix socket
    /// paths are limited to ~100 bytes.
    pub control_dir: PathBuf,
    pub server_alive_interval: u32,
    pub server_alive_count_max: u32,
    pub strict_host_key_checking: String,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            ssh_program: "ssh".to_string(),
            sshpass_program: "sshpass".to_string(),
            control_dir: std::env::temp_dir(),
            server_alive_interval: 15,
            server_alive_count_max: 2,
            strict_host_key_checking: "accept-new".to_string(),
        }
    }
}

/// SSH transport for production use.
#[derive(Debug, Clone, Default)]
pub struct SshTransport {
    options: SshOptions,
}

impl SshTransport {
    #[must_use]
    pub const fn new(options: SshOptions) -> Self {
        Self { options }
    }

    /// Arguments for the control master process.
    fn master_args(&self, params: &ConnectParams, socket: &Path) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            "-N".to_string(),
            "-S".to_string(),
            socket.to_string_lossy().into_owned(),
            "-o".to_string(),
            "ControlPersist=no".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", params.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            format!("ServerAliveInterval={}", self.options.server_alive_interval),
            "-o".to_string(),
            format!("ServerAliveCountMax={}", self.options.server_alive_count_max),
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                self.options.strict_host_key_checking
            ),
            "-p".to_string(),
            params.port.to_string(),
        ];
        args.extend(auth_args(&params.credential));
        args.push(params.destination());
        args
    }

    async fn resolve(&self, program: &str) -> Result<PathBuf, TransportError> {
        resolve_executable_path(program)
            .await
            .ok_or_else(|| TransportError::ConnectFailed(format!("Executable not found: {program}")))
    }
}

fn auth_args(credential: &Credential) -> Vec<String> {
    let opts: &[&str] = match credential {
        Credential::Password(_) => &[
            "-o",
            "BatchMode=no",
            "-o",
            "PubkeyAuthentication=no",
            "-o",
            "PreferredAuthentications=password,keyboard-interactive",
            "-o",
            "NumberOfPasswordPrompts=1",
        ],
        Credential::KeyFile(_) => &["-o", "BatchMode=yes", "-o", "IdentitiesOnly=yes"],
        Credential::Agent => &["-o", "BatchMode=yes"],
    };

    let mut args: Vec<String> = opts.iter().map(ToString::to_string).collect();
    if let Credential::KeyFile(path) = credential {
        args.push("-i".to_string());
        args.push(path.to_string_lossy().into_owned());
    }
    args
}

#[async_trait]
impl Transport for SshTransport {
    type Session = SshSession;

    async fn connect(&self, params: &ConnectParams) -> Result<SshSession, TransportError> {
        let ssh = self.resolve(&self.options.ssh_program).await?;
        let socket = self
            .options
            .control_dir
            .join(format!("dl-{}.sock", Uuid::new_v4().simple()));

        let mut cmd = if let Credential::Password(secret) = &params.credential {
            let sshpass = self.resolve(&self.options.sshpass_program).await?;
            let mut cmd = Command::new(sshpass);
            // -e reads the secret from the environment, keeping it out of argv.
            cmd.arg("-e").arg(&ssh).env("SSHPASS", secret);
            cmd
        } else {
            Command::new(&ssh)
        };
        cmd.args(self.master_args(params, &socket))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(
            host = %params.host,
            port = params.port,
            socket = %socket.display(),
            "Starting SSH control master"
        );
        let mut master = cmd
            .spawn()
            .map_err(|e| TransportError::ConnectFailed(format!("{}: {e}", ssh.display())))?;
        let destination = params.destination();

        let ready = tokio::time::timeout(
            params.connect_timeout,
            wait_for_master(&ssh, &socket, &destination, &mut master),
        )
        .await;

        match ready {
            Ok(Ok(())) => Ok(SshSession {
                ssh,
                socket,
                destination,
                master: Mutex::new(Some(master)),
            }),
            Ok(Err(e)) => {
                discard_master(&mut master, &socket).await;
                Err(e)
            }
            Err(_) => {
                discard_master(&mut master, &socket).await;
                Err(TransportError::ConnectTimeout)
            }
        }
    }
}

async fn discard_master(master: &mut Child, socket: &Path) {
    let _ = master.kill().await;
    let _ = tokio::fs::remove_file(socket).await;
}

async fn wait_for_master(
    ssh: &Path,
    socket: &Path,
    destination: &str,
    master: &mut Child,
) -> Result<(), TransportError> {
    loop {
        if let Some(status) = master.try_wait()? {
            let stderr = match master.stderr.take() {
                Some(stderr) => read_all(stderr).await,
                None => String::new(),
            };
            return Err(classify_connection_failure(&stderr, status));
        }

        let check = control(ssh, socket, destination, "check").await;
        if matches!(check, Ok(status) if status.success()) {
            return Ok(());
        }

        tokio::time::sleep(MASTER_CHECK_INTERVAL).await;
    }
}

async fn control(
    ssh: &Path,
    socket: &Path,
    destination: &str,
    op: &str,
) -> std::io::Result<ExitStatus> {
    Command::new(ssh)
        .arg("-S")
        .arg(socket)
        .args(["-O", op, destination])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
}

async fn read_all(mut reader: impl AsyncRead + Unpin) -> String {
    let mut buf = Vec::new();
    let _ = reader.read_to_end(&mut buf).await;
    String::from_utf8_lossy(&buf).into_owned()
}

/// Map ssh's error output onto a transport error.
fn classify_connection_failure(stderr: &str, status: ExitStatus) -> TransportError {
    let detail = stderr.trim();
    let has = |needles: &[&str]| needles.iter().any(|n| detail.contains(n));

    if has(&[
        "Permission denied",
        "Authentication failed",
        "Too many authentication failures",
    ]) {
        TransportError::Auth(detail.to_string())
    } else if has(&[
        "No route to host",
        "Network is unreachable",
        "Host is down",
        "Could not resolve hostname",
        "Name or service not known",
    ]) {
        TransportError::HostUnreachable(detail.to_string())
    } else if has(&["Connection timed out", "Operation timed out"]) {
        TransportError::ConnectTimeout
    } else if detail.is_empty() {
        TransportError::ConnectFailed(format!("ssh exited with {status}"))
    } else {
        TransportError::ConnectFailed(detail.to_string())
    }
}

/// A live control-master session.
pub struct SshSession {
    ssh: PathBuf,
    socket: PathBuf,
    destination: String,
    master: Mutex<Option<Child>>,
}

impl SshSession {
    fn command_args(&self, command: &str, pty: bool) -> Vec<String> {
        vec![
            "-S".to_string(),
            self.socket.to_string_lossy().into_owned(),
            "-o".to_string(),
            "ControlMaster=no".to_string(),
            if pty { "-tt" } else { "-T" }.to_string(),
            self.destination.clone(),
            command.to_string(),
        ]
    }
}

struct RunningCommand {
    child: Child,
    stdout: ChildStdout,
    stderr: Option<JoinHandle<String>>,
}

impl RunningCommand {
    async fn finish(mut self) -> Result<(), TransportError> {
        let status = self.child.wait().await?;
        if status.success() {
            return Ok(());
        }
        let stderr = match self.stderr {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        if status.code() == Some(SSH_CONNECTION_ERROR) {
            return Err(classify_connection_failure(&stderr, status));
        }
        Err(TransportError::CommandFailed {
            status: status.to_string(),
            output: stderr.trim().to_string(),
        })
    }
}

fn output_stream(running: RunningCommand) -> OutputStream {
    futures::stream::unfold(Some(running), |state| async move {
        let mut running = state?;
        let mut buf = vec![0u8; READ_CHUNK];
        match running.stdout.read(&mut buf).await {
            Ok(0) => running.finish().await.err().map(|e| (Err(e), None)),
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), Some(running)))
            }
            Err(e) => Some((Err(TransportError::Io(e)), None)),
        }
    })
    .boxed()
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&self, command: &str, pty: bool) -> Result<OutputStream, TransportError> {
        if self.master.lock().await.is_none() {
            return Err(TransportError::Closed);
        }

        let mut child = Command::new(&self.ssh)
            .args(self.command_args(command, pty))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child.stdout.take().ok_or(TransportError::Closed)?;
        let stderr = child.stderr.take().map(|s| tokio::spawn(read_all(s)));

        tracing::debug!(destination = %self.destination, command, pty, "Started remote command");
        Ok(output_stream(RunningCommand {
            child,
            stdout,
            stderr,
        }))
    }

    fn interruptible(&self) -> bool {
        // Commands are local ssh clients spawned with kill_on_drop.
        true
    }

    async fn close(&self) -> Result<(), TransportError> {
        let master = self.master.lock().await.take();
        let Some(mut master) = master else {
            return Ok(());
        };

        if let Err(e) = control(&self.ssh, &self.socket, &self.destination, "exit").await {
            tracing::debug!(error = %e, "Control master exit request failed");
        }
        if let Err(e) = master.kill().await {
            tracing::debug!(error = %e, "Control master already gone");
        }
        let _ = tokio::fs::remove_file(&self.socket).await;

        tracing::debug!(destination = %self.destination, "Closed SSH session");
        Ok(())
    }
}
