//! External game server processes.
//!
//! The server is started as
//!
//! ```text
//! <program> [extra args] --host <bind host> --port <port> --data <path>
//!           [--save <path>] --checkpoints <n> --hint-cost <n> [--allow-cheats]
//! ```
//!
//! Operator messages are written to its stdin, one per line. Readiness is a
//! successful TCP connect to the game port while the process is still alive.
//! stdout/stderr are forwarded to tracing.
//!
//! The port is re-probed right before spawning, and again if the process dies
//! before it is ready. Either probe finding the port bound by someone else
//! reports `PortInUse` so the supervisor retries on another port.

use super::{Worker, WorkerLauncher, WorkerSpec};
use crate::allocation::is_bindable;
use crate::artifacts::ArtifactHandle;
use crate::errors::ScError;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval between readiness probes.
const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long `stop` waits for the process to be reaped.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct SubprocessLauncher {
    program: String,
    extra_args: Vec<String>,
}

impl SubprocessLauncher {
    #[must_use]
    pub fn new(program: impl Into<String>, extra_args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            extra_args,
        }
    }

    /// Command-line arguments for `spec`, after the configured extra args.
    ///
    /// # Errors
    ///
    /// `ScError::Internal` if an artifact is not file-backed; an external
    /// process cannot receive inline bytes.
    pub fn worker_args(spec: &WorkerSpec) -> Result<Vec<String>, ScError> {
        let data = file_path(&spec.artifacts.data)?;

        let mut args = vec![
            "--host".to_string(),
            spec.bind_host.to_string(),
            "--port".to_string(),
            spec.port.to_string(),
            "--data".to_string(),
            data,
        ];
        if let Some(save) = &spec.artifacts.save {
            args.push("--save".to_string());
            args.push(file_path(save)?);
        }
        args.push("--checkpoints".to_string());
        args.push(spec.params.checkpoint_interval.to_string());
        args.push("--hint-cost".to_string());
        args.push(spec.params.hint_cost.to_string());
        if spec.params.allow_cheats {
            args.push("--allow-cheats".to_string());
        }
        Ok(args)
    }
}

fn file_path(handle: &ArtifactHandle) -> Result<String, ScError> {
    match handle {
        ArtifactHandle::File(path) => Ok(path.display().to_string()),
        ArtifactHandle::Inline(_) => Err(ScError::Internal(
            "subprocess workers need a file-backed artifact store".to_string(),
        )),
    }
}

/// Error for a worker that died before becoming ready.
async fn startup_exit_error(bind_addr: SocketAddr, token: &str) -> ScError {
    if is_bindable(bind_addr).await {
        ScError::WorkerExited(token.to_string())
    } else {
        ScError::PortInUse(bind_addr.port())
    }
}

/// Address to probe for readiness: wildcard binds are reached via loopback.
fn connect_addr(bind_host: IpAddr, port: u16) -> SocketAddr {
    let host = match bind_host {
        IpAddr::V4(v4) if v4.is_unspecified() => IpAddr::V4(Ipv4Addr::LOCALHOST),
        IpAddr::V6(v6) if v6.is_unspecified() => IpAddr::V6(Ipv6Addr::LOCALHOST),
        other => other,
    };
    SocketAddr::new(host, port)
}

fn forward_output<R>(token: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(target: "sc.supervisor", token = %token, stream, line = %line, "worker output");
        }
    });
}

#[async_trait]
impl WorkerLauncher for SubprocessLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> Result<Box<dyn Worker>, ScError> {
        let args = Self::worker_args(spec)?;

        let bind_addr = SocketAddr::new(spec.bind_host, spec.port);
        if !is_bindable(bind_addr).await {
            warn!(target: "sc.supervisor", token = %spec.token, port = spec.port, "Port taken before spawn");
            return Err(ScError::PortInUse(spec.port));
        }

        let mut child = Command::new(&self.program)
            .args(&self.extra_args)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ScError::WorkerExited(format!("failed to spawn {}: {e}", self.program)))?;

        let token = spec.token.to_string();
        info!(
            target: "sc.supervisor",
            token = %token,
            pid = child.id().unwrap_or_default(),
            port = spec.port,
            "Worker process spawned"
        );

        if let Some(stdout) = child.stdout.take() {
            forward_output(token.clone(), "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(token.clone(), "stderr", stderr);
        }
        let stdin = child.stdin.take();

        let (exited_tx, exited_rx) = watch::channel(false);
        let kill = CancellationToken::new();
        let monitor = {
            let kill = kill.clone();
            let token = token.clone();
            tokio::spawn(async move {
                let status = tokio::select! {
                    status = child.wait() => status,
                    () = kill.cancelled() => {
                        if let Err(e) = child.start_kill() {
                            warn!(target: "sc.supervisor", token = %token, error = %e, "Failed to kill worker");
                        }
                        child.wait().await
                    }
                };
                match status {
                    Ok(status) => {
                        info!(target: "sc.supervisor", token = %token, status = %status, "Worker process exited");
                    }
                    Err(e) => {
                        warn!(target: "sc.supervisor", token = %token, error = %e, "Failed to wait on worker");
                    }
                }
                let _ = exited_tx.send(true);
            })
        };

        Ok(Box::new(SubprocessWorker {
            token,
            bind_addr,
            addr: connect_addr(spec.bind_host, spec.port),
            stdin: Mutex::new(stdin),
            exited: exited_rx,
            kill,
            monitor: Mutex::new(Some(monitor)),
        }))
    }
}

struct SubprocessWorker {
    token: String,
    bind_addr: SocketAddr,
    addr: SocketAddr,
    stdin: Mutex<Option<ChildStdin>>,
    exited: watch::Receiver<bool>,
    kill: CancellationToken,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Worker for SubprocessWorker {
    async fn ready(&self) -> Result<(), ScError> {
        loop {
            if *self.exited.borrow() {
                return Err(startup_exit_error(self.bind_addr, &self.token).await);
            }
            // A connect alone could reach another listener on the port.
            if tokio::net::TcpStream::connect(self.addr).await.is_ok() && self.is_alive() {
                return Ok(());
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }

    async fn send(&self, message: &str) -> Result<(), ScError> {
        let mut stdin = self.stdin.lock().await;
        let pipe = match stdin.as_mut() {
            Some(pipe) if !*self.exited.borrow() => pipe,
            _ => return Err(ScError::HandleClosed(self.token.clone())),
        };

        let line = format!("{}\n", message.trim_end());
        let written = async {
            pipe.write_all(line.as_bytes()).await?;
            pipe.flush().await
        }
        .await;

        written.map_err(|e| {
            warn!(target: "sc.supervisor", token = %self.token, error = %e, "Worker stdin closed");
            *stdin = None;
            ScError::HandleClosed(self.token.clone())
        })
    }

    async fn stop(&self) {
        self.stdin.lock().await.take();
        self.kill.cancel();

        let Some(monitor) = self.monitor.lock().await.take() else {
            return;
        };
        if tokio::time::timeout(STOP_TIMEOUT, monitor).await.is_err() {
            warn!(target: "sc.supervisor", token = %self.token, "Worker did not exit in time");
        }
    }

    fn is_alive(&self) -> bool {
        !*self.exited.borrow()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::allocation::Token;
    use crate::artifacts::WorkerArtifacts;
    use crate::supervisor::WorkerParams;
    use bytes::Bytes;
    use std::path::PathBuf;

    fn spec(save: Option<ArtifactHandle>, params: WorkerParams) -> WorkerSpec {
        spec_on(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5123, save, params)
    }

    fn spec_on(
        bind_host: IpAddr,
        port: u16,
        save: Option<ArtifactHandle>,
        params: WorkerParams,
    ) -> WorkerSpec {
        WorkerSpec {
            token: Token::parse("ARGS").unwrap(),
            bind_host,
            port,
            artifacts: WorkerArtifacts {
                data: ArtifactHandle::File(PathBuf::from("/tmp/ARGS.data")),
                save,
            },
            params,
        }
    }

    #[test]
    fn test_worker_args_defaults() {
        let args = SubprocessLauncher::worker_args(&spec(None, WorkerParams::default())).unwrap();
        assert_eq!(
            args,
            [
                "--host", "0.0.0.0", "--port", "5123", "--data", "/tmp/ARGS.data",
                "--checkpoints", "1", "--hint-cost", "50",
            ]
        );
    }

    #[test]
    fn test_worker_args_with_save_and_cheats() {
        let params = WorkerParams {
            checkpoint_interval: 3,
            hint_cost: 0,
            allow_cheats: true,
        };
        let save = Some(ArtifactHandle::File(PathBuf::from("/tmp/ARGS.save")));
        let args = SubprocessLauncher::worker_args(&spec(save, params)).unwrap();

        assert!(args.windows(2).any(|w| w == ["--save", "/tmp/ARGS.save"]));
        assert!(args.windows(2).any(|w| w == ["--checkpoints", "3"]));
        assert_eq!(args.last().map(String::as_str), Some("--allow-cheats"));
    }

    #[test]
    fn test_worker_args_reject_inline_artifacts() {
        let mut spec = spec(None, WorkerParams::default());
        spec.artifacts.data = ArtifactHandle::Inline(Bytes::from_static(b"x"));
        assert!(matches!(
            SubprocessLauncher::worker_args(&spec),
            Err(ScError::Internal(_))
        ));
    }

    #[test]
    fn test_connect_addr_maps_wildcard_to_loopback() {
        assert_eq!(
            connect_addr(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 7000),
            "127.0.0.1:7000".parse().unwrap()
        );
        assert_eq!(
            connect_addr(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)), 7000),
            "10.0.0.2:7000".parse().unwrap()
        );
    }

    /// A spec on a loopback port that is free right now.
    async fn free_spec() -> WorkerSpec {
        let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        spec_on(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            None,
            WorkerParams::default(),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_missing_binary_is_reported_as_exit() {
        let launcher = SubprocessLauncher::new("/nonexistent/game-server", Vec::new());
        let result = launcher.launch(&free_spec().await).await;
        assert!(matches!(result, Err(ScError::WorkerExited(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exiting_process_fails_ready_and_closes_handle() {
        // `sh -c 'exit 3' <args...>` ignores the worker arguments and exits.
        let launcher = SubprocessLauncher::new(
            "sh",
            vec!["-c".to_string(), "exit 3".to_string()],
        );
        let worker = launcher.launch(&free_spec().await).await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), worker.ready())
            .await
            .unwrap();
        assert!(matches!(result, Err(ScError::WorkerExited(_))));
        assert!(!worker.is_alive());
        assert!(matches!(
            worker.send("hello").await,
            Err(ScError::HandleClosed(_))
        ));

        worker.stop().await;
        worker.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_kills_long_running_process() {
        let launcher = SubprocessLauncher::new(
            "sh",
            vec!["-c".to_string(), "sleep 30".to_string()],
        );
        let worker = launcher.launch(&free_spec().await).await.unwrap();
        assert!(worker.is_alive());

        worker.send("/status").await.unwrap();
        worker.stop().await;
        assert!(!worker.is_alive());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_squatted_port_is_retryable() {
        let squatter = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let port = squatter.local_addr().unwrap().port();
        let spec = spec_on(
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            port,
            None,
            WorkerParams::default(),
        );

        // The squatter accepts connections, so a connect-only readiness check
        // would wrongly report this worker as ready.
        let launcher = SubprocessLauncher::new(
            "sh",
            vec!["-c".to_string(), "sleep 30".to_string()],
        );
        let result = launcher.launch(&spec).await;
        assert!(matches!(result, Err(ScError::PortInUse(p)) if p == port));
    }

    #[tokio::test]
    async fn test_exit_during_startup_maps_to_port_in_use_when_port_is_taken() {
        let squatter = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .unwrap();
        let addr = squatter.local_addr().unwrap();

        assert!(matches!(
            startup_exit_error(addr, "EXIT").await,
            ScError::PortInUse(p) if p == addr.port()
        ));

        drop(squatter);
        assert!(matches!(
            startup_exit_error(addr, "EXIT").await,
            ScError::WorkerExited(token) if token == "EXIT"
        ));
    }
}
