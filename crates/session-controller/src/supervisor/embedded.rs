//! In-process game server.
//!
//! Binds the session port inside this process and keeps a line-oriented TCP
//! endpoint open for players. Operator messages are broadcast to every
//! connected client. The game protocol itself is not implemented here; the
//! endpoint exists so sessions can be hosted without an external binary.

use super::{Worker, WorkerLauncher, WorkerSpec};
use crate::errors::ScError;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Messages buffered per client before a slow reader starts losing lines.
const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct EmbeddedLauncher;

impl EmbeddedLauncher {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WorkerLauncher for EmbeddedLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> Result<Box<dyn Worker>, ScError> {
        let addr = SocketAddr::new(spec.bind_host, spec.port);
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            if e.kind() == ErrorKind::AddrInUse {
                ScError::PortInUse(spec.port)
            } else {
                ScError::Internal(format!("bind {addr}: {e}"))
            }
        })?;

        let token = spec.token.to_string();
        let cancel = CancellationToken::new();
        let alive = Arc::new(AtomicBool::new(true));
        let (messages, _) = broadcast::channel(BROADCAST_CAPACITY);

        let task = tokio::spawn(accept_loop(
            listener,
            token.clone(),
            messages.clone(),
            cancel.clone(),
            Arc::clone(&alive),
        ));

        info!(target: "sc.supervisor", token = %token, addr = %addr, "Embedded server listening");

        Ok(Box::new(EmbeddedWorker {
            token,
            messages,
            cancel,
            alive,
            task: Mutex::new(Some(task)),
        }))
    }
}

async fn accept_loop(
    listener: TcpListener,
    token: String,
    messages: broadcast::Sender<String>,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!(target: "sc.supervisor", token = %token, peer = %peer, "Client connected");
                    tokio::spawn(serve_client(
                        stream,
                        token.clone(),
                        messages.subscribe(),
                        cancel.child_token(),
                    ));
                }
                Err(e) => {
                    warn!(target: "sc.supervisor", token = %token, error = %e, "Embedded server accept failed");
                    break;
                }
            },
        }
    }

    alive.store(false, Ordering::SeqCst);
    // Disconnect clients of a server that died on its own.
    cancel.cancel();
}

async fn serve_client(
    mut stream: TcpStream,
    token: String,
    mut messages: broadcast::Receiver<String>,
    cancel: CancellationToken,
) {
    if stream
        .write_all(format!("CONNECTED {token}\n").as_bytes())
        .await
        .is_err()
    {
        return;
    }

    let mut buf = [0u8; 512];
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            read = stream.read(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            },
            message = messages.recv() => match message {
                Ok(line) => {
                    if stream.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(target: "sc.supervisor", token = %token, skipped, "Client lagging");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

struct EmbeddedWorker {
    token: String,
    messages: broadcast::Sender<String>,
    cancel: CancellationToken,
    alive: Arc<AtomicBool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl Worker for EmbeddedWorker {
    async fn ready(&self) -> Result<(), ScError> {
        // Listening since launch.
        if self.is_alive() {
            Ok(())
        } else {
            Err(ScError::WorkerExited(self.token.clone()))
        }
    }

    async fn send(&self, message: &str) -> Result<(), ScError> {
        if !self.is_alive() {
            return Err(ScError::HandleClosed(self.token.clone()));
        }
        // No connected clients is not an error.
        let delivered = self.messages.send(message.trim_end().to_string()).unwrap_or(0);
        debug!(target: "sc.supervisor", token = %self.token, delivered, "Operator message broadcast");
        Ok(())
    }

    async fn stop(&self) {
        self.cancel.cancel();
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        if let Err(e) = task.await {
            warn!(target: "sc.supervisor", token = %self.token, error = ?e, "Embedded server task failed");
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst) && !self.cancel.is_cancelled()
    }
}
