//! Mock worker launcher for session lifecycle tests.
//!
//! Workers never touch the network. Each launch consumes the next scripted
//! [`LaunchBehavior`] (falling back to the default), and every worker stays
//! reachable through the launcher so tests can crash it or read what was sent.
//!
//! # Example
//!
//! ```rust,ignore
//! use sc_test_utils::{LaunchBehavior, MockLauncher};
//!
//! let launcher = MockLauncher::new()
//!     .with_script([LaunchBehavior::PortInUse, LaunchBehavior::Ready]);
//!
//! // ... host a session through the registry ...
//!
//! assert_eq!(launcher.launch_count(), 2);
//! launcher.crash(&token);
//! ```

use async_trait::async_trait;
use session_controller::allocation::Token;
use session_controller::errors::ScError;
use session_controller::supervisor::{Worker, WorkerLauncher, WorkerSpec};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// What the next launched worker does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchBehavior {
    /// Ready immediately.
    Ready,
    /// Launch fails with `PortInUse` for the offered port.
    PortInUse,
    /// `ready()` never resolves.
    HangOnReady,
    /// Worker exits before becoming ready.
    ExitDuringStartup,
}

/// Observable state of one mock worker.
#[derive(Debug)]
pub struct MockWorkerState {
    pub spec: WorkerSpec,
    alive: AtomicBool,
    stopped: AtomicBool,
    messages: Mutex<Vec<String>>,
}

impl MockWorkerState {
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    pub fn was_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[derive(Debug)]
struct MockWorker {
    behavior: LaunchBehavior,
    state: Arc<MockWorkerState>,
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl Worker for MockWorker {
    async fn ready(&self) -> Result<(), ScError> {
        match self.behavior {
            LaunchBehavior::HangOnReady => std::future::pending().await,
            LaunchBehavior::ExitDuringStartup => {
                self.state.alive.store(false, Ordering::SeqCst);
                Err(ScError::WorkerExited("exit status: 1".to_string()))
            }
            LaunchBehavior::Ready | LaunchBehavior::PortInUse => {
                if self.state.is_alive() {
                    Ok(())
                } else {
                    Err(ScError::WorkerExited("crashed".to_string()))
                }
            }
        }
    }

    async fn send(&self, message: &str) -> Result<(), ScError> {
        if !self.state.is_alive() {
            return Err(ScError::HandleClosed(self.state.spec.token.to_string()));
        }
        self.state.messages.lock().unwrap().push(message.to_string());
        Ok(())
    }

    async fn stop(&self) {
        self.state.alive.store(false, Ordering::SeqCst);
        if !self.state.stopped.swap(true, Ordering::SeqCst) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn is_alive(&self) -> bool {
        self.state.is_alive()
    }
}

#[derive(Debug, Default)]
struct LauncherInner {
    script: VecDeque<LaunchBehavior>,
    workers: Vec<Arc<MockWorkerState>>,
    by_token: HashMap<Token, Arc<MockWorkerState>>,
}

/// Scriptable [`WorkerLauncher`].
#[derive(Debug, Clone)]
pub struct MockLauncher {
    inner: Arc<Mutex<LauncherInner>>,
    default_behavior: LaunchBehavior,
    launches: Arc<AtomicUsize>,
    stops: Arc<AtomicUsize>,
}

impl Default for MockLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLauncher {
    /// Every worker becomes ready immediately.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(LauncherInner::default())),
            default_behavior: LaunchBehavior::Ready,
            launches: Arc::new(AtomicUsize::new(0)),
            stops: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Behavior once the script is exhausted.
    pub fn with_default(mut self, behavior: LaunchBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Behaviors for the next launches, in order.
    pub fn with_script(self, script: impl IntoIterator<Item = LaunchBehavior>) -> Self {
        self.inner.lock().unwrap().script.extend(script);
        self
    }

    pub fn push_behavior(&self, behavior: LaunchBehavior) {
        self.inner.lock().unwrap().script.push_back(behavior);
    }

    /// Launch attempts, including those that failed with `PortInUse`.
    pub fn launch_count(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    /// Workers stopped by the supervisor or registry.
    pub fn stop_count(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    /// Specs of every worker actually created, oldest first.
    pub fn specs(&self) -> Vec<WorkerSpec> {
        self.inner
            .lock()
            .unwrap()
            .workers
            .iter()
            .map(|w| w.spec.clone())
            .collect()
    }

    /// Most recent worker launched for `token`.
    pub fn worker(&self, token: &Token) -> Option<Arc<MockWorkerState>> {
        self.inner.lock().unwrap().by_token.get(token).cloned()
    }

    /// Kill the latest worker of `token` without telling anyone.
    ///
    /// # Panics
    ///
    /// If no worker was ever launched for `token`.
    pub fn crash(&self, token: &Token) {
        let worker = self
            .worker(token)
            .unwrap_or_else(|| panic!("no worker launched for {token}"));
        worker.alive.store(false, Ordering::SeqCst);
    }

    /// Ports of workers that are still alive.
    pub fn live_ports(&self) -> Vec<u16> {
        self.inner
            .lock()
            .unwrap()
            .workers
            .iter()
            .filter(|w| w.is_alive())
            .map(|w| w.spec.port)
            .collect()
    }
}

#[async_trait]
impl WorkerLauncher for MockLauncher {
    async fn launch(&self, spec: &WorkerSpec) -> Result<Box<dyn Worker>, ScError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().unwrap();
        let behavior = inner.script.pop_front().unwrap_or(self.default_behavior);
        if behavior == LaunchBehavior::PortInUse {
            return Err(ScError::PortInUse(spec.port));
        }

        let state = Arc::new(MockWorkerState {
            spec: spec.clone(),
            alive: AtomicBool::new(true),
            stopped: AtomicBool::new(false),
            messages: Mutex::new(Vec::new()),
        });
        inner.workers.push(Arc::clone(&state));
        inner.by_token.insert(spec.token.clone(), Arc::clone(&state));

        Ok(Box::new(MockWorker {
            behavior,
            state,
            stops: Arc::clone(&self.stops),
        }))
    }
}
