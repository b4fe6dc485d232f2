//! Launches the out-of-process execution backend and keeps it alive.
//!
//! Liveness is the child's exit status, polled with `try_wait`. A dead backend
//! is relaunched from scratch under a bounded restart budget with exponential
//! backoff. Every relaunch bumps the handle generation; callers must re-fetch
//! the handle instead of caching it.

use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct BackendSpec {
    pub program: String,
    pub args: Vec<String>,
    pub host: String,
    pub port: u16,
    /// How long a fresh child must survive before it counts as started.
    pub startup_grace: Duration,
    /// How long SIGTERM gets before the child is killed.
    pub stop_grace: Duration,
}

impl BackendSpec {
    pub fn new(program: impl Into<String>, port: u16) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            host: "127.0.0.1".to_string(),
            port,
            startup_grace: Duration::from_millis(500),
            stop_grace: Duration::from_secs(5),
        }
    }

    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct RestartPolicy {
    pub max_restarts: u32,
    pub backoff: Duration,
    /// A backend that stayed up this long gets its restart budget back.
    pub stable_after: Duration,
}

impl RestartPolicy {
    /// `backoff * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.pow(attempt.saturating_sub(1).min(12));
        self.backoff.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self { max_restarts: 5, backoff: Duration::from_secs(1), stable_after: Duration::from_secs(60) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendHandle {
    pub pid: Option<u32>,
    pub port: u16,
    pub base_url: String,
    pub generation: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupervisorHealth {
    pub running: bool,
    pub pid: Option<u32>,
    pub port: u16,
    pub restarts: u32,
    pub generation: u64,
    pub gave_up: bool,
    pub last_error: Option<String>,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited during startup: {status}")]
    ExitedEarly { program: String, status: String },
}

#[derive(Default)]
struct Managed {
    child: Option<Child>,
    handle: Option<BackendHandle>,
    launched_at: Option<Instant>,
    restarts: u32,
    generation: u64,
    gave_up: bool,
    stopped: bool,
    last_error: Option<String>,
}

pub struct ServiceSupervisor {
    spec: BackendSpec,
    policy: RestartPolicy,
    // Serializes start/check/shutdown. Never held by readers.
    lifecycle: Mutex<()>,
    managed: Mutex<Managed>,
}

impl ServiceSupervisor {
    pub fn new(spec: BackendSpec, policy: RestartPolicy) -> Self {
        Self {
            spec,
            policy,
            lifecycle: Mutex::new(()),
            managed: Mutex::new(Managed::default()),
        }
    }

    pub fn spec(&self) -> &BackendSpec {
        &self.spec
    }

    pub async fn start(&self) -> Result<BackendHandle, SupervisorError> {
        let _lc = self.lifecycle.lock().await;
        self.managed.lock().await.stopped = false;
        self.launch().await
    }

    /// Caller holds `lifecycle`.
    async fn launch(&self) -> Result<BackendHandle, SupervisorError> {
        let mut cmd = Command::new(&self.spec.program);
        cmd.args(&self.spec.args)
            .env("EXECUTOR_PORT", self.spec.port.to_string())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(c) => c,
            Err(source) => {
                let e = SupervisorError::Spawn { program: self.spec.program.clone(), source };
                self.managed.lock().await.last_error = Some(e.to_string());
                return Err(e);
            }
        };

        if !self.spec.startup_grace.is_zero() {
            sleep(self.spec.startup_grace).await;
            if let Ok(Some(status)) = child.try_wait() {
                let e = SupervisorError::ExitedEarly { program: self.spec.program.clone(), status: status.to_string() };
                self.managed.lock().await.last_error = Some(e.to_string());
                return Err(e);
            }
        }

        let mut m = self.managed.lock().await;
        m.generation += 1;
        let handle = BackendHandle {
            pid: child.id(),
            port: self.spec.port,
            base_url: self.spec.base_url(),
            generation: m.generation,
        };
        m.child = Some(child);
        m.handle = Some(handle.clone());
        m.launched_at = Some(Instant::now());
        m.last_error = None;

        info!(program=%self.spec.program, pid=?handle.pid, port=handle.port, generation=handle.generation, "supervisor: backend launched");
        Ok(handle)
    }

    /// Current handle, or `None` while the backend is down or being relaunched.
    pub async fn handle(&self) -> Option<BackendHandle> {
        self.managed.lock().await.handle.clone()
    }

    /// One liveness poll. Relaunches a dead backend if the budget allows.
    /// Returns whether a backend is running afterwards.
    pub async fn check_once(&self) -> bool {
        let lc = self.lifecycle.lock().await;

        // 1) Probe under the state lock
        let (stale, attempt) = {
            let mut m = self.managed.lock().await;
            if m.gave_up || m.stopped {
                return false;
            }

            match m.child.as_mut().map(|c| c.try_wait()) {
                Some(Ok(None)) => return true,
                Some(Ok(Some(status))) => {
                    warn!(status=%status, generation=m.generation, "supervisor: backend exited");
                    m.last_error = Some(format!("backend exited: {status}"));
                }
                Some(Err(e)) => {
                    warn!(error=%e, "supervisor: liveness probe failed, assuming alive");
                    return true;
                }
                None => debug!("supervisor: no backend process"),
            }
            m.handle = None;

            let stable = m.launched_at.take().is_some_and(|t| t.elapsed() >= self.policy.stable_after);
            if stable && m.restarts > 0 {
                info!(restarts = m.restarts, "supervisor: backend had been stable, restart budget reset");
                m.restarts = 0;
            }

            if m.restarts >= self.policy.max_restarts {
                m.gave_up = true;
                m.last_error = Some(format!("restart budget exhausted after {} restarts", m.restarts));
                error!(restarts = m.restarts, "supervisor: restart budget exhausted, giving up");
                (m.child.take(), None)
            } else {
                m.restarts += 1;
                (m.child.take(), Some(m.restarts))
            }
        };

        // 2) Reap the stale child
        if let Some(child) = stale {
            terminate(child, self.spec.stop_grace).await;
        }
        let Some(attempt) = attempt else {
            return false;
        };

        // 3) Back off with the lifecycle lock released, so shutdown is not held up
        drop(lc);
        let delay = self.policy.delay_for(attempt);
        info!(attempt, delay_ms = delay.as_millis() as u64, "supervisor: restarting backend");
        sleep(delay).await;

        // 4) Relaunch, unless shutdown or start got there first
        let _lc = self.lifecycle.lock().await;
        {
            let m = self.managed.lock().await;
            if m.stopped {
                debug!(attempt, "supervisor: stopped during backoff, not relaunching");
                return false;
            }
            if m.handle.is_some() {
                return true;
            }
        }
        match self.launch().await {
            Ok(h) => {
                info!(generation = h.generation, pid=?h.pid, "supervisor: backend restarted");
                true
            }
            Err(e) => {
                error!(error=%e, attempt, "supervisor: restart failed");
                false
            }
        }
    }

    pub async fn run(&self, poll_every: Duration, cancel: CancellationToken) {
        info!(program=%self.spec.program, "supervisor: started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(poll_every) => {
                    self.check_once().await;
                }
            }
        }
        info!("supervisor: stopped");
    }

    pub async fn shutdown(&self) {
        let _lc = self.lifecycle.lock().await;
        let child = {
            let mut m = self.managed.lock().await;
            m.stopped = true;
            m.handle = None;
            m.child.take()
        };
        if let Some(child) = child {
            terminate(child, self.spec.stop_grace).await;
            info!("supervisor: backend stopped");
        }
    }

    pub async fn health(&self) -> SupervisorHealth {
        let m = self.managed.lock().await;
        SupervisorHealth {
            running: m.handle.is_some(),
            pid: m.handle.as_ref().and_then(|h| h.pid),
            port: self.spec.port,
            restarts: m.restarts,
            generation: m.generation,
            gave_up: m.gave_up,
            last_error: m.last_error.clone(),
        }
    }
}

/// SIGTERM, then kill after `grace`.
async fn terminate(mut child: Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        // SAFETY: pid is our own child and has not been reaped yet (id() is Some).
        unsafe {
            libc::kill(pid as libc::pid_t, libc::SIGTERM);
        }
    }

    match timeout(grace, child.wait()).await {
        Ok(Ok(status)) => debug!(status=%status, "supervisor: backend reaped"),
        Ok(Err(e)) => warn!(error=%e, "supervisor: wait on backend failed"),
        Err(_) => {
            warn!("supervisor: backend ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                warn!(error=%e, "supervisor: kill failed");
            }
        }
    }
}
