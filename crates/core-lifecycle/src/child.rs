//! The native client run as a child process.
//!
//! State is derived rather than reported: a live child whose proxy port
//! accepts connections is `Running`, a live child that does not answer yet is
//! `Starting`, and an exited child is `Stopped` or `Degraded` depending on
//! its exit status.

use crate::config::ServiceConfig;
use crate::error::{Result, ServiceError};
use crate::service::BackgroundService;
use crate::state::BackgroundState;
use std::net::{TcpStream, ToSocketAddrs};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Default)]
struct Inner {
    child: Option<Child>,
    started: bool,
    last_exit: Option<ExitStatus>,
}

pub struct ChildProcessService {
    config: ServiceConfig,
    inner: Mutex<Inner>,
}

impl ChildProcessService {
    pub fn new(config: ServiceConfig) -> Self {
        Self { config, inner: Mutex::new(Inner::default()) }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn probe(&self) -> bool {
        let addrs = match self.config.listen_on_tcp.to_socket_addrs() {
            Ok(a) => a,
            Err(e) => {
                debug!(addr = %self.config.listen_on_tcp, error = %e, "probe address does not resolve");
                return false;
            }
        };
        addrs.into_iter().any(|a| TcpStream::connect_timeout(&a, PROBE_TIMEOUT).is_ok())
    }

    fn spawn_locked(&self, inner: &mut Inner) -> Result<()> {
        if let Some(child) = inner.child.as_mut() {
            if child.try_wait()?.is_none() {
                debug!(pid = child.id(), "service already running");
                return Ok(());
            }
        }
        std::fs::create_dir_all(&self.config.repo_dir)?;
        let args = self.config.args();
        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(ServiceError::Spawn)?;
        info!(pid = child.id(), program = %self.config.program.display(), args = args.len(), "service spawned");
        inner.child = Some(child);
        inner.started = true;
        inner.last_exit = None;
        Ok(())
    }
}

impl BackgroundService for ChildProcessService {
    fn startup(&self) -> Result<()> {
        let mut inner = self.lock();
        if inner.started && inner.child.is_some() {
            return Ok(());
        }
        info!(repo = %self.config.repo_dir.display(), "service startup");
        self.spawn_locked(&mut inner)
    }

    fn start(&self) -> Result<()> {
        let mut inner = self.lock();
        self.spawn_locked(&mut inner)
    }

    fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        let Some(mut child) = inner.child.take() else {
            return Ok(());
        };
        if child.try_wait()?.is_none() {
            if let Err(e) = child.kill() {
                warn!(pid = child.id(), error = %e, "kill failed");
            }
        }
        let status = child.wait()?;
        info!(%status, "service stopped");
        // a killed child is a requested stop, not a failure
        inner.last_exit = None;
        Ok(())
    }

    fn state(&self) -> Result<BackgroundState> {
        let mut guard = self.lock();
        let inner = &mut *guard;
        let exited = match inner.child.as_mut() {
            Some(child) => child.try_wait().map_err(|e| ServiceError::Query(e.to_string()))?,
            None => {
                return Ok(match (inner.started, inner.last_exit) {
                    (false, _) => BackgroundState::Created,
                    (true, Some(s)) if !s.success() => BackgroundState::Degraded,
                    (true, _) => BackgroundState::Stopped,
                });
            }
        };
        match exited {
            Some(status) => {
                warn!(%status, "service exited on its own");
                inner.child = None;
                inner.last_exit = Some(status);
                Ok(if status.success() { BackgroundState::Stopped } else { BackgroundState::Degraded })
            }
            None if self.probe() => Ok(BackgroundState::Running),
            None => Ok(BackgroundState::Starting),
        }
    }
}

impl Drop for ChildProcessService {
    fn drop(&mut self) {
        if let Some(mut child) = self.lock().child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Instant;

    fn shell(script: &str, listen: String, repo: &std::path::Path) -> ServiceConfig {
        ServiceConfig {
            program: "sh".into(),
            // generated flags become positional parameters of the script
            extra_args: vec!["-c".into(), script.into()],
            repo_dir: repo.to_path_buf(),
            listen_on_tcp: listen,
            ..ServiceConfig::default()
        }
    }

    fn wait_for(svc: &ChildProcessService, want: BackgroundState) -> BackgroundState {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let s = svc.state().unwrap();
            if s == want || Instant::now() > deadline {
                return s;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }

    #[test]
    fn lifecycle_follows_child_and_probe() {
        let dir = std::env::temp_dir().join(format!("svc-test-{}", std::process::id()));
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let svc = ChildProcessService::new(shell("sleep 30", addr, &dir));

        assert_eq!(svc.state().unwrap(), BackgroundState::Created);
        svc.startup().unwrap();
        svc.startup().unwrap();
        assert_eq!(svc.state().unwrap(), BackgroundState::Running);
        assert!(dir.is_dir());

        svc.stop().unwrap();
        assert_eq!(svc.state().unwrap(), BackgroundState::Stopped);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn unanswered_probe_is_starting() {
        let dir = std::env::temp_dir().join(format!("svc-test-probe-{}", std::process::id()));
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };
        let svc = ChildProcessService::new(shell("sleep 30", format!("127.0.0.1:{port}"), &dir));
        svc.start().unwrap();
        assert_eq!(svc.state().unwrap(), BackgroundState::Starting);
        svc.stop().unwrap();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn failing_child_is_degraded() {
        let dir = std::env::temp_dir().join(format!("svc-test-fail-{}", std::process::id()));
        let svc = ChildProcessService::new(shell("exit 3", "127.0.0.1:9".into(), &dir));
        svc.start().unwrap();
        assert_eq!(wait_for(&svc, BackgroundState::Degraded), BackgroundState::Degraded);
        // stays degraded once reaped
        assert_eq!(svc.state().unwrap(), BackgroundState::Degraded);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_program_fails_to_spawn() {
        let dir = std::env::temp_dir().join(format!("svc-test-missing-{}", std::process::id()));
        let cfg = ServiceConfig {
            program: "/nonexistent/ouinet-client".into(),
            repo_dir: dir.clone(),
            ..ServiceConfig::default()
        };
        let svc = ChildProcessService::new(cfg);
        assert!(matches!(svc.start(), Err(ServiceError::Spawn(_))));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
