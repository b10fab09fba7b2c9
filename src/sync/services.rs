//! Local support services the sync daemon keeps alive

use crate::common::exec::{execute, execute_unchecked};
use crate::common::{Result, ServiceSpec};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;

pub trait ServiceSupervisor {
    fn is_running(&self, service: &ServiceSpec) -> impl Future<Output = Result<bool>>;

    fn restart(&self, service: &ServiceSpec) -> impl Future<Output = Result<()>>;
}

/// `pgrep -x` to check, the configured shell command to restart
#[derive(Debug, Clone)]
pub struct SystemServices {
    timeout: Duration,
}

impl SystemServices {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ServiceSupervisor for SystemServices {
    async fn is_running(&self, service: &ServiceSpec) -> Result<bool> {
        let output = execute_unchecked(
            Command::new("pgrep").args(["-x", &service.name]),
            self.timeout,
        )
        .await?;
        Ok(output.status.success())
    }

    async fn restart(&self, service: &ServiceSpec) -> Result<()> {
        execute(
            Command::new("sh").args(["-c", &service.restart]),
            self.timeout,
        )
        .await?;
        Ok(())
    }
}

/// Restart every service in `services` that is not running.
///
/// Returns the names restarted. Failures are logged, never raised.
pub async fn ensure_running<S: ServiceSupervisor>(
    supervisor: &S,
    services: &[ServiceSpec],
) -> Vec<String> {
    let mut restarted = Vec::new();
    for service in services {
        match supervisor.is_running(service).await {
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(service = %service.name, "status check failed: {}", e);
                continue;
            }
        }
        match supervisor.restart(service).await {
            Ok(()) => {
                tracing::info!(service = %service.name, "service was down, restarted");
                restarted.push(service.name.clone());
            }
            Err(e) => tracing::error!(service = %service.name, "restart failed: {}", e),
        }
    }
    restarted
}

/// Restart every service in `services` unconditionally.
pub async fn restart_all<S: ServiceSupervisor>(supervisor: &S, services: &[ServiceSpec]) -> Result<()> {
    for service in services {
        supervisor.restart(service).await?;
        tracing::info!(service = %service.name, "service restarted");
    }
    Ok(())
}

#[derive(Debug, Default)]
struct FakeServiceState {
    running: BTreeSet<String>,
    restarts: Vec<String>,
    broken: BTreeSet<String>,
}

/// In-memory supervisor; a restart marks the service running.
#[derive(Debug, Clone, Default)]
pub struct FakeServices {
    state: Arc<Mutex<FakeServiceState>>,
}

impl FakeServices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_running(&self, name: &str, running: bool) {
        if let Ok(mut state) = self.state.lock() {
            if running {
                state.running.insert(name.to_string());
            } else {
                state.running.remove(name);
            }
        }
    }

    /// Make restarts of `name` fail.
    pub fn break_service(&self, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.broken.insert(name.to_string());
        }
    }

    pub fn restarts(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.restarts.clone())
            .unwrap_or_default()
    }
}

impl ServiceSupervisor for FakeServices {
    async fn is_running(&self, service: &ServiceSpec) -> Result<bool> {
        Ok(self
            .state
            .lock()
            .map(|s| s.running.contains(&service.name))
            .unwrap_or(false))
    }

    async fn restart(&self, service: &ServiceSpec) -> Result<()> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| crate::Error::Other("fake service state poisoned".into()))?;
        state.restarts.push(service.name.clone());
        if state.broken.contains(&service.name) {
            return Err(crate::Error::Other(format!("{} refuses to start", service.name)));
        }
        state.running.insert(service.name.clone());
        Ok(())
    }
}
