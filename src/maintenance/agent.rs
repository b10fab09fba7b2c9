//! Maintenance agent: keeps the repair backlog in step with the registry
//!
//! Each renew cycle first re-derives every queued task from its node's
//! current state, then, if the backlog ended up empty, queues the first
//! waiting node that needs a repair. Tasks are never appended to; they are
//! recomputed from scratch every cycle. Whole cycles are serialized by a
//! maintenance-wide lock so an on-demand renew and the daemon never
//! interleave.

use crate::common::{AdvisoryLock, Daemon, MaintenanceConfig, RegistryConfig, Result};
use crate::maintenance::task::derive_task;
use crate::registry::model::{MaintenanceTask, NodeMode};
use crate::registry::{MaintenanceBacklog, NodeRegistry};

/// What one renew cycle did
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RenewReport {
    pub deadline: i64,
    /// Tasks deleted and reinserted with a fresh derivation
    pub refreshed: Vec<String>,
    /// Tasks dropped because the node no longer qualifies
    pub removed: Vec<String>,
    /// Task queued by the discovery phase
    pub inserted: Option<String>,
    /// Items skipped on transient errors
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct MaintenanceAgent {
    registry: NodeRegistry,
    backlog: MaintenanceBacklog,
    cycle_lock: AdvisoryLock,
    replication_time: i64,
}

impl MaintenanceAgent {
    pub fn new(
        registry: NodeRegistry,
        backlog: MaintenanceBacklog,
        cycle_lock: AdvisoryLock,
        config: &MaintenanceConfig,
    ) -> Self {
        Self {
            registry,
            backlog,
            cycle_lock,
            replication_time: config.replication_time().as_secs() as i64,
        }
    }

    pub fn from_config(registry: &RegistryConfig, maintenance: &MaintenanceConfig) -> Self {
        Self::new(
            NodeRegistry::from_config(registry),
            MaintenanceBacklog::from_config(registry),
            AdvisoryLock::new(registry.maintenance_lock_path(), registry.lock_options()),
            maintenance,
        )
    }

    pub fn backlog(&self) -> &MaintenanceBacklog {
        &self.backlog
    }

    /// Run one renew cycle as of `now`.
    pub fn renew_at(&self, now: i64) -> Result<RenewReport> {
        let _guard = self.cycle_lock.acquire()?;
        let mut report = RenewReport {
            deadline: now - self.replication_time,
            ..Default::default()
        };

        self.refresh(now, &mut report)?;
        if self.backlog.is_empty()? {
            self.discover(now, &mut report)?;
        }

        tracing::info!(
            deadline = report.deadline,
            refreshed = report.refreshed.len(),
            removed = report.removed.len(),
            inserted = report.inserted.as_deref().unwrap_or("-"),
            "backlog renewed"
        );
        Ok(report)
    }

    fn refresh(&self, now: i64, report: &mut RenewReport) -> Result<()> {
        for task in self.backlog.list()? {
            let hostname = task.hostname.clone();
            match self.refresh_one(task, now, report.deadline) {
                Ok(Some(_)) => report.refreshed.push(hostname),
                Ok(None) => {
                    tracing::info!(%hostname, "task removed, node no longer qualifies");
                    report.removed.push(hostname);
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(%hostname, "task refresh skipped: {}", e);
                    report.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn refresh_one(
        &self,
        old: MaintenanceTask,
        now: i64,
        deadline: i64,
    ) -> Result<Option<MaintenanceTask>> {
        let node = self.registry.get(&old.hostname)?;
        self.backlog.delete(&old.hostname)?;

        let Some(node) = node.filter(|n| n.mode == NodeMode::Waiting) else {
            return Ok(None);
        };
        let Some(mut fresh) = derive_task(&node, deadline, now) else {
            return Ok(None);
        };
        if fresh.target == old.target {
            fresh.created_at = old.created_at;
        }
        self.backlog.add(&fresh)?;
        Ok(Some(fresh))
    }

    fn discover(&self, now: i64, report: &mut RenewReport) -> Result<()> {
        let waiting = self.registry.query(|n| n.mode == NodeMode::Waiting)?;
        for node in &waiting {
            if let Some(task) = derive_task(node, report.deadline, now) {
                if self.backlog.add(&task)? {
                    tracing::info!(
                        hostname = %task.hostname,
                        target = %task.target.kind(),
                        "task queued"
                    );
                    report.inserted = Some(task.hostname);
                }
                break;
            }
        }
        Ok(())
    }
}

impl Daemon for MaintenanceAgent {
    fn name(&self) -> &'static str {
        "maintenance-agent"
    }

    async fn tick(&mut self) -> Result<()> {
        let agent = self.clone();
        tokio::task::spawn_blocking(move || agent.renew_at(crate::common::timestamp_now()))
            .await
            .map_err(|e| crate::Error::Other(format!("agent task failed: {}", e)))??;
        Ok(())
    }
}
