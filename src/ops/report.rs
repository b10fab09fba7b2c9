//! Backlog reporting and on-demand renew

use crate::common::{timestamp_now, Error, Result};
use crate::maintenance::{MaintenanceAgent, RenewReport};
use crate::registry::model::{MaintenanceTarget, MaintenanceTask, TargetKind};
use crate::registry::MaintenanceBacklog;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, Default)]
pub struct BacklogReport {
    pub tasks: Vec<MaintenanceTask>,
    /// Task count per target name
    pub by_target: BTreeMap<String, usize>,
}

pub fn backlog_report(
    backlog: &MaintenanceBacklog,
    target: Option<TargetKind>,
) -> Result<BacklogReport> {
    let tasks = match target {
        Some(kind) => backlog.list_by_target(kind)?,
        None => backlog.list()?,
    };
    let mut by_target = BTreeMap::new();
    for task in &tasks {
        *by_target.entry(task.target.kind().to_string()).or_insert(0) += 1;
    }
    Ok(BacklogReport { tasks, by_target })
}

/// Run one renew cycle now, off the async runtime.
pub async fn renew_now(agent: &MaintenanceAgent) -> Result<RenewReport> {
    let agent = agent.clone();
    tokio::task::spawn_blocking(move || agent.renew_at(timestamp_now()))
        .await
        .map_err(|e| Error::Other(format!("renew task failed: {}", e)))?
}

/// `YYYY-MM-DD HH:MM:SS` in UTC, or the raw number if out of range.
pub fn format_timestamp(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ts.to_string())
}

fn disks(target: &MaintenanceTarget) -> String {
    match target {
        MaintenanceTarget::NodeMissing => "-".to_string(),
        MaintenanceTarget::DiskMissing { disks_to_reserve } => disks_to_reserve.join(","),
        MaintenanceTarget::DiskBroken { disks_to_replace } => disks_to_replace.join(","),
    }
}

impl fmt::Display for BacklogReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<24} {:<14} {:<20} DISKS", "HOSTNAME", "TARGET", "CREATED")?;
        for task in &self.tasks {
            writeln!(
                f,
                "{:<24} {:<14} {:<20} {}",
                task.hostname,
                task.target.kind(),
                format_timestamp(task.created_at),
                disks(&task.target)
            )?;
        }
        write!(f, "{} task(s)", self.tasks.len())?;
        for (target, count) in &self.by_target {
            write!(f, ", {} {}", count, target)?;
        }
        Ok(())
    }
}
