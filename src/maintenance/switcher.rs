//! Mode switcher: moves nodes between `service` and `waiting`
//!
//! A node leaves service when it is dead, has stopped heartbeating, has a
//! disk fault younger than the replication window, or already has a repair
//! due. It returns to service once its disk report is clean. Nodes without
//! a disk report are never moved on disk grounds. Only `mode` and
//! `mode_switched_at` are written.

use crate::common::{Daemon, MaintenanceConfig, Result};
use crate::maintenance::task::compute_maintenance_task;
use crate::registry::model::{NodeEntry, NodeMode, NodeStatus};
use crate::registry::NodeRegistry;
use std::fmt;

/// Why a node was taken out of service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitingReason {
    Dead,
    HeartbeatStale,
    RecentDiskFault,
    RepairDue,
}

impl fmt::Display for WaitingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WaitingReason::Dead => "node is dead",
            WaitingReason::HeartbeatStale => "heartbeat is stale",
            WaitingReason::RecentDiskFault => "disk fault inside replication window",
            WaitingReason::RepairDue => "maintenance task is due",
        })
    }
}

/// Outcome of evaluating one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    ToWaiting(WaitingReason),
    ToService,
}

/// Thresholds in seconds
#[derive(Debug, Clone, Copy)]
pub struct SwitchPolicy {
    pub replication_time: i64,
    pub refresh_time: i64,
}

impl From<&MaintenanceConfig> for SwitchPolicy {
    fn from(config: &MaintenanceConfig) -> Self {
        Self {
            replication_time: config.replication_time().as_secs() as i64,
            refresh_time: config.refresh_time().as_secs() as i64,
        }
    }
}

impl SwitchPolicy {
    /// Transition for `node` at `now`, if any.
    pub fn evaluate(&self, node: &NodeEntry, now: i64) -> Option<Transition> {
        match node.mode {
            NodeMode::Service => self.leave_service(node, now).map(Transition::ToWaiting),
            NodeMode::Waiting => {
                // Liveness status is deliberately not consulted here
                let report = node.disk_report.as_ref()?;
                report.is_clean().then_some(Transition::ToService)
            }
        }
    }

    fn leave_service(&self, node: &NodeEntry, now: i64) -> Option<WaitingReason> {
        if node.status == NodeStatus::Dead {
            return Some(WaitingReason::Dead);
        }
        if now - node.last_heartbeat > self.refresh_time {
            return Some(WaitingReason::HeartbeatStale);
        }

        let report = node.disk_report.as_ref()?;
        let window_start = now - self.replication_time;
        let recent_missing = report.missing.count > 0 && report.missing.timestamp > window_start;
        let recent_broken = report.broken.iter().any(|d| d.timestamp > window_start);
        if recent_missing || recent_broken {
            return Some(WaitingReason::RecentDiskFault);
        }

        compute_maintenance_task(node.status, Some(report), window_start)
            .map(|_| WaitingReason::RepairDue)
    }
}

/// Counts from one switcher tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SwitchSummary {
    pub examined: usize,
    pub to_waiting: Vec<String>,
    pub to_service: Vec<String>,
    pub failed: usize,
}

pub struct ModeSwitcher {
    registry: NodeRegistry,
    policy: SwitchPolicy,
}

impl ModeSwitcher {
    pub fn new(registry: NodeRegistry, config: &MaintenanceConfig) -> Self {
        Self {
            registry,
            policy: SwitchPolicy::from(config),
        }
    }

    /// One pass over the registry as of `now`.
    pub fn tick_at(&self, now: i64) -> Result<SwitchSummary> {
        let nodes = self.registry.list()?;
        let mut summary = SwitchSummary {
            examined: nodes.len(),
            ..Default::default()
        };

        for node in &nodes {
            let Some(transition) = self.policy.evaluate(node, now) else {
                continue;
            };
            let mode = match transition {
                Transition::ToWaiting(_) => NodeMode::Waiting,
                Transition::ToService => NodeMode::Service,
            };

            match self.registry.update_mode(&node.hostname, mode, now) {
                Ok(Some(_)) => {
                    match transition {
                        Transition::ToWaiting(reason) => {
                            tracing::info!(hostname = %node.hostname, %reason, "service -> waiting");
                            summary.to_waiting.push(node.hostname.clone());
                        }
                        Transition::ToService => {
                            tracing::info!(hostname = %node.hostname, "waiting -> service");
                            summary.to_service.push(node.hostname.clone());
                        }
                    }
                }
                // Deregistered between list and update
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(hostname = %node.hostname, "mode update skipped: {}", e);
                    summary.failed += 1;
                }
            }
        }

        Ok(summary)
    }
}

impl Daemon for ModeSwitcher {
    fn name(&self) -> &'static str {
        "mode-switcher"
    }

    async fn tick(&mut self) -> Result<()> {
        let registry = self.registry.clone();
        let policy = self.policy;
        let summary = tokio::task::spawn_blocking(move || {
            ModeSwitcher { registry, policy }.tick_at(crate::common::timestamp_now())
        })
        .await
        .map_err(|e| crate::Error::Other(format!("switcher task failed: {}", e)))??;

        tracing::debug!(
            examined = summary.examined,
            to_waiting = summary.to_waiting.len(),
            to_service = summary.to_service.len(),
            "switcher tick"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model::{DiskRecord, DiskReport, MissingDisks};

    const T: i64 = 1_000_000;

    fn policy() -> SwitchPolicy {
        SwitchPolicy {
            replication_time: 1000,
            refresh_time: 100,
        }
    }

    fn healthy_node() -> NodeEntry {
        NodeEntry {
            hostname: "storage-01".into(),
            status: NodeStatus::Alive,
            last_heartbeat: T - 1,
            disk_report: Some(DiskReport {
                missing: MissingDisks::default(),
                broken: vec![],
                healthy: vec![DiskRecord::new("A", T)],
            }),
            daemon_report: Default::default(),
            mode: NodeMode::Service,
            mode_switched_at: 0,
        }
    }

    #[test]
    fn test_fresh_heartbeat_stays_in_service() {
        assert_eq!(policy().evaluate(&healthy_node(), T), None);
    }

    #[test]
    fn test_stale_heartbeat_goes_waiting() {
        let node = NodeEntry {
            last_heartbeat: T - 200,
            ..healthy_node()
        };
        assert_eq!(
            policy().evaluate(&node, T),
            Some(Transition::ToWaiting(WaitingReason::HeartbeatStale))
        );
    }

    #[test]
    fn test_policy_from_config_thresholds() {
        let config = MaintenanceConfig {
            replication_time_secs: 1000,
            refresh_time_secs: 100,
            daemon_sleep_secs: 5,
        };
        let policy = SwitchPolicy::from(&config);
        assert_eq!(policy.refresh_time, 100);
        assert_eq!(policy.replication_time, 1000);

        let node = NodeEntry {
            last_heartbeat: T - 101,
            ..healthy_node()
        };
        assert!(policy.evaluate(&node, T).is_some());
        let node = NodeEntry {
            last_heartbeat: T - 100,
            ..healthy_node()
        };
        assert_eq!(policy.evaluate(&node, T), None);
    }

    #[test]
    fn test_dead_wins_first() {
        let node = NodeEntry {
            status: NodeStatus::Dead,
            last_heartbeat: T - 200,
            ..healthy_node()
        };
        assert_eq!(
            policy().evaluate(&node, T),
            Some(Transition::ToWaiting(WaitingReason::Dead))
        );
    }

    #[test]
    fn test_recent_broken_disk_goes_waiting() {
        let mut node = healthy_node();
        if let Some(report) = node.disk_report.as_mut() {
            report.broken.push(DiskRecord::new("B", T - 10));
        }
        assert_eq!(
            policy().evaluate(&node, T),
            Some(Transition::ToWaiting(WaitingReason::RecentDiskFault))
        );
    }

    #[test]
    fn test_old_fault_with_repair_due_goes_waiting() {
        let mut node = healthy_node();
        if let Some(report) = node.disk_report.as_mut() {
            report.broken.push(DiskRecord::new("B", T - 5000));
        }
        assert_eq!(
            policy().evaluate(&node, T),
            Some(Transition::ToWaiting(WaitingReason::RepairDue))
        );
    }

    #[test]
    fn test_missing_report_is_left_alone() {
        let node = NodeEntry {
            disk_report: None,
            ..healthy_node()
        };
        assert_eq!(policy().evaluate(&node, T), None);

        let waiting = NodeEntry {
            mode: NodeMode::Waiting,
            disk_report: None,
            ..healthy_node()
        };
        assert_eq!(policy().evaluate(&waiting, T), None);
    }

    #[test]
    fn test_clean_report_returns_to_service_whatever_the_status() {
        let waiting = NodeEntry {
            mode: NodeMode::Waiting,
            status: NodeStatus::Dead,
            ..healthy_node()
        };
        assert_eq!(policy().evaluate(&waiting, T), Some(Transition::ToService));

        let mut faulty = NodeEntry {
            mode: NodeMode::Waiting,
            ..healthy_node()
        };
        if let Some(report) = faulty.disk_report.as_mut() {
            report.missing = MissingDisks {
                count: 1,
                timestamp: T - 5,
            };
        }
        assert_eq!(policy().evaluate(&faulty, T), None);
    }
}
