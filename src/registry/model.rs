//! Fleet records: node entries, specs, disk reports and repair tasks
//!
//! These are the shapes that cross the registry boundary. Reports are
//! validated here so the schedulers downstream only ever see well-formed
//! data.

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Liveness as last reported for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Alive,
    Unknown,
    Dead,
}

/// Lifecycle mode driven by the mode switcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    Service,
    Waiting,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeStatus::Alive => "alive",
            NodeStatus::Unknown => "unknown",
            NodeStatus::Dead => "dead",
        })
    }
}

impl FromStr for NodeStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "alive" => Ok(NodeStatus::Alive),
            "unknown" => Ok(NodeStatus::Unknown),
            "dead" => Ok(NodeStatus::Dead),
            other => Err(format!("unknown node status: {}", other)),
        }
    }
}

impl fmt::Display for NodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NodeMode::Service => "service",
            NodeMode::Waiting => "waiting",
        })
    }
}

impl FromStr for NodeMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "service" => Ok(NodeMode::Service),
            "waiting" => Ok(NodeMode::Waiting),
            other => Err(format!("unknown node mode: {}", other)),
        }
    }
}

/// Disks a node expects but cannot see
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingDisks {
    pub count: u32,
    /// When the disks were first noticed missing
    pub timestamp: i64,
}

/// One physical disk in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskRecord {
    #[serde(rename = "SN")]
    pub serial: String,
    pub timestamp: i64,
}

impl DiskRecord {
    pub fn new(serial: impl Into<String>, timestamp: i64) -> Self {
        Self {
            serial: serial.into(),
            timestamp,
        }
    }
}

/// Disk health as reported by a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskReport {
    #[serde(default)]
    pub missing: MissingDisks,
    #[serde(default)]
    pub broken: Vec<DiskRecord>,
    #[serde(default)]
    pub healthy: Vec<DiskRecord>,
}

impl DiskReport {
    /// No missing and no broken disks.
    pub fn is_clean(&self) -> bool {
        self.missing.count == 0 && self.broken.is_empty()
    }

    /// Reject reports that cannot describe a real machine.
    pub fn validate(&self) -> Result<()> {
        if self.missing.timestamp < 0 {
            return Err(Error::InvalidReport("missing.timestamp is negative".into()));
        }
        if self.missing.count > 0 && self.missing.timestamp == 0 {
            return Err(Error::InvalidReport(format!(
                "{} missing disks reported without a timestamp",
                self.missing.count
            )));
        }

        let mut healthy = HashSet::new();
        for disk in &self.healthy {
            check_record(disk)?;
            if !healthy.insert(disk.serial.as_str()) {
                return Err(Error::InvalidReport(format!(
                    "disk {} listed twice as healthy",
                    disk.serial
                )));
            }
        }

        let mut broken = HashSet::new();
        for disk in &self.broken {
            check_record(disk)?;
            if healthy.contains(disk.serial.as_str()) {
                return Err(Error::InvalidReport(format!(
                    "disk {} is both healthy and broken",
                    disk.serial
                )));
            }
            if !broken.insert(disk.serial.as_str()) {
                return Err(Error::InvalidReport(format!(
                    "disk {} listed twice as broken",
                    disk.serial
                )));
            }
        }
        Ok(())
    }
}

fn check_record(disk: &DiskRecord) -> Result<()> {
    if disk.serial.trim().is_empty() {
        return Err(Error::InvalidReport("disk with empty serial".into()));
    }
    if disk.timestamp < 0 {
        return Err(Error::InvalidReport(format!(
            "disk {} has a negative timestamp",
            disk.serial
        )));
    }
    Ok(())
}

/// Up/down state of one storage daemon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DaemonState {
    Up,
    Down,
}

/// Storage daemon name to state
pub type DaemonReport = BTreeMap<String, DaemonState>;

/// Registry row for one node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeEntry {
    pub hostname: String,
    pub status: NodeStatus,
    pub last_heartbeat: i64,
    pub disk_report: Option<DiskReport>,
    pub daemon_report: DaemonReport,
    pub mode: NodeMode,
    pub mode_switched_at: i64,
}

impl NodeEntry {
    /// A freshly registered node: in service, liveness not yet known.
    pub fn new(hostname: impl Into<String>, now: i64) -> Self {
        Self {
            hostname: hostname.into(),
            status: NodeStatus::Unknown,
            last_heartbeat: now,
            disk_report: None,
            daemon_report: DaemonReport::new(),
            mode: NodeMode::Service,
            mode_switched_at: now,
        }
    }
}

/// Provisioned hardware shape of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSpec {
    pub hostname: String,
    pub disk_count: u32,
    /// Bytes per disk
    pub disk_capacity: u64,
    pub updated_at: i64,
}

/// Inbound liveness and health report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    pub hostname: String,
    pub status: NodeStatus,
    pub timestamp: i64,
    #[serde(default)]
    pub disk_report: Option<DiskReport>,
    #[serde(default)]
    pub daemon_report: DaemonReport,
}

impl Heartbeat {
    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(Error::InvalidReport("heartbeat without hostname".into()));
        }
        if self.timestamp < 0 {
            return Err(Error::InvalidReport("heartbeat timestamp is negative".into()));
        }
        if let Some(report) = &self.disk_report {
            report.validate()?;
        }
        Ok(())
    }
}

/// What a repair has to do on a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaintenanceTarget {
    /// Whole node is gone
    NodeMissing,
    /// Disks vanished; the listed serials must not be reused
    DiskMissing {
        #[serde(rename = "disksToReserve")]
        disks_to_reserve: Vec<String>,
    },
    /// The listed serials are past their grace period and can be replaced
    DiskBroken {
        #[serde(rename = "disksToReplace")]
        disks_to_replace: Vec<String>,
    },
}

/// Discriminant of [`MaintenanceTarget`], for filtering
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    NodeMissing,
    DiskMissing,
    DiskBroken,
}

impl MaintenanceTarget {
    pub fn kind(&self) -> TargetKind {
        match self {
            MaintenanceTarget::NodeMissing => TargetKind::NodeMissing,
            MaintenanceTarget::DiskMissing { .. } => TargetKind::DiskMissing,
            MaintenanceTarget::DiskBroken { .. } => TargetKind::DiskBroken,
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TargetKind::NodeMissing => "node_missing",
            TargetKind::DiskMissing => "disk_missing",
            TargetKind::DiskBroken => "disk_broken",
        })
    }
}

impl FromStr for TargetKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "node_missing" => Ok(TargetKind::NodeMissing),
            "disk_missing" => Ok(TargetKind::DiskMissing),
            "disk_broken" => Ok(TargetKind::DiskBroken),
            other => Err(format!("unknown maintenance target: {}", other)),
        }
    }
}

/// Backlog entry, at most one per hostname
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceTask {
    pub hostname: String,
    pub target: MaintenanceTarget,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(broken: &[(&str, i64)], healthy: &[(&str, i64)]) -> DiskReport {
        DiskReport {
            missing: MissingDisks::default(),
            broken: broken.iter().map(|(s, t)| DiskRecord::new(*s, *t)).collect(),
            healthy: healthy.iter().map(|(s, t)| DiskRecord::new(*s, *t)).collect(),
        }
    }

    #[test]
    fn test_report_wire_shape() {
        let json = r#"{
            "missing": {"count": 1, "timestamp": 1700000000},
            "broken": [{"SN": "WD-1", "timestamp": 1700000100}],
            "healthy": [{"SN": "WD-2", "timestamp": 1700000000}]
        }"#;
        let parsed: DiskReport = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.missing.count, 1);
        assert_eq!(parsed.broken[0].serial, "WD-1");
        parsed.validate().unwrap();

        // Omitted sections default to empty
        let bare: DiskReport = serde_json::from_str("{}").unwrap();
        assert!(bare.is_clean());
    }

    #[test]
    fn test_report_validation() {
        assert!(report(&[("A", 1)], &[("B", 1)]).validate().is_ok());
        assert!(report(&[("A", 1)], &[("A", 1)]).validate().is_err());
        assert!(report(&[("", 1)], &[]).validate().is_err());
        assert!(report(&[], &[("B", -4)]).validate().is_err());

        let mut undated = DiskReport::default();
        undated.missing.count = 2;
        assert!(matches!(undated.validate(), Err(Error::InvalidReport(_))));
    }

    #[test]
    fn test_enums_are_closed() {
        assert_eq!("waiting".parse::<NodeMode>().unwrap(), NodeMode::Waiting);
        assert!("maintenance".parse::<NodeMode>().is_err());
        assert!(serde_json::from_str::<NodeStatus>("\"zombie\"").is_err());
        assert_eq!(
            "disk_broken".parse::<TargetKind>().unwrap(),
            TargetKind::DiskBroken
        );
    }

    #[test]
    fn test_task_survives_bincode() {
        let task = MaintenanceTask {
            hostname: "storage-01".into(),
            target: MaintenanceTarget::DiskBroken {
                disks_to_replace: vec!["1".into(), "2".into()],
            },
            created_at: 42,
        };
        let bytes = bincode::serialize(&task).unwrap();
        let back: MaintenanceTask = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, task);
        assert_eq!(back.target.kind(), TargetKind::DiskBroken);
    }

    #[test]
    fn test_heartbeat_validation() {
        let hb: Heartbeat = serde_json::from_str(
            r#"{"hostname": "storage-01", "status": "alive", "timestamp": 10}"#,
        )
        .unwrap();
        hb.validate().unwrap();
        assert!(hb.disk_report.is_none());

        let nameless = Heartbeat {
            hostname: " ".into(),
            ..hb
        };
        assert!(nameless.validate().is_err());
    }
}
