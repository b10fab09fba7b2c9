//! Repair task derivation
//!
//! Pure functions of `(status, disk report, deadline)`. The deadline is
//! `now - replication_time`: a fault stamped at or before it has aged past
//! the re-replication grace period and can be acted on.

use crate::registry::model::{
    DiskReport, MaintenanceTarget, MaintenanceTask, NodeEntry, NodeStatus,
};

/// Decide what, if anything, a node needs repaired.
///
/// Checks run in priority order and the first decisive one wins: a dead
/// node needs whole-node repair, then missing disks, then broken disks.
pub fn compute_maintenance_task(
    status: NodeStatus,
    report: Option<&DiskReport>,
    deadline: i64,
) -> Option<MaintenanceTarget> {
    if status == NodeStatus::Dead {
        return Some(MaintenanceTarget::NodeMissing);
    }

    let report = report?;
    if report.missing.timestamp > deadline {
        return None;
    }

    if report.missing.count != 0 {
        return Some(MaintenanceTarget::DiskMissing {
            disks_to_reserve: compute_disks_to_reserve(report, deadline),
        });
    }

    if !report.broken.is_empty() {
        let disks_to_replace = compute_disks_to_replace(report, deadline);
        if disks_to_replace.is_empty() {
            return None;
        }
        return Some(MaintenanceTarget::DiskBroken { disks_to_replace });
    }

    None
}

/// Healthy disks, plus broken disks still inside their grace period.
pub fn compute_disks_to_reserve(report: &DiskReport, deadline: i64) -> Vec<String> {
    report
        .healthy
        .iter()
        .map(|disk| disk.serial.clone())
        .chain(
            report
                .broken
                .iter()
                .filter(|disk| disk.timestamp > deadline)
                .map(|disk| disk.serial.clone()),
        )
        .collect()
}

/// Broken disks whose grace period is over.
pub fn compute_disks_to_replace(report: &DiskReport, deadline: i64) -> Vec<String> {
    report
        .broken
        .iter()
        .filter(|disk| disk.timestamp <= deadline)
        .map(|disk| disk.serial.clone())
        .collect()
}

/// Task for `node` as of `deadline`, stamped `created_at`.
pub fn derive_task(node: &NodeEntry, deadline: i64, created_at: i64) -> Option<MaintenanceTask> {
    compute_maintenance_task(node.status, node.disk_report.as_ref(), deadline).map(|target| {
        MaintenanceTask {
            hostname: node.hostname.clone(),
            target,
            created_at,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::model::{DiskRecord, MissingDisks};

    fn disks(list: &[(&str, i64)]) -> Vec<DiskRecord> {
        list.iter().map(|(s, t)| DiskRecord::new(*s, *t)).collect()
    }

    fn report(missing: (u32, i64), broken: &[(&str, i64)], healthy: &[(&str, i64)]) -> DiskReport {
        DiskReport {
            missing: MissingDisks {
                count: missing.0,
                timestamp: missing.1,
            },
            broken: disks(broken),
            healthy: disks(healthy),
        }
    }

    #[test]
    fn test_disks_to_replace_scenario() {
        let r = report(
            (0, 0),
            &[("1", 500), ("2", 500), ("3", 600)],
            &[("4", 400)],
        );
        assert_eq!(compute_disks_to_replace(&r, 500), vec!["1", "2"]);
        assert_eq!(
            compute_maintenance_task(NodeStatus::Alive, Some(&r), 500),
            Some(MaintenanceTarget::DiskBroken {
                disks_to_replace: vec!["1".into(), "2".into()]
            })
        );
    }

    #[test]
    fn test_dead_dominates_everything() {
        let r = report((2, 100), &[("1", 100)], &[]);
        assert_eq!(
            compute_maintenance_task(NodeStatus::Dead, Some(&r), 500),
            Some(MaintenanceTarget::NodeMissing)
        );
        // Even without any report
        assert_eq!(
            compute_maintenance_task(NodeStatus::Dead, None, 500),
            Some(MaintenanceTarget::NodeMissing)
        );
    }

    #[test]
    fn test_missing_deadline_boundary_is_inclusive() {
        let deadline = 1000;
        let due = report((1, deadline), &[], &[("H", 1)]);
        assert!(matches!(
            compute_maintenance_task(NodeStatus::Alive, Some(&due), deadline),
            Some(MaintenanceTarget::DiskMissing { .. })
        ));

        let early = report((1, deadline + 1), &[], &[("H", 1)]);
        assert_eq!(
            compute_maintenance_task(NodeStatus::Alive, Some(&early), deadline),
            None
        );
    }

    #[test]
    fn test_missing_reserves_healthy_and_fresh_broken() {
        let r = report((1, 100), &[("old", 200), ("fresh", 900)], &[("h1", 50), ("h2", 60)]);
        assert_eq!(
            compute_maintenance_task(NodeStatus::Alive, Some(&r), 500),
            Some(MaintenanceTarget::DiskMissing {
                disks_to_reserve: vec!["h1".into(), "h2".into(), "fresh".into()]
            })
        );
    }

    #[test]
    fn test_missing_dominates_broken() {
        let r = report((1, 100), &[("1", 100)], &[]);
        assert!(matches!(
            compute_maintenance_task(NodeStatus::Unknown, Some(&r), 500),
            Some(MaintenanceTarget::DiskMissing { .. })
        ));
    }

    #[test]
    fn test_broken_not_yet_due_yields_nothing() {
        let r = report((0, 0), &[("1", 600)], &[]);
        assert_eq!(compute_maintenance_task(NodeStatus::Alive, Some(&r), 500), None);
    }

    #[test]
    fn test_healthy_or_absent_report_yields_nothing() {
        let r = report((0, 0), &[], &[("1", 1)]);
        assert_eq!(compute_maintenance_task(NodeStatus::Alive, Some(&r), 500), None);
        assert_eq!(compute_maintenance_task(NodeStatus::Alive, None, 500), None);
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let r = report((0, 0), &[("1", 10), ("2", 20)], &[("3", 5)]);
        let first = compute_maintenance_task(NodeStatus::Alive, Some(&r), 15);
        for _ in 0..10 {
            assert_eq!(compute_maintenance_task(NodeStatus::Alive, Some(&r), 15), first);
        }
    }
}
