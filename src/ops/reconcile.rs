//! Boot-time host reconcile

use crate::common::Result;
use crate::devices::{DeviceFingerprintManager, DiskBackend, ReconcileReport};
use std::fmt::Write;

/// Remount known disks and recover lost slots, holding the host lock.
pub async fn reconcile_host<B: DiskBackend>(
    manager: &DeviceFingerprintManager<B>,
) -> Result<ReconcileReport> {
    let _guard = manager.lock_host().await?;
    let report = manager.reconcile().await?;
    tracing::info!(
        mounted = report.remount.mounted.len(),
        recovered = report.recovery.recovered.len(),
        still_lost = report.recovery.still_lost.len(),
        foreign = report.remount.foreign.len(),
        "host reconciled"
    );
    Ok(report)
}

/// Human-readable slot summary for the CLI.
pub fn render(report: &ReconcileReport) -> String {
    let mut out = String::new();
    match report.remount.layout {
        Some(layout) => {
            let _ = writeln!(
                out,
                "layout: version {} with {} slots",
                layout.config_version, layout.device_count
            );
        }
        None => out.push_str("layout: none (no fingerprint for this host)\n"),
    }
    for (slot, disk) in &report.remount.mounted {
        let _ = writeln!(out, "  slot {:>3}  {}  remounted", slot, disk.name);
    }
    for (slot, disk) in &report.recovery.recovered {
        let _ = writeln!(out, "  slot {:>3}  {}  recovered", slot, disk.name);
    }
    for slot in &report.recovery.still_lost {
        let _ = writeln!(out, "  slot {:>3}  -     LOST", slot);
    }
    for disk in &report.remount.foreign {
        let _ = writeln!(out, "  foreign disk {} (reclaim before reuse)", disk.name);
    }
    out
}
