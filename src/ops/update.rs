//! Apply a staged configuration update
//!
//! The staged directory is what a peer pushed: `metadata/` carrying a
//! `config_version` file, and optionally `scripts/`. Only a strictly newer
//! version is adopted, so the command can be repeated freely.

use crate::common::utils::{clear_dir, copy_tree};
use crate::common::{Error, Result, ServiceSpec};
use crate::devices::bundle::replace_keeping;
use crate::devices::{BumpOutcome, BundleSources, DeviceFingerprintManager, DiskBackend, ReconcileReport};
use crate::sync::metadata::{MetadataDir, STAGED_METADATA, STAGED_SCRIPTS, VERSION_FILE};
use crate::sync::services::{restart_all, ServiceSupervisor};
use std::path::Path;

#[derive(Debug, Clone)]
pub enum UpdateOutcome {
    /// Local configuration is as new or newer; nothing changed
    UpToDate { local: u64, staged: u64 },
    Applied {
        from: Option<u64>,
        to: u64,
        bump: BumpOutcome,
        /// Reconcile run for slots the bump could not stamp
        recovery: Option<ReconcileReport>,
    },
}

/// Adopt the configuration staged under `staged` if it is newer.
pub async fn apply_update<B, S>(
    staged: &Path,
    manager: &DeviceFingerprintManager<B>,
    services: &S,
    storage_services: &[ServiceSpec],
) -> Result<UpdateOutcome>
where
    B: DiskBackend,
    S: ServiceSupervisor,
{
    if !staged.join(STAGED_METADATA).is_dir() {
        return Err(Error::InvalidConfig(format!(
            "{} holds no staged metadata",
            staged.display()
        )));
    }
    let Some(new_version) = MetadataDir::staged(staged).version() else {
        return Err(Error::InvalidConfig(format!(
            "staged metadata in {} carries no config version",
            staged.display()
        )));
    };

    let _guard = manager.lock_host().await?;
    let sources = manager.bundle_sources();
    let local = MetadataDir::new(&sources.metadata_dir);
    let current = local.version();

    if let Some(current) = current.filter(|v| *v >= new_version) {
        tracing::info!(local = current, staged = new_version, "configuration up to date");
        return Ok(UpdateOutcome::UpToDate {
            local: current,
            staged: new_version,
        });
    }

    let files = install(staged, sources)?;
    local.set_version(new_version)?;
    tracing::info!(from = ?current, to = new_version, files, "configuration installed");

    let bump = manager.bump_config_version(new_version).await?;
    let recovery = if bump.not_updated.is_empty() {
        None
    } else {
        tracing::warn!(slots = ?bump.not_updated, "slots missed the bump, reconciling");
        match manager.reconcile().await {
            Ok(report) => Some(report),
            Err(e) => {
                tracing::error!("reconcile after bump failed: {}", e);
                None
            }
        }
    };

    restart_all(services, storage_services).await?;

    Ok(UpdateOutcome::Applied {
        from: current,
        to: new_version,
        bump,
        recovery,
    })
}

/// Replace local metadata and scripts with the staged copy.
///
/// Local entries matching the exclude list are kept and never overwritten.
/// The version file is left for the caller to write last.
fn install(staged: &Path, sources: &BundleSources) -> Result<u64> {
    let mut skip = sources.exclude.clone();
    skip.push(VERSION_FILE.to_string());

    replace_keeping(&sources.metadata_dir, &sources.exclude)?;
    let mut copied = copy_tree(&staged.join(STAGED_METADATA), &sources.metadata_dir, &skip)?;

    let scripts = staged.join(STAGED_SCRIPTS);
    if scripts.is_dir() {
        clear_dir(&sources.scripts_dir)?;
        copied += copy_tree(&scripts, &sources.scripts_dir, &[])?;
    }
    Ok(copied)
}
