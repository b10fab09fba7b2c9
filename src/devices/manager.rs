//! Device fingerprint manager
//!
//! Matches attached disks to logical device slots using the fingerprints
//! written on the disks themselves:
//!
//! - **remount**: mount every disk whose fingerprint is ours and current at
//!   its recorded slot; everything else is unused.
//! - **recover**: format unused disks into the slots nobody claimed.
//! - **bump**: stamp a new configuration version onto every disk we own.
//!
//! The newest own fingerprint defines the layout. Versions are compared as
//! integers, never by wall-clock time. A fingerprint written by another host
//! is never trusted and the disk is left alone until it is reclaimed.
//!
//! Nothing here takes the host lock; callers hold [`DeviceFingerprintManager::lock_host`]
//! around any mutating sequence.

use crate::common::{AdvisoryLock, DeviceConfig, Error, LockGuard, Result};
use crate::devices::backend::{Disk, DiskBackend};
use crate::devices::bundle::{self, BundleSources, Manifest};
use crate::devices::fingerprint::DiskFingerprint;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Slot layout as recorded by the newest own fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub config_version: u64,
    pub device_count: u32,
}

/// A disk and whatever fingerprint it carries
#[derive(Debug, Clone)]
pub struct ProbedDisk {
    pub disk: Disk,
    pub fingerprint: Option<DiskFingerprint>,
}

#[derive(Debug, Default, Clone)]
pub struct RemountOutcome {
    pub layout: Option<SlotLayout>,
    pub mounted: BTreeMap<u32, Disk>,
    /// Candidates for slot recovery: blank, stale or failed-to-mount own disks
    pub unused: Vec<Disk>,
    /// Disks fingerprinted by another host; reclaim before reuse
    pub foreign: Vec<Disk>,
    pub lost: BTreeSet<u32>,
}

#[derive(Debug, Default, Clone)]
pub struct RecoveryOutcome {
    pub recovered: BTreeMap<u32, Disk>,
    pub still_lost: BTreeSet<u32>,
}

#[derive(Debug, Default, Clone)]
pub struct BumpOutcome {
    pub config_version: u64,
    pub updated: BTreeSet<u32>,
    /// Slots that could not be stamped; hand these to recovery
    pub not_updated: BTreeSet<u32>,
    pub device_count: u32,
}

#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    pub remount: RemountOutcome,
    pub recovery: RecoveryOutcome,
}

pub struct DeviceFingerprintManager<B> {
    backend: B,
    hostname: String,
    prefix: String,
    node_root: PathBuf,
    scratch_root: PathBuf,
    host_lock: AdvisoryLock,
    bundle: BundleSources,
}

impl<B: DiskBackend> DeviceFingerprintManager<B> {
    pub fn new(
        backend: B,
        hostname: impl Into<String>,
        config: &DeviceConfig,
        bundle: BundleSources,
    ) -> Self {
        Self {
            backend,
            hostname: hostname.into(),
            prefix: config.device_prefix.clone(),
            node_root: config.node_root.clone(),
            scratch_root: config.scratch_root.clone(),
            host_lock: AdvisoryLock::new(&config.host_lock_path, config.host_lock_options()),
            bundle,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn bundle_sources(&self) -> &BundleSources {
        &self.bundle
    }

    /// Take the host-wide reconciliation lock.
    pub async fn lock_host(&self) -> Result<LockGuard> {
        self.host_lock.acquire_async().await.map_err(|e| match e {
            Error::LockTimeout { path, waited } => Error::Conflict(format!(
                "conflicting task in progress ({} held for {:?})",
                path.display(),
                waited
            )),
            other => other,
        })
    }

    pub fn slot_mountpoint(&self, slot: u32) -> PathBuf {
        self.node_root.join(format!("{}{}", self.prefix, slot))
    }

    fn slot_of(&self, mountpoint: &Path) -> Option<u32> {
        if mountpoint.parent()? != self.node_root {
            return None;
        }
        let name = mountpoint.file_name()?.to_str()?;
        name.strip_prefix(self.prefix.as_str())?
            .parse()
            .ok()
            .filter(|slot| *slot > 0)
    }

    fn is_own(&self, fp: &DiskFingerprint) -> bool {
        fp.hostname == self.hostname && fp.device_prefix == self.prefix
    }

    // === Discovery ===

    pub async fn discover_non_root_disks(&self) -> Result<Vec<Disk>> {
        let disks = self.backend.list_disks().await?;
        tracing::debug!(count = disks.len(), "non-root disks discovered");
        Ok(disks)
    }

    async fn find_disk(&self, name: &str) -> Result<Disk> {
        self.discover_non_root_disks()
            .await?
            .into_iter()
            .find(|d| d.name == name)
            .ok_or_else(|| Error::NotFound(format!("disk {}", name)))
    }

    /// Slot → disk name for every mounted device slot.
    pub async fn slot_mounts(&self) -> Result<BTreeMap<u32, String>> {
        Ok(self
            .backend
            .mounts()
            .await?
            .into_iter()
            .filter_map(|m| self.slot_of(&m.mountpoint).map(|slot| (slot, m.disk)))
            .collect())
    }

    async fn mountpoint_of(&self, disk: &Disk) -> Result<Option<PathBuf>> {
        Ok(self
            .backend
            .mounts()
            .await?
            .into_iter()
            .find(|m| m.disk == disk.name)
            .map(|m| m.mountpoint))
    }

    /// Run `f` against the root of `disk`'s filesystem, mounting it on a
    /// scratch mountpoint when it is not mounted already.
    async fn with_disk_root<T>(
        &self,
        disk: &Disk,
        read_only: bool,
        f: impl FnOnce(&Path) -> Result<T>,
    ) -> Result<T> {
        if let Some(mountpoint) = self.mountpoint_of(disk).await? {
            return f(&mountpoint);
        }

        let target = self.scratch_root.join(format!("probe-{}", disk.name));
        std::fs::create_dir_all(&target)?;
        self.backend.mount(disk, &target, read_only).await?;
        let result = f(&target);
        if let Err(e) = self.backend.unmount_lazy(&target).await {
            tracing::warn!(disk = %disk.name, "scratch unmount failed: {}", e);
        }
        if let Err(e) = std::fs::remove_dir(&target) {
            tracing::warn!(mountpoint = %target.display(), "scratch mountpoint not removed: {}", e);
        }
        result
    }

    /// Fingerprint on `disk`, or `None` if it has no readable one.
    pub async fn read_fingerprint(&self, disk: &Disk) -> Result<Option<DiskFingerprint>> {
        match self
            .with_disk_root(disk, true, |root| Ok(DiskFingerprint::read_from(root)))
            .await
        {
            Ok(fp) => Ok(fp),
            Err(e) => {
                tracing::debug!(disk = %disk.name, "no readable fingerprint: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn probe_all(&self) -> Result<Vec<ProbedDisk>> {
        let mut probed = Vec::new();
        for disk in self.discover_non_root_disks().await? {
            let fingerprint = self.read_fingerprint(&disk).await?;
            probed.push(ProbedDisk { disk, fingerprint });
        }
        Ok(probed)
    }

    /// Layout of the newest own fingerprint among `probed`.
    pub fn latest_layout(&self, probed: &[ProbedDisk]) -> Option<SlotLayout> {
        let own = probed
            .iter()
            .filter_map(|p| p.fingerprint.as_ref())
            .filter(|fp| self.is_own(fp));
        let version = own.clone().map(|fp| fp.config_version).max()?;
        let device_count = own
            .filter(|fp| fp.config_version == version)
            .map(|fp| fp.device_count)
            .max()?;
        Some(SlotLayout {
            config_version: version,
            device_count,
        })
    }

    async fn unmount_all_slots(&self) -> Result<()> {
        for slot in self.slot_mounts().await?.into_keys() {
            let target = self.slot_mountpoint(slot);
            if let Err(e) = self.backend.unmount_lazy(&target).await {
                tracing::warn!(slot, "slot unmount failed: {}", e);
            }
        }
        Ok(())
    }

    // === Remount / recover ===

    /// Mount every current own disk at its recorded slot.
    pub async fn remount_known_disks(&self) -> Result<RemountOutcome> {
        let probed = self.probe_all().await?;
        let layout = self.latest_layout(&probed);
        self.unmount_all_slots().await?;

        let mut outcome = RemountOutcome {
            layout,
            ..Default::default()
        };

        for ProbedDisk { disk, fingerprint } in probed {
            let Some(fp) = fingerprint else {
                outcome.unused.push(disk);
                continue;
            };
            if fp.hostname != self.hostname {
                tracing::info!(disk = %disk.name, owner = %fp.hostname, "foreign disk left alone");
                outcome.foreign.push(disk);
                continue;
            }

            let current = layout.is_some_and(|l| {
                fp.device_prefix == self.prefix
                    && fp.config_version == l.config_version
                    && fp.device_slot <= l.device_count
            });
            if !current || outcome.mounted.contains_key(&fp.device_slot) {
                tracing::info!(
                    disk = %disk.name,
                    version = fp.config_version,
                    slot = fp.device_slot,
                    "stale or duplicate fingerprint, disk unused"
                );
                outcome.unused.push(disk);
                continue;
            }

            let target = self.slot_mountpoint(fp.device_slot);
            std::fs::create_dir_all(&target)?;
            match self.backend.mount(&disk, &target, false).await {
                Ok(()) => {
                    tracing::info!(disk = %disk.name, device = %fp.device_name(), "disk remounted");
                    outcome.mounted.insert(fp.device_slot, disk);
                }
                Err(e) => {
                    tracing::warn!(disk = %disk.name, device = %fp.device_name(), "remount failed: {}", e);
                    outcome.unused.push(disk);
                }
            }
        }

        if let Some(layout) = layout {
            outcome.lost = (1..=layout.device_count)
                .filter(|slot| !outcome.mounted.contains_key(slot))
                .collect();
        }
        Ok(outcome)
    }

    /// Format unused disks into lost slots, lowest slot first.
    pub async fn recover_lost_slots(
        &self,
        unused: &[Disk],
        lost: &BTreeSet<u32>,
        layout: SlotLayout,
    ) -> Result<RecoveryOutcome> {
        let mut outcome = RecoveryOutcome {
            still_lost: lost.clone(),
            ..Default::default()
        };

        for disk in unused {
            let Some(&slot) = outcome.still_lost.iter().next() else {
                break;
            };
            match self.assign(disk, slot, layout).await {
                Ok(()) => {
                    tracing::info!(disk = %disk.name, slot, "slot recovered");
                    outcome.still_lost.remove(&slot);
                    outcome.recovered.insert(slot, disk.clone());
                }
                Err(e) => {
                    tracing::warn!(disk = %disk.name, slot, "slot recovery failed: {}", e);
                }
            }
        }

        if !outcome.still_lost.is_empty() {
            tracing::warn!(slots = ?outcome.still_lost, "slots remain lost");
        }
        Ok(outcome)
    }

    async fn assign(&self, disk: &Disk, slot: u32, layout: SlotLayout) -> Result<()> {
        if let Some(mountpoint) = self.mountpoint_of(disk).await? {
            self.backend.unmount_lazy(&mountpoint).await?;
        }
        self.backend.format(disk).await?;

        let target = self.slot_mountpoint(slot);
        std::fs::create_dir_all(&target)?;
        self.backend.mount(disk, &target, false).await?;

        let fp = DiskFingerprint {
            hostname: self.hostname.clone(),
            config_version: layout.config_version,
            device_count: layout.device_count,
            device_prefix: self.prefix.clone(),
            device_slot: slot,
        };
        if let Err(e) = self.write_identity(&fp, &target) {
            if let Err(clear) = DiskFingerprint::clear(&target) {
                tracing::warn!(slot, "partial fingerprint not cleared: {}", clear);
            }
            if let Err(unmount) = self.backend.unmount_lazy(&target).await {
                tracing::warn!(slot, "unmount after failed assignment: {}", unmount);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Bundle first, fingerprint last: a fingerprint implies a full bundle.
    fn write_identity(&self, fp: &DiskFingerprint, root: &Path) -> Result<()> {
        bundle::write_bundle(&self.bundle, fp.config_version, root)?;
        fp.write_to(root)
    }

    /// Remount known disks, then recover lost slots onto unused ones.
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let remount = self.remount_known_disks().await?;
        let Some(layout) = remount.layout else {
            tracing::warn!("no fingerprint for this host on any disk, nothing to reconcile");
            return Ok(ReconcileReport {
                remount,
                recovery: RecoveryOutcome::default(),
            });
        };

        let recovery = self
            .recover_lost_slots(&remount.unused, &remount.lost, layout)
            .await?;
        Ok(ReconcileReport { remount, recovery })
    }

    /// First-time slot creation: every disk is unused and every slot lost.
    ///
    /// Refuses when own fingerprints exist unless `force` is set. Foreign
    /// disks are only taken with `force`.
    pub async fn init(
        &self,
        device_count: u32,
        config_version: u64,
        force: bool,
    ) -> Result<RecoveryOutcome> {
        if device_count == 0 {
            return Err(Error::InvalidConfig("device count must be > 0".into()));
        }
        let probed = self.probe_all().await?;
        if probed.is_empty() {
            return Err(Error::NoDisks("nothing to initialize".into()));
        }
        if !force && self.latest_layout(&probed).is_some() {
            return Err(Error::Conflict(
                "disks already carry fingerprints for this host; reconcile instead".into(),
            ));
        }

        self.unmount_all_slots().await?;
        let unused: Vec<Disk> = probed
            .into_iter()
            .filter(|p| {
                force
                    || p.fingerprint
                        .as_ref()
                        .map_or(true, |fp| fp.hostname == self.hostname)
            })
            .map(|p| p.disk)
            .collect();
        let lost = (1..=device_count).collect();
        self.recover_lost_slots(
            &unused,
            &lost,
            SlotLayout {
                config_version,
                device_count,
            },
        )
        .await
    }

    // === Version bump ===

    /// Stamp `new_version` onto every own disk, mounted or not.
    pub async fn bump_config_version(&self, new_version: u64) -> Result<BumpOutcome> {
        let mounts = self.slot_mounts().await?;
        let mut outcome = BumpOutcome {
            config_version: new_version,
            ..Default::default()
        };
        let mut failed = BTreeSet::new();

        for &slot in mounts.keys() {
            let target = self.slot_mountpoint(slot);
            let fp = DiskFingerprint::read_from(&target)
                .filter(|fp| self.is_own(fp) && fp.device_slot == slot);
            let Some(fp) = fp else {
                tracing::warn!(slot, "mounted slot has no matching fingerprint");
                failed.insert(slot);
                continue;
            };
            outcome.device_count = outcome.device_count.max(fp.device_count);
            let fresh = DiskFingerprint {
                config_version: new_version,
                ..fp
            };
            match self.write_identity(&fresh, &target) {
                Ok(()) => {
                    outcome.updated.insert(slot);
                }
                Err(e) => {
                    tracing::warn!(slot, "fingerprint rewrite failed: {}", e);
                    failed.insert(slot);
                }
            }
        }

        let mounted: BTreeSet<&String> = mounts.values().collect();
        for disk in self.discover_non_root_disks().await? {
            if mounted.contains(&disk.name) {
                continue;
            }
            let Some(fp) = self.read_fingerprint(&disk).await? else {
                continue;
            };
            let slot = fp.device_slot;
            if !self.is_own(&fp)
                || fp.config_version >= new_version
                || outcome.updated.contains(&slot)
                || failed.contains(&slot)
            {
                continue;
            }
            outcome.device_count = outcome.device_count.max(fp.device_count);
            let fresh = DiskFingerprint {
                config_version: new_version,
                ..fp
            };
            match self
                .with_disk_root(&disk, false, |root| self.write_identity(&fresh, root))
                .await
            {
                Ok(()) => {
                    tracing::info!(disk = %disk.name, slot, "unmounted disk stamped");
                    outcome.updated.insert(slot);
                }
                Err(e) => tracing::warn!(disk = %disk.name, slot, "unmounted disk not stamped: {}", e),
            }
        }

        outcome.not_updated = (1..=outcome.device_count)
            .filter(|slot| !outcome.updated.contains(slot))
            .chain(failed)
            .collect();
        tracing::info!(
            version = new_version,
            updated = outcome.updated.len(),
            not_updated = ?outcome.not_updated,
            "configuration version bumped"
        );
        Ok(outcome)
    }

    // === Disaster bundle ===

    /// Rewrite the disaster bundle on `disk` from local metadata.
    pub async fn dump_disaster_bundle(&self, disk_name: &str) -> Result<Manifest> {
        let disk = self.find_disk(disk_name).await?;
        let fp = self
            .read_fingerprint(&disk)
            .await?
            .filter(|fp| self.is_own(fp))
            .ok_or_else(|| Error::NotFound(format!("own fingerprint on {}", disk_name)))?;
        self.with_disk_root(&disk, false, |root| {
            bundle::write_bundle(&self.bundle, fp.config_version, root)
        })
        .await
    }

    /// Verify the bundle on `disk` and install it locally.
    pub async fn load_disaster_bundle(&self, disk_name: &str) -> Result<Manifest> {
        let disk = self.find_disk(disk_name).await?;
        self.with_disk_root(&disk, true, |root| bundle::load_bundle(root, &self.bundle))
            .await
    }

    /// Install the bundle of the highest-version own disk that verifies.
    pub async fn restore(&self) -> Result<(Disk, Manifest)> {
        let mut candidates: Vec<(Disk, DiskFingerprint)> = self
            .probe_all()
            .await?
            .into_iter()
            .filter_map(|p| p.fingerprint.map(|fp| (p.disk, fp)))
            .filter(|(_, fp)| self.is_own(fp))
            .collect();
        candidates.sort_by(|a, b| b.1.config_version.cmp(&a.1.config_version));

        for (disk, fp) in candidates {
            match self
                .with_disk_root(&disk, true, |root| bundle::load_bundle(root, &self.bundle))
                .await
            {
                Ok(manifest) => {
                    tracing::info!(disk = %disk.name, version = fp.config_version, "restored from disk");
                    return Ok((disk, manifest));
                }
                Err(e) => tracing::warn!(disk = %disk.name, "bundle unusable: {}", e),
            }
        }
        Err(Error::NotFound("no disk carries a verifiable bundle".into()))
    }

    /// Wipe fingerprint and bundle from a disk that is not serving a slot.
    pub async fn reclaim(&self, disk_name: &str) -> Result<()> {
        let disk = self.find_disk(disk_name).await?;
        if let Some((slot, _)) = self
            .slot_mounts()
            .await?
            .into_iter()
            .find(|(_, name)| *name == disk.name)
        {
            return Err(Error::Conflict(format!(
                "{} is serving {}{}",
                disk.name, self.prefix, slot
            )));
        }
        self.with_disk_root(&disk, false, |root| {
            DiskFingerprint::clear(root)?;
            bundle::clear_bundle(root)
        })
        .await?;
        tracing::info!(disk = %disk.name, "disk reclaimed");
        Ok(())
    }

    // === Health ===

    /// Probe every attached disk; lazily unmount unhealthy ones from their slots.
    ///
    /// Returns the fenced slots. A failed probe skips that disk.
    pub async fn fence_unhealthy(&self) -> Result<Vec<u32>> {
        let mounts = self.slot_mounts().await?;
        let mut fenced = Vec::new();

        for disk in self.discover_non_root_disks().await? {
            match self.backend.is_healthy(&disk).await {
                Ok(true) => {}
                Ok(false) => {
                    let slots: Vec<u32> = mounts
                        .iter()
                        .filter(|(_, name)| **name == disk.name)
                        .map(|(slot, _)| *slot)
                        .collect();
                    for slot in slots {
                        match self.backend.unmount_lazy(&self.slot_mountpoint(slot)).await {
                            Ok(()) => {
                                tracing::warn!(disk = %disk.name, slot, "unhealthy disk fenced");
                                fenced.push(slot);
                            }
                            Err(e) => {
                                tracing::error!(disk = %disk.name, slot, "fencing failed: {}", e)
                            }
                        }
                    }
                }
                Err(e) => tracing::warn!(disk = %disk.name, "health probe failed: {}", e),
            }
        }
        Ok(fenced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::fake::FakeDisks;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Rig {
        _dir: TempDir,
        fake: FakeDisks,
        manager: DeviceFingerprintManager<FakeDisks>,
    }

    fn rig(hostname: &str) -> Rig {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        let fake = FakeDisks::new(base.join("hw"));
        let config = DeviceConfig {
            node_root: base.join("srv/node"),
            scratch_root: base.join("scratch"),
            device_prefix: "sdb".into(),
            host_lock_path: base.join("host.lock"),
            host_lock_retries: 1,
            host_lock_retry_delay_ms: 10,
            ..DeviceConfig::default()
        };
        let metadata_dir = base.join("etc/ring");
        std::fs::create_dir_all(&metadata_dir).unwrap();
        std::fs::write(metadata_dir.join("object.ring.gz"), b"ring").unwrap();
        let sources = BundleSources {
            metadata_dir,
            scripts_dir: base.join("scripts"),
            exclude: vec!["cert*".into()],
        };
        let manager = DeviceFingerprintManager::new(fake.clone(), hostname, &config, sources);
        Rig {
            _dir: dir,
            fake,
            manager,
        }
    }

    fn fp_on(rig: &Rig, disk: &str) -> Option<DiskFingerprint> {
        DiskFingerprint::read_from(&rig.fake.disk_dir(disk))
    }

    #[tokio::test]
    async fn test_init_assigns_slots_in_order() {
        let rig = rig("storage-01");
        for (name, sn) in [("sdc", "C"), ("sdd", "D"), ("sde", "E")] {
            rig.fake.add_disk(name, sn).unwrap();
        }

        let outcome = rig.manager.init(3, 1, false).await.unwrap();
        assert!(outcome.still_lost.is_empty());
        assert_eq!(fp_on(&rig, "sdc").unwrap().device_slot, 1);
        assert_eq!(fp_on(&rig, "sde").unwrap().device_slot, 3);
        assert!(bundle::verify_bundle(&rig.fake.disk_dir("sdd")).is_ok());

        // A second init is refused
        let err = rig.manager.init(3, 1, false).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
    }

    #[tokio::test]
    async fn test_remount_classifies_disks() {
        let rig = rig("storage-01");
        for (name, sn) in [("sdc", "C"), ("sdd", "D")] {
            rig.fake.add_disk(name, sn).unwrap();
        }
        rig.manager.init(3, 5, false).await.unwrap();
        // Slot 3 never got a disk; add a blank one and a foreign one
        rig.fake.add_disk("sdf", "F").unwrap();
        rig.fake.add_disk("sdg", "G").unwrap();
        DiskFingerprint {
            hostname: "storage-99".into(),
            config_version: 9,
            device_count: 3,
            device_prefix: "sdb".into(),
            device_slot: 3,
        }
        .write_to(&rig.fake.disk_dir("sdg"))
        .unwrap();

        let outcome = rig.manager.remount_known_disks().await.unwrap();
        assert_eq!(
            outcome.layout,
            Some(SlotLayout {
                config_version: 5,
                device_count: 3
            })
        );
        assert_eq!(outcome.mounted.len(), 2);
        assert_eq!(outcome.unused, vec![Disk { name: "sdf".into(), serial: Some("F".into()) }]);
        assert_eq!(outcome.foreign.len(), 1);
        assert_eq!(outcome.lost, BTreeSet::from([3]));
    }

    #[tokio::test]
    async fn test_stale_fingerprint_is_unused() {
        let rig = rig("storage-01");
        rig.fake.add_disk("sdc", "C").unwrap();
        rig.fake.add_disk("sdd", "D").unwrap();
        rig.manager.init(2, 1, false).await.unwrap();

        // sdd falls behind a version
        rig.fake.remove_disk("sdd").unwrap();
        rig.manager.bump_config_version(2).await.unwrap();
        rig.fake.add_disk("sdd", "D").unwrap();
        // Pretend the unmounted-disk pass could not reach it
        DiskFingerprint {
            hostname: "storage-01".into(),
            config_version: 1,
            device_count: 2,
            device_prefix: "sdb".into(),
            device_slot: 2,
        }
        .write_to(&rig.fake.disk_dir("sdd"))
        .unwrap();

        let outcome = rig.manager.remount_known_disks().await.unwrap();
        assert_eq!(outcome.mounted.len(), 1);
        assert_eq!(outcome.unused.len(), 1);
        assert_eq!(outcome.lost, BTreeSet::from([2]));
    }

    #[tokio::test]
    async fn test_bump_then_remount_keeps_mapping() {
        let rig = rig("storage-01");
        for (name, sn) in [("sdc", "C"), ("sdd", "D"), ("sde", "E")] {
            rig.fake.add_disk(name, sn).unwrap();
        }
        rig.manager.init(3, 1, false).await.unwrap();
        let before = rig.manager.slot_mounts().await.unwrap();

        let bump = rig.manager.bump_config_version(2).await.unwrap();
        assert_eq!(bump.updated.len(), 3);
        assert!(bump.not_updated.is_empty());

        let outcome = rig.manager.remount_known_disks().await.unwrap();
        assert_eq!(outcome.layout.unwrap().config_version, 2);
        assert_eq!(rig.manager.slot_mounts().await.unwrap(), before);
        assert!(outcome.lost.is_empty());
    }

    #[tokio::test]
    async fn test_bump_reaches_unmounted_own_disks() {
        let rig = rig("storage-01");
        rig.fake.add_disk("sdc", "C").unwrap();
        rig.fake.add_disk("sdd", "D").unwrap();
        rig.manager.init(2, 1, false).await.unwrap();
        rig.manager
            .backend()
            .unmount_lazy(&rig.manager.slot_mountpoint(2))
            .await
            .unwrap();

        let bump = rig.manager.bump_config_version(3).await.unwrap();
        assert_eq!(bump.updated, BTreeSet::from([1, 2]));
        assert_eq!(fp_on(&rig, "sdd").unwrap().config_version, 3);
    }

    #[tokio::test]
    async fn test_scratch_mountpoint_removed_after_probe() {
        let rig = rig("storage-01");
        rig.fake.add_disk("sdc", "C").unwrap();

        let disks = rig.manager.discover_non_root_disks().await.unwrap();
        assert_eq!(rig.manager.read_fingerprint(&disks[0]).await.unwrap(), None);
        assert!(!rig.manager.scratch_root.join("probe-sdc").exists());
    }

    #[tokio::test]
    async fn test_recovery_failure_leaves_slot_lost() {
        let rig = rig("storage-01");
        rig.fake.add_disk("sdc", "C").unwrap();
        rig.fake.add_disk("sdd", "D").unwrap();
        rig.fake.fail_formats("sdc").unwrap();

        let outcome = rig.manager.init(2, 1, false).await.unwrap();
        // sdc failed, sdd took the lowest lost slot
        assert_eq!(outcome.recovered.keys().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(outcome.still_lost, BTreeSet::from([2]));
        assert!(fp_on(&rig, "sdc").is_none());
        assert_eq!(fp_on(&rig, "sdd").unwrap().device_slot, 1);
    }

    #[tokio::test]
    async fn test_reconcile_replaces_pulled_disk() {
        let rig = rig("storage-01");
        rig.fake.add_disk("sdc", "C").unwrap();
        rig.fake.add_disk("sdd", "D").unwrap();
        rig.manager.init(2, 4, false).await.unwrap();

        rig.fake.remove_disk("sdd").unwrap();
        rig.fake.add_disk("sdx", "X").unwrap();
        let report = rig.manager.reconcile().await.unwrap();

        assert_eq!(report.remount.lost, BTreeSet::from([2]));
        assert_eq!(report.recovery.recovered.get(&2).unwrap().name, "sdx");
        let fp = fp_on(&rig, "sdx").unwrap();
        assert_eq!((fp.device_slot, fp.config_version), (2, 4));
    }

    #[tokio::test]
    async fn test_reclaim_and_restore() {
        let rig = rig("storage-01");
        rig.fake.add_disk("sdc", "C").unwrap();
        rig.fake.add_disk("sdd", "D").unwrap();
        rig.manager.init(2, 1, false).await.unwrap();

        let err = rig.manager.reclaim("sdc").await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));

        // Lose local metadata and restore it from the disks
        let ring = rig.manager.bundle_sources().metadata_dir.join("object.ring.gz");
        std::fs::remove_file(&ring).unwrap();
        let (_, manifest) = rig.manager.restore().await.unwrap();
        assert_eq!(manifest.config_version, 1);
        assert_eq!(std::fs::read(&ring).unwrap(), b"ring");

        rig.manager
            .backend()
            .unmount_lazy(&rig.manager.slot_mountpoint(2))
            .await
            .unwrap();
        rig.manager.reclaim("sdd").await.unwrap();
        assert!(fp_on(&rig, "sdd").is_none());
    }

    #[tokio::test]
    async fn test_fence_unhealthy() {
        let rig = rig("storage-01");
        rig.fake.add_disk("sdc", "C").unwrap();
        rig.fake.add_disk("sdd", "D").unwrap();
        rig.manager.init(2, 1, false).await.unwrap();
        rig.fake.set_healthy("sdd", false).unwrap();

        assert_eq!(rig.manager.fence_unhealthy().await.unwrap(), vec![2]);
        let mounts = rig.manager.slot_mounts().await.unwrap();
        assert_eq!(mounts.len(), 1);
        assert!(mounts.contains_key(&1));
    }

    #[tokio::test]
    async fn test_host_lock_conflict() {
        let rig = rig("storage-01");
        let _held = rig.manager.lock_host().await.unwrap();
        let started = std::time::Instant::now();
        let err = rig.manager.lock_host().await.unwrap_err();
        assert!(matches!(err, Error::Conflict(_)));
        assert!(!err.is_retryable());
        assert!(started.elapsed() < Duration::from_secs(5));
    }
}
