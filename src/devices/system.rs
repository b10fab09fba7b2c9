//! [`DiskBackend`] over the real kernel tools (`lsblk`, `mount`, `mkfs.xfs`, `smartctl`)

use crate::common::exec::{execute, execute_unchecked, stdout_string, ExecutionError};
use crate::common::{DeviceConfig, Error, Result};
use crate::devices::backend::{Disk, DiskBackend, MountEntry};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone)]
pub struct SystemDisks {
    command_timeout: Duration,
    format_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct LsblkOutput {
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    serial: Option<String>,
}

impl SystemDisks {
    pub fn new(config: &DeviceConfig) -> Self {
        Self {
            command_timeout: config.command_timeout(),
            format_timeout: config.format_timeout(),
        }
    }

    /// Disk name holding `/`, e.g. `sda` for `/dev/sda2`.
    async fn root_disk(&self) -> Result<String> {
        let out = execute(
            Command::new("findmnt").args(["-n", "-o", "SOURCE", "/"]),
            self.command_timeout,
        )
        .await?;
        let source = stdout_string(&out).trim().to_string();

        let mut cmd = Command::new("lsblk");
        cmd.args(["-n", "-o", "PKNAME"]).arg(&source);
        let out = execute(&mut cmd, self.command_timeout).await?;
        let parent = stdout_string(&out).trim().to_string();
        if !parent.is_empty() {
            return Ok(parent);
        }
        // Root on a whole disk
        Ok(source.trim_start_matches("/dev/").to_string())
    }
}

impl DiskBackend for SystemDisks {
    async fn list_disks(&self) -> Result<Vec<Disk>> {
        let root = self.root_disk().await?;
        let mut cmd = Command::new("lsblk");
        cmd.args(["-J", "-d", "-o", "NAME,TYPE,SERIAL"]);
        let out = execute(&mut cmd, self.command_timeout).await?;
        let parsed: LsblkOutput = serde_json::from_slice(&out.stdout).map_err(|e| {
            ExecutionError::ParseFailure {
                command: crate::common::exec::command_to_string(&cmd),
                reason: e.to_string(),
            }
        })?;

        let mut disks: Vec<Disk> = parsed
            .blockdevices
            .into_iter()
            .filter(|dev| dev.kind == "disk" && dev.name != root)
            .map(|dev| Disk {
                name: dev.name,
                serial: dev.serial.filter(|s| !s.trim().is_empty()),
            })
            .collect();
        disks.sort();
        Ok(disks)
    }

    async fn mounts(&self) -> Result<Vec<MountEntry>> {
        let table = tokio::fs::read_to_string("/proc/mounts").await?;
        Ok(parse_mounts(&table))
    }

    async fn mount(&self, disk: &Disk, target: &Path, read_only: bool) -> Result<()> {
        tokio::fs::create_dir_all(target).await?;
        let mut cmd = Command::new("mount");
        cmd.args(["-t", "xfs", "-o"])
            .arg(if read_only { "ro,noatime" } else { "noatime,nodiratime,logbufs=8" })
            .arg(disk.dev_path())
            .arg(target);
        execute(&mut cmd, self.command_timeout).await?;
        Ok(())
    }

    async fn unmount_lazy(&self, target: &Path) -> Result<()> {
        let mut cmd = Command::new("umount");
        cmd.arg("-l").arg(target);
        let out = execute_unchecked(&mut cmd, self.command_timeout).await?;
        if !out.status.success() {
            let stderr = String::from_utf8_lossy(&out.stderr);
            // Already unmounted
            if !stderr.contains("not mounted") {
                return Err(crate::common::exec::output_to_exec_error(&cmd, &out).into());
            }
        }
        Ok(())
    }

    async fn format(&self, disk: &Disk) -> Result<()> {
        let mut cmd = Command::new("mkfs.xfs");
        cmd.args(["-f", "-i", "size=1024"]).arg(disk.dev_path());
        execute(&mut cmd, self.format_timeout).await?;
        Ok(())
    }

    async fn is_healthy(&self, disk: &Disk) -> Result<bool> {
        let mut cmd = Command::new("smartctl");
        cmd.arg("-H").arg(disk.dev_path());
        let out = execute_unchecked(&mut cmd, self.command_timeout).await?;
        let text = stdout_string(&out);
        if text.contains("PASSED") || text.contains("SMART Health Status: OK") {
            return Ok(true);
        }
        if text.contains("FAILED") {
            return Ok(false);
        }
        Err(Error::Command(ExecutionError::ParseFailure {
            command: crate::common::exec::command_to_string(&cmd),
            reason: "no health verdict in output".into(),
        }))
    }
}

/// `/proc/mounts` lines backed by `/dev/*` devices
fn parse_mounts(table: &str) -> Vec<MountEntry> {
    table
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let source = fields.next()?;
            let target = fields.next()?;
            let disk = source.strip_prefix("/dev/")?;
            Some(MountEntry {
                disk: disk.to_string(),
                mountpoint: PathBuf::from(target.replace("\\040", " ")),
            })
        })
        .collect()
}
