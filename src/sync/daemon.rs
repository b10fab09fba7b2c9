//! Gossip propagation of ring and cluster metadata
//!
//! Each cycle pushes this node's metadata to one random peer and asks the
//! peer to adopt it. Peers only adopt strictly newer versions, so pushes
//! are idempotent and the fleet converges without any ordering.

use crate::common::daemon::Daemon;
use crate::common::{Error, Result, SyncConfig};
use crate::devices::{DeviceFingerprintManager, DiskBackend};
use crate::sync::metadata::{resolve_peers, MetadataDir};
use crate::sync::services::{ensure_running, ServiceSupervisor};
use crate::sync::transport::PeerTransport;
use rand::seq::SliceRandom;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// What one cycle did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    NoPeers,
    /// The random pick was this node
    SkippedSelf,
    Pushed { peer: String },
}

impl fmt::Display for CycleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CycleOutcome::NoPeers => write!(f, "no peers known, nothing pushed"),
            CycleOutcome::SkippedSelf => write!(f, "picked self, cycle skipped"),
            CycleOutcome::Pushed { peer } => write!(f, "metadata pushed to {}", peer),
        }
    }
}

pub struct MetadataSyncDaemon<B, T, S> {
    config: SyncConfig,
    address: String,
    cycle_timeout: Duration,
    metadata: MetadataDir,
    manager: DeviceFingerprintManager<B>,
    transport: T,
    services: S,
}

impl<B, T, S> MetadataSyncDaemon<B, T, S>
where
    B: DiskBackend,
    T: PeerTransport,
    S: ServiceSupervisor,
{
    /// `address` is how this node appears in the fleet list.
    pub fn new(
        config: SyncConfig,
        address: impl Into<String>,
        manager: DeviceFingerprintManager<B>,
        transport: T,
        services: S,
    ) -> Self {
        Self {
            cycle_timeout: config.cycle_timeout(),
            metadata: MetadataDir::new(&config.metadata_dir),
            config,
            address: address.into(),
            manager,
            transport,
            services,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Remote scratch directory for this node's pushes
    pub fn remote_dir(&self) -> PathBuf {
        self.config.remote_staging_root.join(&self.address)
    }

    fn is_self(&self, peer: &str) -> bool {
        peer == self.address || peer == self.manager.hostname()
    }

    /// One bounded cycle. Remote cleanup runs however the cycle ends.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let mut chosen = None;
        let result = tokio::time::timeout(self.cycle_timeout, self.cycle_body(&mut chosen)).await;

        if let Some(peer) = chosen {
            let remote = self.remote_dir();
            match tokio::time::timeout(self.config.ssh_timeout(), self.transport.cleanup(&peer, &remote))
                .await
            {
                Ok(Ok(())) => tracing::debug!(%peer, "remote staging removed"),
                Ok(Err(e)) => tracing::warn!(%peer, "remote cleanup failed: {}", e),
                Err(_) => tracing::warn!(%peer, "remote cleanup timed out"),
            }
        }

        match result {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Timeout(format!(
                "sync cycle exceeded {:?}",
                self.cycle_timeout
            ))),
        }
    }

    async fn cycle_body(&self, chosen: &mut Option<String>) -> Result<CycleOutcome> {
        ensure_running(&self.services, &self.config.services).await;
        self.fence().await;

        let staged = self.metadata.stage(
            &self.config.scripts_dir,
            &self.config.staging_dir,
            &self.config.exclude,
        )?;
        tracing::debug!(files = staged, "metadata staged");

        let peers = resolve_peers(&self.config);
        let Some(peer) = pick_peer(&peers) else {
            tracing::info!("fleet list is empty, nothing to push");
            return Ok(CycleOutcome::NoPeers);
        };
        if self.is_self(&peer) {
            tracing::debug!(%peer, "picked self, skipping cycle");
            return Ok(CycleOutcome::SkippedSelf);
        }

        *chosen = Some(peer.clone());
        let remote = self.remote_dir();
        self.transport
            .push(&peer, &self.config.staging_dir, &remote)
            .await?;
        self.transport.invoke_update(&peer, &remote).await?;

        tracing::info!(%peer, version = ?self.metadata.version(), "metadata pushed");
        Ok(CycleOutcome::Pushed { peer })
    }

    async fn fence(&self) {
        let _guard = match self.manager.lock_host().await {
            Ok(guard) => guard,
            Err(e) => {
                tracing::warn!("disk health pass skipped: {}", e);
                return;
            }
        };
        match self.manager.fence_unhealthy().await {
            Ok(fenced) if !fenced.is_empty() => {
                tracing::warn!(slots = ?fenced, "unhealthy disks unmounted")
            }
            Ok(_) => {}
            Err(e) => tracing::error!("disk health pass failed: {}", e),
        }
    }
}

fn pick_peer(peers: &[String]) -> Option<String> {
    peers.choose(&mut rand::thread_rng()).cloned()
}

impl<B, T, S> Daemon for MetadataSyncDaemon<B, T, S>
where
    B: DiskBackend,
    T: PeerTransport,
    S: ServiceSupervisor,
{
    fn name(&self) -> &'static str {
        "metadata-sync"
    }

    async fn tick(&mut self) -> Result<()> {
        self.run_cycle().await.map(|_| ())
    }
}
