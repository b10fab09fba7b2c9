//! Pushing staged metadata to a peer and triggering its update

use crate::common::exec::execute;
use crate::common::{Error, Result, SyncConfig};
use std::collections::BTreeMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::Command;

/// Authenticated remote-copy and remote-exec channel to a peer
pub trait PeerTransport {
    /// Copy the contents of `local` into `remote` on `peer`.
    fn push(&self, peer: &str, local: &Path, remote: &Path) -> impl Future<Output = Result<()>>;

    /// Run the peer's apply-update entry point on `remote`.
    fn invoke_update(&self, peer: &str, remote: &Path) -> impl Future<Output = Result<()>>;

    /// Delete `remote` on `peer`.
    fn cleanup(&self, peer: &str, remote: &Path) -> impl Future<Output = Result<()>>;
}

/// `ssh`/`scp` with batch mode and per-call timeouts
#[derive(Debug, Clone)]
pub struct SshTransport {
    user: String,
    identity: Option<PathBuf>,
    ssh_timeout: Duration,
    copy_timeout: Duration,
    remote_binary: String,
}

impl SshTransport {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            user: config.ssh_user.clone(),
            identity: config.ssh_identity.clone(),
            ssh_timeout: config.ssh_timeout(),
            copy_timeout: config.copy_timeout(),
            remote_binary: config.remote_binary.clone(),
        }
    }

    fn base(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(["-o", "BatchMode=yes", "-o", "StrictHostKeyChecking=no"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.ssh_timeout.as_secs().max(1)));
        if let Some(identity) = &self.identity {
            cmd.arg("-i").arg(identity);
        }
        cmd
    }

    fn target(&self, peer: &str) -> String {
        format!("{}@{}", self.user, peer)
    }

    async fn ssh(&self, peer: &str, remote_command: String, timeout: Duration) -> Result<()> {
        let mut cmd = self.base("ssh");
        cmd.arg(self.target(peer)).arg(remote_command);
        execute(&mut cmd, timeout).await.map_err(|e| Error::Transport {
            peer: peer.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

fn quoted(path: &Path) -> String {
    format!("'{}'", path.display().to_string().replace('\'', r"'\''"))
}

impl PeerTransport for SshTransport {
    async fn push(&self, peer: &str, local: &Path, remote: &Path) -> Result<()> {
        self.ssh(peer, format!("mkdir -p {}", quoted(remote)), self.ssh_timeout)
            .await?;

        let mut cmd = self.base("scp");
        cmd.arg("-r")
            .arg(format!("{}/.", local.display()))
            .arg(format!("{}:{}", self.target(peer), remote.display()));
        execute(&mut cmd, self.copy_timeout)
            .await
            .map_err(|e| Error::Transport {
                peer: peer.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn invoke_update(&self, peer: &str, remote: &Path) -> Result<()> {
        let command = format!("{} update-metadata {}", self.remote_binary, quoted(remote));
        self.ssh(peer, command, self.copy_timeout).await
    }

    async fn cleanup(&self, peer: &str, remote: &Path) -> Result<()> {
        self.ssh(peer, format!("rm -rf {}", quoted(remote)), self.ssh_timeout)
            .await
    }
}

/// One recorded transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportCall {
    Push { peer: String, remote: PathBuf },
    InvokeUpdate { peer: String, remote: PathBuf },
    Cleanup { peer: String, remote: PathBuf },
}

#[derive(Debug, Default)]
struct LoopbackState {
    calls: Vec<TransportCall>,
    failing_pushes: BTreeMap<String, String>,
    push_delay: Option<Duration>,
}

/// Transport that copies into `<root>/<peer>/<remote>` on the local filesystem
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    root: PathBuf,
    state: Arc<Mutex<LoopbackState>>,
}

impl LoopbackTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            state: Arc::new(Mutex::new(LoopbackState::default())),
        }
    }

    /// Where `remote` on `peer` lands locally
    pub fn peer_path(&self, peer: &str, remote: &Path) -> PathBuf {
        let relative = remote.strip_prefix("/").unwrap_or(remote);
        self.root.join(peer).join(relative)
    }

    pub fn fail_pushes_to(&self, peer: &str, reason: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing_pushes.insert(peer.to_string(), reason.to_string());
        }
    }

    /// Make every push take at least `delay`.
    pub fn slow_pushes(&self, delay: Duration) {
        if let Ok(mut state) = self.state.lock() {
            state.push_delay = Some(delay);
        }
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    fn record(&self, call: TransportCall) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.push(call);
        }
    }
}

impl PeerTransport for LoopbackTransport {
    async fn push(&self, peer: &str, local: &Path, remote: &Path) -> Result<()> {
        self.record(TransportCall::Push {
            peer: peer.to_string(),
            remote: remote.to_path_buf(),
        });
        let (failure, delay) = match self.state.lock() {
            Ok(state) => (state.failing_pushes.get(peer).cloned(), state.push_delay),
            Err(_) => (None, None),
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = failure {
            return Err(Error::Transport {
                peer: peer.to_string(),
                reason,
            });
        }
        crate::common::utils::copy_tree(local, &self.peer_path(peer, remote), &[])?;
        Ok(())
    }

    async fn invoke_update(&self, peer: &str, remote: &Path) -> Result<()> {
        self.record(TransportCall::InvokeUpdate {
            peer: peer.to_string(),
            remote: remote.to_path_buf(),
        });
        Ok(())
    }

    async fn cleanup(&self, peer: &str, remote: &Path) -> Result<()> {
        self.record(TransportCall::Cleanup {
            peer: peer.to_string(),
            remote: remote.to_path_buf(),
        });
        let path = self.peer_path(peer, remote);
        if path.exists() {
            std::fs::remove_dir_all(path)?;
        }
        Ok(())
    }
}
