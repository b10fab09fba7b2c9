//! HTTP client for the registry API

use crate::common::{Error, Result};
use crate::registry::model::{Heartbeat, MaintenanceTask, NodeEntry};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RegistryClient {
    base_url: String,
    http: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct BacklogResponse {
    tasks: Vec<MaintenanceTask>,
}

impl RegistryClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(res: reqwest::Response) -> Result<T> {
        let status = res.status();
        if status.is_success() {
            return Ok(res.json().await?);
        }
        let body = res.text().await.unwrap_or_default();
        match status.as_u16() {
            400 => Err(Error::InvalidReport(body)),
            404 => Err(Error::NotFound(body)),
            _ => Err(Error::Http(format!("{}: {}", status, body))),
        }
    }

    /// Post a heartbeat; the node must already be registered.
    pub async fn send_heartbeat(&self, heartbeat: &Heartbeat) -> Result<NodeEntry> {
        heartbeat.validate()?;
        let res = self
            .http
            .post(self.url("/heartbeat"))
            .json(heartbeat)
            .send()
            .await?;
        Self::decode(res).await
    }

    pub async fn get_node(&self, hostname: &str) -> Result<NodeEntry> {
        let res = self
            .http
            .get(self.url(&format!("/nodes/{}", hostname)))
            .send()
            .await?;
        Self::decode(res).await
    }

    pub async fn list_backlog(&self) -> Result<Vec<MaintenanceTask>> {
        let res = self.http.get(self.url("/backlog")).send().await?;
        let body: BacklogResponse = Self::decode(res).await?;
        Ok(body.tasks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{AdvisoryLock, LockOptions};
    use crate::registry::http::{create_router, RegistryState};
    use crate::registry::model::NodeStatus;
    use crate::registry::{MaintenanceBacklog, NodeRegistry};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_heartbeat_round_trip_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(NodeRegistry::new(
            dir.path().join("registry"),
            AdvisoryLock::new(dir.path().join("registry.lock"), LockOptions::default()),
        ));
        registry.add_node(&NodeEntry::new("storage-01", 1)).unwrap();
        let state = RegistryState {
            registry,
            backlog: Arc::new(MaintenanceBacklog::new(
                dir.path().join("backlog"),
                AdvisoryLock::new(dir.path().join("backlog.lock"), LockOptions::default()),
            )),
        };

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, create_router(state)).await.unwrap();
        });

        let client = RegistryClient::new(format!("http://{}", addr), Duration::from_secs(5)).unwrap();
        let entry = client
            .send_heartbeat(&Heartbeat {
                hostname: "storage-01".into(),
                status: NodeStatus::Alive,
                timestamp: 77,
                disk_report: None,
                daemon_report: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(entry.last_heartbeat, 77);

        let err = client.get_node("ghost").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(client.list_backlog().await.unwrap().is_empty());
    }
}
