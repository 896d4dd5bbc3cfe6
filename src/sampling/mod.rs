//! Trace-sampling control.
//!
//! Components (modules and the spec reconstructor) ask for traces of
//! specific APIs. The allowlist lives in the `trace_sampling` table; changes
//! for the external trace source are pushed to the external sampling manager
//! within the same request.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::storage::{Database, StorageError, EXTERNAL_TRACE_SOURCE_ID};

/// Host entry meaning "every host".
pub const ALL_HOSTS: &str = "*";

/// Result type for sampling operations.
pub type Result<T> = std::result::Result<T, SamplingError>;

/// Errors from the sampling controller.
#[derive(Debug, thiserror::Error)]
pub enum SamplingError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("sampling manager error: {0}")]
    Manager(String),
}

impl From<reqwest::Error> for SamplingError {
    fn from(err: reqwest::Error) -> Self {
        SamplingError::Manager(err.to_string())
    }
}

/// Wire body sent to the external sampling manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostsToTrace {
    pub component_id: String,
    pub hosts: Vec<String>,
}

impl HostsToTrace {
    pub fn new(component: &str, hosts: Vec<String>) -> Self {
        Self {
            component_id: component.to_string(),
            hosts,
        }
    }
}

/// External sampling manager that relays allowlists to capture agents.
#[async_trait]
pub trait SamplingManager: Send + Sync {
    async fn add_hosts_to_trace(&self, hosts: &HostsToTrace) -> Result<()>;

    async fn remove_hosts_to_trace(&self, hosts: &HostsToTrace) -> Result<()>;

    /// Replace the component's host set.
    async fn set_hosts_to_trace(&self, hosts: &HostsToTrace) -> Result<()>;
}

/// Manager used when none is configured.
#[derive(Debug, Default)]
pub struct NoopSamplingManager;

#[async_trait]
impl SamplingManager for NoopSamplingManager {
    async fn add_hosts_to_trace(&self, _hosts: &HostsToTrace) -> Result<()> {
        Ok(())
    }

    async fn remove_hosts_to_trace(&self, _hosts: &HostsToTrace) -> Result<()> {
        Ok(())
    }

    async fn set_hosts_to_trace(&self, _hosts: &HostsToTrace) -> Result<()> {
        Ok(())
    }
}

/// Sampling manager reached over HTTP.
///
/// `POST {base}/hostsToTrace/add`, `POST {base}/hostsToTrace/remove` and
/// `PUT {base}/hostsToTrace`, each with a [`HostsToTrace`] body.
pub struct HttpSamplingManager {
    client: Client,
    base_url: String,
}

impl HttpSamplingManager {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder, hosts: &HostsToTrace) -> Result<()> {
        let response = request.json(hosts).send().await?;
        let status = response.status();
        if status.is_success() {
            debug!(component = %hosts.component_id, hosts = ?hosts.hosts, "sampling manager updated");
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(SamplingError::Manager(format!(
                "HTTP {} - {}",
                status,
                body.chars().take(200).collect::<String>()
            )))
        }
    }
}

#[async_trait]
impl SamplingManager for HttpSamplingManager {
    async fn add_hosts_to_trace(&self, hosts: &HostsToTrace) -> Result<()> {
        let url = format!("{}/hostsToTrace/add", self.base_url);
        self.send(self.client.post(url), hosts).await
    }

    async fn remove_hosts_to_trace(&self, hosts: &HostsToTrace) -> Result<()> {
        let url = format!("{}/hostsToTrace/remove", self.base_url);
        self.send(self.client.post(url), hosts).await
    }

    async fn set_hosts_to_trace(&self, hosts: &HostsToTrace) -> Result<()> {
        let url = format!("{}/hostsToTrace", self.base_url);
        self.send(self.client.put(url), hosts).await
    }
}

/// Which manager call was made; recorded by [`RecordingSamplingManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerCall {
    Add(HostsToTrace),
    Remove(HostsToTrace),
    Set(HostsToTrace),
}

/// In-memory manager that records every call.
#[derive(Debug, Default)]
pub struct RecordingSamplingManager {
    calls: Mutex<Vec<ManagerCall>>,
}

impl RecordingSamplingManager {
    pub fn calls(&self) -> Vec<ManagerCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: ManagerCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl SamplingManager for RecordingSamplingManager {
    async fn add_hosts_to_trace(&self, hosts: &HostsToTrace) -> Result<()> {
        self.record(ManagerCall::Add(hosts.clone()));
        Ok(())
    }

    async fn remove_hosts_to_trace(&self, hosts: &HostsToTrace) -> Result<()> {
        self.record(ManagerCall::Remove(hosts.clone()));
        Ok(())
    }

    async fn set_hosts_to_trace(&self, hosts: &HostsToTrace) -> Result<()> {
        self.record(ManagerCall::Set(hosts.clone()));
        Ok(())
    }
}

/// Per-component host allowlists across trace sources.
#[derive(Clone)]
pub struct SamplingController {
    db: Database,
    manager: Arc<dyn SamplingManager>,
    enabled: bool,
}

impl SamplingController {
    pub fn new(db: Database, manager: Arc<dyn SamplingManager>, enabled: bool) -> Self {
        Self {
            db,
            manager,
            enabled,
        }
    }

    /// Sampling disabled: every component sees every host.
    pub fn disabled(db: Database) -> Self {
        Self::new(db, Arc::new(NoopSamplingManager), false)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Announce components at startup. With sampling disabled every
    /// component is told to trace all hosts.
    pub async fn init_components(&self, components: &[String]) {
        if self.enabled {
            return;
        }
        for component in components {
            let hosts = HostsToTrace::new(component, vec![ALL_HOSTS.to_string()]);
            if let Err(e) = self.manager.add_hosts_to_trace(&hosts).await {
                warn!(component = %component, error = %e, "failed to announce component to sampling manager");
            }
        }
    }

    pub async fn add_host_to_trace(&self, component: &str, api_id: i64) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let api = self.db.api_inventory().get(api_id).await?;
        self.db
            .trace_sampling()
            .add(api_id, api.trace_source_id, component)
            .await?;
        info!(component, api_id, trace_source_id = api.trace_source_id, "host added to trace");

        if api.trace_source_id == EXTERNAL_TRACE_SOURCE_ID {
            let hosts = HostsToTrace::new(component, vec![format!("{}:{}", api.name, api.port)]);
            self.manager.add_hosts_to_trace(&hosts).await?;
        }
        Ok(())
    }

    pub async fn remove_host_to_trace(&self, component: &str, api_id: i64) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        let api = self.db.api_inventory().get(api_id).await?;
        self.db
            .trace_sampling()
            .delete(api_id, api.trace_source_id, component)
            .await?;
        info!(component, api_id, trace_source_id = api.trace_source_id, "host removed from trace");

        if api.trace_source_id == EXTERNAL_TRACE_SOURCE_ID {
            let hosts = HostsToTrace::new(component, vec![format!("{}:{}", api.name, api.port)]);
            self.manager.remove_hosts_to_trace(&hosts).await?;
        }
        Ok(())
    }

    /// Drop every tuple of `component`, for every trace source.
    pub async fn reset_for_component(&self, component: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.db.trace_sampling().delete_by_component(component).await?;
        self.manager
            .set_hosts_to_trace(&HostsToTrace::new(component, Vec::new()))
            .await?;
        info!(component, "sampling reset for component");
        Ok(())
    }

    /// Hosts per trace source for `component`.
    pub async fn hosts_to_trace_by_component(
        &self,
        component: &str,
    ) -> Result<BTreeMap<i64, Vec<String>>> {
        if !self.enabled {
            return Ok(BTreeMap::from([(
                EXTERNAL_TRACE_SOURCE_ID,
                vec![ALL_HOSTS.to_string()],
            )]));
        }
        Ok(self.db.trace_sampling().hosts_by_component(component).await?)
    }

    /// Hosts of one trace source for `component`.
    pub async fn hosts_to_trace_by_trace_source(
        &self,
        component: &str,
        trace_source_id: i64,
    ) -> Result<Vec<String>> {
        if !self.enabled {
            return Ok(vec![ALL_HOSTS.to_string()]);
        }
        Ok(self
            .db
            .trace_sampling()
            .hosts_by_trace_source(component, trace_source_id)
            .await?)
    }
}

/// Whether `host:port` is covered by an allowlist.
///
/// Entries are `*`, a bare host, or `host:port` where either side may be `*`.
pub fn should_trace(host: &str, port: &str, allowed: &[String]) -> bool {
    allowed.iter().any(|entry| {
        if entry == ALL_HOSTS {
            return true;
        }
        match entry.rsplit_once(':') {
            Some((h, p)) => (h == ALL_HOSTS || h == host) && (p == ALL_HOSTS || p == port),
            None => entry == host,
        }
    })
}
