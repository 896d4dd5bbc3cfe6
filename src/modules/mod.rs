//! Analysis module framework.
//!
//! Modules are built from a [`Registry`] at startup and receive every
//! persisted event through [`Core::event_notify`], in registration order.
//! They read and write state only through the [`Accessor`].

pub mod accessor;
pub mod alert;
pub mod trace_analyzer;

use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

pub use accessor::{Accessor, Annotation};
pub use alert::AlertSeverity;

use crate::notifier::NotifierError;
use crate::pipeline::telemetry::Telemetry;
use crate::sampling::{should_trace, SamplingError};
use crate::storage::{ApiEvent, ApiInfo, StorageError};

/// Every module's HTTP handler is nested below this path.
pub const BASE_HTTP_PATH: &str = "/api/modules";

/// Result type for module operations.
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Errors raised by modules. Logged by the core, never returned to agents.
#[derive(Debug, thiserror::Error)]
pub enum ModuleError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("sampling error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("notifier error: {0}")]
    Notifier(#[from] NotifierError),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("module initialization failed: {0}")]
    Init(String),
}

impl From<serde_json::Error> for ModuleError {
    fn from(err: serde_json::Error) -> Self {
        ModuleError::Serialization(err.to_string())
    }
}

/// Name and description shown by `/api/features`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
}

/// A persisted event as handed to modules.
#[derive(Debug, Clone)]
pub struct Event {
    pub api_event: ApiEvent,
    /// `None` for non-API events.
    pub api_info: Option<ApiInfo>,
    pub trace_source_id: i64,
    pub telemetry: Telemetry,
}

/// An analysis module.
#[async_trait]
pub trait Module: Send + Sync {
    fn info(&self) -> ModuleInfo;

    async fn event_notify(&self, event: &Event) -> Result<()>;

    /// Another module (or this one) stored event annotations.
    async fn event_annotation_notify(
        &self,
        _module: &str,
        _event_id: i64,
        _annotations: &[Annotation],
    ) -> Result<()> {
        Ok(())
    }

    /// Another module (or this one) stored API annotations.
    async fn api_annotation_notify(
        &self,
        _module: &str,
        _api_id: i64,
        _annotations: &[Annotation],
    ) -> Result<()> {
        Ok(())
    }

    /// Routes mounted at `/api/modules/<name>`.
    fn http_handler(&self) -> Option<Router> {
        None
    }
}

/// Constructor of a module.
pub type ModuleFactory =
    Box<dyn Fn(Accessor) -> BoxFuture<'static, Result<Arc<dyn Module>>> + Send + Sync>;

/// Ordered module constructors. Registration order is dispatch order.
#[derive(Default)]
pub struct Registry {
    factories: Vec<(String, ModuleFactory)>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F, Fut>(mut self, name: &str, factory: F) -> Self
    where
        F: Fn(Accessor) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Arc<dyn Module>>> + Send + 'static,
    {
        let factory: ModuleFactory = Box::new(
            move |accessor| -> BoxFuture<'static, Result<Arc<dyn Module>>> {
                Box::pin(factory(accessor))
            },
        );
        self.factories.push((name.to_string(), factory));
        self
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.iter().map(|(name, _)| name.clone()).collect()
    }
}

/// The built modules and the dispatch logic around them.
pub struct Core {
    modules: Vec<Arc<dyn Module>>,
    accessor: Accessor,
}

impl Core {
    /// Construct every registered module. A module that fails to build is
    /// logged and left out.
    pub async fn build(registry: Registry, accessor: Accessor) -> Self {
        let mut modules = Vec::with_capacity(registry.factories.len());
        for (name, factory) in registry.factories {
            match factory(accessor.clone()).await {
                Ok(module) => {
                    info!(module = %name, "module registered");
                    modules.push(module);
                }
                Err(e) => error!(module = %name, error = %e, "failed to create module"),
            }
        }
        accessor.set_listeners(&modules);
        Self { modules, accessor }
    }

    pub fn infos(&self) -> Vec<ModuleInfo> {
        self.modules.iter().map(|m| m.info()).collect()
    }

    pub fn accessor(&self) -> &Accessor {
        &self.accessor
    }

    /// Hand an event to every module that samples its host.
    pub async fn event_notify(&self, event: &Event) {
        for module in &self.modules {
            let name = module.info().name;
            if self.accessor.sampling().is_enabled() && !self.wants(&name, event).await {
                debug!(module = %name, event_id = event.api_event.id, "host not sampled for module");
                continue;
            }
            if let Err(e) = module.event_notify(event).await {
                error!(module = %name, event_id = event.api_event.id, error = %e, "module failed to handle event");
            }
        }
    }

    async fn wants(&self, module: &str, event: &Event) -> bool {
        let hosts = match self
            .accessor
            .sampling()
            .hosts_to_trace_by_trace_source(module, event.trace_source_id)
            .await
        {
            Ok(hosts) => hosts,
            Err(e) => {
                warn!(module, error = %e, "failed to read hosts to trace");
                return false;
            }
        };
        let port = event.api_event.destination_port.to_string();
        should_trace(&event.api_event.host_spec_name, &port, &hosts)
    }

    /// Module routes, each nested at `/api/modules/<name>`.
    pub fn router(&self) -> Router {
        self.modules.iter().fold(Router::new(), |router, module| {
            match module.http_handler() {
                Some(handler) => {
                    router.nest(&format!("{BASE_HTTP_PATH}/{}", module.info().name), handler)
                }
                None => router,
            }
        })
    }
}
