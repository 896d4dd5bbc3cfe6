//! The capability surface handed to modules.

use std::sync::{Arc, OnceLock, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use super::{Module, Result};
use crate::notifier::{Notification, Notifier};
use crate::sampling::SamplingController;
use crate::speculator::SpeculatorRepository;
use crate::storage::{
    ApiAnnotation, ApiEvent, ApiEventsQuery, ApiInfo, Database, EventAnnotation,
};

/// A module-owned named payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub name: String,
    pub annotation: Vec<u8>,
}

impl From<EventAnnotation> for Annotation {
    fn from(a: EventAnnotation) -> Self {
        Self {
            name: a.name,
            annotation: a.annotation,
        }
    }
}

impl From<ApiAnnotation> for Annotation {
    fn from(a: ApiAnnotation) -> Self {
        Self {
            name: a.name,
            annotation: a.annotation,
        }
    }
}

/// Storage, sampling and notification access for modules.
///
/// Holds no state of its own; everything lives in storage.
#[derive(Clone)]
pub struct Accessor {
    db: Database,
    sampling: SamplingController,
    notifier: Notifier,
    speculators: Arc<SpeculatorRepository>,
    listeners: Arc<OnceLock<Vec<Weak<dyn Module>>>>,
}

impl Accessor {
    pub fn new(
        db: Database,
        sampling: SamplingController,
        notifier: Notifier,
        speculators: Arc<SpeculatorRepository>,
    ) -> Self {
        Self {
            db,
            sampling,
            notifier,
            speculators,
            listeners: Arc::new(OnceLock::new()),
        }
    }

    pub(crate) fn set_listeners(&self, modules: &[Arc<dyn Module>]) {
        let weak = modules.iter().map(Arc::downgrade).collect();
        if self.listeners.set(weak).is_err() {
            debug!("annotation listeners already set");
        }
    }

    fn listeners(&self) -> Vec<Arc<dyn Module>> {
        self.listeners
            .get()
            .map(|all| all.iter().filter_map(Weak::upgrade).collect())
            .unwrap_or_default()
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn sampling(&self) -> &SamplingController {
        &self.sampling
    }

    pub fn speculators(&self) -> &Arc<SpeculatorRepository> {
        &self.speculators
    }

    pub async fn get_api_info(&self, api_id: i64) -> Result<ApiInfo> {
        Ok(self.db.api_inventory().get(api_id).await?)
    }

    /// Events with their annotations joined in.
    pub async fn get_api_events(&self, query: &ApiEventsQuery) -> Result<Vec<ApiEvent>> {
        Ok(self.db.api_events().list_with_annotations(query).await?)
    }

    pub async fn get_event_annotation(
        &self,
        module: &str,
        event_id: i64,
        name: &str,
    ) -> Result<Option<Annotation>> {
        Ok(self
            .db
            .event_annotations()
            .get(module, event_id, name)
            .await?
            .map(Annotation::from))
    }

    /// Annotations of one event, alerts excluded.
    pub async fn list_event_annotations(
        &self,
        module: &str,
        event_id: i64,
    ) -> Result<Vec<Annotation>> {
        Ok(self
            .db
            .event_annotations()
            .list(module, event_id)
            .await?
            .into_iter()
            .map(Annotation::from)
            .collect())
    }

    /// Upsert on (module, event, name), then tell every module.
    pub async fn create_event_annotations(
        &self,
        module: &str,
        event_id: i64,
        annotations: &[Annotation],
    ) -> Result<()> {
        if annotations.is_empty() {
            return Ok(());
        }
        let rows: Vec<EventAnnotation> = annotations
            .iter()
            .map(|a| EventAnnotation {
                module_name: module.to_string(),
                event_id,
                name: a.name.clone(),
                annotation: a.annotation.clone(),
            })
            .collect();
        self.db.event_annotations().upsert_many(&rows).await?;

        for listener in self.listeners() {
            if let Err(e) = listener
                .event_annotation_notify(module, event_id, annotations)
                .await
            {
                error!(module = %listener.info().name, event_id, error = %e, "event annotation notification failed");
            }
        }
        Ok(())
    }

    pub async fn get_api_annotation(
        &self,
        module: &str,
        api_id: i64,
        name: &str,
    ) -> Result<Option<Annotation>> {
        Ok(self
            .db
            .api_annotations()
            .get(module, api_id, name)
            .await?
            .map(Annotation::from))
    }

    pub async fn list_api_annotations(&self, module: &str, api_id: i64) -> Result<Vec<Annotation>> {
        Ok(self
            .db
            .api_annotations()
            .list(module, api_id)
            .await?
            .into_iter()
            .map(Annotation::from)
            .collect())
    }

    /// Upsert on (module, api, name), then tell every module.
    pub async fn store_api_annotations(
        &self,
        module: &str,
        api_id: i64,
        annotations: &[Annotation],
    ) -> Result<()> {
        if annotations.is_empty() {
            return Ok(());
        }
        let rows: Vec<ApiAnnotation> = annotations
            .iter()
            .map(|a| ApiAnnotation {
                module_name: module.to_string(),
                api_id,
                name: a.name.clone(),
                annotation: a.annotation.clone(),
            })
            .collect();
        self.db.api_annotations().upsert_many(&rows).await?;

        for listener in self.listeners() {
            if let Err(e) = listener
                .api_annotation_notify(module, api_id, annotations)
                .await
            {
                error!(module = %listener.info().name, api_id, error = %e, "api annotation notification failed");
            }
        }
        Ok(())
    }

    pub async fn delete_api_annotations(
        &self,
        module: &str,
        api_id: i64,
        names: &[String],
    ) -> Result<()> {
        Ok(self.db.api_annotations().delete(module, api_id, names).await?)
    }

    pub async fn delete_all_api_annotations(&self, module: &str, api_id: i64) -> Result<()> {
        Ok(self.db.api_annotations().delete_all(module, api_id).await?)
    }

    /// Queue a notification on behalf of `module`.
    pub async fn notify(&self, module: &str, api_id: i64, notification: Notification) -> Result<()> {
        debug!(module, api_id, "queueing notification");
        Ok(self.notifier.notify(api_id, notification).await?)
    }

    pub async fn enable_traces(&self, module: &str, api_id: i64) -> Result<()> {
        Ok(self.sampling.add_host_to_trace(module, api_id).await?)
    }

    pub async fn disable_traces(&self, module: &str, api_id: i64) -> Result<()> {
        Ok(self.sampling.remove_host_to_trace(module, api_id).await?)
    }
}
