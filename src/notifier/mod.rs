//! Outbound notifications to the notification backend.
//!
//! A bounded queue feeds a fixed pool of workers, each POSTing JSON to
//! `<prefix>/notification/<api_id>`. Delivery is best-effort: failures are
//! logged and dropped.

use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use reqwest::{tls, Certificate, Client};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 100;

/// Worker pool size.
pub const DEFAULT_WORKERS: usize = 10;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors from the notifier.
#[derive(Debug, thiserror::Error)]
pub enum NotifierError {
    #[error("notifier is closed")]
    Closed,

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to read root certificate {path}: {source}")]
    RootCert {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// One API-level finding as sent to the notification backend and served by
/// module REST handlers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiFinding {
    /// Module that produced the finding.
    pub source: String,
    #[serde(rename = "type")]
    pub finding_type: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provided_spec_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reconstructed_spec_location: Option<String>,
    pub severity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<serde_json::Value>,
}

/// Payloads understood by the notification backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "notificationType")]
pub enum Notification {
    #[serde(rename = "ApiFindingsNotification")]
    ApiFindings { api_id: i64, items: Vec<ApiFinding> },

    #[serde(rename = "NewDiscoveredAPINotification")]
    NewDiscoveredApi {
        id: i64,
        name: String,
        port: i64,
        has_provided_spec: bool,
        has_reconstructed_spec: bool,
        destination_namespace: String,
        trace_source_id: i64,
    },
}

/// A queued notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub api_id: i64,
    pub notification: Notification,
}

fn build_client(root_cert: Option<&Path>) -> Result<Client, NotifierError> {
    let mut builder = Client::builder().timeout(REQUEST_TIMEOUT);
    if let Some(path) = root_cert {
        let pem = std::fs::read(path).map_err(|source| NotifierError::RootCert {
            path: path.display().to_string(),
            source,
        })?;
        builder = builder
            .add_root_certificate(Certificate::from_pem(&pem)?)
            .min_tls_version(tls::Version::TLS_1_2);
    }
    Ok(builder.build()?)
}

/// Prefix the URL with a scheme when it has none.
pub fn set_scheme_if_needed(prefix: &str, tls: bool) -> String {
    if prefix.contains("://") {
        return prefix.to_string();
    }
    let scheme = if tls { "https" } else { "http" };
    format!("{scheme}://{prefix}")
}

/// Producer side of the notification queue. Cheap to clone.
#[derive(Clone)]
pub struct Notifier {
    tx: Arc<StdMutex<Option<mpsc::Sender<Delivery>>>>,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("enabled", &self.sender().is_some())
            .finish()
    }
}

impl Notifier {
    /// A notifier and the raw receiving end of its queue, with no workers.
    pub fn queue(size: usize) -> (Self, mpsc::Receiver<Delivery>) {
        let (tx, rx) = mpsc::channel(size.max(1));
        (
            Self {
                tx: Arc::new(StdMutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// A notifier that drops everything; used when no backend is configured.
    pub fn disabled() -> Self {
        Self {
            tx: Arc::new(StdMutex::new(None)),
        }
    }

    /// Start the queue and its worker pool.
    ///
    /// With `root_cert` set, delivery uses `https://`, trusts the PEM
    /// certificate at that path and refuses anything below TLS 1.2.
    pub fn start(
        prefix: &str,
        root_cert: Option<&Path>,
        queue_size: usize,
        workers: usize,
    ) -> Result<(Self, NotifierWorkers), NotifierError> {
        let client = build_client(root_cert)?;
        let prefix = set_scheme_if_needed(prefix.trim_end_matches('/'), root_cert.is_some());
        let (notifier, rx) = Self::queue(queue_size);
        let rx = Arc::new(Mutex::new(rx));

        let handles = (0..workers.max(1))
            .map(|worker| {
                tokio::spawn(run_worker(worker, client.clone(), prefix.clone(), rx.clone()))
            })
            .collect();
        info!(prefix = %prefix, workers, queue_size, "notifier started");

        Ok((notifier, NotifierWorkers { handles }))
    }

    fn sender(&self) -> Option<mpsc::Sender<Delivery>> {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_enabled(&self) -> bool {
        self.sender().is_some()
    }

    /// Enqueue a notification, waiting while the queue is full.
    pub async fn notify(&self, api_id: i64, notification: Notification) -> Result<(), NotifierError> {
        let Some(tx) = self.sender() else {
            debug!(api_id, "notifier disabled, dropping notification");
            return Ok(());
        };
        tx.send(Delivery {
            api_id,
            notification,
        })
        .await
        .map_err(|_| NotifierError::Closed)
    }

    /// Stop accepting notifications. Workers drain what is queued.
    pub fn close(&self) {
        self.tx.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

/// Join handles of the worker pool.
pub struct NotifierWorkers {
    handles: Vec<JoinHandle<()>>,
}

impl NotifierWorkers {
    /// Wait until every worker has drained the queue.
    pub async fn join(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "notifier worker panicked");
            }
        }
    }
}

async fn run_worker(
    worker: usize,
    client: Client,
    prefix: String,
    rx: Arc<Mutex<mpsc::Receiver<Delivery>>>,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(delivery) = next else {
            debug!(worker, "notification queue closed, worker exiting");
            return;
        };
        deliver(&client, &prefix, &delivery).await;
    }
}

async fn deliver(client: &Client, prefix: &str, delivery: &Delivery) {
    let url = format!("{prefix}/notification/{}", delivery.api_id);
    match client.post(&url).json(&delivery.notification).send().await {
        Ok(response) if response.status().is_success() => {
            debug!(url = %url, "notification delivered");
        }
        Ok(response) => {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            warn!(
                url = %url,
                status = %status,
                body = %body.chars().take(200).collect::<String>(),
                "notification rejected"
            );
        }
        Err(e) => {
            error!(url = %url, error = %e, "notification delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_scheme_if_needed() {
        assert_eq!(set_scheme_if_needed("backend:8080", true), "https://backend:8080");
        assert_eq!(set_scheme_if_needed("backend:8080", false), "http://backend:8080");
        assert_eq!(set_scheme_if_needed("http://backend", true), "http://backend");
    }

    #[test]
    fn test_notification_wire_shape() {
        let json = serde_json::to_value(Notification::ApiFindings {
            api_id: 7,
            items: vec![ApiFinding {
                source: "traceanalyzer".to_string(),
                finding_type: "NLID".to_string(),
                severity: "INFO".to_string(),
                ..ApiFinding::default()
            }],
        })
        .unwrap();
        assert_eq!(json["notificationType"], "ApiFindingsNotification");
        assert_eq!(json["api_id"].to_string(), "7");
        assert_eq!(json["items"][0]["type"], "NLID");
        assert!(json["items"][0].get("additionalInfo").is_none());
    }

    #[tokio::test]
    async fn test_queue_delivers_in_order() {
        let (notifier, mut rx) = Notifier::queue(4);
        for id in 1..=2 {
            notifier
                .notify(
                    id,
                    Notification::ApiFindings {
                        api_id: id,
                        items: vec![],
                    },
                )
                .await
                .unwrap();
        }
        assert_eq!(rx.recv().await.unwrap().api_id, 1);
        assert_eq!(rx.recv().await.unwrap().api_id, 2);
    }

    #[tokio::test]
    async fn test_closed_notifier_rejects() {
        let (notifier, mut rx) = Notifier::queue(1);
        notifier.close();
        let result = notifier
            .notify(
                1,
                Notification::ApiFindings {
                    api_id: 1,
                    items: vec![],
                },
            )
            .await;
        // A closed notifier behaves as disabled.
        assert!(result.is_ok());
        assert!(!notifier.is_enabled());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_notifier_drops() {
        let notifier = Notifier::disabled();
        assert!(!notifier.is_enabled());
        notifier
            .notify(
                1,
                Notification::ApiFindings {
                    api_id: 1,
                    items: vec![],
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_workers_drain_after_close() {
        let (notifier, workers) = Notifier::start("127.0.0.1:1", None, 2, 1).unwrap();
        notifier.close();
        workers.join().await;
    }

    const ROOT_CERT: &str = "-----BEGIN CERTIFICATE-----
MIIDHTCCAgWgAwIBAgIUXE+rmd1GqiuaCYXCdRcbPfF5NA8wDQYJKoZIhvcNAQEL
BQAwHTEbMBkGA1UEAwwSbm90aWZpY2F0aW9ucy50ZXN0MCAXDTI2MTAxOTA3NTUx
MFoYDzIxMjYwOTI1MDc1NTEwWjAdMRswGQYDVQQDDBJub3RpZmljYXRpb25zLnRl
c3QwggEiMA0GCSqGSIb3DQEBAQUAA4IBDwAwggEKAoIBAQCvu198Jf34EXCiHfwT
mVzxuwmTbykWqpX4+sgP00Z87TYwEckYjqAhbbBYv+1GQwRCf09UaDH/GTE6ndyS
DLr6TdEMFkb2K/A+i7RkhtegxJ+BCZ++v7NoQl9d7sWXrSQATSirHyv6NvYjVvJp
pzH9ACJsjbLxrE7FrnVq5D3N4REogytSq1toQUVJt+9477Mq/h6CoS/SddwRW0VP
Q3xuEg/5NCAci+J9nhRdyFLX0GVc19Ub9+NxesA0UruCxqTwz3RNC7LkQvPXjWCN
YVzIbW/WcuWwL4/3XwrL0Ysc3JODsFK1D230n3tEIaw7Oo7HVlEKERUbujt08tzJ
LbxpAgMBAAGjUzBRMB0GA1UdDgQWBBSf4XGjUo64Xy4k2rELz5k6MdGSDDAfBgNV
HSMEGDAWgBSf4XGjUo64Xy4k2rELz5k6MdGSDDAPBgNVHRMBAf8EBTADAQH/MA0G
CSqGSIb3DQEBCwUAA4IBAQCX6h+/ZiNVnuVhKJRJTM7kIC4YoSV81/n4tTY2vWzY
qK/eR8vtMwdCh6QF9PdCVZ6qNlQr6Dm/JAQsPBm8DTyjdp3nEcILtDGu+SrlCITz
JsN1zyo1vH5RgP03V3mITUR9KAY8793Nk5x+3HnMidQrRs8uvfRObBimXv1bFTMu
SQVNXIP1EjjQN7M0szxY4XhfBS7b+SxpKQgeuoHZ5eSvKnCDAobxx1s3qlL6Ij9/
WWJVi1XgDL8LG2EEpKmgzjGVIazR6jahMAGLPjrFL7XR5yUsc7uhgWMMlH0z/rua
ML3ujczHa/QWG1qJEzk1fQtioBjNfXyVU2CdwynyC8eQ
-----END CERTIFICATE-----
";

    #[tokio::test]
    async fn test_start_with_root_cert() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, ROOT_CERT.as_bytes()).unwrap();

        let (notifier, workers) =
            Notifier::start("notifications.test:8443", Some(file.path()), 2, 1).unwrap();
        assert!(notifier.is_enabled());
        notifier.close();
        workers.join().await;
    }

    #[tokio::test]
    async fn test_start_rejects_unreadable_root_cert() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("ca.pem");

        let err = Notifier::start("notifications.test:8443", Some(&missing), 2, 1)
            .err()
            .unwrap();
        match err {
            NotifierError::RootCert { path, .. } => assert!(path.ends_with("ca.pem")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
