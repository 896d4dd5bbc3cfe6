//! Bootstrap utilities for the backend binary.
//!
//! Tracing initialisation and the process-wide shutdown signal.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LOG_ENV_VAR, LOG_FORMAT_ENV_VAR};

/// Initialize tracing with the APICLARITY_LOG environment variable.
///
/// Defaults to "info" level if APICLARITY_LOG is not set. Statement logging
/// from sqlx is kept at warn unless `db_info_logs` is set.
pub fn init_tracing(db_info_logs: bool) {
    let sqlx_level = if db_info_logs { "info" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let filter = match format!("sqlx={sqlx_level}").parse() {
        Ok(directive) => filter.add_directive(directive),
        Err(_) => filter,
    };

    let json = std::env::var(LOG_FORMAT_ENV_VAR)
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Cancellation handle shared by every background task.
///
/// Tasks hold a [`Shutdown`] receiver and exit once it flips to `true`.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Create the root trigger and its first listener.
    pub fn new() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested.
    pub async fn recv(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Wait for SIGHUP/SIGINT/SIGTERM/SIGQUIT (ctrl-c elsewhere).
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let kinds = [
            ("SIGHUP", SignalKind::hangup()),
            ("SIGINT", SignalKind::interrupt()),
            ("SIGTERM", SignalKind::terminate()),
            ("SIGQUIT", SignalKind::quit()),
        ];
        let mut streams = Vec::new();
        for (name, kind) in kinds {
            match signal(kind) {
                Ok(stream) => streams.push((name, stream)),
                Err(e) => warn!(signal = name, error = %e, "failed to install signal handler"),
            }
        }
        if streams.is_empty() {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }

        let waits = streams.iter_mut().map(|(name, stream)| {
            let name = *name;
            Box::pin(async move {
                stream.recv().await;
                name
            })
        });
        let (name, _, _) = futures::future::select_all(waits).await;
        info!(signal = name, "received shutdown signal");
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received shutdown signal");
    }
}

/// Run `op` until it succeeds, with exponential backoff.
///
/// Used for start-up dependencies (database) that may come up after us.
pub async fn connect_with_retry<T, E, F, Fut>(service_name: &str, connect: F) -> Result<T, E>
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    use backon::{ExponentialBuilder, Retryable};

    connect
        .retry(
            ExponentialBuilder::default()
                .with_min_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(5))
                .with_max_times(30),
        )
        .notify(|e: &E, delay: Duration| {
            warn!(service = service_name, error = %e, ?delay, "connection failed, retrying");
        })
        .await
}
