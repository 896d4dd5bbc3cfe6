//! Liveness and readiness probes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use tracing::info;

use crate::utils::bootstrap::Shutdown;

/// Readiness flag flipped once every server is up.
#[derive(Clone, Default)]
pub struct Readiness(Arc<AtomicBool>);

impl Readiness {
    pub fn set_ready(&self, ready: bool) {
        self.0.store(ready, Ordering::SeqCst);
    }

    pub fn is_ready(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// `:8081` → `0.0.0.0:8081`.
pub fn bind_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{address}")
    } else {
        address.to_string()
    }
}

pub async fn serve(
    readiness: Readiness,
    address: &str,
    mut shutdown: Shutdown,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let listener = tokio::net::TcpListener::bind(bind_address(address)).await?;
    info!(address = %listener.local_addr()?, "health check listening");
    axum::serve(listener, router(readiness))
        .with_graceful_shutdown(async move { shutdown.recv().await })
        .await?;
    Ok(())
}

pub fn router(readiness: Readiness) -> Router {
    Router::new()
        .route("/healthz/live", get(live))
        .route("/healthz/ready", get(ready))
        .with_state(readiness)
}

async fn live() -> StatusCode {
    StatusCode::OK
}

async fn ready(State(readiness): State<Readiness>) -> StatusCode {
    if readiness.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use axum::http::Method;

    use super::*;
    use crate::rest::test_support::call;

    #[tokio::test]
    async fn test_probes() {
        let readiness = Readiness::default();
        let app = router(readiness.clone());
        assert_eq!(call(app.clone(), Method::GET, "/healthz/live", None).await.0, StatusCode::OK);
        assert_eq!(
            call(app.clone(), Method::GET, "/healthz/ready", None).await.0,
            StatusCode::SERVICE_UNAVAILABLE
        );
        readiness.set_ready(true);
        assert_eq!(call(app, Method::GET, "/healthz/ready", None).await.0, StatusCode::OK);
    }

    #[test]
    fn test_bind_address() {
        assert_eq!(bind_address(":8081"), "0.0.0.0:8081");
        assert_eq!(bind_address("127.0.0.1:9"), "127.0.0.1:9");
    }
}
