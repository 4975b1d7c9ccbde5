//! HTTP surface: `/metrics` for scrapers and `/healthz` for probes.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use log::{error, info};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;

use crate::metrics::{self, MetricRegistry};

#[derive(Clone)]
pub struct ServerState {
    registry: Arc<MetricRegistry>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// `ok` once a snapshot has been committed, `pending` before that
    pub status: &'static str,
    pub last_refresh: Option<DateTime<Utc>>,
    pub samples: usize,
    pub failed_cycles: u64,
}

pub fn build_router(registry: Arc<MetricRegistry>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz))
        .with_state(ServerState { registry })
}

/// Render the committed snapshot. Scrapes never wait on a refresh cycle.
pub async fn metrics_handler(State(state): State<ServerState>) -> impl IntoResponse {
    match state.registry.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, metrics::CONTENT_TYPE)],
            body,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
                e.to_string(),
            )
        }
    }
}

pub async fn healthz(State(state): State<ServerState>) -> Json<HealthResponse> {
    let published = state.registry.current();
    let last_refresh = published.snapshot.collected_at();

    Json(HealthResponse {
        status: if last_refresh.is_some() { "ok" } else { "pending" },
        last_refresh,
        samples: published.snapshot.len(),
        failed_cycles: state.registry.failed_cycles(),
    })
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
pub async fn serve<F>(
    listener: TcpListener,
    registry: Arc<MetricRegistry>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Serving metrics on http://{addr}/metrics");
    }

    axum::serve(listener, build_router(registry))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::insights::{InsightMetrics, JobRecord};
    use crate::metrics::Snapshot;
    use axum::body::to_bytes;

    fn state() -> (ServerState, Arc<MetricRegistry>) {
        let registry = Arc::new(MetricRegistry::new());
        (
            ServerState {
                registry: Arc::clone(&registry),
            },
            registry,
        )
    }

    fn job_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::new(Utc::now());
        snapshot.record_job(&JobRecord {
            repo: "orgA/r1".to_string(),
            workflow: "build".to_string(),
            branch: "main".to_string(),
            job: "compile".to_string(),
            metrics: InsightMetrics {
                success_rate: 0.75,
                ..InsightMetrics::default()
            },
            window_start: None,
            window_end: None,
        });
        snapshot
    }

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn metrics_are_empty_before_first_commit() {
        let (state, _) = state();

        let response = metrics_handler(State(state)).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "");
    }

    #[tokio::test]
    async fn metrics_render_committed_snapshot() {
        let (state, registry) = state();
        registry.commit(job_snapshot()).unwrap();

        let response = metrics_handler(State(state)).await.into_response();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            metrics::CONTENT_TYPE
        );
        let body = body_string(response).await;
        assert!(body.contains("# TYPE circleci_custom_job_insight_success_rate gauge"));
        assert!(body.contains(
            "circleci_custom_job_insight_success_rate{branch=\"main\",job=\"compile\",repo=\"orgA/r1\",workflow=\"build\"} 0.75"
        ));
    }

    #[tokio::test]
    async fn healthz_reports_pending_then_ok() {
        let (state, registry) = state();

        let Json(pending) = healthz(State(state.clone())).await;
        assert_eq!(pending.status, "pending");
        assert!(pending.last_refresh.is_none());

        registry.commit(job_snapshot()).unwrap();
        registry.record_failure();

        let Json(ok) = healthz(State(state)).await;
        assert_eq!(ok.status, "ok");
        assert!(ok.last_refresh.is_some());
        assert_eq!(ok.samples, 6);
        assert_eq!(ok.failed_cycles, 1);
    }

    #[tokio::test]
    async fn serve_stops_on_shutdown() {
        let (_, registry) = state();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(serve(listener, registry, async move {
            let _ = rx.await;
        }));

        let body = reqwest::get(format!("http://{addr}/healthz"))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("\"status\":\"pending\""));

        tx.send(()).unwrap();
        server.await.unwrap().unwrap();
    }
}
