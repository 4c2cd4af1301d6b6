//! Router assembly and HTTP server lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::routing::{delete, get, put};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio_util::sync::CancellationToken;

use reef_inventory::Inventory;
use reef_scheduler::ClusterStatusTransition;

use crate::config::Config;
use crate::metrics::update_inventory_gauges;
use crate::routes::clusters;

/// Shared state of all HTTP handlers.
pub struct AppState {
    /// Cluster inventory.
    pub inventory: Arc<dyn Inventory>,
    /// Status transition coordinator used by the intake path.
    pub transition: ClusterStatusTransition,
    /// Component names forming priority wave 1.
    pub pre_components: Vec<String>,
    /// Prometheus render handle.
    pub metrics: PrometheusHandle,
}

/// Builds the service router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route(
            "/{contract_version}/clusters",
            put(clusters::create_or_update).post(clusters::create_or_update),
        )
        .route(
            "/{contract_version}/clusters/{cluster}",
            delete(clusters::delete_cluster),
        )
        .route(
            "/{contract_version}/clusters/{cluster}/configs/{config_version}/status",
            get(clusters::get_status),
        )
        .route(
            "/{contract_version}/clusters/{cluster}/statusChanges/{offset}",
            get(clusters::status_changes),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics(State(app): State<Arc<AppState>>) -> String {
    update_inventory_gauges(app.inventory.as_ref()).await;
    app.metrics.render()
}

/// The HTTP server of the reef service.
pub struct Server {
    config: Config,
    state: Arc<AppState>,
}

impl Server {
    /// Creates a server.
    #[must_use]
    pub fn new(config: Config, state: Arc<AppState>) -> Self {
        Self { config, state }
    }

    /// Serves until `shutdown` fires, then drains gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error when binding fails or TLS material cannot be read.
    pub async fn serve(self, shutdown: CancellationToken) -> std::io::Result<()> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let app = router(self.state);

        if let (Some(crt), Some(key)) = (&self.config.ssl_crt, &self.config.ssl_key) {
            tracing::info!(%addr, "webserver starting (TLS)");
            let tls = RustlsConfig::from_pem_file(crt, key).await?;
            let handle = axum_server::Handle::new();
            let drainer = handle.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                tracing::info!("webserver stopping");
                drainer.graceful_shutdown(Some(Duration::from_secs(5)));
            });
            axum_server::bind_rustls(addr, tls)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        } else {
            tracing::info!(%addr, "webserver starting");
            let listener = tokio::net::TcpListener::bind(addr).await?;
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown.cancelled().await;
                    tracing::info!("webserver stopping");
                })
                .await?;
        }
        tracing::info!("webserver stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use reef_inventory::InMemoryInventory;
    use reef_scheduler::{InMemoryReconciliationRepository, ReconciliationRepository};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn test_state() -> (Arc<AppState>, Arc<InMemoryReconciliationRepository>) {
        let inventory: Arc<dyn Inventory> = Arc::new(InMemoryInventory::new());
        let repository = Arc::new(InMemoryReconciliationRepository::new());
        let transition = ClusterStatusTransition::new(
            inventory.clone(),
            repository.clone() as Arc<dyn ReconciliationRepository>,
        );
        let state = Arc::new(AppState {
            inventory,
            transition,
            pre_components: vec!["istio".to_string()],
            metrics: PrometheusBuilder::new().build_recorder().handle(),
        });
        (state, repository)
    }

    fn submission() -> Value {
        json!({
            "cluster": "c1",
            "kubeconfig": "apiVersion: v1",
            "kymaVersion": "2.4.0",
            "components": [
                {"name": "istio", "namespace": "istio-system"},
                {"name": "logging", "namespace": "kyma-system"}
            ]
        })
    }

    async fn put_cluster(state: &Arc<AppState>, body: Value) -> (StatusCode, Value) {
        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/v1/clusters")
                    .header("host", "reconciler.local")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn create_or_update_enqueues_and_returns_status_url() {
        let (state, repository) = test_state();
        let (status, body) = put_cluster(&state, submission()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["cluster"], "c1");
        assert_eq!(body["configurationVersion"], 1);
        assert_eq!(body["status"], "reconciling");
        assert_eq!(
            body["statusUrl"],
            "reconciler.local/v1/clusters/c1/configs/1/status"
        );

        let reconciliations = repository
            .get_reconciliations(&reef_scheduler::ReconciliationFilter::default())
            .await
            .unwrap();
        assert_eq!(reconciliations.len(), 1);

        let operations = repository
            .get_operations(&reconciliations[0].scheduling_id, None)
            .await
            .unwrap();
        let istio = operations.iter().find(|op| op.component == "istio").unwrap();
        assert_eq!(istio.priority, 1);
    }

    #[tokio::test]
    async fn identical_resubmission_is_idempotent() {
        let (state, repository) = test_state();
        let (_, first) = put_cluster(&state, submission()).await;
        let (status, second) = put_cluster(&state, submission()).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["configurationVersion"], second["configurationVersion"]);

        let reconciliations = repository
            .get_reconciliations(&reef_scheduler::ReconciliationFilter::default())
            .await
            .unwrap();
        assert_eq!(reconciliations.len(), 1);
    }

    #[tokio::test]
    async fn malformed_payload_is_rejected_with_text_body() {
        let (state, _) = test_state();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/v1/clusters")
                    .body(Body::from("{not json"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.starts_with("Bad Request\n\n"));
    }

    #[tokio::test]
    async fn get_status_returns_configured_version() {
        let (state, _) = test_state();
        put_cluster(&state, submission()).await;

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/v1/clusters/c1/configs/1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "reconciling");
        assert!(body.get("statusUrl").is_none());
    }

    #[tokio::test]
    async fn unknown_cluster_status_is_not_found() {
        let (state, _) = test_state();
        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/v1/clusters/nope/configs/1/status")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn status_changes_requires_valid_offset() {
        let (state, _) = test_state();
        put_cluster(&state, submission()).await;

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/v1/clusters/c1/statusChanges/24h")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let changes = body.as_array().unwrap();
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0]["status"], "reconcilable");
        assert_eq!(changes[1]["status"], "reconciling");

        let response = router(state)
            .oneshot(
                Request::builder()
                    .uri("/v1/clusters/c1/statusChanges/yesterday")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn delete_returns_no_content_or_not_found() {
        let (state, _) = test_state();
        put_cluster(&state, submission()).await;

        let response = router(state.clone())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/clusters/c1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = router(state)
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/v1/clusters/unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_contract_version_is_bad_request() {
        let (state, _) = test_state();
        let (status, _) = {
            let response = router(state)
                .oneshot(
                    Request::builder()
                        .method("PUT")
                        .uri("/latest/clusters")
                        .body(Body::from(submission().to_string()))
                        .unwrap(),
                )
                .await
                .unwrap();
            (response.status(), ())
        };
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_and_metrics_respond() {
        let (state, _) = test_state();
        let response = router(state.clone())
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = router(state)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
