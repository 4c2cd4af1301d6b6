//! Cluster intake and status endpoints.
//!
//! All endpoints live under `/v{contractVersion}`. The create-or-update
//! handler couples the inventory upsert with the reconciliation enqueue; a
//! cluster that is already being reconciled makes the submission an
//! idempotent no-op.

use std::sync::Arc;

use axum::extract::{OriginalUri, Path, State};
use axum::http::header::HOST;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::Serialize;

use reef_inventory::{ClusterModel, ClusterStatus, ClusterStatusKind, State as ClusterState};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Response payload for cluster submissions and status queries.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResponse {
    /// Cluster identifier.
    pub cluster: String,
    /// Cluster entity version.
    pub cluster_version: i64,
    /// Configuration version of this snapshot.
    pub configuration_version: i64,
    /// Authoritative status of the configuration version.
    pub status: ClusterStatusKind,
    /// URL to poll for status updates; only set on submissions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_url: Option<String>,
}

impl ClusterResponse {
    fn from_state(state: &ClusterState) -> Self {
        Self {
            cluster: state.cluster.cluster.clone(),
            cluster_version: state.cluster.version,
            configuration_version: state.configuration.version,
            status: state.status.status,
            status_url: None,
        }
    }

    fn with_status_url(mut self, status_url: String) -> Self {
        self.status_url = Some(status_url);
        self
    }
}

/// Parses the `v{n}` contract-version path segment.
fn parse_contract_version(segment: &str) -> ApiResult<u64> {
    segment
        .strip_prefix('v')
        .unwrap_or(segment)
        .parse::<u64>()
        .map_err(|_| {
            ApiError::bad_request(format!(
                "contract version undefined: '{segment}' is not of the form v<number>"
            ))
        })
}

fn request_host(headers: &HeaderMap) -> &str {
    headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("localhost")
}

/// `PUT|POST /v{contractVersion}/clusters`
pub async fn create_or_update(
    State(app): State<Arc<AppState>>,
    Path(contract_version): Path<String>,
    OriginalUri(uri): OriginalUri,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<ClusterResponse>> {
    let contract = parse_contract_version(&contract_version)?;
    let model: ClusterModel = serde_json::from_str(&body)
        .map_err(|e| ApiError::bad_request(format!("failed to unmarshal JSON payload: {e}")))?;

    let snapshot = app.inventory.create_or_update(contract, &model).await?;

    match app
        .transition
        .start_reconciliation(&snapshot, &app.pre_components)
        .await
    {
        Ok(reconciliation) => {
            tracing::debug!(
                cluster = %model.cluster,
                scheduling_id = %reconciliation.scheduling_id,
                "submission enqueued for reconciliation"
            );
        }
        Err(err) if err.is_duplicate() => {
            tracing::info!(
                cluster = %model.cluster,
                "cluster already enqueued; submission treated as idempotent"
            );
        }
        Err(err) => return Err(err.into()),
    }

    let current = app
        .inventory
        .get(&model.cluster, snapshot.configuration.version)
        .await?;
    let status_url = format!(
        "{}{}/{}/configs/{}/status",
        request_host(&headers),
        uri.path(),
        current.cluster.cluster,
        current.configuration.version,
    );
    Ok(Json(
        ClusterResponse::from_state(&current).with_status_url(status_url),
    ))
}

/// `GET /v{contractVersion}/clusters/{cluster}/configs/{configVersion}/status`
pub async fn get_status(
    State(app): State<Arc<AppState>>,
    Path((contract_version, cluster, config_version)): Path<(String, String, i64)>,
) -> ApiResult<Json<ClusterResponse>> {
    parse_contract_version(&contract_version)?;
    let state = app.inventory.get(&cluster, config_version).await?;
    Ok(Json(ClusterResponse::from_state(&state)))
}

/// `GET /v{contractVersion}/clusters/{cluster}/statusChanges/{offset}`
pub async fn status_changes(
    State(app): State<Arc<AppState>>,
    Path((contract_version, cluster, offset)): Path<(String, String, String)>,
) -> ApiResult<Json<Vec<ClusterStatus>>> {
    parse_contract_version(&contract_version)?;
    let lookback = humantime::parse_duration(&offset)
        .map_err(|e| ApiError::bad_request(format!("invalid offset '{offset}': {e}")))?;
    let changes = app.inventory.status_changes(&cluster, lookback).await?;
    Ok(Json(changes))
}

/// `DELETE /v{contractVersion}/clusters/{cluster}`
pub async fn delete_cluster(
    State(app): State<Arc<AppState>>,
    Path((contract_version, cluster)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    parse_contract_version(&contract_version)?;

    if let Err(err) = app.inventory.get_latest(&cluster).await {
        if err.is_not_found() {
            return Err(ApiError::not_found(format!(
                "deletion impossible: cluster '{cluster}' not found"
            )));
        }
        return Err(err.into());
    }

    app.inventory.delete(&cluster).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contract_version_parsing() {
        assert_eq!(parse_contract_version("v1").unwrap(), 1);
        assert_eq!(parse_contract_version("v42").unwrap(), 42);
        assert_eq!(parse_contract_version("2").unwrap(), 2);
        assert!(parse_contract_version("latest").is_err());
        assert!(parse_contract_version("v").is_err());
    }
}
