//! Result intake handlers
//!
//! Endpoints the framework runners post to. The request id in the path is the one
//! the spawning service put into the runner's environment.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use nucleus_core::domain::result::{DiscoveryResult, ExecutionResult};
use std::sync::Arc;
use uuid::Uuid;

use crate::api::broker::ResultBroker;
use crate::api::error::{ApiError, ApiResult};

/// POST /test-list/{request_id}
pub async fn post_test_list(
    State(broker): State<Arc<ResultBroker>>,
    Path(request_id): Path<Uuid>,
    Json(result): Json<DiscoveryResult>,
) -> ApiResult<StatusCode> {
    tracing::debug!(
        "Received {} discovered tests for request {}",
        result.tests.len(),
        request_id
    );

    if broker.deliver_discovery(request_id, result) {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound(format!(
            "No discovery pending for request {}",
            request_id
        )))
    }
}

/// POST /results/{request_id}
pub async fn post_results(
    State(broker): State<Arc<ResultBroker>>,
    Path(request_id): Path<Uuid>,
    Json(result): Json<ExecutionResult>,
) -> ApiResult<StatusCode> {
    tracing::debug!(
        "Received {} test results for request {}",
        result.test_payload.len(),
        request_id
    );

    if broker.deliver_execution(request_id, result) {
        Ok(StatusCode::OK)
    } else {
        Err(ApiError::NotFound(format!(
            "No execution pending for request {}",
            request_id
        )))
    }
}
