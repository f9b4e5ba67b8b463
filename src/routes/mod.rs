//! HTTP gateway: merges the subrouters and maps core errors onto status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use tracing::error;

use crate::error::StaError;
use crate::SensorThingsStore;

mod health;
mod query;

// ---

pub fn router(store: SensorThingsStore) -> Router {
    // ---
    Router::new()
        .merge(query::router())
        .merge(health::router())
        .with_state(store)
}

/// Error body returned by every handler.
pub struct ApiError(StaError);

impl From<StaError> for ApiError {
    fn from(err: StaError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match &self.0 {
            StaError::IncompleteEntity(_) | StaError::IllegalArgument(_) => StatusCode::BAD_REQUEST,
            StaError::NoSuchEntity(_) => StatusCode::NOT_FOUND,
            StaError::ReadOnly => StatusCode::FORBIDDEN,
            StaError::ConsistencyViolation(_)
            | StaError::Configuration(_)
            | StaError::Serialization(_)
            | StaError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    #[test]
    fn client_errors_map_to_4xx() {
        // ---
        assert_eq!(
            ApiError::from(StaError::incomplete("name")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(StaError::no_such_entity("Thing 4")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::from(StaError::ReadOnly).status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn internal_errors_map_to_500() {
        // ---
        assert_eq!(
            ApiError::from(StaError::configuration("no adjacency")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::from(StaError::consistency("duplicate key")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
