use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;
use uuid::Uuid;

use crate::domain::errors::DomainError;

pub type ApiResult<T> = Result<T, ApiProblem>;

#[derive(Debug)]
pub struct ApiProblem {
    status: StatusCode,
    title: &'static str,
    detail: String,
    kind: &'static str,
    correlation_id: String,
}

impl ApiProblem {
    pub fn from_domain(error: DomainError) -> Self {
        match error {
            DomainError::Validation(detail) => Self::new(
                StatusCode::BAD_REQUEST,
                "Validation failed",
                "/problems/validation",
                detail,
            ),
            DomainError::NotFound(detail) => Self::new(
                StatusCode::NOT_FOUND,
                "Not found",
                "/problems/not-found",
                detail,
            ),
            DomainError::Conflict(detail) => Self::new(
                StatusCode::CONFLICT,
                "Conflict",
                "/problems/conflict",
                detail,
            ),
            DomainError::Timeout(detail) | DomainError::Unavailable(detail) => Self::server_error(
                "Store unavailable",
                "/problems/store-unavailable",
                detail,
            ),
            DomainError::Storage(detail) => Self::server_error(
                "Storage error",
                "/problems/storage",
                detail,
            ),
            DomainError::Internal(detail) => Self::server_error(
                "Internal server error",
                "/problems/internal",
                detail,
            ),
        }
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::from_domain(DomainError::validation(detail))
    }

    fn server_error(title: &'static str, kind: &'static str, detail: String) -> Self {
        let problem = Self::new(StatusCode::INTERNAL_SERVER_ERROR, title, kind, detail);
        error!(
            correlation_id = %problem.correlation_id,
            title,
            detail = %problem.detail,
            "request failed with a server error"
        );
        problem
    }

    fn new(
        status: StatusCode,
        title: &'static str,
        kind: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            title,
            detail: detail.into(),
            kind,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    kind: String,
    title: String,
    status: u16,
    detail: String,
    correlation_id: String,
}

impl IntoResponse for ApiProblem {
    fn into_response(self) -> Response {
        let payload = ProblemDetails {
            kind: self.kind.to_string(),
            title: self.title.to_string(),
            status: self.status.as_u16(),
            detail: self.detail,
            correlation_id: self.correlation_id,
        };

        let mut response = (self.status, Json(payload)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );

        response
    }
}
