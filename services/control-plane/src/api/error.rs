use axum::{
    http::{header::CONTENT_TYPE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::CoreError;

#[derive(Debug, Serialize)]
pub struct ProblemDetails {
    #[serde(rename = "type")]
    pub r#type: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<String>,
    pub code: String,
    pub request_id: String,
    pub retryable: bool,
}

impl ProblemDetails {
    fn new(status: StatusCode, code: impl Into<String>, detail: impl Into<String>) -> Self {
        let code = code.into();
        let title = status
            .canonical_reason()
            .unwrap_or("Unknown Error")
            .to_string();
        Self {
            r#type: format!("https://caphub.dev/problems/{code}"),
            title,
            status: status.as_u16(),
            detail: detail.into(),
            instance: None,
            code,
            request_id: "unknown".to_string(),
            retryable: false,
        }
    }

    fn set_request_id(&mut self, request_id: impl Into<String>) {
        let request_id = request_id.into();
        self.request_id = request_id.clone();
        if self.instance.is_none() {
            self.instance = Some(request_id);
        }
    }

    fn set_retryable(&mut self, retryable: bool) {
        self.retryable = retryable;
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub problem: Box<ProblemDetails>,
}

impl ApiError {
    pub fn bad_request(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::BAD_REQUEST;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::NOT_FOUND;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn conflict(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::CONFLICT;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn unprocessable_entity(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::UNPROCESSABLE_ENTITY;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn unauthorized(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::UNAUTHORIZED;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn forbidden(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::FORBIDDEN;
        let problem = Box::new(ProblemDetails::new(status, code, message));
        Self { status, problem }
    }

    pub fn bad_gateway(code: impl Into<String>, message: impl Into<String>) -> Self {
        let status = StatusCode::BAD_GATEWAY;
        let mut problem = Box::new(ProblemDetails::new(status, code, message));
        problem.set_retryable(true);
        Self { status, problem }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.problem.set_request_id(request_id);
        self
    }

    /// Map a domain error onto its one HTTP rendering.
    ///
    /// Database errors are logged here and masked; everything else carries
    /// its message through to the caller.
    pub fn from_core(err: CoreError, request_id: &str) -> Self {
        let api = match &err {
            CoreError::Forbidden(msg) => ApiError::forbidden("forbidden", msg.clone()),
            CoreError::Validation(msg) => {
                ApiError::unprocessable_entity("validation_failed", msg.clone())
            }
            CoreError::QuotaExceeded { .. } => {
                ApiError::conflict("quota_exceeded", err.to_string())
            }
            CoreError::NotFound(msg) => ApiError::not_found("not_found", msg.clone()),
            CoreError::Conflict(msg) => ApiError::conflict("conflict", msg.clone()),
            CoreError::Provisioning(_) => {
                ApiError::bad_gateway("provisioning_failed", err.to_string())
            }
            CoreError::Db(e) => {
                tracing::error!(error = %e, request_id, "database error while handling request");
                ApiError::internal("internal_error", "Internal server error")
            }
        };
        api.with_request_id(request_id.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.problem)).into_response();
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ResourceKind;

    #[test]
    fn quota_exceeded_maps_to_conflict_with_amounts() {
        let err = CoreError::QuotaExceeded {
            resource: ResourceKind::Cpu,
            requested: 2,
            available: 1,
            detail: "quota exceeded for 'team_a' at site 'east-1'".to_string(),
        };
        let api = ApiError::from_core(err, "req_1");
        assert_eq!(api.status, StatusCode::CONFLICT);
        assert_eq!(api.problem.code, "quota_exceeded");
        assert!(api.problem.detail.contains("need 2 cpu"));
        assert!(api.problem.detail.contains("available 1"));
        assert_eq!(api.problem.request_id, "req_1");
    }

    #[test]
    fn status_mapping_covers_the_taxonomy() {
        let cases = [
            (CoreError::forbidden("no"), StatusCode::FORBIDDEN),
            (CoreError::validation("bad"), StatusCode::UNPROCESSABLE_ENTITY),
            (CoreError::not_found("gone"), StatusCode::NOT_FOUND),
            (CoreError::conflict("busy"), StatusCode::CONFLICT),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError::from_core(err, "req_2").status, status);
        }
    }

    #[test]
    fn database_errors_are_masked() {
        let api = ApiError::from_core(CoreError::Db(sqlx::Error::PoolClosed), "req_3");
        assert_eq!(api.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(api.problem.detail, "Internal server error");
    }

    #[test]
    fn problem_type_carries_the_code() {
        let api = ApiError::not_found("not_found", "missing");
        assert_eq!(api.problem.r#type, "https://caphub.dev/problems/not_found");
    }
}
