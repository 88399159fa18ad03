//! Request-scoped context extracted from HTTP requests.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use caphub_id::RequestId;

use crate::api::error::ApiError;
use crate::principal::{Principal, Role};

pub const PRINCIPAL_SUBJECT_HEADER: &str = "x-principal-subject";
pub const PRINCIPAL_ROLE_HEADER: &str = "x-principal-role";
pub const PRINCIPAL_SCOPE_HEADER: &str = "x-principal-scope";

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub principal: Option<Principal>,
}

impl RequestContext {
    /// The caller's identity, or 401 for handlers that require one.
    pub fn require_principal(&self) -> Result<&Principal, ApiError> {
        self.principal.as_ref().ok_or_else(|| {
            ApiError::unauthorized(
                "unauthorized",
                "Missing x-principal-* identity headers",
            )
            .with_request_id(self.request_id.clone())
        })
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

/// Read the identity the fronting proxy injected, if any.
///
/// A request with no subject header is anonymous (`Ok(None)`); a request
/// with a subject but a missing or malformed role/scope is rejected, not
/// downgraded.
fn principal_from_headers(
    headers: &HeaderMap,
    request_id: &str,
) -> Result<Option<Principal>, ApiError> {
    let Some(subject) = header_string(headers, PRINCIPAL_SUBJECT_HEADER) else {
        return Ok(None);
    };

    let subject = subject.trim().to_string();
    if subject.is_empty() {
        return Err(ApiError::unauthorized(
            "invalid_principal",
            "x-principal-subject cannot be empty",
        )
        .with_request_id(request_id.to_string()));
    }

    let Some(role_raw) = header_string(headers, PRINCIPAL_ROLE_HEADER) else {
        return Err(ApiError::unauthorized(
            "invalid_principal",
            "x-principal-role is required when x-principal-subject is set",
        )
        .with_request_id(request_id.to_string()));
    };
    let Some(role) = Role::parse(role_raw.trim()) else {
        return Err(ApiError::unauthorized(
            "invalid_principal",
            format!("unknown role '{}'", role_raw.trim()),
        )
        .with_request_id(request_id.to_string()));
    };

    let scope_id = header_string(headers, PRINCIPAL_SCOPE_HEADER)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    if role.requires_scope() && scope_id.is_none() {
        return Err(ApiError::unauthorized(
            "invalid_principal",
            format!("role '{}' requires x-principal-scope", role.as_str()),
        )
        .with_request_id(request_id.to_string()));
    }

    Ok(Some(Principal {
        subject,
        role,
        scope_id,
    }))
}

impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = header_string(&parts.headers, "x-request-id")
            .unwrap_or_else(|| RequestId::new().to_string());

        let principal = principal_from_headers(&parts.headers, &request_id)?;

        Ok(Self {
            request_id,
            principal,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(entries: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in entries {
            map.insert(
                axum::http::HeaderName::try_from(*name).expect("header name"),
                HeaderValue::from_str(value).expect("header value"),
            );
        }
        map
    }

    #[test]
    fn no_subject_header_means_anonymous() {
        let principal = principal_from_headers(&headers(&[]), "req_1").expect("anonymous ok");
        assert!(principal.is_none());
    }

    #[test]
    fn full_identity_parses() {
        let principal = principal_from_headers(
            &headers(&[
                (PRINCIPAL_SUBJECT_HEADER, "alice"),
                (PRINCIPAL_ROLE_HEADER, "team_lead"),
                (PRINCIPAL_SCOPE_HEADER, "team_a"),
            ]),
            "req_2",
        )
        .expect("valid identity")
        .expect("present");
        assert_eq!(principal.subject, "alice");
        assert_eq!(principal.role, Role::TeamLead);
        assert_eq!(principal.scope_id.as_deref(), Some("team_a"));
    }

    #[test]
    fn center_admin_needs_no_scope() {
        let principal = principal_from_headers(
            &headers(&[
                (PRINCIPAL_SUBJECT_HEADER, "root"),
                (PRINCIPAL_ROLE_HEADER, "center_admin"),
            ]),
            "req_3",
        )
        .expect("valid identity")
        .expect("present");
        assert_eq!(principal.role, Role::CenterAdmin);
        assert!(principal.scope_id.is_none());
    }

    #[test]
    fn scoped_role_without_scope_is_rejected() {
        let err = principal_from_headers(
            &headers(&[
                (PRINCIPAL_SUBJECT_HEADER, "bob"),
                (PRINCIPAL_ROLE_HEADER, "dept_admin"),
            ]),
            "req_4",
        )
        .expect_err("scope required");
        assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let err = principal_from_headers(
            &headers(&[
                (PRINCIPAL_SUBJECT_HEADER, "eve"),
                (PRINCIPAL_ROLE_HEADER, "superuser"),
                (PRINCIPAL_SCOPE_HEADER, "everything"),
            ]),
            "req_5",
        )
        .expect_err("unknown role");
        assert_eq!(err.problem.code, "invalid_principal");
    }
}
