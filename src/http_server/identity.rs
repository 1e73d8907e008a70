//! Caller identity from request headers
//!
//! Authentication happens upstream; the auth layer forwards the verified
//! identity as `x-user-id`, `x-user-role` and (optionally)
//! `x-organization-id`.

use axum::http::HeaderMap;

use super::errors::{unauthenticated, ApiError};
use crate::promotion::{Caller, Role};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

pub fn caller_from_headers(headers: &HeaderMap) -> Result<Caller, ApiError> {
    let user_id = header(headers, USER_ID_HEADER)
        .ok_or_else(|| unauthenticated(format!("missing {} header", USER_ID_HEADER)))?;
    let role: Role = header(headers, ROLE_HEADER)
        .ok_or_else(|| unauthenticated(format!("missing {} header", ROLE_HEADER)))?
        .parse()
        .map_err(|_| unauthenticated(format!("unrecognized {} header", ROLE_HEADER)))?;

    let mut caller = Caller::new(user_id, role);
    if let Some(org) = header(headers, ORGANIZATION_HEADER) {
        caller = caller.with_organization(org);
    }
    Ok(caller)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderValue, StatusCode};

    #[test]
    fn test_full_identity() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("alice"));
        headers.insert(ROLE_HEADER, HeaderValue::from_static("admin"));
        headers.insert(ORGANIZATION_HEADER, HeaderValue::from_static("acme"));

        let caller = caller_from_headers(&headers).unwrap();
        assert_eq!(caller.user_id, "alice");
        assert_eq!(caller.role, Role::Admin);
        assert!(caller.is_org_admin("acme"));
    }

    #[test]
    fn test_missing_user_is_unauthenticated() {
        let mut headers = HeaderMap::new();
        headers.insert(ROLE_HEADER, HeaderValue::from_static("admin"));
        let (status, _) = caller_from_headers(&headers).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_unknown_role_is_unauthenticated() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("alice"));
        headers.insert(ROLE_HEADER, HeaderValue::from_static("root"));
        let (status, _) = caller_from_headers(&headers).unwrap_err();
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }
}
