//! Access Gate: resolves the caller from a bearer token on every protected
//! request and enforces role checks. Nothing is cached between requests.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;
use tracing::warn;

use crate::auth::TokenIssuer;
use crate::directory::IdentityDirectory;
use crate::error::{ApiError, AuthFailure};
use crate::models::{Identity, Role};
use crate::rest::AppState;

/// The authenticated caller, inserted into request extensions by
/// [`auth_middleware`].
#[derive(Debug, Clone)]
pub struct CurrentIdentity(pub Identity);

pub fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .ok_or(ApiError::Unauthorized(AuthFailure::MissingToken))?;

    match value.split_once(' ') {
        Some((scheme, token))
            if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() =>
        {
            Ok(token.trim())
        }
        _ => Err(ApiError::Unauthorized(AuthFailure::MissingToken)),
    }
}

/// Token → claims → directory lookup.
pub fn resolve_identity(
    tokens: &TokenIssuer,
    directory: &IdentityDirectory,
    headers: &HeaderMap,
) -> Result<Identity, ApiError> {
    let token = bearer_token(headers)?;
    let claims = tokens.validate_jwt(token)?;
    directory
        .find_by_name(&claims.sub)
        .ok_or(ApiError::Unauthorized(AuthFailure::UnknownSubject))
}

pub fn require_role(identity: &Identity, allowed: &[Role]) -> Result<(), ApiError> {
    if allowed.contains(&identity.role) {
        Ok(())
    } else {
        warn!(name = %identity.name, role = %identity.role, "role not permitted");
        Err(ApiError::Forbidden(format!(
            "role '{}' is not permitted to perform this operation",
            identity.role
        )))
    }
}

pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let identity = resolve_identity(&state.tokens, &state.directory, req.headers()).map_err(|err| {
        warn!(path = %req.uri().path(), code = err.code(), "request rejected by access gate");
        err
    })?;

    req.extensions_mut().insert(CurrentIdentity(identity));
    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Duration;

    fn headers_with(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    fn fixture() -> (TokenIssuer, IdentityDirectory) {
        let directory = IdentityDirectory::new(4);
        directory.seed_defaults().unwrap();
        (TokenIssuer::new(b"gate-test", 30), directory)
    }

    fn bearer(token: &str) -> HeaderMap {
        headers_with(&format!("Bearer {}", token))
    }

    fn failure(err: ApiError) -> AuthFailure {
        match err {
            ApiError::Unauthorized(reason) => reason,
            other => panic!("expected Unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn test_bearer_token_parsing() {
        assert_eq!(bearer_token(&headers_with("Bearer abc")).unwrap(), "abc");
        assert_eq!(bearer_token(&headers_with("bearer  abc ")).unwrap(), "abc");
        assert!(bearer_token(&headers_with("Basic abc")).is_err());
        assert!(bearer_token(&headers_with("Bearer ")).is_err());
        assert!(bearer_token(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_state_machine() {
        let (tokens, directory) = fixture();

        let err = resolve_identity(&tokens, &directory, &HeaderMap::new()).unwrap_err();
        assert_eq!(failure(err), AuthFailure::MissingToken);

        let err = resolve_identity(&tokens, &directory, &bearer("not.a.jwt")).unwrap_err();
        assert_eq!(failure(err), AuthFailure::InvalidToken);

        let expired = tokens.create_jwt_with_ttl("admin", Duration::minutes(-1)).unwrap();
        let err = resolve_identity(&tokens, &directory, &bearer(&expired)).unwrap_err();
        assert_eq!(failure(err), AuthFailure::ExpiredToken);

        let ghost = tokens.create_jwt("ghost").unwrap();
        let err = resolve_identity(&tokens, &directory, &bearer(&ghost)).unwrap_err();
        assert_eq!(failure(err), AuthFailure::UnknownSubject);

        let valid = tokens.create_jwt("student1").unwrap();
        let identity = resolve_identity(&tokens, &directory, &bearer(&valid)).unwrap();
        assert_eq!(identity.role, Role::Student);
    }

    #[test]
    fn test_require_role() {
        let (_, directory) = fixture();
        let student = directory.find_by_name("student1").unwrap();
        assert!(require_role(&student, &Role::ALL).is_ok());
        assert!(matches!(require_role(&student, &Role::STAFF), Err(ApiError::Forbidden(_))));
    }
}
