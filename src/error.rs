//! Error taxonomy and the single place where errors become HTTP responses.

use axum::{
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::json;
use thiserror::Error;

use crate::models::RecordId;

#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("{entity} with id {id} not found")]
    NotFound { entity: String, id: RecordId },
    #[error("{entity} with id {id} already exists")]
    DuplicateId { entity: String, id: RecordId },
    #[error("{entity} records must be JSON objects")]
    NotAnObject { entity: String },
    #[error("{entity} id must be an integer or a string")]
    InvalidId { entity: String },
    #[error("{entity} has no integer id left to assign")]
    IdsExhausted { entity: String },
    #[error("'{id}' is reserved and cannot be used as a {entity} id")]
    ReservedId { entity: String, id: String },
}

#[derive(Debug, Error, PartialEq)]
pub enum DirectoryError {
    #[error("name '{0}' is already registered")]
    NameTaken(String),
    #[error("password hashing failed: {0}")]
    Hash(String),
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("could not validate credentials")]
    Invalid,
    #[error("token could not be signed")]
    Signing,
}

/// Why a request was rejected as unauthenticated.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum AuthFailure {
    #[error("missing bearer token")]
    MissingToken,
    #[error("could not validate credentials")]
    InvalidToken,
    #[error("token expired")]
    ExpiredToken,
    #[error("could not validate credentials")]
    UnknownSubject,
    #[error("incorrect name or secret")]
    BadCredentials,
}

impl AuthFailure {
    pub fn code(&self) -> &'static str {
        match self {
            AuthFailure::MissingToken => "missing_token",
            AuthFailure::InvalidToken | AuthFailure::UnknownSubject => "invalid_token",
            AuthFailure::ExpiredToken => "token_expired",
            AuthFailure::BadCredentials => "invalid_credentials",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(AuthFailure),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Unauthorized(reason) => reason.code(),
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::ServiceUnavailable(_) => "service_unavailable",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(code = self.code(), "{}", self);
        }
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "code": self.code(),
            "timestamp": Utc::now().to_rfc3339(),
        }));
        let mut response = (status, body).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => ApiError::NotFound(err.to_string()),
            StoreError::DuplicateId { .. }
            | StoreError::NotAnObject { .. }
            | StoreError::InvalidId { .. }
            | StoreError::IdsExhausted { .. }
            | StoreError::ReservedId { .. } => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        match err {
            DirectoryError::NameTaken(_) => ApiError::BadRequest(err.to_string()),
            DirectoryError::Hash(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => ApiError::Unauthorized(AuthFailure::ExpiredToken),
            TokenError::Invalid => ApiError::Unauthorized(AuthFailure::InvalidToken),
            TokenError::Signing => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        // Missing route params are a router bug, not the caller's.
        if rejection.status().is_server_error() {
            ApiError::Internal(rejection.body_text())
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::Unauthorized(AuthFailure::MissingToken).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(ApiError::Forbidden("no".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("gone".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::BadRequest("bad".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::ServiceUnavailable("off".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_expired_and_invalid_have_distinct_codes() {
        let expired = ApiError::from(TokenError::Expired);
        let invalid = ApiError::from(TokenError::Invalid);
        assert_eq!(expired.code(), "token_expired");
        assert_eq!(invalid.code(), "invalid_token");
        assert_eq!(expired.status(), invalid.status());
    }

    #[test]
    fn test_store_errors_map_to_status() {
        let not_found = StoreError::NotFound { entity: "Course".into(), id: RecordId::Int(4) };
        assert_eq!(not_found.to_string(), "Course with id 4 not found");
        assert_eq!(ApiError::from(not_found).status(), StatusCode::NOT_FOUND);
        let dup = StoreError::DuplicateId { entity: "Course".into(), id: RecordId::Int(1) };
        assert_eq!(ApiError::from(dup).status(), StatusCode::BAD_REQUEST);
        let exhausted = StoreError::IdsExhausted { entity: "Course".into() };
        assert_eq!(ApiError::from(exhausted).status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unauthorized_response_has_challenge_header() {
        let response = ApiError::Unauthorized(AuthFailure::InvalidToken).into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers().get(header::WWW_AUTHENTICATE).unwrap(), "Bearer");
    }
}
