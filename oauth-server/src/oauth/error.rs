use crate::registry::RegistryError;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::WWW_AUTHENTICATE;
use http::{HeaderValue, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Failures of token issuance and introspection, each mapping to an OAuth error code
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OAuthError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error("{0}")]
    RestrictedAccess(String),
    #[error("{0}")]
    ServerError(String),
    #[error("{0}")]
    InvalidClient(String),
    #[error("{0}")]
    UnauthorizedClient(String),
    #[error("{0}")]
    InvalidGrant(String),
    #[error("{0}")]
    InvalidScope(String),
    #[error("{0}")]
    UnsupportedGrantType(String),
}

/// OAuth 2.0 error response body (RFC 6749 Section 5.2)
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OAuthErrorBody {
    /// Error code
    pub error: String,
    /// Human-readable error description
    pub error_description: String,
}

impl OAuthError {
    pub fn code(&self) -> &'static str {
        match self {
            OAuthError::NotFound(_) => "not_found",
            OAuthError::InvalidRequest(_) => "invalid_request",
            OAuthError::RestrictedAccess(_) => "restricted_access",
            OAuthError::ServerError(_) => "server_error",
            OAuthError::InvalidClient(_) => "invalid_client",
            OAuthError::UnauthorizedClient(_) => "unauthorized_client",
            OAuthError::InvalidGrant(_) => "invalid_grant",
            OAuthError::InvalidScope(_) => "invalid_scope",
            OAuthError::UnsupportedGrantType(_) => "unsupported_grant_type",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuthError::NotFound(_) => StatusCode::NOT_FOUND,
            OAuthError::RestrictedAccess(_) => StatusCode::FORBIDDEN,
            OAuthError::ServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            OAuthError::InvalidClient(_) => StatusCode::UNAUTHORIZED,
            OAuthError::InvalidRequest(_)
            | OAuthError::UnauthorizedClient(_)
            | OAuthError::InvalidGrant(_)
            | OAuthError::InvalidScope(_)
            | OAuthError::UnsupportedGrantType(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Logs the underlying failure and returns a server error whose
    /// description only names the failed operation
    pub fn internal(operation: &str, err: impl std::fmt::Display) -> Self {
        log::error!("{operation}: {err}");
        OAuthError::ServerError(operation.to_string())
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self, OAuthError::ServerError(_))
    }

    pub fn body(&self) -> OAuthErrorBody {
        OAuthErrorBody {
            error: self.code().to_string(),
            error_description: self.to_string(),
        }
    }
}

impl From<RegistryError> for OAuthError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(client_id) => {
                OAuthError::NotFound(format!("client {client_id} not found"))
            }
            RegistryError::InvalidRequest(detail) => OAuthError::InvalidRequest(detail),
            other => OAuthError::internal("failed to load client", other),
        }
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(self.body())).into_response();
        if matches!(self, OAuthError::InvalidClient(_)) {
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Basic"));
        }
        response
    }
}
