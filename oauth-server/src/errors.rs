use crate::registry::RegistryError;
use axum::response::IntoResponse;
use axum::Json;
use http::StatusCode;
use log::error;
use serde_json::json;

/// Error returned by the client administration endpoints
#[derive(Debug, Clone)]
pub struct ApiError {
    pub detail: String,
    pub status_code: StatusCode,
}

impl ApiError {
    /// Create a new ApiError with a detail message and status code
    pub fn new<S: ToString>(detail: S, status_code: StatusCode) -> Self {
        Self {
            detail: detail.to_string(),
            status_code,
        }
    }

    /// Create new Internal Server Error (500) with a detail message
    pub fn internal<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Create new Bad Request Error (400) with a detail message
    pub fn bad_request<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::BAD_REQUEST)
    }

    /// Create new Not Found Error (404) with a detail message
    pub fn not_found<S: ToString>(detail: S) -> Self {
        Self::new(detail, StatusCode::NOT_FOUND)
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(_) => ApiError::not_found(err),
            RegistryError::InvalidRequest(_) => ApiError::bad_request(err),
            RegistryError::Key(_) => ApiError::bad_request(err),
            other => {
                error!("Client administration failed: {other}");
                ApiError::internal("internal server error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status_code = self.status_code;
        let body = json!({
            "detail": self.detail,
        });
        (status_code, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyError;

    #[test]
    fn test_registry_error_mapping() {
        let err: ApiError = RegistryError::NotFound("abc".to_string()).into();
        assert_eq!(err.status_code, StatusCode::NOT_FOUND);

        let err: ApiError = RegistryError::InvalidRequest("name is required".to_string()).into();
        assert_eq!(err.status_code, StatusCode::BAD_REQUEST);
        assert_eq!(err.detail, "name is required");

        let err: ApiError = RegistryError::Key(KeyError::InvalidPem("bad".to_string())).into();
        assert_eq!(err.status_code, StatusCode::BAD_REQUEST);
    }
}
