use crate::openapi::HEALTH_TAG;
use crate::state::AppState;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatusType {
    Ok,
    Error,
}

/// Status of a single component of the service
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComponentStatus {
    pub status: HealthStatusType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<Result<(), String>> for ComponentStatus {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Self {
                status: HealthStatusType::Ok,
                error: None,
            },
            Err(e) => Self {
                status: HealthStatusType::Error,
                error: Some(e),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ComponentHealth {
    pub database: ComponentStatus,
    pub cache: ComponentStatus,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct Health {
    status: HealthStatusType,
    #[serde(skip_serializing_if = "Option::is_none")]
    components: Option<ComponentHealth>,
}

impl IntoResponse for Health {
    fn into_response(self) -> Response {
        let status_code = match self.status {
            HealthStatusType::Ok => StatusCode::OK,
            HealthStatusType::Error => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status_code, Json(self)).into_response()
    }
}

async fn check_components(state: &AppState) -> Health {
    let (database, cache) = tokio::join!(
        state.registry.store_health(),
        state.registry.cache_health()
    );
    let components = ComponentHealth {
        database: database.into(),
        cache: cache.into(),
    };
    let status = if components.database.status == HealthStatusType::Ok
        && components.cache.status == HealthStatusType::Ok
    {
        HealthStatusType::Ok
    } else {
        log::warn!("Health check failed: {:?}", components);
        HealthStatusType::Error
    };
    Health {
        status,
        components: Some(components),
    }
}

/// Liveness check handler
#[utoipa::path(
    get,
    path = "/health",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Service is alive", body = Health)
    )
)]
pub async fn health_check() -> Health {
    Health {
        status: HealthStatusType::Ok,
        components: None,
    }
}

/// Readiness check handler
#[utoipa::path(
    get,
    path = "/ready",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Service is ready", body = Health),
        (status = 503, description = "Service is not ready", body = Health)
    )
)]
pub async fn ready_check(State(state): State<AppState>) -> Health {
    check_components(&state).await
}

/// Startup check handler
#[utoipa::path(
    get,
    path = "/startup",
    tag = HEALTH_TAG,
    responses(
        (status = 200, description = "Service has started", body = Health),
        (status = 503, description = "Service is still starting", body = Health)
    )
)]
pub async fn startup_check(State(state): State<AppState>) -> Health {
    check_components(&state).await
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(ready_check))
        .route("/startup", get(startup_check))
}

#[cfg(test)]
mod test {
    use crate::test_utils::TestFixture;
    use serde_json::json;

    #[tokio::test]
    async fn test_health_endpoint() {
        let fixture = TestFixture::new().await;
        let response = fixture.get_public("/health").await;
        response.assert_ok();
        assert_eq!(response.json, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn test_ready_endpoint() {
        let fixture = TestFixture::new().await;
        let response = fixture.get_public("/ready").await;
        response.assert_ok();
        assert_eq!(
            response.json,
            json!({
                "status": "ok",
                "components": {
                    "database": {"status": "ok"},
                    "cache": {"status": "ok"}
                }
            })
        );
    }

    #[tokio::test]
    async fn test_startup_endpoint() {
        let fixture = TestFixture::new().await;
        let response = fixture.get_public("/startup").await;
        response.assert_ok();
        assert_eq!(response.json["status"], "ok");
    }
}
