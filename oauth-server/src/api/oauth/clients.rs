//! Administration of registered external services, guarded by the API key

use crate::errors::ApiError;
use crate::models::{ClientDTO, ExternalServiceRegistration};
use crate::openapi::CLIENTS_TAG;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

/// Registers an external service, or updates the one registered under the same name.
///
/// The client secret is only returned when the client is created, and the
/// private key only when the server generated it.
#[utoipa::path(
    post,
    path = "/oauth2/register",
    request_body = ExternalServiceRegistration,
    responses(
        (status = 200, description = "External service saved", body = ClientDTO),
        (status = 400, description = "Invalid registration"),
        (status = 401, description = "Missing API key"),
        (status = 403, description = "Invalid API key")
    ),
    security(("api_key" = [])),
    tag = CLIENTS_TAG
)]
pub async fn register(
    State(state): State<AppState>,
    Json(registration): Json<ExternalServiceRegistration>,
) -> Result<Json<ClientDTO>, ApiError> {
    let client = state.registry.save(&registration).await?;
    Ok(Json(client))
}

#[utoipa::path(
    get,
    path = "/oauth2/client/{id}",
    params(("id" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "Registered client, without secrets", body = ClientDTO),
        (status = 404, description = "Unknown client")
    ),
    security(("api_key" = [])),
    tag = CLIENTS_TAG
)]
pub async fn get_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<Json<ClientDTO>, ApiError> {
    let service = state.registry.get(&client_id).await?;
    Ok(Json(service.client.to_dto()))
}

/// Removes a client together with its service account
#[utoipa::path(
    delete,
    path = "/oauth2/client/{id}",
    params(("id" = String, Path, description = "Client identifier")),
    responses(
        (status = 204, description = "Client removed"),
        (status = 404, description = "Unknown client")
    ),
    security(("api_key" = [])),
    tag = CLIENTS_TAG
)]
pub async fn delete_client(
    State(state): State<AppState>,
    Path(client_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete(&client_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/oauth2/clients",
    responses(
        (status = 200, description = "Names of the registered external services", body = Vec<String>)
    ),
    security(("api_key" = [])),
    tag = CLIENTS_TAG
)]
pub async fn list_clients(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.registry.names().await?))
}
