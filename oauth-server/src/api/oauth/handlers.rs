//! OAuth 2.0 endpoint handlers

use crate::headers::presets;
use crate::keys::JwkSet;
use crate::oauth::error::OAuthErrorBody;
use crate::oauth::protocol::{
    ClientCredentials, IntrospectionRequest, IntrospectionResponse, TokenRequest, TokenResponse,
};
use crate::oauth::OAuthError;
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use axum::{
    extract::{rejection::FormRejection, Form, FromRequest, Request, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};
use log::{debug, warn};

const JWKS_MAX_AGE: u32 = 300;

/// OAuth 2.0 Token endpoint (RFC 6749 Section 4.4, RFC 7523 Section 2.1)
#[utoipa::path(
    post,
    path = "/oauth2/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Access token issued", body = TokenResponse),
        (status = 400, description = "Invalid token request", body = OAuthErrorBody),
        (status = 401, description = "Client authentication failed", body = OAuthErrorBody),
        (status = 403, description = "Impersonation not permitted", body = OAuthErrorBody),
        (status = 404, description = "Unknown client", body = OAuthErrorBody),
        (status = 500, description = "Internal server error", body = OAuthErrorBody)
    ),
    tag = OAUTH_TAG
)]
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Response {
    let mut response = match issue_token(&state, &headers, form).await {
        Ok(token) => Json(token).into_response(),
        Err(e) => e.into_response(),
    };
    presets::no_store().apply(&mut response);
    response
}

async fn issue_token(
    state: &AppState,
    headers: &HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<TokenResponse, OAuthError> {
    let Form(request) = form.map_err(|e| {
        warn!("Rejected malformed token request: {e}");
        OAuthError::InvalidRequest(e.body_text())
    })?;
    let credentials = ClientCredentials::from_request(
        headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    state
        .dispatcher
        .handle_token_request(request, credentials)
        .await
}

/// OAuth 2.0 Token Introspection endpoint (RFC 7662)
/// Supports both form-encoded and JSON request bodies
#[utoipa::path(
    post,
    path = "/oauth2/introspect",
    request_body = IntrospectionRequest,
    responses(
        (status = 200, description = "Token introspection result", body = IntrospectionResponse),
        (status = 400, description = "Invalid request", body = OAuthErrorBody),
        (status = 401, description = "Client authentication failed", body = OAuthErrorBody),
        (status = 500, description = "Internal server error", body = OAuthErrorBody)
    ),
    tag = OAUTH_TAG
)]
pub async fn introspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    request: IntrospectionRequestExtractor,
) -> Result<Json<IntrospectionResponse>, OAuthError> {
    let IntrospectionRequestExtractor(request) = request;
    if request.token.is_empty() {
        warn!("Empty token in introspection request");
        return Err(OAuthError::InvalidRequest(
            "token parameter is required".to_string(),
        ));
    }
    let credentials = ClientCredentials::from_request(
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )?;
    let response = state
        .dispatcher
        .introspect(&request.token, credentials)
        .await?;
    Ok(Json(response))
}

/// JSON Web Key Set of the server signing key (RFC 7517)
#[utoipa::path(
    get,
    path = "/oauth2/jwks",
    responses(
        (status = 200, description = "Server public keys", body = JwkSet)
    ),
    tag = OAUTH_TAG
)]
pub async fn jwks(State(state): State<AppState>) -> Response {
    let mut response = Json(state.dispatcher.engine().keys().jwks()).into_response();
    presets::public_cache(JWKS_MAX_AGE).apply(&mut response);
    response
}

/// Introspection request read from a form-encoded or JSON body
#[derive(Debug)]
pub struct IntrospectionRequestExtractor(pub IntrospectionRequest);

impl<S> FromRequest<S> for IntrospectionRequestExtractor
where
    S: Send + Sync,
{
    type Rejection = OAuthError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok())
            .unwrap_or("");

        if content_type.starts_with("application/json") {
            match Json::<IntrospectionRequest>::from_request(req, state).await {
                Ok(Json(request)) => Ok(Self(request)),
                Err(e) => {
                    debug!("Invalid JSON introspection request: {e}");
                    Err(OAuthError::InvalidRequest(
                        "Invalid JSON in request body".to_string(),
                    ))
                }
            }
        } else {
            match Form::<IntrospectionRequest>::from_request(req, state).await {
                Ok(Form(request)) => Ok(Self(request)),
                Err(e) => {
                    debug!("Invalid form introspection request: {e}");
                    Err(OAuthError::InvalidRequest(
                        "Invalid form data in request body".to_string(),
                    ))
                }
            }
        }
    }
}
