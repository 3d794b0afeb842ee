//! Entry point of token issuance and introspection

use super::claims::TokenClaims;
use super::error::OAuthError;
use super::grants::{Collaborators, GrantHandler};
use super::protocol::{
    AccessRequest, ClientCredentials, IntrospectionResponse, ProtocolEngine, TokenRequest,
    TokenResponse,
};
use crate::models::GrantType;
use crate::registry::{ExternalServiceRegistry, RegistryError};
use log::{error, info, warn};
use std::time::Duration;

/// Routes token requests to the grant handlers and the protocol engine
#[derive(Clone)]
pub struct TokenDispatcher {
    registry: ExternalServiceRegistry,
    engine: ProtocolEngine,
    collaborators: Collaborators,
    request_timeout: Duration,
}

impl TokenDispatcher {
    pub fn new(
        registry: ExternalServiceRegistry,
        engine: ProtocolEngine,
        collaborators: Collaborators,
        request_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            engine,
            collaborators,
            request_timeout,
        }
    }

    pub fn engine(&self) -> &ProtocolEngine {
        &self.engine
    }

    /// Handles a token request, logging the outcome with client and grant context
    pub async fn handle_token_request(
        &self,
        request: TokenRequest,
        credentials: ClientCredentials,
    ) -> Result<TokenResponse, OAuthError> {
        let client_id = credentials.client_id.clone().unwrap_or_default();
        let grant_type = request.grant_type.clone();

        let result = match tokio::time::timeout(
            self.request_timeout,
            self.issue(request, credentials),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(OAuthError::ServerError(
                "token request timed out".to_string(),
            )),
        };

        match &result {
            Ok(response) => info!(
                "Issued access token client_id={} grant_type={} scope=\"{}\"",
                client_id, grant_type, response.scope
            ),
            Err(e) if e.is_server_error() => error!(
                "Token request failed client_id={} grant_type={}: {}",
                client_id, grant_type, e
            ),
            Err(e) => warn!(
                "Token request rejected client_id={} grant_type={}: {} ({})",
                client_id,
                grant_type,
                e.code(),
                e
            ),
        }
        result
    }

    async fn issue(
        &self,
        request: TokenRequest,
        credentials: ClientCredentials,
    ) -> Result<TokenResponse, OAuthError> {
        let grant_type = self.engine.parse_grant_type(&request.grant_type)?;
        let client_id = credentials
            .client_id
            .ok_or_else(|| OAuthError::InvalidRequest("client_id is required".to_string()))?;

        let service = self.registry.get(&client_id).await?;
        self.engine.ensure_grant_allowed(&service.client, grant_type)?;

        let (subject, admissible) = match grant_type {
            GrantType::ClientCredentials => {
                self.engine
                    .authenticate_client(&service.client, credentials.client_secret.as_deref())?;
                (service.subject().to_string(), service.scopes())
            }
            GrantType::JwtBearer => {
                if credentials.client_secret.is_some() {
                    self.engine.authenticate_client(
                        &service.client,
                        credentials.client_secret.as_deref(),
                    )?;
                }
                let assertion = request
                    .assertion
                    .as_deref()
                    .filter(|a| !a.is_empty())
                    .ok_or_else(|| {
                        OAuthError::InvalidRequest("assertion is required".to_string())
                    })?;
                let key = match self.registry.get_public_key(&client_id).await {
                    Ok(key) => key,
                    Err(RegistryError::NotFound(_)) => {
                        return Err(OAuthError::InvalidGrant(
                            "no public key is registered for this client".to_string(),
                        ))
                    }
                    Err(e) => return Err(e.into()),
                };
                let assertion = self.engine.verify_assertion(assertion, &client_id, &key)?;
                (assertion.sub, service.impersonate_scopes())
            }
        };

        let scopes = self
            .engine
            .validate_scopes(request.scope.as_deref(), &admissible)?;
        let audiences = self
            .engine
            .resolve_audiences(request.audience.as_deref(), &service.client)?;
        let access = AccessRequest {
            grant_type,
            client_id,
            subject,
            scopes,
            audiences,
        };

        let mut claims = TokenClaims::new();
        for handler in GrantHandler::ALL {
            handler
                .handle(&self.collaborators, &access, &service, &mut claims)
                .await?;
        }
        self.engine.encode_access_token(&access, claims)
    }

    /// Authenticates the calling client, then reports on the token
    pub async fn introspect(
        &self,
        token: &str,
        credentials: ClientCredentials,
    ) -> Result<IntrospectionResponse, OAuthError> {
        let client_id = credentials.client_id.ok_or_else(|| {
            OAuthError::InvalidClient("client authentication is required".to_string())
        })?;
        let service = match self.registry.get(&client_id).await {
            Ok(service) => service,
            Err(RegistryError::NotFound(_)) => {
                warn!("Introspection by unknown client_id={client_id}");
                return Err(OAuthError::InvalidClient(
                    "client authentication failed".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        };
        self.engine
            .authenticate_client(&service.client, credentials.client_secret.as_deref())?;

        let response = self.engine.introspect(token);
        info!(
            "Introspected token for client_id={} active={}",
            client_id, response.active
        );
        Ok(response)
    }
}
