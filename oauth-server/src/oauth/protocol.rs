//! OAuth 2.0 protocol mechanics: request parsing, client authentication,
//! assertion verification and access token encoding

use super::claims::TokenClaims;
use super::error::OAuthError;
use crate::config::OAuthConfig;
use crate::keys::{verify_secret, ClientPublicKey, KeyManager};
use crate::models::{GrantType, OAuthClient};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use http::header::AUTHORIZATION;
use http::HeaderMap;
use jsonwebtoken::{decode, encode, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use utoipa::ToSchema;
use uuid::Uuid;

const ACCESS_TOKEN_TYPE: &str = "at+jwt";

/// OAuth 2.0 token request (RFC 6749 Section 4.4, RFC 7523 Section 2.1)
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct TokenRequest {
    /// `client_credentials` or `urn:ietf:params:oauth:grant-type:jwt-bearer`
    pub grant_type: String,
    /// Client identifier, may be sent with HTTP Basic instead
    #[serde(default)]
    pub client_id: Option<String>,
    /// Client secret, may be sent with HTTP Basic instead
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Signed JWT naming the impersonated user (JWT-bearer grant)
    #[serde(default)]
    pub assertion: Option<String>,
    /// Requested scopes (space-separated)
    #[serde(default)]
    pub scope: Option<String>,
    /// Requested audiences (space-separated)
    #[serde(default)]
    pub audience: Option<String>,
}

/// OAuth 2.0 Token Response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    /// The signed access token
    pub access_token: String,
    /// Always "bearer"
    pub token_type: String,
    /// Token lifetime in seconds
    pub expires_in: u64,
    /// Granted scopes (space-separated)
    pub scope: String,
}

/// OAuth 2.0 Token Introspection Request (RFC 7662)
#[derive(Debug, Clone, Default, Deserialize, Serialize, ToSchema)]
pub struct IntrospectionRequest {
    /// The token to introspect
    pub token: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
}

/// OAuth 2.0 Token Introspection Response (RFC 7662)
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Credentials a client presented, from HTTP Basic or from the request body
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientCredentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

impl ClientCredentials {
    /// Merges HTTP Basic credentials with the body parameters, Basic wins
    pub fn from_request(
        headers: &HeaderMap,
        client_id: Option<&str>,
        client_secret: Option<&str>,
    ) -> Result<Self, OAuthError> {
        if let Some((id, secret)) = basic_credentials(headers)? {
            return Ok(Self {
                client_id: Some(id),
                client_secret: Some(secret),
            });
        }
        Ok(Self {
            client_id: client_id.filter(|s| !s.is_empty()).map(str::to_string),
            client_secret: client_secret.filter(|s| !s.is_empty()).map(str::to_string),
        })
    }
}

fn basic_credentials(headers: &HeaderMap) -> Result<Option<(String, String)>, OAuthError> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Ok(None);
    };
    let malformed = || OAuthError::InvalidClient("malformed basic authorization header".to_string());
    let value = value.to_str().map_err(|_| malformed())?;
    let Some(encoded) = value.strip_prefix("Basic ") else {
        return Ok(None);
    };
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (id, secret) = decoded.split_once(':').ok_or_else(malformed)?;
    let id = url_decode(id).ok_or_else(malformed)?;
    let secret = url_decode(secret).ok_or_else(malformed)?;
    Ok(Some((id, secret)))
}

/// Basic credentials are form-urlencoded before base64 (RFC 6749 Section 2.3.1)
fn url_decode(value: &str) -> Option<String> {
    url::form_urlencoded::parse(format!("v={value}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
}

/// Validated token request handed to the grant handlers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRequest {
    pub grant_type: GrantType,
    pub client_id: String,
    /// Subject of the token, `service-account:id:<n>` or the assertion subject
    pub subject: String,
    pub scopes: Vec<String>,
    pub audiences: Vec<String>,
}

/// Claims of a JWT-bearer assertion the engine relies on
#[derive(Debug, Clone, Deserialize)]
pub struct AssertionClaims {
    pub iss: String,
    pub sub: String,
    pub exp: i64,
}

/// Claims of an issued access token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: Vec<String>,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub client_id: String,
    pub scope: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Stateless protocol engine bound to the server key and issuer
#[derive(Clone)]
pub struct ProtocolEngine {
    config: OAuthConfig,
    keys: Arc<KeyManager>,
}

impl ProtocolEngine {
    pub fn new(config: OAuthConfig, keys: Arc<KeyManager>) -> Self {
        Self { config, keys }
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn parse_grant_type(&self, grant_type: &str) -> Result<GrantType, OAuthError> {
        GrantType::parse(grant_type).ok_or_else(|| {
            OAuthError::UnsupportedGrantType(format!(
                "grant type '{grant_type}' is not supported, use {} or {}",
                GrantType::ClientCredentials,
                GrantType::JwtBearer
            ))
        })
    }

    /// Checks the presented secret against the stored digest
    pub fn authenticate_client(
        &self,
        client: &OAuthClient,
        secret: Option<&str>,
    ) -> Result<(), OAuthError> {
        let secret = secret.ok_or_else(|| {
            OAuthError::InvalidClient("client authentication is required".to_string())
        })?;
        if !verify_secret(secret, &client.secret) {
            return Err(OAuthError::InvalidClient(
                "client authentication failed".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ensure_grant_allowed(
        &self,
        client: &OAuthClient,
        grant_type: GrantType,
    ) -> Result<(), OAuthError> {
        if !client.supports(grant_type) {
            return Err(OAuthError::UnauthorizedClient(format!(
                "client is not allowed to use the {grant_type} grant"
            )));
        }
        Ok(())
    }

    /// Verifies a JWT-bearer assertion (RFC 7523 Section 3) signed by the client
    pub fn verify_assertion(
        &self,
        assertion: &str,
        client_id: &str,
        key: &ClientPublicKey,
    ) -> Result<AssertionClaims, OAuthError> {
        let decoding_key = key
            .decoding_key()
            .map_err(|e| OAuthError::internal("unusable client key", e))?;
        let mut validation = Validation::new(key.algorithm.jwt_algorithm());
        validation.set_issuer(&[client_id]);
        validation.set_audience(&[self.config.token_endpoint()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub", "aud"]);

        let data = decode::<AssertionClaims>(assertion, &decoding_key, &validation)
            .map_err(|e| OAuthError::InvalidGrant(format!("invalid assertion: {e}")))?;
        if data.claims.sub.is_empty() {
            return Err(OAuthError::InvalidGrant(
                "assertion subject is empty".to_string(),
            ));
        }
        Ok(data.claims)
    }

    /// Parses the space-separated scope parameter and checks every scope is admissible
    pub fn validate_scopes(
        &self,
        scope: Option<&str>,
        admissible: &[String],
    ) -> Result<Vec<String>, OAuthError> {
        let mut scopes: Vec<String> = Vec::new();
        for requested in scope.unwrap_or_default().split_whitespace() {
            if !admissible.iter().any(|s| s == requested) {
                return Err(OAuthError::InvalidScope(format!(
                    "scope '{requested}' is not allowed for this client"
                )));
            }
            if !scopes.iter().any(|s| s == requested) {
                scopes.push(requested.to_string());
            }
        }
        Ok(scopes)
    }

    /// Requested audiences must be registered; none requested grants the
    /// registered audiences, or the client id when there are none
    pub fn resolve_audiences(
        &self,
        audience: Option<&str>,
        client: &OAuthClient,
    ) -> Result<Vec<String>, OAuthError> {
        let requested: Vec<String> = audience
            .unwrap_or_default()
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if requested.is_empty() {
            if client.audiences.is_empty() {
                return Ok(vec![client.client_id.clone()]);
            }
            return Ok(client.audiences.clone());
        }
        if let Some(unknown) = requested.iter().find(|a| !client.audiences.contains(a)) {
            return Err(OAuthError::InvalidRequest(format!(
                "audience '{unknown}' is not registered for this client"
            )));
        }
        Ok(requested)
    }

    /// Signs the access token carrying the composed claims
    pub fn encode_access_token(
        &self,
        access: &AccessRequest,
        claims: TokenClaims,
    ) -> Result<TokenResponse, OAuthError> {
        let now = Utc::now().timestamp();
        let scope = access.scopes.join(" ");
        let token_claims = AccessTokenClaims {
            sub: access.subject.clone(),
            iss: self.config.issuer.clone(),
            aud: access.audiences.clone(),
            iat: now,
            exp: now + self.config.token_ttl as i64,
            jti: Uuid::new_v4().to_string(),
            client_id: access.client_id.clone(),
            scope: scope.clone(),
            extra: claims.into_map(),
        };

        let mut header = Header::new(self.keys.algorithm().jwt_algorithm());
        header.typ = Some(ACCESS_TOKEN_TYPE.to_string());
        header.kid = Some(self.keys.key_id().to_string());

        let access_token = encode(&header, &token_claims, self.keys.encoding_key())
            .map_err(|e| OAuthError::internal("failed to sign access token", e))?;
        Ok(TokenResponse {
            access_token,
            token_type: "bearer".to_string(),
            expires_in: self.config.token_ttl,
            scope,
        })
    }

    /// Verifies an access token issued by this server
    pub fn decode_access_token(&self, token: &str) -> Option<AccessTokenClaims> {
        let mut validation = Validation::new(self.keys.algorithm().jwt_algorithm());
        validation.set_issuer(&[self.config.issuer.as_str()]);
        validation.validate_aud = false;
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        decode::<AccessTokenClaims>(token, self.keys.decoding_key(), &validation)
            .ok()
            .map(|data| data.claims)
    }

    /// RFC 7662 answer for a token; anything unverifiable is inactive
    pub fn introspect(&self, token: &str) -> IntrospectionResponse {
        match self.decode_access_token(token) {
            Some(claims) => IntrospectionResponse {
                active: true,
                client_id: Some(claims.client_id),
                scope: Some(claims.scope),
                sub: Some(claims.sub),
                aud: Some(claims.aud),
                iss: Some(claims.iss),
                exp: Some(claims.exp),
                iat: Some(claims.iat),
                jti: Some(claims.jti),
                token_type: Some("Bearer".to_string()),
            },
            None => IntrospectionResponse::inactive(),
        }
    }
}
