//! OAuth 2.0 token issuance configuration

pub use crate::keys::KeyAlgorithm;
use confique::Config;

/// OAuth 2.0 configuration
#[derive(Debug, Config, Clone)]
pub struct OAuthConfig {
    /// Issuer identifier, also the base URL of the token endpoint
    /// (default: http://localhost:7780)
    #[config(env = "OAS_ISSUER", default = "http://localhost:7780")]
    pub issuer: String,

    /// Access token TTL in seconds (default: 3600 = 1 hour)
    #[config(env = "OAS_TOKEN_TTL", default = 3600)]
    pub token_ttl: u64,

    /// Upper bound in seconds for computing the claims of a single token request
    /// (default: 10)
    #[config(env = "OAS_REQUEST_TIMEOUT", default = 10)]
    pub request_timeout: u64,

    /// PEM file holding the server signing key; a fresh key is generated at
    /// startup when unset
    #[config(env = "OAS_SIGNING_KEY_PATH")]
    pub signing_key_path: Option<String>,

    /// Algorithm of the generated server signing key (default: ecdsa)
    #[config(env = "OAS_SIGNING_KEY_ALGORITHM", default = "ecdsa")]
    pub signing_key_algorithm: KeyAlgorithm,
}

impl OAuthConfig {
    /// Absolute URL of the token endpoint, the audience JWT-bearer assertions must target
    pub fn token_endpoint(&self) -> String {
        format!("{}/oauth2/token", self.issuer.trim_end_matches('/'))
    }
}
