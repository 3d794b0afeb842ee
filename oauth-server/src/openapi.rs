use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

pub(crate) const HEALTH_TAG: &str = "Health API";
pub(crate) const OAUTH_TAG: &str = "OAuth 2.0";
pub(crate) const CLIENTS_TAG: &str = "Client Registration API";

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::health::health_check,
        crate::api::health::ready_check,
        crate::api::health::startup_check,
        crate::api::oauth::handlers::token,
        crate::api::oauth::handlers::introspect,
        crate::api::oauth::handlers::jwks,
        crate::api::oauth::clients::register,
        crate::api::oauth::clients::get_client,
        crate::api::oauth::clients::delete_client,
        crate::api::oauth::clients::list_clients,
    ),
    modifiers(&ApiKeySecurity),
    tags(
        (name = HEALTH_TAG, description = "Health check endpoints"),
        (name = OAUTH_TAG, description = "Token issuance and introspection endpoints"),
        (name = CLIENTS_TAG, description = "External service registration endpoints"),
    ),
    info(
        title = "OAuth Token Server API",
        description = "Impersonation-aware OAuth 2.0 token issuance for external services",
        version = "0.1.0"
    )
)]
pub(crate) struct ApiDoc;

/// Declares the bearer API key guarding the registration endpoints
struct ApiKeySecurity;

impl Modify for ApiKeySecurity {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "api_key",
            SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_document() {
        let doc = ApiDoc::openapi();
        for path in [
            "/health",
            "/oauth2/token",
            "/oauth2/introspect",
            "/oauth2/jwks",
            "/oauth2/register",
            "/oauth2/client/{id}",
            "/oauth2/clients",
        ] {
            assert!(doc.paths.paths.contains_key(path), "missing {path}");
        }
        let components = doc.components.unwrap();
        assert!(components.security_schemes.contains_key("api_key"));
    }
}
