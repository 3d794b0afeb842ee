//! OAuth 2.0 endpoints of the token service
//!
//! ## Supported OAuth 2.0 Flows
//! - Client Credentials Grant (RFC 6749 Section 4.4)
//! - JWT Bearer Grant (RFC 7523) for user impersonation
//! - Token Introspection (RFC 7662)
//!
//! Client registration endpoints sit behind the admin API key.

pub mod clients;
pub mod handlers;

use crate::state::AppState;
use axum::routing::{get, post, Router};

/// Token, introspection and key discovery routes
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/oauth2/token", post(handlers::token))
        .route("/oauth2/introspect", post(handlers::introspect))
        .route("/oauth2/jwks", get(handlers::jwks))
}

/// Client administration routes, to be wrapped by the API key middleware
pub fn admin_router() -> Router<AppState> {
    Router::new()
        .route("/oauth2/register", post(clients::register))
        .route(
            "/oauth2/client/{id}",
            get(clients::get_client).delete(clients::delete_client),
        )
        .route("/oauth2/clients", get(clients::list_clients))
}

#[cfg(test)]
mod tests {
    use crate::models::ClientDTO;
    use crate::test_utils::{TestFixture, TestResponse};
    use chrono::Utc;
    use http::StatusCode;
    use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
    use serde_json::{json, Value};

    const JWT_BEARER: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

    fn form(pairs: &[(&str, &str)]) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish()
    }

    /// Claims of an issued access token, verified with the server key
    fn token_claims(fixture: &TestFixture, response: &TestResponse) -> Value {
        let token = response.json["access_token"].as_str().unwrap();
        let claims = fixture
            .state
            .dispatcher
            .engine()
            .decode_access_token(token)
            .expect("issued token must verify");
        serde_json::to_value(claims).unwrap()
    }

    async fn register_impersonating_service(
        fixture: &TestFixture,
        permissions: Value,
        groups: bool,
    ) -> ClientDTO {
        fixture
            .register(json!({
                "name": "grafana-plugin",
                "impersonation": {
                    "enabled": true,
                    "groups": groups,
                    "permissions": permissions,
                },
                "oauth": {"key": {"generate": true}},
            }))
            .await
    }

    fn sign_assertion(fixture: &TestFixture, client: &ClientDTO, subject: &str) -> String {
        let private_pem = client
            .key
            .as_ref()
            .and_then(|k| k.private_pem.as_deref())
            .expect("generated key must be returned");
        let claims = json!({
            "iss": client.id,
            "sub": subject,
            "aud": fixture.config.oauth.token_endpoint(),
            "exp": Utc::now().timestamp() + 300,
        });
        encode(
            &Header::new(Algorithm::ES256),
            &claims,
            &EncodingKey::from_ec_pem(private_pem.as_bytes()).unwrap(),
        )
        .unwrap()
    }

    async fn impersonate(
        fixture: &TestFixture,
        client: &ClientDTO,
        subject: &str,
        scope: &str,
    ) -> TestResponse {
        let assertion = sign_assertion(fixture, client, subject);
        fixture
            .post_form(
                "/oauth2/token",
                &form(&[
                    ("grant_type", JWT_BEARER),
                    ("client_id", &client.id),
                    ("assertion", &assertion),
                    ("scope", scope),
                ]),
                None,
            )
            .await
    }

    #[tokio::test]
    async fn test_client_credentials_entitlements() {
        let fixture = TestFixture::new().await;
        let client = fixture
            .register_self_service(
                "reporting",
                &[
                    ("dashboards:read", "dashboards:*"),
                    ("dashboards:write", "dashboards:uid:1"),
                ],
            )
            .await;

        let response = fixture
            .post_form(
                "/oauth2/token",
                &form(&[
                    ("grant_type", "client_credentials"),
                    ("client_id", &client.id),
                    ("client_secret", client.secret.as_deref().unwrap()),
                    ("scope", "profile entitlements"),
                ]),
                None,
            )
            .await;
        response.assert_ok();

        let claims = token_claims(&fixture, &response);
        assert_eq!(
            claims["entitlements"],
            json!({
                "dashboards:read": ["dashboards:*"],
                "dashboards:write": ["dashboards:uid:1"]
            })
        );
        assert_eq!(claims["login"], "sa-extsvc-reporting");
        assert_eq!(claims["client_id"], client.id);
        assert_eq!(claims["aud"], json!([client.id]));
        assert!(claims["sub"].as_str().unwrap().starts_with("service-account:id:"));
        assert!(claims.get("email").is_none());
    }

    #[tokio::test]
    async fn test_client_credentials_rejects_unknown_scope() {
        let fixture = TestFixture::new().await;
        let client = fixture
            .register_self_service("reporting", &[("dashboards:read", "dashboards:*")])
            .await;

        let response = fixture
            .post_form(
                "/oauth2/token",
                "grant_type=client_credentials&scope=datasources:read",
                Some((&client.id, client.secret.as_deref().unwrap())),
            )
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "invalid_scope");
    }

    #[tokio::test]
    async fn test_token_introspection_round_trip() {
        let fixture = TestFixture::new().await;
        let client = fixture
            .register_self_service("reporting", &[("dashboards:read", "dashboards:*")])
            .await;
        let secret = client.secret.as_deref().unwrap();

        let response = fixture
            .post_form(
                "/oauth2/token",
                "grant_type=client_credentials&scope=entitlements",
                Some((&client.id, secret)),
            )
            .await;
        response.assert_ok();
        let token = response.json["access_token"].as_str().unwrap().to_string();

        let response = fixture
            .post_form(
                "/oauth2/introspect",
                &form(&[("token", &token)]),
                Some((&client.id, secret)),
            )
            .await;
        response.assert_ok();
        assert_eq!(response.json["active"], true);
        assert_eq!(response.json["client_id"], client.id);
        assert_eq!(response.json["scope"], "entitlements");
        assert_eq!(response.json["iss"], fixture.config.oauth.issuer);
    }

    #[tokio::test]
    async fn test_impersonation_entitlements_are_intersected() {
        let fixture = TestFixture::new().await;
        fixture
            .add_user(56, "alice", &[("users:read", "global.users:id:*")])
            .await;
        let client = register_impersonating_service(
            &fixture,
            json!([{"action": "users:read", "scope": "global.users:self"}]),
            false,
        )
        .await;

        let response = impersonate(&fixture, &client, "user:id:56", "entitlements").await;
        response.assert_ok();

        let claims = token_claims(&fixture, &response);
        assert_eq!(claims["sub"], "user:id:56");
        assert_eq!(
            claims["entitlements"],
            json!({"users:read": ["global.users:id:56"]})
        );
    }

    #[tokio::test]
    async fn test_impersonation_without_matching_permission_is_empty() {
        let fixture = TestFixture::new().await;
        fixture
            .add_user(56, "alice", &[("datasources:read", "datasources:uid:1")])
            .await;
        let client = register_impersonating_service(&fixture, json!([]), false).await;

        let response = impersonate(&fixture, &client, "user:id:56", "entitlements").await;
        response.assert_ok();

        let claims = token_claims(&fixture, &response);
        assert_eq!(claims["entitlements"], json!({}));
    }

    #[tokio::test]
    async fn test_impersonation_profile_and_groups() {
        let fixture = TestFixture::new().await;
        fixture.add_user(56, "alice", &[]).await;
        fixture.add_team(3, "Editors", &[56]).await;
        let client = register_impersonating_service(&fixture, json!([]), true).await;

        let response =
            impersonate(&fixture, &client, "user:id:56", "profile email groups").await;
        response.assert_ok();

        let claims = token_claims(&fixture, &response);
        assert_eq!(claims["login"], "alice");
        assert_eq!(claims["name"], "User alice");
        assert_eq!(claims["email"], "alice@example.com");
        assert_eq!(claims["groups"], json!(["Editors"]));
        assert!(claims.get("entitlements").is_none());
    }

    #[tokio::test]
    async fn test_impersonation_groups_requires_registration() {
        let fixture = TestFixture::new().await;
        fixture.add_user(56, "alice", &[]).await;
        let client = register_impersonating_service(&fixture, json!([]), false).await;

        let response = impersonate(&fixture, &client, "user:id:56", "groups").await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "invalid_scope");
    }

    #[tokio::test]
    async fn test_impersonation_of_unknown_user() {
        let fixture = TestFixture::new().await;
        let client = register_impersonating_service(&fixture, json!([]), false).await;

        let response = impersonate(&fixture, &client, "user:id:99", "profile").await;
        response.assert_status(StatusCode::NOT_FOUND);
        assert_eq!(response.json["error"], "not_found");
    }

    #[tokio::test]
    async fn test_impersonation_of_malformed_subject() {
        let fixture = TestFixture::new().await;
        let client = register_impersonating_service(&fixture, json!([]), false).await;

        let response = impersonate(&fixture, &client, "alice", "profile").await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "invalid_request");
    }

    #[tokio::test]
    async fn test_assertion_signed_by_another_key() {
        let fixture = TestFixture::new().await;
        fixture.add_user(56, "alice", &[]).await;
        let client = register_impersonating_service(&fixture, json!([]), false).await;
        let mut impostor = fixture
            .register(json!({
                "name": "impostor",
                "impersonation": {"enabled": true},
                "oauth": {"key": {"generate": true}},
            }))
            .await;
        impostor.id = client.id.clone();

        let response = impersonate(&fixture, &impostor, "user:id:56", "profile").await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "invalid_grant");
    }

    #[tokio::test]
    async fn test_jwt_bearer_not_enabled_for_client() {
        let fixture = TestFixture::new().await;
        let client = fixture.register_self_service("reporting", &[]).await;

        let response = fixture
            .post_form(
                "/oauth2/token",
                &form(&[
                    ("grant_type", JWT_BEARER),
                    ("client_id", &client.id),
                    ("assertion", "irrelevant"),
                ]),
                None,
            )
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.json["error"], "unauthorized_client");
    }
}
