use crate::config::ServerConfig;
use crate::create_app;
use crate::directory::InMemoryDirectory;
use crate::models::{ClientDTO, Permission, Team, User};
use crate::state::AppState;
use axum::body::Body;
use axum::Router;
use base64::{engine::general_purpose::STANDARD, Engine};
use http::{HeaderMap, Method, Request, StatusCode};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

/// Test fixture for exercising the complete router.
///
/// The application runs over an in-memory SQLite client store and an
/// [`InMemoryDirectory`] the test can populate with users, teams and
/// permissions. No network service is needed.
///
/// # Examples
///
/// ```rust
/// #[tokio::test]
/// async fn test_endpoint() {
///     let fixture = TestFixture::new().await;
///     let client = fixture
///         .register_self_service("reporting", &[("dashboards:read", "dashboards:*")])
///         .await;
///
///     let response = fixture
///         .post_form(
///             "/oauth2/token",
///             "grant_type=client_credentials&scope=entitlements",
///             Some((&client.id, client.secret.as_deref().unwrap())),
///         )
///         .await;
///     response.assert_ok();
/// }
/// ```
pub struct TestFixture {
    /// The application router
    pub app: Router,
    /// Configuration settings
    pub config: ServerConfig,
    /// Application state shared with the router
    pub state: AppState,
    /// Users, teams and service accounts seen by the application
    pub directory: InMemoryDirectory,
}

impl TestFixture {
    /// Creates a new test fixture over an empty directory
    pub async fn new() -> Self {
        let config = ServerConfig::for_test();
        Self::setup_logger(LevelFilter::Debug);

        let directory = InMemoryDirectory::new();
        let state = AppState::with_directory(&config, Arc::new(directory.clone()))
            .await
            .expect("Failed to create app state");
        let app = create_app(state.clone());

        Self {
            app,
            config,
            state,
            directory,
        }
    }

    /// Initializes the test logger with customized settings.
    ///
    /// Called by [`TestFixture::new`] with `Debug`; only the first call in a
    /// test binary takes effect.
    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// Adds a user to the directory
    pub async fn add_user(&self, id: i64, login: &str, permissions: &[(&str, &str)]) {
        self.directory
            .add_user(
                User {
                    id,
                    login: login.to_string(),
                    name: format!("User {login}"),
                    email: format!("{login}@example.com"),
                },
                permissions
                    .iter()
                    .map(|(action, scope)| Permission::new(*action, *scope))
                    .collect(),
            )
            .await;
    }

    pub async fn add_team(&self, id: i64, name: &str, members: &[i64]) {
        self.directory
            .add_team(
                Team {
                    id,
                    name: name.to_string(),
                },
                members,
            )
            .await;
    }

    /// Creates a request builder authenticated with the admin API key.
    ///
    /// The request builder includes standard headers:
    /// - Authorization: Bearer token using the test API key
    /// - Content-Type: application/json
    pub fn request_builder(&self, method: Method, uri: impl AsRef<str>) -> http::request::Builder {
        Request::builder()
            .method(method)
            .uri(uri.as_ref())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
    }

    /// Sends an authenticated GET request to the specified URI
    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = self
            .request_builder(Method::GET, uri)
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends an authenticated DELETE request to the specified URI
    pub async fn delete(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = self
            .request_builder(Method::DELETE, uri)
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends an authenticated POST request with a JSON body
    pub async fn post<T: Serialize>(&self, uri: impl AsRef<str>, body: &T) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let request = self
            .request_builder(Method::POST, uri)
            .body(Body::from(json_body))
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a GET request without the admin API key
    pub async fn get_public(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri.as_ref())
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a POST request with a JSON body and without the admin API key
    pub async fn post_json_public<T: Serialize>(
        &self,
        uri: impl AsRef<str>,
        body: &T,
    ) -> TestResponse {
        let json_body = serde_json::to_vec(body).expect("Failed to serialize body to JSON");
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri.as_ref())
            .header("Content-Type", "application/json")
            .body(Body::from(json_body))
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a form-encoded POST request, optionally with HTTP Basic client
    /// credentials
    pub async fn post_form(
        &self,
        uri: impl AsRef<str>,
        body: &str,
        basic: Option<(&str, &str)>,
    ) -> TestResponse {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri.as_ref())
            .header("Content-Type", "application/x-www-form-urlencoded");
        if let Some((client_id, client_secret)) = basic {
            let credentials = STANDARD.encode(format!("{client_id}:{client_secret}"));
            builder = builder.header("Authorization", format!("Basic {credentials}"));
        }
        let request = builder
            .body(Body::from(body.to_string()))
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Sends a request and returns a TestResponse.
    ///
    /// This is a lower-level method that is used by the convenience methods
    /// like `get()` and `post()`.
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        // Try to parse as JSON, defaulting to empty object if parsing fails or empty body
        let json = if !body.is_empty() {
            serde_json::from_slice(&body).unwrap_or_else(|_| json!({}))
        } else {
            json!({})
        };

        TestResponse {
            status,
            headers,
            json,
        }
    }

    /// Registers an external service and returns the created client
    pub async fn register(&self, registration: Value) -> ClientDTO {
        let response = self.post("/oauth2/register", &registration).await;
        response.assert_ok();
        response.json_as::<ClientDTO>()
    }

    /// Registers a service allowed to use the client-credentials grant
    /// with the given self permissions
    pub async fn register_self_service(
        &self,
        name: &str,
        permissions: &[(&str, &str)],
    ) -> ClientDTO {
        let permissions: Vec<Value> = permissions
            .iter()
            .map(|(action, scope)| json!({"action": action, "scope": scope}))
            .collect();
        self.register(json!({
            "name": name,
            "self": {"enabled": true, "permissions": permissions},
        }))
        .await
    }
}

/// Response from a test request that provides convenient access to status and JSON body
pub struct TestResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers
    pub headers: HeaderMap,
    /// Response body as JSON (if present and valid JSON)
    pub json: Value,
}

impl TestResponse {
    /// Asserts that the response has the expected status code.
    ///
    /// # Panics
    ///
    /// Panics if the status code doesn't match the expected value.
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status,
            expected,
            "Expected status {} but got {} with body: {}",
            expected,
            self.status,
            serde_json::to_string_pretty(&self.json).unwrap_or_default()
        );
        self
    }

    /// Asserts that the response status is OK (200)
    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    /// Converts the response body to the specified type.
    ///
    /// # Panics
    ///
    /// Panics if deserialization fails.
    pub fn json_as<T: DeserializeOwned>(&self) -> T {
        serde_json::from_value(self.json.clone()).expect("Failed to deserialize response JSON")
    }
}
