//! Server test utilities.

use super::fixtures::MockOracle;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use ocspwatch_core::config::{AppConfig, MetadataConfig};
use ocspwatch_metadata::{MetadataStore, SqliteStore};
use ocspwatch_server::{AppState, create_router};
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

/// The admin secret whose hash `AdminConfig::for_testing` carries.
pub const ADMIN_TOKEN: &str = "test-admin-token";

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: axum::Router,
    pub state: AppState,
    pub oracle: Arc<MockOracle>,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

        let db_path = temp_dir.path().join("metadata.db");
        let metadata: Arc<dyn MetadataStore> = Arc::new(
            SqliteStore::new(&db_path, None)
                .await
                .expect("Failed to create metadata store"),
        );

        let mut config = AppConfig::for_testing();
        config.metadata = MetadataConfig::Sqlite {
            path: db_path,
            query_timeout_secs: None,
        };
        modifier(&mut config);

        let oracle = Arc::new(MockOracle::new());
        let state = AppState::new(config, metadata, oracle.clone());
        let router = create_router(state.clone());

        Self {
            router,
            state,
            oracle,
            _temp_dir: temp_dir,
        }
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.state.metadata.clone()
    }

    /// Send a request and return the status with the raw body.
    pub async fn send(
        &self,
        method: &str,
        uri: &str,
        body: Body,
        auth_token: Option<&str>,
    ) -> (StatusCode, Vec<u8>, Option<String>) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = auth_token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = builder.body(body).unwrap();
        let response = self.router.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, bytes.to_vec(), content_type)
    }

    /// Send a JSON request and parse the JSON response.
    pub async fn json(
        &self,
        method: &str,
        uri: &str,
        body: Option<Value>,
        auth_token: Option<&str>,
    ) -> (StatusCode, Value) {
        let body = match body {
            Some(v) => Body::from(serde_json::to_vec(&v).unwrap()),
            None => Body::empty(),
        };
        let (status, bytes, _) = self.send(method, uri, body, auth_token).await;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    /// POST a compact envelope as the raw body.
    pub async fn post_envelope(&self, uri: &str, envelope: &str) -> (StatusCode, Value) {
        let (status, bytes, _) = self
            .send("POST", uri, Body::from(envelope.to_string()), None)
            .await;
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    /// Create an invite through the admin API and return its token.
    pub async fn invite(&self, name: &str) -> String {
        let (status, body) = self
            .json(
                "POST",
                "/v1/admin/invites",
                Some(serde_json::json!({ "name": name })),
                Some(ADMIN_TOKEN),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "invite failed: {body}");
        body["invite_token"].as_str().unwrap().to_string()
    }
}
