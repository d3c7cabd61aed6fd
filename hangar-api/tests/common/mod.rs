//! Common test utilities and helpers for hangar-api tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use hangar_api::{create_app, AppState};
use hangar_orchestrator::test_utils::test_orchestrator;
use hangar_orchestrator::{BuildOrchestrator, ManualClock};
use tower::ServiceExt;

/// Create a test app over a fresh in-memory database
pub async fn create_test_app() -> (Router, BuildOrchestrator, ManualClock) {
    let (orchestrator, clock) = test_orchestrator().await;
    let app = create_app(AppState::new(orchestrator.clone()));
    (app, orchestrator, clock)
}

/// Serve the app on an ephemeral local port and return its address
pub async fn spawn_server(app: Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test listener");
    let addr = listener.local_addr().expect("Failed to read local addr");

    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("Test server failed");
    });

    addr
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = extract_bytes(response).await;
    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

pub async fn extract_bytes(response: Response<Body>) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body")
        .to_vec()
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub user: String,
    pub roles: Option<String>,
}

impl TestClient {
    pub fn new(app: Router, user: &str) -> Self {
        Self {
            app,
            user: user.to_string(),
            roles: None,
        }
    }

    pub fn with_roles(mut self, roles: &str) -> Self {
        self.roles = Some(roles.to_string());
        self
    }

    fn builder(&self, method: &str, uri: &str) -> axum::http::request::Builder {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user", &self.user);
        match &self.roles {
            Some(roles) => builder.header("x-user-roles", roles),
            None => builder,
        }
    }

    /// Send a request to the API
    pub async fn send_request(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    /// Post JSON to an endpoint
    pub async fn post<T: serde::Serialize>(&self, uri: &str, body: &T) -> Response<Body> {
        let request = self
            .builder("POST", uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap();
        self.send_request(request).await
    }

    pub async fn post_empty(&self, uri: &str) -> Response<Body> {
        let request = self.builder("POST", uri).body(Body::empty()).unwrap();
        self.send_request(request).await
    }

    /// Put raw bytes to an endpoint
    pub async fn put_bytes(&self, uri: &str, body: &[u8]) -> Response<Body> {
        let request = self
            .builder("PUT", uri)
            .header("content-type", "application/octet-stream")
            .body(Body::from(body.to_vec()))
            .unwrap();
        self.send_request(request).await
    }

    /// Get request to an endpoint
    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = self.builder("GET", uri).body(Body::empty()).unwrap();
        self.send_request(request).await
    }
}
