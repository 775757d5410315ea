//! Shared harness: the real router over `MemoryStore`, a manual clock and a
//! mailer that keeps what it was asked to send.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Method, Request, StatusCode, header};
use greenlight_api::config::ApiConfig;
use greenlight_api::{AppState, router};
use greenlight_core::clock::ManualClock;
use greenlight_core::data::UserRepository;
use greenlight_core::data::memory::MemoryStore;
use greenlight_core::lifecycle::LifecycleCoordinator;
use greenlight_core::mailer::{MailError, Mailer, Message};
use greenlight_core::models::auth::{NewUser, TokenScope, User};
use greenlight_core::ratelimit::{LimiterConfig, RateLimiter};
use serde_json::Value;
use tower::ServiceExt;

pub const PASSWORD: &str = "pa55word1234";

#[derive(Default)]
pub struct CapturingMailer {
    sent: Mutex<Vec<Message>>,
}

impl CapturingMailer {
    pub fn sent(&self) -> Vec<Message> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn deliver(&self, message: &Message) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    pub lifecycle: LifecycleCoordinator,
    pub mailer: Arc<CapturingMailer>,
    pub state: AppState,
    pub router: Router,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_limiter(LimiterConfig {
            rps: 100.0,
            burst: 100,
            enabled: true,
        })
    }

    pub fn with_limiter(limiter: LimiterConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let lifecycle = LifecycleCoordinator::new(Duration::from_secs(5));
        let mailer = Arc::new(CapturingMailer::default());
        let state = AppState::new(
            ApiConfig {
                env: "testing".into(),
                ..ApiConfig::default()
            },
            store.clone(),
            clock.clone(),
            Arc::new(RateLimiter::new(limiter, clock.clone())),
            lifecycle.clone(),
            mailer.clone(),
        );
        let router = router(state.clone());
        Self {
            store,
            clock,
            lifecycle,
            mailer,
            state,
            router,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let resp = self.router.clone().oneshot(request).await.expect("request");
        let status = resp.status();
        let headers = resp.headers().clone();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("read body");
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("parse JSON")
        };
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Insert a user directly, grant `codes` and issue an authentication token.
    pub async fn seed_user(&self, email: &str, activated: bool, codes: &[&str]) -> (User, String) {
        let user = self
            .store
            .insert_user(NewUser {
                name: "Test User".into(),
                email: email.into(),
                password_hash: bcrypt::hash(PASSWORD, 4).unwrap(),
                activated,
            })
            .await
            .unwrap();
        self.state
            .pipeline
            .gate()
            .add_for_user(user.id, codes)
            .await
            .unwrap();
        let token = self
            .state
            .pipeline
            .tokens()
            .new_token(user.id, TokenScope::Authentication)
            .await
            .unwrap();
        (user, token.plaintext)
    }
}

/// Build a request with an optional JSON body, bearer token and peer address.
pub fn request(
    method: Method,
    uri: &str,
    body: Option<Value>,
    token: Option<&str>,
    peer: Option<[u8; 4]>,
) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let mut req = builder.body(body).unwrap();
    if let Some(ip) = peer {
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((ip, 40000))));
    }
    req
}

pub fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    request(Method::GET, uri, None, token, None)
}
