#![allow(dead_code)]

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, StatusCode, header},
};
use gatehouse::clock::ManualClock;
use gatehouse::db::{Database, UserRole};
use gatehouse::jwt::{KeyMaterial, generate_key_material};
use gatehouse::notify::{Notification, NotificationKind, Notifier, NotifyError};
use gatehouse::password::hash_password;
use gatehouse::rate_limit::{RateLimitConfig, RateLimitQuotas};
use gatehouse::reset::DEFAULT_RESET_WINDOW_SECS;
use gatehouse::{ServerConfig, create_app};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tower::ServiceExt;
use url::Url;

pub const START: u64 = 1_700_000_000;
pub const ORIGIN: &str = "http://localhost:3000";
pub const ACCESS_SECS: u64 = 15 * 60;
pub const REFRESH_SECS: u64 = 24 * 60 * 60;
pub const PASSWORD: &str = "correct horse battery";

/// Key pairs generated once per test binary.
static KEYS: OnceLock<(KeyMaterial, KeyMaterial)> = OnceLock::new();

pub fn keys() -> &'static (KeyMaterial, KeyMaterial) {
    KEYS.get_or_init(|| {
        (
            generate_key_material().expect("Failed to generate access keys"),
            generate_key_material().expect("Failed to generate refresh keys"),
        )
    })
}

/// Notifier that keeps every notification and can be told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind == kind)
            .count()
    }

    pub fn last(&self, kind: NotificationKind) -> Option<Notification> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|n| n.kind == kind)
            .cloned()
    }

    pub fn last_secret(&self, kind: NotificationKind) -> String {
        self.last(kind).expect("No notification sent").secret
    }
}

impl Notifier for RecordingNotifier {
    fn deliver(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("mail server unavailable".into()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct TestApp {
    pub app: Router,
    pub db: Database,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap_or(Value::Null)
    }

    pub fn set_cookies(&self) -> Vec<String> {
        self.headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }
}

pub struct Tokens {
    pub access: String,
    pub refresh: String,
}

pub async fn setup() -> TestApp {
    TestSetup::new().build().await
}

/// Builder for test setup with various options
pub struct TestSetup {
    rate_limits: RateLimitQuotas,
    reset_window_secs: u64,
    lookup_timeout: Duration,
}

impl TestSetup {
    pub fn new() -> Self {
        Self {
            rate_limits: RateLimitQuotas {
                login_per_minute: 1000,
                reset_per_minute: 1000,
            },
            reset_window_secs: DEFAULT_RESET_WINDOW_SECS,
            lookup_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_rate_limits(mut self, login_per_minute: u32, reset_per_minute: u32) -> Self {
        self.rate_limits = RateLimitQuotas {
            login_per_minute,
            reset_per_minute,
        };
        self
    }

    pub fn with_reset_window(mut self, secs: u64) -> Self {
        self.reset_window_secs = secs;
        self
    }

    pub async fn build(self) -> TestApp {
        let db = Database::open(":memory:")
            .await
            .expect("Failed to open test database");
        let clock = Arc::new(ManualClock::new(START));
        let notifier = Arc::new(RecordingNotifier::default());
        let (access_keys, refresh_keys) = keys().clone();

        let config = ServerConfig {
            db: db.clone(),
            access_keys,
            refresh_keys,
            lifetimes: gatehouse::jwt::TokenLifetimes {
                access_secs: ACCESS_SECS,
                refresh_secs: REFRESH_SECS,
            },
            origin: Url::parse(ORIGIN).expect("Invalid URL"),
            secure_cookies: false, // Tests run on localhost HTTP
            reset_window_secs: self.reset_window_secs,
            lookup_timeout: self.lookup_timeout,
            clock: clock.clone(),
            notifier: notifier.clone(),
            rate_limits: Arc::new(RateLimitConfig::new(self.rate_limits)),
        };

        TestApp {
            app: create_app(&config).expect("Failed to create app"),
            db,
            clock,
            notifier,
        }
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self.app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec();
        TestResponse {
            status,
            headers,
            body,
        }
    }

    /// Create a verified account directly in the store. Returns its UUID.
    pub async fn create_user(&self, name: &str, email: &str, role: UserRole) -> String {
        let uuid = uuid::Uuid::new_v4().to_string();
        let code = format!("code-{}", uuid);
        let hash = hash_password(PASSWORD).unwrap();
        let id = self
            .db
            .users()
            .create(&uuid, name, email, &hash, &code)
            .await
            .unwrap();
        assert!(self.db.users().verify(&code).await.unwrap());
        if role == UserRole::Admin {
            self.db.users().set_role(id, UserRole::Admin).await.unwrap();
        }
        uuid
    }

    pub async fn login(&self, email: &str, password: &str) -> Tokens {
        let response = self
            .send(post_json(
                "/api/users/login",
                serde_json::json!({ "email": email, "password": password }),
            ))
            .await;
        assert_eq!(response.status, StatusCode::OK, "login failed");
        let json = response.json();
        Tokens {
            access: json["access_token"].as_str().unwrap().to_string(),
            refresh: json["refresh_token"].as_str().unwrap().to_string(),
        }
    }

    pub async fn user_with_session(&self, name: &str, email: &str, role: UserRole) -> (String, Tokens) {
        let uuid = self.create_user(name, email, role).await;
        let tokens = self.login(email, PASSWORD).await;
        (uuid, tokens)
    }
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn delete(uri: &str) -> Request<Body> {
    Request::builder()
        .method("DELETE")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_empty(uri: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    json_request("POST", uri, body)
}

pub fn put_json(uri: &str, body: Value) -> Request<Body> {
    json_request("PUT", uri, body)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn with_bearer(mut request: Request<Body>, token: &str) -> Request<Body> {
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", token).parse().unwrap(),
    );
    request
}

pub fn with_cookie(mut request: Request<Body>, name: &str, value: &str) -> Request<Body> {
    request.headers_mut().append(
        header::COOKIE,
        format!("{}={}", name, value).parse().unwrap(),
    );
    request
}
