#![allow(dead_code)]

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use http_body_util::BodyExt;
use isle::AppState;
use isle::feed::FeedConfig;
use isle::models::User;
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub db: SqlitePool,
}

impl TestApp {
    pub async fn new() -> Self {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .unwrap()
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .expect("Failed to create in-memory SQLite pool");

        Self::with_pool(pool).await
    }

    /// An app on a fresh database file with several connections, so
    /// requests really run concurrently against SQLite's locking.
    pub async fn on_disk() -> Self {
        let path = std::env::temp_dir().join(format!("isle-test-{}.db", uuid::Uuid::new_v4()));
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .expect("Failed to create on-disk SQLite pool");

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Self {
        isle::db::migrate(&pool).await.expect("Failed to run migrations");

        let state = AppState::new(pool.clone(), test_feed());
        let router = isle::build_app(state.clone(), false)
            .await
            .expect("Failed to build app");

        Self { router, state, db: pool }
    }

    /// Send a request through the app and return the response.
    pub async fn request(&self, req: Request<Body>) -> Response {
        tower::ServiceExt::oneshot(self.router.clone(), req)
            .await
            .unwrap()
    }

    /// Create a user in the database.
    pub async fn create_user(&self, name: &str) -> User {
        isle::cli::create_user(&self.db, name, None)
            .await
            .expect("Failed to create test user")
    }

    /// Log in as the given user and return the session cookie string.
    pub async fn login(&self, user: &User) -> String {
        let body = serde_json::json!({ "invite_code": user.invite_code });
        let req = Request::builder()
            .uri("/login")
            .method("POST")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();

        let resp = self.request(req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        resp.headers()
            .get("set-cookie")
            .expect("Login should set a session cookie")
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string()
    }

    /// Create a user and log them in.
    pub async fn signed_in(&self, name: &str) -> (User, String) {
        let user = self.create_user(name).await;
        let cookie = self.login(&user).await;
        (user, cookie)
    }

    async fn send(&self, method: &str, uri: &str, body: Option<&Value>, cookie: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().uri(uri).method(method);
        if let Some(cookie) = cookie {
            builder = builder.header("cookie", cookie);
        }
        let req = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let resp = self.request(req).await;
        let status = resp.status();
        (status, body_json(resp).await)
    }

    pub async fn get(&self, uri: &str, cookie: Option<&str>) -> (StatusCode, Value) {
        self.send("GET", uri, None, cookie).await
    }

    pub async fn post(&self, uri: &str, body: Value, cookie: Option<&str>) -> (StatusCode, Value) {
        self.send("POST", uri, Some(&body), cookie).await
    }

    pub async fn put(&self, uri: &str, body: Value, cookie: Option<&str>) -> (StatusCode, Value) {
        self.send("PUT", uri, Some(&body), cookie).await
    }

    pub async fn delete(&self, uri: &str, cookie: Option<&str>) -> (StatusCode, Value) {
        self.send("DELETE", uri, None, cookie).await
    }

    /// Create a group owned by `cookie`'s user and return its JSON.
    pub async fn create_group(&self, name: &str, cookie: &str) -> Value {
        let (status, group) = self
            .post("/groups", serde_json::json!({ "name": name }), Some(cookie))
            .await;
        assert_eq!(status, StatusCode::CREATED, "{group}");
        group
    }

    /// Join the group through its invite code.
    pub async fn join(&self, group: &Value, cookie: &str) {
        let (status, body) = self
            .post(
                "/groups/join",
                serde_json::json!({ "invite_code": group["invite_code"] }),
                Some(cookie),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
    }
}

/// Feed settings with short reconnect delays.
pub fn test_feed() -> FeedConfig {
    FeedConfig {
        capacity: 64,
        reconnect_base: Duration::from_millis(5),
        reconnect_max: Duration::from_millis(50),
    }
}

/// Read the full response body as JSON, or `Null` when empty.
pub async fn body_json(resp: Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually<F: FnMut() -> bool>(mut check: F) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
