mod common;

use axum::http::StatusCode;
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn health_check() {
    let app = TestApp::new().await;
    let (status, body) = app.get("/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn login_with_valid_invite_code() {
    let app = TestApp::new().await;
    let user = app.create_user("Test User").await;
    let cookie = app.login(&user).await;

    let (status, me) = app.get("/me", Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["id"], user.id);
    assert_eq!(me["name"], "Test User");
}

#[tokio::test]
async fn login_with_invalid_invite_code() {
    let app = TestApp::new().await;
    let (status, body) = app
        .post("/login", json!({ "invite_code": "bogus" }), None)
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["fields"]["invite_code"], "Invalid invite code");
}

#[tokio::test]
async fn writes_require_identity() {
    let app = TestApp::new().await;
    let (status, _) = app.post("/groups", json!({ "name": "Trip" }), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.post("/decisions/x/vote", json!({ "option_id": "o" }), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn logout_clears_session() {
    let app = TestApp::new().await;
    let user = app.create_user("Test User").await;
    let cookie = app.login(&user).await;

    let (status, _) = app.post("/logout", json!({}), Some(&cookie)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get("/me", Some(&cookie)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}
