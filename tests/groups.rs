mod common;

use axum::http::StatusCode;
use common::TestApp;
use serde_json::json;

#[tokio::test]
async fn creator_is_enrolled_as_owner() {
    let app = TestApp::new().await;
    let (user, cookie) = app.signed_in("Owner").await;

    let (status, group) = app
        .post(
            "/groups",
            json!({
                "name": "Lombok loop",
                "destination": "Lombok",
                "start_date": "2026-11-01",
                "end_date": "2026-11-08"
            }),
            Some(&cookie),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(group["destination"], "Lombok");

    let id = group["id"].as_str().unwrap();
    let (status, members) = app.get(&format!("/groups/{id}/members"), Some(&cookie)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(members.as_array().unwrap().len(), 1);
    assert_eq!(members[0]["user_id"], user.id);
    assert_eq!(members[0]["role"], "owner");
}

#[tokio::test]
async fn create_group_validates_fields() {
    let app = TestApp::new().await;
    let (_, cookie) = app.signed_in("Owner").await;

    let (status, body) = app
        .post(
            "/groups",
            json!({ "name": "", "start_date": "2026-11-08", "end_date": "2026-11-01" }),
            Some(&cookie),
        )
        .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["fields"]["name"], "Name is required");
    assert_eq!(body["fields"]["end_date"], "Trip cannot end before it starts");
}

#[tokio::test]
async fn joining_twice_keeps_one_membership() {
    let app = TestApp::new().await;
    let (_, owner) = app.signed_in("Owner").await;
    let (_, guest) = app.signed_in("Guest").await;
    let group = app.create_group("Flores", &owner).await;

    app.join(&group, &guest).await;
    app.join(&group, &guest).await;

    let id = group["id"].as_str().unwrap();
    let (_, members) = app.get(&format!("/groups/{id}/members"), Some(&owner)).await;
    assert_eq!(members.as_array().unwrap().len(), 2);

    let (_, groups) = app.get("/groups", Some(&guest)).await;
    assert_eq!(groups[0]["member_count"], 2);
    assert_eq!(groups[0]["role"], "member");
}

#[tokio::test]
async fn join_with_unknown_code_is_not_found() {
    let app = TestApp::new().await;
    let (_, cookie) = app.signed_in("Guest").await;
    let (status, _) = app
        .post("/groups/join", json!({ "invite_code": "nope" }), Some(&cookie))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn non_members_are_forbidden() {
    let app = TestApp::new().await;
    let (_, owner) = app.signed_in("Owner").await;
    let (_, outsider) = app.signed_in("Outsider").await;
    let group = app.create_group("Private", &owner).await;
    let id = group["id"].as_str().unwrap();

    let (status, _) = app.get(&format!("/groups/{id}"), Some(&outsider)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get("/groups/missing", Some(&outsider)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn owner_cannot_leave_but_members_can() {
    let app = TestApp::new().await;
    let (_, owner) = app.signed_in("Owner").await;
    let (_, guest) = app.signed_in("Guest").await;
    let group = app.create_group("Komodo", &owner).await;
    app.join(&group, &guest).await;
    let id = group["id"].as_str().unwrap();

    let (status, _) = app.post(&format!("/groups/{id}/leave"), json!({}), Some(&owner)).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = app.post(&format!("/groups/{id}/leave"), json!({}), Some(&guest)).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.get(&format!("/groups/{id}"), Some(&guest)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}
