mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TestApp, eventually};
use isle::decisions::fetch_vote_snapshot;
use isle::error::AppError;
use isle::expenses::fetch_expense_snapshot;
use isle::feed::{Change, RowEvent, Topic};
use isle::live::{LiveDecision, LiveExpenses};
use isle::models::{DecisionStatus, User, Vote};
use serde_json::{Value, json};
use std::time::Duration;

struct Trip {
    app: TestApp,
    users: Vec<(User, String)>,
    group_id: String,
    decision_id: String,
    yes: String,
    no: String,
}

async fn trip(members: usize) -> Trip {
    let app = TestApp::new().await;
    let mut users = Vec::new();
    for i in 0..members {
        users.push(app.signed_in(&format!("Diver {i}")).await);
    }
    let group = app.create_group("Komodo", &users[0].1).await;
    for (_, cookie) in &users[1..] {
        app.join(&group, cookie).await;
    }
    let group_id = group["id"].as_str().unwrap().to_string();

    let (_, decision) = app
        .post(
            &format!("/groups/{group_id}/decisions"),
            json!({ "title": "Night dive" }),
            Some(&users[0].1),
        )
        .await;
    let option = |label: &str| -> String {
        let options = decision["options"].as_array().unwrap();
        let found = options.iter().find(|o| o["label"] == label).unwrap();
        found["id"].as_str().unwrap().to_string()
    };

    Trip {
        yes: option("Yes"),
        no: option("No"),
        decision_id: decision["id"].as_str().unwrap().to_string(),
        group_id,
        users,
        app,
    }
}

impl Trip {
    async fn vote(&self, voter: usize, option: &str) -> Value {
        let (status, body) = self
            .app
            .post(
                &format!("/decisions/{}/vote", self.decision_id),
                json!({ "option_id": option }),
                Some(&self.users[voter].1),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        body
    }

    async fn live(&self, viewer: usize) -> LiveDecision {
        LiveDecision::open(&self.app.state, &self.decision_id, &self.users[viewer].0.id)
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn live_decision_follows_a_vote_flip() {
    let t = trip(3).await;
    let view = t.live(0).await;
    assert_eq!(view.snapshot().tally.count(&t.yes), 0);

    t.vote(0, &t.yes).await;
    t.vote(0, &t.no).await;

    assert!(
        eventually(|| {
            let snap = view.snapshot();
            snap.tally.count(&t.yes) == 0
                && snap.tally.count(&t.no) == 1
                && snap.tally.my_vote.as_deref() == Some(t.no.as_str())
        })
        .await
    );
    view.close();
}

#[tokio::test]
async fn live_decision_sees_approval() {
    let t = trip(2).await;
    let view = t.live(1).await;
    assert_eq!(view.snapshot().status, DecisionStatus::Open);

    t.vote(0, &t.yes).await;
    let outcome = t.vote(1, &t.yes).await;
    assert_eq!(outcome["resolution"], "approved");

    assert!(eventually(|| view.snapshot().status == DecisionStatus::Approved).await);
    assert_eq!(view.snapshot().tally.count(&t.yes), 2);
}

#[tokio::test]
async fn bogus_events_are_healed_by_refetch() {
    let t = trip(3).await;
    t.vote(1, &t.yes).await;
    let view = t.live(0).await;
    let truth = fetch_vote_snapshot(&t.app.db, &t.decision_id, &t.users[0].0.id)
        .await
        .unwrap();

    let ghost = Vote::new(t.decision_id.clone(), "ghost".into(), t.yes.clone());
    let topic = Topic::Decision(t.decision_id.clone());
    t.app.state.feed.publish(&topic, Change::DecisionVotes(RowEvent::insert(ghost.clone())));
    t.app.state.feed.publish(&topic, Change::DecisionVotes(RowEvent::insert(ghost)));

    assert!(eventually(|| view.snapshot() == truth).await);
    assert_eq!(view.snapshot().tally.count(&t.yes), 1);
}

#[tokio::test]
async fn live_decision_recovers_after_disconnect() {
    let t = trip(3).await;
    let view = t.live(0).await;

    t.app.state.feed.disconnect(&Topic::Decision(t.decision_id.clone()));
    tokio::time::sleep(Duration::from_millis(60)).await;
    t.vote(2, &t.no).await;

    assert!(eventually(|| view.snapshot().tally.count(&t.no) == 1).await);
}

#[tokio::test]
async fn closed_view_stops_updating() {
    let t = trip(3).await;
    let view = t.live(0).await;
    view.close();
    view.close();

    t.vote(1, &t.yes).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(view.snapshot().tally.count(&t.yes), 0);
}

#[tokio::test]
async fn outsiders_cannot_open_a_live_decision() {
    let t = trip(1).await;
    let stranger = t.app.create_user("Stranger").await;
    let result = LiveDecision::open(&t.app.state, &t.decision_id, &stranger.id).await;
    assert!(matches!(result, Err(AppError::Forbidden)));
}

#[tokio::test]
async fn live_expenses_total_matches_rows() {
    let t = trip(2).await;
    let (user, cookie) = &t.users[1];
    let view = LiveExpenses::open(&t.app.state, &t.group_id, &user.id).await.unwrap();
    assert_eq!(view.ledger().total_spent_cents, 0);

    for amount in [json!(10.1), json!("0.2"), json!(7)] {
        let (status, _) = t
            .app
            .post(
                &format!("/groups/{}/expenses", t.group_id),
                json!({ "item": "Fuel", "amount": amount }),
                Some(cookie),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let truth = fetch_expense_snapshot(&t.app.db, &t.group_id).await.unwrap();
    assert_eq!(truth.total_spent_cents, 1730);
    assert!(eventually(|| view.ledger() == truth).await);
    view.close();
}

#[tokio::test]
async fn realtime_stream_is_members_only() {
    let t = trip(1).await;
    let (_, stranger) = t.app.signed_in("Stranger").await;

    let open = |cookie: &str, topic: String| {
        Request::builder()
            .uri(format!("/realtime/{topic}"))
            .header("cookie", cookie)
            .body(Body::empty())
            .unwrap()
    };

    let resp = t
        .app
        .request(open(&t.users[0].1, format!("decision:{}", t.decision_id)))
        .await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "text/event-stream");

    let resp = t
        .app
        .request(open(&stranger, format!("group-expenses:{}", t.group_id)))
        .await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let resp = t.app.request(open(&t.users[0].1, "weather:today".into())).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
}
