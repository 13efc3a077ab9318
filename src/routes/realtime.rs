use axum::{
    Router,
    extract::{Path, State},
    response::{
        IntoResponse,
        sse::{Event, KeepAlive, Sse},
    },
    routing::get,
};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::AppState;
use crate::auth::AuthUser;
use crate::decisions;
use crate::error::AppError;
use crate::feed::Topic;
use crate::groups;

pub fn router() -> Router<AppState> {
    Router::new().route("/realtime/{topic}", get(stream_topic))
}

/// Stream a topic's changes as server-sent events. A `resync` event means
/// the client fell behind and should refetch its `init` snapshot.
async fn stream_topic(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Path(topic): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let topic: Topic = topic
        .parse()
        .map_err(|e: String| AppError::invalid("topic", &e))?;

    match &topic {
        Topic::Decision(id) => {
            decisions::visible_decision(&state.db, id, &user.id).await?;
        }
        Topic::GroupExpenses(id) | Topic::GroupChallenges(id) => {
            groups::require_member(&state.db, id, &user.id).await?;
        }
    }

    tracing::debug!(%topic, user_id = %user.id, "realtime stream opened");
    let stream = BroadcastStream::new(state.feed.receiver(&topic)).map(|item| match item {
        Ok(change) => Event::default().event("change").json_data(change),
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            Ok(Event::default().event("resync").data(missed.to_string()))
        }
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
