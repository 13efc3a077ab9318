//! In-process change feed.
//!
//! Every committed row mutation is published on the topic of the entity it
//! belongs to. Delivery is best effort: a slow subscriber can lag and miss
//! events, and a dropped channel loses whatever was in flight. Subscribers are
//! told to resync in both cases and are expected to re-fetch an authoritative
//! snapshot rather than trust their folded state.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;

use crate::models::{ChallengeMember, Decision, Expense, Vote};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    Decision(String),
    GroupExpenses(String),
    GroupChallenges(String),
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::Decision(id) => write!(f, "decision:{id}"),
            Topic::GroupExpenses(id) => write!(f, "group-expenses:{id}"),
            Topic::GroupChallenges(id) => write!(f, "group-challenges:{id}"),
        }
    }
}

impl FromStr for Topic {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("topic `{s}` has no entity id"))?;
        if id.is_empty() {
            return Err(format!("topic `{s}` has no entity id"));
        }
        match kind {
            "decision" => Ok(Topic::Decision(id.to_string())),
            "group-expenses" => Ok(Topic::GroupExpenses(id.to_string())),
            "group-challenges" => Ok(Topic::GroupChallenges(id.to_string())),
            other => Err(format!("unknown topic kind `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

/// A single row mutation with before/after snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowEvent<T> {
    #[serde(rename = "eventType")]
    pub event_type: EventType,
    pub new: Option<T>,
    pub old: Option<T>,
}

impl<T> RowEvent<T> {
    pub fn insert(row: T) -> Self {
        Self { event_type: EventType::Insert, new: Some(row), old: None }
    }

    pub fn update(old: T, new: T) -> Self {
        Self { event_type: EventType::Update, new: Some(new), old: Some(old) }
    }

    pub fn delete(row: T) -> Self {
        Self { event_type: EventType::Delete, new: None, old: Some(row) }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "table", content = "payload", rename_all = "snake_case")]
pub enum Change {
    Decisions(RowEvent<Decision>),
    DecisionVotes(RowEvent<Vote>),
    Expenses(RowEvent<Expense>),
    ChallengeMembers(RowEvent<ChallengeMember>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Change(Change),
    /// Events may have been missed; local state should be re-fetched.
    Resync,
}

#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub capacity: usize,
    pub reconnect_base: Duration,
    pub reconnect_max: Duration,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            reconnect_base: Duration::from_millis(100),
            reconnect_max: Duration::from_secs(5),
        }
    }
}

/// Capped exponential backoff.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

pub struct ChangeFeed {
    channels: Mutex<HashMap<Topic, broadcast::Sender<Change>>>,
    config: FeedConfig,
}

impl ChangeFeed {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            config,
        }
    }


    /// Send `change` to the topic's current receivers. Topics nobody listens
    /// to get no channel, and a channel whose receivers are all gone is
    /// dropped here instead of buffering.
    pub fn publish(&self, topic: &Topic, change: Change) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let Some(tx) = channels.get(topic) else {
            tracing::trace!(%topic, "no subscribers, change dropped");
            return;
        };
        if tx.receiver_count() == 0 {
            channels.remove(topic);
            tracing::debug!(%topic, "removed idle channel");
            return;
        }
        let delivered = tx.send(change).unwrap_or(0);
        tracing::debug!(%topic, delivered, "published change");
    }

    /// Number of topics that currently have a channel.
    pub fn topic_count(&self) -> usize {
        self.channels.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Raw receiver for a topic, used by the SSE bridge.
    ///
    /// Opening a new topic also sweeps channels whose receivers are gone.
    pub fn receiver(&self, topic: &Topic) -> broadcast::Receiver<Change> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(tx) = channels.get(topic) {
            return tx.subscribe();
        }
        retain_listened(&mut channels);
        let (tx, rx) = broadcast::channel(self.config.capacity);
        channels.insert(topic.clone(), tx);
        rx
    }

    /// Drop the channel for a topic. Current subscribers see it close and
    /// re-subscribe after a backoff.
    pub fn disconnect(&self, topic: &Topic) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(topic);
    }

    /// Remove channels nobody is listening on.
    pub fn prune(&self) {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        retain_listened(&mut channels);
    }

    /// Deliver every change on `topic` to `on_notice` until unsubscribed.
    ///
    /// Must be called from inside a tokio runtime. Each call gets its own
    /// receiver, so several subscriptions to one topic are independent.
    pub fn subscribe<F>(self: &Arc<Self>, topic: Topic, on_notice: F) -> Subscription
    where
        F: Fn(Notice) + Send + Sync + 'static,
    {
        let active = Arc::new(AtomicBool::new(true));
        let mut rx = self.receiver(&topic);
        let feed = Arc::clone(self);
        let flag = Arc::clone(&active);

        let task = tokio::spawn(async move {
            let mut backoff = Backoff::new(feed.config.reconnect_base, feed.config.reconnect_max);
            loop {
                let notice = match rx.recv().await {
                    Ok(change) => {
                        backoff.reset();
                        Notice::Change(change)
                    }
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!(%topic, missed, "subscriber lagged behind change feed");
                        Notice::Resync
                    }
                    Err(RecvError::Closed) => {
                        let delay = backoff.next_delay();
                        tracing::warn!(%topic, ?delay, "change feed closed, re-subscribing");
                        tokio::time::sleep(delay).await;
                        rx = feed.receiver(&topic);
                        Notice::Resync
                    }
                };
                if !flag.load(Ordering::Acquire) {
                    break;
                }
                on_notice(notice);
            }
        });

        Subscription { active, task }
    }
}

fn retain_listened(channels: &mut HashMap<Topic, broadcast::Sender<Change>>) {
    channels.retain(|_, tx| tx.receiver_count() > 0);
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(FeedConfig::default())
    }
}

pub struct Subscription {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Subscription {
    /// Stop delivery. Safe to call more than once. A notice already being
    /// dispatched when this runs may still complete.
    pub fn unsubscribe(&self) {
        self.active.store(false, Ordering::Release);
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}
