//! Majority resolution for group decisions.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::models::DecisionStatus;

/// `floor(members / 2) + 1`, or zero for an empty group.
///
/// Yes and No can never both reach this bar: together they would need more
/// ballots than there are members.
pub fn majority(member_count: u64) -> u64 {
    if member_count == 0 {
        0
    } else {
        member_count / 2 + 1
    }
}

/// Terminal status the current tallies call for, if any.
pub fn evaluate(
    status: DecisionStatus,
    yes_votes: u64,
    no_votes: u64,
    member_count: u64,
) -> Option<DecisionStatus> {
    if status.is_terminal() {
        return None;
    }
    let bar = majority(member_count);
    if bar == 0 {
        return None;
    }
    if yes_votes >= bar {
        Some(DecisionStatus::Approved)
    } else if no_votes >= bar {
        Some(DecisionStatus::Declined)
    } else {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Approved,
    Declined,
    /// Neither option has a majority yet.
    Pending,
    /// The decision was already approved or declined.
    AlreadyClosed,
    /// Another resolver closed the decision between our read and our write.
    LostRace,
}

/// Per-decision resolution locks for this process.
///
/// A resolver that finds the decision busy waits its turn and then evaluates
/// the tallies as they are after the holder finished, so a vote committed
/// while another resolution is running is never left unevaluated.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until no other resolver in this process holds `id`.
    pub async fn begin(&self, id: &str) -> InFlightGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        let held = lock.lock_owned().await;
        InFlightGuard {
            locks: Arc::clone(&self.locks),
            id: id.to_string(),
            held: Some(held),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).contains_key(id)
    }
}

pub struct InFlightGuard {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    id: String,
    held: Option<OwnedMutexGuard<()>>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        self.held.take();
        // Only the map holds the lock now: nobody is waiting on it.
        if locks.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.id);
        }
    }
}
