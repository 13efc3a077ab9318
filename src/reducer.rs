//! Optimistic folds of change-feed events into local aggregates.
//!
//! These never fail: a malformed, duplicated or out-of-order event leaves the
//! state valid, if possibly stale. They are not authoritative; see
//! [`crate::reconcile`] for the correcting half.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::feed::{EventType, RowEvent};
use crate::models::{DecisionStatus, Expense, Vote};

/// Per-option vote counts as seen by one user.
///
/// `ballots` maps voter to chosen option; counts are adjusted only when a
/// ballot actually changes, so applying the same event twice is a no-op.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteTally {
    pub counts: BTreeMap<String, u64>,
    pub ballots: BTreeMap<String, String>,
    pub my_vote: Option<String>,
}

impl VoteTally {
    pub fn with_options<'a>(option_ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            counts: option_ids.into_iter().map(|id| (id.to_string(), 0)).collect(),
            ..Self::default()
        }
    }

    pub fn count(&self, option_id: &str) -> u64 {
        self.counts.get(option_id).copied().unwrap_or(0)
    }

    fn increment(&mut self, option_id: &str) {
        *self.counts.entry(option_id.to_string()).or_insert(0) += 1;
    }

    fn decrement(&mut self, option_id: &str) {
        if let Some(count) = self.counts.get_mut(option_id) {
            *count = count.saturating_sub(1);
        }
    }

    /// Move `user_id`'s ballot to `option_id`, or clear it with `None`.
    fn set_ballot(&mut self, user_id: &str, option_id: Option<&str>, local_user: &str) {
        let previous = match option_id {
            Some(option_id) => self.ballots.insert(user_id.to_string(), option_id.to_string()),
            None => self.ballots.remove(user_id),
        };
        if previous.as_deref() != option_id {
            if let Some(previous) = previous.as_deref() {
                self.decrement(previous);
            }
            if let Some(option_id) = option_id {
                self.increment(option_id);
            }
        }
        if user_id == local_user {
            self.my_vote = option_id.map(str::to_string);
        }
    }
}

fn usable(vote: &Vote) -> bool {
    !vote.id.is_empty() && !vote.user_id.is_empty() && !vote.option_id.is_empty()
}

pub fn apply_vote_event(event: &RowEvent<Vote>, mut state: VoteTally, local_user: &str) -> VoteTally {
    match event.event_type {
        EventType::Insert | EventType::Update => {
            let Some(vote) = event.new.as_ref().filter(|v| usable(v)) else {
                return state;
            };
            // An UPDATE whose ballot we never saw still carries the old option.
            if event.event_type == EventType::Update && !state.ballots.contains_key(&vote.user_id) {
                if let Some(old) = event.old.as_ref().filter(|v| usable(v)) {
                    if old.user_id == vote.user_id && old.option_id != vote.option_id {
                        state.decrement(&old.option_id);
                    }
                }
            }
            state.set_ballot(&vote.user_id, Some(&vote.option_id), local_user);
            state
        }
        EventType::Delete => {
            let Some(vote) = event.old.as_ref().filter(|v| !v.user_id.is_empty()) else {
                return state;
            };
            if state.ballots.contains_key(&vote.user_id) {
                state.set_ballot(&vote.user_id, None, local_user);
            } else if vote.user_id == local_user {
                state.my_vote = None;
            }
            state
        }
    }
}

/// A group's expenses, newest first, with their exact running total.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpenseLedger {
    pub expenses: Vec<Expense>,
    pub total_spent_cents: i64,
}

impl ExpenseLedger {
    pub fn from_expenses(expenses: Vec<Expense>) -> Self {
        let total_spent_cents = expenses.iter().map(|e| e.amount_cents).sum();
        Self { expenses, total_spent_cents }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.expenses.iter().position(|e| e.id == id)
    }

    fn upsert(&mut self, expense: &Expense) {
        match self.position(&expense.id) {
            Some(idx) => {
                let delta = expense.amount_cents - self.expenses[idx].amount_cents;
                self.expenses[idx] = expense.clone();
                self.total_spent_cents = (self.total_spent_cents + delta).max(0);
            }
            None => {
                self.expenses.insert(0, expense.clone());
                self.total_spent_cents += expense.amount_cents;
            }
        }
    }
}

pub fn apply_expense_event(event: &RowEvent<Expense>, mut state: ExpenseLedger) -> ExpenseLedger {
    match event.event_type {
        EventType::Insert | EventType::Update => {
            if let Some(expense) = event.new.as_ref().filter(|e| !e.id.is_empty()) {
                state.upsert(expense);
            }
        }
        EventType::Delete => {
            let idx = event
                .old
                .as_ref()
                .filter(|e| !e.id.is_empty())
                .and_then(|e| state.position(&e.id));
            if let Some(idx) = idx {
                let removed = state.expenses.remove(idx);
                state.total_spent_cents = (state.total_spent_cents - removed.amount_cents).max(0);
            }
        }
    }
    state
}

/// Fold a decision row change into the locally known status. Terminal
/// statuses are sticky.
pub fn apply_decision_status(
    event_status: Option<DecisionStatus>,
    current: DecisionStatus,
) -> DecisionStatus {
    match event_status {
        Some(next) if current.can_transition_to(next) => next,
        _ => current,
    }
}
