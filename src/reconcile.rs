//! Authoritative snapshots replace folded state wholesale.
//!
//! Several re-fetches for one view can be in flight at once and complete in
//! any order. Each fetch takes a [`Ticket`] before it starts; a snapshot is
//! only accepted if its ticket is newer than the last accepted one.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Default)]
pub struct Reconciler {
    issued: AtomicU64,
}

impl Reconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> Ticket {
        Ticket(self.issued.fetch_add(1, Ordering::AcqRel) + 1)
    }
}

/// Local state plus the ticket of the snapshot it was last reset from.
#[derive(Debug, Clone)]
pub struct Versioned<S> {
    applied: Option<Ticket>,
    state: S,
}

impl<S> Versioned<S> {
    pub fn new(state: S) -> Self {
        Self { applied: None, state }
    }

    pub fn state(&self) -> &S {
        &self.state
    }

    /// Replace the state with an optimistic fold of it.
    pub fn fold(&mut self, f: impl FnOnce(S) -> S)
    where
        S: Default,
    {
        let current = std::mem::take(&mut self.state);
        self.state = f(current);
    }

    /// Returns false if a newer snapshot has already been accepted.
    pub fn accept(&mut self, ticket: Ticket, snapshot: S) -> bool {
        if self.applied.is_some_and(|applied| ticket <= applied) {
            return false;
        }
        self.applied = Some(ticket);
        self.state = snapshot;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::RowEvent;
    use crate::models::Vote;
    use crate::reducer::{VoteTally, apply_vote_event};

    fn vote(user: &str, option: &str) -> Vote {
        Vote {
            id: format!("v-{user}"),
            decision_id: "d".into(),
            user_id: user.into(),
            option_id: option.into(),
            created_at: String::new(),
            updated_at: String::new(),
        }
    }

    #[test]
    fn tickets_increase() {
        let reconciler = Reconciler::new();
        let a = reconciler.issue();
        let b = reconciler.issue();
        assert!(b > a);
    }

    #[test]
    fn stale_snapshot_is_rejected() {
        let reconciler = Reconciler::new();
        let mut view = Versioned::new(0u32);
        let older = reconciler.issue();
        let newer = reconciler.issue();

        assert!(view.accept(newer, 2));
        assert!(!view.accept(older, 1));
        assert_eq!(*view.state(), 2);
    }

    #[test]
    fn snapshot_heals_drift_from_dropped_and_duplicated_events() {
        let reconciler = Reconciler::new();
        let mut view = Versioned::new(VoteTally::with_options(["1", "2"]));

        // alice's insert was dropped; her later update still arrives, twice.
        let flip = RowEvent::update(vote("alice", "1"), vote("alice", "2"));
        view.fold(|s| apply_vote_event(&flip, s, "me"));
        view.fold(|s| apply_vote_event(&flip, s, "me"));
        view.fold(|s| apply_vote_event(&RowEvent::insert(vote("me", "1")), s, "me"));

        let mut authoritative = VoteTally::with_options(["1", "2"]);
        authoritative.counts.insert("1".into(), 1);
        authoritative.counts.insert("2".into(), 2);
        authoritative.ballots.insert("alice".into(), "2".into());
        authoritative.ballots.insert("bob".into(), "2".into());
        authoritative.ballots.insert("me".into(), "1".into());
        authoritative.my_vote = Some("1".into());
        assert_ne!(view.state(), &authoritative);

        assert!(view.accept(reconciler.issue(), authoritative.clone()));
        assert_eq!(view.state(), &authoritative);
    }
}
