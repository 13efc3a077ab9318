//! Live per-user views over the change feed.
//!
//! A view subscribes first and then loads an authoritative snapshot, so a
//! change committed while it opens is either in that snapshot or delivered as
//! a notice. Every notice is folded optimistically and schedules a ticketed
//! re-fetch. The newest re-fetch always wins, so duplicated, reordered or
//! dropped events only cause transient drift.

use std::sync::{Arc, Mutex};

use sqlx::SqlitePool;

use crate::AppState;
use crate::decisions::{self, DecisionSnapshot};
use crate::error::AppError;
use crate::expenses;
use crate::feed::{Change, Notice, Subscription, Topic};
use crate::reconcile::{Reconciler, Ticket, Versioned};
use crate::reducer::{ExpenseLedger, apply_decision_status, apply_expense_event, apply_vote_event};

/// Folded state of one view and the tickets for its re-fetches.
struct View<S> {
    state: Mutex<Versioned<S>>,
    reconciler: Reconciler,
}

impl<S: Clone + Default> View<S> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Versioned::new(S::default())),
            reconciler: Reconciler::new(),
        })
    }

    fn read(&self) -> S {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).state().clone()
    }

    fn fold(&self, f: impl FnOnce(S) -> S) {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).fold(f);
    }

    /// Take a ticket before starting a fetch.
    fn issue(&self) -> Ticket {
        self.reconciler.issue()
    }

    /// Install a fetched snapshot unless a newer one already landed.
    fn complete(&self, ticket: Ticket, snapshot: S) -> bool {
        self.state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .accept(ticket, snapshot)
    }
}

pub struct LiveDecision {
    view: Arc<View<DecisionSnapshot>>,
    subscription: Subscription,
    db: SqlitePool,
    decision_id: String,
    user_id: String,
}

impl LiveDecision {
    pub async fn open(state: &AppState, decision_id: &str, user_id: &str) -> Result<Self, AppError> {
        decisions::visible_decision(&state.db, decision_id, user_id).await?;
        let live = Self::attach(state, decision_id, user_id);
        live.load().await?;
        Ok(live)
    }

    fn attach(state: &AppState, decision_id: &str, user_id: &str) -> Self {
        let view = View::<DecisionSnapshot>::new();
        let shared = Arc::clone(&view);
        let db = state.db.clone();
        let ids = (decision_id.to_string(), user_id.to_string());

        let subscription = state.feed.subscribe(Topic::Decision(decision_id.to_string()), {
            let db = db.clone();
            move |notice| {
                let (decision_id, user_id) = &ids;
                match &notice {
                    Notice::Change(Change::DecisionVotes(event)) => shared.fold(|mut s| {
                        s.tally = apply_vote_event(event, s.tally, user_id);
                        s
                    }),
                    Notice::Change(Change::Decisions(event)) => shared.fold(|mut s| {
                        s.status = apply_decision_status(event.new.as_ref().map(|d| d.status), s.status);
                        s
                    }),
                    _ => {}
                }
                refetch_decision(&db, &shared, decision_id, user_id);
            }
        });

        Self {
            view,
            subscription,
            db,
            decision_id: decision_id.to_string(),
            user_id: user_id.to_string(),
        }
    }

    async fn load(&self) -> Result<(), AppError> {
        let ticket = self.view.issue();
        let snapshot = decisions::fetch_vote_snapshot(&self.db, &self.decision_id, &self.user_id).await?;
        self.view.complete(ticket, snapshot);
        Ok(())
    }

    pub fn snapshot(&self) -> DecisionSnapshot {
        self.view.read()
    }

    pub fn close(&self) {
        self.subscription.unsubscribe();
    }
}

fn refetch_decision(db: &SqlitePool, view: &Arc<View<DecisionSnapshot>>, decision_id: &str, user_id: &str) {
    let ticket = view.issue();
    let db = db.clone();
    let view = Arc::clone(view);
    let decision_id = decision_id.to_string();
    let user_id = user_id.to_string();
    tokio::spawn(async move {
        match decisions::fetch_vote_snapshot(&db, &decision_id, &user_id).await {
            Ok(snapshot) => {
                if !view.complete(ticket, snapshot) {
                    tracing::debug!(%decision_id, "discarded stale vote snapshot");
                }
            }
            Err(e) => tracing::warn!(%decision_id, "vote snapshot fetch failed: {e}"),
        }
    });
}

pub struct LiveExpenses {
    view: Arc<View<ExpenseLedger>>,
    subscription: Subscription,
}

impl LiveExpenses {
    pub async fn open(state: &AppState, group_id: &str, user_id: &str) -> Result<Self, AppError> {
        crate::groups::require_member(&state.db, group_id, user_id).await?;

        let view = View::new();
        let shared = Arc::clone(&view);
        let db = state.db.clone();
        let owned_group = group_id.to_string();

        let subscription = state.feed.subscribe(Topic::GroupExpenses(group_id.to_string()), move |notice| {
            if let Notice::Change(Change::Expenses(event)) = &notice {
                shared.fold(|s| apply_expense_event(event, s));
            }

            let ticket = shared.issue();
            let db = db.clone();
            let view = Arc::clone(&shared);
            let group_id = owned_group.clone();
            tokio::spawn(async move {
                match expenses::fetch_expense_snapshot(&db, &group_id).await {
                    Ok(ledger) => {
                        view.complete(ticket, ledger);
                    }
                    Err(e) => tracing::warn!(%group_id, "expense snapshot fetch failed: {e}"),
                }
            });
        });

        let ticket = view.issue();
        let ledger = expenses::fetch_expense_snapshot(&state.db, group_id).await?;
        view.complete(ticket, ledger);

        Ok(Self { view, subscription })
    }

    pub fn ledger(&self) -> ExpenseLedger {
        self.view.read()
    }

    pub fn close(&self) {
        self.subscription.unsubscribe();
    }
}
