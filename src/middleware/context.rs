use chrono::{DateTime, Utc};
use std::sync::Arc;

/// A reducer maps the current state to the next one.
///
/// Returning the same `Arc` it was given tells the store nothing changed.
pub type Reducer<S> = Box<dyn Fn(&Arc<S>) -> Arc<S> + Send + Sync>;

/// Mutable context threaded through the initialize pipeline.
pub struct InitializeContext<S> {
    state: Arc<S>,
    blocked_reason: Option<String>,
}

impl<S> InitializeContext<S> {
    pub(crate) fn new(state: Arc<S>) -> Self {
        Self {
            state,
            blocked_reason: None,
        }
    }

    /// The state the store will hold once initialization completes.
    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    /// Replace the state, e.g. with a value restored from storage.
    pub fn set_state(&mut self, state: Arc<S>) {
        self.state = state;
    }

    /// Stop the rest of the forward chain. Cannot be undone.
    pub fn block(&mut self, reason: impl Into<String>) {
        if self.blocked_reason.is_none() {
            self.blocked_reason = Some(reason.into());
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_reason.is_some()
    }

    pub fn blocked_reason(&self) -> Option<&str> {
        self.blocked_reason.as_deref()
    }

    pub(crate) fn into_state(self) -> Arc<S> {
        self.state
    }
}

/// Mutable context threaded through the update pipeline.
pub struct UpdateContext<S> {
    reducer: Reducer<S>,
    current_state: Arc<S>,
    next_state: Option<Arc<S>>,
    reason: String,
    started_at: DateTime<Utc>,
    blocked_reason: Option<String>,
}

impl<S> UpdateContext<S> {
    pub(crate) fn new(reducer: Reducer<S>, current_state: Arc<S>, reason: String) -> Self {
        Self {
            reducer,
            current_state,
            next_state: None,
            reason,
            started_at: Utc::now(),
            blocked_reason: None,
        }
    }

    /// State captured when the update started.
    pub fn current_state(&self) -> &Arc<S> {
        &self.current_state
    }

    /// The state to commit, once the terminal stage or a middleware has produced it.
    pub fn next_state(&self) -> Option<&Arc<S>> {
        self.next_state.as_ref()
    }

    /// Supply the next state directly; the reducer is then skipped.
    pub fn set_next_state(&mut self, state: Arc<S>) {
        self.next_state = Some(state);
    }

    /// The caller's reason; it becomes the committed snapshot's reason.
    pub fn reason(&self) -> &str {
        &self.reason
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Apply the caller's reducer to `state` without touching the context.
    pub fn reduce(&self, state: &Arc<S>) -> Arc<S> {
        (self.reducer)(state)
    }

    /// Veto this update. Cannot be undone.
    pub fn block(&mut self, reason: impl Into<String>) {
        if self.blocked_reason.is_none() {
            self.blocked_reason = Some(reason.into());
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.blocked_reason.is_some()
    }

    pub fn blocked_reason(&self) -> Option<&str> {
        self.blocked_reason.as_deref()
    }

    /// Terminal stage of the update chain.
    pub(crate) fn apply_reducer(&mut self) {
        if self.is_blocked() || self.next_state.is_some() {
            return;
        }
        self.next_state = Some((self.reducer)(&self.current_state));
    }

    /// The state to commit: the pipeline's result, or the reducer applied now.
    pub(crate) fn resolve_next_state(&self) -> Arc<S> {
        match &self.next_state {
            Some(next) => Arc::clone(next),
            None => (self.reducer)(&self.current_state),
        }
    }
}
