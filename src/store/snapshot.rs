use chrono::{DateTime, Utc};
use std::sync::Arc;

/// An immutable view of a store at one point in time.
#[derive(Debug)]
pub struct StateSnapshot<S> {
    state: Arc<S>,
    version: u64,
    updated_at: DateTime<Utc>,
    reason: Option<String>,
}

impl<S> StateSnapshot<S> {
    pub(crate) fn new(state: Arc<S>, version: u64, reason: Option<String>) -> Self {
        Self {
            state,
            version,
            updated_at: Utc::now(),
            reason,
        }
    }

    pub fn state(&self) -> &Arc<S> {
        &self.state
    }

    /// Starts at 0 and grows by one per committed update.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Why the last transition happened.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}

impl<S> Clone for StateSnapshot<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            version: self.version,
            updated_at: self.updated_at,
            reason: self.reason.clone(),
        }
    }
}
