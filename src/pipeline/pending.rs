//! Holds user queries submitted before the session is active.

use crate::pipeline::messages::PendingQuery;
use std::collections::VecDeque;

/// FIFO buffer of queries awaiting an active session.
///
/// Entries are only discarded by [`clear`](Self::clear), which the
/// coordinator calls on explicit session teardown.
#[derive(Debug, Default)]
pub struct PendingQueryBuffer {
    queries: VecDeque<PendingQuery>,
}

impl PendingQueryBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a query; returns the number now waiting.
    pub fn push(&mut self, text: impl Into<String>) -> usize {
        self.queries.push_back(PendingQuery { text: text.into() });
        self.queries.len()
    }

    /// Take every buffered query in submission order.
    ///
    /// Draining an empty buffer returns an empty vector.
    pub fn drain(&mut self) -> Vec<PendingQuery> {
        self.queries.drain(..).collect()
    }

    /// Discard everything; returns how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.queries.len();
        self.queries.clear();
        dropped
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }
}
