//! Per-conversation history paging cursors.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy)]
struct Cursor {
    next_before_id: i64,
    exhausted: bool,
}

/// Tracks how far back each conversation has been paged. A conversation
/// with no cursor yet is assumed to have more history.
#[derive(Debug, Default)]
pub struct HistoryManager {
    cursors: HashMap<String, Cursor>,
}

impl HistoryManager {
    pub fn reset(&mut self, key: &str) {
        self.cursors.remove(key);
    }

    /// Record the outcome of one page: an empty page marks the
    /// conversation exhausted.
    pub fn update(&mut self, key: &str, next_before_id: i64, count: usize) {
        self.cursors.insert(
            key.to_owned(),
            Cursor {
                next_before_id,
                exhausted: count == 0,
            },
        );
    }

    pub fn next_before_id(&self, key: &str) -> i64 {
        self.cursors
            .get(key)
            .map(|cursor| cursor.next_before_id)
            .unwrap_or(0)
    }

    pub fn has_more(&self, key: &str) -> bool {
        self.cursors
            .get(key)
            .map(|cursor| !cursor.exhausted)
            .unwrap_or(true)
    }
}
