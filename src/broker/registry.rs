//! Wait queue — ordered set of user identifiers awaiting an agent.
//!
//! Backed by a `VecDeque` with the oldest request at the front. An
//! identifier appears at most once; insertion order is never changed
//! by removals of other entries.

use std::collections::VecDeque;

/// Ordered, duplicate-free queue of waiting user identifiers.
#[derive(Debug, Default)]
pub struct WaitQueue {
    entries: VecDeque<String>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Append a user to the back of the queue.
    ///
    /// Returns `false` (and leaves the queue untouched) if the user is
    /// already waiting.
    pub fn push(&mut self, user_id: &str) -> bool {
        if self.contains(user_id) {
            return false;
        }
        self.entries.push_back(user_id.to_string());
        true
    }

    /// Remove a user wherever it sits. Returns whether it was present.
    pub fn remove(&mut self, user_id: &str) -> bool {
        match self.entries.iter().position(|id| id == user_id) {
            Some(index) => {
                self.entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Linear scan; queues are short.
    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.iter().any(|id| id == user_id)
    }

    /// Current queue contents, oldest first.
    pub fn snapshot(&self) -> Vec<String> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
