//! Thread-safe table of task states.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::models::task::TaskState;

/// Ordered task-id to state table that only accepts forward transitions.
#[derive(Debug, Default)]
pub struct TaskBoard {
    rows: Mutex<Vec<(String, TaskState)>>,
}

impl TaskBoard {
    /// Construct an empty board.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> MutexGuard<'_, Vec<(String, TaskState)>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove every row.
    pub fn clear(&self) {
        self.rows().clear();
    }

    /// Add `id` in the `Waiting` state; existing rows are left untouched.
    pub fn queue(&self, id: &str) {
        let mut rows = self.rows();
        if !rows.iter().any(|(existing, _)| existing == id) {
            rows.push((id.to_owned(), TaskState::Waiting));
        }
    }

    /// Apply `next` to `id` if it moves the row forward.
    ///
    /// Returns `false` when the row is unknown or the transition would go
    /// backwards or leave a terminal state.
    pub fn transition(&self, id: &str, next: TaskState) -> bool {
        let mut rows = self.rows();
        match rows.iter_mut().find(|(existing, _)| existing == id) {
            Some((_, state)) if state.can_transition_to(&next) => {
                *state = next;
                true
            }
            _ => false,
        }
    }

    /// Move every `Waiting` row to `Cancelled`; returns the affected ids.
    pub fn cancel_waiting(&self) -> Vec<String> {
        let mut rows = self.rows();
        rows.iter_mut()
            .filter(|(_, state)| matches!(state, TaskState::Waiting))
            .map(|(id, state)| {
                *state = TaskState::Cancelled;
                id.clone()
            })
            .collect()
    }

    /// Current state of `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<TaskState> {
        self.rows()
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, state)| state.clone())
    }

    /// Copy of all rows in queue order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, TaskState)> {
        self.rows().clone()
    }
}
