// Bounded undo/redo stacks.

use std::collections::VecDeque;

/// Maximum number of snapshots kept on either stack.
pub const HISTORY_LIMIT: usize = 50;

/// Snapshot-based undo/redo history. The oldest entries fall off once a stack
/// reaches its limit.
#[derive(Debug, Clone)]
pub struct History<T> {
    past: VecDeque<T>,
    future: VecDeque<T>,
    limit: usize,
}

impl<T> Default for History<T> {
    fn default() -> Self {
        Self::with_limit(HISTORY_LIMIT)
    }
}

impl<T> History<T> {
    pub fn with_limit(limit: usize) -> Self {
        History {
            past: VecDeque::with_capacity(limit),
            future: VecDeque::new(),
            limit,
        }
    }

    /// Record the state as it was before a mutation. Clears the redo stack.
    pub fn record(&mut self, previous: T) {
        if self.past.len() == self.limit {
            self.past.pop_front();
        }
        self.past.push_back(previous);
        self.future.clear();
    }

    /// Step back: returns the state to restore, stashing `current` for redo.
    pub fn undo(&mut self, current: T) -> Option<T> {
        let previous = self.past.pop_back()?;
        self.future.push_front(current);
        self.future.truncate(self.limit);
        Some(previous)
    }

    /// Step forward: returns the state to restore, stashing `current` for undo.
    pub fn redo(&mut self, current: T) -> Option<T> {
        let next = self.future.pop_front()?;
        if self.past.len() == self.limit {
            self.past.pop_front();
        }
        self.past.push_back(current);
        Some(next)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn undo_depth(&self) -> usize {
        self.past.len()
    }

    pub fn redo_depth(&self) -> usize {
        self.future.len()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }
}
