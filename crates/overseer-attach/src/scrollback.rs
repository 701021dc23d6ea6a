//! Bounded console history.

use std::collections::VecDeque;

use overseer_events::Console;

/// Fixed-capacity FIFO of console lines. The oldest line is evicted first.
#[derive(Debug, Clone)]
pub struct Scrollback {
    lines: VecDeque<Console>,
    capacity: usize,
}

impl Scrollback {
    /// Create a buffer holding at most `capacity` lines (minimum one).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a line, evicting the oldest if full.
    pub fn push(&mut self, line: Console) {
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// Copy of the buffer, oldest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Console> {
        self.lines.iter().cloned().collect()
    }

    /// Lines held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether nothing is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Maximum lines held.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
