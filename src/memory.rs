//! Bounded conversation memory.
//!
//! The completion worker owns the window and is its only writer. Assistant
//! replies reach it through an update channel that is drained before each
//! turn, so a reply finished (or cut short) by one turn is visible to the
//! next one in conversational order.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions sent ahead of the conversation; never stored in the window.
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub role: Role,
    pub content: String,
}

impl MemoryEntry {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// FIFO window of at most `capacity` entries.
#[derive(Debug, Clone)]
pub struct MemoryWindow {
    entries: VecDeque<MemoryEntry>,
    capacity: usize,
}

impl MemoryWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.saturating_add(1)),
            capacity,
        }
    }

    /// Appends an entry, evicting and returning the oldest one if over capacity.
    pub fn push(&mut self, entry: MemoryEntry) -> Option<MemoryEntry> {
        self.entries.push_back(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_front()
        } else {
            None
        }
    }

    /// Moves every pending update from `updates` into the window, oldest first.
    ///
    /// Returns the number of entries applied.
    pub fn drain_updates(&mut self, updates: &mut mpsc::Receiver<MemoryEntry>) -> usize {
        let mut applied = 0;
        loop {
            match updates.try_recv() {
                Ok(entry) => {
                    self.push(entry);
                    applied += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return applied,
            }
        }
    }

    /// Copies the window in conversational order.
    pub fn snapshot(&self) -> Vec<MemoryEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Creates the assistant-reply update channel for a window of `max_memory_length`.
///
/// Sized at twice the window so a full window of replies never blocks the sender.
pub fn update_channel(
    max_memory_length: usize,
) -> (mpsc::Sender<MemoryEntry>, mpsc::Receiver<MemoryEntry>) {
    mpsc::channel(max_memory_length.saturating_mul(2).max(1))
}
