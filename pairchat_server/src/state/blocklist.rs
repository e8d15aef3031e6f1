//! Symmetric block relation between users

use pairchat_protocol::UserId;
use std::collections::HashSet;

/// Every block is stored as two directed entries, so lookups are a single
/// hash probe in either direction.
#[derive(Debug, Default)]
pub struct Blocklist {
    entries: HashSet<(UserId, UserId)>,
}

impl Blocklist {
    /// Block the pair in both directions. Idempotent.
    pub fn block(&mut self, a: &UserId, b: &UserId) {
        self.entries.insert((a.clone(), b.clone()));
        self.entries.insert((b.clone(), a.clone()));
    }

    /// Remove the pair in both directions. No-op if absent.
    pub fn unblock(&mut self, a: &UserId, b: &UserId) {
        self.entries.remove(&(a.clone(), b.clone()));
        self.entries.remove(&(b.clone(), a.clone()));
    }

    pub fn is_blocked(&self, a: &UserId, b: &UserId) -> bool {
        self.entries.contains(&(a.clone(), b.clone()))
    }

    /// Number of blocked pairs
    pub fn len(&self) -> usize {
        let self_blocks = self.entries.iter().filter(|(a, b)| a == b).count();
        (self.entries.len() - self_blocks) / 2 + self_blocks
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
