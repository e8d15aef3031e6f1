//! Waiting queue
//!
//! Users are matched in the order they started waiting. A `VecDeque` keeps
//! that order and a set keeps membership checks constant time.

use pairchat_protocol::UserId;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Default)]
pub struct WaitingQueue {
    order: VecDeque<UserId>,
    members: HashSet<UserId>,
}

impl WaitingQueue {
    /// Append a user. Returns false if it was already waiting, in which case
    /// it keeps its original position.
    pub fn push(&mut self, id: UserId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        true
    }

    /// Returns true if the user was waiting
    pub fn remove(&mut self, id: &UserId) -> bool {
        if !self.members.remove(id) {
            return false;
        }
        self.order.retain(|queued| queued != id);
        true
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.members.contains(id)
    }

    /// Waiting users, earliest first
    pub fn iter(&self) -> impl Iterator<Item = &UserId> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
