//! Presence registry: which users are online and how to reach them

use crate::error::SignalingError;
use chrono::{DateTime, Utc};
use pairchat_protocol::{ServerEvent, UserId};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::debug;

/// Display name used when a client does not send one
pub const DEFAULT_DISPLAY_NAME: &str = "Anonymous";

/// Connection handle: pushes events to one client's writer task
pub type PeerSender = mpsc::UnboundedSender<ServerEvent>;

/// A registered user
#[derive(Debug, Clone)]
pub struct Session {
    pub display_name: String,
    pub joined_at: DateTime<Utc>,
    sender: PeerSender,
}

impl Session {
    fn new(display_name: Option<String>, sender: PeerSender) -> Self {
        let display_name = display_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string());
        Self {
            display_name,
            joined_at: Utc::now(),
            sender,
        }
    }

    /// Push an event to the client. Returns false if the connection is gone.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.sender.send(event).is_ok()
    }
}

/// Maps user ids to their live connection.
///
/// A second registration for a live id is rejected rather than replacing the
/// first connection.
#[derive(Debug, Default)]
pub struct PresenceRegistry {
    sessions: HashMap<UserId, Session>,
}

impl PresenceRegistry {
    pub fn register(
        &mut self,
        id: UserId,
        display_name: Option<String>,
        sender: PeerSender,
    ) -> Result<&Session, SignalingError> {
        use std::collections::hash_map::Entry;

        match self.sessions.entry(id) {
            Entry::Occupied(_) => Err(SignalingError::DuplicateId),
            Entry::Vacant(slot) => Ok(slot.insert(Session::new(display_name, sender))),
        }
    }

    /// Remove a user. No-op if absent.
    pub fn unregister(&mut self, id: &UserId) -> Option<Session> {
        self.sessions.remove(id)
    }

    pub fn lookup(&self, id: &UserId) -> Result<&Session, SignalingError> {
        self.sessions.get(id).ok_or(SignalingError::NotRegistered)
    }

    pub fn contains(&self, id: &UserId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Deliver an event to a registered user, if reachable
    pub fn notify(&self, id: &UserId, event: ServerEvent) -> bool {
        match self.sessions.get(id) {
            Some(session) => {
                let delivered = session.send(event);
                if !delivered {
                    debug!(user = %id, "connection closed before delivery");
                }
                delivered
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
