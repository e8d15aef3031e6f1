//! Room table: which pair of users shares a room

use crate::error::SignalingError;
use chrono::{DateTime, Utc};
use pairchat_protocol::UserId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Room identifier, fresh for every pairing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoomId(pub uuid::Uuid);

impl RoomId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "room_{}", self.0.simple())
    }
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub members: [UserId; 2],
    pub created_at: DateTime<Utc>,
}

impl Room {
    /// The member that is not `id`
    pub fn other(&self, id: &UserId) -> Option<&UserId> {
        match &self.members {
            [a, b] if a == id => Some(b),
            [a, b] if b == id => Some(a),
            _ => None,
        }
    }
}

/// Result of removing one member's entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    pub room: RoomId,
    /// The other member, if it still holds its entry in the room
    pub partner: Option<UserId>,
}

#[derive(Debug, Default)]
pub struct RoomTable {
    rooms: HashMap<RoomId, Room>,
    membership: HashMap<UserId, RoomId>,
}

impl RoomTable {
    /// Create a room and bind both members to it.
    ///
    /// Callers take both users out of the waiting queue first; neither may
    /// already hold a room entry.
    pub fn create(&mut self, a: UserId, b: UserId) -> RoomId {
        debug_assert_ne!(a, b, "a user cannot share a room with itself");
        debug_assert!(!self.membership.contains_key(&a));
        debug_assert!(!self.membership.contains_key(&b));

        let id = RoomId::new();
        self.membership.insert(a.clone(), id);
        self.membership.insert(b.clone(), id);
        self.rooms.insert(
            id,
            Room {
                id,
                members: [a, b],
                created_at: Utc::now(),
            },
        );
        id
    }

    pub fn room_of(&self, id: &UserId) -> Option<RoomId> {
        self.membership.get(id).copied()
    }

    pub fn get(&self, room: &RoomId) -> Option<&Room> {
        self.rooms.get(room)
    }

    /// The other member of `id`'s room.
    ///
    /// Only answers while the partner still holds its own entry, so a
    /// partner that already left is never reported.
    pub fn find_partner(&self, id: &UserId) -> Result<&UserId, SignalingError> {
        let room_id = self.membership.get(id).ok_or(SignalingError::NotInRoom)?;
        self.rooms
            .get(room_id)
            .and_then(|room| room.other(id))
            .filter(|other| self.membership.get(*other) == Some(room_id))
            .ok_or(SignalingError::NotInRoom)
    }

    /// Both users hold an entry for the same room
    pub fn share_room(&self, a: &UserId, b: &UserId) -> bool {
        a != b
            && matches!(
                (self.membership.get(a), self.membership.get(b)),
                (Some(x), Some(y)) if x == y
            )
    }

    /// Remove one member's entry. The room itself is dropped once neither
    /// member holds an entry for it.
    pub fn remove_member(&mut self, id: &UserId) -> Option<Departure> {
        let room_id = self.membership.remove(id)?;
        let partner = self
            .rooms
            .get(&room_id)
            .and_then(|room| room.other(id))
            .filter(|other| self.membership.get(*other) == Some(&room_id))
            .cloned();

        if partner.is_none() {
            self.rooms.remove(&room_id);
        }

        Some(Departure {
            room: room_id,
            partner,
        })
    }

    /// Number of live rooms
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn rooms(&self) -> impl Iterator<Item = &Room> {
        self.rooms.values()
    }

    pub fn members(&self) -> impl Iterator<Item = (&UserId, &RoomId)> {
        self.membership.iter()
    }
}
