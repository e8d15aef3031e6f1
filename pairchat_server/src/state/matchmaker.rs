//! Pairing waiting users into rooms

use super::InnerState;
use super::rooms::RoomId;
use crate::error::SignalingError;
use pairchat_protocol::{ServerEvent, UserId};
use tracing::{debug, info};

/// What a match attempt did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// A room was formed with `partner`; the caller is the initiator.
    Matched { room: RoomId, partner: UserId },
    /// Nobody eligible yet; the user stays queued.
    Waiting { waiting_count: usize },
    /// The user was not (or no longer) waiting.
    NotWaiting,
}

impl InnerState {
    /// Put a registered, unpaired user in the waiting queue and try to match
    /// it right away.
    pub(super) fn enqueue(&mut self, id: &UserId) -> Result<MatchOutcome, SignalingError> {
        self.registry.lookup(id)?;
        if self.rooms.room_of(id).is_some() {
            return Err(SignalingError::AlreadyPaired);
        }
        if self.queue.push(id.clone()) {
            debug!(user = %id, waiting = self.queue.len(), "queued for matching");
        }
        Ok(self.attempt_match(id))
    }

    /// Pair `id` with the earliest-waiting eligible user.
    ///
    /// Candidates that are no longer registered are pruned from the queue on
    /// the way. Blocked pairs are skipped.
    pub(super) fn attempt_match(&mut self, id: &UserId) -> MatchOutcome {
        if !self.registry.contains(id) || !self.queue.contains(id) {
            debug!(user = %id, "not waiting, skipping match");
            return MatchOutcome::NotWaiting;
        }

        let mut stale = Vec::new();
        let mut chosen = None;
        for other in self.queue.iter() {
            if other == id {
                continue;
            }
            if !self.registry.contains(other) {
                stale.push(other.clone());
                continue;
            }
            if self.blocklist.is_blocked(id, other) {
                debug!(user = %id, other = %other, "skipping blocked candidate");
                continue;
            }
            chosen = Some(other.clone());
            break;
        }
        for gone in &stale {
            self.queue.remove(gone);
        }

        let Some(partner) = chosen else {
            let waiting_count = self.queue.len();
            info!(user = %id, waiting_count, "no match yet");
            self.registry
                .notify(id, ServerEvent::WaitingForMatch { waiting_count });
            return MatchOutcome::Waiting { waiting_count };
        };

        self.queue.remove(id);
        self.queue.remove(&partner);
        let room = self.rooms.create(id.clone(), partner.clone());

        self.registry.notify(
            id,
            ServerEvent::MatchFound {
                peer_id: partner.clone(),
                initiator: true,
            },
        );
        self.registry.notify(
            &partner,
            ServerEvent::MatchFound {
                peer_id: id.clone(),
                initiator: false,
            },
        );
        info!(initiator = %id, partner = %partner, %room, "matched");

        MatchOutcome::Matched { room, partner }
    }
}
