//! Forwarding negotiation envelopes and chat between room members

use super::InnerState;
use crate::error::SignalingError;
use crate::moderation::ContentFilter;
use pairchat_protocol::{
    BlockReason, ChatMessage, NegotiationKind, NegotiationPayload, ServerEvent, UserId,
};
use tracing::{debug, warn};

impl InnerState {
    /// Forward a negotiation envelope to `target`.
    ///
    /// Envelopes are addressed explicitly and do not require a shared room;
    /// an unreachable target just drops the envelope.
    pub(super) fn relay_negotiation(
        &self,
        sender: &UserId,
        target: &UserId,
        kind: NegotiationKind,
        payload: NegotiationPayload,
    ) -> Result<(), SignalingError> {
        if self.blocklist.is_blocked(sender, target) {
            debug!(%sender, %target, %kind, "dropping envelope between blocked users");
            return Err(SignalingError::Blocked);
        }
        let Ok(session) = self.registry.lookup(target) else {
            warn!(%sender, %target, %kind, "target not found for envelope");
            return Err(SignalingError::TargetUnreachable);
        };
        debug!(%sender, %target, %kind, "forwarding envelope");
        session.send(ServerEvent::negotiation(kind, sender.clone(), payload));
        Ok(())
    }

    /// Forward a chat message to the sender's roommate.
    ///
    /// Returns the filter verdict as `Err(ContentFiltered)`; the sender has
    /// already been told with `message-blocked` at that point.
    pub(super) fn relay_chat(
        &self,
        sender: &UserId,
        target: &UserId,
        message: &ChatMessage,
        filter: &dyn ContentFilter,
    ) -> Result<(), BlockedChat> {
        if !self.rooms.share_room(sender, target) {
            debug!(%sender, %target, "dropping chat outside a shared room");
            return Err(BlockedChat::Dropped(SignalingError::NotInSameRoom));
        }
        if self.blocklist.is_blocked(sender, target) {
            debug!(%sender, %target, "dropping chat between blocked users");
            return Err(BlockedChat::Dropped(SignalingError::Blocked));
        }
        let Ok(session) = self.registry.lookup(target) else {
            return Err(BlockedChat::Dropped(SignalingError::TargetUnreachable));
        };

        if let Some(reason) = filter.check(&message.content) {
            warn!(%sender, %target, %reason, "chat message blocked by content filter");
            self.registry
                .notify(sender, ServerEvent::MessageBlocked { reason });
            return Err(BlockedChat::Filtered(reason));
        }

        session.send(ServerEvent::ChatMessage {
            from: sender.clone(),
            message: message.clone(),
        });
        Ok(())
    }
}

/// Why a chat message was not delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum BlockedChat {
    /// Routing failed; nobody is told.
    Dropped(SignalingError),
    /// The content filter rejected it.
    Filtered(BlockReason),
}

impl From<BlockedChat> for SignalingError {
    fn from(blocked: BlockedChat) -> Self {
        match blocked {
            BlockedChat::Dropped(e) => e,
            BlockedChat::Filtered(_) => SignalingError::ContentFiltered,
        }
    }
}
