//! Server state management for the signaling server
//!
//! This module owns the presence registry, blocklist, waiting queue and room
//! table. They are only reachable through [`ServerState`], which takes a
//! single lock for the whole of each logical operation, so a match (dequeue
//! both users, create the room, bind both members) or a teardown is never
//! observed half done.

mod blocklist;
mod matchmaker;
mod queue;
mod registry;
mod relay;
mod rooms;

pub use blocklist::Blocklist;
pub use matchmaker::MatchOutcome;
pub use queue::WaitingQueue;
pub use registry::{DEFAULT_DISPLAY_NAME, PeerSender, PresenceRegistry, Session};
pub use rooms::{Departure, Room, RoomId, RoomTable};

use crate::error::SignalingError;
use crate::moderation::{ContentFilter, Denylist, LogSink, ModerationRecord, ModerationSink};
use chrono::Utc;
use pairchat_protocol::{ChatMessage, NegotiationKind, NegotiationPayload, ServerEvent, UserId};
use parking_lot::Mutex;
use relay::BlockedChat;
use std::sync::Arc;
use tracing::{debug, info};

/// How a user left its room
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveKind {
    /// The connection went away. Only the leaver's slot is freed and the
    /// partner is told `peer-disconnected`.
    Implicit,
    /// The user ended the call. Both slots are freed, the partner is told
    /// `call-ended` and goes straight back into the waiting queue.
    Explicit,
}

/// Where a registered user currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Idle,
    Waiting,
    Paired,
}

#[derive(Debug, Default)]
struct InnerState {
    registry: PresenceRegistry,
    blocklist: Blocklist,
    queue: WaitingQueue,
    rooms: RoomTable,
}

impl InnerState {
    /// Free `id`'s room slot and notify the partner. No-op without a room.
    fn leave(&mut self, id: &UserId, kind: LeaveKind) -> Option<Departure> {
        let departure = self.rooms.remove_member(id)?;
        info!(user = %id, room = %departure.room, ?kind, "left room");

        if let Some(partner) = &departure.partner {
            let event = match kind {
                LeaveKind::Implicit => ServerEvent::PeerDisconnected,
                LeaveKind::Explicit => ServerEvent::CallEnded,
            };
            self.registry.notify(partner, event);

            if kind == LeaveKind::Explicit {
                self.rooms.remove_member(partner);
                if let Err(e) = self.enqueue(partner) {
                    debug!(user = %partner, error = %e, "partner not re-queued");
                }
            }
        }
        Some(departure)
    }

    fn user_state(&self, id: &UserId) -> Option<UserState> {
        if !self.registry.contains(id) {
            None
        } else if self.rooms.room_of(id).is_some() {
            Some(UserState::Paired)
        } else if self.queue.contains(id) {
            Some(UserState::Waiting)
        } else {
            Some(UserState::Idle)
        }
    }
}

/// Handle to the signaling state, cheap to clone and shared by every
/// connection task.
#[derive(Clone)]
pub struct ServerState {
    inner: Arc<Mutex<InnerState>>,
    filter: Arc<dyn ContentFilter>,
    sink: Arc<dyn ModerationSink>,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new(Arc::new(Denylist::builtin()), Arc::new(LogSink))
    }
}

impl ServerState {
    pub fn new(filter: Arc<dyn ContentFilter>, sink: Arc<dyn ModerationSink>) -> Self {
        Self {
            inner: Arc::default(),
            filter,
            sink,
        }
    }

    /// Register a user and queue it for matching
    pub fn join(
        &self,
        id: UserId,
        display_name: Option<String>,
        sender: PeerSender,
    ) -> Result<MatchOutcome, SignalingError> {
        let mut inner = self.inner.lock();
        let session = inner.registry.register(id.clone(), display_name, sender)?;
        info!(user = %id, display_name = %session.display_name, "user joined");
        inner.enqueue(&id)
    }

    /// Queue a registered, unpaired user and try to match it
    pub fn enqueue(&self, id: &UserId) -> Result<MatchOutcome, SignalingError> {
        self.inner.lock().enqueue(id)
    }

    /// End the current call, if any, and look for a new partner
    pub fn find_new_chat(&self, id: &UserId) -> Result<MatchOutcome, SignalingError> {
        let mut inner = self.inner.lock();
        inner.registry.lookup(id)?;
        inner.leave(id, LeaveKind::Explicit);
        inner.enqueue(id)
    }

    /// End the current call without looking for a new partner
    pub fn end_call(&self, id: &UserId) -> Option<Departure> {
        self.leave(id, LeaveKind::Explicit)
    }

    /// Leave the current room. Safe to call in any state, any number of times.
    pub fn leave(&self, id: &UserId, kind: LeaveKind) -> Option<Departure> {
        self.inner.lock().leave(id, kind)
    }

    /// Full teardown for a closed connection. Returns whether the user was
    /// registered.
    pub fn disconnect(&self, id: &UserId) -> bool {
        let mut inner = self.inner.lock();
        inner.queue.remove(id);
        inner.leave(id, LeaveKind::Implicit);
        let Some(session) = inner.registry.unregister(id) else {
            return false;
        };
        let online_secs = (Utc::now() - session.joined_at).num_seconds();
        info!(user = %id, online_secs, online = inner.registry.len(), "user disconnected");
        true
    }

    /// Forward a negotiation envelope
    pub fn relay(
        &self,
        sender: &UserId,
        target: &UserId,
        kind: NegotiationKind,
        payload: NegotiationPayload,
    ) -> Result<(), SignalingError> {
        self.inner
            .lock()
            .relay_negotiation(sender, target, kind, payload)
    }

    /// Forward a chat message to the sender's roommate, unless filtered
    pub fn chat(
        &self,
        sender: &UserId,
        target: &UserId,
        message: ChatMessage,
    ) -> Result<(), SignalingError> {
        let verdict = self
            .inner
            .lock()
            .relay_chat(sender, target, &message, self.filter.as_ref());

        match verdict {
            Ok(()) => Ok(()),
            Err(BlockedChat::Filtered(reason)) => {
                self.sink.record(ModerationRecord::blocked_message(
                    sender.clone(),
                    reason,
                    &message.content,
                ));
                Err(SignalingError::ContentFiltered)
            }
            Err(blocked) => Err(blocked.into()),
        }
    }

    /// Record a report and acknowledge it. Never fails for the reporter.
    pub fn report(&self, reporter: &UserId, reported: &UserId, reason: String, details: &str) {
        info!(%reporter, %reported, %reason, "user reported");
        self.sink.record(ModerationRecord::user_report(
            reporter.clone(),
            reported.clone(),
            reason,
            details,
        ));
        self.inner
            .lock()
            .registry
            .notify(reporter, ServerEvent::ReportReceived);
    }

    /// Block a pair of users in both directions and acknowledge it.
    ///
    /// The current room, if any, is left alone.
    pub fn block(&self, id: &UserId, other: &UserId) {
        let mut inner = self.inner.lock();
        inner.blocklist.block(id, other);
        info!(user = %id, blocked = %other, "user blocked");
        inner.registry.notify(id, ServerEvent::UserBlocked);
    }

    pub fn unblock(&self, id: &UserId, other: &UserId) {
        self.inner.lock().blocklist.unblock(id, other);
    }

    pub fn is_blocked(&self, a: &UserId, b: &UserId) -> bool {
        self.inner.lock().blocklist.is_blocked(a, b)
    }

    /// Send the human-readable waiting line to `id`
    pub fn waiting_status(&self, id: &UserId) {
        let inner = self.inner.lock();
        let waiting_count = inner.queue.len();
        inner.registry.notify(
            id,
            ServerEvent::WaitingStatus {
                message: format!("Waiting for a partner... ({waiting_count} users online)"),
                waiting_count,
            },
        );
    }

    pub fn find_partner(&self, id: &UserId) -> Result<UserId, SignalingError> {
        self.inner.lock().rooms.find_partner(id).cloned()
    }

    /// `None` if the user is not registered
    pub fn user_state(&self, id: &UserId) -> Option<UserState> {
        self.inner.lock().user_state(id)
    }

    pub fn online_count(&self) -> usize {
        self.inner.lock().registry.len()
    }

    pub fn waiting_count(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn room_count(&self) -> usize {
        self.inner.lock().rooms.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pairchat_protocol::BlockReason;
    use tokio::sync::mpsc;

    #[derive(Default, Clone)]
    pub(crate) struct MemorySink(Arc<Mutex<Vec<ModerationRecord>>>);

    impl MemorySink {
        pub(crate) fn records(&self) -> Vec<ModerationRecord> {
            self.0.lock().clone()
        }
    }

    impl ModerationSink for MemorySink {
        fn record(&self, record: ModerationRecord) {
            self.0.lock().push(record);
        }
    }

    pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    pub(crate) fn connect(state: &ServerState, id: &str) -> mpsc::UnboundedReceiver<ServerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.join(UserId::from(id), None, tx).unwrap();
        rx
    }

    fn id(s: &str) -> UserId {
        UserId::from(s)
    }

    fn state_with_sink() -> (ServerState, MemorySink) {
        let sink = MemorySink::default();
        let state = ServerState::new(Arc::new(Denylist::builtin()), Arc::new(sink.clone()));
        (state, sink)
    }

    fn paired(state: &ServerState) -> (
        mpsc::UnboundedReceiver<ServerEvent>,
        mpsc::UnboundedReceiver<ServerEvent>,
    ) {
        let mut u1 = connect(state, "u1");
        let mut u2 = connect(state, "u2");
        drain(&mut u1);
        drain(&mut u2);
        assert_eq!(state.find_partner(&id("u1")).unwrap(), id("u2"));
        (u1, u2)
    }

    fn assert_invariants(state: &ServerState) {
        let inner = state.inner.lock();
        for (user, room_id) in inner.rooms.members() {
            assert!(
                !inner.queue.contains(user),
                "{user} is both waiting and in a room"
            );
            let room = inner.rooms.get(room_id).expect("entry points at a live room");
            assert!(room.members.contains(user));
        }
        for room in inner.rooms.rooms() {
            let [a, b] = &room.members;
            assert_ne!(a, b);
            let holders = room
                .members
                .iter()
                .filter(|member| inner.rooms.room_of(member) == Some(room.id))
                .count();
            assert!(holders >= 1, "room {} outlived both members", room.id);
            if holders == 2 {
                assert_eq!(inner.rooms.find_partner(a).unwrap(), b);
                assert_eq!(inner.rooms.find_partner(b).unwrap(), a);
            }
            assert!(
                !inner.blocklist.is_blocked(a, b),
                "blocked pair {a}/{b} shares a room"
            );
        }
    }

    #[test]
    fn two_joins_form_one_room() {
        let state = ServerState::default();
        let mut u1 = connect(&state, "u1");
        assert_eq!(
            drain(&mut u1),
            [ServerEvent::WaitingForMatch { waiting_count: 1 }]
        );

        let (tx, mut u2) = mpsc::unbounded_channel();
        let outcome = state.join(id("u2"), Some("Bo".into()), tx).unwrap();
        let MatchOutcome::Matched { room, partner } = outcome else {
            panic!("expected a match, got {outcome:?}");
        };
        assert_eq!(partner, id("u1"));

        // The user whose enqueue completed the match initiates
        assert_eq!(
            drain(&mut u2),
            [ServerEvent::MatchFound {
                peer_id: id("u1"),
                initiator: true
            }]
        );
        assert_eq!(
            drain(&mut u1),
            [ServerEvent::MatchFound {
                peer_id: id("u2"),
                initiator: false
            }]
        );

        let inner = state.inner.lock();
        assert_eq!(inner.rooms.room_of(&id("u1")), Some(room));
        assert_eq!(inner.rooms.room_of(&id("u2")), Some(room));
        assert!(inner.queue.is_empty());
    }

    #[test]
    fn match_found_initiator_is_the_caller_of_enqueue() {
        let state = ServerState::default();
        let (tx1, mut u1) = mpsc::unbounded_channel();
        let (tx2, mut u2) = mpsc::unbounded_channel();
        {
            let mut inner = state.inner.lock();
            inner.registry.register(id("u1"), None, tx1).unwrap();
            inner.registry.register(id("u2"), None, tx2).unwrap();
            inner.queue.push(id("u2"));
        }

        state.enqueue(&id("u1")).unwrap();
        assert_eq!(
            drain(&mut u1),
            [ServerEvent::MatchFound {
                peer_id: id("u2"),
                initiator: true
            }]
        );
        assert_eq!(
            drain(&mut u2),
            [ServerEvent::MatchFound {
                peer_id: id("u1"),
                initiator: false
            }]
        );
        assert_invariants(&state);
    }

    #[test]
    fn blocked_users_keep_waiting() {
        let state = ServerState::default();
        state.block(&id("u1"), &id("u2"));

        let mut u2 = connect(&state, "u2");
        let mut u1 = connect(&state, "u1");

        assert_eq!(
            drain(&mut u2),
            [ServerEvent::WaitingForMatch { waiting_count: 1 }]
        );
        assert_eq!(
            drain(&mut u1),
            [ServerEvent::WaitingForMatch { waiting_count: 2 }]
        );
        assert_eq!(state.user_state(&id("u1")), Some(UserState::Waiting));
        assert_eq!(state.user_state(&id("u2")), Some(UserState::Waiting));
        assert_eq!(state.room_count(), 0);

        // A third user pairs with the earliest waiter
        let mut u3 = connect(&state, "u3");
        assert_eq!(
            drain(&mut u3),
            [ServerEvent::MatchFound {
                peer_id: id("u2"),
                initiator: true
            }]
        );
        assert_eq!(state.user_state(&id("u1")), Some(UserState::Waiting));
        assert_invariants(&state);
    }

    #[test]
    fn filtered_chat_is_not_relayed() {
        let (state, sink) = state_with_sink();
        let (mut u1, mut u2) = paired(&state);

        let result = state.chat(
            &id("u1"),
            &id("u2"),
            ChatMessage::new("this contains inappropriate1 text", 1_700_000_000_000),
        );
        assert_eq!(result, Err(SignalingError::ContentFiltered));
        assert_eq!(
            drain(&mut u1),
            [ServerEvent::MessageBlocked {
                reason: BlockReason::InappropriateContent
            }]
        );
        assert!(drain(&mut u2).is_empty());

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].actor, id("u1"));
        assert_eq!(
            records[0].excerpt.as_deref(),
            Some("this contains inappropriate1 text")
        );
    }

    #[test]
    fn clean_chat_is_relayed_unmodified() {
        let (state, sink) = state_with_sink();
        let (mut u1, mut u2) = paired(&state);

        let message = ChatMessage::new("hello", 42);
        state.chat(&id("u1"), &id("u2"), message.clone()).unwrap();
        assert_eq!(
            drain(&mut u2),
            [ServerEvent::ChatMessage {
                from: id("u1"),
                message
            }]
        );
        assert!(drain(&mut u1).is_empty());
        assert!(sink.records().is_empty());
    }

    #[test]
    fn chat_outside_room_is_dropped() {
        let state = ServerState::default();
        let (_u1, mut u2) = paired(&state);
        let mut u3 = connect(&state, "u3");
        drain(&mut u3);

        let result = state.chat(&id("u3"), &id("u2"), ChatMessage::new("hi", 1));
        assert_eq!(result, Err(SignalingError::NotInSameRoom));
        assert!(drain(&mut u2).is_empty());

        let result = state.chat(&id("u1"), &id("u1"), ChatMessage::new("me", 1));
        assert_eq!(result, Err(SignalingError::NotInSameRoom));
    }

    #[test]
    fn chat_between_blocked_roommates_is_dropped() {
        let state = ServerState::default();
        let (mut u1, mut u2) = paired(&state);

        state.block(&id("u2"), &id("u1"));
        assert_eq!(drain(&mut u2), [ServerEvent::UserBlocked]);
        // Blocking does not tear the room down
        assert_eq!(state.find_partner(&id("u1")).unwrap(), id("u2"));

        let result = state.chat(&id("u1"), &id("u2"), ChatMessage::new("hi", 1));
        assert_eq!(result, Err(SignalingError::Blocked));
        assert!(drain(&mut u2).is_empty());
        assert!(drain(&mut u1).is_empty());
    }

    #[test]
    fn negotiation_relay_is_addressed_explicitly() {
        let state = ServerState::default();
        let (mut u1, mut u2) = paired(&state);
        let payload = NegotiationPayload(serde_json::json!({"type": "offer", "sdp": "v=0"}));

        state
            .relay(&id("u1"), &id("u2"), NegotiationKind::Offer, payload.clone())
            .unwrap();
        assert_eq!(
            drain(&mut u2),
            [ServerEvent::Offer {
                from: id("u1"),
                payload
            }]
        );

        let result = state.relay(
            &id("u1"),
            &id("nobody"),
            NegotiationKind::IceCandidate,
            NegotiationPayload(serde_json::Value::Null),
        );
        assert_eq!(result, Err(SignalingError::TargetUnreachable));
        assert!(drain(&mut u1).is_empty());
    }

    #[test]
    fn negotiation_between_blocked_roommates_is_dropped() {
        let state = ServerState::default();
        let (mut u1, mut u2) = paired(&state);

        state.block(&id("u1"), &id("u2"));
        assert_eq!(drain(&mut u1), [ServerEvent::UserBlocked]);

        for (from, to) in [("u1", "u2"), ("u2", "u1")] {
            let result = state.relay(
                &id(from),
                &id(to),
                NegotiationKind::Offer,
                NegotiationPayload(serde_json::json!({"sdp": "v=0"})),
            );
            assert_eq!(result, Err(SignalingError::Blocked));
        }
        assert!(drain(&mut u1).is_empty());
        assert!(drain(&mut u2).is_empty());
        assert_eq!(state.find_partner(&id("u2")).unwrap(), id("u1"));
    }

    #[test]
    fn requeue_keeps_position_and_retries_match() {
        let state = ServerState::default();
        state.block(&id("u1"), &id("u2"));
        let mut u1 = connect(&state, "u1");
        let mut u2 = connect(&state, "u2");
        drain(&mut u1);
        drain(&mut u2);

        // find-new-chat from a waiting user just enqueues again
        for _ in 0..2 {
            let outcome = state.find_new_chat(&id("u1")).unwrap();
            assert_eq!(outcome, MatchOutcome::Waiting { waiting_count: 2 });
        }
        assert_eq!(
            drain(&mut u1),
            [
                ServerEvent::WaitingForMatch { waiting_count: 2 },
                ServerEvent::WaitingForMatch { waiting_count: 2 },
            ]
        );
        assert!(drain(&mut u2).is_empty());
        {
            let inner = state.inner.lock();
            let order: Vec<_> = inner.queue.iter().cloned().collect();
            assert_eq!(order, [id("u1"), id("u2")]);
        }

        // u1 is still first in line
        let mut u3 = connect(&state, "u3");
        assert_eq!(
            drain(&mut u3),
            [ServerEvent::MatchFound {
                peer_id: id("u1"),
                initiator: true
            }]
        );
        assert_eq!(state.user_state(&id("u2")), Some(UserState::Waiting));
        assert_invariants(&state);
    }

    #[test]
    fn find_new_chat_from_idle_user_enqueues() {
        let state = ServerState::default();
        let (_u1, mut u2) = paired(&state);
        state.end_call(&id("u1"));
        drain(&mut u2);
        assert_eq!(state.user_state(&id("u1")), Some(UserState::Idle));

        let outcome = state.find_new_chat(&id("u1")).unwrap();
        assert!(matches!(outcome, MatchOutcome::Matched { ref partner, .. } if *partner == id("u2")));
        // No call was active, so nobody is told one ended
        assert_eq!(
            drain(&mut u2),
            [ServerEvent::MatchFound {
                peer_id: id("u1"),
                initiator: false
            }]
        );
        assert_invariants(&state);
    }

    #[test]
    fn find_new_chat_requires_registration() {
        let state = ServerState::default();
        assert_eq!(
            state.find_new_chat(&id("ghost")),
            Err(SignalingError::NotRegistered)
        );
        assert_eq!(state.waiting_count(), 0);
    }

    #[test]
    fn disconnect_notifies_partner_without_requeue() {
        let state = ServerState::default();
        let (_u1, mut u2) = paired(&state);

        assert!(state.disconnect(&id("u1")));
        assert_eq!(drain(&mut u2), [ServerEvent::PeerDisconnected]);
        assert_eq!(state.user_state(&id("u1")), None);
        assert_ne!(state.user_state(&id("u2")), Some(UserState::Waiting));
        assert_eq!(state.waiting_count(), 0);
        assert!(state.find_partner(&id("u2")).is_err());

        // The leftover slot is freed when u2 moves on, with nobody to notify
        let outcome = state.find_new_chat(&id("u2")).unwrap();
        assert_eq!(outcome, MatchOutcome::Waiting { waiting_count: 1 });
        assert_eq!(
            drain(&mut u2),
            [ServerEvent::WaitingForMatch { waiting_count: 1 }]
        );
        assert_eq!(state.room_count(), 0);
        assert_invariants(&state);
    }

    #[test]
    fn find_new_chat_requeues_both_sides() {
        let state = ServerState::default();
        let (mut u1, mut u2) = paired(&state);

        let outcome = state.find_new_chat(&id("u1")).unwrap();
        assert!(matches!(outcome, MatchOutcome::Matched { ref partner, .. } if *partner == id("u2")));

        assert_eq!(
            drain(&mut u2),
            [
                ServerEvent::CallEnded,
                ServerEvent::WaitingForMatch { waiting_count: 1 },
                ServerEvent::MatchFound {
                    peer_id: id("u1"),
                    initiator: false
                },
            ]
        );
        assert_eq!(
            drain(&mut u1),
            [ServerEvent::MatchFound {
                peer_id: id("u2"),
                initiator: true
            }]
        );
        assert_invariants(&state);
    }

    #[test]
    fn find_new_chat_partner_takes_earliest_waiter() {
        let state = ServerState::default();
        let (mut u1, mut u2) = paired(&state);
        let mut u3 = connect(&state, "u3");
        drain(&mut u3);

        state.find_new_chat(&id("u1")).unwrap();

        assert_eq!(
            drain(&mut u2),
            [
                ServerEvent::CallEnded,
                ServerEvent::MatchFound {
                    peer_id: id("u3"),
                    initiator: true
                },
            ]
        );
        assert_eq!(
            drain(&mut u3),
            [ServerEvent::MatchFound {
                peer_id: id("u2"),
                initiator: false
            }]
        );
        assert_eq!(
            drain(&mut u1),
            [ServerEvent::WaitingForMatch { waiting_count: 1 }]
        );
        assert_eq!(state.user_state(&id("u1")), Some(UserState::Waiting));
        assert_invariants(&state);
    }

    #[test]
    fn end_call_leaves_caller_idle() {
        let state = ServerState::default();
        let (mut u1, mut u2) = paired(&state);

        let departure = state.end_call(&id("u1")).unwrap();
        assert_eq!(departure.partner, Some(id("u2")));
        assert_eq!(state.user_state(&id("u1")), Some(UserState::Idle));
        assert_eq!(state.user_state(&id("u2")), Some(UserState::Waiting));
        assert_eq!(
            drain(&mut u2),
            [
                ServerEvent::CallEnded,
                ServerEvent::WaitingForMatch { waiting_count: 1 },
            ]
        );
        assert!(drain(&mut u1).is_empty());
    }

    #[test]
    fn teardown_is_idempotent() {
        let state = ServerState::default();
        let (_u1, mut u2) = paired(&state);

        assert!(state.leave(&id("u1"), LeaveKind::Implicit).is_some());
        assert!(state.leave(&id("u1"), LeaveKind::Implicit).is_none());
        assert!(state.leave(&id("u1"), LeaveKind::Explicit).is_none());
        assert!(state.disconnect(&id("u1")));
        assert!(!state.disconnect(&id("u1")));

        assert_eq!(drain(&mut u2), [ServerEvent::PeerDisconnected]);
    }

    #[test]
    fn disconnect_is_total_over_states() {
        let state = ServerState::default();

        // Idle
        let (tx, _idle) = mpsc::unbounded_channel();
        state.inner.lock().registry.register(id("idle"), None, tx).unwrap();
        assert_eq!(state.user_state(&id("idle")), Some(UserState::Idle));
        assert!(state.disconnect(&id("idle")));

        // Waiting
        let _w = connect(&state, "waiting");
        assert!(state.disconnect(&id("waiting")));
        assert_eq!(state.waiting_count(), 0);

        // Never registered
        assert!(!state.disconnect(&id("ghost")));
        assert_eq!(state.online_count(), 0);
    }

    #[test]
    fn duplicate_join_is_rejected() {
        let state = ServerState::default();
        let _u1 = connect(&state, "u1");
        let (tx, mut rx) = mpsc::unbounded_channel();
        assert_eq!(
            state.join(id("u1"), None, tx),
            Err(SignalingError::DuplicateId)
        );
        assert!(drain(&mut rx).is_empty());
        assert_eq!(state.waiting_count(), 1);
    }

    #[test]
    fn report_is_recorded_and_acknowledged() {
        let (state, sink) = state_with_sink();
        let (mut u1, _u2) = paired(&state);

        state.report(&id("u1"), &id("u2"), "harassment".into(), "was rude");
        assert_eq!(drain(&mut u1), [ServerEvent::ReportReceived]);
        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].subject, Some(id("u2")));
        assert_eq!(records[0].reason.as_deref(), Some("harassment"));
        // Reporting does not end the call
        assert_eq!(state.find_partner(&id("u1")).unwrap(), id("u2"));
    }

    #[test]
    fn waiting_status_reports_queue_size() {
        let state = ServerState::default();
        let mut u1 = connect(&state, "u1");
        drain(&mut u1);

        state.waiting_status(&id("u1"));
        assert_eq!(
            drain(&mut u1),
            [ServerEvent::WaitingStatus {
                message: "Waiting for a partner... (1 users online)".into(),
                waiting_count: 1
            }]
        );
    }

    #[test]
    fn invariants_hold_across_churn() {
        let state = ServerState::default();
        let users: Vec<UserId> = (0..8).map(|n| id(&format!("u{n}"))).collect();
        state.block(&users[0], &users[1]);
        state.block(&users[2], &users[3]);
        state.block(&users[0], &users[3]);

        let mut receivers = Vec::new();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let user = &users[(seed % users.len() as u64) as usize];
            match (seed >> 8) % 5 {
                0 => {
                    let (tx, rx) = mpsc::unbounded_channel();
                    if state.join(user.clone(), None, tx).is_ok() {
                        receivers.push(rx);
                    }
                }
                1 => {
                    state.disconnect(user);
                }
                2 => {
                    let _ = state.find_new_chat(user);
                }
                3 => {
                    state.end_call(user);
                }
                _ => {
                    state.leave(user, LeaveKind::Implicit);
                }
            }
            assert_invariants(&state);
        }
        for (a, b) in [(0, 1), (2, 3), (0, 3)] {
            assert!(state.is_blocked(&users[a], &users[b]));
            assert!(state.is_blocked(&users[b], &users[a]));
        }
        assert!(!state.is_blocked(&users[1], &users[2]));
    }
}
