//! Wire events for the pairchat signaling server
//!
//! Every frame is a single JSON object tagged by its `event` field, the
//! remaining fields sit inline next to the tag.
//!
//! ## Client → server
//!
//! - `{"event":"join","id":"<user>","displayName":"<name>"}`
//! - `{"event":"find-new-chat"}` / `{"event":"end-call"}`
//! - `{"event":"offer","to":"<user>","payload":...}` (also `answer`, `ice-candidate`)
//! - `{"event":"chat-message","to":"<user>","message":{"content":"...","timestamp":0}}`
//! - `{"event":"report-user","userId":"<user>","reason":"...","details":"..."}`
//! - `{"event":"block-user","userId":"<user>"}`
//!
//! ## Server → client
//!
//! - `{"event":"match-found","peerId":"<user>","initiator":true}`
//! - `{"event":"waiting-for-match","waitingCount":1}`
//! - `{"event":"peer-disconnected"}` / `{"event":"call-ended"}`
//! - `{"event":"offer","from":"<user>","payload":...}` (also `answer`, `ice-candidate`)
//! - `{"event":"chat-message","from":"<user>","message":{...}}`
//! - `{"event":"message-blocked","reason":"inappropriate-content"}`
//! - `{"event":"error","reason":"<reason>"}`

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque, caller-chosen user identifier
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// The three kinds of connection-negotiation envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NegotiationKind {
    Offer,
    Answer,
    IceCandidate,
}

impl fmt::Display for NegotiationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NegotiationKind::Offer => write!(f, "offer"),
            NegotiationKind::Answer => write!(f, "answer"),
            NegotiationKind::IceCandidate => write!(f, "ice-candidate"),
        }
    }
}

/// Negotiation payload. The server routes it but never looks inside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NegotiationPayload(pub serde_json::Value);

/// A chat message as written by the sending client.
///
/// Fields the server does not know about are kept in `extra` so the message
/// reaches the partner exactly as it was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub content: String,
    /// Sender's clock, usually milliseconds since the Unix epoch. Passed
    /// through as sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<serde_json::Value>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ChatMessage {
    pub fn new(content: impl Into<String>, timestamp: i64) -> Self {
        Self {
            content: content.into(),
            timestamp: Some(timestamp.into()),
            extra: serde_json::Map::new(),
        }
    }
}

/// Requests sent from a client to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientRequest {
    Join {
        #[serde(alias = "userId")]
        id: UserId,
        #[serde(rename = "displayName", default, skip_serializing_if = "Option::is_none")]
        display_name: Option<String>,
    },
    FindNewChat,
    EndCall,
    WaitingForMatch,
    Offer {
        to: UserId,
        payload: NegotiationPayload,
    },
    Answer {
        to: UserId,
        payload: NegotiationPayload,
    },
    IceCandidate {
        to: UserId,
        payload: NegotiationPayload,
    },
    ChatMessage {
        to: UserId,
        message: ChatMessage,
    },
    ReportUser {
        #[serde(rename = "userId")]
        user_id: UserId,
        reason: String,
        #[serde(default)]
        details: String,
    },
    BlockUser {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
}

impl FromStr for ClientRequest {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

impl fmt::Display for ClientRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Why a chat message was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlockReason {
    InappropriateContent,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::InappropriateContent => write!(f, "inappropriate-content"),
        }
    }
}

/// Error reasons reported back to the client that caused them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorReason {
    /// The id is held by another live connection.
    DuplicateId,
    /// The id is not (or no longer) registered.
    NotRegistered,
    /// The user is in a room and has to leave it first.
    AlreadyPaired,
    /// A request arrived before `join`.
    NotJoined,
    /// `join` was sent twice on one connection.
    AlreadyJoined,
    /// The frame could not be parsed.
    InvalidMessage,
}

impl fmt::Display for ErrorReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorReason::DuplicateId => write!(f, "duplicate-id"),
            ErrorReason::NotRegistered => write!(f, "not-registered"),
            ErrorReason::AlreadyPaired => write!(f, "already-paired"),
            ErrorReason::NotJoined => write!(f, "not-joined"),
            ErrorReason::AlreadyJoined => write!(f, "already-joined"),
            ErrorReason::InvalidMessage => write!(f, "invalid-message"),
        }
    }
}

/// Events pushed from the server to a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// A room was formed. The `initiator` side starts negotiation.
    MatchFound {
        #[serde(rename = "peerId")]
        peer_id: UserId,
        initiator: bool,
    },
    WaitingForMatch {
        #[serde(rename = "waitingCount")]
        waiting_count: usize,
    },
    WaitingStatus {
        message: String,
        #[serde(rename = "waitingCount")]
        waiting_count: usize,
    },
    /// The partner's connection went away.
    PeerDisconnected,
    /// The partner ended the call on purpose.
    CallEnded,
    Offer {
        from: UserId,
        payload: NegotiationPayload,
    },
    Answer {
        from: UserId,
        payload: NegotiationPayload,
    },
    IceCandidate {
        from: UserId,
        payload: NegotiationPayload,
    },
    ChatMessage {
        from: UserId,
        message: ChatMessage,
    },
    MessageBlocked {
        reason: BlockReason,
    },
    ReportReceived,
    UserBlocked,
    Error {
        reason: ErrorReason,
    },
}

impl ServerEvent {
    /// Build the delivered form of a negotiation envelope
    pub fn negotiation(kind: NegotiationKind, from: UserId, payload: NegotiationPayload) -> Self {
        match kind {
            NegotiationKind::Offer => ServerEvent::Offer { from, payload },
            NegotiationKind::Answer => ServerEvent::Answer { from, payload },
            NegotiationKind::IceCandidate => ServerEvent::IceCandidate { from, payload },
        }
    }
}

impl FromStr for ServerEvent {
    type Err = serde_json::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_str(s)
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}
