//! Error types for the signaling server

use pairchat_protocol::ErrorReason;
use thiserror::Error;

/// Errors raised by the registry, matchmaker and relay.
///
/// None of these are fatal: they are logged and, where someone is waiting
/// for an answer, turned into a targeted notification.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignalingError {
    /// The id is not in the presence registry
    #[error("user is not registered")]
    NotRegistered,

    /// The id is already held by a live connection
    #[error("user id is already registered")]
    DuplicateId,

    /// Negotiation target is not connected
    #[error("target user is unreachable")]
    TargetUnreachable,

    /// Chat sender and target do not share a room
    #[error("users are not in the same room")]
    NotInSameRoom,

    /// The user has no room
    #[error("user is not in a room")]
    NotInRoom,

    /// Chat content was rejected by the content filter
    #[error("message was rejected by the content filter")]
    ContentFiltered,

    /// One side has blocked the other
    #[error("users have blocked each other")]
    Blocked,

    /// The user is paired and must leave the room before queueing again
    #[error("user is already paired")]
    AlreadyPaired,
}

impl SignalingError {
    /// Static reason string for log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotRegistered => "not-registered",
            Self::DuplicateId => "duplicate-id",
            Self::TargetUnreachable => "target-unreachable",
            Self::NotInSameRoom => "not-in-same-room",
            Self::NotInRoom => "not-in-room",
            Self::ContentFiltered => "content-filtered",
            Self::Blocked => "blocked",
            Self::AlreadyPaired => "already-paired",
        }
    }

    /// The wire reason to send back to the caller, if this error warrants one.
    ///
    /// Relay failures are dropped silently; content filtering has its own
    /// `message-blocked` event.
    pub fn client_reason(&self) -> Option<ErrorReason> {
        match self {
            Self::NotRegistered => Some(ErrorReason::NotRegistered),
            Self::DuplicateId => Some(ErrorReason::DuplicateId),
            Self::AlreadyPaired => Some(ErrorReason::AlreadyPaired),
            Self::TargetUnreachable
            | Self::NotInSameRoom
            | Self::NotInRoom
            | Self::ContentFiltered
            | Self::Blocked => None,
        }
    }
}

/// Errors from client requests on one connection
#[derive(Error, Debug)]
pub enum ClientRequestError {
    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A request other than `join` arrived first
    #[error("connection has not joined")]
    NotJoined,

    /// `join` arrived on a connection that already joined
    #[error("connection already joined as {0}")]
    AlreadyJoined(String),

    /// Signaling rejected the request
    #[error(transparent)]
    Signaling(#[from] SignalingError),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

impl ClientRequestError {
    /// The wire reason to send back to the client, if any.
    pub fn client_reason(&self) -> Option<ErrorReason> {
        match self {
            Self::Json(_) => Some(ErrorReason::InvalidMessage),
            Self::NotJoined => Some(ErrorReason::NotJoined),
            Self::AlreadyJoined(_) => Some(ErrorReason::AlreadyJoined),
            Self::Signaling(e) => e.client_reason(),
            Self::WebSocket(_) => None,
        }
    }
}
