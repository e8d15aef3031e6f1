//! Signaling, matchmaking and relay server for anonymous one-to-one chat
//!
//! Clients connect over WebSocket, join with a caller-chosen id and are
//! paired with the earliest-waiting user they have not blocked. Once paired,
//! the server forwards connection-negotiation envelopes between the two
//! peers without looking inside them, and relays chat after passing it
//! through a content filter.
//!
//! # Protocol
//!
//! One JSON object per text frame, tagged by `event`; see
//! [`pairchat_protocol`] for the full list.
//!
//! ```text
//! → {"event":"join","id":"u1","displayName":"Ann"}
//! ← {"event":"waiting-for-match","waitingCount":1}
//! ← {"event":"match-found","peerId":"u2","initiator":false}
//! ← {"event":"offer","from":"u2","payload":{...}}
//! → {"event":"answer","to":"u2","payload":{...}}
//! → {"event":"chat-message","to":"u2","message":{"content":"hi","timestamp":1700000000000}}
//! → {"event":"find-new-chat"}
//! ```
//!
//! # Example
//!
//! ```bash
//! pairchat-server --port 3000 --deny-word spam --moderation-log moderation.jsonl
//! ```

#![forbid(unsafe_code)]

pub mod config;
pub mod error;
pub mod handler;
pub mod moderation;
pub mod state;

pub use config::Config;
pub use error::{ClientRequestError, SignalingError};
pub use handler::{Heartbeat, handle_connection, serve};
pub use moderation::{ContentFilter, Denylist, ModerationRecord, ModerationSink};
pub use state::{LeaveKind, MatchOutcome, ServerState, UserState};
