//! Content filtering and moderation records
//!
//! The filter is a predicate over chat text; the built-in [`Denylist`] does a
//! case-insensitive substring match. Moderation records are handed to a
//! [`ModerationSink`] and never read back.

use chrono::{DateTime, Utc};
use pairchat_protocol::{BlockReason, UserId};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Longest excerpt of user text kept in a record, in characters
pub const MAX_EXCERPT_CHARS: usize = 200;

/// Words rejected when no denylist is configured
pub const BUILTIN_DENYLIST: &[&str] = &["inappropriate1", "inappropriate2", "slur1", "slur2"];

/// Decides whether a chat message may be relayed
pub trait ContentFilter: Send + Sync {
    /// `Some(reason)` if the content must not be delivered
    fn check(&self, content: &str) -> Option<BlockReason>;
}

/// Case-insensitive substring denylist
#[derive(Debug, Clone)]
pub struct Denylist {
    words: Vec<String>,
}

impl Denylist {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut words: Vec<String> = words
            .into_iter()
            .map(|word| word.as_ref().trim().to_lowercase())
            .filter(|word| !word.is_empty())
            .collect();
        words.sort();
        words.dedup();
        Self { words }
    }

    pub fn builtin() -> Self {
        Self::new(BUILTIN_DENYLIST)
    }

    /// Parse one word per line; blank lines and `#` comments are skipped.
    pub fn parse(text: &str) -> Self {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        Ok(Self::parse(&std::fs::read_to_string(path)?))
    }

    /// Add more words to the list
    pub fn extend<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extra = Self::new(words);
        self.words.extend(extra.words);
        self.words.sort();
        self.words.dedup();
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}

impl Default for Denylist {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ContentFilter for Denylist {
    fn check(&self, content: &str) -> Option<BlockReason> {
        let lower = content.to_lowercase();
        self.words
            .iter()
            .any(|word| lower.contains(word.as_str()))
            .then_some(BlockReason::InappropriateContent)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModerationKind {
    BlockedMessage,
    UserReport,
}

/// One moderation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationRecord {
    pub kind: ModerationKind,
    /// Sender of the blocked message, or the reporter
    pub actor: UserId,
    /// The reported user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub excerpt: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ModerationRecord {
    pub fn blocked_message(sender: UserId, reason: BlockReason, content: &str) -> Self {
        Self {
            kind: ModerationKind::BlockedMessage,
            actor: sender,
            subject: None,
            reason: Some(reason.to_string()),
            excerpt: Some(excerpt(content)),
            timestamp: Utc::now(),
        }
    }

    pub fn user_report(reporter: UserId, reported: UserId, reason: String, details: &str) -> Self {
        Self {
            kind: ModerationKind::UserReport,
            actor: reporter,
            subject: Some(reported),
            reason: Some(reason),
            excerpt: (!details.is_empty()).then(|| excerpt(details)),
            timestamp: Utc::now(),
        }
    }
}

fn excerpt(text: &str) -> String {
    text.chars().take(MAX_EXCERPT_CHARS).collect()
}

/// Destination for moderation records.
///
/// `record` is called on the relay path and must not block.
pub trait ModerationSink: Send + Sync {
    fn record(&self, record: ModerationRecord);
}

/// Writes records to the structured log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ModerationSink for LogSink {
    fn record(&self, record: ModerationRecord) {
        warn!(
            kind = ?record.kind,
            actor = %record.actor,
            subject = ?record.subject.as_ref().map(UserId::as_str),
            reason = ?record.reason,
            excerpt = ?record.excerpt,
            timestamp = %record.timestamp,
            "moderation record"
        );
    }
}

/// Appends records as JSON lines to a file from a background task
#[derive(Debug, Clone)]
pub struct JsonLinesSink {
    tx: mpsc::UnboundedSender<ModerationRecord>,
}

impl JsonLinesSink {
    /// Open (or create) the file in append mode and spawn the writer task.
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        let (tx, mut rx) = mpsc::unbounded_channel::<ModerationRecord>();

        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                let mut line = match serde_json::to_vec(&record) {
                    Ok(line) => line,
                    Err(e) => {
                        error!(error = %e, "failed to encode moderation record");
                        continue;
                    }
                };
                line.push(b'\n');
                let written = async {
                    file.write_all(&line).await?;
                    file.flush().await
                };
                if let Err(e) = written.await {
                    error!(path = %path.display(), error = %e, "failed to write moderation record");
                }
            }
        });

        Ok(Self { tx })
    }
}

impl ModerationSink for JsonLinesSink {
    fn record(&self, record: ModerationRecord) {
        if self.tx.send(record).is_err() {
            error!("moderation writer task is gone, record dropped");
        }
    }
}
