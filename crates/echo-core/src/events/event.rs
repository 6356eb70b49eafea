//! Inbound platform events.
//!
//! Adapters translate whatever their chat platform delivers into a
//! [`PlatformEvent`]. Messages carry text to be scored; interactions are
//! gestures the platform has already classified and are never scored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A pre-classified gesture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InteractionKind {
    /// Tap or nudge on the bot.
    Poke,
    /// Any other named gesture; its name is used as the tag.
    #[strum(default)]
    Other(String),
}

impl InteractionKind {
    /// Tag the gesture resolves to.
    pub fn tag(&self) -> String {
        match self {
            Self::Poke => "poke".to_string(),
            Self::Other(name) => name.trim().to_lowercase(),
        }
    }
}

/// Payload of a platform event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Free-form chat text.
    Message { text: String },
    /// A gesture with a known meaning.
    Interaction { kind: InteractionKind },
}

/// One inbound event from a chat session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlatformEvent {
    /// Opaque session id; also the context-memory key.
    pub session_id: String,
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
}

impl PlatformEvent {
    /// A chat message received now.
    pub fn message(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            kind: EventKind::Message { text: text.into() },
            timestamp: Utc::now(),
        }
    }

    /// An interaction received now.
    pub fn interaction(session_id: impl Into<String>, kind: InteractionKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind: EventKind::Interaction { kind },
            timestamp: Utc::now(),
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Message text, if this is a message.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::Message { text } => Some(text),
            EventKind::Interaction { .. } => None,
        }
    }
}
