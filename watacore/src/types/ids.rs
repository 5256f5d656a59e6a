use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub type RoomId = String;
pub type EventId = String;

/// Input rejected before anything is sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid user id: {0:?}")]
    InvalidUserId(String),
    #[error("invalid room id: {0:?}")]
    InvalidRoomId(String),
    #[error("invalid event id: {0:?}")]
    InvalidEventId(String),
    #[error("invalid media reference: {0:?}")]
    InvalidMediaRef(String),
    #[error("audio clip is empty")]
    EmptyAudio,
    #[error("cannot open a direct conversation with yourself")]
    SelfConversation,
}

/// A fully qualified user id, `@localpart:server.name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
        let raw = raw.into();
        let valid = raw.len() <= 255
            && raw
                .strip_prefix('@')
                .and_then(|rest| rest.split_once(':'))
                .is_some_and(|(local, server)| {
                    !local.is_empty()
                        && !server.is_empty()
                        && !local.chars().any(|c| c.is_whitespace() || c == ':')
                        && !server.chars().any(char::is_whitespace)
                });
        if valid {
            Ok(Self(raw))
        } else {
            Err(ValidationError::InvalidUserId(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `alice` for `@alice:example.org`.
    pub fn localpart(&self) -> &str {
        let rest = &self.0[1..];
        rest.split_once(':').map_or(rest, |(local, _)| local)
    }

    /// `example.org` for `@alice:example.org`.
    pub fn server_name(&self) -> &str {
        self.0.split_once(':').map_or("", |(_, server)| server)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for UserId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Borrow<str> for UserId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for UserId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

pub fn validate_room_id(room_id: &str) -> Result<(), ValidationError> {
    if room_id.starts_with('!') && room_id.len() > 1 && !room_id.contains(char::is_whitespace) {
        Ok(())
    } else {
        Err(ValidationError::InvalidRoomId(room_id.to_string()))
    }
}

pub fn validate_event_id(event_id: &str) -> Result<(), ValidationError> {
    if event_id.starts_with('$') && event_id.len() > 1 && !event_id.contains(char::is_whitespace)
    {
        Ok(())
    } else {
        Err(ValidationError::InvalidEventId(event_id.to_string()))
    }
}

/// `#localpart:server` alias for a room.
pub fn room_alias(localpart: &str, server_name: &str) -> String {
    format!("#{localpart}:{server_name}")
}
