use crate::types::ids::{EventId, RoomId, UserId};
use crate::types::media::MediaRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeSet;

pub const ROOM_MESSAGE: &str = "m.room.message";
pub const ROOM_MEMBER: &str = "m.room.member";
pub const ROOM_CANONICAL_ALIAS: &str = "m.room.canonical_alias";
pub const ROOM_NAME: &str = "m.room.name";
pub const RECEIPT: &str = "m.receipt";
pub const RECEIPT_READ: &str = "m.read";
pub const DIRECT: &str = "m.direct";
pub const MSGTYPE_AUDIO: &str = "m.audio";

const VOICE_MARKER: &str = "org.matrix.msc3245.voice";
const EXTENSIBLE_AUDIO: &str = "org.matrix.msc1767.audio";
const VOICE_BODY: &str = "Voice message";

/// A room event once folded into a timeline. Identity is `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoomEvent {
    pub id: EventId,
    pub event_type: String,
    pub sender: String,
    pub timestamp_ms: i64,
    pub content: Value,
    pub state_key: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
    Knock,
}

impl Membership {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "join" => Some(Membership::Join),
            "invite" => Some(Membership::Invite),
            "leave" => Some(Membership::Leave),
            "ban" => Some(Membership::Ban),
            "knock" => Some(Membership::Knock),
            _ => None,
        }
    }

    /// Joined or invited: the user counts towards the conversation.
    pub fn is_active(&self) -> bool {
        matches!(self, Membership::Join | Membership::Invite)
    }
}

/// Someone we can talk to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl Contact {
    /// Placeholder for a user we have no room data for yet.
    pub fn stub(user_id: UserId) -> Self {
        let display_name = user_id.localpart().to_string();
        Self {
            user_id,
            display_name,
            avatar_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectConversation {
    pub contact: Contact,
    pub primary_room_id: RoomId,
    pub all_room_ids: BTreeSet<RoomId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyConversation {
    pub room_id: RoomId,
    pub members: Vec<Contact>,
}

/// A view over one or more rooms; rebuildable from the folded state at any time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Conversation {
    Direct(DirectConversation),
    Family(FamilyConversation),
}

impl Conversation {
    /// The room new messages are sent to.
    pub fn send_room_id(&self) -> &str {
        match self {
            Conversation::Direct(direct) => &direct.primary_room_id,
            Conversation::Family(family) => &family.room_id,
        }
    }

    /// Every room whose messages belong to this conversation.
    pub fn room_ids(&self) -> Vec<&str> {
        match self {
            Conversation::Direct(direct) => direct.all_room_ids.iter().map(String::as_str).collect(),
            Conversation::Family(family) => vec![family.room_id.as_str()],
        }
    }
}

/// A received or sent push-to-talk clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceMessage {
    pub id: EventId,
    pub room_id: RoomId,
    pub sender_id: UserId,
    pub timestamp_ms: i64,
    pub media_ref: MediaRef,
    /// Direct (unauthenticated) download URL for `media_ref`.
    pub url: String,
    pub duration_seconds: f64,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub played_by: BTreeSet<UserId>,
}

impl VoiceMessage {
    pub fn sent_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.timestamp_ms)
    }

    /// Adds `user` to the played set. Returns whether it was new.
    pub fn mark_played_by(&mut self, user: UserId) -> bool {
        self.played_by.insert(user)
    }

    pub fn is_played_by(&self, user: &UserId) -> bool {
        self.played_by.contains(user)
    }
}

/// Audio metadata carried in a voice message event.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceContent {
    pub media_ref: MediaRef,
    pub duration_ms: u64,
    pub size_bytes: u64,
    pub mime_type: String,
}

impl VoiceContent {
    pub fn to_event_content(&self) -> Value {
        json!({
            "msgtype": MSGTYPE_AUDIO,
            "body": VOICE_BODY,
            "url": self.media_ref.to_string(),
            "info": {
                "duration": self.duration_ms,
                "mimetype": self.mime_type,
                "size": self.size_bytes,
            },
            VOICE_MARKER: {},
            EXTENSIBLE_AUDIO: { "duration": self.duration_ms },
        })
    }
}

/// Builds a [`VoiceMessage`] from a timeline event if it carries audio.
pub fn voice_message_from_event(
    room_id: &str,
    event: &RoomEvent,
    homeserver_url: &str,
) -> Option<VoiceMessage> {
    if event.event_type != ROOM_MESSAGE {
        return None;
    }
    let content = &event.content;
    if content.get("msgtype").and_then(Value::as_str) != Some(MSGTYPE_AUDIO) {
        return None;
    }
    let media_ref = MediaRef::parse(content.get("url")?.as_str()?).ok()?;
    let sender_id = UserId::parse(event.sender.as_str()).ok()?;
    let info = content.get("info");
    let duration_ms = info
        .and_then(|info| info.get("duration"))
        .and_then(milliseconds)
        .or_else(|| {
            content
                .get(EXTENSIBLE_AUDIO)
                .and_then(|audio| audio.get("duration"))
                .and_then(milliseconds)
        })
        .unwrap_or(0);

    Some(VoiceMessage {
        id: event.id.clone(),
        room_id: room_id.to_string(),
        sender_id,
        timestamp_ms: event.timestamp_ms,
        url: media_ref.direct_url(homeserver_url),
        media_ref,
        duration_seconds: duration_ms as f64 / 1000.0,
        mime_type: info
            .and_then(|info| info.get("mimetype"))
            .and_then(Value::as_str)
            .map(str::to_string),
        size_bytes: info.and_then(|info| info.get("size")).and_then(Value::as_u64),
        played_by: BTreeSet::new(),
    })
}

/// Some clients send integral durations as floats (`5000.0`).
fn milliseconds(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|ms| ms.is_finite() && *ms >= 0.0)
            .map(|ms| ms.round() as u64)
    })
}
