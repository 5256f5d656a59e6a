use crate::client::{Client, ClientError};
use crate::request::json_body;
use log::{debug, info};
use std::sync::Arc;
use thiserror::Error;
use watacore::api::{self, SendEventResponse};
use watacore::codec::{CodecError, EncodedAudio, PcmAudio};
use watacore::net::HttpRequest;
use watacore::types::message::ROOM_MESSAGE;
use watacore::types::{Conversation, EventId, RoomId, ValidationError, VoiceContent};

/// Why a voice message did not go out. Upload and send failures hand the
/// encoded clip back so it can be retried with [`Client::send_encoded_voice`].
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("encoding failed: {0}")]
    Encode(#[from] CodecError),
    #[error("upload failed: {source}")]
    Upload {
        audio: EncodedAudio,
        source: ClientError,
    },
    #[error("sending the message failed: {source}")]
    Send {
        audio: EncodedAudio,
        source: ClientError,
    },
}

impl VoiceError {
    /// The encoded clip, if the failure happened after encoding.
    pub fn into_audio(self) -> Option<EncodedAudio> {
        match self {
            VoiceError::Upload { audio, .. } | VoiceError::Send { audio, .. } => Some(audio),
            _ => None,
        }
    }
}

impl Client {
    /// Encodes with the configured codec off the async runtime.
    pub async fn encode_voice(&self, audio: PcmAudio) -> Result<EncodedAudio, VoiceError> {
        if audio.is_empty() {
            return Err(ValidationError::EmptyAudio.into());
        }
        let codec = Arc::clone(&self.codec);
        tokio::task::spawn_blocking(move || codec.encode(&audio))
            .await
            .map_err(|e| CodecError::Codec(format!("encoder task failed: {e}")))?
            .map_err(VoiceError::from)
    }

    /// Encodes, uploads and sends a clip to the conversation.
    pub async fn send_voice_message(
        &self,
        conversation: &Conversation,
        audio: PcmAudio,
    ) -> Result<EventId, VoiceError> {
        let encoded = self.encode_voice(audio).await?;
        self.send_encoded_voice(conversation, encoded).await
    }

    /// Uploads and sends an already encoded clip.
    ///
    /// Sends to the same room are serialized, so a message sent after another
    /// one was started lands after it in the timeline.
    pub async fn send_encoded_voice(
        &self,
        conversation: &Conversation,
        audio: EncodedAudio,
    ) -> Result<EventId, VoiceError> {
        if audio.data.is_empty() {
            return Err(ValidationError::EmptyAudio.into());
        }
        let room_id = self.send_target(conversation).await;
        let lock = self
            .room_send_locks
            .entry(room_id.clone())
            .or_default()
            .clone();
        let _guard = lock.lock().await;

        let media_ref = match self
            .upload(audio.data.clone(), audio.mime_type, &audio.file_name)
            .await
        {
            Ok(media_ref) => media_ref,
            Err(source) => return Err(VoiceError::Upload { audio, source }),
        };
        let content = VoiceContent {
            media_ref,
            duration_ms: audio.duration_ms,
            size_bytes: audio.size_bytes(),
            mime_type: audio.mime_type.to_string(),
        };
        match self.send_message_event(&room_id, &content.to_event_content()).await {
            Ok(event_id) => {
                info!(
                    target: "Client/Voice",
                    "Sent {} ms voice message {event_id} to {room_id}",
                    audio.duration_ms
                );
                Ok(event_id)
            }
            Err(source) => Err(VoiceError::Send { audio, source }),
        }
    }

    /// The room new messages for `conversation` should go to. For direct
    /// conversations the primary room is recomputed from the latest state.
    async fn send_target(&self, conversation: &Conversation) -> RoomId {
        if let Conversation::Direct(direct) = conversation {
            if let Ok(Some(current)) = self.direct_conversation(&direct.contact.user_id).await {
                if current.primary_room_id != direct.primary_room_id {
                    debug!(
                        target: "Client/Voice",
                        "Primary room for {} moved to {}",
                        direct.contact.user_id, current.primary_room_id
                    );
                }
                return current.primary_room_id;
            }
        }
        conversation.send_room_id().to_string()
    }

    async fn send_message_event(
        &self,
        room_id: &str,
        content: &serde_json::Value,
    ) -> Result<EventId, ClientError> {
        let txn_id = self.generate_txn_id();
        let url = api::send_event_url(&self.homeserver_url().await, room_id, ROOM_MESSAGE, &txn_id);
        let sent: SendEventResponse = self
            .send_json(json_body(HttpRequest::put(url), content)?)
            .await?;
        Ok(sent.event_id)
    }
}
