use std::sync::Arc;
use tokio::sync::broadcast;
use watacore::session::ConnectionState;
use watacore::types::{Contact, Conversation, FamilyConversation, RoomId, VoiceMessage};

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 256;

/// A voice message that arrived after the first sync.
#[derive(Debug, Clone)]
pub struct MessageReceived {
    pub message: VoiceMessage,
    pub conversation: Conversation,
}

/// Someone other than the sender played a voice message.
#[derive(Debug, Clone)]
pub struct MessagePlayed {
    pub message: VoiceMessage,
    pub room_id: RoomId,
}

macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with one broadcast channel per event kind.
        ///
        /// Events are sent from the sync task in fold order. A slow receiver
        /// that falls more than the channel capacity behind gets `Lagged`.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    (connection_state, ConnectionState),
    (message_received, Arc<MessageReceived>),
    (message_played, Arc<MessagePlayed>),
    (family_updated, Arc<FamilyConversation>),
    (contacts_updated, Arc<Vec<Contact>>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
