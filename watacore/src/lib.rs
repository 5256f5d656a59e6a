pub mod api;
pub mod backoff;
pub mod codec;
pub mod net;
pub mod resolver;
pub mod session;

pub mod sync {
    pub mod response;
    pub mod state;

    pub use response::SyncResponse;
    pub use state::{FoldOutcome, InviteInfo, Member, RoomSnapshot, SyncState};
}

pub mod types {
    pub mod ids;
    pub mod media;
    pub mod message;

    pub use ids::{EventId, RoomId, UserId, ValidationError};
    pub use media::MediaRef;
    pub use message::{
        Contact, Conversation, DirectConversation, FamilyConversation, Membership, RoomEvent,
        VoiceContent, VoiceMessage,
    };
}
