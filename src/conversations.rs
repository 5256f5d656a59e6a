use crate::client::{Client, ClientError};
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::Arc;
use watacore::api::CreateRoomRequest;
use watacore::resolver;
use watacore::sync::SyncState;
use watacore::types::ids::{room_alias, validate_room_id};
use watacore::types::{
    Contact, Conversation, DirectConversation, FamilyConversation, RoomId, UserId,
    ValidationError, VoiceMessage,
};

impl Client {
    /// Returns the direct conversation with `user_id`, creating a room if
    /// none exists yet.
    ///
    /// Calls for the same peer are serialized within this client. A room
    /// created concurrently by the peer's own client is not prevented; both
    /// sides converge on the same primary room once both rooms are synced.
    pub async fn get_or_create_direct(
        &self,
        user_id: &str,
    ) -> Result<DirectConversation, ClientError> {
        let peer = UserId::parse(user_id)?;
        if peer == self.own_user_id().await? {
            return Err(ValidationError::SelfConversation.into());
        }
        if let Some(existing) = self.direct_conversation(&peer).await? {
            return Ok(existing);
        }

        let lock = self
            .direct_creation_locks
            .entry(peer.clone())
            .or_default()
            .clone();
        let _guard = lock.lock().await;
        if let Some(existing) = self.direct_conversation(&peer).await? {
            debug!(target: "Client/Conversations", "Direct room with {peer} appeared while waiting");
            return Ok(existing);
        }

        info!(target: "Client/Conversations", "Creating direct room with {peer}");
        let room_id = self.create_room(&CreateRoomRequest::direct(&peer)).await?;
        let policy = Arc::clone(&self.primary_policy);
        let created = self
            .wait_for_state("direct room", self.config.wait_timeout, |state| {
                resolver::direct_conversation(state, &peer, policy.as_ref())
                    .filter(|conversation| conversation.all_room_ids.contains(&room_id))
            })
            .await?;
        self.mark_direct(&peer, &room_id).await?;

        // Another room may have won the tie-break in the meantime.
        Ok(self.direct_conversation(&peer).await?.unwrap_or(created))
    }

    /// Joins or creates the family room and returns it once joined.
    pub async fn ensure_family(&self) -> Result<FamilyConversation, ClientError> {
        if let Some(family) = self.joined_family().await? {
            return Ok(family);
        }
        let _guard = self.family_lock.lock().await;
        if let Some(family) = self.joined_family().await? {
            return Ok(family);
        }

        let own = self.own_user_id().await?;
        let localpart = self.config.family_alias_localpart.clone();
        let alias = room_alias(&localpart, own.server_name());
        let mut created = false;
        let mut attempt = 0;
        let room_id = loop {
            match self.resolve_alias(&alias).await {
                Ok(room_id) => {
                    if !self.is_joined(&room_id).await? {
                        info!(target: "Client/Conversations", "Joining family room {room_id}");
                        self.join_room(&room_id).await?;
                    }
                    break room_id;
                }
                Err(ClientError::Api(e)) if e.is_not_found() && !created => {
                    created = true;
                    info!(target: "Client/Conversations", "No family room yet, creating {alias}");
                    match self.create_room(&CreateRoomRequest::family(&localpart)).await {
                        Ok(room_id) => break room_id,
                        Err(ClientError::Api(e)) if e.is_room_in_use() => {
                            info!(target: "Client/Conversations", "{alias} was claimed concurrently");
                        }
                        Err(e) => return Err(e),
                    }
                }
                Err(ClientError::Api(e))
                    if (e.is_not_found() || e.is_network())
                        && attempt < self.config.alias_retry_attempts =>
                {
                    let delay = self.config.backoff.delay_for_attempt(attempt);
                    attempt += 1;
                    debug!(
                        target: "Client/Conversations",
                        "{alias} did not resolve ({e}), retry {attempt} in {delay:?}"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        };

        *self.family_room_id.write().await = Some(room_id.clone());
        self.wait_for_state("family room", self.config.wait_timeout, |state| {
            state
                .room(&room_id)
                .filter(|room| room.is_joined())
                .map(|_| resolver::family_conversation(state, &room_id))
        })
        .await
    }

    /// Invites `user_id` to the family room, joining or creating it first.
    /// Inviting someone who is already in the room does nothing.
    pub async fn invite_to_family(&self, user_id: &str) -> Result<(), ClientError> {
        let user = UserId::parse(user_id)?;
        if user == self.own_user_id().await? {
            return Err(ValidationError::SelfConversation.into());
        }
        let family = self.ensure_family().await?;
        let already_member = self
            .with_state(|state| {
                state
                    .room(&family.room_id)
                    .is_some_and(|room| room.active_member_ids().contains(&user))
            })
            .await?;
        if already_member {
            debug!(target: "Client/Conversations", "{user} is already in the family room");
            return Ok(());
        }
        self.invite_user(&family.room_id, &user).await
    }

    /// Joined members of the family room other than us. Empty if there is
    /// no family room yet.
    pub async fn family_members(&self) -> Result<Vec<Contact>, ClientError> {
        let hint = self.remembered_family_room().await;
        self.with_state(|state| {
            family_room_id(state, hint.as_deref())
                .map(|room_id| resolver::family_members(state, &room_id))
                .unwrap_or_default()
        })
        .await
    }

    /// The other participant of a two-person room.
    pub async fn contact_for_room(&self, room_id: &str) -> Result<Option<Contact>, ClientError> {
        validate_room_id(room_id)?;
        self.with_state(|state| resolver::contact_for_room(state, room_id))
            .await
    }

    pub async fn direct_conversation(
        &self,
        peer: &UserId,
    ) -> Result<Option<DirectConversation>, ClientError> {
        self.with_state(|state| {
            resolver::direct_conversation(state, peer, self.primary_policy.as_ref())
        })
        .await
    }

    pub async fn direct_conversations(&self) -> Result<Vec<DirectConversation>, ClientError> {
        self.with_state(|state| resolver::direct_conversations(state, self.primary_policy.as_ref()))
            .await
    }

    pub async fn conversation_for_room(
        &self,
        room_id: &str,
    ) -> Result<Option<Conversation>, ClientError> {
        validate_room_id(room_id)?;
        let hint = self.remembered_family_room().await;
        self.with_state(|state| {
            resolver::conversation_for_room(
                state,
                room_id,
                hint.as_deref(),
                self.primary_policy.as_ref(),
            )
        })
        .await
    }

    /// Voice messages of a conversation, oldest first. Direct conversations
    /// include every candidate room known now, not only the ones the passed
    /// value was built from.
    pub async fn messages(
        &self,
        conversation: &Conversation,
    ) -> Result<Vec<VoiceMessage>, ClientError> {
        self.with_state(|state| {
            let mut room_ids: BTreeSet<RoomId> = conversation
                .room_ids()
                .into_iter()
                .map(str::to_string)
                .collect();
            if let Conversation::Direct(direct) = conversation {
                room_ids.extend(resolver::direct_candidates(state, &direct.contact.user_id));
            }
            let mut messages: Vec<VoiceMessage> = room_ids
                .iter()
                .flat_map(|room_id| state.room_messages(room_id))
                .cloned()
                .collect();
            messages.sort_by_key(|message| message.timestamp_ms);
            messages
        })
        .await
    }

    async fn is_joined(&self, room_id: &str) -> Result<bool, ClientError> {
        self.with_state(|state| state.room(room_id).is_some_and(|room| room.is_joined()))
            .await
    }

    async fn joined_family(&self) -> Result<Option<FamilyConversation>, ClientError> {
        let hint = self.remembered_family_room().await;
        self.with_state(|state| {
            let room_id = family_room_id(state, hint.as_deref())?;
            state
                .room(&room_id)
                .filter(|room| room.is_joined())
                .map(|_| resolver::family_conversation(state, &room_id))
        })
        .await
    }
}

fn family_room_id(state: &SyncState, hint: Option<&str>) -> Option<RoomId> {
    state
        .family_room()
        .map(|room| room.room_id.clone())
        .or_else(|| hint.map(str::to_string))
}
