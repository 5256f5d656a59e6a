//! Conversation views computed from a [`SyncState`].
//!
//! Nothing here talks to the server. The async operations that create or
//! join rooms live in the client crate and call back into these functions
//! once the effect has been folded.

use crate::sync::state::{RoomSnapshot, SyncState};
use crate::types::ids::{RoomId, UserId};
use crate::types::message::{Contact, Conversation, DirectConversation, FamilyConversation};
use std::collections::BTreeSet;
use std::fmt::Debug;

/// Picks the room every participant agrees to send to when several direct
/// rooms exist for the same pair.
///
/// Implementations must be a pure function of the candidate set so that two
/// peers that have folded the same rooms pick the same one.
pub trait PrimaryRoomPolicy: Send + Sync + Debug {
    fn select<'a>(&self, candidates: &'a BTreeSet<RoomId>) -> Option<&'a RoomId>;
}

/// Smallest room id in byte-wise lexicographic order.
#[derive(Debug, Clone, Copy, Default)]
pub struct LexicographicPolicy;

impl PrimaryRoomPolicy for LexicographicPolicy {
    fn select<'a>(&self, candidates: &'a BTreeSet<RoomId>) -> Option<&'a RoomId> {
        candidates.iter().next()
    }
}

fn is_direct_candidate(state: &SyncState, room: &RoomSnapshot, peer: &UserId) -> bool {
    if !room.own_membership.is_active() || state.is_family_room(&room.room_id) {
        return false;
    }
    let members = room.active_member_ids();
    let own = state.own_user_id();
    let exact_pair = members.len() == 2 && members.contains(own) && members.contains(peer);
    if !exact_pair {
        return false;
    }
    room.is_direct_flag
        || state
            .direct_rooms()
            .get(peer)
            .is_some_and(|rooms| rooms.contains(&room.room_id))
}

/// Every room that is a direct conversation with `peer`.
pub fn direct_candidates(state: &SyncState, peer: &UserId) -> BTreeSet<RoomId> {
    state
        .rooms()
        .filter(|room| is_direct_candidate(state, room, peer))
        .map(|room| room.room_id.clone())
        .collect()
}

/// The contact record for `user`, taken from any room we share.
pub fn contact_for_user(state: &SyncState, user: &UserId) -> Contact {
    state
        .rooms()
        .filter_map(|room| room.members.get(user))
        .find(|member| member.display_name.is_some())
        .or_else(|| state.rooms().find_map(|room| room.members.get(user)))
        .map(|member| member.to_contact())
        .unwrap_or_else(|| Contact::stub(user.clone()))
}

pub fn direct_conversation(
    state: &SyncState,
    peer: &UserId,
    policy: &dyn PrimaryRoomPolicy,
) -> Option<DirectConversation> {
    let candidates = direct_candidates(state, peer);
    let primary = policy.select(&candidates)?.clone();
    Some(DirectConversation {
        contact: contact_for_user(state, peer),
        primary_room_id: primary,
        all_room_ids: candidates,
    })
}

/// One conversation per peer that has at least one direct room.
pub fn direct_conversations(
    state: &SyncState,
    policy: &dyn PrimaryRoomPolicy,
) -> Vec<DirectConversation> {
    let own = state.own_user_id();
    let peers: BTreeSet<&UserId> = state
        .rooms()
        .filter(|room| room.own_membership.is_active() && !state.is_family_room(&room.room_id))
        .flat_map(|room| room.active_member_ids())
        .filter(|user| *user != own)
        .collect();
    peers
        .into_iter()
        .filter_map(|peer| direct_conversation(state, peer, policy))
        .collect()
}

/// The other participant of a two-person room, from locally known
/// membership only. Works on both the creating and the invited side.
pub fn contact_for_room(state: &SyncState, room_id: &str) -> Option<Contact> {
    let room = state.room(room_id)?;
    if state.is_family_room(room_id) {
        return None;
    }
    let own = state.own_user_id();
    let mut others = room
        .members
        .values()
        .filter(|member| member.membership.is_active() && &member.user_id != own);
    let other = others.next()?;
    if others.next().is_some() {
        return None;
    }
    Some(other.to_contact())
}

pub fn family_members(state: &SyncState, room_id: &str) -> Vec<Contact> {
    let own = state.own_user_id();
    state
        .room(room_id)
        .map(|room| {
            room.joined_members()
                .filter(|member| &member.user_id != own)
                .map(|member| member.to_contact())
                .collect()
        })
        .unwrap_or_default()
}

pub fn family_conversation(state: &SyncState, room_id: &str) -> FamilyConversation {
    FamilyConversation {
        room_id: room_id.to_string(),
        members: family_members(state, room_id),
    }
}

/// The conversation a room belongs to, if it belongs to one.
pub fn conversation_for_room(
    state: &SyncState,
    room_id: &str,
    family_room_id: Option<&str>,
    policy: &dyn PrimaryRoomPolicy,
) -> Option<Conversation> {
    if state.is_family_room(room_id) || family_room_id == Some(room_id) {
        return Some(Conversation::Family(family_conversation(state, room_id)));
    }
    let contact = contact_for_room(state, room_id)?;
    let direct = direct_conversation(state, &contact.user_id, policy)?;
    direct
        .all_room_ids
        .contains(room_id)
        .then_some(Conversation::Direct(direct))
}
