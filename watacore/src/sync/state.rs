//! Folded client view of every room the session knows about.
//!
//! [`SyncState::fold`] is the only mutation path. It is idempotent: folding
//! the same response twice, or overlapping responses, never duplicates an
//! event or a receipt.

use crate::sync::response::{
    AccountDataEvent, EphemeralEvent, RawEvent, StrippedStateEvent, SyncResponse,
};
use crate::types::ids::{EventId, RoomId, UserId};
use crate::types::message::{
    Contact, DIRECT, Membership, RECEIPT, RECEIPT_READ, ROOM_CANONICAL_ALIAS, ROOM_MEMBER,
    ROOM_NAME, RoomEvent, VoiceMessage, voice_message_from_event,
};
use log::{debug, trace};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// How many folds a receipt for an unseen event waits for that event.
pub const PENDING_RECEIPT_FOLDS: u64 = 32;
/// Most receipts kept for unseen events; the oldest are dropped first.
pub const MAX_PENDING_RECEIPTS: usize = 512;

#[derive(Debug, Clone, Default)]
struct PendingReceipt {
    readers: BTreeSet<UserId>,
    parked_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub user_id: UserId,
    pub membership: Membership,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Member {
    pub fn to_contact(&self) -> Contact {
        Contact {
            user_id: self.user_id.clone(),
            display_name: self
                .display_name
                .clone()
                .unwrap_or_else(|| self.user_id.localpart().to_string()),
            avatar_url: self.avatar_url.clone(),
        }
    }
}

/// Everything folded so far for one room.
#[derive(Debug, Clone)]
pub struct RoomSnapshot {
    pub room_id: RoomId,
    pub own_membership: Membership,
    pub members: BTreeMap<UserId, Member>,
    /// Set when any membership event in the room carried `is_direct`.
    pub is_direct_flag: bool,
    pub canonical_alias: Option<String>,
    pub name: Option<String>,
    timeline: Vec<RoomEvent>,
    seen: HashSet<EventId>,
    pub account_data: HashMap<String, Value>,
}

impl RoomSnapshot {
    fn new(room_id: &str, own_membership: Membership) -> Self {
        Self {
            room_id: room_id.to_string(),
            own_membership,
            members: BTreeMap::new(),
            is_direct_flag: false,
            canonical_alias: None,
            name: None,
            timeline: Vec::new(),
            seen: HashSet::new(),
            account_data: HashMap::new(),
        }
    }

    pub fn timeline(&self) -> &[RoomEvent] {
        &self.timeline
    }

    pub fn contains_event(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    pub fn is_joined(&self) -> bool {
        self.own_membership == Membership::Join
    }

    /// Users currently joined or invited.
    pub fn active_member_ids(&self) -> BTreeSet<&UserId> {
        self.members
            .values()
            .filter(|m| m.membership.is_active())
            .map(|m| &m.user_id)
            .collect()
    }

    pub fn joined_members(&self) -> impl Iterator<Item = &Member> {
        self.members
            .values()
            .filter(|m| m.membership == Membership::Join)
    }

    fn apply_member(&mut self, state_key: &str, content: &Value, own_user: &UserId) -> bool {
        let Ok(user_id) = UserId::parse(state_key) else {
            return false;
        };
        let Some(membership) = content
            .get("membership")
            .and_then(Value::as_str)
            .and_then(Membership::parse)
        else {
            return false;
        };
        if content.get("is_direct").and_then(Value::as_bool) == Some(true) {
            self.is_direct_flag = true;
        }
        if &user_id == own_user {
            self.own_membership = membership;
        }
        let member = Member {
            user_id: user_id.clone(),
            membership,
            display_name: content
                .get("displayname")
                .and_then(Value::as_str)
                .map(str::to_string),
            avatar_url: content
                .get("avatar_url")
                .and_then(Value::as_str)
                .map(str::to_string),
        };
        let changed = self.members.get(&user_id) != Some(&member);
        self.members.insert(user_id, member);
        changed
    }

    /// Applies a state event. Returns whether membership changed.
    fn apply_state(
        &mut self,
        event_type: &str,
        state_key: &str,
        content: &Value,
        own_user: &UserId,
    ) -> bool {
        match event_type {
            ROOM_MEMBER => self.apply_member(state_key, content, own_user),
            ROOM_CANONICAL_ALIAS => {
                self.canonical_alias = content
                    .get("alias")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                false
            }
            ROOM_NAME => {
                self.name = content
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                false
            }
            _ => false,
        }
    }
}

/// A newly seen invite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InviteInfo {
    pub room_id: RoomId,
    pub inviter: Option<UserId>,
    pub is_direct: bool,
}

/// What changed in one fold. Drives derived event emission.
#[derive(Debug, Clone, Default)]
pub struct FoldOutcome {
    /// Voice messages folded for the first time, in fold order.
    pub new_messages: Vec<VoiceMessage>,
    /// Messages whose played set grew, with the room they live in.
    pub played: Vec<(VoiceMessage, RoomId)>,
    pub membership_changed: BTreeSet<RoomId>,
    pub new_invites: Vec<InviteInfo>,
    pub direct_changed: bool,
}

impl FoldOutcome {
    pub fn is_empty(&self) -> bool {
        self.new_messages.is_empty()
            && self.played.is_empty()
            && self.membership_changed.is_empty()
            && self.new_invites.is_empty()
            && !self.direct_changed
    }
}

#[derive(Debug, Clone)]
pub struct SyncState {
    own_user_id: UserId,
    homeserver_url: String,
    family_alias: String,
    next_batch: Option<String>,
    rooms: BTreeMap<RoomId, RoomSnapshot>,
    direct_rooms: BTreeMap<UserId, BTreeSet<RoomId>>,
    account_data: HashMap<String, Value>,
    messages: HashMap<EventId, VoiceMessage>,
    event_rooms: HashMap<EventId, RoomId>,
    pending_receipts: HashMap<EventId, PendingReceipt>,
    folds: u64,
}

impl SyncState {
    pub fn new(own_user_id: UserId, homeserver_url: &str, family_alias: String) -> Self {
        Self {
            own_user_id,
            homeserver_url: homeserver_url.trim_end_matches('/').to_string(),
            family_alias,
            next_batch: None,
            rooms: BTreeMap::new(),
            direct_rooms: BTreeMap::new(),
            account_data: HashMap::new(),
            messages: HashMap::new(),
            event_rooms: HashMap::new(),
            pending_receipts: HashMap::new(),
            folds: 0,
        }
    }

    pub fn own_user_id(&self) -> &UserId {
        &self.own_user_id
    }

    pub fn family_alias(&self) -> &str {
        &self.family_alias
    }

    pub fn next_batch(&self) -> Option<&str> {
        self.next_batch.as_deref()
    }

    pub fn room(&self, room_id: &str) -> Option<&RoomSnapshot> {
        self.rooms.get(room_id)
    }

    pub fn rooms(&self) -> impl Iterator<Item = &RoomSnapshot> {
        self.rooms.values()
    }

    /// The `m.direct` mapping as last folded.
    pub fn direct_rooms(&self) -> &BTreeMap<UserId, BTreeSet<RoomId>> {
        &self.direct_rooms
    }

    pub fn account_data(&self, event_type: &str) -> Option<&Value> {
        self.account_data.get(event_type)
    }

    pub fn message(&self, event_id: &str) -> Option<&VoiceMessage> {
        self.messages.get(event_id)
    }

    /// Voice messages of one room in timeline order.
    pub fn room_messages(&self, room_id: &str) -> Vec<&VoiceMessage> {
        self.rooms
            .get(room_id)
            .map(|room| {
                room.timeline
                    .iter()
                    .filter_map(|event| self.messages.get(&event.id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// The family room, found by its canonical alias.
    pub fn family_room(&self) -> Option<&RoomSnapshot> {
        self.rooms.values().find(|room| {
            room.own_membership.is_active()
                && room.canonical_alias.as_deref() == Some(self.family_alias.as_str())
        })
    }

    pub fn is_family_room(&self, room_id: &str) -> bool {
        self.rooms
            .get(room_id)
            .is_some_and(|room| room.canonical_alias.as_deref() == Some(self.family_alias.as_str()))
    }

    /// Folds one sync response. The cursor only ever moves forward to the
    /// response's `next_batch`; it is never cleared.
    pub fn fold(&mut self, response: &SyncResponse) -> FoldOutcome {
        let mut outcome = FoldOutcome::default();
        self.folds += 1;

        for event in &response.account_data.events {
            self.fold_global_account_data(event, &mut outcome);
        }

        for (room_id, joined) in &response.rooms.join {
            let room = self.room_entry(room_id, Membership::Join);
            if room.own_membership != Membership::Join {
                room.own_membership = Membership::Join;
                outcome.membership_changed.insert(room_id.clone());
            }
            for event in &joined.state.events {
                self.fold_state_event(room_id, event, &mut outcome);
            }
            for event in &joined.timeline.events {
                self.fold_timeline_event(room_id, event, &mut outcome);
            }
            for event in &joined.ephemeral.events {
                self.fold_ephemeral(room_id, event, &mut outcome);
            }
            for event in &joined.account_data.events {
                if let Some(room) = self.rooms.get_mut(room_id) {
                    room.account_data
                        .insert(event.event_type.clone(), event.content.clone());
                }
            }
        }

        for (room_id, invited) in &response.rooms.invite {
            self.fold_invite(room_id, &invited.invite_state.events, &mut outcome);
        }

        for (room_id, left) in &response.rooms.leave {
            let room = self.room_entry(room_id, Membership::Leave);
            if room.own_membership.is_active() {
                room.own_membership = Membership::Leave;
                outcome.membership_changed.insert(room_id.clone());
            }
            for event in &left.state.events {
                self.fold_state_event(room_id, event, &mut outcome);
            }
            for event in &left.timeline.events {
                self.fold_timeline_event(room_id, event, &mut outcome);
            }
        }

        if !response.next_batch.is_empty() {
            self.next_batch = Some(response.next_batch.clone());
        }
        self.expire_pending_receipts();

        trace!(
            target: "Core/Sync",
            "Fold done: {} new messages, {} played, {} membership changes",
            outcome.new_messages.len(),
            outcome.played.len(),
            outcome.membership_changed.len()
        );
        outcome
    }

    /// Receipts for events older than the fetched history never find their
    /// event, so they only wait a bounded number of folds.
    fn expire_pending_receipts(&mut self) {
        let folds = self.folds;
        let before = self.pending_receipts.len();
        self.pending_receipts
            .retain(|_, pending| folds - pending.parked_at < PENDING_RECEIPT_FOLDS);
        if self.pending_receipts.len() > MAX_PENDING_RECEIPTS {
            let mut by_age: Vec<(u64, EventId)> = self
                .pending_receipts
                .iter()
                .map(|(event_id, pending)| (pending.parked_at, event_id.clone()))
                .collect();
            by_age.sort();
            let excess = self.pending_receipts.len() - MAX_PENDING_RECEIPTS;
            for (_, event_id) in by_age.into_iter().take(excess) {
                self.pending_receipts.remove(&event_id);
            }
        }
        let dropped = before - self.pending_receipts.len();
        if dropped > 0 {
            trace!(target: "Core/Sync", "Dropped {dropped} receipts for events never seen");
        }
    }

    fn room_entry(&mut self, room_id: &str, initial: Membership) -> &mut RoomSnapshot {
        self.rooms
            .entry(room_id.to_string())
            .or_insert_with(|| RoomSnapshot::new(room_id, initial))
    }

    fn fold_global_account_data(&mut self, event: &AccountDataEvent, outcome: &mut FoldOutcome) {
        if event.event_type == DIRECT {
            let parsed = parse_direct_map(&event.content);
            if parsed != self.direct_rooms {
                self.direct_rooms = parsed;
                outcome.direct_changed = true;
            }
        }
        self.account_data
            .insert(event.event_type.clone(), event.content.clone());
    }

    fn fold_state_event(&mut self, room_id: &str, event: &RawEvent, outcome: &mut FoldOutcome) {
        let Some(state_key) = event.state_key.as_deref() else {
            return;
        };
        let own_user = self.own_user_id.clone();
        if let Some(room) = self.rooms.get_mut(room_id)
            && room.apply_state(&event.event_type, state_key, &event.content, &own_user)
        {
            outcome.membership_changed.insert(room_id.to_string());
        }
    }

    fn fold_timeline_event(&mut self, room_id: &str, raw: &RawEvent, outcome: &mut FoldOutcome) {
        let Some(event_id) = raw.event_id.clone() else {
            return;
        };
        let own_user = self.own_user_id.clone();
        let Some(room) = self.rooms.get_mut(room_id) else {
            return;
        };
        if !room.seen.insert(event_id.clone()) {
            trace!(target: "Core/Sync", "Skipping duplicate event {event_id} in {room_id}");
            return;
        }
        if let Some(state_key) = raw.state_key.as_deref()
            && room.apply_state(&raw.event_type, state_key, &raw.content, &own_user)
        {
            outcome.membership_changed.insert(room_id.to_string());
        }
        let event = RoomEvent {
            id: event_id.clone(),
            event_type: raw.event_type.clone(),
            sender: raw.sender.clone(),
            timestamp_ms: raw.origin_server_ts,
            content: raw.content.clone(),
            state_key: raw.state_key.clone(),
        };
        let voice = voice_message_from_event(room_id, &event, &self.homeserver_url);
        room.timeline.push(event);
        self.event_rooms.insert(event_id.clone(), room_id.to_string());

        let pending = self.pending_receipts.remove(&event_id);
        if let Some(mut message) = voice {
            for user in pending.into_iter().flat_map(|pending| pending.readers) {
                if user != message.sender_id {
                    message.mark_played_by(user);
                }
            }
            debug!(
                target: "Core/Sync",
                "Voice message {} from {} in {}",
                message.id, message.sender_id, room_id
            );
            outcome.new_messages.push(message.clone());
            self.messages.insert(event_id, message);
        }
    }

    fn fold_ephemeral(&mut self, room_id: &str, event: &EphemeralEvent, outcome: &mut FoldOutcome) {
        if event.event_type != RECEIPT {
            return;
        }
        let Some(by_event) = event.content.as_object() else {
            return;
        };
        for (event_id, receipt_types) in by_event {
            let Some(readers) = receipt_types.get(RECEIPT_READ).and_then(Value::as_object) else {
                continue;
            };
            for reader in readers.keys() {
                let Ok(user) = UserId::parse(reader.as_str()) else {
                    continue;
                };
                self.apply_receipt(room_id, event_id, user, outcome);
            }
        }
    }

    fn apply_receipt(
        &mut self,
        room_id: &str,
        event_id: &str,
        user: UserId,
        outcome: &mut FoldOutcome,
    ) {
        if let Some(message) = self.messages.get_mut(event_id) {
            if message.sender_id == user {
                return;
            }
            if message.mark_played_by(user) {
                if message.room_id != room_id {
                    debug!(
                        target: "Core/Sync",
                        "Receipt for {event_id} arrived via {room_id}, message lives in {}",
                        message.room_id
                    );
                }
                outcome.played.push((message.clone(), message.room_id.clone()));
            }
        } else if !self.event_rooms.contains_key(event_id) {
            // Event not folded yet (or folded into a room we only see later).
            let folds = self.folds;
            self.pending_receipts
                .entry(event_id.to_string())
                .or_insert_with(|| PendingReceipt {
                    readers: BTreeSet::new(),
                    parked_at: folds,
                })
                .readers
                .insert(user);
        }
    }

    fn fold_invite(
        &mut self,
        room_id: &str,
        stripped: &[StrippedStateEvent],
        outcome: &mut FoldOutcome,
    ) {
        let own_user = self.own_user_id.clone();
        let is_new = match self.rooms.get(room_id) {
            Some(room) => room.own_membership != Membership::Invite,
            None => true,
        };
        if self
            .rooms
            .get(room_id)
            .is_some_and(|room| room.own_membership == Membership::Join)
        {
            // Stale invite for a room we already joined.
            return;
        }
        let room = self.room_entry(room_id, Membership::Invite);
        room.own_membership = Membership::Invite;
        let mut inviter = None;
        let mut is_direct = false;
        for event in stripped {
            room.apply_state(&event.event_type, &event.state_key, &event.content, &own_user);
            if event.event_type == ROOM_MEMBER && event.state_key == own_user.as_str() {
                inviter = UserId::parse(event.sender.as_str()).ok();
                is_direct = event.content.get("is_direct").and_then(Value::as_bool) == Some(true);
            }
        }
        if is_new {
            outcome.membership_changed.insert(room_id.to_string());
            outcome.new_invites.push(InviteInfo {
                room_id: room_id.to_string(),
                inviter,
                is_direct,
            });
        }
    }
}

/// Parses `m.direct` content: `{ "@user:hs": ["!room:hs", ...] }`.
pub fn parse_direct_map(content: &Value) -> BTreeMap<UserId, BTreeSet<RoomId>> {
    let mut map = BTreeMap::new();
    let Some(object) = content.as_object() else {
        return map;
    };
    for (user, rooms) in object {
        let Ok(user_id) = UserId::parse(user.as_str()) else {
            continue;
        };
        let room_ids: BTreeSet<RoomId> = rooms
            .as_array()
            .map(|rooms| {
                rooms
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        if !room_ids.is_empty() {
            map.insert(user_id, room_ids);
        }
    }
    map
}

/// Serializes a direct map back to `m.direct` content.
pub fn direct_map_content(map: &BTreeMap<UserId, BTreeSet<RoomId>>) -> Value {
    let object = map
        .iter()
        .map(|(user, rooms)| {
            (
                user.to_string(),
                Value::Array(rooms.iter().cloned().map(Value::String).collect()),
            )
        })
        .collect();
    Value::Object(object)
}
