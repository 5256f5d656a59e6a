//! Room-level calls. None of these touch local state; their effects show up
//! through the next sync fold.

use crate::client::{Client, ClientError};
use crate::request::json_body;
use log::{debug, info};
use std::collections::BTreeMap;
use watacore::api::{self, CreateRoomRequest, InviteRequest, RoomIdResponse};
use watacore::net::HttpRequest;
use watacore::sync::state::{direct_map_content, parse_direct_map};
use watacore::types::message::DIRECT;
use watacore::types::{RoomId, UserId};

impl Client {
    pub(crate) async fn create_room(
        &self,
        request: &CreateRoomRequest,
    ) -> Result<RoomId, ClientError> {
        let url = api::create_room_url(&self.homeserver_url().await);
        let created: RoomIdResponse = self
            .send_json(json_body(HttpRequest::post(url), request)?)
            .await?;
        info!(target: "Client/Rooms", "Created room {}", created.room_id);
        Ok(created.room_id)
    }

    /// Joins by room id or alias.
    pub(crate) async fn join_room(&self, room_id_or_alias: &str) -> Result<RoomId, ClientError> {
        let url = api::join_url(&self.homeserver_url().await, room_id_or_alias);
        let joined: RoomIdResponse = self
            .send_json(json_body(HttpRequest::post(url), &serde_json::json!({}))?)
            .await?;
        debug!(target: "Client/Rooms", "Joined {}", joined.room_id);
        Ok(joined.room_id)
    }

    pub(crate) async fn invite_user(&self, room_id: &str, user: &UserId) -> Result<(), ClientError> {
        let url = api::invite_url(&self.homeserver_url().await, room_id);
        let body = InviteRequest {
            user_id: user.to_string(),
        };
        self.send_request(json_body(HttpRequest::post(url), &body)?)
            .await?;
        info!(target: "Client/Rooms", "Invited {user} to {room_id}");
        Ok(())
    }

    pub(crate) async fn resolve_alias(&self, alias: &str) -> Result<RoomId, ClientError> {
        let url = api::resolve_alias_url(&self.homeserver_url().await, alias);
        let resolved: RoomIdResponse = self.send_json(HttpRequest::get(url)).await?;
        Ok(resolved.room_id)
    }

    /// Adds `room_id` to the `m.direct` entry for `peer`.
    ///
    /// The mapping is re-read from the server under a lock so concurrent
    /// updates from this client don't drop each other's rooms. Rooms already
    /// folded locally are merged in as well.
    pub(crate) async fn mark_direct(&self, peer: &UserId, room_id: &str) -> Result<(), ClientError> {
        let _guard = self.direct_account_data_lock.lock().await;
        let own = self.own_user_id().await?;
        let url = api::account_data_url(&self.homeserver_url().await, &own, DIRECT);

        let on_server = match self
            .send_json::<serde_json::Value>(HttpRequest::get(url.clone()))
            .await
        {
            Ok(content) => parse_direct_map(&content),
            Err(ClientError::Api(e)) if e.is_not_found() => BTreeMap::new(),
            Err(e) => return Err(e),
        };

        let mut merged = on_server.clone();
        self.with_state(|state| {
            for (user, rooms) in state.direct_rooms() {
                merged
                    .entry(user.clone())
                    .or_default()
                    .extend(rooms.iter().cloned());
            }
        })
        .await?;
        merged
            .entry(peer.clone())
            .or_default()
            .insert(room_id.to_string());

        if merged == on_server {
            debug!(target: "Client/Rooms", "{room_id} already marked direct with {peer}");
            return Ok(());
        }
        self.send_request(json_body(HttpRequest::put(url), &direct_map_content(&merged))?)
            .await?;
        info!(target: "Client/Rooms", "Marked {room_id} as direct with {peer}");
        Ok(())
    }
}
