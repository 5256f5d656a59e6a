//! Client-server API endpoints and bodies used by the client.
//!
//! URL builders take the homeserver base URL and return absolute URLs with
//! every dynamic path segment percent-encoded.

use crate::types::ids::UserId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use urlencoding::encode;

pub const CLIENT_V3: &str = "/_matrix/client/v3";
pub const MEDIA_V3: &str = "/_matrix/media/v3";

fn base(homeserver: &str) -> &str {
    homeserver.trim_end_matches('/')
}

pub fn versions_url(homeserver: &str) -> String {
    format!("{}/_matrix/client/versions", base(homeserver))
}

pub fn login_url(homeserver: &str) -> String {
    format!("{}{CLIENT_V3}/login", base(homeserver))
}

pub fn logout_url(homeserver: &str) -> String {
    format!("{}{CLIENT_V3}/logout", base(homeserver))
}

pub fn refresh_url(homeserver: &str) -> String {
    format!("{}{CLIENT_V3}/refresh", base(homeserver))
}

/// Push rules list. The trailing separator is part of the endpoint.
pub fn push_rules_url(homeserver: &str) -> String {
    format!("{}{CLIENT_V3}/pushrules/", base(homeserver))
}

pub fn sync_url(
    homeserver: &str,
    since: Option<&str>,
    timeout: Duration,
    filter: Option<&str>,
) -> String {
    let mut url = format!(
        "{}{CLIENT_V3}/sync?timeout={}",
        base(homeserver),
        timeout.as_millis()
    );
    if let Some(since) = since {
        url.push_str("&since=");
        url.push_str(&encode(since));
    }
    if let Some(filter) = filter {
        url.push_str("&filter=");
        url.push_str(&encode(filter));
    }
    url
}

/// Inline filter that bounds the timeline history of each room.
pub fn timeline_limit_filter(limit: u32) -> String {
    serde_json::json!({ "room": { "timeline": { "limit": limit } } }).to_string()
}

pub fn create_room_url(homeserver: &str) -> String {
    format!("{}{CLIENT_V3}/createRoom", base(homeserver))
}

pub fn join_url(homeserver: &str, room_id_or_alias: &str) -> String {
    format!("{}{CLIENT_V3}/join/{}", base(homeserver), encode(room_id_or_alias))
}

pub fn invite_url(homeserver: &str, room_id: &str) -> String {
    format!("{}{CLIENT_V3}/rooms/{}/invite", base(homeserver), encode(room_id))
}

pub fn resolve_alias_url(homeserver: &str, alias: &str) -> String {
    format!("{}{CLIENT_V3}/directory/room/{}", base(homeserver), encode(alias))
}

pub fn account_data_url(homeserver: &str, user_id: &UserId, event_type: &str) -> String {
    format!(
        "{}{CLIENT_V3}/user/{}/account_data/{}",
        base(homeserver),
        encode(user_id.as_str()),
        encode(event_type)
    )
}

pub fn send_event_url(homeserver: &str, room_id: &str, event_type: &str, txn_id: &str) -> String {
    format!(
        "{}{CLIENT_V3}/rooms/{}/send/{}/{}",
        base(homeserver),
        encode(room_id),
        encode(event_type),
        encode(txn_id)
    )
}

pub fn receipt_url(homeserver: &str, room_id: &str, receipt_type: &str, event_id: &str) -> String {
    format!(
        "{}{CLIENT_V3}/rooms/{}/receipt/{}/{}",
        base(homeserver),
        encode(room_id),
        encode(receipt_type),
        encode(event_id)
    )
}

pub fn upload_url(homeserver: &str, file_name: &str) -> String {
    format!(
        "{}{MEDIA_V3}/upload?filename={}",
        base(homeserver),
        encode(file_name)
    )
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    #[serde(rename = "type")]
    pub kind: String,
    pub identifier: LoginIdentifier,
    pub password: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_device_display_name: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub refresh_token: bool,
}

impl LoginRequest {
    pub fn password(username: &str, password: &str, device_name: Option<&str>) -> Self {
        Self {
            kind: "m.login.password".into(),
            identifier: LoginIdentifier {
                kind: "m.id.user".into(),
                user: username.into(),
            },
            password: password.into(),
            initial_device_display_name: device_name.map(str::to_string),
            refresh_token: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct LoginResponse {
    pub user_id: String,
    pub access_token: String,
    pub device_id: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateRoomRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_direct: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub invite: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub room_alias_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl CreateRoomRequest {
    pub fn direct(peer: &UserId) -> Self {
        Self {
            preset: Some("trusted_private_chat".into()),
            is_direct: true,
            invite: vec![peer.to_string()],
            ..Default::default()
        }
    }

    pub fn family(alias_localpart: &str) -> Self {
        Self {
            preset: Some("private_chat".into()),
            room_alias_name: Some(alias_localpart.into()),
            name: Some("Family".into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct RoomIdResponse {
    pub room_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InviteRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct SendEventResponse {
    pub event_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct UploadResponse {
    pub content_uri: String,
}

/// Standard error body: `{"errcode": "M_...", "error": "..."}`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct ErrorBody {
    #[serde(default)]
    pub errcode: String,
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub soft_logout: bool,
}

pub mod errcode {
    pub const FORBIDDEN: &str = "M_FORBIDDEN";
    pub const NOT_FOUND: &str = "M_NOT_FOUND";
    pub const UNKNOWN_TOKEN: &str = "M_UNKNOWN_TOKEN";
    pub const ROOM_IN_USE: &str = "M_ROOM_IN_USE";
    pub const USER_DEACTIVATED: &str = "M_USER_DEACTIVATED";
    pub const LIMIT_EXCEEDED: &str = "M_LIMIT_EXCEEDED";
}
