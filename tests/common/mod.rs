//! In-process homeserver for the integration tests.
//!
//! Implements just enough of the client-server API for several clients to
//! talk to each other: password login with refresh tokens, long-polling
//! sync, rooms with aliases, `m.direct` account data, media and read
//! receipts. Every state change is appended to a single log whose length is
//! the sync cursor.

#![allow(dead_code)]

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use wata_rust::backoff::RetryPolicy;
use wata_rust::net::{HttpClient, HttpRequest, HttpResponse, Method};
use wata_rust::{Client, ClientBuilder, ClientConfig};

pub const HOMESERVER: &str = "http://hs.test";
pub const SERVER_NAME: &str = "hs.test";
const BASE_TS: i64 = 1_700_000_000_000;

enum Entry {
    Timeline {
        room_id: String,
        event: Value,
    },
    Receipt {
        room_id: String,
        event_id: String,
        user: String,
        ts: i64,
    },
    AccountData {
        user: String,
        event_type: String,
    },
}

struct Room {
    id: String,
    public: bool,
    state: BTreeMap<(String, String), Value>,
    membership_pos: HashMap<String, u64>,
}

impl Room {
    fn membership(&self, user: &str) -> Option<&str> {
        self.state
            .get(&("m.room.member".to_string(), user.to_string()))
            .and_then(|event| event["content"]["membership"].as_str())
    }
}

#[derive(Default)]
struct Inner {
    passwords: HashMap<String, String>,
    tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    rooms: BTreeMap<String, Room>,
    aliases: HashMap<String, String>,
    account_data: HashMap<(String, String), Value>,
    media: HashMap<String, (String, Vec<u8>)>,
    txns: HashMap<(String, String), String>,
    log: Vec<Entry>,
    next_id: u64,
    failing_syncs: HashMap<String, u32>,
    legacy_media_only: bool,
    requests: Vec<String>,
}

pub struct FakeHomeserver {
    inner: Mutex<Inner>,
    changed: Notify,
}

impl FakeHomeserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            changed: Notify::new(),
        })
    }

    pub fn register(&self, localpart: &str, password: &str) -> String {
        self.inner
            .lock()
            .unwrap()
            .passwords
            .insert(localpart.to_string(), password.to_string());
        user_id(localpart)
    }

    /// The next `count` sync requests of `user` fail at the transport level.
    pub fn fail_next_syncs(&self, user: &str, count: u32) {
        self.inner
            .lock()
            .unwrap()
            .failing_syncs
            .insert(user.to_string(), count);
    }

    /// Invalidates every access token of `user`. Refresh tokens stay valid.
    pub fn expire_access_tokens(&self, user: &str) {
        self.inner
            .lock()
            .unwrap()
            .tokens
            .retain(|_, owner| owner.as_str() != user);
    }

    /// Answers the authenticated media endpoint with `M_UNRECOGNIZED`.
    pub fn disable_authenticated_media(&self) {
        self.inner.lock().unwrap().legacy_media_only = true;
    }

    /// `"METHOD /path"` of every request seen, in order.
    pub fn requests(&self) -> Vec<String> {
        self.inner.lock().unwrap().requests.clone()
    }

    /// Rooms in which both users are joined or invited.
    pub fn shared_rooms(&self, a: &str, b: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .rooms
            .values()
            .filter(|room| {
                [a, b]
                    .iter()
                    .all(|user| matches!(room.membership(user), Some("join" | "invite")))
            })
            .map(|room| room.id.clone())
            .collect()
    }

    pub fn alias_target(&self, alias: &str) -> Option<String> {
        self.inner.lock().unwrap().aliases.get(alias).cloned()
    }

    pub fn receipt_count(&self, event_id: &str) -> usize {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|entry| matches!(entry, Entry::Receipt { event_id: id, .. } if id == event_id))
            .count()
    }

    /// Event ids of the voice messages in `room_id`, in timeline order.
    pub fn message_ids(&self, room_id: &str) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .log
            .iter()
            .filter_map(|entry| match entry {
                Entry::Timeline { room_id: id, event }
                    if id == room_id && event["type"] == "m.room.message" =>
                {
                    event["event_id"].as_str().map(str::to_string)
                }
                _ => None,
            })
            .collect()
    }

    pub fn client(self: &Arc<Self>) -> Arc<Client> {
        self.client_with(test_config())
    }

    pub fn client_with(self: &Arc<Self>, config: ClientConfig) -> Arc<Client> {
        ClientBuilder::new()
            .with_config(config)
            .with_shared_http_client(self.clone())
            .build()
    }

    /// Registers `localpart`, logs a fresh client in and waits for its
    /// first sync.
    pub async fn logged_in(self: &Arc<Self>, localpart: &str) -> Arc<Client> {
        self.register(localpart, "secret");
        let client = self.client();
        client.login(localpart, "secret").await.unwrap();
        client
            .wait_for_connection_state(wata_rust::ConnectionState::Syncing)
            .await
            .unwrap();
        client
    }

    async fn sync(&self, request: &HttpRequest) -> anyhow::Result<HttpResponse> {
        let query = parse_query(request.path_and_query());
        let timeout_ms: u64 = query
            .get("timeout")
            .and_then(|t| t.parse().ok())
            .unwrap_or(0);
        let since: Option<u64> = query.get("since").and_then(|s| s.parse().ok());
        let user = {
            let mut inner = self.inner.lock().unwrap();
            let Some(user) = inner.user_for(request) else {
                return unknown_token();
            };
            if let Some(left) = inner.failing_syncs.get_mut(&user)
                && *left > 0
            {
                *left -= 1;
                return Err(anyhow!("connection reset by peer"));
            }
            user
        };

        let notified = self.changed.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        let (body, has_updates) = self.inner.lock().unwrap().sync_for(&user, since);
        if has_updates || since.is_none() || timeout_ms == 0 {
            return HttpResponse::json(200, &body);
        }
        let _ = tokio::time::timeout(Duration::from_millis(timeout_ms), notified).await;
        let (body, _) = self.inner.lock().unwrap().sync_for(&user, since);
        HttpResponse::json(200, &body)
    }
}

#[async_trait]
impl HttpClient for FakeHomeserver {
    async fn execute(&self, request: HttpRequest) -> anyhow::Result<HttpResponse> {
        self.inner
            .lock()
            .unwrap()
            .requests
            .push(format!("{} {}", request.method.as_str(), request.path()));
        if request.path() == "/_matrix/client/v3/sync" {
            return self.sync(&request).await;
        }
        let response = self.inner.lock().unwrap().route(&request);
        self.changed.notify_waiters();
        response
    }
}

impl Inner {
    fn user_for(&self, request: &HttpRequest) -> Option<String> {
        let token = request
            .headers
            .get("Authorization")?
            .strip_prefix("Bearer ")?;
        self.tokens.get(token).cloned()
    }

    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn issue_tokens(&mut self, user: &str) -> (String, String) {
        let n = self.next_id();
        let access = format!("access-{n}");
        let refresh = format!("refresh-{n}");
        self.tokens.insert(access.clone(), user.to_string());
        self.refresh_tokens.insert(refresh.clone(), user.to_string());
        (access, refresh)
    }

    fn route(&mut self, request: &HttpRequest) -> anyhow::Result<HttpResponse> {
        let segments: Vec<String> = request
            .path()
            .trim_start_matches('/')
            .split('/')
            .map(|s| {
                urlencoding::decode(s)
                    .map(|decoded| decoded.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            })
            .collect();
        let segments: Vec<&str> = segments.iter().map(String::as_str).collect();
        let body: Value = request
            .body
            .as_deref()
            .and_then(|b| serde_json::from_slice(b).ok())
            .unwrap_or(Value::Null);

        match (request.method, segments.as_slice()) {
            (Method::Post, ["_matrix", "client", "v3", "login"]) => return self.login(&body),
            (Method::Post, ["_matrix", "client", "v3", "refresh"]) => return self.refresh(&body),
            _ => {}
        }
        let Some(user) = self.user_for(request) else {
            return unknown_token();
        };

        match (request.method, segments.as_slice()) {
            (Method::Post, ["_matrix", "client", "v3", "logout"]) => {
                self.tokens.retain(|_, owner| *owner != user);
                HttpResponse::json(200, &json!({}))
            }
            (Method::Get, ["_matrix", "client", "v3", "pushrules", ..]) => {
                error(404, "M_UNRECOGNIZED", "Unrecognized request")
            }
            (Method::Post, ["_matrix", "client", "v3", "createRoom"]) => {
                self.create_room(&user, &body)
            }
            (Method::Post, ["_matrix", "client", "v3", "join", target]) => self.join(&user, target),
            (Method::Post, ["_matrix", "client", "v3", "rooms", room_id, "invite"]) => {
                self.invite(&user, room_id, &body)
            }
            (Method::Get, ["_matrix", "client", "v3", "directory", "room", alias]) => {
                match self.aliases.get(*alias) {
                    Some(room_id) => HttpResponse::json(200, &json!({ "room_id": room_id })),
                    None => error(404, "M_NOT_FOUND", "Room alias not found"),
                }
            }
            (Method::Get, ["_matrix", "client", "v3", "user", owner, "account_data", kind]) => {
                if *owner != user {
                    return error(403, "M_FORBIDDEN", "Cannot read another user's account data");
                }
                match self.account_data.get(&(user.clone(), kind.to_string())) {
                    Some(content) => HttpResponse::json(200, content),
                    None => error(404, "M_NOT_FOUND", "Account data not found"),
                }
            }
            (Method::Put, ["_matrix", "client", "v3", "user", owner, "account_data", kind]) => {
                if *owner != user {
                    return error(403, "M_FORBIDDEN", "Cannot set another user's account data");
                }
                self.account_data
                    .insert((user.clone(), kind.to_string()), body);
                self.log.push(Entry::AccountData {
                    user,
                    event_type: kind.to_string(),
                });
                HttpResponse::json(200, &json!({}))
            }
            (Method::Put, ["_matrix", "client", "v3", "rooms", room_id, "send", kind, txn]) => {
                self.send(&user, room_id, kind, txn, body)
            }
            (
                Method::Post,
                ["_matrix", "client", "v3", "rooms", room_id, "receipt", _, event_id],
            ) => {
                if self.membership(room_id, &user) != Some("join") {
                    return error(403, "M_FORBIDDEN", "Not in room");
                }
                let ts = BASE_TS + self.log.len() as i64 + 1;
                self.log.push(Entry::Receipt {
                    room_id: room_id.to_string(),
                    event_id: event_id.to_string(),
                    user,
                    ts,
                });
                HttpResponse::json(200, &json!({}))
            }
            (Method::Post, ["_matrix", "media", "v3", "upload"]) => {
                let media_id = format!("media{}", self.next_id());
                let content_type = request
                    .headers
                    .get("Content-Type")
                    .cloned()
                    .unwrap_or_else(|| "application/octet-stream".into());
                let data = request.body.clone().unwrap_or_default();
                self.media.insert(media_id.clone(), (content_type, data));
                HttpResponse::json(
                    200,
                    &json!({ "content_uri": format!("mxc://{SERVER_NAME}/{media_id}") }),
                )
            }
            (Method::Get, ["_matrix", "client", "v1", "media", "download", _, media_id]) => {
                if self.legacy_media_only {
                    return error(404, "M_UNRECOGNIZED", "Unrecognized request");
                }
                self.download(media_id)
            }
            (Method::Get, ["_matrix", "media", "v3", "download", _, media_id]) => {
                self.download(media_id)
            }
            _ => error(404, "M_UNRECOGNIZED", "Unrecognized request"),
        }
    }

    fn login(&mut self, body: &Value) -> anyhow::Result<HttpResponse> {
        let name = body["identifier"]["user"].as_str().unwrap_or_default();
        let localpart = name
            .strip_prefix('@')
            .and_then(|rest| rest.split(':').next())
            .unwrap_or(name)
            .to_string();
        let password = body["password"].as_str().unwrap_or_default();
        if self.passwords.get(&localpart).map(String::as_str) != Some(password) {
            return error(403, "M_FORBIDDEN", "Invalid username or password");
        }
        let user = user_id(&localpart);
        let (access, refresh) = self.issue_tokens(&user);
        let device = format!("DEVICE{}", self.next_id());
        HttpResponse::json(
            200,
            &json!({
                "user_id": user,
                "access_token": access,
                "device_id": device,
                "refresh_token": refresh,
            }),
        )
    }

    fn refresh(&mut self, body: &Value) -> anyhow::Result<HttpResponse> {
        let token = body["refresh_token"].as_str().unwrap_or_default();
        let Some(user) = self.refresh_tokens.remove(token) else {
            return error(401, "M_UNKNOWN_TOKEN", "Unknown refresh token");
        };
        let (access, refresh) = self.issue_tokens(&user);
        HttpResponse::json(200, &json!({ "access_token": access, "refresh_token": refresh }))
    }

    fn membership(&self, room_id: &str, user: &str) -> Option<&str> {
        self.rooms.get(room_id)?.membership(user)
    }

    /// Appends an event to a room's timeline, updating state for state
    /// events. Returns the event id.
    fn append(
        &mut self,
        room_id: &str,
        sender: &str,
        kind: &str,
        state_key: Option<&str>,
        content: Value,
    ) -> String {
        let pos = self.log.len() as u64 + 1;
        let event_id = format!("$ev{pos}");
        let mut event = json!({
            "event_id": event_id,
            "type": kind,
            "sender": sender,
            "origin_server_ts": BASE_TS + pos as i64,
            "content": content,
        });
        if let Some(key) = state_key {
            event["state_key"] = json!(key);
            if let Some(room) = self.rooms.get_mut(room_id) {
                room.state
                    .insert((kind.to_string(), key.to_string()), event.clone());
                if kind == "m.room.member" {
                    room.membership_pos.insert(key.to_string(), pos);
                }
            }
        }
        self.log.push(Entry::Timeline {
            room_id: room_id.to_string(),
            event,
        });
        event_id
    }

    fn create_room(&mut self, user: &str, body: &Value) -> anyhow::Result<HttpResponse> {
        let alias = body["room_alias_name"]
            .as_str()
            .map(|localpart| format!("#{localpart}:{SERVER_NAME}"));
        if let Some(alias) = &alias
            && self.aliases.contains_key(alias)
        {
            return error(400, "M_ROOM_IN_USE", "Room alias already taken");
        }
        // Ids are scrambled so creation order says nothing about sort order.
        let n = self.next_id();
        let room_id = format!("!{:08x}:{SERVER_NAME}", n.wrapping_mul(2_654_435_761) % (1 << 32));
        self.rooms.insert(
            room_id.clone(),
            Room {
                id: room_id.clone(),
                public: body["preset"] == "public_chat",
                state: BTreeMap::new(),
                membership_pos: HashMap::new(),
            },
        );
        self.append(&room_id, user, "m.room.create", Some(""), json!({ "creator": user }));
        self.append(
            &room_id,
            user,
            "m.room.member",
            Some(user),
            json!({ "membership": "join", "displayname": localpart(user) }),
        );
        if let Some(name) = body["name"].as_str() {
            self.append(&room_id, user, "m.room.name", Some(""), json!({ "name": name }));
        }
        if let Some(alias) = alias {
            self.aliases.insert(alias.clone(), room_id.clone());
            self.append(
                &room_id,
                user,
                "m.room.canonical_alias",
                Some(""),
                json!({ "alias": alias }),
            );
        }
        let is_direct = body["is_direct"].as_bool().unwrap_or(false);
        let invites: Vec<String> = body["invite"]
            .as_array()
            .map(|list| {
                list.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        for invitee in invites {
            self.append(
                &room_id,
                user,
                "m.room.member",
                Some(&invitee),
                json!({ "membership": "invite", "is_direct": is_direct }),
            );
        }
        HttpResponse::json(200, &json!({ "room_id": room_id }))
    }

    fn join(&mut self, user: &str, target: &str) -> anyhow::Result<HttpResponse> {
        let room_id = if target.starts_with('#') {
            match self.aliases.get(target) {
                Some(room_id) => room_id.clone(),
                None => return error(404, "M_NOT_FOUND", "Room alias not found"),
            }
        } else {
            target.to_string()
        };
        let Some(room) = self.rooms.get(&room_id) else {
            return error(404, "M_NOT_FOUND", "Unknown room");
        };
        let membership = room.membership(user).map(str::to_string);
        let may_join = membership.as_deref() == Some("invite") || room.public;
        if membership.as_deref() != Some("join") {
            if !may_join {
                return error(403, "M_FORBIDDEN", "You are not invited to this room");
            }
            self.append(
                &room_id,
                user,
                "m.room.member",
                Some(user),
                json!({ "membership": "join", "displayname": localpart(user) }),
            );
        }
        HttpResponse::json(200, &json!({ "room_id": room_id }))
    }

    fn invite(&mut self, user: &str, room_id: &str, body: &Value) -> anyhow::Result<HttpResponse> {
        let invitee = body["user_id"].as_str().unwrap_or_default().to_string();
        if self.membership(room_id, user) != Some("join") {
            return error(403, "M_FORBIDDEN", "You are not in this room");
        }
        if self.membership(room_id, &invitee) == Some("join") {
            return error(403, "M_FORBIDDEN", "User is already in the room");
        }
        self.append(
            room_id,
            user,
            "m.room.member",
            Some(&invitee),
            json!({ "membership": "invite" }),
        );
        HttpResponse::json(200, &json!({}))
    }

    fn send(
        &mut self,
        user: &str,
        room_id: &str,
        kind: &str,
        txn: &str,
        content: Value,
    ) -> anyhow::Result<HttpResponse> {
        if self.membership(room_id, user) != Some("join") {
            return error(403, "M_FORBIDDEN", "You are not in this room");
        }
        let key = (user.to_string(), txn.to_string());
        if let Some(event_id) = self.txns.get(&key) {
            return HttpResponse::json(200, &json!({ "event_id": event_id }));
        }
        let event_id = self.append(room_id, user, kind, None, content);
        self.txns.insert(key, event_id.clone());
        HttpResponse::json(200, &json!({ "event_id": event_id }))
    }

    fn download(&self, media_id: &str) -> anyhow::Result<HttpResponse> {
        match self.media.get(media_id) {
            Some((_, data)) => Ok(HttpResponse {
                status_code: 200,
                body: data.clone(),
            }),
            None => error(404, "M_NOT_FOUND", "Media not found"),
        }
    }

    fn timeline_since(&self, room_id: &str, since: u64) -> Vec<Value> {
        self.log
            .iter()
            .skip(since as usize)
            .filter_map(|entry| match entry {
                Entry::Timeline { room_id: id, event } if id == room_id => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn receipts_since(&self, room_id: &str, since: u64) -> Vec<Value> {
        self.log
            .iter()
            .skip(since as usize)
            .filter_map(|entry| match entry {
                Entry::Receipt {
                    room_id: id,
                    event_id,
                    user,
                    ts,
                } if id == room_id => Some(json!({
                    "type": "m.receipt",
                    "content": { event_id.as_str(): { "m.read": { user.as_str(): { "ts": ts } } } },
                })),
                _ => None,
            })
            .collect()
    }

    /// Builds the sync response for `user`. The flag tells whether it
    /// carries anything.
    fn sync_for(&self, user: &str, since: Option<u64>) -> (Value, bool) {
        let initial = since.is_none();
        let since = since.unwrap_or(0);
        let mut join = Map::new();
        let mut invite = Map::new();
        let mut leave = Map::new();

        for room in self.rooms.values() {
            let member_pos = room.membership_pos.get(user).copied().unwrap_or(0);
            match room.membership(user) {
                Some("join") => {
                    let fresh = initial || member_pos > since;
                    let from = if fresh { 0 } else { since };
                    let timeline = self.timeline_since(&room.id, from);
                    let receipts = self.receipts_since(&room.id, from);
                    if fresh || !timeline.is_empty() || !receipts.is_empty() {
                        let state: Vec<Value> = if fresh {
                            room.state.values().cloned().collect()
                        } else {
                            Vec::new()
                        };
                        join.insert(
                            room.id.clone(),
                            json!({
                                "state": { "events": state },
                                "timeline": { "events": timeline, "limited": false },
                                "ephemeral": { "events": receipts },
                            }),
                        );
                    }
                }
                Some("invite") if initial || member_pos > since => {
                    let stripped: Vec<Value> = room
                        .state
                        .values()
                        .map(|event| {
                            json!({
                                "type": event["type"],
                                "sender": event["sender"],
                                "state_key": event["state_key"],
                                "content": event["content"],
                            })
                        })
                        .collect();
                    invite.insert(
                        room.id.clone(),
                        json!({ "invite_state": { "events": stripped } }),
                    );
                }
                Some("leave" | "ban") if !initial && member_pos > since => {
                    let own = room
                        .state
                        .get(&("m.room.member".to_string(), user.to_string()))
                        .cloned()
                        .into_iter()
                        .collect::<Vec<_>>();
                    leave.insert(
                        room.id.clone(),
                        json!({ "timeline": { "events": own, "limited": false } }),
                    );
                }
                _ => {}
            }
        }

        let mut account_types: Vec<&str> = Vec::new();
        for entry in self.log.iter().skip(if initial { 0 } else { since as usize }) {
            if let Entry::AccountData {
                user: owner,
                event_type,
            } = entry
                && owner == user
                && !account_types.contains(&event_type.as_str())
            {
                account_types.push(event_type);
            }
        }
        let account_data: Vec<Value> = account_types
            .iter()
            .filter_map(|kind| {
                self.account_data
                    .get(&(user.to_string(), kind.to_string()))
                    .map(|content| json!({ "type": kind, "content": content }))
            })
            .collect();

        let has_updates =
            !join.is_empty() || !invite.is_empty() || !leave.is_empty() || !account_data.is_empty();
        let body = json!({
            "next_batch": self.log.len().to_string(),
            "rooms": { "join": join, "invite": invite, "leave": leave },
            "account_data": { "events": account_data },
        });
        (body, has_updates)
    }
}

pub fn user_id(localpart: &str) -> String {
    format!("@{localpart}:{SERVER_NAME}")
}

fn localpart(user: &str) -> &str {
    user.trim_start_matches('@')
        .split(':')
        .next()
        .unwrap_or(user)
}

fn parse_query(path_and_query: &str) -> HashMap<String, String> {
    let Some((_, query)) = path_and_query.split_once('?') else {
        return HashMap::new();
    };
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| {
            let value = urlencoding::decode(v)
                .map(|decoded| decoded.into_owned())
                .unwrap_or_else(|_| v.to_string());
            (k.to_string(), value)
        })
        .collect()
}

fn error(status: u16, errcode: &str, message: &str) -> anyhow::Result<HttpResponse> {
    HttpResponse::json(status, &json!({ "errcode": errcode, "error": message }))
}

fn unknown_token() -> anyhow::Result<HttpResponse> {
    HttpResponse::json(
        401,
        &json!({ "errcode": "M_UNKNOWN_TOKEN", "error": "Unknown token", "soft_logout": true }),
    )
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        homeserver_url: HOMESERVER.into(),
        long_poll_timeout: Duration::from_millis(200),
        request_timeout: Duration::from_secs(2),
        wait_timeout: Duration::from_secs(5),
        backoff: RetryPolicy {
            base: Duration::from_millis(10),
            factor: 2.0,
            max: Duration::from_millis(50),
            jitter: false,
        },
        ..ClientConfig::default()
    }
}

/// Polls `check` until it returns `Some` or five seconds pass.
pub async fn eventually<T, F, Fut>(what: &str, mut check: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if let Some(value) = check().await {
            return value;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// A sine tone at the voice sample rate.
pub fn tone(seconds: f64) -> wata_rust::codec::PcmAudio {
    let rate = wata_rust::codec::VOICE_SAMPLE_RATE;
    let count = (seconds * rate as f64) as usize;
    let samples = (0..count)
        .map(|i| ((i as f64 * 0.05).sin() * 6000.0) as i16)
        .collect();
    wata_rust::codec::PcmAudio::new(samples, rate)
}
