use crate::auth::{self, AuthError};
use crate::config::ClientConfig;
use crate::request::ApiError;
use crate::store::{CredentialStore, StoreError};
use crate::types::events::EventBus;
use dashmap::DashMap;
use log::{info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify, RwLock, watch};
use tokio::task::JoinHandle;
use watacore::codec::VoiceCodec;
use watacore::net::HttpClient;
use watacore::resolver::PrimaryRoomPolicy;
use watacore::session::{ConnectionState, Session};
use watacore::sync::{RoomSnapshot, SyncState};
use watacore::types::ids::room_alias;
use watacore::types::{RoomId, UserId, ValidationError, VoiceMessage};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not logged in")]
    NotLoggedIn,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
}

/// A logged-in (or not yet logged-in) voice messenger client.
///
/// Build one with [`crate::ClientBuilder`]. Room state is only ever written
/// by the sync task; every other operation reads snapshots of it and, after a
/// write to the server, waits until the effect comes back through sync.
pub struct Client {
    pub(crate) config: ClientConfig,
    pub(crate) http_client: Arc<dyn HttpClient>,
    pub(crate) credential_store: Arc<dyn CredentialStore>,
    pub(crate) codec: Arc<dyn VoiceCodec>,
    pub(crate) primary_policy: Arc<dyn PrimaryRoomPolicy>,

    pub(crate) session: RwLock<Option<Session>>,
    pub(crate) sync_state: RwLock<Option<SyncState>>,
    pub(crate) family_room_id: RwLock<Option<RoomId>>,

    pub(crate) connection_state: watch::Sender<ConnectionState>,
    /// Bumped after every fold so waiters can re-check the state.
    pub(crate) fold_generation: watch::Sender<u64>,

    pub(crate) sync_task: Mutex<Option<JoinHandle<()>>>,
    pub(crate) sync_generation: AtomicU64,
    pub(crate) shutdown_notifier: Notify,

    pub(crate) family_lock: Mutex<()>,
    pub(crate) direct_account_data_lock: Mutex<()>,
    pub(crate) direct_creation_locks: DashMap<UserId, Arc<Mutex<()>>>,
    pub(crate) room_send_locks: DashMap<RoomId, Arc<Mutex<()>>>,

    pub(crate) unique_id: String,
    pub(crate) txn_counter: AtomicU64,

    pub event_bus: EventBus,
}

impl Client {
    pub(crate) fn new(
        config: ClientConfig,
        http_client: Arc<dyn HttpClient>,
        credential_store: Arc<dyn CredentialStore>,
        codec: Arc<dyn VoiceCodec>,
        primary_policy: Arc<dyn PrimaryRoomPolicy>,
    ) -> Self {
        let unique_id = format!("wata{}", rand::random::<u32>());
        Self {
            config,
            http_client,
            credential_store,
            codec,
            primary_policy,
            session: RwLock::new(None),
            sync_state: RwLock::new(None),
            family_room_id: RwLock::new(None),
            connection_state: watch::Sender::new(ConnectionState::Offline),
            fold_generation: watch::Sender::new(0),
            sync_task: Mutex::new(None),
            sync_generation: AtomicU64::new(0),
            shutdown_notifier: Notify::new(),
            family_lock: Mutex::new(()),
            direct_account_data_lock: Mutex::new(()),
            direct_creation_locks: DashMap::new(),
            room_send_locks: DashMap::new(),
            unique_id,
            txn_counter: AtomicU64::new(0),
            event_bus: EventBus::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    pub async fn own_user_id(&self) -> Result<UserId, ClientError> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.user_id.clone())
            .ok_or(ClientError::NotLoggedIn)
    }

    pub(crate) async fn access_token(&self) -> Result<String, ClientError> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|session| session.access_token.clone())
            .ok_or(ClientError::NotLoggedIn)
    }

    /// Base URL of the homeserver the session lives on.
    pub async fn homeserver_url(&self) -> String {
        match self.session.read().await.as_ref() {
            Some(session) => session.homeserver_url.clone(),
            None => self.config.homeserver_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection_state.borrow()
    }

    /// Latest-value view of the connection state. Use the event bus to see
    /// every transition.
    pub fn watch_connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection_state.subscribe()
    }

    pub(crate) fn set_connection_state(&self, state: ConnectionState) {
        let changed = self.connection_state.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            info!(target: "Client/Sync", "Connection state -> {state}");
            let _ = self.event_bus.connection_state.send(state);
        }
    }

    /// Like [`Self::set_connection_state`] but ignored once the sync task
    /// that asks for it has been superseded.
    pub(crate) fn set_connection_state_for(&self, generation: u64, state: ConnectionState) {
        let changed = self.connection_state.send_if_modified(|current| {
            if !self.is_current_sync(generation) || *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            info!(target: "Client/Sync", "Connection state -> {state}");
            let _ = self.event_bus.connection_state.send(state);
        }
    }

    pub(crate) fn is_current_sync(&self, generation: u64) -> bool {
        self.sync_generation.load(Ordering::SeqCst) == generation
    }

    /// Logs in with a password, persists the session and starts syncing.
    pub async fn login(
        self: &Arc<Self>,
        username: &str,
        password: &str,
    ) -> Result<Session, ClientError> {
        let session = auth::login(
            self.http_client.as_ref(),
            &self.config.homeserver_url,
            username,
            password,
            self.config.device_display_name.as_deref(),
            self.config.login_timeout,
        )
        .await
        .map_err(|e| match e {
            AuthError::Timeout(_) => ClientError::Timeout("login"),
            other => ClientError::Auth(other),
        })?;
        self.credential_store
            .store(&session.user_id, &session)
            .await?;
        self.start_session(session.clone()).await;
        Ok(session)
    }

    /// Resumes the stored session of `user_id`, if there is one. Whether the
    /// token is still valid only shows once the first sync runs.
    pub async fn restore_session(
        self: &Arc<Self>,
        user_id: &str,
    ) -> Result<Option<Session>, ClientError> {
        let user_id = UserId::parse(user_id)?;
        let Some(stored) = self.credential_store.retrieve(&user_id).await? else {
            return Ok(None);
        };
        let session = auth::restore_session(stored)?;
        self.start_session(session.clone()).await;
        Ok(Some(session))
    }

    async fn start_session(self: &Arc<Self>, session: Session) {
        self.stop_sync().await;
        let family_alias = room_alias(
            &self.config.family_alias_localpart,
            session.user_id.server_name(),
        );
        let state = SyncState::new(session.user_id.clone(), &session.homeserver_url, family_alias);
        *self.sync_state.write().await = Some(state);
        *self.family_room_id.write().await = None;
        *self.session.write().await = Some(session);
        self.start_sync_loop().await;
    }

    /// Ends the session on the server and drops every bit of local state.
    pub async fn logout(&self) -> Result<(), ClientError> {
        self.stop_sync().await;
        let Some(session) = self.session.write().await.take() else {
            return Ok(());
        };
        if let Err(e) =
            auth::logout(self.http_client.as_ref(), &session, self.config.request_timeout).await
        {
            warn!(target: "Client/Auth", "Server-side logout failed, clearing locally: {e}");
        }
        *self.sync_state.write().await = None;
        *self.family_room_id.write().await = None;
        self.credential_store.clear(&session.user_id).await?;
        info!(target: "Client/Auth", "Logged out {}", session.user_id);
        Ok(())
    }

    /// Stops the sync task and waits for it to exit, cancelling any request
    /// in flight. The session and folded state are kept. The transport is
    /// owned by the client and is closed when the last handle is dropped.
    pub async fn shutdown(&self) {
        self.stop_sync().await;
    }

    /// Swaps in a renewed session, then writes it to the credential store.
    pub(crate) async fn persist_session(&self, session: Session) -> Result<(), ClientError> {
        *self.session.write().await = Some(session.clone());
        self.credential_store
            .store(&session.user_id, &session)
            .await?;
        Ok(())
    }

    /// Runs `f` against the current folded state.
    pub async fn with_state<T>(&self, f: impl FnOnce(&SyncState) -> T) -> Result<T, ClientError> {
        let guard = self.sync_state.read().await;
        guard.as_ref().map(f).ok_or(ClientError::NotLoggedIn)
    }

    pub async fn room_snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        self.with_state(|state| state.room(room_id).cloned())
            .await
            .ok()
            .flatten()
    }

    /// Re-evaluates `check` after every fold until it yields a value or
    /// `limit` passes.
    pub async fn wait_for_state<T>(
        &self,
        what: &'static str,
        limit: Duration,
        mut check: impl FnMut(&SyncState) -> Option<T>,
    ) -> Result<T, ClientError> {
        let mut folds = self.fold_generation.subscribe();
        let wait = async {
            loop {
                if let Some(value) = self.with_state(&mut check).await? {
                    return Ok(value);
                }
                if folds.changed().await.is_err() {
                    return Err(ClientError::NotLoggedIn);
                }
            }
        };
        tokio::time::timeout(limit, wait)
            .await
            .map_err(|_| ClientError::Timeout(what))?
    }

    /// Waits until the voice message `event_id` has been folded.
    pub async fn wait_for_message(&self, event_id: &str) -> Result<VoiceMessage, ClientError> {
        self.wait_for_state("voice message", self.config.wait_timeout, |state| {
            state.message(event_id).cloned()
        })
        .await
    }

    pub async fn wait_for_connection_state(
        &self,
        target: ConnectionState,
    ) -> Result<(), ClientError> {
        let mut rx = self.connection_state.subscribe();
        tokio::time::timeout(self.config.wait_timeout, rx.wait_for(|state| *state == target))
            .await
            .map_err(|_| ClientError::Timeout("connection state"))?
            .map(|_| ())
            .map_err(|_| ClientError::NotLoggedIn)
    }

    pub(crate) async fn remembered_family_room(&self) -> Option<RoomId> {
        self.family_room_id.read().await.clone()
    }
}
