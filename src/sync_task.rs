use crate::auth;
use crate::client::{Client, ClientError};
use crate::request::{ApiError, parse_json};
use crate::types::events::{MessagePlayed, MessageReceived};
use log::{debug, info, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use watacore::api;
use watacore::net::HttpRequest;
use watacore::resolver;
use watacore::session::ConnectionState;
use watacore::sync::{FoldOutcome, InviteInfo, SyncResponse, SyncState};
use watacore::types::{Contact, FamilyConversation};

/// Events produced by one fold, sent once the state lock is released.
enum Derived {
    Received(MessageReceived),
    Played(MessagePlayed),
    Family(FamilyConversation),
    Contacts(Vec<Contact>),
}

impl Client {
    pub(crate) async fn start_sync_loop(self: &Arc<Self>) {
        let generation = self.sync_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let client = Arc::clone(self);
        let handle = tokio::spawn(async move { client.run_sync_loop(generation).await });
        *self.sync_task.lock().await = Some(handle);
    }

    /// Stops the sync task and moves to `Offline`. Any fold still running
    /// from the old task is discarded.
    pub(crate) async fn stop_sync(&self) {
        self.sync_generation.fetch_add(1, Ordering::SeqCst);
        self.shutdown_notifier.notify_waiters();
        let handle = self.sync_task.lock().await.take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
        self.set_connection_state(ConnectionState::Offline);
    }

    async fn run_sync_loop(self: Arc<Self>, generation: u64) {
        self.set_connection_state_for(generation, ConnectionState::Connecting);
        let mut established = false;
        // Retry count of the current outage; `None` while healthy.
        let mut outage: Option<u32> = None;
        // A renewed token gets one immediate retry; a second token failure
        // takes the backoff path.
        let mut renewed = false;

        while self.is_current_sync(generation) {
            let result = if established {
                self.poll_once(generation).await
            } else {
                self.catch_up(generation).await
            };

            let err = match result {
                Ok(()) => {
                    renewed = false;
                    if !established {
                        established = true;
                        if let Some(attempts) = outage.take() {
                            info!(target: "Client/Sync", "Sync restored after {} retries", attempts + 1);
                        }
                        self.set_connection_state_for(generation, ConnectionState::Syncing);
                    }
                    continue;
                }
                Err(err) => err,
            };

            if !renewed && self.try_renew_session(&err).await {
                renewed = true;
                continue;
            }

            established = false;
            let attempt = match outage {
                None => {
                    warn!(target: "Client/Sync", "Sync failed: {err}");
                    self.set_connection_state_for(generation, ConnectionState::Error);
                    0
                }
                Some(previous) => {
                    debug!(target: "Client/Sync", "Reconnect attempt {} failed: {err}", previous + 1);
                    previous + 1
                }
            };
            outage = Some(attempt);

            let delay = self.config.backoff.delay_for_attempt(attempt);
            debug!(target: "Client/Sync", "Retrying sync in {delay:?}");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Client/Sync", "Shutdown requested during backoff");
                    return;
                }
            }
            renewed = false;
            self.set_connection_state_for(generation, ConnectionState::Connecting);
        }
        debug!(target: "Client/Sync", "Sync task {generation} superseded, exiting");
    }

    /// First sync of a session, or the catch-up after an outage. Without a
    /// cursor it requests a bounded history; with one it resumes from it.
    async fn catch_up(self: &Arc<Self>, generation: u64) -> Result<(), ClientError> {
        let since = self
            .with_state(|state| state.next_batch().map(str::to_string))
            .await?;
        let initial = since.is_none();
        if initial {
            self.fetch_push_rules().await;
        }
        let filter = initial.then(|| api::timeline_limit_filter(self.config.initial_timeline_limit));
        let response = self
            .fetch_sync(
                since.as_deref(),
                Duration::ZERO,
                filter.as_deref(),
                self.config.request_timeout,
            )
            .await?;
        self.apply_sync(generation, response, !initial).await
    }

    async fn poll_once(self: &Arc<Self>, generation: u64) -> Result<(), ClientError> {
        let since = self
            .with_state(|state| state.next_batch().map(str::to_string))
            .await?;
        let response = self
            .fetch_sync(
                since.as_deref(),
                self.config.long_poll_timeout,
                None,
                self.config.sync_request_timeout(),
            )
            .await?;
        self.apply_sync(generation, response, true).await
    }

    async fn fetch_sync(
        &self,
        since: Option<&str>,
        poll: Duration,
        filter: Option<&str>,
        limit: Duration,
    ) -> Result<SyncResponse, ClientError> {
        let url = api::sync_url(&self.homeserver_url().await, since, poll, filter);
        let response = self
            .send_request(HttpRequest::get(url).with_timeout(limit))
            .await?;
        Ok(parse_json(&response)?)
    }

    /// Push rules are requested once per session; servers that lack them
    /// are covered by the transport shim.
    async fn fetch_push_rules(&self) {
        let url = api::push_rules_url(&self.homeserver_url().await);
        match self.send_request(HttpRequest::get(url)).await {
            Ok(_) => debug!(target: "Client/Sync", "Push rules loaded"),
            Err(e) => debug!(target: "Client/Sync", "Push rules unavailable: {e}"),
        }
    }

    async fn apply_sync(
        self: &Arc<Self>,
        generation: u64,
        response: SyncResponse,
        live: bool,
    ) -> Result<(), ClientError> {
        let family_hint = self.remembered_family_room().await;
        let (derived, invites) = {
            let mut guard = self.sync_state.write().await;
            if !self.is_current_sync(generation) {
                return Ok(());
            }
            let state = guard.as_mut().ok_or(ClientError::NotLoggedIn)?;
            let outcome = state.fold(&response);
            let derived = self.derive_events(state, &outcome, live, family_hint.as_deref());
            (derived, outcome.new_invites)
        };
        self.fold_generation.send_modify(|folds| *folds += 1);

        for event in derived {
            self.dispatch(event);
        }
        if self.config.auto_join_invites {
            for invite in invites {
                let client = Arc::clone(self);
                tokio::spawn(async move { client.accept_invite(invite).await });
            }
        }
        Ok(())
    }

    fn derive_events(
        &self,
        state: &SyncState,
        outcome: &FoldOutcome,
        live: bool,
        family_hint: Option<&str>,
    ) -> Vec<Derived> {
        let policy = self.primary_policy.as_ref();
        let family_room = state
            .family_room()
            .map(|room| room.room_id.as_str())
            .or(family_hint);
        let mut derived = Vec::new();

        // The first fold only builds state; history is not replayed as events.
        if live {
            for message in &outcome.new_messages {
                match resolver::conversation_for_room(state, &message.room_id, family_room, policy) {
                    Some(conversation) => derived.push(Derived::Received(MessageReceived {
                        message: message.clone(),
                        conversation,
                    })),
                    None => debug!(
                        target: "Client/Sync",
                        "Voice message {} in {} belongs to no conversation",
                        message.id, message.room_id
                    ),
                }
            }
            for (message, room_id) in &outcome.played {
                derived.push(Derived::Played(MessagePlayed {
                    message: message.clone(),
                    room_id: room_id.clone(),
                }));
            }
        }

        if let Some(family_id) = family_room
            && (!live || outcome.membership_changed.contains(family_id))
        {
            derived.push(Derived::Family(resolver::family_conversation(state, family_id)));
        }

        let contacts_changed = !live
            || outcome.direct_changed
            || outcome
                .membership_changed
                .iter()
                .any(|room_id| Some(room_id.as_str()) != family_room);
        if contacts_changed {
            let contacts = resolver::direct_conversations(state, policy)
                .into_iter()
                .map(|conversation| conversation.contact)
                .collect();
            derived.push(Derived::Contacts(contacts));
        }
        derived
    }

    fn dispatch(&self, event: Derived) {
        // Sends only fail when nobody is subscribed.
        let bus = &self.event_bus;
        match event {
            Derived::Received(event) => {
                let _ = bus.message_received.send(Arc::new(event));
            }
            Derived::Played(event) => {
                let _ = bus.message_played.send(Arc::new(event));
            }
            Derived::Family(family) => {
                let _ = bus.family_updated.send(Arc::new(family));
            }
            Derived::Contacts(contacts) => {
                let _ = bus.contacts_updated.send(Arc::new(contacts));
            }
        }
    }

    async fn accept_invite(self: Arc<Self>, invite: InviteInfo) {
        info!(
            target: "Client/Sync",
            "Joining {} (invited by {:?}, direct: {})",
            invite.room_id, invite.inviter, invite.is_direct
        );
        if let Err(e) = self.join_room(&invite.room_id).await {
            warn!(target: "Client/Sync", "Failed to join {}: {e}", invite.room_id);
            return;
        }
        if let (true, Some(inviter)) = (invite.is_direct, invite.inviter.as_ref()) {
            if let Err(e) = self.mark_direct(inviter, &invite.room_id).await {
                warn!(target: "Client/Sync", "Failed to mark {} as direct: {e}", invite.room_id);
            }
        }
    }

    /// Handles an expired access token by refreshing it. Returns whether the
    /// failed request is worth repeating straight away.
    async fn try_renew_session(&self, err: &ClientError) -> bool {
        let ClientError::Api(api_err @ ApiError::Status { soft_logout, .. }) = err else {
            return false;
        };
        if !api_err.is_unknown_token() || !*soft_logout {
            return false;
        }
        let Some(session) = self.session().await else {
            return false;
        };
        if !session.can_refresh() {
            warn!(target: "Client/Auth", "Access token expired and no refresh token is available");
            return false;
        }
        match auth::refresh(self.http_client.as_ref(), &session, self.config.login_timeout).await {
            Ok(renewed) => {
                if let Err(e) = self.persist_session(renewed).await {
                    warn!(target: "Client/Auth", "Could not persist refreshed session: {e}");
                }
                true
            }
            Err(e) => {
                warn!(target: "Client/Auth", "Token refresh failed: {e}");
                false
            }
        }
    }
}
