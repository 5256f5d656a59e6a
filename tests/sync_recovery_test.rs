mod common;

use common::{FakeHomeserver, eventually, tone, user_id};
use std::time::Duration;
use tokio::sync::broadcast;
use wata_rust::ConnectionState;
use wata_rust::types::Conversation;

/// Collects connection states until `last` shows up.
async fn states_until(
    rx: &mut broadcast::Receiver<ConnectionState>,
    last: ConnectionState,
) -> Vec<ConnectionState> {
    let mut seen = Vec::new();
    let finished = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let state = rx.recv().await.unwrap();
            seen.push(state);
            if state == last {
                break;
            }
        }
    })
    .await;
    assert!(finished.is_ok(), "no {last} state, saw {seen:?}");
    seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_sync_moves_from_connecting_to_syncing() {
    let server = FakeHomeserver::new();
    server.register("alice", "secret");
    let alice = server.client();
    let mut states = alice.event_bus.connection_state.subscribe();
    assert_eq!(alice.connection_state(), ConnectionState::Offline);

    alice.login("alice", "secret").await.unwrap();
    let seen = states_until(&mut states, ConnectionState::Syncing).await;
    assert_eq!(seen, vec![ConnectionState::Connecting, ConnectionState::Syncing]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn two_failed_polls_surface_one_error_and_recover() {
    let server = FakeHomeserver::new();
    let alice = server.logged_in("alice").await;
    let bob = server.logged_in("bob").await;

    let direct = alice.get_or_create_direct(&user_id("bob")).await.unwrap();
    let before = alice
        .send_voice_message(&Conversation::Direct(direct.clone()), tone(0.5))
        .await
        .unwrap();
    bob.wait_for_message(&before).await.unwrap();

    let mut states = bob.event_bus.connection_state.subscribe();
    server.fail_next_syncs(&user_id("bob"), 2);
    let seen = states_until(&mut states, ConnectionState::Syncing).await;
    assert_eq!(
        seen,
        vec![
            ConnectionState::Error,
            ConnectionState::Connecting,
            ConnectionState::Syncing
        ]
    );

    // Folded data survives the outage and the cursor picks up where it was.
    let kept = bob.wait_for_message(&before).await.unwrap();
    assert_eq!(kept.id, before);
    let after = alice
        .send_voice_message(&Conversation::Direct(direct), tone(0.5))
        .await
        .unwrap();
    bob.wait_for_message(&after).await.unwrap();
    let conversation = bob
        .conversation_for_room(&kept.room_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bob.messages(&conversation).await.unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn expired_token_is_refreshed_without_an_error_state() {
    let server = FakeHomeserver::new();
    let alice = server.logged_in("alice").await;
    let bob = server.logged_in("bob").await;
    let old_token = bob.session().await.unwrap().access_token;
    let mut states = bob.event_bus.connection_state.subscribe();

    server.expire_access_tokens(&user_id("bob"));
    let bob_ref = &bob;
    let old = old_token.as_str();
    eventually("bob to refresh the token", || async move {
        bob_ref
            .session()
            .await
            .filter(|session| session.access_token != old)
    })
    .await;
    let direct = alice.get_or_create_direct(&user_id("bob")).await.unwrap();
    let event_id = alice
        .send_voice_message(&Conversation::Direct(direct), tone(0.5))
        .await
        .unwrap();
    bob.wait_for_message(&event_id).await.unwrap();

    let renewed = bob.session().await.unwrap();
    assert_ne!(renewed.access_token, old_token);
    assert_eq!(bob.connection_state(), ConnectionState::Syncing);
    assert!(matches!(
        states.try_recv(),
        Err(broadcast::error::TryRecvError::Empty)
    ));
    assert!(server.requests().iter().any(|r| r == "POST /_matrix/client/v3/refresh"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn push_rules_are_answered_without_the_server() {
    let server = FakeHomeserver::new();
    let _alice = server.logged_in("alice").await;
    assert!(!server.requests().iter().any(|r| r.contains("pushrules")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_goes_offline_and_stops_polling() {
    let server = FakeHomeserver::new();
    let alice = server.logged_in("alice").await;

    alice.shutdown().await;
    assert_eq!(alice.connection_state(), ConnectionState::Offline);
    let count = server.requests().len();
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(server.requests().len(), count);
    // Local state is kept after a shutdown.
    assert!(alice.with_state(|state| state.next_batch().is_some()).await.unwrap());
}
