//! Unit tests for `WsManager` and `SessionOutbox`.
//!
//! These tests exercise the connection registry directly, without
//! performing any HTTP upgrades.

use aihub_api::ws::manager::SessionOutbox;
use aihub_api::ws::messages::ServerMessage;
use aihub_api::ws::WsManager;
use aihub_core::types::SessionId;
use axum::extract::ws::Message;

// ---------------------------------------------------------------------------
// Test: new manager starts with zero connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn new_manager_has_zero_connections() {
    let manager = WsManager::new();

    assert_eq!(manager.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: add() and remove() adjust the connection count
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_and_remove_adjust_connection_count() {
    let manager = WsManager::new();
    let id = SessionId::new_v4();

    let (_outbox, _rx) = manager.add(id).await;
    assert_eq!(manager.connection_count().await, 1);

    manager.remove(id).await;
    assert_eq!(manager.connection_count().await, 0);
}

// ---------------------------------------------------------------------------
// Test: remove() with unknown ID is a no-op
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_unknown_id_is_noop() {
    let manager = WsManager::new();

    let (_outbox, _rx) = manager.add(SessionId::new_v4()).await;
    manager.remove(SessionId::new_v4()).await;

    assert_eq!(manager.connection_count().await, 1);
}

// ---------------------------------------------------------------------------
// Test: the returned outbox is bound to the session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn outbox_delivers_serialized_messages() {
    let manager = WsManager::new();
    let id = SessionId::new_v4();

    let (outbox, mut rx) = manager.add(id).await;
    assert_eq!(outbox.session_id(), id);
    assert!(outbox.send(&ServerMessage::error("Unknown request type")));

    let outbound = rx.recv().await.expect("rx should receive the message");
    assert_eq!(outbound.frames.len(), 1);
    assert!(outbound.receipt.is_none());
    let Message::Text(text) = &outbound.frames[0] else {
        panic!("Expected a text frame, got: {:?}", outbound.frames[0]);
    };
    assert_eq!(
        text.as_str(),
        r#"{"type":"ERROR","message":"Unknown request type"}"#
    );
}

// ---------------------------------------------------------------------------
// Test: sending to a departed session reports failure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn send_after_receiver_dropped_returns_false() {
    let (outbox, rx) = SessionOutbox::channel(SessionId::new_v4());
    drop(rx);

    assert!(!outbox.send(&ServerMessage::error("gone")));
}

// ---------------------------------------------------------------------------
// Test: ping_all() reaches every connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ping_all_sends_ping_to_all_connections() {
    let manager = WsManager::new();

    let (_o1, mut rx1) = manager.add(SessionId::new_v4()).await;
    let (_o2, mut rx2) = manager.add(SessionId::new_v4()).await;

    assert_eq!(manager.ping_all().await, 2);

    for rx in [&mut rx1, &mut rx2] {
        let outbound = rx.recv().await.expect("rx should receive Ping");
        assert!(
            matches!(outbound.frames.as_slice(), [Message::Ping(_)]),
            "Expected Ping, got: {:?}",
            outbound.frames
        );
    }
}

// ---------------------------------------------------------------------------
// Test: shutdown_all() sends Close and clears all connections
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_all_sends_close_and_clears() {
    let manager = WsManager::new();

    let (o1, mut rx1) = manager.add(SessionId::new_v4()).await;
    let (_o2, mut rx2) = manager.add(SessionId::new_v4()).await;
    assert_eq!(manager.connection_count().await, 2);

    manager.shutdown_all().await;

    assert_eq!(manager.connection_count().await, 0);

    for rx in [&mut rx1, &mut rx2] {
        let outbound = rx.recv().await.expect("rx should receive Close");
        assert!(
            matches!(outbound.frames.as_slice(), [Message::Close(None)]),
            "Expected Close(None), got: {:?}",
            outbound.frames
        );
    }

    // The handler still holds its own outbox clone, so the channel stays
    // open until the session ends.
    drop(o1);
    assert!(
        rx1.recv().await.is_none(),
        "Channel should be closed once every sender is gone"
    );
}
