//! Registry tests through the public handle, with real shells.
//!
//! Tests CAN use `.unwrap()` and `.expect()` - this is allowed.

mod common;

use common::test_config;
use termhub_core::{ClientId, SessionName, TermSize};
use termhubd::broadcaster::{outbound_queue, ConnectionId};
use termhubd::registry::{spawn_registry, RegistryError, RegistryHandle, RegistrySettings};

fn spawn_test_registry(max_sessions: usize) -> (RegistryHandle, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(&dir);
    config.max_sessions = max_sessions;
    (spawn_registry(RegistrySettings::from_config(&config)), dir)
}

#[tokio::test]
async fn test_create_list_delete() {
    let (registry, _dir) = spawn_test_registry(10);

    let name = registry.create_session("alpha").await.unwrap();
    assert_eq!(name.as_str(), "alpha");

    let sessions = registry.list_sessions().await;
    assert_eq!(sessions.len(), 1);
    assert!(sessions[0].alive);
    assert!(sessions[0].pid.is_some());
    assert_eq!(sessions[0].clients, 0);

    registry.delete_session(name).await.unwrap();
    assert!(registry.list_sessions().await.is_empty());
}

#[tokio::test]
async fn test_attach_returns_snapshot() {
    let (registry, _dir) = spawn_test_registry(10);
    let (tx, _rx) = outbound_queue();
    let connection = ConnectionId::new(1);
    registry.register_connection(connection, tx).await.unwrap();

    let attached = registry
        .attach(
            ClientId::new("c1"),
            "fresh",
            Some(TermSize::new(120, 40)),
            connection,
        )
        .await
        .unwrap();

    assert!(attached.created);
    assert!(attached.alive);
    assert_eq!(attached.session.as_str(), "fresh");

    let again = registry
        .attach(ClientId::new("c2"), "fresh", None, connection)
        .await
        .unwrap();
    assert!(!again.created);

    let sessions = registry.list_sessions().await;
    assert_eq!(sessions[0].clients, 2);
    assert_eq!((sessions[0].cols, sessions[0].rows), (120, 40));
}

#[tokio::test]
async fn test_detach_reports_binding() {
    let (registry, _dir) = spawn_test_registry(10);
    let connection = ConnectionId::new(1);

    registry
        .attach(ClientId::new("c1"), "s", None, connection)
        .await
        .unwrap();

    assert!(registry.detach(ClientId::new("c1")).await.unwrap());
    assert!(!registry.detach(ClientId::new("c1")).await.unwrap());
}

#[tokio::test]
async fn test_rename_then_lookup() {
    let (registry, _dir) = spawn_test_registry(10);
    registry.create_session("before").await.unwrap();

    let renamed = registry
        .rename_session(SessionName::new("before"), "after")
        .await
        .unwrap();
    assert_eq!(renamed.as_str(), "after");

    let err = registry
        .delete_session(SessionName::new("before"))
        .await
        .unwrap_err();
    assert!(matches!(err, RegistryError::SessionNotFound(_)));
    registry
        .delete_session(SessionName::new("after"))
        .await
        .unwrap();
}

#[tokio::test]
async fn test_concurrent_creates_respect_cap() {
    let (registry, _dir) = spawn_test_registry(3);

    let mut tasks = Vec::new();
    for i in 0..8 {
        let registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            registry.create_session(format!("s{i}")).await
        }));
    }

    let mut created = 0;
    let mut refused = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(RegistryError::RegistryFull { max }) => {
                assert_eq!(max, 3);
                refused += 1;
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    assert_eq!(created, 3);
    assert_eq!(refused, 5);
    assert_eq!(registry.list_sessions().await.len(), 3);
}

#[tokio::test]
async fn test_shutdown_reports_killed_sessions() {
    let (registry, _dir) = spawn_test_registry(10);
    registry.create_session("one").await.unwrap();
    registry.create_session("two").await.unwrap();

    assert_eq!(registry.shutdown().await.unwrap(), 2);
    assert!(registry.list_sessions().await.iter().all(|s| !s.alive));
}
