//! Operational failures, session invalidation and the error feed.

use entimap_core::{Config, CoreError, EntityState, MemoryStore, Operation};
use entimap_testkit::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn faulty_session() -> (entimap_core::Session, Arc<FaultyStore>) {
    init_tracing();
    let store = Arc::new(FaultyStore::new());
    let session = factory(store.clone(), Config::default()).create_session();
    (session, store)
}

#[tokio::test]
async fn failed_flush_invalidates_until_clear() {
    let (session, store) = faulty_session();
    session.save(&person("Ada")).await.unwrap();

    store.fail_next_write();
    let err = session.flush().await.unwrap_err();
    assert!(matches!(err, CoreError::Store { .. }));
    assert!(!session.is_valid());
    assert_eq!(session.stats().task_errors, 1);

    let bob = person("Bob");
    let err = session.save(&bob).await.unwrap_err();
    assert!(matches!(err, CoreError::InvalidSession { .. }));
    assert_eq!(session.state_of(&bob), EntityState::New);

    session.clear().await.unwrap();
    assert!(session.is_valid());
    assert!(session.is_empty());
    session.save(&bob).await.unwrap();
    session.flush().await.unwrap();
    assert_eq!(store.inner().len("people"), 1);
}

#[tokio::test]
async fn failed_read_invalidates_the_session() {
    let (session, store) = faulty_session();
    let ada = person("Ada");
    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();
    let id = ada.read().id.unwrap();

    let other = factory(store.clone(), Config::default()).create_session();
    store.fail_reads(true);
    let err = other.find::<Person>(id).await.unwrap_err();
    assert!(matches!(err, CoreError::Store { .. }));
    assert!(!other.is_valid());
    assert!(session.is_valid());
}

#[tokio::test]
async fn usage_errors_leave_the_session_valid() {
    let (session, _store) = faulty_session();
    let ada = person("Ada");
    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();
    session.detach(&ada).await.unwrap();

    assert!(session.save(&ada).await.is_err());
    assert!(session.refresh(&person("Bob")).await.is_err());
    assert!(session.is_valid());
    assert_eq!(session.stats().task_errors, 0);
}

#[tokio::test]
async fn version_conflicts_fail_the_flush() {
    init_tracing();
    let store = Arc::new(MemoryStore::new());
    let sessions = factory(store.clone(), Config::default());
    let ours = sessions.create_session();
    let theirs = sessions.create_session();

    let acme = company("Acme");
    ours.save(&acme).await.unwrap();
    ours.flush().await.unwrap();
    let id = acme.read().id.unwrap();

    let copy = theirs.find::<Company>(id).await.unwrap().unwrap();
    copy.write().name = "Acme Holdings".to_string();
    theirs.flush().await.unwrap();

    acme.write().name = "Acme Corp".to_string();
    let err = ours.flush().await.unwrap_err();
    assert!(matches!(err, CoreError::BulkWriteMismatch { .. }));
    assert!(!ours.is_valid());

    let stored = store.document("companies", id).unwrap().unwrap();
    assert_eq!(
        stored.get("name").and_then(entimap_codec::Value::as_text),
        Some("Acme Holdings")
    );
}

#[tokio::test]
async fn unobserved_failures_surface_on_a_later_awaited_operation() {
    let (session, store) = faulty_session();
    let errors = session.subscribe_errors();
    session.save(&person("Ada")).await.unwrap();

    store.fail_next_write();
    session.flush().detach();
    let err = session.wait().await.unwrap_err();
    assert!(matches!(err, CoreError::Store { .. }));
    assert!(!session.is_valid());
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn unobserved_failures_reach_the_error_feed() {
    let (session, store) = faulty_session();
    let errors = session.subscribe_errors();
    session.save(&person("Ada")).await.unwrap();

    store.fail_next_write();
    session.flush().detach();
    let event = tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if let Ok(event) = errors.try_recv() {
                break event;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(event.operation, Operation::FLUSH);
    assert!(matches!(event.error, CoreError::Store { .. }));
    assert_eq!(event.sequence, 1);
    assert!(!session.is_valid());
}

#[tokio::test]
async fn observed_failures_stay_off_the_error_feed() {
    let (session, store) = faulty_session();
    let errors = session.subscribe_errors();
    session.save(&person("Ada")).await.unwrap();

    store.fail_next_write();
    assert!(session.flush().await.is_err());
    assert!(errors.try_recv().is_err());
}

#[tokio::test]
async fn operations_queued_behind_close_are_abandoned() {
    let (session, store) = faulty_session();
    session.save(&person("Ada")).await.unwrap();

    let closing = session.close();
    let late = session.save(&person("Bob"));
    closing.await.unwrap();
    assert!(matches!(late.await, Err(CoreError::TaskAbandoned)));
    assert_eq!(store.inner().len("people"), 1);

    let err = session.flush().await.unwrap_err();
    assert!(matches!(err, CoreError::SessionClosed));
}

#[tokio::test]
async fn failed_close_still_clears_the_session() {
    let (session, store) = faulty_session();
    session.save(&person("Ada")).await.unwrap();

    store.fail_next_write();
    let err = session.close().await.unwrap_err();
    assert!(matches!(err, CoreError::Store { .. }));
    assert!(session.is_closed());
    assert!(session.is_empty());
}
