//! Change tracking policies and the writes they produce.

use entimap_codec::Value;
use entimap_core::{ChangeTracking, Config, CoreError, EntityState, Update, WriteOp};
use entimap_testkit::prelude::*;
use std::sync::Arc;

fn recording_session(config: Config) -> (entimap_core::Session, Arc<RecordingStore>) {
    init_tracing();
    let store = Arc::new(RecordingStore::new());
    let session = factory(store.clone(), config).create_session();
    (session, store)
}

#[tokio::test]
async fn unchanged_entities_are_not_written() {
    let (session, store) = recording_session(Config::default());
    let ada = person("Ada");
    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();

    // Implicit tracking schedules a dirty check right after the flush.
    assert_eq!(session.pending(), 1);
    store.reset();
    session.flush().await.unwrap();

    assert_eq!(store.op_count(), 0);
    assert_eq!(session.stats().skipped_dirty_checks, 1);
}

#[tokio::test]
async fn implicit_tracking_writes_a_field_update() {
    let (session, store) = recording_session(Config::default());
    let ada = person("Ada");
    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();
    let id = ada.read().id.unwrap();

    ada.write().name = "Ada Lovelace".to_string();
    store.reset();
    session.flush().await.unwrap();

    let writes = store.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(
        writes[0].ops,
        vec![WriteOp::Update {
            id,
            update: Update {
                set: vec![("name".to_string(), Value::from("Ada Lovelace"))],
                unset: Vec::new(),
            },
        }]
    );
    let doc = store.inner().document("people", id).unwrap().unwrap();
    assert_eq!(doc.get("name"), Some(&Value::from("Ada Lovelace")));
}

#[tokio::test]
async fn versioned_entities_are_replaced_with_a_bumped_version() {
    let (session, store) = recording_session(Config::default());
    let acme = company("Acme");
    session.save(&acme).await.unwrap();
    session.flush().await.unwrap();
    let id = acme.read().id.unwrap();

    acme.write().name = "Acme Corp".to_string();
    store.reset();
    session.flush().await.unwrap();

    let writes = store.writes();
    assert_eq!(writes.len(), 1);
    match &writes[0].ops[..] {
        [WriteOp::Replace {
            id: replaced,
            expected_version,
            document,
        }] => {
            assert_eq!(*replaced, id);
            assert_eq!(*expected_version, Some(1));
            assert_eq!(document.get("_v"), Some(&Value::Integer(2)));
        }
        ops => panic!("unexpected ops {ops:?}"),
    }
    let doc = store.inner().document("companies", id).unwrap().unwrap();
    assert_eq!(doc.get("name"), Some(&Value::from("Acme Corp")));
}

#[tokio::test]
async fn observed_entities_are_checked_only_after_a_write() {
    let (session, store) = recording_session(Config::default());
    let dune = book("Dune");
    session.save(&dune).await.unwrap();
    session.flush().await.unwrap();
    assert_eq!(session.pending(), 0);

    store.reset();
    session.flush().await.unwrap();
    assert_eq!(store.op_count(), 0);
    assert_eq!(session.stats().skipped_dirty_checks, 0);

    dune.write().pages = 412;
    assert_eq!(session.pending(), 1);
    session.flush().await.unwrap();
    assert_eq!(store.op_count(), 1);
    assert!(matches!(store.writes()[0].ops[0], WriteOp::Update { .. }));

    // The observer is installed again after the flush.
    assert_eq!(session.pending(), 0);
    dune.write().title = "Dune Messiah".to_string();
    assert_eq!(session.pending(), 1);
}

#[tokio::test]
async fn explicit_tracking_waits_for_another_save() {
    let (session, store) = recording_session(Config::default());
    let books = ledger(100);
    session.save(&books).await.unwrap();
    session.flush().await.unwrap();
    let id = books.read().id.unwrap();

    books.write().balance = 250;
    store.reset();
    session.flush().await.unwrap();
    assert_eq!(store.op_count(), 0);

    session.save(&books).await.unwrap();
    session.flush().await.unwrap();
    assert_eq!(store.op_count(), 1);
    let doc = store.inner().document("ledgers", id).unwrap().unwrap();
    assert_eq!(doc.get("balance"), Some(&Value::Integer(250)));
}

#[tokio::test]
async fn session_default_policy_applies_to_unconfigured_types() {
    let (session, store) =
        recording_session(Config::new().default_change_tracking(ChangeTracking::DeferredExplicit));
    let ada = person("Ada");
    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();
    assert_eq!(session.pending(), 0);

    ada.write().age = 31;
    store.reset();
    session.flush().await.unwrap();
    assert_eq!(store.op_count(), 0);

    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();
    assert_eq!(store.op_count(), 1);
}

#[tokio::test]
async fn refresh_discards_local_changes() {
    let (session, store) = recording_session(Config::default());
    let ada = person("Ada");
    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();

    ada.write().name = "Grace".to_string();
    session.refresh(&ada).await.unwrap();
    assert_eq!(ada.read().name, "Ada");
    assert_eq!(session.state_of(&ada), EntityState::Managed);

    store.reset();
    session.flush().await.unwrap();
    assert_eq!(store.op_count(), 0);
}

#[tokio::test]
async fn refresh_requires_a_stored_entity() {
    let (session, _store) = recording_session(Config::default());
    let ada = person("Ada");

    let err = session.refresh(&ada).await.unwrap_err();
    assert!(matches!(err, CoreError::NotManaged { .. }));

    session.save(&ada).await.unwrap();
    let err = session.refresh(&ada).await.unwrap_err();
    assert!(matches!(err, CoreError::NotManaged { .. }));
    assert!(session.is_valid());
}

#[tokio::test]
async fn refresh_is_judged_after_the_operations_queued_before_it() {
    let (session, store) = recording_session(Config::default());
    let ada = person("Ada");

    let saving = session.save(&ada);
    let flushing = session.flush();
    let refreshing = session.refresh(&ada);
    saving.await.unwrap();
    flushing.await.unwrap();
    refreshing.await.unwrap();

    assert_eq!(session.state_of(&ada), EntityState::Managed);
    assert_eq!(store.inner().len("people"), 1);
}

#[tokio::test]
async fn refresh_reattaches_the_observer() {
    let (session, store) = recording_session(Config::default());
    let dune = book("Dune");
    session.save(&dune).await.unwrap();
    session.flush().await.unwrap();

    session.refresh(&dune).await.unwrap();
    assert_eq!(session.pending(), 0);
    dune.write().pages = 9;
    assert_eq!(session.pending(), 1);

    store.reset();
    session.flush().await.unwrap();
    assert_eq!(store.op_count(), 1);
}
