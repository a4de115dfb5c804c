//! Save, remove, detach, clear and close through full sessions.

use entimap_codec::Value;
use entimap_core::{Config, CoreError, EntityState, MemoryStore, SessionFactory, WriteOp};
use entimap_testkit::prelude::*;
use std::sync::Arc;

fn recording_session() -> (entimap_core::Session, Arc<RecordingStore>) {
    init_tracing();
    let store = Arc::new(RecordingStore::new());
    let session = factory(store.clone(), Config::default()).create_session();
    (session, store)
}

#[tokio::test]
async fn save_then_flush_stores_a_managed_entity() {
    init_tracing();
    let (session, store) = memory_session();
    let ada = person("Ada");

    session.save(&ada).await.unwrap();
    assert_eq!(session.state_of(&ada), EntityState::Managed);
    let id = ada.read().id.expect("identifier assigned on save");
    assert_eq!(session.get_id(&ada), Some(id));

    session.flush().await.unwrap();
    assert_eq!(session.state_of(&ada), EntityState::Managed);
    assert_eq!(ada.read().id, Some(id));

    let doc = store.document("people", id).unwrap().unwrap();
    assert_eq!(doc.get("name"), Some(&Value::from("Ada")));
    assert_eq!(doc.get("_id"), Some(&id.to_value()));
}

#[tokio::test]
async fn removing_an_unflushed_entity_writes_nothing() {
    let (session, store) = recording_session();
    let ada = person("Ada");

    session.save(&ada).await.unwrap();
    session.remove(&ada).await.unwrap();
    session.flush().await.unwrap();

    assert_eq!(store.op_count(), 0);
    assert_eq!(ada.read().id, None);
    assert_eq!(session.state_of(&ada), EntityState::New);
    assert!(session.is_empty());
}

#[tokio::test]
async fn saving_a_removed_entity_cancels_the_delete() {
    let (session, store) = recording_session();
    let ada = person("Ada");
    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();
    let id = ada.read().id;

    session.remove(&ada).await.unwrap();
    assert_eq!(session.state_of(&ada), EntityState::Removed);
    session.save(&ada).await.unwrap();
    assert_eq!(session.state_of(&ada), EntityState::Managed);

    store.reset();
    session.flush().await.unwrap();
    assert_eq!(store.op_count(), 0);
    assert_eq!(ada.read().id, id);
    assert_eq!(store.inner().len("people"), 1);
}

#[tokio::test]
async fn flushed_removal_unlinks_and_clears_the_identifier() {
    let (session, store) = recording_session();
    let ada = person("Ada");
    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();
    let id = ada.read().id.unwrap();

    session.remove(&ada).await.unwrap();
    session.flush().await.unwrap();

    assert!(store.inner().document("people", id).unwrap().is_none());
    assert_eq!(ada.read().id, None);
    assert_eq!(session.state_of(&ada), EntityState::New);
    let last = store.writes().pop().unwrap();
    assert_eq!(last.ops, vec![WriteOp::Remove { id }]);
}

#[tokio::test]
async fn double_save_inserts_once() {
    let (session, store) = recording_session();
    let ada = person("Ada");

    session.save(&ada).await.unwrap();
    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();

    let writes = store.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].ops.len(), 1);
    assert!(matches!(writes[0].ops[0], WriteOp::Insert { .. }));
}

#[tokio::test]
async fn concurrent_saves_of_one_entity_insert_once() {
    let (session, store) = recording_session();
    let ada = person("Ada");

    let (first, second) = tokio::join!(session.save(&ada), session.save(&ada));
    first.unwrap();
    second.unwrap();
    session.flush().await.unwrap();

    assert_eq!(store.op_count(), 1);
}

#[tokio::test]
async fn save_cascades_through_references_and_embedded_values() {
    let (session, store) = recording_session();
    let acme = company("Acme");
    let estates = company("Estates");
    let rex = pet("Rex");
    let ada = person("Ada");
    {
        let mut ada = ada.write();
        ada.employer = Some(entimap_core::Reference::to(&acme));
        ada.address.landlord = Some(entimap_core::Reference::to(&estates));
        ada.pets.push(entimap_core::Reference::to(&rex));
    }

    session.save(&ada).await.unwrap();
    for state in [
        session.state_of(&acme),
        session.state_of(&estates),
        session.state_of(&rex),
    ] {
        assert_eq!(state, EntityState::Managed);
    }
    session.flush().await.unwrap();
    assert_eq!(store.op_count(), 4);
}

#[tokio::test]
async fn remove_does_not_follow_save_only_properties() {
    let (session, store) = recording_session();
    let acme = company("Acme");
    let rex = pet("Rex");
    let ada = person("Ada");
    ada.write().employer = Some(entimap_core::Reference::to(&acme));
    ada.write().pets.push(entimap_core::Reference::to(&rex));
    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();

    session.remove(&ada).await.unwrap();
    assert_eq!(session.state_of(&rex), EntityState::Removed);
    assert_eq!(session.state_of(&acme), EntityState::Managed);
    session.flush().await.unwrap();

    assert_eq!(store.inner().len("companies"), 1);
    assert_eq!(store.inner().len("pets"), 0);
    assert_eq!(store.inner().len("people"), 0);
}

#[tokio::test]
async fn detach_keeps_the_identifier_and_rejects_later_saves() {
    let (session, _store) = memory_session();
    let ada = person("Ada");
    session.save(&ada).await.unwrap();
    session.flush().await.unwrap();
    let id = ada.read().id;

    session.detach(&ada).await.unwrap();
    assert_eq!(session.state_of(&ada), EntityState::Detached);
    assert_eq!(ada.read().id, id);

    let err = session.save(&ada).await.unwrap_err();
    assert!(matches!(err, CoreError::DetachedEntity { .. }));
    let err = session.remove(&ada).await.unwrap_err();
    assert!(matches!(err, CoreError::DetachedEntity { .. }));
    assert!(session.is_valid());
}

#[tokio::test]
async fn clear_forgets_everything_without_writing() {
    let (session, store) = recording_session();
    let ada = person("Ada");
    let bob = person("Bob");
    session.save(&ada).await.unwrap();
    session.save(&bob).await.unwrap();
    assert_eq!(session.pending(), 2);

    session.clear().await.unwrap();
    assert!(session.is_empty());
    assert_eq!(session.pending(), 0);
    session.flush().await.unwrap();
    assert_eq!(store.op_count(), 0);
}

#[tokio::test]
async fn close_flushes_and_rejects_further_work() {
    let (session, store) = memory_session();
    let ada = person("Ada");
    session.save(&ada).await.unwrap();

    session.close().await.unwrap();
    assert!(session.is_closed());
    assert!(session.is_empty());
    assert_eq!(store.len("people"), 1);

    let err = session.save(&person("Bob")).await.unwrap_err();
    assert!(matches!(err, CoreError::SessionClosed));
}

#[tokio::test]
async fn unregistered_types_are_rejected_immediately() {
    let factory = SessionFactory::new(Arc::new(MemoryStore::new()));
    let session = factory.create_session();

    let err = session.save(&person("Ada")).await.unwrap_err();
    assert!(matches!(err, CoreError::UnmappedEntity { .. }));
    assert!(session.is_valid());
}

#[tokio::test]
async fn small_flush_chunks_still_write_everything() {
    init_tracing();
    let store = Arc::new(RecordingStore::new());
    let session = factory(store.clone(), Config::new().flush_chunk_size(2)).create_session();
    let people: Vec<_> = (0..5).map(|i| person(&format!("P{i}"))).collect();
    for p in &people {
        session.save(p).await.unwrap();
    }

    session.flush().await.unwrap();
    assert_eq!(store.writes().len(), 1);
    assert_eq!(store.op_count(), 5);
    assert_eq!(session.stats().inserts, 5);
}

#[tokio::test]
async fn wait_resolves_after_earlier_operations() {
    let (session, store) = memory_session();
    let ada = person("Ada");
    session.save(&ada).detach();
    session.flush().detach();

    session.wait().await.unwrap();
    assert_eq!(store.len("people"), 1);
}
