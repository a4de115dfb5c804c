//! Randomised save/remove/flush workloads checked against the store.

use entimap_core::{Config, EntityState, Handle, MemoryStore, Session};
use entimap_testkit::prelude::*;
use proptest::prelude::*;
use std::sync::Arc;

async fn run(steps: &[SessionStep], pets: &[Handle<Pet>], session: &Session) {
    for (n, step) in steps.iter().enumerate() {
        match *step {
            SessionStep::Save(i) => session.save(&pets[i]).await.unwrap(),
            SessionStep::Remove(i) => session.remove(&pets[i]).await.unwrap(),
            SessionStep::Touch(i) => pets[i].write().name = format!("pet-{i}-{n}"),
            SessionStep::Flush => session.flush().await.unwrap(),
        }
    }
    session.flush().await.unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn flushed_store_matches_managed_entities(steps in session_steps_strategy(4, 40)) {
        init_tracing();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let store = Arc::new(MemoryStore::new());
        let session = factory(store.clone(), Config::default()).create_session();
        let pets: Vec<_> = (0..4).map(|i| pet(&format!("pet-{i}"))).collect();

        runtime.block_on(run(&steps, &pets, &session));

        let mut managed = 0;
        for handle in &pets {
            match session.state_of(handle) {
                EntityState::Managed => {
                    managed += 1;
                    let (id, name) = {
                        let pet = handle.read();
                        (pet.id.unwrap(), pet.name.clone())
                    };
                    let doc = store.document("pets", id).unwrap().unwrap();
                    prop_assert_eq!(
                        doc.get("name").and_then(entimap_codec::Value::as_text),
                        Some(name.as_str())
                    );
                }
                EntityState::New => prop_assert!(handle.read().id.is_none()),
                state => prop_assert!(false, "unexpected state {:?}", state),
            }
        }
        prop_assert_eq!(store.len("pets"), managed);
        prop_assert_eq!(session.pending(), managed);
    }
}
