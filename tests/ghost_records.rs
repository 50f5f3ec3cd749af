mod support;

use std::{
   collections::HashMap,
   path::{Path, PathBuf},
   sync::Arc,
};

use proptest::{
   prelude::*,
   test_runner::{Config, RngAlgorithm, TestRng, TestRunner},
};
use tempfile::TempDir;
use virtnode::{
   Error,
   checkpoint::{CheckpointStore, FileCheckpointStore},
   error::GhostRecordError,
   ghost::GhostRecordStore,
};

#[test]
fn reinitialize_rebuilds_every_persisted_record() {
   let dir = TempDir::new().expect("temp dir");
   {
      let store = GhostRecordStore::open(dir.path()).expect("store");
      store.add("ns1", "vm1", Path::new("/s1"), "u1").expect("add vm1");
      store.add("ns2", "vm2", Path::new("/s2"), "u2").expect("add vm2");
   }

   let store = GhostRecordStore::open(dir.path()).expect("reopen");
   assert_eq!(store.len(), 2);
   assert_eq!(store.last_known_uid("ns1/vm1").as_deref(), Some("u1"));
   assert_eq!(store.last_known_uid("ns2/vm2").as_deref(), Some("u2"));
   let vm2 = store.find_by_socket(Path::new("/s2")).expect("vm2 by socket");
   assert_eq!(vm2.key(), "ns2/vm2");
   assert!(store.find_by_socket(Path::new("/s3")).is_none());
}

#[test]
fn corrupt_checkpoint_does_not_block_startup() {
   let dir = TempDir::new().expect("temp dir");
   let checkpoint = FileCheckpointStore::new(dir.path()).expect("checkpoint store");
   checkpoint.store_raw("broken", b"\x00\x01 definitely not json").expect("raw");
   {
      let store = GhostRecordStore::initialize(Arc::new(checkpoint.clone())).expect("store");
      store.add("ns1", "vm1", Path::new("/s1"), "u1").expect("add");
   }

   let store = GhostRecordStore::initialize(Arc::new(checkpoint)).expect("initialize");
   assert_eq!(store.len(), 1);
   assert!(store.exists("ns1", "vm1"));
}

#[test]
fn duplicate_identity_keeps_first_checkpoint() {
   let dir = TempDir::new().expect("temp dir");
   let checkpoint = FileCheckpointStore::new(dir.path()).expect("checkpoint store");
   checkpoint
      .store_raw("u-a", br#"{"name":"vm1","namespace":"ns1","socketFile":"/a","uid":"u-a"}"#)
      .expect("first");
   checkpoint
      .store_raw("u-b", br#"{"name":"vm1","namespace":"ns1","socketFile":"/b","uid":"u-b"}"#)
      .expect("second");

   let store = GhostRecordStore::initialize(Arc::new(checkpoint)).expect("initialize");
   assert_eq!(store.len(), 1);
   assert_eq!(store.last_known_uid("ns1/vm1").as_deref(), Some("u-a"));
}

#[test]
fn misnamed_checkpoint_is_not_loaded() {
   let dir = TempDir::new().expect("temp dir");
   let checkpoint = FileCheckpointStore::new(dir.path()).expect("checkpoint store");
   checkpoint
      .store_raw("file-uid", br#"{"name":"vm1","namespace":"ns1","socketFile":"/a","uid":"other-uid"}"#)
      .expect("misnamed");
   checkpoint
      .store_raw("u2", br#"{"name":"vm2","namespace":"ns1","socketFile":"/b","uid":"u2"}"#)
      .expect("well named");

   let store = GhostRecordStore::initialize(Arc::new(checkpoint.clone())).expect("initialize");
   assert!(!store.exists("ns1", "vm1"));
   assert!(store.exists("ns1", "vm2"));

   store.delete("ns1", "vm2").expect("delete");
   let reopened = GhostRecordStore::initialize(Arc::new(checkpoint)).expect("reopen");
   assert!(reopened.is_empty());
}

#[test]
fn unlistable_directory_fails_initialization() {
   let dir = TempDir::new().expect("temp dir");
   let checkpoint = FileCheckpointStore::new(dir.path().join("records")).expect("checkpoint");
   std::fs::remove_dir(checkpoint.base()).expect("remove base");

   assert!(GhostRecordStore::initialize(Arc::new(checkpoint)).is_err());
}

#[test]
fn conflicting_add_reports_both_identities() {
   let dir = TempDir::new().expect("temp dir");
   let store = GhostRecordStore::open(dir.path()).expect("store");
   let first = uuid::Uuid::new_v4().to_string();
   let second = uuid::Uuid::new_v4().to_string();
   store.add("ns1", "vm1", Path::new("/s1"), &first).expect("add");

   let err = store.add("ns1", "vm1", Path::new("/s1"), &second).expect_err("conflict");
   let msg = err.to_string();
   assert!(matches!(err, Error::GhostRecord(GhostRecordError::Conflict { .. })));
   assert!(msg.contains(&first) && msg.contains(&second), "{msg}");
   assert_eq!(err.exit_code(), 2);
}

#[derive(Debug, Clone)]
enum Op {
   Add { vm: usize, uid: usize, socket: usize },
   Delete { vm: usize },
   Reopen,
}

fn op_strategy() -> impl Strategy<Value = Op> {
   prop_oneof![
      (0usize..4, 0usize..3, 0usize..2).prop_map(|(vm, uid, socket)| Op::Add { vm, uid, socket }),
      (0usize..4).prop_map(|vm| Op::Delete { vm }),
      Just(Op::Reopen),
   ]
}

#[test]
fn store_matches_model_across_restarts() {
   let seed = [7u8; 32];
   let mut runner = TestRunner::new_with_rng(
      Config { cases: 48, max_shrink_iters: 0, ..Config::default() },
      TestRng::from_seed(RngAlgorithm::ChaCha, &seed),
   );

   let strategy = prop::collection::vec(op_strategy(), 1..24);

   runner
      .run(&strategy, |ops| {
         let dir = TempDir::new().expect("temp dir");
         let mut store = GhostRecordStore::open(dir.path()).expect("store");
         let mut model: HashMap<String, (String, PathBuf)> = HashMap::new();

         for op in ops {
            match op {
               Op::Add { vm, uid, socket } => {
                  let name = format!("vm{vm}");
                  let uid = format!("{name}-uid{uid}");
                  let socket = PathBuf::from(format!("/pods/{name}/sock{socket}"));
                  let key = format!("ns/{name}");

                  let result = store.add("ns", &name, &socket, &uid);
                  match model.get(&key) {
                     Some((known_uid, known_socket)) => {
                        let same = *known_uid == uid && *known_socket == socket;
                        prop_assert_eq!(result.is_ok(), same);
                     },
                     None => {
                        prop_assert!(result.is_ok());
                        model.insert(key, (uid, socket));
                     },
                  }
               },
               Op::Delete { vm } => {
                  let name = format!("vm{vm}");
                  prop_assert!(store.delete("ns", &name).is_ok());
                  model.remove(&format!("ns/{name}"));
                  prop_assert!(!store.exists("ns", &name));
               },
               Op::Reopen => {
                  store = GhostRecordStore::open(dir.path()).expect("reopen");
               },
            }

            prop_assert_eq!(store.len(), model.len());
            for (key, (uid, socket)) in &model {
               let known = store.last_known_uid(key);
               prop_assert_eq!(known.as_deref(), Some(uid.as_str()));
               let found = store.find_by_socket(socket);
               prop_assert_eq!(found.map(|r| r.key()), Some(key.clone()));
            }
         }
         Ok(())
      })
      .expect("ghost store model");
}
