mod support;

use std::{
   fs,
   path::{Path, PathBuf},
};

use support::StaticRegistry;
use tempfile::TempDir;
use virtnode::{
   cmdclient::{FsSocketRegistry, SocketRegistry},
   ghost::GhostRecordStore,
   watcher::list_sockets,
};

#[test]
fn ghost_only_socket_joins_registered_ones() {
   let dir = TempDir::new().expect("temp dir");
   let store = GhostRecordStore::open(dir.path()).expect("store");
   store.add("ns", "b", Path::new("/b"), "uid-b").expect("add");

   let registry = StaticRegistry::new(vec![PathBuf::from("/a")]);
   let sockets = list_sockets(&registry, &store.list()).expect("list sockets");
   assert_eq!(sockets, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
}

#[test]
fn ghost_at_registered_path_is_not_duplicated() {
   let dir = TempDir::new().expect("temp dir");
   let store = GhostRecordStore::open(dir.path()).expect("store");
   store.add("ns", "a", Path::new("/pods/p1/sockets/launcher-sock"), "uid-a").expect("add");

   let registry = StaticRegistry::new(vec![PathBuf::from("/pods/p1/sockets/launcher-sock")]);
   let sockets = list_sockets(&registry, &store.list()).expect("list sockets");
   assert_eq!(sockets.len(), 1);
}

#[test]
fn filesystem_registry_and_ghosts_cover_crashed_launchers() {
   let dir = TempDir::new().expect("temp dir");
   let registry = FsSocketRegistry::new(dir.path().join("share/sockets"), dir.path().join("pods"));

   let live = registry.socket_file_path_on_host("pod-live");
   fs::create_dir_all(live.parent().expect("parent")).expect("socket dir");
   fs::write(&live, b"").expect("live socket");

   // The crashed launcher's pod directory is gone; only its ghost record remains.
   let crashed = registry.socket_file_path_on_host("pod-crashed");

   let store = GhostRecordStore::open(&dir.path().join("ghosts")).expect("store");
   store.add("ns", "live", &live, "uid-live").expect("add live");
   store.add("ns", "crashed", &crashed, "uid-crashed").expect("add crashed");

   let sockets = list_sockets(&registry, &store.list()).expect("list sockets");
   assert_eq!(sockets, vec![live.clone(), crashed.clone()]);
   assert!(!registry.is_socket_unresponsive(&live));
   assert!(registry.is_socket_unresponsive(&crashed));
}
