#![allow(dead_code)]

use std::{
   path::{Path, PathBuf},
   sync::Arc,
   time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tokio::{net::UnixListener, sync::mpsc, task::JoinHandle, time};
use tokio_util::sync::CancellationToken;
use virtnode::{
   cmdclient::{CmdServer, SocketRegistry, UnixConnector},
   domain::{Domain, WatchEvent},
   ghost::GhostRecordStore,
   watcher::{DomainWatcher, WatcherOptions},
};

/// Registry with a fixed socket list that remembers every socket it was
/// asked to mark.
#[derive(Default)]
pub struct StaticRegistry {
   sockets: Mutex<Vec<PathBuf>>,
   marked:  Mutex<Vec<PathBuf>>,
}

impl StaticRegistry {
   pub fn new(sockets: Vec<PathBuf>) -> Self {
      Self { sockets: Mutex::new(sockets), marked: Mutex::new(Vec::new()) }
   }

   pub fn set_sockets(&self, sockets: Vec<PathBuf>) {
      *self.sockets.lock() = sockets;
   }

   pub fn marked(&self) -> Vec<PathBuf> {
      self.marked.lock().clone()
   }
}

impl SocketRegistry for StaticRegistry {
   fn list_all_sockets(&self) -> virtnode::Result<Vec<PathBuf>> {
      Ok(self.sockets.lock().clone())
   }

   fn mark_socket_unresponsive(&self, socket: &Path) -> virtnode::Result<()> {
      self.marked.lock().push(socket.to_path_buf());
      Ok(())
   }

   fn is_socket_unresponsive(&self, socket: &Path) -> bool {
      self.marked.lock().iter().any(|s| s == socket)
   }
}

/// A launcher serving one domain on a control socket.
pub struct Launcher {
   pub path:   PathBuf,
   pub domain: Arc<RwLock<Option<Domain>>>,
   cancel:     CancellationToken,
   handle:     JoinHandle<virtnode::Result<()>>,
}

impl Launcher {
   pub async fn spawn(path: &Path, domain: Domain) -> Self {
      let server = CmdServer::bind(path).await.expect("bind control socket");
      let source = Arc::new(RwLock::new(Some(domain)));
      let cancel = CancellationToken::new();
      let handle = tokio::spawn(server.serve(cancel.clone(), source.clone()));
      Self { path: path.to_path_buf(), domain: source, cancel, handle }
   }

   pub async fn shutdown(self) {
      self.cancel.cancel();
      self.handle.await.expect("join launcher").expect("launcher result");
   }
}

/// Leaves a socket file nobody listens on, so every dial is refused.
pub fn dead_socket(path: &Path) {
   if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).expect("socket dir");
   }
   let listener = std::os::unix::net::UnixListener::bind(path).expect("bind dead socket");
   drop(listener);
   assert!(path.exists());
}

/// Accepts every connection and hangs up immediately.
pub fn accept_and_close(path: &Path) -> JoinHandle<()> {
   if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).expect("socket dir");
   }
   let listener = UnixListener::bind(path).expect("bind socket");
   tokio::spawn(async move {
      while let Ok((stream, _)) = listener.accept().await {
         drop(stream);
      }
   })
}

pub fn domain_with_uid(namespace: &str, name: &str, uid: &str) -> Domain {
   let mut domain = Domain::new_minimal(namespace, name);
   domain.meta.uid = uid.to_string();
   domain.spec.vmi_uid = uid.to_string();
   domain
}

pub fn open_store(dir: &Path) -> Arc<GhostRecordStore> {
   Arc::new(GhostRecordStore::open(&dir.join("ghost-records")).expect("ghost store"))
}

/// Options with a short watchdog and a resync that never fires in a test.
pub fn fast_options(share_dir: &Path) -> WatcherOptions {
   let mut options = WatcherOptions::new(share_dir);
   options.watchdog_timeout = Duration::from_secs(1);
   options.resync_period = Duration::from_secs(3600);
   options.probe_timeout = Duration::from_millis(500);
   options
}

pub fn watcher(
   ghosts: Arc<GhostRecordStore>,
   registry: Arc<StaticRegistry>,
   options: WatcherOptions,
) -> DomainWatcher {
   DomainWatcher::new(ghosts, registry, Arc::new(UnixConnector::default()), options)
}

pub async fn next_event(rx: &mut mpsc::Receiver<WatchEvent>, within: Duration) -> Option<WatchEvent> {
   time::timeout(within, rx.recv()).await.ok().flatten()
}
