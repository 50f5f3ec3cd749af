//! Node-wide domain watcher.
//!
//! Merges three sources into one event stream: launcher pushes over the
//! notification socket, a periodic resync of every control socket, and a
//! watchdog that reports VMs whose control socket stopped answering.

use std::{
   path::{Path, PathBuf},
   sync::Arc,
   time::Duration,
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::{
   sync::{Mutex as AsyncMutex, mpsc},
   task::JoinHandle,
   time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
   Result,
   cache::ListWatch,
   cmdclient::{Connector, SocketRegistry},
   config::{Config, MIN_EVENT_BUFFER},
   domain::{Domain, WatchEvent},
   error::WatchError,
   ghost::GhostRecordStore,
   ipc::DEFAULT_MAX_MESSAGE_BYTES,
   notify::{EventRecorder, LogRecorder, NotifyServer},
};

mod sockets;
mod watchdog;

pub use sockets::list_sockets;
pub use watchdog::UnresponsiveTracker;

/// Timing and location knobs for a [`DomainWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherOptions {
   /// Directory holding the notification socket.
   pub share_dir:         PathBuf,
   pub watchdog_timeout:  Duration,
   pub resync_period:     Duration,
   pub probe_timeout:     Duration,
   pub event_buffer:      usize,
   pub max_message_bytes: usize,
}

impl WatcherOptions {
   pub fn new(share_dir: impl Into<PathBuf>) -> Self {
      let defaults = Config::default();
      Self {
         share_dir:         share_dir.into(),
         watchdog_timeout:  defaults.watchdog_timeout(),
         resync_period:     defaults.resync_period(),
         probe_timeout:     defaults.probe_timeout(),
         event_buffer:      MIN_EVENT_BUFFER,
         max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
      }
   }

   pub fn from_config(cfg: &Config) -> Self {
      Self {
         share_dir:         cfg.virt_share_dir.clone(),
         watchdog_timeout:  cfg.watchdog_timeout(),
         resync_period:     cfg.resync_period(),
         probe_timeout:     cfg.probe_timeout(),
         event_buffer:      cfg.effective_event_buffer(),
         max_message_bytes: cfg.max_message_bytes,
      }
   }

   /// Probe period: a third of the timeout plus a second, so every socket
   /// fails at least two probes before it is reported.
   pub fn watchdog_interval(&self) -> Duration {
      self.watchdog_timeout / 3 + Duration::from_secs(1)
   }
}

struct Lifecycle {
   started:   bool,
   stopped:   bool,
   cancel:    CancellationToken,
   worker:    Option<JoinHandle<Result<()>>>,
   events_tx: Option<mpsc::Sender<WatchEvent>>,
}

struct Inner {
   ghosts:    Arc<GhostRecordStore>,
   registry:  Arc<dyn SocketRegistry>,
   connector: Arc<dyn Connector>,
   recorder:  Arc<RwLock<Arc<dyn EventRecorder>>>,
   options:   WatcherOptions,
   tracker:   UnresponsiveTracker,
}

/// Produces the domain event stream for this node.
///
/// The worker starts on the first [`list`](Self::list) and runs until
/// [`stop`](Self::stop) or a fatal notification-server failure.
pub struct DomainWatcher {
   inner:     Arc<Inner>,
   lifecycle: AsyncMutex<Lifecycle>,
   events_rx: parking_lot::Mutex<Option<mpsc::Receiver<WatchEvent>>>,
   finished:  CancellationToken,
}

impl DomainWatcher {
   pub fn new(
      ghosts: Arc<GhostRecordStore>,
      registry: Arc<dyn SocketRegistry>,
      connector: Arc<dyn Connector>,
      options: WatcherOptions,
   ) -> Self {
      let (events_tx, events_rx) = mpsc::channel(options.event_buffer.max(MIN_EVENT_BUFFER));
      Self {
         inner:     Arc::new(Inner {
            ghosts,
            registry,
            connector,
            recorder: Arc::new(RwLock::new(Arc::new(LogRecorder))),
            options,
            tracker: UnresponsiveTracker::new(),
         }),
         lifecycle: AsyncMutex::new(Lifecycle {
            started:   false,
            stopped:   false,
            cancel:    CancellationToken::new(),
            worker:    None,
            events_tx: Some(events_tx),
         }),
         events_rx: parking_lot::Mutex::new(Some(events_rx)),
         finished:  CancellationToken::new(),
      }
   }

   /// Replaces the recorder receiving cluster events pushed by launchers.
   #[must_use]
   pub fn with_recorder(self, recorder: Arc<dyn EventRecorder>) -> Self {
      self.set_recorder(recorder);
      self
   }

   /// Swaps the recorder, also while the watcher is running.
   pub fn set_recorder(&self, recorder: Arc<dyn EventRecorder>) {
      *self.inner.recorder.write() = recorder;
   }

   pub fn options(&self) -> &WatcherOptions {
      &self.inner.options
   }

   pub fn notify_socket_path(&self) -> PathBuf {
      crate::notify::notify_socket_path(&self.inner.options.share_dir)
   }

   /// Starts the worker if needed and returns every domain known right now.
   ///
   /// Live sockets that answer contribute their domain. Ghost records whose
   /// socket file is gone contribute a stale, deletion-marked domain. Sockets
   /// that exist but do not answer are skipped until a later event.
   pub async fn list(&self) -> Result<Vec<Domain>> {
      self.start().await?;
      self.inner.list_domains().await
   }

   /// Hands out the event stream. Only the first call succeeds.
   pub fn watch(&self) -> Result<mpsc::Receiver<WatchEvent>> {
      self
         .events_rx
         .lock()
         .take()
         .ok_or_else(|| WatchError::AlreadyWatching.into())
   }

   /// Cancelled once the worker has exited, for whatever reason.
   pub fn finished(&self) -> CancellationToken {
      self.finished.clone()
   }

   /// Stops the worker and closes the event stream.
   ///
   /// Idempotent and safe before the watcher was started. Returns the
   /// worker's fatal error on the first call, if it had one.
   pub async fn stop(&self) -> Result<()> {
      let mut lifecycle = self.lifecycle.lock().await;
      if lifecycle.stopped {
         return Ok(());
      }
      lifecycle.stopped = true;
      lifecycle.cancel.cancel();

      let result = match lifecycle.worker.take() {
         Some(worker) => match worker.await {
            Ok(result) => result,
            Err(e) => Err(WatchError::Worker(e.to_string()).into()),
         },
         None => Ok(()),
      };
      lifecycle.events_tx = None;
      self.finished.cancel();
      tracing::info!("domain watcher stopped");
      result
   }

   async fn start(&self) -> Result<()> {
      let mut lifecycle = self.lifecycle.lock().await;
      if lifecycle.stopped {
         return Err(WatchError::Stopped.into());
      }
      if lifecycle.started {
         return Ok(());
      }
      let Some(events) = lifecycle.events_tx.clone() else {
         return Err(WatchError::Stopped.into());
      };

      let server = NotifyServer::bind(&self.inner.options.share_dir)
         .await?
         .with_max_message_bytes(self.inner.options.max_message_bytes);

      let inner = Arc::clone(&self.inner);
      let cancel = lifecycle.cancel.clone();
      let finished = self.finished.clone();
      lifecycle.worker = Some(tokio::spawn(async move {
         let result = inner.run(server, events, cancel).await;
         if let Err(e) = &result {
            tracing::error!("domain watcher exited: {e}");
         }
         finished.cancel();
         result
      }));
      lifecycle.started = true;
      tracing::info!(
         "domain watcher started (resync every {:?}, watchdog timeout {:?})",
         self.inner.options.resync_period,
         self.inner.options.watchdog_timeout
      );
      Ok(())
   }
}

#[async_trait]
impl ListWatch for DomainWatcher {
   async fn list(&self) -> Result<Vec<Domain>> {
      Self::list(self).await
   }

   fn watch(&self) -> Result<mpsc::Receiver<WatchEvent>> {
      Self::watch(self)
   }
}

/// Sends `event` unless the watcher is stopping first. Returns false when the
/// event could not be delivered.
async fn emit(events: &mpsc::Sender<WatchEvent>, cancel: &CancellationToken, event: WatchEvent) -> bool {
   tokio::select! {
      () = cancel.cancelled() => false,
      result = events.send(event) => result.is_ok(),
   }
}

impl Inner {
   async fn run(
      self: Arc<Self>,
      server: NotifyServer,
      events: mpsc::Sender<WatchEvent>,
      cancel: CancellationToken,
   ) -> Result<()> {
      let mut server_task =
         tokio::spawn(server.run(cancel.clone(), events.clone(), self.recorder.clone()));
      let mut server_done = false;

      let now = Instant::now();
      let resync_period = self.options.resync_period;
      let mut resync = time::interval_at(now + resync_period, resync_period);
      resync.set_missed_tick_behavior(MissedTickBehavior::Delay);
      let watchdog_period = self.options.watchdog_interval();
      let mut watchdog = time::interval_at(now + watchdog_period, watchdog_period);
      watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

      let result = loop {
         tokio::select! {
            () = cancel.cancelled() => break Ok(()),
            _ = resync.tick() => self.resync(&events, &cancel).await,
            _ = watchdog.tick() => self.watchdog_round(&events, &cancel).await,
            joined = &mut server_task, if !server_done => {
               server_done = true;
               break match joined {
                  Ok(Err(e)) => Err(e),
                  Ok(Ok(())) if cancel.is_cancelled() => Ok(()),
                  Ok(Ok(())) => {
                     Err(WatchError::NotifyServerExited("server returned unexpectedly".to_string()).into())
                  },
                  Err(e) => Err(WatchError::NotifyServerExited(e.to_string()).into()),
               };
            },
         }
      };

      cancel.cancel();
      if !server_done {
         match server_task.await {
            Ok(Ok(())) => {},
            Ok(Err(e)) => tracing::warn!("notify server stopped with error: {e}"),
            Err(e) => tracing::warn!("notify server task failed: {e}"),
         }
      }
      result
   }

   async fn fetch_domain(&self, socket: &Path) -> Result<Option<Domain>> {
      let mut client = self.connector.connect(socket).await?;
      client.get_domain().await
   }

   fn candidates(&self) -> Result<Vec<PathBuf>> {
      let records = self.ghosts.list();
      list_sockets(self.registry.as_ref(), &records)
   }

   async fn list_domains(&self) -> Result<Vec<Domain>> {
      let sockets = self.candidates()?;
      let mut domains = Vec::with_capacity(sockets.len());

      for socket in sockets {
         if !socket.exists() {
            if let Some(record) = self.ghosts.find_by_socket(&socket) {
               tracing::debug!(
                  "socket {} for {} is gone, listing stale domain",
                  socket.display(),
                  record.key()
               );
               domains.push(Domain::stale(&record));
            }
            continue;
         }

         match self.fetch_domain(&socket).await {
            Ok(Some(domain)) => domains.push(domain),
            Ok(None) => {},
            Err(e) => tracing::debug!("skipping socket {} that is not ready: {e}", socket.display()),
         }
      }
      Ok(domains)
   }

   async fn resync(&self, events: &mpsc::Sender<WatchEvent>, cancel: &CancellationToken) {
      let sockets = match self.candidates() {
         Ok(sockets) => sockets,
         Err(e) => {
            tracing::warn!("domain resync could not enumerate sockets: {e}");
            return;
         },
      };

      for socket in sockets {
         if cancel.is_cancelled() {
            return;
         }
         if !socket.exists() {
            continue;
         }
         match self.fetch_domain(&socket).await {
            Ok(Some(domain)) => {
               if !emit(events, cancel, WatchEvent::Modified(domain)).await {
                  return;
               }
            },
            Ok(None) => {},
            Err(e) => tracing::warn!("domain resync failed for socket {}: {e}", socket.display()),
         }
      }
   }

   async fn watchdog_round(&self, events: &mpsc::Sender<WatchEvent>, cancel: &CancellationToken) {
      let sockets = match self.candidates() {
         Ok(sockets) => sockets,
         Err(e) => {
            tracing::warn!("watchdog could not enumerate sockets: {e}");
            return;
         },
      };

      let mut failed = Vec::new();
      for socket in sockets {
         if cancel.is_cancelled() {
            return;
         }
         if !self.registry.socket_monitoring_enabled(&socket) {
            continue;
         }
         if self.registry.is_socket_unresponsive(&socket) {
            failed.push(socket);
            continue;
         }
         if let Err(e) = self.connector.probe(&socket, self.options.probe_timeout).await {
            tracing::debug!("socket {} failed liveness probe: {e}", socket.display());
            failed.push(socket);
         }
      }

      let expired = self
         .tracker
         .update(&failed, Instant::now(), self.options.watchdog_timeout);
      for socket in expired {
         let Some(record) = self.ghosts.find_by_socket(&socket) else {
            tracing::debug!("unresponsive socket {} has no ghost record", socket.display());
            continue;
         };

         tracing::warn!(
            "socket {} for {} (uid {}) unresponsive for over {:?}, signaling domain deletion",
            socket.display(),
            record.key(),
            record.uid,
            self.options.watchdog_timeout
         );
         if !emit(events, cancel, WatchEvent::Modified(Domain::stale(&record))).await {
            return;
         }
         if let Err(e) = self.registry.mark_socket_unresponsive(&socket) {
            tracing::warn!("failed to mark socket {} unresponsive: {e}", socket.display());
         }
         self.tracker.mark_signaled(&socket);
      }
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn watchdog_interval_is_a_third_plus_one_second() {
      let mut options = WatcherOptions::new("/tmp/share");
      options.watchdog_timeout = Duration::from_secs(30);
      assert_eq!(options.watchdog_interval(), Duration::from_secs(11));

      options.watchdog_timeout = Duration::from_secs(1);
      assert_eq!(options.watchdog_interval(), Duration::from_nanos(1_333_333_333));
   }

   #[test]
   fn options_follow_config() {
      let cfg = Config { event_buffer: 4, watchdog_timeout_secs: 9, ..Config::default() };
      let options = WatcherOptions::from_config(&cfg);
      assert_eq!(options.event_buffer, MIN_EVENT_BUFFER);
      assert_eq!(options.watchdog_timeout, Duration::from_secs(9));
      assert_eq!(options.share_dir, cfg.virt_share_dir);
   }
}
