//! Notification socket: launchers push domain and cluster events to the agent.

use std::{
   path::{Path, PathBuf},
   sync::Arc,
   time::Duration,
};

use tokio::{
   sync::mpsc,
   time::{self, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
   Result,
   domain::WatchEvent,
   error::WatchError,
   ipc::{self, DEFAULT_MAX_MESSAGE_BYTES, K8sEvent, NotifyRequest, NotifyResponse},
   usock,
};

mod client;

pub use client::Notifier;

pub const NOTIFY_SOCKET_NAME: &str = "domain-notify-pipe.sock";

const SOCKET_CHECK_INTERVAL: Duration = Duration::from_secs(1);

pub fn notify_socket_path(share_dir: &Path) -> PathBuf {
   share_dir.join(NOTIFY_SOCKET_NAME)
}

/// Sink for cluster events launchers ask the agent to record.
pub trait EventRecorder: Send + Sync {
   fn record(&self, event: &K8sEvent);
}

impl EventRecorder for parking_lot::RwLock<Arc<dyn EventRecorder>> {
   fn record(&self, event: &K8sEvent) {
      self.read().record(event);
   }
}

/// Records cluster events into the agent log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRecorder;

impl EventRecorder for LogRecorder {
   fn record(&self, event: &K8sEvent) {
      tracing::info!(
         "{} event for {}/{} (uid {}): {}: {}",
         event.event_type,
         event.namespace,
         event.name,
         event.uid,
         event.reason,
         event.message
      );
   }
}

/// Bound notification socket, not yet accepting.
pub struct NotifyServer {
   listener:          usock::Listener,
   max_message_bytes: usize,
}

impl NotifyServer {
   /// Binds `<share_dir>/domain-notify-pipe.sock`.
   pub async fn bind(share_dir: &Path) -> Result<Self> {
      let listener = usock::Listener::bind(&notify_socket_path(share_dir)).await?;
      tracing::info!("notify server listening on {}", listener.local_addr());
      Ok(Self { listener, max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES })
   }

   #[must_use]
   pub const fn with_max_message_bytes(mut self, max_message_bytes: usize) -> Self {
      self.max_message_bytes = max_message_bytes;
      self
   }

   pub fn path(&self) -> &Path {
      self.listener.path()
   }

   /// Accepts launcher connections until `cancel` fires.
   ///
   /// Returns an error if accepting fails or the socket file disappears,
   /// since launchers could no longer reach the agent.
   pub async fn run(
      self,
      cancel: CancellationToken,
      events: mpsc::Sender<WatchEvent>,
      recorder: Arc<dyn EventRecorder>,
   ) -> Result<()> {
      let mut socket_check = time::interval(SOCKET_CHECK_INTERVAL);
      socket_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
      let connections = TaskTracker::new();
      let conn_cancel = cancel.child_token();

      let result = loop {
         tokio::select! {
            () = cancel.cancelled() => break Ok(()),
            _ = socket_check.tick() => {
               if !self.listener.path().exists() {
                  break Err(WatchError::NotifySocketRemoved(self.listener.path().to_path_buf()).into());
               }
            },
            result = self.listener.accept() => match result {
               Ok(stream) => {
                  let connection = Connection {
                     events:            events.clone(),
                     recorder:          Arc::clone(&recorder),
                     cancel:            conn_cancel.clone(),
                     max_message_bytes: self.max_message_bytes,
                  };
                  connections.spawn(connection.handle(stream));
               },
               Err(e) => break Err(e),
            },
         }
      };

      // Connection tasks hold event senders; the channel may only close
      // once they are gone.
      conn_cancel.cancel();
      connections.close();
      connections.wait().await;
      result
   }
}

/// Binds the notification socket under `share_dir` and serves it.
pub async fn run_server(
   share_dir: &Path,
   cancel: CancellationToken,
   events: mpsc::Sender<WatchEvent>,
   recorder: Arc<dyn EventRecorder>,
) -> Result<()> {
   NotifyServer::bind(share_dir)
      .await?
      .run(cancel, events, recorder)
      .await
}

struct Connection {
   events:            mpsc::Sender<WatchEvent>,
   recorder:          Arc<dyn EventRecorder>,
   cancel:            CancellationToken,
   max_message_bytes: usize,
}

impl Connection {
   async fn handle(self, mut stream: usock::Stream) {
      let mut buffer = ipc::SocketBuffer::new();

      loop {
         let request: NotifyRequest = tokio::select! {
            () = self.cancel.cancelled() => break,
            result = buffer.recv_with_limit(&mut stream, self.max_message_bytes) => match result {
               Ok(req) => req,
               Err(e) => {
                  tracing::debug!("notify client read error: {e}");
                  break;
               },
            },
         };

         let response = match request {
            NotifyRequest::DomainEvent(event) => self.forward(event).await,
            NotifyRequest::K8sEvent(event) => {
               self.recorder.record(&event);
               NotifyResponse::Ack { success: true, message: String::new() }
            },
         };

         // A launcher that stops reading acks must not pin the task past
         // shutdown.
         let sent = tokio::select! {
            () = self.cancel.cancelled() => break,
            result = buffer.send(&mut stream, &response) => result,
         };
         if let Err(e) = sent {
            tracing::debug!("notify client write error: {e}");
            break;
         }
      }
   }

   async fn forward(&self, event: WatchEvent) -> NotifyResponse {
      let event_type = event.event_type();
      let key = event.domain().map(|d| d.key()).unwrap_or_default();
      tokio::select! {
         () = self.cancel.cancelled() => NotifyResponse::Ack {
            success: false,
            message: "agent is shutting down".to_string(),
         },
         result = self.events.send(event) => match result {
            Ok(()) => {
               tracing::debug!("received {event_type} event for {key}");
               NotifyResponse::Ack { success: true, message: String::new() }
            },
            Err(_) => NotifyResponse::Ack {
               success: false,
               message: "domain watcher is closed".to_string(),
            },
         },
      }
   }
}

#[cfg(test)]
mod tests {
   use tempfile::TempDir;

   use super::*;

   #[test]
   fn socket_lives_in_share_dir() {
      assert_eq!(
         notify_socket_path(Path::new("/var/run/kubevirt")),
         PathBuf::from("/var/run/kubevirt/domain-notify-pipe.sock")
      );
   }

   #[tokio::test]
   async fn removing_socket_file_stops_server() {
      let dir = TempDir::new().unwrap();
      let server = NotifyServer::bind(dir.path()).await.unwrap();
      let path = server.path().to_path_buf();
      let (tx, _rx) = mpsc::channel(1);

      let handle = tokio::spawn(server.run(CancellationToken::new(), tx, Arc::new(LogRecorder)));
      std::fs::remove_file(&path).unwrap();

      let err = time::timeout(Duration::from_secs(5), handle)
         .await
         .unwrap()
         .unwrap()
         .unwrap_err();
      assert!(matches!(err, crate::Error::Watch(WatchError::NotifySocketRemoved(_))));
   }
}
