//! Push client used by launchers to reach the agent's notification socket.

use std::{
   path::{Path, PathBuf},
   time::Duration,
};

use tokio::time::{self, Instant};

use super::notify_socket_path;
use crate::{
   Error, Result,
   domain::WatchEvent,
   ipc::{self, K8sEvent, NotifyRequest, NotifyResponse, with_timeout},
   usock,
};

const RETRY_INTERVAL: Duration = Duration::from_secs(1);
const RETRY_TIMEOUT: Duration = Duration::from_secs(20);
const SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Lazily connected client for the notification socket.
///
/// A failed send drops the connection; the next send dials again.
pub struct Notifier {
   path:           PathBuf,
   conn:           Option<usock::Stream>,
   buffer:         ipc::SocketBuffer,
   retry_interval: Duration,
   retry_timeout:  Duration,
   send_timeout:   Duration,
}

impl Notifier {
   pub fn new(share_dir: &Path) -> Self {
      Self {
         path:           notify_socket_path(share_dir),
         conn:           None,
         buffer:         ipc::SocketBuffer::new(),
         retry_interval: RETRY_INTERVAL,
         retry_timeout:  RETRY_TIMEOUT,
         send_timeout:   SEND_TIMEOUT,
      }
   }

   #[must_use]
   pub const fn with_retry(mut self, interval: Duration, timeout: Duration) -> Self {
      self.retry_interval = interval;
      self.retry_timeout = timeout;
      self
   }

   #[must_use]
   pub const fn with_send_timeout(mut self, timeout: Duration) -> Self {
      self.send_timeout = timeout;
      self
   }

   pub fn path(&self) -> &Path {
      &self.path
   }

   pub async fn send_domain_event(&mut self, event: WatchEvent) -> Result<()> {
      self
         .send("send_domain_event", &NotifyRequest::DomainEvent(event))
         .await
   }

   pub async fn send_k8s_event(&mut self, event: K8sEvent) -> Result<()> {
      self
         .send("send_k8s_event", &NotifyRequest::K8sEvent(event))
         .await
   }

   pub fn close(&mut self) {
      self.conn = None;
   }

   async fn dial(&self) -> Result<usock::Stream> {
      let deadline = Instant::now() + self.retry_timeout;
      loop {
         match with_timeout("connect", self.send_timeout, usock::Stream::connect(&self.path)).await {
            Ok(stream) => return Ok(stream),
            Err(e) if Instant::now() + self.retry_interval < deadline => {
               tracing::debug!("notify socket {} not ready: {e}", self.path.display());
               time::sleep(self.retry_interval).await;
            },
            Err(e) => return Err(e),
         }
      }
   }

   async fn send(&mut self, op: &'static str, request: &NotifyRequest) -> Result<()> {
      let mut stream = match self.conn.take() {
         Some(stream) => stream,
         None => self.dial().await?,
      };

      let buffer = &mut self.buffer;
      let exchange = async {
         buffer.send(&mut stream, request).await?;
         buffer.recv::<_, NotifyResponse>(&mut stream).await
      };
      let NotifyResponse::Ack { success, message } =
         with_timeout(op, self.send_timeout, exchange).await?;

      self.conn = Some(stream);
      if success {
         Ok(())
      } else {
         Err(Error::Server { op, reason: message })
      }
   }
}
