//! Wire protocol for the control and notification sockets.
//!
//! Every message is a 4-byte little-endian length followed by a postcard
//! payload.

use std::{future::Future, time::Duration};

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::{
   io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
   time,
};

use crate::{
   Error, Result,
   domain::{Domain, WatchEvent},
   error::IpcError,
};

pub const PROTOCOL_VERSIONS: &[u32] = &[1];

pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 16 * 1024 * 1024;

/// Picks the highest version both sides support.
pub fn negotiate_protocol(client_versions: &[u32]) -> Option<u32> {
   let mut best: Option<u32> = None;
   for &version in client_versions {
      if PROTOCOL_VERSIONS.contains(&version) {
         best = Some(best.map_or(version, |current| current.max(version)));
      }
   }
   best
}

/// Runs `fut`, failing with [`Error::Timeout`] once `limit` elapses.
pub async fn with_timeout<T>(
   op: &'static str,
   limit: Duration,
   fut: impl Future<Output = Result<T>>,
) -> Result<T> {
   match time::timeout(limit, fut).await {
      Ok(result) => result,
      Err(_) => Err(Error::Timeout { op, ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX) }),
   }
}

/// Requests sent by the agent to a VM launcher's control socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CmdRequest {
   Hello { protocol_versions: Vec<u32> },
   GetDomain,
   Ping,
}

/// Replies from a VM launcher's control socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CmdResponse {
   Hello { protocol_version: u32 },
   Domain { domain: Option<Domain> },
   Pong,
   Error { code: String, message: String },
}

/// Cluster event a launcher asks the agent to record against its VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct K8sEvent {
   pub namespace:  String,
   pub name:       String,
   pub uid:        String,
   pub event_type: String,
   pub reason:     String,
   pub message:    String,
}

/// Messages pushed to the agent's notification socket
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotifyRequest {
   DomainEvent(WatchEvent),
   K8sEvent(K8sEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum NotifyResponse {
   Ack { success: bool, message: String },
}

/// Stack-allocated buffer for socket I/O operations
pub struct SocketBuffer {
   buf: SmallVec<[u8; 2048]>,
}

impl Extend<u8> for &mut SocketBuffer {
   fn extend<I: IntoIterator<Item = u8>>(&mut self, iter: I) {
      self.buf.extend(iter);
   }
}

impl Default for SocketBuffer {
   fn default() -> Self {
      Self::new()
   }
}

impl SocketBuffer {
   pub fn new() -> Self {
      Self { buf: SmallVec::new() }
   }

   #[allow(
      clippy::future_not_send,
      reason = "Generic async function with references - Send bound would be too restrictive for \
                trait"
   )]
   /// Serializes and sends a message with length prefix
   pub async fn send<W, T>(&mut self, writer: &mut W, msg: &T) -> Result<()>
   where
      W: AsyncWrite + Unpin,
      T: Serialize,
   {
      self.buf.clear();
      self.buf.resize(4, 0u8);
      _ = postcard::to_extend(msg, &mut *self).map_err(IpcError::Serialize)?;
      let payload_len = self.buf.len() - 4;
      let payload_len =
         u32::try_from(payload_len).map_err(|_| IpcError::MessageTooLarge(payload_len))?;
      self.buf[..4].copy_from_slice(&payload_len.to_le_bytes());
      writer.write_all(&self.buf).await.map_err(IpcError::Write)?;
      writer.flush().await.map_err(IpcError::Write)?;
      Ok(())
   }

   /// Receives and deserializes a message with length prefix
   pub async fn recv<'de, R, T>(&'de mut self, reader: &mut R) -> Result<T>
   where
      R: AsyncRead + Unpin,
      T: Deserialize<'de>,
   {
      self
         .recv_with_limit(reader, DEFAULT_MAX_MESSAGE_BYTES)
         .await
   }

   pub async fn recv_with_limit<'de, R, T>(
      &'de mut self,
      reader: &mut R,
      max_len: usize,
   ) -> Result<T>
   where
      R: AsyncRead + Unpin,
      T: Deserialize<'de>,
   {
      let mut len_buf = [0u8; 4];
      reader
         .read_exact(&mut len_buf)
         .await
         .map_err(IpcError::Read)?;
      let len = u32::from_le_bytes(len_buf) as usize;

      if len > max_len {
         return Err(IpcError::MessageTooLarge(len).into());
      }

      self.buf.resize(len, 0u8);
      reader
         .read_exact(self.buf.as_mut_slice())
         .await
         .map_err(IpcError::Read)?;
      postcard::from_bytes(&self.buf).map_err(|e| IpcError::Deserialize(e).into())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn negotiate_picks_highest_shared_version() {
      assert_eq!(negotiate_protocol(&[1]), Some(1));
      assert_eq!(negotiate_protocol(&[0, 1, 7]), Some(1));
      assert_eq!(negotiate_protocol(&[7]), None);
   }

   #[tokio::test]
   async fn domain_event_survives_the_wire() {
      let (mut client, mut server) = tokio::io::duplex(4096);
      let mut domain = Domain::new_minimal("ns1", "vm1");
      domain.meta.uid = "u1".to_string();
      domain.meta.deletion_timestamp = Some(chrono::Utc::now());

      let mut out = SocketBuffer::new();
      out
         .send(&mut client, &NotifyRequest::DomainEvent(WatchEvent::Modified(domain.clone())))
         .await
         .unwrap();

      let mut inbuf = SocketBuffer::new();
      let received: NotifyRequest = inbuf.recv(&mut server).await.unwrap();
      match received {
         NotifyRequest::DomainEvent(WatchEvent::Modified(d)) => assert_eq!(d, domain),
         other => panic!("unexpected message {other:?}"),
      }
   }
}
