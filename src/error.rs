use std::{io, path::PathBuf};

use thiserror::Error;

use crate::usock::SocketError;

/// Main error type for the virtnode agent.
///
/// This enum represents all errors surfaced by the reconciliation core: ghost
/// record invariant violations, checkpoint persistence failures, socket and IPC
/// errors, configuration problems and watcher lifecycle errors.
#[derive(Debug, Error)]
pub enum Error {
   /// I/O error occurred during file or socket operations.
   #[error("io error: {0}")]
   Io(#[from] io::Error),

   /// JSON serialization or deserialization error occurred.
   #[error("json error: {0}")]
   Json(#[from] serde_json::Error),

   /// TOML serialization error occurred.
   #[error("toml error: {0}")]
   Toml(#[from] toml::ser::Error),

   /// Ghost record invariant was violated by the caller.
   #[error("ghost record error: {0}")]
   GhostRecord(#[from] GhostRecordError),

   /// Checkpoint persistence failed.
   #[error("checkpoint error: {0}")]
   Checkpoint(#[from] CheckpointError),

   /// Configuration-related error occurred.
   #[error("config error: {0}")]
   Config(#[from] ConfigError),

   /// Inter-process communication error occurred.
   #[error("ipc error: {0}")]
   Ipc(#[from] IpcError),

   /// Socket communication error occurred.
   #[error("socket error: {0}")]
   Socket(#[from] SocketError),

   /// Domain watcher lifecycle error occurred.
   #[error("watch error: {0}")]
   Watch(#[from] WatchError),

   /// Peer reported an error while serving an operation.
   #[error("server error during {op}: {reason}")]
   Server { op: &'static str, reason: String },

   /// Unexpected response received from a peer during an operation.
   #[error("unexpected response from server during {0}")]
   UnexpectedResponse(&'static str),

   /// An operation did not finish within its deadline.
   #[error("{op} timed out after {ms}ms")]
   Timeout { op: &'static str, ms: u64 },
}

impl Error {
   pub fn exit_code(&self) -> i32 {
      match self {
         Self::GhostRecord(_) => 2,
         Self::Config(_) => 3,
         Self::Watch(WatchError::NotifyServerExited(_) | WatchError::NotifySocketRemoved(_)) => 4,
         Self::Timeout { .. } => 11,
         _ => 1,
      }
   }
}

/// Invariant violations reported by the ghost record store.
///
/// These indicate a programming error in the component managing VM lifecycle
/// and are always returned to the caller.
#[derive(Debug, Error)]
pub enum GhostRecordError {
   /// A required field was empty on `add`.
   #[error("can not add ghost record when '{field}' is empty")]
   MissingField { field: &'static str },

   /// A record already exists for the key with a different uid or socket.
   #[error(
      "can not add ghost record for {key}: entry already exists with uid {existing_uid} and \
       socket {existing_path}, refusing uid {uid} and socket {requested_path}",
      existing_path = .existing_socket.display(),
      requested_path = .socket.display()
   )]
   Conflict {
      key:             String,
      existing_uid:    String,
      existing_socket: PathBuf,
      uid:             String,
      socket:          PathBuf,
   },

   /// The uid already identifies the record of another VM.
   #[error("can not add ghost record for {key}: uid {uid} already belongs to {owner}")]
   UidInUse { uid: String, owner: String, key: String },

   /// A stored record without a UID cannot be located on disk.
   #[error("unable to remove ghost record with empty uid for {key}")]
   EmptyUid { key: String },
}

/// Errors raised by the keyed checkpoint store.
#[derive(Debug, Error)]
pub enum CheckpointError {
   /// Key is empty or would escape the checkpoint directory.
   #[error("invalid checkpoint key: {0:?}")]
   InvalidKey(String),

   /// No checkpoint exists for the key.
   #[error("checkpoint not found: {0}")]
   NotFound(String),

   /// Failed to create the checkpoint directory.
   #[error("failed to create checkpoint directory {dir}: {source}", dir = .path.display())]
   CreateDir {
      path:   PathBuf,
      #[source]
      source: io::Error,
   },

   /// Failed to write a checkpoint.
   #[error("failed to write checkpoint {key}: {source}")]
   Write {
      key:    String,
      #[source]
      source: io::Error,
   },

   /// Failed to read a checkpoint.
   #[error("failed to read checkpoint {key}: {source}")]
   Read {
      key:    String,
      #[source]
      source: io::Error,
   },

   /// Failed to delete a checkpoint.
   #[error("failed to delete checkpoint {key}: {source}")]
   Delete {
      key:    String,
      #[source]
      source: io::Error,
   },

   /// Failed to list checkpoint keys.
   #[error("failed to list checkpoints: {0}")]
   List(#[source] io::Error),

   /// Checkpoint contents could not be encoded.
   #[error("failed to encode checkpoint {key}: {source}")]
   Encode {
      key:    String,
      #[source]
      source: serde_json::Error,
   },

   /// Checkpoint contents could not be decoded.
   #[error("failed to decode checkpoint {key}: {source}")]
   Decode {
      key:    String,
      #[source]
      source: serde_json::Error,
   },
}

/// Errors that can occur during inter-process communication (IPC).
///
/// These errors are related to message serialization, deserialization, and I/O
/// operations when communicating between processes.
#[derive(Debug, Error)]
pub enum IpcError {
   /// The message size exceeds the maximum allowed size.
   #[error("message too large: {0} bytes")]
   MessageTooLarge(usize),

   /// Failed to serialize a message for IPC transmission.
   #[error("failed to serialize: {0}")]
   Serialize(#[source] postcard::Error),

   /// Failed to deserialize a message received via IPC.
   #[error("failed to deserialize: {0}")]
   Deserialize(#[source] postcard::Error),

   /// Failed to read data from the IPC channel.
   #[error("failed to read: {0}")]
   Read(#[source] io::Error),

   /// Failed to write data to the IPC channel.
   #[error("failed to write: {0}")]
   Write(#[source] io::Error),

   /// Peer speaks no protocol version we support.
   #[error("no compatible protocol version (peer offered {0:?})")]
   IncompatibleVersion(Vec<u32>),
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
   /// The configuration file or environment could not be parsed.
   #[error("failed to parse config: {0}")]
   Parse(String),

   /// Configuration values are out of range.
   #[error("invalid config: {0}")]
   Invalid(String),
}

/// Domain watcher lifecycle errors.
#[derive(Debug, Error)]
pub enum WatchError {
   /// The event receiver was already handed out.
   #[error("watch stream already taken")]
   AlreadyWatching,

   /// The watcher was stopped and cannot be restarted.
   #[error("domain watcher has been stopped")]
   Stopped,

   /// The embedded notification server exited while the watcher was running.
   #[error("notify server exited: {0}")]
   NotifyServerExited(String),

   /// The watcher's worker task panicked or was aborted.
   #[error("domain watcher worker failed: {0}")]
   Worker(String),

   /// The notification socket was removed from under the server.
   #[error("notify socket {path} was removed", path = _0.display())]
   NotifySocketRemoved(PathBuf),
}

/// Standard result type using [`enum@Error`] as the default error type
pub type Result<T, E = Error> = std::result::Result<T, E>;
