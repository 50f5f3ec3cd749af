//! Access to the per-VM launcher control sockets.
//!
//! The watcher only needs three things from a launcher: dial it, ask for its
//! domain, and know where its socket lives. Each is a trait so tests can run
//! the watcher against in-process fakes.

use std::{
   path::{Path, PathBuf},
   time::Duration,
};

use async_trait::async_trait;

use crate::{Result, domain::Domain};

mod registry;
mod server;
mod unix;

pub use registry::FsSocketRegistry;
pub use server::{CmdServer, DomainSource};
pub use unix::{UnixConnector, UnixControlClient};

pub const STANDARD_LAUNCHER_SOCKET_FILE_NAME: &str = "launcher-sock";
pub const STANDARD_LAUNCHER_UNRESPONSIVE_FILE_NAME: &str = "launcher-unresponsive";
/// Suffix of sockets in the shared legacy directory (`<uid>_sock`).
pub const LEGACY_SOCKET_SUFFIX: &str = "_sock";

/// Default bound for dialing a socket and for a single RPC.
pub const SHORT_TIMEOUT: Duration = Duration::from_secs(5);

/// Open session with one launcher. Dropping the client closes it.
#[async_trait]
pub trait ControlClient: Send {
   /// Returns the launcher's domain, or `None` if it has not defined one yet.
   async fn get_domain(&mut self) -> Result<Option<Domain>>;

   async fn ping(&mut self) -> Result<()>;
}

#[async_trait]
pub trait Connector: Send + Sync {
   /// Dials `socket` and completes the version handshake.
   async fn connect(&self, socket: &Path) -> Result<Box<dyn ControlClient>>;

   /// Dials `socket` within `timeout` and hangs up immediately.
   async fn probe(&self, socket: &Path, timeout: Duration) -> Result<()>;
}

/// Knows where launcher sockets live on this node.
pub trait SocketRegistry: Send + Sync {
   fn list_all_sockets(&self) -> Result<Vec<PathBuf>>;

   /// Leaves a durable marker so later rounds treat `socket` as dead.
   fn mark_socket_unresponsive(&self, socket: &Path) -> Result<()>;

   fn is_socket_unresponsive(&self, socket: &Path) -> bool;

   /// Whether the watchdog should probe `socket` at all.
   fn socket_monitoring_enabled(&self, _socket: &Path) -> bool {
      true
   }
}
