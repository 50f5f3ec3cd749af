//! Node-agent domain reconciliation.
//!
//! Tracks which control socket represents each VM on the node, survives agent
//! restarts through on-disk ghost records, and turns launcher pushes, periodic
//! resyncs and socket liveness probes into a single domain event stream.

pub mod cache;
pub mod checkpoint;
pub mod cmd;
pub mod cmdclient;
pub mod config;
pub mod domain;
pub mod error;
pub mod ghost;
pub mod ipc;
pub mod notify;
pub mod usock;
pub mod util;
pub mod watcher;

pub use error::{Error, Result};
