//! CLI command implementations for virtnode.
//!
//! Each module corresponds to a specific command available to operators.

pub mod ghosts;
pub mod run;
pub mod show_config;
pub mod sockets;
