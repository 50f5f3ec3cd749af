//! Candidate socket listing.

use std::path::PathBuf;

use console::style;
use serde::Serialize;

use crate::{
   Result,
   cmdclient::{FsSocketRegistry, SocketRegistry},
   config::Config,
   ghost::GhostRecordStore,
   watcher::list_sockets,
};

#[derive(Serialize)]
struct SocketEntry {
   path:         PathBuf,
   unresponsive: bool,
   monitored:    bool,
   ghost:        Option<String>,
}

/// Lists every socket the watcher would consider, registered or ghost-only.
pub fn execute(cfg: &Config, json: bool) -> Result<()> {
   let store = GhostRecordStore::open(&cfg.ghost_records_dir())?;
   let registry = FsSocketRegistry::from_config(cfg);

   let entries: Vec<SocketEntry> = list_sockets(&registry, &store.list())?
      .into_iter()
      .map(|path| SocketEntry {
         unresponsive: registry.is_socket_unresponsive(&path),
         monitored:    registry.socket_monitoring_enabled(&path),
         ghost:        store.find_by_socket(&path).map(|r| r.key()),
         path,
      })
      .collect();

   if json {
      println!("{}", serde_json::to_string_pretty(&entries)?);
      return Ok(());
   }

   if entries.is_empty() {
      println!("{}", style("No control sockets").dim());
      return Ok(());
   }

   println!("{}", style("Control sockets:").bold());
   println!();
   for entry in entries {
      let dot = if entry.unresponsive { style("●").red() } else { style("●").green() };
      let owner = entry.ghost.as_deref().unwrap_or("no ghost record");
      let legacy = if entry.monitored { "" } else { ", legacy" };
      println!(
         "  {} {} {}",
         dot,
         entry.path.display(),
         style(format!("({owner}{legacy})")).dim()
      );
   }
   Ok(())
}
