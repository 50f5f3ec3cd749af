//! Agent run loop.
//!
//! Wires the ghost record store, socket registry and connector into a domain
//! watcher, mirrors its stream into a cache, and runs until interrupted or
//! until the watcher fails.

use std::sync::Arc;

use console::style;
use tokio::signal::{
   self,
   unix::{SignalKind, signal as unix_signal},
};

use crate::{
   Result,
   cache::DomainCache,
   cmdclient::{FsSocketRegistry, UnixConnector},
   config::Config,
   ghost::GhostRecordStore,
   watcher::{DomainWatcher, WatcherOptions},
};

/// Executes the run command.
pub async fn execute(cfg: &Config) -> Result<()> {
   let ghosts = Arc::new(GhostRecordStore::open(&cfg.ghost_records_dir())?);
   let registry = Arc::new(FsSocketRegistry::from_config(cfg));
   let connector = Arc::new(UnixConnector::from_config(cfg));
   let watcher = DomainWatcher::new(ghosts, registry, connector, WatcherOptions::from_config(cfg));

   let cache = Arc::new(DomainCache::new());
   let cache_task = cache.list_and_watch(&watcher).await?;

   println!(
      "{} {} {}",
      style("Watching").green(),
      style(format!("{} domains", cache.len())).bold(),
      style(format!("(notify socket {})", watcher.notify_socket_path().display())).dim()
   );
   println!("{}", style("Press Ctrl+C to stop").dim());

   let mut terminate = unix_signal(SignalKind::terminate())?;
   let finished = watcher.finished();
   tokio::select! {
      _ = signal::ctrl_c() => {
         println!("\n{}", style("Shutting down...").yellow());
      },
      _ = terminate.recv() => {
         println!("{}", style("Terminated, shutting down...").yellow());
      },
      () = finished.cancelled() => {},
   }

   let result = watcher.stop().await;
   if let Err(e) = cache_task.await {
      tracing::warn!("domain cache task failed: {e}");
   }

   match &result {
      Ok(()) => println!("{}", style("Watcher stopped").green()),
      Err(_) => println!("{}", style("Watcher failed").red()),
   }
   result
}
