//! Ghost record inspection commands.

use console::style;

use crate::{Result, config::Config, ghost::GhostRecordStore};

/// Prints every ghost record on this node.
pub fn list(cfg: &Config, json: bool) -> Result<()> {
   let store = GhostRecordStore::open(&cfg.ghost_records_dir())?;
   let records = store.list();

   if json {
      println!("{}", serde_json::to_string_pretty(&records)?);
      return Ok(());
   }

   if records.is_empty() {
      println!("{}", style("No ghost records").dim());
      return Ok(());
   }

   println!("{}", style("Ghost records:").bold());
   println!();
   for record in records {
      println!(
         "  {} {} {}",
         style(record.key()).cyan(),
         record.socket_file.display(),
         style(format!("(uid {})", record.uid)).dim()
      );
   }
   Ok(())
}

/// Removes the ghost record for `namespace/name`.
pub fn delete(cfg: &Config, namespace: &str, name: &str) -> Result<()> {
   let store = GhostRecordStore::open(&cfg.ghost_records_dir())?;
   if !store.exists(namespace, name) {
      println!("{}", style(format!("No ghost record for {namespace}/{name}")).dim());
      return Ok(());
   }

   store.delete(namespace, name)?;
   println!("{} {namespace}/{name}", style("Deleted ghost record").green());
   Ok(())
}
