//! Crash-surviving records of which control socket last represented a VM.
//!
//! A ghost record is written when a VM's control socket first becomes known
//! and removed only once the VM's local state has been cleaned up. If the
//! agent restarts, or the launcher dies without notice, the record is what
//! lets the watcher find the VM again and signal its teardown.

use std::{
   collections::HashMap,
   path::{Path, PathBuf},
   sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
   Result,
   checkpoint::{CheckpointStore, CheckpointStoreExt, FileCheckpointStore},
   domain::key_for,
   error::GhostRecordError,
   util::clean_path,
};

/// Identity snapshot of one VM's control channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GhostRecord {
   pub name:        String,
   pub namespace:   String,
   pub socket_file: PathBuf,
   pub uid:         String,
}

impl GhostRecord {
   pub fn key(&self) -> String {
      key_for(&self.namespace, &self.name)
   }

   fn is_complete(&self) -> bool {
      !self.name.is_empty()
         && !self.namespace.is_empty()
         && !self.uid.is_empty()
         && !self.socket_file.as_os_str().is_empty()
   }
}

/// In-memory ghost records mirrored to one checkpoint per UID.
///
/// A single lock covers both the map and the disk mutation, so `add`,
/// `delete` and the readers are linearizable with respect to each other.
pub struct GhostRecordStore {
   checkpoint: Arc<dyn CheckpointStore>,
   records:    Mutex<HashMap<String, GhostRecord>>,
}

impl GhostRecordStore {
   /// Creates an empty store writing through to `checkpoint`.
   pub fn new(checkpoint: Arc<dyn CheckpointStore>) -> Self {
      Self { checkpoint, records: Mutex::new(HashMap::new()) }
   }

   /// Opens the checkpoint directory at `base` and loads every record in it.
   pub fn open(base: &Path) -> Result<Self> {
      let checkpoint = FileCheckpointStore::new(base)?;
      Self::initialize(Arc::new(checkpoint))
   }

   /// Rebuilds the store from every checkpoint in `checkpoint`.
   ///
   /// Unreadable or incomplete checkpoints are logged and skipped so a
   /// partially corrupted directory never blocks agent startup. So is a
   /// checkpoint whose file name is not its uid, since `delete` could never
   /// remove it. Failing to list the directory at all is an error.
   pub fn initialize(checkpoint: Arc<dyn CheckpointStore>) -> Result<Self> {
      let keys = checkpoint.list_keys()?;
      let mut records: HashMap<String, GhostRecord> = HashMap::with_capacity(keys.len());

      for key in keys {
         let record: GhostRecord = match checkpoint.get(&key) {
            Ok(record) => record,
            Err(e) => {
               tracing::warn!("skipping unreadable ghost record checkpoint {key}: {e}");
               continue;
            },
         };
         if !record.is_complete() {
            tracing::warn!("skipping incomplete ghost record checkpoint {key}: {record:?}");
            continue;
         }
         if record.uid != key {
            tracing::warn!(
               "skipping ghost record checkpoint {key} holding uid {} for {}",
               record.uid,
               record.key()
            );
            continue;
         }

         let record_key = record.key();
         if let Some(existing) = records.get(&record_key) {
            tracing::warn!(
               "ignoring duplicate ghost record {record_key} (uid {}), keeping uid {}",
               record.uid,
               existing.uid
            );
            continue;
         }
         records.insert(record_key, record);
      }

      tracing::info!("loaded {} ghost records", records.len());
      Ok(Self { checkpoint, records: Mutex::new(records) })
   }

   /// Returns the UID last recorded for `namespace/name`, if any.
   pub fn last_known_uid(&self, key: &str) -> Option<String> {
      self.records.lock().get(key).map(|r| r.uid.clone())
   }

   pub fn exists(&self, namespace: &str, name: &str) -> bool {
      self.records.lock().contains_key(&key_for(namespace, name))
   }

   /// Records that `socket_file` represents the VM `namespace/name` with `uid`.
   ///
   /// Adding the same record twice is a no-op. A record with a different UID
   /// or socket is never overwritten: it may be the only trace of a VM that
   /// shut down uncleanly, so it must be deleted first.
   pub fn add(&self, namespace: &str, name: &str, socket_file: &Path, uid: &str) -> Result<()> {
      if namespace.is_empty() {
         return Err(GhostRecordError::MissingField { field: "namespace" }.into());
      }
      if name.is_empty() {
         return Err(GhostRecordError::MissingField { field: "name" }.into());
      }
      if socket_file.as_os_str().is_empty() {
         return Err(GhostRecordError::MissingField { field: "socketFile" }.into());
      }
      if uid.is_empty() {
         return Err(GhostRecordError::MissingField { field: "uid" }.into());
      }

      let key = key_for(namespace, name);
      let mut records = self.records.lock();

      if let Some(existing) = records.get(&key) {
         if existing.uid == uid && clean_path(&existing.socket_file) == clean_path(socket_file) {
            return Ok(());
         }
         return Err(
            GhostRecordError::Conflict {
               key,
               existing_uid: existing.uid.clone(),
               existing_socket: existing.socket_file.clone(),
               uid: uid.to_string(),
               socket: socket_file.to_path_buf(),
            }
            .into(),
         );
      }
      if let Some(owner) = records.values().find(|r| r.uid == uid) {
         return Err(
            GhostRecordError::UidInUse { uid: uid.to_string(), owner: owner.key(), key }.into(),
         );
      }

      let record = GhostRecord {
         name:        name.to_string(),
         namespace:   namespace.to_string(),
         socket_file: socket_file.to_path_buf(),
         uid:         uid.to_string(),
      };
      self.checkpoint.store(uid, &record)?;
      tracing::debug!("added ghost record {key} (uid {uid}, socket {})", socket_file.display());
      records.insert(key, record);
      Ok(())
   }

   /// Removes the record for `namespace/name` from disk, then from memory.
   pub fn delete(&self, namespace: &str, name: &str) -> Result<()> {
      let key = key_for(namespace, name);
      let mut records = self.records.lock();

      let Some(record) = records.get(&key) else {
         return Ok(());
      };
      if record.uid.is_empty() {
         return Err(GhostRecordError::EmptyUid { key }.into());
      }

      self.checkpoint.delete(&record.uid)?;
      tracing::debug!("deleted ghost record {key} (uid {})", record.uid);
      records.remove(&key);
      Ok(())
   }

   /// Snapshot of every current record, ordered by key.
   pub fn list(&self) -> Vec<GhostRecord> {
      let mut records: Vec<GhostRecord> = self.records.lock().values().cloned().collect();
      records.sort_by(|a, b| (&a.namespace, &a.name).cmp(&(&b.namespace, &b.name)));
      records
   }

   /// Finds the record whose socket matches `socket_file` after normalization.
   pub fn find_by_socket(&self, socket_file: &Path) -> Option<GhostRecord> {
      let wanted = clean_path(socket_file);
      self
         .records
         .lock()
         .values()
         .find(|r| clean_path(&r.socket_file) == wanted)
         .cloned()
   }

   pub fn len(&self) -> usize {
      self.records.lock().len()
   }

   pub fn is_empty(&self) -> bool {
      self.records.lock().is_empty()
   }
}
