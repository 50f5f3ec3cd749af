//! Keyed checkpoint persistence: one file per key under a base directory.
//!
//! The directory listing is the index; there is no manifest to keep in sync.

use std::{
   fs,
   io::ErrorKind,
   path::{Path, PathBuf},
};

use serde::{Serialize, de::DeserializeOwned};

use crate::{error::CheckpointError, util};

/// Generic keyed persistence used for crash-surviving node state.
pub trait CheckpointStore: Send + Sync {
   fn store_raw(&self, key: &str, data: &[u8]) -> Result<(), CheckpointError>;

   fn get_raw(&self, key: &str) -> Result<Vec<u8>, CheckpointError>;

   /// Removing an absent key succeeds.
   fn delete(&self, key: &str) -> Result<(), CheckpointError>;

   fn list_keys(&self) -> Result<Vec<String>, CheckpointError>;
}

/// Typed helpers over [`CheckpointStore`], encoding values as JSON.
pub trait CheckpointStoreExt: CheckpointStore {
   fn store<T: Serialize>(&self, key: &str, value: &T) -> Result<(), CheckpointError> {
      let data = serde_json::to_vec(value)
         .map_err(|source| CheckpointError::Encode { key: key.to_string(), source })?;
      self.store_raw(key, &data)
   }

   fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, CheckpointError> {
      let data = self.get_raw(key)?;
      serde_json::from_slice(&data)
         .map_err(|source| CheckpointError::Decode { key: key.to_string(), source })
   }
}

impl<S: CheckpointStore + ?Sized> CheckpointStoreExt for S {}

/// Checkpoints stored as individual files in `base`.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
   base: PathBuf,
}

impl FileCheckpointStore {
   pub fn new(base: impl Into<PathBuf>) -> Result<Self, CheckpointError> {
      let base = base.into();
      fs::create_dir_all(&base)
         .map_err(|source| CheckpointError::CreateDir { path: base.clone(), source })?;
      Ok(Self { base })
   }

   pub fn base(&self) -> &Path {
      &self.base
   }

   fn path_for(&self, key: &str) -> Result<PathBuf, CheckpointError> {
      validate_key(key)?;
      Ok(self.base.join(key))
   }
}

fn validate_key(key: &str) -> Result<(), CheckpointError> {
   let invalid = key.is_empty()
      || key == "."
      || key == ".."
      || key.contains(['/', '\\', '\0'])
      || key.ends_with(".tmp");
   if invalid {
      return Err(CheckpointError::InvalidKey(key.to_string()));
   }
   Ok(())
}

impl CheckpointStore for FileCheckpointStore {
   fn store_raw(&self, key: &str, data: &[u8]) -> Result<(), CheckpointError> {
      let path = self.path_for(key)?;
      util::write_atomic(&path, data)
         .map_err(|source| CheckpointError::Write { key: key.to_string(), source })
   }

   fn get_raw(&self, key: &str) -> Result<Vec<u8>, CheckpointError> {
      let path = self.path_for(key)?;
      fs::read(&path).map_err(|source| {
         if source.kind() == ErrorKind::NotFound {
            CheckpointError::NotFound(key.to_string())
         } else {
            CheckpointError::Read { key: key.to_string(), source }
         }
      })
   }

   fn delete(&self, key: &str) -> Result<(), CheckpointError> {
      let path = self.path_for(key)?;
      match fs::remove_file(&path) {
         Ok(()) => {},
         Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
         Err(source) => return Err(CheckpointError::Delete { key: key.to_string(), source }),
      }
      util::fsync_dir(&self.base)
         .map_err(|source| CheckpointError::Delete { key: key.to_string(), source })
   }

   fn list_keys(&self) -> Result<Vec<String>, CheckpointError> {
      let mut keys = Vec::new();
      for entry in fs::read_dir(&self.base).map_err(CheckpointError::List)? {
         let entry = entry.map_err(CheckpointError::List)?;
         let file_type = entry.file_type().map_err(CheckpointError::List)?;
         if !file_type.is_file() {
            continue;
         }
         let Some(name) = entry.file_name().to_str().map(String::from) else {
            tracing::warn!("skipping non-utf8 checkpoint file {}", entry.path().display());
            continue;
         };
         if validate_key(&name).is_err() {
            continue;
         }
         keys.push(name);
      }
      keys.sort();
      Ok(keys)
   }
}
