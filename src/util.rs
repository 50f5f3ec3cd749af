//! Utility functions for filesystem operations

use std::{
   fs::{self, File},
   io,
   path::{Component, Path, PathBuf},
};

/// Flushes directory metadata so a preceding rename survives a crash.
pub fn fsync_dir(dir: &Path) -> io::Result<()> {
   File::open(dir)?.sync_all()
}

/// Returns the sibling temp path used while replacing `path`.
pub fn temp_path(path: &Path) -> PathBuf {
   let mut name = path.file_name().unwrap_or_default().to_os_string();
   name.push(".tmp");
   path.with_file_name(name)
}

/// Replaces `path` with `data` through a temp file, rename and directory fsync.
///
/// Readers observe either the previous contents or the new ones, never a torn
/// write.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
   if let Some(parent) = path.parent() {
      fs::create_dir_all(parent)?;
   }
   let tmp_path = temp_path(path);
   {
      let mut file = File::create(&tmp_path)?;
      io::Write::write_all(&mut file, data)?;
      file.sync_all()?;
   }

   #[cfg(feature = "failpoints")]
   fail::fail_point!("checkpoint.before_rename", |_| {
      let _ = fs::remove_file(&tmp_path);
      Err(io::Error::other("failpoint checkpoint.before_rename"))
   });

   fs::rename(&tmp_path, path)?;
   if let Some(parent) = path.parent() {
      fsync_dir(parent)?;
   }
   Ok(())
}

/// Lexically normalizes a path: collapses `.`, resolves `..` against earlier
/// components and drops duplicate or trailing separators. The filesystem is
/// never consulted, so symlinks are left alone.
pub fn clean_path(path: &Path) -> PathBuf {
   let mut out: Vec<Component<'_>> = Vec::new();
   for component in path.components() {
      match component {
         Component::CurDir => {},
         Component::ParentDir => match out.last() {
            Some(Component::Normal(_)) => {
               out.pop();
            },
            Some(Component::RootDir | Component::Prefix(_)) => {},
            _ => out.push(component),
         },
         other => out.push(other),
      }
   }

   if out.is_empty() {
      return PathBuf::from(".");
   }
   out.iter().collect()
}
