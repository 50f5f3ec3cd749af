use std::{
   fs,
   io::ErrorKind,
   path::{Path, PathBuf},
};

use super::{
   LEGACY_SOCKET_SUFFIX, STANDARD_LAUNCHER_SOCKET_FILE_NAME,
   STANDARD_LAUNCHER_UNRESPONSIVE_FILE_NAME, SocketRegistry,
};
use crate::{Result, config::Config};

const POD_SOCKET_VOLUME: &str = "volumes/kubernetes.io~empty-dir/sockets";

/// Launcher sockets discovered on the host filesystem.
///
/// Two layouts coexist: launchers from before per-pod sockets drop
/// `<uid>_sock` into one shared directory, newer ones expose `launcher-sock`
/// inside an empty-dir volume of their pod.
#[derive(Debug, Clone)]
pub struct FsSocketRegistry {
   legacy_sockets_dir: PathBuf,
   pods_base_dir:      PathBuf,
}

impl FsSocketRegistry {
   pub fn new(legacy_sockets_dir: impl Into<PathBuf>, pods_base_dir: impl Into<PathBuf>) -> Self {
      Self { legacy_sockets_dir: legacy_sockets_dir.into(), pods_base_dir: pods_base_dir.into() }
   }

   pub fn from_config(cfg: &Config) -> Self {
      Self::new(cfg.legacy_sockets_dir(), cfg.pods_base_dir.clone())
   }

   pub fn legacy_sockets_dir(&self) -> &Path {
      &self.legacy_sockets_dir
   }

   pub fn legacy_socket_path(&self, uid: &str) -> PathBuf {
      self.legacy_sockets_dir.join(format!("{uid}{LEGACY_SOCKET_SUFFIX}"))
   }

   pub fn socket_directory_on_host(&self, pod_uid: &str) -> PathBuf {
      self.pods_base_dir.join(pod_uid).join(POD_SOCKET_VOLUME)
   }

   pub fn socket_file_path_on_host(&self, pod_uid: &str) -> PathBuf {
      self
         .socket_directory_on_host(pod_uid)
         .join(STANDARD_LAUNCHER_SOCKET_FILE_NAME)
   }

   fn legacy_sockets(&self, out: &mut Vec<PathBuf>) -> Result<()> {
      let entries = match fs::read_dir(&self.legacy_sockets_dir) {
         Ok(entries) => entries,
         Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
         Err(e) => return Err(e.into()),
      };

      let mut found = Vec::new();
      for entry in entries {
         let entry = entry?;
         if entry.file_type()?.is_dir() {
            continue;
         }
         if entry.file_name().to_string_lossy().contains(LEGACY_SOCKET_SUFFIX) {
            found.push(entry.path());
         }
      }
      found.sort();
      out.extend(found);
      Ok(())
   }

   fn pod_sockets(&self, out: &mut Vec<PathBuf>) -> Result<()> {
      let entries = match fs::read_dir(&self.pods_base_dir) {
         Ok(entries) => entries,
         Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
         Err(e) => return Err(e.into()),
      };

      let mut found = Vec::new();
      for entry in entries {
         let entry = entry?;
         if !entry.file_type()?.is_dir() {
            continue;
         }
         let socket = self.socket_file_path_on_host(&entry.file_name().to_string_lossy());
         if socket.try_exists()? {
            found.push(socket);
         }
      }
      found.sort();
      out.extend(found);
      Ok(())
   }
}

fn unresponsive_marker(socket: &Path) -> PathBuf {
   socket
      .parent()
      .unwrap_or_else(|| Path::new("."))
      .join(STANDARD_LAUNCHER_UNRESPONSIVE_FILE_NAME)
}

impl SocketRegistry for FsSocketRegistry {
   fn list_all_sockets(&self) -> Result<Vec<PathBuf>> {
      let mut sockets = Vec::new();
      self.legacy_sockets(&mut sockets)?;
      self.pod_sockets(&mut sockets)?;
      Ok(sockets)
   }

   fn mark_socket_unresponsive(&self, socket: &Path) -> Result<()> {
      fs::File::create(unresponsive_marker(socket))?;
      Ok(())
   }

   fn is_socket_unresponsive(&self, socket: &Path) -> bool {
      if unresponsive_marker(socket).exists() {
         return true;
      }
      !socket.exists()
   }

   fn socket_monitoring_enabled(&self, socket: &Path) -> bool {
      socket
         .file_name()
         .is_some_and(|name| name == STANDARD_LAUNCHER_SOCKET_FILE_NAME)
   }
}

#[cfg(test)]
mod tests {
   use tempfile::TempDir;

   use super::*;

   fn registry(dir: &TempDir) -> FsSocketRegistry {
      FsSocketRegistry::new(dir.path().join("share/sockets"), dir.path().join("pods"))
   }

   #[test]
   fn missing_directories_yield_no_sockets() {
      let dir = TempDir::new().unwrap();
      assert!(registry(&dir).list_all_sockets().unwrap().is_empty());
   }

   #[test]
   fn lists_legacy_then_pod_sockets() {
      let dir = TempDir::new().unwrap();
      let reg = registry(&dir);

      fs::create_dir_all(reg.legacy_sockets_dir()).unwrap();
      fs::write(reg.legacy_socket_path("uid-1"), b"").unwrap();
      fs::write(reg.legacy_sockets_dir().join("unrelated"), b"").unwrap();

      let pod_socket = reg.socket_file_path_on_host("pod-a");
      fs::create_dir_all(pod_socket.parent().unwrap()).unwrap();
      fs::write(&pod_socket, b"").unwrap();
      fs::create_dir_all(dir.path().join("pods/pod-without-socket")).unwrap();

      let sockets = reg.list_all_sockets().unwrap();
      assert_eq!(sockets, vec![reg.legacy_socket_path("uid-1"), pod_socket]);
   }

   #[test]
   fn marking_makes_socket_unresponsive() {
      let dir = TempDir::new().unwrap();
      let reg = registry(&dir);
      let socket = reg.socket_file_path_on_host("pod-a");
      fs::create_dir_all(socket.parent().unwrap()).unwrap();
      fs::write(&socket, b"").unwrap();

      assert!(!reg.is_socket_unresponsive(&socket));
      reg.mark_socket_unresponsive(&socket).unwrap();
      assert!(reg.is_socket_unresponsive(&socket));
      assert!(socket.with_file_name(STANDARD_LAUNCHER_UNRESPONSIVE_FILE_NAME).exists());
   }

   #[test]
   fn vanished_socket_is_unresponsive() {
      let dir = TempDir::new().unwrap();
      let reg = registry(&dir);
      assert!(reg.is_socket_unresponsive(&reg.socket_file_path_on_host("gone")));
   }

   #[test]
   fn only_pod_sockets_are_monitored() {
      let dir = TempDir::new().unwrap();
      let reg = registry(&dir);
      assert!(reg.socket_monitoring_enabled(&reg.socket_file_path_on_host("pod-a")));
      assert!(!reg.socket_monitoring_enabled(&reg.legacy_socket_path("uid-1")));
   }
}
