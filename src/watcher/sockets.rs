use std::{collections::HashSet, path::PathBuf};

use crate::{Result, cmdclient::SocketRegistry, ghost::GhostRecord, util::clean_path};

/// Every socket worth reconciling: registered sockets first, then the socket
/// of each ghost record not already listed.
///
/// A crashed launcher drops out of the registry with its socket file, but its
/// ghost record keeps the VM a candidate until cleanup deletes the record.
pub fn list_sockets(registry: &dyn SocketRegistry, ghosts: &[GhostRecord]) -> Result<Vec<PathBuf>> {
   let registered = registry.list_all_sockets()?;

   let mut seen = HashSet::with_capacity(registered.len() + ghosts.len());
   let mut sockets = Vec::with_capacity(registered.len() + ghosts.len());
   let candidates = registered
      .into_iter()
      .chain(ghosts.iter().map(|r| r.socket_file.clone()));
   for socket in candidates {
      if seen.insert(clean_path(&socket)) {
         sockets.push(socket);
      }
   }
   Ok(sockets)
}

#[cfg(test)]
mod tests {
   use std::path::Path;

   use super::*;
   use crate::Error;

   struct Fixed(Vec<PathBuf>);

   impl SocketRegistry for Fixed {
      fn list_all_sockets(&self) -> Result<Vec<PathBuf>> {
         Ok(self.0.clone())
      }

      fn mark_socket_unresponsive(&self, _socket: &Path) -> Result<()> {
         Ok(())
      }

      fn is_socket_unresponsive(&self, _socket: &Path) -> bool {
         false
      }
   }

   struct Broken;

   impl SocketRegistry for Broken {
      fn list_all_sockets(&self) -> Result<Vec<PathBuf>> {
         Err(Error::Io(std::io::Error::other("pods dir unreadable")))
      }

      fn mark_socket_unresponsive(&self, _socket: &Path) -> Result<()> {
         Ok(())
      }

      fn is_socket_unresponsive(&self, _socket: &Path) -> bool {
         false
      }
   }

   fn record(name: &str, socket: &str) -> GhostRecord {
      GhostRecord {
         name:        name.to_string(),
         namespace:   "ns".to_string(),
         socket_file: PathBuf::from(socket),
         uid:         format!("uid-{name}"),
      }
   }

   #[test]
   fn ghost_sockets_extend_registered_ones() {
      let registry = Fixed(vec![PathBuf::from("/a")]);
      let sockets = list_sockets(&registry, &[record("b", "/b")]).unwrap();
      assert_eq!(sockets, vec![PathBuf::from("/a"), PathBuf::from("/b")]);
   }

   #[test]
   fn shared_path_is_listed_once() {
      let registry = Fixed(vec![PathBuf::from("/pods/p1/launcher-sock")]);
      let ghosts = [record("a", "/pods/p1//launcher-sock"), record("b", "/pods/p1/./launcher-sock")];
      let sockets = list_sockets(&registry, &ghosts).unwrap();
      assert_eq!(sockets, vec![PathBuf::from("/pods/p1/launcher-sock")]);
   }

   #[test]
   fn registry_failure_is_returned() {
      assert!(list_sockets(&Broken, &[record("a", "/a")]).is_err());
   }
}
