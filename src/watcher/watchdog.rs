//! Bookkeeping for sockets that stopped answering.
//!
//! A socket is only reported once it has failed every probe for longer than
//! the watchdog timeout, and only once per unresponsive episode: the report
//! is suppressed until the socket answers again or leaves the candidate set.

use std::{
   collections::HashMap,
   path::{Path, PathBuf},
   time::Duration,
};

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Tracked {
   since:    Instant,
   signaled: bool,
}

#[derive(Debug, Default)]
pub struct UnresponsiveTracker {
   sockets: Mutex<HashMap<PathBuf, Tracked>>,
}

impl UnresponsiveTracker {
   pub fn new() -> Self {
      Self::default()
   }

   /// Folds in one round of probe failures and returns the sockets that have
   /// now been unresponsive for longer than `timeout` and were not reported.
   pub fn update(&self, failed: &[PathBuf], now: Instant, timeout: Duration) -> Vec<PathBuf> {
      let mut sockets = self.sockets.lock();

      for socket in failed {
         sockets
            .entry(socket.clone())
            .or_insert(Tracked { since: now, signaled: false });
      }
      sockets.retain(|socket, _| failed.contains(socket));

      let mut expired: Vec<PathBuf> = sockets
         .iter()
         .filter(|(_, t)| !t.signaled && now.saturating_duration_since(t.since) > timeout)
         .map(|(socket, _)| socket.clone())
         .collect();
      expired.sort();
      expired
   }

   pub fn mark_signaled(&self, socket: &Path) {
      if let Some(tracked) = self.sockets.lock().get_mut(socket) {
         tracked.signaled = true;
      }
   }

   pub fn is_tracked(&self, socket: &Path) -> bool {
      self.sockets.lock().contains_key(socket)
   }

   pub fn len(&self) -> usize {
      self.sockets.lock().len()
   }

   pub fn is_empty(&self) -> bool {
      self.sockets.lock().is_empty()
   }
}
