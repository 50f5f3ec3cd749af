//! Generic "list now, then stream changes" consumer.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::{
   Result,
   domain::{Domain, WatchEvent},
};

/// A source that can snapshot its domains and then stream every change.
#[async_trait]
pub trait ListWatch: Send + Sync {
   async fn list(&self) -> Result<Vec<Domain>>;

   /// Hands out the change stream. May only be called once.
   fn watch(&self) -> Result<mpsc::Receiver<WatchEvent>>;
}

/// Latest known domain per `namespace/name`.
#[derive(Debug, Default)]
pub struct DomainCache {
   domains: RwLock<HashMap<String, Domain>>,
}

impl DomainCache {
   pub fn new() -> Self {
      Self::default()
   }

   /// Replaces the whole contents with `domains`.
   pub fn replace(&self, domains: Vec<Domain>) {
      let mut map = self.domains.write();
      map.clear();
      map.extend(domains.into_iter().map(|d| (d.key(), d)));
   }

   pub fn apply(&self, event: WatchEvent) {
      match event {
         WatchEvent::Added(domain) | WatchEvent::Modified(domain) => {
            self.domains.write().insert(domain.key(), domain);
         },
         WatchEvent::Deleted(domain) => {
            self.domains.write().remove(&domain.key());
         },
         WatchEvent::Error(status) => {
            tracing::warn!("domain watch reported an error: {}", status.message);
         },
      }
   }

   pub fn get(&self, key: &str) -> Option<Domain> {
      self.domains.read().get(key).cloned()
   }

   pub fn keys(&self) -> Vec<String> {
      let mut keys: Vec<String> = self.domains.read().keys().cloned().collect();
      keys.sort();
      keys
   }

   pub fn len(&self) -> usize {
      self.domains.read().len()
   }

   pub fn is_empty(&self) -> bool {
      self.domains.read().is_empty()
   }

   /// Fills the cache from `source.list()`, then applies its events in a
   /// background task that ends when the stream closes.
   pub async fn list_and_watch(
      self: &Arc<Self>,
      source: &dyn ListWatch,
   ) -> Result<JoinHandle<()>> {
      let mut events = source.watch()?;
      self.replace(source.list().await?);
      tracing::info!("domain cache synced with {} domains", self.len());

      let cache = Arc::clone(self);
      Ok(tokio::spawn(async move {
         while let Some(event) = events.recv().await {
            cache.apply(event);
         }
         tracing::debug!("domain event stream closed");
      }))
   }
}
