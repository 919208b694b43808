use crate::{
  constants::INSTANCE_CACHE_TTL_SEC,
  directory::{InstanceDirectory, RunningInstance},
  trace::*,
};
use std::{net::Ipv4Addr, sync::Arc, time::Duration};
use tokio::time::Instant;

/// DashMap type alias, uses ahash::RandomState as hashbuilder
type DashMap<K, V> = dashmap::DashMap<K, V, ahash::RandomState>;

#[derive(Debug, Clone)]
/// Resolution result, `None` for a failed lookup
struct CacheEntry {
  ip: Option<Ipv4Addr>,
  resolved_at: Instant,
}

impl CacheEntry {
  fn is_fresh(&self, ttl: Duration) -> bool {
    self.resolved_at.elapsed() < ttl
  }
}

#[derive(Clone)]
/// Instance name to IPv4 resolution through the instance directory, memoized for a fixed TTL.
/// Failed lookups are memoized too.
pub struct InstanceResolver {
  directory: Arc<dyn InstanceDirectory>,
  cache: Arc<DashMap<String, CacheEntry>>,
  ttl: Duration,
}

impl InstanceResolver {
  pub fn new(directory: Arc<dyn InstanceDirectory>) -> Self {
    Self::with_ttl(directory, Duration::from_secs(INSTANCE_CACHE_TTL_SEC))
  }

  pub fn with_ttl(directory: Arc<dyn InstanceDirectory>, ttl: Duration) -> Self {
    Self {
      directory,
      cache: Arc::new(DashMap::default()),
      ttl,
    }
  }

  /// Resolve the instance name to its first IPv4 address
  pub async fn resolve(&self, name: &str) -> Option<Ipv4Addr> {
    if let Some(entry) = self.cache.get(name).filter(|e| e.is_fresh(self.ttl)) {
      debug!(instance = name, "Instance resolution cache hit: {:?}", entry.ip);
      return entry.ip;
    }

    // The map is not locked across the lookup. Concurrent misses may both ask the directory, last writer wins.
    let ip = match self.directory.info(name).await {
      Ok(ip) => Some(ip),
      Err(e) => {
        warn!(instance = name, "Failed to resolve instance: {e}");
        None
      }
    };
    self.cache.insert(
      name.to_string(),
      CacheEntry {
        ip,
        resolved_at: Instant::now(),
      },
    );
    ip
  }

  /// Running instances for diagnostics, empty if the directory fails
  pub async fn running_instances(&self) -> Vec<RunningInstance> {
    match self.directory.list().await {
      Ok(list) => list,
      Err(e) => {
        warn!("Failed to list running instances: {e}");
        Vec::new()
      }
    }
  }
}
