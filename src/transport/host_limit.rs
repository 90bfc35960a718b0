//! Per-host concurrency ceilings for range sub-requests.
//!
//! A [`HostLimiter`] enforces a maximum number of simultaneously
//! in-flight sub-requests per origin host, shared across every request
//! flowing through one transport instance. Limits are configured at
//! construction; semaphores are created lazily on first contact with a
//! host and never removed (cardinality is bounded by the number of
//! distinct hosts contacted).

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::debug;
use url::Url;

use super::error::TransportError;

/// Map key reserved for the default limit applied to unlisted hosts.
const DEFAULT_HOST_KEY: &str = "";

/// Per-host semaphore map.
///
/// Designed to be wrapped in `Arc` and shared across the chunk tasks of
/// many concurrent requests. `DashMap` gives concurrent reads for the
/// common case (semaphore already exists) and exclusive access only on
/// first creation for a host; the `Arc<Semaphore>` is cloned out of the
/// entry before awaiting so no shard lock is held across an await.
#[derive(Debug)]
pub struct HostLimiter {
    /// Configured limits keyed by canonical hostname; `""` is the
    /// default for unlisted hosts. A limit of 0 means unlimited.
    limits: HashMap<String, usize>,

    /// Lazily-created semaphores for hosts with a nonzero limit.
    semaphores: DashMap<String, Arc<Semaphore>>,
}

impl HostLimiter {
    /// Creates a limiter from a host-to-limit map.
    ///
    /// A limit of `0` (or an absent `""` default entry) means unlimited
    /// concurrency to that host.
    #[must_use]
    pub fn new(limits: HashMap<String, usize>) -> Self {
        let limits = limits
            .into_iter()
            .map(|(host, limit)| (host.to_lowercase(), limit))
            .collect();
        Self {
            limits,
            semaphores: DashMap::new(),
        }
    }

    /// Creates a limiter that never throttles.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(HashMap::new())
    }

    /// Returns the configured limit for a canonical host (0 = unlimited).
    fn limit_for(&self, host: &str) -> usize {
        self.limits
            .get(host)
            .or_else(|| self.limits.get(DEFAULT_HOST_KEY))
            .copied()
            .unwrap_or(0)
    }

    /// Acquires an in-flight slot for the URL's host.
    ///
    /// Returns `None` immediately when the host is unlimited; otherwise
    /// blocks until a slot frees up. Dropping the returned future (the
    /// caller was cancelled) abandons the pending acquisition; dropping
    /// the permit releases the slot.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::SemaphoreClosed`] if the semaphore was
    /// closed, which this type never does itself.
    pub async fn acquire(
        &self,
        url: &Url,
    ) -> Result<Option<OwnedSemaphorePermit>, TransportError> {
        let host = canonical_host(url);
        let limit = self.limit_for(&host);
        if limit == 0 {
            return Ok(None);
        }

        // Clone the Arc out of the entry so the DashMap shard lock is
        // released before awaiting.
        let semaphore = self
            .semaphores
            .entry(host.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(limit)))
            .clone();

        debug!(host = %host, limit, available = semaphore.available_permits(), "acquiring host slot");
        let permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| TransportError::SemaphoreClosed)?;
        Ok(Some(permit))
    }
}

/// Canonicalizes a URL's host for limiter keying: lower-cased, port
/// stripped. Malformed or host-less URLs map to `"unknown"` so they
/// still share one ceiling.
#[must_use]
pub fn canonical_host(url: &Url) -> String {
    url.host_str()
        .map(str::to_lowercase)
        .unwrap_or_else(|| "unknown".to_string())
}
