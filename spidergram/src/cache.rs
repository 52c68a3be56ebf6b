// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of spidergram.
//
// spidergram is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// spidergram is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with spidergram.  If not,
// see <http://www.gnu.org/licenses/>.

//! # cache
//!
//! The in-memory response cache.
//!
//! # Introduction
//!
//! Rendered images are cached keyed by the *verbatim* query string of the request that produced
//! them-- parameter order & encoding as received. Two requests that differ only in parameter order
//! are two entries. That's not a bug: the legacy service keyed its cache the same way, and
//! canonicalizing would change which requests hit.
//!
//! Entries carry a fixed time-to-live from insertion. Reads of an entry past its TTL are misses
//! (and do *not* refresh the entry); actual removal is left to a sweeper task that runs on a
//! longer interval, so an entry may occupy memory for up to TTL + sweep-interval after its last
//! write. There is no maximum size & no eviction under memory pressure-- this cache is bounded by
//! time alone. There's also no single-flight machinery: two concurrent misses on the same key will
//! both render & both insert, and the last write wins, harmlessly, the values being byte-identical.
//!
//! The map lives behind a [tokio::sync::RwLock]; handlers perform no external locking.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use bytes::Bytes;
use serde::Deserialize;
use tokio::{
    sync::{Notify, RwLock},
    task::JoinHandle,
};
use tracing::debug;

use crate::{
    counter_add, gauge_set,
    metrics::{self, Instruments, Sort},
};

/// Configuration parameters for the image cache
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Duration for which a cached image remains servable after insertion
    #[serde(rename = "time-to-live")]
    pub time_to_live: Duration,
    /// Interval on which the sweeper purges expired entries
    #[serde(rename = "sweep-interval")]
    pub sweep_interval: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            time_to_live: Duration::from_secs(300),
            sweep_interval: Duration::from_secs(600),
        }
    }
}

struct Entry {
    image: Bytes,
    inserted_at: Instant,
}

/// Rendered images, keyed by raw query string
///
/// Construct one at startup & share it among handlers via the application state. Entries are
/// never mutated & there is no invalidation API; they age out, full stop.
pub struct ImageCache {
    entries: RwLock<HashMap<String, Entry>>,
    time_to_live: Duration,
}

impl ImageCache {
    pub fn new(time_to_live: Duration) -> ImageCache {
        ImageCache {
            entries: RwLock::new(HashMap::new()),
            time_to_live,
        }
    }
    /// Lookup `key`; expired-but-unswept entries read as misses
    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.entries
            .read()
            .await
            .get(key)
            .filter(|entry| entry.inserted_at.elapsed() < self.time_to_live)
            .map(|entry| entry.image.clone())
    }
    /// Insert `image` under `key`, stamping it with the current time
    pub async fn insert(&self, key: String, image: Bytes) {
        self.entries.write().await.insert(
            key,
            Entry {
                image,
                inserted_at: Instant::now(),
            },
        );
    }
    /// Drop every entry past its TTL; return the number removed
    pub async fn purge_expired(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.time_to_live);
        before - entries.len()
    }
    /// The number of entries resident, expired or not
    pub async fn entry_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

inventory::submit! { metrics::Registration::new("cache_entries", "cache entries resident at the last sweep", Sort::IntegralGauge) }

inventory::submit! { metrics::Registration::new("cache_swept", "expired cache entries removed by the sweeper", Sort::IntegralCounter) }

/// Spawn the background sweeper
///
/// Every `interval`, purge expired entries from `cache`; exit when `shutdown` is notified. The
/// returned handle resolves once the task has wound down (join it with a timeout at shutdown--
/// see the daemon).
pub fn spawn_sweeper(
    cache: Arc<ImageCache>,
    interval: Duration,
    shutdown: Arc<Notify>,
    instruments: Arc<Instruments>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let swept = cache.purge_expired().await;
                    counter_add!(instruments, "cache_swept", swept as u64);
                    gauge_set!(instruments, "cache_entries", cache.entry_count().await as u64);
                    debug!("Swept {} expired cache entries.", swept);
                },
                _ = shutdown.notified() => break,
            }
        }
    })
}

#[cfg(test)]
mod test {
    use super::*;

    // Short enough to expire within a test, long enough to dodge scheduler jitter
    const TEST_TTL: Duration = Duration::from_millis(50);

    #[tokio::test]
    async fn smoke() {
        let cache = ImageCache::new(TEST_TTL);
        assert!(cache.get("cht=r&chs=1x1").await.is_none());
        cache
            .insert("cht=r&chs=1x1".to_string(), Bytes::from_static(b"png"))
            .await;
        assert_eq!(
            cache.get("cht=r&chs=1x1").await,
            Some(Bytes::from_static(b"png"))
        );
        // Literal-string keying: the same parameters in a different order are a different entry.
        assert!(cache.get("chs=1x1&cht=r").await.is_none());
    }

    #[tokio::test]
    async fn expiry() {
        let cache = ImageCache::new(TEST_TTL);
        cache
            .insert("key".to_string(), Bytes::from_static(b"png"))
            .await;
        tokio::time::sleep(TEST_TTL * 3).await;
        // Expired; reads are misses even though the sweeper hasn't run...
        assert!(cache.get("key").await.is_none());
        assert_eq!(cache.entry_count().await, 1);
        // ...until it does.
        assert_eq!(cache.purge_expired().await, 1);
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn fresh_entries_survive_sweeps() {
        let cache = ImageCache::new(Duration::from_secs(300));
        cache
            .insert("key".to_string(), Bytes::from_static(b"png"))
            .await;
        assert_eq!(cache.purge_expired().await, 0);
        assert_eq!(
            cache.get("key").await,
            Some(Bytes::from_static(b"png"))
        );
    }

    #[tokio::test]
    async fn sweeper_shuts_down() {
        let cache = Arc::new(ImageCache::new(TEST_TTL));
        let registry = prometheus::Registry::new();
        let instruments = Arc::new(Instruments::new(&registry).unwrap());
        let shutdown = Arc::new(Notify::new());
        let handle = spawn_sweeper(
            cache.clone(),
            Duration::from_millis(10),
            shutdown.clone(),
            instruments,
        );
        // Let it take at least one lap...
        tokio::time::sleep(Duration::from_millis(50)).await;
        // then signal it to exit & insist that it does so promptly.
        shutdown.notify_one();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
