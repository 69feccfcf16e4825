use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::try_debug;
use crate::types::{InscriptionDetails, CACHE_SWEEP_INTERVAL_SECS};
use crate::utils::Context;

struct CachedEntry<T> {
    inserted_at: Instant,
    value: T,
}

impl<T: Clone> CachedEntry<T> {
    fn new(value: T) -> CachedEntry<T> {
        CachedEntry {
            inserted_at: Instant::now(),
            value,
        }
    }

    fn fresh_value(&self, ttl: Duration) -> Option<T> {
        if self.inserted_at.elapsed() < ttl {
            Some(self.value.clone())
        } else {
            None
        }
    }
}

/// Per-replica, two-level lookup cache: inscription id to details, and sat
/// number to the ordered inscription list riding it. Entries expire after
/// the configured TTL; a background sweep reclaims the memory. Misses are
/// transparent to callers, and concurrent misses on the same key may issue
/// duplicate upstream calls.
pub struct InscriptionCache {
    details: DashMap<String, CachedEntry<InscriptionDetails>>,
    sat_inscriptions: DashMap<u64, CachedEntry<Vec<String>>>,
    ttl: Duration,
}

impl InscriptionCache {
    pub fn new(ttl: Duration) -> InscriptionCache {
        InscriptionCache {
            details: DashMap::new(),
            sat_inscriptions: DashMap::new(),
            ttl,
        }
    }

    pub fn details_for(&self, inscription_id: &str) -> Option<InscriptionDetails> {
        self.details
            .get(inscription_id)
            .and_then(|entry| entry.fresh_value(self.ttl))
    }

    pub fn put_details(&self, details: InscriptionDetails) {
        self.details
            .insert(details.inscription_id.clone(), CachedEntry::new(details));
    }

    pub fn inscriptions_on_sat(&self, sat: u64) -> Option<Vec<String>> {
        self.sat_inscriptions
            .get(&sat)
            .and_then(|entry| entry.fresh_value(self.ttl))
    }

    pub fn put_sat_inscriptions(&self, sat: u64, inscription_ids: Vec<String>) {
        self.sat_inscriptions
            .insert(sat, CachedEntry::new(inscription_ids));
    }

    pub fn evict_expired(&self) -> usize {
        let before = self.details.len() + self.sat_inscriptions.len();
        self.details
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        self.sat_inscriptions
            .retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        before - (self.details.len() + self.sat_inscriptions.len())
    }

    /// Spawns the periodic eviction task. The caller keeps the handle and
    /// aborts it on shutdown.
    pub fn start_sweep(cache: &Arc<InscriptionCache>, ctx: &Context) -> JoinHandle<()> {
        let cache = Arc::clone(cache);
        let ctx = ctx.clone();
        tokio::spawn(async move {
            let mut timer = tokio::time::interval(Duration::from_secs(CACHE_SWEEP_INTERVAL_SECS));
            // The first tick completes immediately.
            timer.tick().await;
            loop {
                timer.tick().await;
                let evicted = cache.evict_expired();
                if evicted > 0 {
                    try_debug!(ctx, "Cache sweep evicted {evicted} entries");
                }
            }
        })
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use super::*;
    use crate::types::InscriptionDetails;

    fn details(inscription_id: &str, sat: u64) -> InscriptionDetails {
        InscriptionDetails {
            inscription_id: inscription_id.to_string(),
            sat: Some(sat),
        }
    }

    #[test]
    fn serves_fresh_entries() {
        let cache = InscriptionCache::new(Duration::from_secs(3600));
        cache.put_details(details("abcdi0", 1000));
        cache.put_sat_inscriptions(1000, vec!["abcdi0".to_string()]);

        assert_eq!(cache.details_for("abcdi0"), Some(details("abcdi0", 1000)));
        assert_eq!(
            cache.inscriptions_on_sat(1000),
            Some(vec!["abcdi0".to_string()])
        );
        assert_eq!(cache.details_for("unseen"), None);
    }

    #[test]
    fn expired_entries_miss_and_sweep() {
        let cache = InscriptionCache::new(Duration::ZERO);
        cache.put_details(details("abcdi0", 1000));
        cache.put_sat_inscriptions(1000, vec!["abcdi0".to_string()]);

        assert_eq!(cache.details_for("abcdi0"), None);
        assert_eq!(cache.inscriptions_on_sat(1000), None);
        assert_eq!(cache.evict_expired(), 2);
        assert_eq!(cache.evict_expired(), 0);
    }
}
