use crate::metrics::{CACHE_ENTRIES, CACHE_HITS_TOTAL, CACHE_MISSES_TOTAL, CACHE_REQUESTS_TOTAL};
use crate::types::{normalize_name, QType, RecordSet};
use moka::sync::Cache;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    name: String,
    qtype: QType,
}

#[derive(Clone)]
pub struct CacheEntry {
    pub rrset: RecordSet,
    pub inserted_at: Instant,
}

impl CacheEntry {
    /// Seconds of validity left at `now`; zero once expired.
    pub fn remaining_ttl(&self, now: Instant) -> u32 {
        let elapsed = now.saturating_duration_since(self.inserted_at).as_secs();
        (self.rrset.min_ttl() as u64).saturating_sub(elapsed) as u32
    }

    pub fn is_valid(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.inserted_at).as_secs_f64() < self.rrset.min_ttl() as f64
    }
}

/// Answers obtained from earlier resolutions, keyed by name and type.
/// Expired entries are dropped when a lookup finds them.
pub struct AnswerCache {
    entries: Cache<CacheKey, CacheEntry>,
}

impl AnswerCache {
    pub fn new(capacity: u64) -> Self {
        Self { entries: Cache::builder().max_capacity(capacity).build() }
    }

    /// Returns the cached set with each ttl lowered by the time spent in the
    /// cache.
    pub fn get(&self, name: &str, qtype: QType) -> Option<RecordSet> {
        self.get_at(name, qtype, Instant::now())
    }

    pub fn get_at(&self, name: &str, qtype: QType, now: Instant) -> Option<RecordSet> {
        CACHE_REQUESTS_TOTAL.inc();
        let key = CacheKey { name: normalize_name(name), qtype };

        let Some(entry) = self.entries.get(&key) else {
            CACHE_MISSES_TOTAL.inc();
            return None;
        };

        if !entry.is_valid(now) {
            tracing::debug!("[cache] Entry for {} {} expired, purging", key.name, key.qtype);
            self.entries.invalidate(&key);
            CACHE_MISSES_TOTAL.inc();
            return None;
        }

        CACHE_HITS_TOTAL.inc();
        tracing::debug!("[cache] HIT for {} {}, {}s left", key.name, key.qtype, entry.remaining_ttl(now));
        let elapsed = now.saturating_duration_since(entry.inserted_at).as_secs() as u32;
        let mut rrset = entry.rrset;
        for record in &mut rrset.records {
            record.ttl = record.ttl.saturating_sub(elapsed);
        }
        Some(rrset)
    }

    pub fn put(&self, rrset: RecordSet) {
        self.put_at(rrset, Instant::now());
    }

    pub fn put_at(&self, rrset: RecordSet, now: Instant) {
        if rrset.is_empty() { return; }
        let key = CacheKey { name: rrset.name.clone(), qtype: rrset.rtype };
        self.entries.insert(key, CacheEntry { rrset, inserted_at: now });
        CACHE_ENTRIES.set(self.entries.entry_count() as f64);
    }

    pub fn len(&self) -> u64 {
        self.entries.run_pending_tasks();
        self.entries.entry_count()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RData, ResourceRecord};
    use std::net::Ipv4Addr;
    use tokio::time::Duration;

    fn answer(name: &str, ttl: u32) -> RecordSet {
        RecordSet::new(name, QType::A, vec![ResourceRecord::new(name, ttl, RData::A(Ipv4Addr::new(93, 184, 216, 34)))])
    }

    #[test]
    fn hit_reports_remaining_ttl() {
        let cache = AnswerCache::new(100);
        let t0 = Instant::now();
        cache.put_at(answer("example.com", 300), t0);

        let hit = cache.get_at("Example.com.", QType::A, t0 + Duration::from_secs(1)).unwrap();
        assert_eq!(hit.records[0].ttl, 299);
        assert_eq!(hit.records[0].data, RData::A(Ipv4Addr::new(93, 184, 216, 34)));
    }

    #[test]
    fn expired_entry_is_purged() {
        let cache = AnswerCache::new(100);
        let t0 = Instant::now();
        cache.put_at(answer("short.example", 1), t0);

        assert!(cache.get_at("short.example", QType::A, t0 + Duration::from_secs(2)).is_none());
        // Purged: even an earlier clock no longer finds it.
        assert!(cache.get_at("short.example", QType::A, t0).is_none());
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let cache = AnswerCache::new(100);
        let t0 = Instant::now();
        cache.put_at(answer("edge.example", 10), t0);
        assert!(cache.get_at("edge.example", QType::A, t0 + Duration::from_millis(9_999)).is_some());
        assert!(cache.get_at("edge.example", QType::A, t0 + Duration::from_secs(10)).is_none());
    }

    #[test]
    fn min_ttl_governs_mixed_sets() {
        let cache = AnswerCache::new(100);
        let t0 = Instant::now();
        let mut set = answer("mixed.example", 300);
        set.records.push(ResourceRecord::new("mixed.example", 5, RData::A(Ipv4Addr::new(10, 0, 0, 1))));
        cache.put_at(set, t0);

        let entry = CacheEntry { rrset: answer("mixed.example", 5), inserted_at: t0 };
        assert_eq!(entry.remaining_ttl(t0 + Duration::from_secs(7)), 0);
        assert!(cache.get_at("mixed.example", QType::A, t0 + Duration::from_secs(6)).is_none());
    }

    #[test]
    fn type_is_part_of_the_key() {
        let cache = AnswerCache::new(100);
        cache.put(answer("example.com", 300));
        assert!(cache.get("example.com", QType::A).is_some());
        assert!(cache.get("example.com", QType::NS).is_none());
    }

    #[test]
    fn put_overwrites_previous_answer() {
        let cache = AnswerCache::new(100);
        let t0 = Instant::now();
        cache.put_at(answer("example.com", 300), t0);
        let newer = RecordSet::new("example.com", QType::A, vec![
            ResourceRecord::new("example.com", 60, RData::A(Ipv4Addr::new(1, 1, 1, 1))),
        ]);
        cache.put_at(newer.clone(), t0);
        assert_eq!(cache.get_at("example.com", QType::A, t0), Some(newer));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn empty_sets_are_not_stored() {
        let cache = AnswerCache::new(100);
        cache.put(RecordSet::new("nothing.example", QType::A, vec![]));
        assert!(cache.is_empty());
    }
}
