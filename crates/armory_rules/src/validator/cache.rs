//! # Validation Cache
//!
//! Bounded memo of placement results.
//!
//! An entry is stale when its TTL has elapsed **or** the live data version
//! has moved past the version pinned at insert, whichever comes first.

use super::ValidationResult;
use armory_core::{ItemInstance, SlotConfig};
use parking_lot::Mutex;
use siphasher::sip::SipHasher13;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

/// Identity of a cached placement check.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct CacheKey {
    item: u64,
    slot: u64,
    context: u64,
}

impl CacheKey {
    pub(crate) fn new(item: &ItemInstance, slot: &SlotConfig, context: u64) -> Self {
        Self {
            item: item_fingerprint(item),
            slot: slot.config_hash(),
            context,
        }
    }
}

/// Hashes everything the built-in rules read from an instance.
pub(crate) fn item_fingerprint(item: &ItemInstance) -> u64 {
    let mut hasher = SipHasher13::new();
    item.item_id.hash(&mut hasher);
    item.instance_id.hash(&mut hasher);
    item.quantity.hash(&mut hasher);
    item.durability.to_bits().hash(&mut hasher);
    for (name, value) in &item.properties {
        name.hash(&mut hasher);
        value.to_bits().hash(&mut hasher);
    }
    hasher.finish()
}

#[derive(Debug)]
struct CacheEntry {
    result: ValidationResult,
    inserted: Instant,
    data_version: u64,
}

impl CacheEntry {
    fn is_stale(&self, ttl: Duration, current_version: u64) -> bool {
        let expired = !ttl.is_zero() && self.inserted.elapsed() >= ttl;
        expired || self.data_version != current_version
    }
}

#[derive(Debug)]
pub(crate) struct ValidationCache {
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ValidationCache {
    pub(crate) fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            ttl,
            max_entries: max_entries.max(1),
        }
    }

    /// Returns a fresh entry, evicting it if stale.
    pub(crate) fn get(&self, key: &CacheKey, current_version: u64) -> Option<ValidationResult> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if !entry.is_stale(self.ttl, current_version) => Some(entry.result.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub(crate) fn insert(&self, key: CacheKey, result: ValidationResult, data_version: u64) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries {
            entries.retain(|_, e| !e.is_stale(self.ttl, data_version));
            if entries.len() >= self.max_entries / 2 {
                entries.clear();
            }
        }
        entries.insert(
            key,
            CacheEntry {
                result,
                inserted: Instant::now(),
                data_version,
            },
        );
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use armory_core::SlotType;

    fn key() -> CacheKey {
        let slot = SlotConfig::new(0, SlotType::Headwear, "Equipment.Slot.Head");
        CacheKey::new(&ItemInstance::new("Cap"), &slot, 0)
    }

    #[test]
    fn test_version_bump_invalidates_before_ttl() {
        let cache = ValidationCache::new(Duration::from_secs(3600), 16);
        let key = key();
        cache.insert(key, ValidationResult::success(), 1);
        assert!(cache.get(&key, 1).is_some());
        assert!(cache.get(&key, 2).is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = ValidationCache::new(Duration::from_millis(1), 16);
        let key = key();
        cache.insert(key, ValidationResult::success(), 0);
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get(&key, 0).is_none());
    }

    #[test]
    fn test_zero_ttl_never_expires_by_time() {
        let cache = ValidationCache::new(Duration::ZERO, 16);
        let key = key();
        cache.insert(key, ValidationResult::success(), 0);
        std::thread::sleep(Duration::from_millis(2));
        assert!(cache.get(&key, 0).is_some());
    }

    #[test]
    fn test_bounded_size() {
        let cache = ValidationCache::new(Duration::from_secs(60), 4);
        let slot = SlotConfig::new(0, SlotType::Headwear, "Equipment.Slot.Head");
        for _ in 0..20 {
            let k = CacheKey::new(&ItemInstance::new("Cap"), &slot, 0);
            cache.insert(k, ValidationResult::success(), 0);
        }
        assert!(cache.len() <= 4);
    }

    #[test]
    fn test_fingerprint_tracks_properties() {
        let item = ItemInstance::new("Cap");
        let heavier = item.clone().with_weight(3.0);
        assert_eq!(item_fingerprint(&item), item_fingerprint(&item.clone()));
        assert_ne!(item_fingerprint(&item), item_fingerprint(&heavier));
    }
}
