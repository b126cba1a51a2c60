use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::contracts::TemplateType;
use super::options::ProviderRequestOptions;
use super::templates::TemplateParams;
use crate::clock::{Clock, expires_after};

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3_600);
pub const DEFAULT_CACHE_CAPACITY: usize = 1_024;

/// Stable cache key for one template call.
///
/// Parameter keys are sorted and string values trimmed and lowercased, so
/// requests that differ only in casing or whitespace share an entry.
pub fn request_signature(
    template_type: TemplateType,
    params: &TemplateParams,
    options: &ProviderRequestOptions,
) -> String {
    let normalized_params = params
        .iter()
        .map(|(key, value)| (key.trim().to_lowercase(), normalize_value(value)))
        .collect::<BTreeMap<_, _>>();

    let mut hasher = Sha256::new();
    hasher.update(template_type.as_str().as_bytes());
    for (key, value) in &normalized_params {
        hasher.update([0x1e]);
        hasher.update(key.as_bytes());
        hasher.update([0x1f]);
        hasher.update(value.as_bytes());
    }
    hasher.update([0x1e]);
    hasher.update(options.provider.map(|kind| kind.as_str()).unwrap_or("auto"));
    hasher.update([0x1f]);
    hasher.update(options.model.as_deref().map(str::trim).unwrap_or_default());

    hasher
        .finalize()
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

fn normalize_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_lowercase(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

struct CachedEntry<V> {
    value: V,
    expires_at: DateTime<Utc>,
}

/// In-process TTL cache holding at most `capacity` entries.
///
/// Expired entries are dropped on read and swept whenever an insert finds the
/// cache full. If it is still full after the sweep, the entry closest to
/// expiry is evicted.
pub struct ResponseCache<V> {
    ttl: Duration,
    capacity: usize,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CachedEntry<V>>>,
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            capacity: DEFAULT_CACHE_CAPACITY,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now();
        let mut entries = self.lock();
        let expired = match entries.get(key) {
            Some(entry) if now < entry.expires_at => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            entries.remove(key);
        }
        None
    }

    pub fn insert(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let now = self.clock.now();
        let expires_at = expires_after(now, self.ttl);
        let mut entries = self.lock();

        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            entries.retain(|_, entry| now < entry.expires_at);
            if entries.len() >= self.capacity
                && let Some(oldest) = entries
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(key, _)| key.clone())
            {
                entries.remove(&oldest);
            }
        }

        entries.insert(key, CachedEntry { value, expires_at });
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| now < entry.expires_at);
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CachedEntry<V>>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use serde_json::json;

    use super::{ResponseCache, request_signature};
    use crate::clock::ManualClock;
    use crate::llm::contracts::TemplateType;
    use crate::llm::options::{ProviderKind, ProviderRequestOptions};
    use crate::llm::templates::TemplateParams;

    fn params(location: &str, interest: &str) -> TemplateParams {
        let mut params = TemplateParams::new();
        params.insert("location".to_string(), json!(location));
        params.insert("interest".to_string(), json!(interest));
        params
    }

    #[test]
    fn signature_ignores_case_and_whitespace() {
        let options = ProviderRequestOptions::default();
        assert_eq!(
            request_signature(
                TemplateType::QuickRecommendations,
                &params("Seattle", "Coffee"),
                &options
            ),
            request_signature(
                TemplateType::QuickRecommendations,
                &params("  seattle ", "COFFEE"),
                &options
            )
        );
        assert_ne!(
            request_signature(
                TemplateType::QuickRecommendations,
                &params("Seattle", "Coffee"),
                &options
            ),
            request_signature(
                TemplateType::QuickRecommendations,
                &params("Seattle", "Coffee"),
                &options.clone().with_provider(ProviderKind::Gemini)
            )
        );
    }

    #[test]
    fn entries_expire_after_ttl() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::new(Duration::from_secs(3_600), clock.clone());
        cache.insert("key", 7_u32);

        clock.advance(chrono::Duration::minutes(59));
        assert_eq!(cache.get("key"), Some(7));

        clock.advance(chrono::Duration::minutes(1));
        assert_eq!(cache.get("key"), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn purge_drops_only_expired_entries() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::new(Duration::from_secs(60), clock.clone());
        cache.insert("old", "a".to_string());
        clock.advance(chrono::Duration::seconds(61));
        cache.insert("new", "b".to_string());

        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn full_cache_sweeps_expired_entries_on_insert() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::new(Duration::from_secs(60), clock.clone()).with_capacity(2);
        cache.insert("a", 1_u32);
        cache.insert("b", 2_u32);
        clock.advance(chrono::Duration::seconds(61));

        cache.insert("c", 3_u32);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn full_cache_evicts_the_entry_closest_to_expiry() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::new(Duration::from_secs(60), clock.clone()).with_capacity(2);
        cache.insert("a", 1_u32);
        clock.advance(chrono::Duration::seconds(1));
        cache.insert("b", 2_u32);
        clock.advance(chrono::Duration::seconds(1));

        cache.insert("b", 20_u32);
        assert_eq!(cache.len(), 2);

        cache.insert("c", 3_u32);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some(20));
        assert_eq!(cache.get("c"), Some(3));
    }

    #[test]
    fn oversized_ttl_does_not_overflow() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let cache = ResponseCache::new(Duration::from_secs(u64::MAX), clock.clone());
        cache.insert("key", 1_u32);

        clock.advance(chrono::Duration::days(365 * 100));
        assert_eq!(cache.get("key"), Some(1));
    }
}
