//! Time-bounded result cache
//!
//! Entries are keyed by command text plus the execution-context
//! fingerprint. Expired entries are dropped lazily on lookup and in bulk
//! when an insert finds the cache full.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use super::result::CommandResult;

/// Extra entries evicted past the limit, so every insert near capacity
/// does not trigger another sweep
const EVICTION_SLACK: usize = 10;

struct CacheEntry {
    result: CommandResult,
    stored_at: Instant,
}

pub struct CommandCache {
    ttl: Duration,
    max_entries: usize,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl CommandCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn key(command: &str, fingerprint: &str) -> String {
        format!("{}_{}", command, fingerprint)
    }

    /// Look up a live entry. The returned copy is marked as cached.
    pub fn get(&self, key: &str) -> Option<CommandResult> {
        let mut entries = self.entries.lock();
        let fresh = entries.get(key)?.stored_at.elapsed() < self.ttl;
        if !fresh {
            entries.remove(key);
            return None;
        }
        entries.get(key).map(|entry| {
            let mut result = entry.result.clone();
            result.cached = true;
            result
        })
    }

    /// Store a result. Failures are never cached.
    pub fn put(&self, key: String, result: &CommandResult) {
        if !result.success {
            return;
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.max_entries {
            let ttl = self.ttl;
            entries.retain(|_, entry| entry.stored_at.elapsed() <= ttl);

            if entries.len() >= self.max_entries {
                let excess = (entries.len() + EVICTION_SLACK).saturating_sub(self.max_entries);
                let mut by_age: Vec<(String, Instant)> = entries
                    .iter()
                    .map(|(k, e)| (k.clone(), e.stored_at))
                    .collect();
                by_age.sort_by_key(|(_, stored_at)| *stored_at);
                for (old, _) in by_age.into_iter().take(excess) {
                    entries.remove(&old);
                }
                tracing::debug!(evicted = excess, "Cache full, evicted oldest entries");
            }
        }

        let mut stored = result.clone();
        stored.cached = false;
        entries.insert(
            key,
            CacheEntry {
                result: stored,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::result::FailureKind;

    fn ok(output: &str) -> CommandResult {
        CommandResult::success(output, "k")
            .with_route("analyze_stack")
            .with_elapsed(5)
    }

    #[test]
    fn test_hit_is_marked_cached() {
        let cache = CommandCache::new(Duration::from_secs(60), 10);
        let key = CommandCache::key("k", "usermode_current_0");
        assert_eq!(key, "k_usermode_current_0");

        cache.put(key.clone(), &ok("frames"));
        let hit = cache.get(&key).unwrap();
        assert!(hit.cached);
        assert!(hit.success);
        assert_eq!(hit.output, "frames");
        assert_eq!(hit.execution_time_ms, 5);
    }

    #[test]
    fn test_failures_not_cached() {
        let cache = CommandCache::new(Duration::from_secs(60), 10);
        let failed = CommandResult::failure(FailureKind::Semantic, "Command failed: nope", "k");
        cache.put("k".to_string(), &failed);
        assert!(cache.is_empty());
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn test_expired_entry_removed_on_get() {
        let cache = CommandCache::new(Duration::from_millis(20), 10);
        cache.put("k".to_string(), &ok("frames"));
        assert_eq!(cache.len(), 1);

        std::thread::sleep(Duration::from_millis(40));
        assert!(cache.get("k").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_eviction_when_full() {
        let cache = CommandCache::new(Duration::from_secs(60), 12);
        for i in 0..12 {
            cache.put(format!("cmd{}", i), &ok("x"));
            std::thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(cache.len(), 12);

        // Nothing expired, so the oldest 10 go before the insert
        cache.put("new".to_string(), &ok("y"));
        assert_eq!(cache.len(), 3);
        assert!(cache.get("new").is_some());
        assert!(cache.get("cmd11").is_some());
        assert!(cache.get("cmd0").is_none());
    }

    #[test]
    fn test_eviction_prefers_expired() {
        let cache = CommandCache::new(Duration::from_millis(30), 3);
        cache.put("a".to_string(), &ok("1"));
        cache.put("b".to_string(), &ok("2"));
        std::thread::sleep(Duration::from_millis(50));
        cache.put("c".to_string(), &ok("3"));

        // a and b are stale and get swept, c survives
        cache.put("d".to_string(), &ok("4"));
        assert_eq!(cache.len(), 2);
        assert!(cache.get("c").is_some());
        assert!(cache.get("d").is_some());
    }

    #[test]
    fn test_clear() {
        let cache = CommandCache::new(Duration::from_secs(60), 10);
        cache.put("k".to_string(), &ok("frames"));
        cache.clear();
        assert!(cache.is_empty());
    }
}
