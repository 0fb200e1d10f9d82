//! Per-user permission cache with explicit, generation-checked invalidation
//!
//! There is no TTL: a stale allow even one second after a revoke is an
//! authorization gap, so entries live until an invalidation drops them.
//! Each user carries a monotonically increasing generation counter; a
//! resolution observes the generation before it starts and its result is
//! only admitted if no invalidation bumped the counter in between. The one
//! time-driven exception is assignment expiry, which is an exact deadline
//! recorded at resolution time, not a staleness tolerance.

pub mod flight;

pub use flight::{FlightGuard, FlightOutcome, FlightSlot, FlightTable};

use crate::types::{ResolvedPermissions, RoleId, UserId};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// A complete, immutable snapshot for one user
#[derive(Clone)]
struct CacheEntry {
    permissions: Arc<ResolvedPermissions>,
    generation: u64,
}

/// Memoized permission sets keyed by user id
///
/// Readers are lock-free and observe either the previous snapshot or the
/// next one, never a partial write: entries are whole `Arc`s swapped in a
/// single map insert.
pub struct PermissionCache {
    /// Cached snapshots
    entries: DashMap<UserId, CacheEntry>,

    /// Per-user invalidation generation; bumped by every invalidation
    generations: DashMap<UserId, u64>,

    /// Reverse index: role → users whose cached set observed that role.
    /// Populated lazily as resolutions are admitted; a superset is fine
    /// (extra users are merely re-resolved).
    by_role: DashMap<RoleId, HashSet<UserId>>,

    /// Upper bound on cached users; 0 means unbounded
    capacity: usize,

    /// Cache counters
    stats: DashMap<String, usize>,
}

impl PermissionCache {
    /// Create a cache bounded to `capacity` users (0 = unbounded)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            by_role: DashMap::new(),
            capacity,
            stats: DashMap::new(),
        }
    }

    /// Fetch a user's cached snapshot
    ///
    /// An entry whose earliest contributing assignment has expired is
    /// treated as a miss and dropped, so expiry takes effect on the next
    /// check without any mutation event.
    pub fn get(&self, user_id: &str) -> Option<Arc<ResolvedPermissions>> {
        let hit = match self.entries.get(user_id) {
            Some(entry) => {
                if entry
                    .permissions
                    .expires_at
                    .is_some_and(|deadline| deadline <= Utc::now())
                {
                    None
                } else {
                    Some(entry.permissions.clone())
                }
            }
            None => None,
        };

        match hit {
            Some(permissions) => {
                self.increment_stat("hits");
                Some(permissions)
            }
            None => {
                // Drop the expired snapshot, if that is what we found
                self.entries
                    .remove_if(user_id, |_, entry| {
                        entry
                            .permissions
                            .expires_at
                            .is_some_and(|deadline| deadline <= Utc::now())
                    });
                self.increment_stat("misses");
                None
            }
        }
    }

    /// The user's current invalidation generation
    ///
    /// A resolution reads this before touching the store and passes it back
    /// to `insert`.
    pub fn generation(&self, user_id: &str) -> u64 {
        self.generations.get(user_id).map(|g| *g).unwrap_or(0)
    }

    /// The generation a user's cached entry was computed under, if cached
    pub fn entry_generation(&self, user_id: &str) -> Option<u64> {
        self.entries.get(user_id).map(|entry| entry.generation)
    }

    /// Admit a resolved snapshot, unless an invalidation raced it
    ///
    /// Returns `false` (and caches nothing) when the user's generation no
    /// longer matches `observed_generation` or the cache is full. The
    /// reverse index is updated first so a declined insert at worst leaves
    /// harmless extra index edges.
    pub fn insert(
        &self,
        user_id: &str,
        permissions: Arc<ResolvedPermissions>,
        observed_generation: u64,
    ) -> bool {
        if self.capacity > 0
            && self.entries.len() >= self.capacity
            && !self.entries.contains_key(user_id)
        {
            debug!(user_id, "Permission cache full; skipping insert");
            return false;
        }

        for role_id in &permissions.contributing_roles {
            self.by_role
                .entry(role_id.clone())
                .or_default()
                .insert(user_id.to_string());
        }

        // Hold the generation slot across the entry insert: a concurrent
        // invalidation must either land before the check (declining this
        // insert) or wait and then drop the entry we just wrote.
        let generation = self
            .generations
            .entry(user_id.to_string())
            .or_insert(0);
        if *generation != observed_generation {
            debug!(user_id, "Invalidation raced resolution; discarding stale result");
            return false;
        }

        self.entries.insert(
            user_id.to_string(),
            CacheEntry {
                permissions,
                generation: observed_generation,
            },
        );
        true
    }

    /// Drop one user's entry after a change that affects only them
    pub fn invalidate(&self, user_id: &str) {
        self.generations
            .entry(user_id.to_string())
            .and_modify(|g| *g += 1)
            .or_insert(1);
        self.entries.remove(user_id);
        self.increment_stat("invalidations");
        debug!(user_id, "Cache entry invalidated");
    }

    /// Drop every user whose cached set observed the given role
    ///
    /// Covers transitive holders: a user reaching the role through a
    /// descendant recorded it while walking their ancestor chain. Returns
    /// how many users were invalidated.
    pub fn invalidate_role(&self, role_id: &str) -> usize {
        // Snapshot the user list first; invalidating while holding the
        // index reference would cross lock shards.
        let users: Vec<UserId> = self
            .by_role
            .get(role_id)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();

        self.by_role.remove(role_id);

        for user_id in &users {
            self.invalidate(user_id);
        }

        debug!(role_id, affected = users.len(), "Role-scoped invalidation");
        users.len()
    }

    /// Drop everything (generations survive, so in-flight stale results
    /// still cannot be admitted)
    pub fn clear(&self) {
        // Snapshot the keys first; bumping generations while iterating
        // `entries` would take the two maps' shard locks in the opposite
        // order from `insert`.
        let users: Vec<UserId> = self.entries.iter().map(|e| e.key().clone()).collect();
        for user_id in &users {
            self.generations
                .entry(user_id.clone())
                .and_modify(|g| *g += 1)
                .or_insert(1);
        }
        self.entries.clear();
        self.by_role.clear();
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.get_stat("hits"),
            misses: self.get_stat("misses"),
            invalidations: self.get_stat("invalidations"),
            entries: self.entries.len(),
        }
    }

    fn increment_stat(&self, key: &str) {
        self.stats
            .entry(key.to_string())
            .and_modify(|count| *count += 1)
            .or_insert(1);
    }

    fn get_stat(&self, key: &str) -> usize {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

/// Cache performance counters
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub invalidations: usize,
    pub entries: usize,
}

impl CacheStats {
    /// Fraction of reads served from cache
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn snapshot(slug: &str, roles: &[&str]) -> Arc<ResolvedPermissions> {
        Arc::new(ResolvedPermissions {
            slugs: [slug.to_string()].into_iter().collect(),
            max_level: Some(10),
            contributing_roles: roles.iter().map(|r| r.to_string()).collect(),
            expires_at: None,
        })
    }

    #[test]
    fn test_get_insert_roundtrip() {
        let cache = PermissionCache::new(0);
        assert!(cache.get("alice").is_none());

        let generation = cache.generation("alice");
        assert!(cache.insert("alice", snapshot("books_read", &["editor"]), generation));

        let cached = cache.get("alice").unwrap();
        assert!(cached.slugs.contains("books_read"));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!(stats.hit_rate() > 0.0);
    }

    #[test]
    fn test_invalidate_drops_entry() {
        let cache = PermissionCache::new(0);
        let generation = cache.generation("alice");
        cache.insert("alice", snapshot("books_read", &["editor"]), generation);
        assert_eq!(cache.entry_generation("alice"), Some(generation));

        cache.invalidate("alice");
        assert!(cache.get("alice").is_none());
        assert_eq!(cache.entry_generation("alice"), None);

        // A fresh resolution after the invalidation is admitted under the
        // bumped generation
        let generation = cache.generation("alice");
        assert!(cache.insert("alice", snapshot("books_read", &["editor"]), generation));
        assert_eq!(cache.entry_generation("alice"), Some(1));
    }

    #[test]
    fn test_stale_insert_declined_after_invalidation() {
        let cache = PermissionCache::new(0);

        let observed = cache.generation("alice");
        // Invalidation lands while the resolution is in flight
        cache.invalidate("alice");

        assert!(!cache.insert("alice", snapshot("books_read", &["editor"]), observed));
        assert!(cache.get("alice").is_none());
    }

    #[test]
    fn test_invalidate_role_uses_reverse_index() {
        let cache = PermissionCache::new(0);

        let g_alice = cache.generation("alice");
        cache.insert("alice", snapshot("books_read", &["editor", "admin"]), g_alice);
        let g_bob = cache.generation("bob");
        cache.insert("bob", snapshot("users_read", &["viewer"]), g_bob);

        let affected = cache.invalidate_role("admin");
        assert_eq!(affected, 1);
        assert!(cache.get("alice").is_none());
        assert!(cache.get("bob").is_some());
    }

    #[test]
    fn test_invalidate_role_unknown_is_noop() {
        let cache = PermissionCache::new(0);
        assert_eq!(cache.invalidate_role("ghost"), 0);
    }

    #[test]
    fn test_capacity_bound() {
        let cache = PermissionCache::new(1);

        let g = cache.generation("alice");
        assert!(cache.insert("alice", snapshot("a_b", &["r1"]), g));

        let g = cache.generation("bob");
        assert!(!cache.insert("bob", snapshot("c_d", &["r2"]), g));

        // Existing users can still be refreshed at capacity
        let g = cache.generation("alice");
        assert!(cache.insert("alice", snapshot("e_f", &["r1"]), g));
    }

    #[test]
    fn test_expired_snapshot_is_a_miss() {
        let cache = PermissionCache::new(0);

        let expired = Arc::new(ResolvedPermissions {
            slugs: ["books_read".to_string()].into_iter().collect(),
            max_level: Some(10),
            contributing_roles: ["editor".to_string()].into_iter().collect(),
            expires_at: Some(Utc::now() - Duration::seconds(1)),
        });

        let generation = cache.generation("alice");
        cache.insert("alice", expired, generation);

        assert!(cache.get("alice").is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[test]
    fn test_clear_bumps_generations() {
        let cache = PermissionCache::new(0);

        let observed = cache.generation("alice");
        cache.insert("alice", snapshot("books_read", &["editor"]), observed);
        cache.clear();

        assert!(cache.get("alice").is_none());
        // A resolution that started before the clear cannot be admitted
        assert!(!cache.insert("alice", snapshot("books_read", &["editor"]), observed));
    }
}
