//! Authorization facade: the single entry point callers use
//!
//! Orchestrates the cache, single-flight table, and resolver:
//!
//! ```text
//! Authorize → PermissionCache → (miss) FlightTable → Resolver → RoleGraph/Store
//!                 ↑                                      │
//!                 └──────── generation-checked insert ───┘
//! ```
//!
//! Mutations flow through the administrative wrappers in `admin`, which
//! pair every store write with the matching cache invalidation.

mod admin;

use crate::cache::{FlightGuard, FlightOutcome, FlightSlot, FlightTable, PermissionCache};
use crate::error::{RbacError, Result};
use crate::resolver::Resolver;
use crate::store::AssignmentStore;
use crate::types::ResolvedPermissions;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Upper bound on a single resolution, including store round trips.
    /// Elapsing fails closed. `None` leaves the bound to the caller's own
    /// cancellation (dropping the future).
    pub resolve_timeout: Option<Duration>,

    /// Maximum number of users kept in the cache (0 = unbounded)
    pub max_cached_users: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            resolve_timeout: None,
            max_cached_users: 10_000,
        }
    }
}

/// The public authorization surface
///
/// Cheap to share behind an `Arc`; every method takes `&self` and the
/// read path never blocks behind writers.
pub struct AccessEngine {
    store: Arc<dyn AssignmentStore>,
    resolver: Arc<Resolver>,
    cache: Arc<PermissionCache>,
    flights: FlightTable,
    config: EngineConfig,
}

impl AccessEngine {
    /// Build the engine: loads roles, validates the hierarchy, wires the
    /// cache and flight table
    ///
    /// # Errors
    ///
    /// Topology errors in the stored roles are fatal here; a cyclic or
    /// dangling hierarchy must never reach resolution.
    pub async fn new(config: EngineConfig, store: Arc<dyn AssignmentStore>) -> Result<Self> {
        let resolver = Arc::new(Resolver::load(store.clone()).await?);
        let cache = Arc::new(PermissionCache::new(config.max_cached_users));

        info!(
            resolve_timeout = ?config.resolve_timeout,
            max_cached_users = config.max_cached_users,
            "AccessEngine initialized"
        );

        Ok(Self {
            store,
            resolver,
            cache,
            flights: FlightTable::new(),
            config,
        })
    }

    /// The user's effective permission snapshot, cache-first
    ///
    /// Concurrent calls for the same uncached user collapse into one
    /// resolution. Store failures propagate; use [`authorize`] for the
    /// fail-closed boolean surface.
    ///
    /// [`authorize`]: AccessEngine::authorize
    pub async fn effective_permissions(&self, user_id: &str) -> Result<Arc<ResolvedPermissions>> {
        if let Some(cached) = self.cache.get(user_id) {
            return Ok(cached);
        }
        self.resolve_collapsed(user_id).await
    }

    /// Single-flighted resolution for one user
    async fn resolve_collapsed(&self, user_id: &str) -> Result<Arc<ResolvedPermissions>> {
        match self.flights.acquire(user_id) {
            FlightSlot::Follower(mut rx) => match rx.recv().await {
                Ok(FlightOutcome::Resolved(permissions)) => Ok(permissions),
                Ok(FlightOutcome::Failed(message)) => Err(RbacError::StoreUnavailable(message)),
                // The leader was cancelled before broadcasting; retry from
                // the cache in case a later leader already finished
                Err(_) => Box::pin(self.effective_permissions(user_id)).await,
            },
            FlightSlot::Leader(tx) => {
                let guard = FlightGuard::new(&self.flights, user_id);

                // Observed before the store reads: an invalidation racing
                // this resolution bumps it and our insert is declined.
                let observed_generation = self.cache.generation(user_id);

                let result = match self.resolve_bounded(user_id).await {
                    Ok(resolved) => {
                        let snapshot = Arc::new(resolved);
                        self.cache
                            .insert(user_id, snapshot.clone(), observed_generation);
                        let _ = tx.send(FlightOutcome::Resolved(snapshot.clone()));
                        Ok(snapshot)
                    }
                    Err(err) => {
                        let _ = tx.send(FlightOutcome::Failed(err.to_string()));
                        Err(err)
                    }
                };

                guard.complete();
                result
            }
        }
    }

    /// Run one resolution under the configured time bound
    async fn resolve_bounded(&self, user_id: &str) -> Result<ResolvedPermissions> {
        match self.config.resolve_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.resolver.resolve(user_id)).await
            {
                Ok(result) => result,
                Err(_) => Err(RbacError::StoreUnavailable(format!(
                    "resolution for '{}' timed out after {:?}",
                    user_id, limit
                ))),
            },
            None => self.resolver.resolve(user_id).await,
        }
    }

    /// Is the user allowed the requested permission?
    ///
    /// Never panics and fails closed: store unavailability, timeout, or
    /// cancellation all deny, with a `warn!` so operators can tell
    /// "denied" from "could not determine".
    pub async fn authorize(&self, user_id: &str, slug: &str) -> bool {
        match self.effective_permissions(user_id).await {
            Ok(permissions) => {
                let allowed = permissions.grants(slug);
                debug!(user_id, slug, allowed, "Authorization check");
                allowed
            }
            Err(err) => {
                warn!(user_id, slug, error = %err, "Authorization check failed; denying");
                false
            }
        }
    }

    /// Like [`authorize`], but an unheld permission is a reportable error
    ///
    /// `PermissionDenied` carries the user and slug for diagnostics. Store
    /// failures propagate as `StoreUnavailable`, never disguised as a
    /// denial, so callers can distinguish the two.
    ///
    /// [`authorize`]: AccessEngine::authorize
    pub async fn require_permission(&self, user_id: &str, slug: &str) -> Result<()> {
        let permissions = self.effective_permissions(user_id).await?;
        if permissions.grants(slug) {
            Ok(())
        } else {
            Err(RbacError::PermissionDenied {
                user_id: user_id.to_string(),
                slug: slug.to_string(),
            })
        }
    }

    /// True when any of the slugs is held
    pub async fn authorize_any(&self, user_id: &str, slugs: &[&str]) -> bool {
        match self.effective_permissions(user_id).await {
            Ok(permissions) => slugs.iter().any(|slug| permissions.grants(slug)),
            Err(err) => {
                warn!(user_id, error = %err, "Authorization check failed; denying");
                false
            }
        }
    }

    /// True when every slug is held
    pub async fn authorize_all(&self, user_id: &str, slugs: &[&str]) -> bool {
        match self.effective_permissions(user_id).await {
            Ok(permissions) => slugs.iter().all(|slug| permissions.grants(slug)),
            Err(err) => {
                warn!(user_id, error = %err, "Authorization check failed; denying");
                false
            }
        }
    }

    /// Can the actor manage the target user?
    ///
    /// True iff the actor's highest directly-assigned active role level
    /// strictly exceeds the target's; a target with no roles is manageable
    /// by any actor holding at least one. Equal levels deny. Fails closed
    /// on resolution errors.
    pub async fn can_manage(&self, actor_id: &str, target_id: &str) -> bool {
        let actor = match self.effective_permissions(actor_id).await {
            Ok(permissions) => permissions,
            Err(err) => {
                warn!(actor_id, error = %err, "Manage check failed; denying");
                return false;
            }
        };
        let target = match self.effective_permissions(target_id).await {
            Ok(permissions) => permissions,
            Err(err) => {
                warn!(target_id, error = %err, "Manage check failed; denying");
                return false;
            }
        };

        match (actor.max_level, target.max_level) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actor_level), Some(target_level)) => actor_level > target_level,
        }
    }

    /// Build a UI-facing permission map over one resolution
    ///
    /// Replaces per-controller ad-hoc maps: one call per screen, not a
    /// parallel authority. Fails closed to an all-false map.
    pub async fn permission_map(&self, user_id: &str, slugs: &[&str]) -> HashMap<String, bool> {
        let permissions = self.effective_permissions(user_id).await.ok();

        slugs
            .iter()
            .map(|slug| {
                let allowed = permissions
                    .as_ref()
                    .map(|p| p.grants(slug))
                    .unwrap_or(false);
                (slug.to_string(), allowed)
            })
            .collect()
    }

    /// Drop one user's cached set
    ///
    /// Also the seam a multi-instance deployment calls when an
    /// invalidation arrives over its broadcast channel.
    pub fn invalidate_user(&self, user_id: &str) {
        self.cache.invalidate(user_id);
    }

    /// Drop every cached set the role contributed to (directly or through
    /// descendant roles); the multi-instance seam for role-scoped events
    pub fn invalidate_role(&self, role_id: &str) -> usize {
        self.cache.invalidate_role(role_id)
    }

    /// Cache performance counters
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }
}
