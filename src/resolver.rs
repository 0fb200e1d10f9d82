//! Effective-permission resolution and role-topology mutations
//!
//! The resolver is a pure function over assignment-store snapshots plus the
//! in-memory role graph. It owns no persistent state: the graph is an
//! immutable `Arc` that topology mutations replace atomically, so readers
//! always walk either the previous or the next hierarchy, never a partial
//! one.

use crate::error::{RbacError, Result};
use crate::graph::RoleGraph;
use crate::matcher::split_slug;
use crate::store::AssignmentStore;
use crate::types::{Permission, ResolvedPermissions, Role, RoleId, RolePermissionGrant};
use chrono::Utc;
use dashmap::DashSet;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Computes effective permission sets and applies topology mutations
///
/// # Thread safety
///
/// `resolve` takes a snapshot of the current graph and runs lock-free from
/// there. Topology mutations serialize on an internal mutex, validate and
/// persist while readers keep using the previous snapshot, and only then
/// swap the `Arc`; the write lock is held for the duration of a pointer
/// assignment.
pub struct Resolver {
    /// Backing store, read through the narrow `AssignmentStore` seam
    store: Arc<dyn AssignmentStore>,

    /// Current hierarchy snapshot
    graph: RwLock<Arc<RoleGraph>>,

    /// Serializes topology mutations (rebuild, reparent, create, remove)
    topology: Mutex<()>,

    /// Malformed permission slugs already reported, so a bad row warns once
    /// instead of flooding the log on every resolution
    reported_slugs: DashSet<String>,
}

impl Resolver {
    /// Construct around an already-built graph
    pub fn new(store: Arc<dyn AssignmentStore>, graph: RoleGraph) -> Self {
        Self {
            store,
            graph: RwLock::new(Arc::new(graph)),
            topology: Mutex::new(()),
            reported_slugs: DashSet::new(),
        }
    }

    /// Load role rows from the store and build the initial graph
    ///
    /// # Errors
    ///
    /// Topology errors (`CyclicHierarchy`, `DanglingParent`) are fatal here
    /// and must be fixed in the data before the engine can serve checks.
    pub async fn load(store: Arc<dyn AssignmentStore>) -> Result<Self> {
        let rows = store.load_roles().await?;
        let graph = RoleGraph::build(rows)?;
        info!(roles = graph.len(), "Role graph built");
        Ok(Self::new(store, graph))
    }

    /// Clone the current graph snapshot
    pub async fn graph_snapshot(&self) -> Arc<RoleGraph> {
        self.graph.read().await.clone()
    }

    /// Compute the effective permission set for a user
    ///
    /// A user with no valid role assignments gets an empty set, not an
    /// error. Store failures propagate as `StoreUnavailable`; the caller
    /// decides how to fail closed.
    pub async fn resolve(&self, user_id: &str) -> Result<ResolvedPermissions> {
        let assignments = self.store.load_active_assignments(user_id).await?;
        let now = Utc::now();
        let graph = self.graph_snapshot().await;

        let mut seen_direct: HashSet<&RoleId> = HashSet::new();
        // Every role observed (for the cache's reverse index) vs. the
        // active ones whose grants actually count
        let mut observed: HashSet<RoleId> = HashSet::new();
        let mut grant_roles: HashSet<RoleId> = HashSet::new();
        let mut max_level: Option<i32> = None;
        let mut earliest_expiry: Option<chrono::DateTime<Utc>> = None;

        for assignment in assignments.iter().filter(|a| a.is_valid_at(now)) {
            // A user may hold duplicate rows for the same role; one walk is enough
            if !seen_direct.insert(&assignment.role_id) {
                continue;
            }

            if let Some(expiry) = assignment.expires_at {
                earliest_expiry = Some(earliest_expiry.map_or(expiry, |e| e.min(expiry)));
            }

            let Some(role) = graph.role(&assignment.role_id) else {
                warn!(
                    user_id,
                    role_id = %assignment.role_id,
                    "Assignment references a role missing from the graph; skipping"
                );
                continue;
            };

            // Record even an inactive role so reactivating it invalidates
            // this user's entry
            observed.insert(role.id.clone());
            if !role.is_active {
                continue;
            }

            max_level = Some(max_level.map_or(role.level, |lvl| lvl.max(role.level)));

            for ancestor in graph.ancestor_chain(&role.id) {
                observed.insert(ancestor.id.clone());
                if ancestor.is_active {
                    grant_roles.insert(ancestor.id.clone());
                }
            }
        }

        if grant_roles.is_empty() {
            debug!(user_id, "No valid active roles; empty permission set");
            return Ok(ResolvedPermissions {
                slugs: HashSet::new(),
                max_level,
                contributing_roles: observed,
                expires_at: earliest_expiry,
            });
        }

        let permissions = self.load_permission_index().await?;
        let mut slugs: HashSet<String> = HashSet::new();

        for role_id in &grant_roles {
            let grants = self.store.load_active_grants(role_id).await?;
            for grant in latest_grant_per_permission(&grants) {
                self.collect_slug(grant, &permissions, &mut slugs);
            }
        }

        debug!(
            user_id,
            roles = grant_roles.len(),
            slugs = slugs.len(),
            "Resolved effective permissions"
        );

        Ok(ResolvedPermissions {
            slugs,
            max_level,
            contributing_roles: observed,
            expires_at: earliest_expiry,
        })
    }

    /// Map a grant to its permission slug, tolerating bad rows
    fn collect_slug(
        &self,
        grant: &RolePermissionGrant,
        permissions: &HashMap<String, Permission>,
        slugs: &mut HashSet<String>,
    ) {
        let Some(permission) = permissions.get(&grant.permission_id) else {
            warn!(
                grant_id = %grant.id,
                permission_id = %grant.permission_id,
                "Grant references a missing permission; skipping"
            );
            return;
        };

        if !permission.is_active {
            return;
        }

        if split_slug(&permission.slug).is_none() {
            if self.reported_slugs.insert(permission.slug.clone()) {
                warn!(slug = %permission.slug, "Malformed permission slug; it will never match");
            }
            return;
        }

        slugs.insert(permission.slug.clone());
    }

    async fn load_permission_index(&self) -> Result<HashMap<String, Permission>> {
        let rows = self.store.load_permissions().await?;
        Ok(rows.into_iter().map(|p| (p.id.clone(), p)).collect())
    }

    // ------------------------------------------------------------------
    // Topology mutations
    // ------------------------------------------------------------------

    /// Reload roles from the store and swap in a freshly built graph
    pub async fn rebuild_graph(&self) -> Result<()> {
        let _guard = self.topology.lock().await;
        let rows = self.store.load_roles().await?;
        let rebuilt = RoleGraph::build(rows)?;
        self.swap_graph(rebuilt).await;
        Ok(())
    }

    /// Move a role under a new parent (or to the root with `None`)
    ///
    /// Validates the candidate topology first; on violation nothing is
    /// persisted and the previous graph keeps serving reads.
    pub async fn reparent_role(&self, role_id: &str, new_parent: Option<RoleId>) -> Result<()> {
        let _guard = self.topology.lock().await;
        let current = self.graph_snapshot().await;
        let candidate = current.reparented(role_id, new_parent)?;

        let updated = candidate
            .role(role_id)
            .cloned()
            .ok_or_else(|| RbacError::UnknownRole(role_id.to_string()))?;
        self.store.save_role(updated).await?;

        self.swap_graph(candidate).await;
        Ok(())
    }

    /// Create a new role
    pub async fn create_role(&self, role: Role) -> Result<()> {
        let _guard = self.topology.lock().await;
        let current = self.graph_snapshot().await;

        let mut rows: Vec<Role> = current.roles().cloned().collect();
        rows.push(role.clone());
        let candidate = RoleGraph::build(rows)?;

        self.store.save_role(role).await?;
        self.swap_graph(candidate).await;
        Ok(())
    }

    /// Hard-delete a role
    ///
    /// Refused with `RoleInUse` while any valid assignment still references
    /// the role; soft-disable via `set_role_active` is the usual path.
    pub async fn remove_role(&self, role_id: &str) -> Result<()> {
        let _guard = self.topology.lock().await;
        let current = self.graph_snapshot().await;

        if current.role(role_id).is_none() {
            return Err(RbacError::UnknownRole(role_id.to_string()));
        }

        let now = Utc::now();
        let holders = self.store.load_assignments_for_role(role_id).await?;
        if holders.iter().any(|a| a.is_valid_at(now)) {
            return Err(RbacError::RoleInUse(role_id.to_string()));
        }

        // A role with children cannot be removed: the candidate build
        // reports the would-be dangling parents.
        let rows: Vec<Role> = current
            .roles()
            .filter(|r| r.id != role_id)
            .cloned()
            .collect();
        let candidate = RoleGraph::build(rows)?;

        self.store.delete_role(role_id).await?;
        self.swap_graph(candidate).await;
        Ok(())
    }

    /// Soft-disable or re-enable a role
    pub async fn set_role_active(&self, role_id: &str, is_active: bool) -> Result<()> {
        let _guard = self.topology.lock().await;
        let current = self.graph_snapshot().await;

        let mut updated = current
            .role(role_id)
            .cloned()
            .ok_or_else(|| RbacError::UnknownRole(role_id.to_string()))?;
        if updated.is_active == is_active {
            return Ok(());
        }
        updated.is_active = is_active;

        let rows: Vec<Role> = current
            .roles()
            .map(|r| if r.id == role_id { updated.clone() } else { r.clone() })
            .collect();
        let candidate = RoleGraph::build(rows)?;

        self.store.save_role(updated).await?;
        self.swap_graph(candidate).await;
        Ok(())
    }

    /// Swap the snapshot; the write lock is held only for the assignment
    async fn swap_graph(&self, next: RoleGraph) {
        let mut guard = self.graph.write().await;
        *guard = Arc::new(next);
        info!(roles = guard.len(), "Role graph swapped");
    }
}

/// Most recent active grant per permission wins when historical rows coexist
fn latest_grant_per_permission(
    grants: &[RolePermissionGrant],
) -> impl Iterator<Item = &RolePermissionGrant> {
    let mut latest: HashMap<&str, &RolePermissionGrant> = HashMap::new();
    for grant in grants.iter().filter(|g| g.is_active) {
        latest
            .entry(grant.permission_id.as_str())
            .and_modify(|current| {
                if grant.granted_at > current.granted_at {
                    *current = grant;
                }
            })
            .or_insert(grant);
    }
    latest.into_values()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAssignmentStore;
    use crate::types::UserRoleAssignment;
    use chrono::Duration;

    async fn seeded_store() -> (Arc<InMemoryAssignmentStore>, Permission) {
        let store = Arc::new(InMemoryAssignmentStore::new());

        let admin = Role::new("admin", "Administrator", 100).with_id("admin");
        let editor = Role::new("editor", "Editor", 50)
            .with_id("editor")
            .with_parent("admin");
        store.save_role(admin).await.unwrap();
        store.save_role(editor).await.unwrap();

        let books_all = Permission::new("books_*").with_id("perm-books");
        store.save_permission(books_all.clone()).await.unwrap();
        store
            .save_grant(RolePermissionGrant::new("admin", "perm-books"))
            .await
            .unwrap();

        (store, books_all)
    }

    #[tokio::test]
    async fn test_resolve_inherits_through_hierarchy() {
        let (store, _) = seeded_store().await;
        store
            .save_assignment(UserRoleAssignment::new("alice", "editor"))
            .await
            .unwrap();

        let resolver = Resolver::load(store).await.unwrap();
        let resolved = resolver.resolve("alice").await.unwrap();

        assert!(resolved.slugs.contains("books_*"));
        assert_eq!(resolved.max_level, Some(50));
        assert!(resolved.contributing_roles.contains("admin"));
        assert!(resolved.contributing_roles.contains("editor"));
    }

    #[tokio::test]
    async fn test_resolve_no_assignments_is_empty_not_error() {
        let (store, _) = seeded_store().await;
        let resolver = Resolver::load(store).await.unwrap();

        let resolved = resolver.resolve("nobody").await.unwrap();
        assert!(resolved.slugs.is_empty());
        assert_eq!(resolved.max_level, None);
    }

    #[tokio::test]
    async fn test_resolve_skips_expired_assignment() {
        let (store, _) = seeded_store().await;
        store
            .save_assignment(
                UserRoleAssignment::new("alice", "editor")
                    .with_expiry(Utc::now() - Duration::days(1)),
            )
            .await
            .unwrap();

        let resolver = Resolver::load(store).await.unwrap();
        let resolved = resolver.resolve("alice").await.unwrap();
        assert!(resolved.slugs.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_skips_inactive_role() {
        let (store, _) = seeded_store().await;
        store
            .save_assignment(UserRoleAssignment::new("alice", "editor"))
            .await
            .unwrap();

        let resolver = Resolver::load(store.clone()).await.unwrap();
        resolver.set_role_active("editor", false).await.unwrap();

        let resolved = resolver.resolve("alice").await.unwrap();
        assert!(resolved.slugs.is_empty());
        assert_eq!(resolved.max_level, None);
    }

    #[tokio::test]
    async fn test_resolve_walks_past_inactive_ancestor() {
        let store = Arc::new(InMemoryAssignmentStore::new());

        let root = Role::new("root", "Root", 100).with_id("root");
        let mut middle = Role::new("middle", "Middle", 60)
            .with_id("middle")
            .with_parent("root");
        middle.is_active = false;
        let leaf = Role::new("leaf", "Leaf", 30)
            .with_id("leaf")
            .with_parent("middle");

        store.save_role(root).await.unwrap();
        store.save_role(middle).await.unwrap();
        store.save_role(leaf).await.unwrap();

        store
            .save_permission(Permission::new("books_read").with_id("p-root"))
            .await
            .unwrap();
        store
            .save_permission(Permission::new("books_write").with_id("p-middle"))
            .await
            .unwrap();
        store
            .save_grant(RolePermissionGrant::new("root", "p-root"))
            .await
            .unwrap();
        store
            .save_grant(RolePermissionGrant::new("middle", "p-middle"))
            .await
            .unwrap();
        store
            .save_assignment(UserRoleAssignment::new("alice", "leaf"))
            .await
            .unwrap();

        let resolver = Resolver::load(store).await.unwrap();
        let resolved = resolver.resolve("alice").await.unwrap();

        // The inactive middle role contributes nothing, but the walk
        // continues to the active root above it.
        assert!(resolved.slugs.contains("books_read"));
        assert!(!resolved.slugs.contains("books_write"));
    }

    #[tokio::test]
    async fn test_resolve_dedupes_shared_ancestor() {
        let store = Arc::new(InMemoryAssignmentStore::new());

        let base = Role::new("base", "Base", 10).with_id("base");
        let a = Role::new("a", "A", 20).with_id("a").with_parent("base");
        let b = Role::new("b", "B", 30).with_id("b").with_parent("base");
        store.save_role(base).await.unwrap();
        store.save_role(a).await.unwrap();
        store.save_role(b).await.unwrap();

        store
            .save_permission(Permission::new("files_read").with_id("p-1"))
            .await
            .unwrap();
        store
            .save_grant(RolePermissionGrant::new("base", "p-1"))
            .await
            .unwrap();

        store
            .save_assignment(UserRoleAssignment::new("alice", "a"))
            .await
            .unwrap();
        store
            .save_assignment(UserRoleAssignment::new("alice", "b"))
            .await
            .unwrap();

        let resolver = Resolver::load(store).await.unwrap();
        let resolved = resolver.resolve("alice").await.unwrap();

        assert_eq!(resolved.contributing_roles.len(), 3);
        assert!(resolved.slugs.contains("files_read"));
        assert_eq!(resolved.max_level, Some(30));
    }

    #[tokio::test]
    async fn test_most_recent_active_grant_wins() {
        let old = RolePermissionGrant {
            granted_at: Utc::now() - Duration::days(2),
            ..RolePermissionGrant::new("editor", "perm-1")
        };
        let newer = RolePermissionGrant::new("editor", "perm-1");
        let inactive = RolePermissionGrant {
            is_active: false,
            ..RolePermissionGrant::new("editor", "perm-1")
        };

        let grants = vec![old.clone(), newer.clone(), inactive];
        let picked: Vec<&RolePermissionGrant> = latest_grant_per_permission(&grants).collect();

        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].id, newer.id);
    }

    #[tokio::test]
    async fn test_malformed_slug_skipped() {
        let (store, _) = seeded_store().await;
        store
            .save_permission(Permission::new("noseparator").with_id("perm-bad"))
            .await
            .unwrap();
        store
            .save_grant(RolePermissionGrant::new("editor", "perm-bad"))
            .await
            .unwrap();
        store
            .save_assignment(UserRoleAssignment::new("alice", "editor"))
            .await
            .unwrap();

        let resolver = Resolver::load(store).await.unwrap();
        let resolved = resolver.resolve("alice").await.unwrap();

        assert!(!resolved.slugs.contains("noseparator"));
        assert!(resolved.slugs.contains("books_*"));
    }

    #[tokio::test]
    async fn test_reparent_rejects_cycle_without_store_write() {
        let (store, _) = seeded_store().await;
        let resolver = Resolver::load(store.clone()).await.unwrap();

        let result = resolver
            .reparent_role("admin", Some("editor".to_string()))
            .await;
        assert!(matches!(result, Err(RbacError::CyclicHierarchy(_))));

        // Store row unchanged: admin is still a root
        let roles = store.load_roles().await.unwrap();
        let admin = roles.iter().find(|r| r.id == "admin").unwrap();
        assert_eq!(admin.parent_id, None);
    }

    #[tokio::test]
    async fn test_remove_role_in_use() {
        let (store, _) = seeded_store().await;
        store
            .save_assignment(UserRoleAssignment::new("alice", "editor"))
            .await
            .unwrap();

        let resolver = Resolver::load(store).await.unwrap();
        assert!(matches!(
            resolver.remove_role("editor").await,
            Err(RbacError::RoleInUse(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_role_with_children_rejected() {
        let (store, _) = seeded_store().await;
        let resolver = Resolver::load(store).await.unwrap();

        // editor still points at admin
        assert!(matches!(
            resolver.remove_role("admin").await,
            Err(RbacError::DanglingParent { .. })
        ));
    }

    #[tokio::test]
    async fn test_rebuild_graph_picks_up_external_rows() {
        let (store, _) = seeded_store().await;
        let resolver = Resolver::load(store.clone()).await.unwrap();

        // A row written behind the resolver's back is invisible until a rebuild
        store
            .save_role(Role::new("viewer", "Viewer", 10).with_id("viewer"))
            .await
            .unwrap();
        assert!(resolver.graph_snapshot().await.role("viewer").is_none());

        resolver.rebuild_graph().await.unwrap();
        assert!(resolver.graph_snapshot().await.role("viewer").is_some());
    }

    #[tokio::test]
    async fn test_remove_unheld_leaf_role() {
        let (store, _) = seeded_store().await;
        let resolver = Resolver::load(store.clone()).await.unwrap();

        resolver.remove_role("editor").await.unwrap();
        assert!(resolver.graph_snapshot().await.role("editor").is_none());
        assert_eq!(store.load_roles().await.unwrap().len(), 1);
    }
}
