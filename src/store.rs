//! Assignment store seam and the in-memory reference implementation
//!
//! The engine reads role, permission, grant, and assignment rows through
//! this narrow interface and never talks to a database directly. A real
//! deployment backs it with the persistence layer; tests back it with the
//! in-memory store below or purpose-built failing doubles.

use crate::error::{RbacError, Result};
use crate::types::{Permission, Role, RolePermissionGrant, UserRoleAssignment};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Read/write seam to the persistence layer
///
/// Transient infrastructure failures surface as
/// `RbacError::StoreUnavailable`; the resolver propagates them instead of
/// treating them as "no permissions".
#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// All role rows
    async fn load_roles(&self) -> Result<Vec<Role>>;

    /// All permission rows
    async fn load_permissions(&self) -> Result<Vec<Permission>>;

    /// Active assignment rows for a user (expiry filtering is the
    /// resolver's job, so a row flipping active↔expired needs no store
    /// round trip)
    async fn load_active_assignments(&self, user_id: &str) -> Result<Vec<UserRoleAssignment>>;

    /// Active grant rows for a role
    async fn load_active_grants(&self, role_id: &str) -> Result<Vec<RolePermissionGrant>>;

    /// All assignment rows referencing a role, active or not
    async fn load_assignments_for_role(&self, role_id: &str) -> Result<Vec<UserRoleAssignment>>;

    /// Insert or update a role row
    async fn save_role(&self, role: Role) -> Result<()>;

    /// Insert or update a permission row
    async fn save_permission(&self, permission: Permission) -> Result<()>;

    /// Insert or update an assignment row
    async fn save_assignment(&self, assignment: UserRoleAssignment) -> Result<()>;

    /// Insert or update a grant row
    async fn save_grant(&self, grant: RolePermissionGrant) -> Result<()>;

    /// Hard-delete a role row; historical grants and assignments remain
    async fn delete_role(&self, role_id: &str) -> Result<()>;
}

/// In-memory store: the reference implementation and default test double
pub struct InMemoryAssignmentStore {
    roles: Arc<RwLock<HashMap<String, Role>>>,
    permissions: Arc<RwLock<HashMap<String, Permission>>>,
    grants: Arc<RwLock<HashMap<String, RolePermissionGrant>>>,
    assignments: Arc<RwLock<HashMap<String, UserRoleAssignment>>>,
}

impl InMemoryAssignmentStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            roles: Arc::new(RwLock::new(HashMap::new())),
            permissions: Arc::new(RwLock::new(HashMap::new())),
            grants: Arc::new(RwLock::new(HashMap::new())),
            assignments: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryAssignmentStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn load_roles(&self) -> Result<Vec<Role>> {
        let roles = self.roles.read().await;
        Ok(roles.values().cloned().collect())
    }

    async fn load_permissions(&self) -> Result<Vec<Permission>> {
        let permissions = self.permissions.read().await;
        Ok(permissions.values().cloned().collect())
    }

    async fn load_active_assignments(&self, user_id: &str) -> Result<Vec<UserRoleAssignment>> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .values()
            .filter(|a| a.user_id == user_id && a.is_active)
            .cloned()
            .collect())
    }

    async fn load_active_grants(&self, role_id: &str) -> Result<Vec<RolePermissionGrant>> {
        let grants = self.grants.read().await;
        Ok(grants
            .values()
            .filter(|g| g.role_id == role_id && g.is_active)
            .cloned()
            .collect())
    }

    async fn load_assignments_for_role(&self, role_id: &str) -> Result<Vec<UserRoleAssignment>> {
        let assignments = self.assignments.read().await;
        Ok(assignments
            .values()
            .filter(|a| a.role_id == role_id)
            .cloned()
            .collect())
    }

    async fn save_role(&self, role: Role) -> Result<()> {
        let mut roles = self.roles.write().await;
        roles.insert(role.id.clone(), role);
        Ok(())
    }

    async fn save_permission(&self, permission: Permission) -> Result<()> {
        let mut permissions = self.permissions.write().await;
        permissions.insert(permission.id.clone(), permission);
        Ok(())
    }

    async fn save_assignment(&self, assignment: UserRoleAssignment) -> Result<()> {
        let mut assignments = self.assignments.write().await;
        assignments.insert(assignment.id.clone(), assignment);
        Ok(())
    }

    async fn save_grant(&self, grant: RolePermissionGrant) -> Result<()> {
        let mut grants = self.grants.write().await;

        // At most one active grant per (role, permission) pair: saving an
        // active grant retires any previous active row for the same pair.
        if grant.is_active {
            for existing in grants.values_mut() {
                if existing.id != grant.id
                    && existing.role_id == grant.role_id
                    && existing.permission_id == grant.permission_id
                    && existing.is_active
                {
                    existing.is_active = false;
                }
            }
        }

        grants.insert(grant.id.clone(), grant);
        Ok(())
    }

    async fn delete_role(&self, role_id: &str) -> Result<()> {
        let mut roles = self.roles.write().await;
        if roles.remove(role_id).is_none() {
            return Err(RbacError::UnknownRole(role_id.to_string()));
        }
        Ok(())
    }
}
