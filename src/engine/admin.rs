//! Administrative mutation wrappers
//!
//! Each operation performs the store write and the matching cache
//! invalidation as one call, so callers cannot forget the second half.
//! Topology changes are validated by the resolver before anything is
//! persisted.

use super::AccessEngine;
use crate::error::{RbacError, Result};
use crate::matcher::split_slug;
use crate::types::{Permission, Role, RoleId, RolePermissionGrant, UserRoleAssignment};
use chrono::{DateTime, Utc};
use tracing::info;

impl AccessEngine {
    /// Assign a role to a user, optionally expiring
    pub async fn assign_role(
        &self,
        user_id: &str,
        role_id: &str,
        assigned_by: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let graph = self.resolver.graph_snapshot().await;
        if graph.role(role_id).is_none() {
            return Err(RbacError::UnknownRole(role_id.to_string()));
        }

        let mut assignment = UserRoleAssignment::new(user_id, role_id);
        if let Some(by) = assigned_by {
            assignment = assignment.with_assigned_by(by);
        }
        if let Some(expiry) = expires_at {
            assignment = assignment.with_expiry(expiry);
        }

        self.store.save_assignment(assignment).await?;
        self.cache.invalidate(user_id);

        info!(user_id, role_id, "Role assigned");
        Ok(())
    }

    /// Revoke a user's role (deactivates every matching assignment row)
    pub async fn revoke_role(&self, user_id: &str, role_id: &str) -> Result<()> {
        let assignments = self.store.load_active_assignments(user_id).await?;
        for mut assignment in assignments {
            if assignment.role_id == role_id {
                assignment.is_active = false;
                self.store.save_assignment(assignment).await?;
            }
        }
        self.cache.invalidate(user_id);

        info!(user_id, role_id, "Role revoked");
        Ok(())
    }

    /// Register a new permission
    ///
    /// The slug must be well-formed `service_action` (either segment may
    /// be `*`); this boundary is where the slug contract is enforced.
    pub async fn create_permission(&self, slug: &str) -> Result<Permission> {
        if split_slug(slug).is_none() {
            return Err(RbacError::InvalidInput(format!(
                "Permission slug '{}' is not of the form service_action",
                slug
            )));
        }

        let permission = Permission::new(slug);
        self.store.save_permission(permission.clone()).await?;

        info!(slug, "Permission created");
        Ok(permission)
    }

    /// Grant a permission to a role
    pub async fn grant_permission(
        &self,
        role_id: &str,
        permission_id: &str,
        granted_by: Option<&str>,
    ) -> Result<()> {
        let graph = self.resolver.graph_snapshot().await;
        if graph.role(role_id).is_none() {
            return Err(RbacError::UnknownRole(role_id.to_string()));
        }

        let permissions = self.store.load_permissions().await?;
        if !permissions.iter().any(|p| p.id == permission_id) {
            return Err(RbacError::InvalidInput(format!(
                "Unknown permission: {}",
                permission_id
            )));
        }

        let mut grant = RolePermissionGrant::new(role_id, permission_id);
        if let Some(by) = granted_by {
            grant = grant.with_granted_by(by);
        }

        self.store.save_grant(grant).await?;
        let affected = self.cache.invalidate_role(role_id);

        info!(role_id, permission_id, affected, "Permission granted");
        Ok(())
    }

    /// Revoke a permission from a role (deactivates the active grant rows,
    /// keeping them as history)
    pub async fn revoke_permission(&self, role_id: &str, permission_id: &str) -> Result<()> {
        let grants = self.store.load_active_grants(role_id).await?;
        for mut grant in grants {
            if grant.permission_id == permission_id {
                grant.is_active = false;
                self.store.save_grant(grant).await?;
            }
        }
        let affected = self.cache.invalidate_role(role_id);

        info!(role_id, permission_id, affected, "Permission revoked");
        Ok(())
    }

    /// Create a role
    ///
    /// No invalidation: a brand-new role cannot have contributed to any
    /// cached set.
    pub async fn create_role(&self, role: Role) -> Result<()> {
        let role_id = role.id.clone();
        self.resolver.create_role(role).await?;

        info!(role_id, "Role created");
        Ok(())
    }

    /// Move a role under a new parent (or to the root with `None`)
    ///
    /// Rejected before any store write if the new topology would be cyclic;
    /// reads keep using the previous graph until the swap.
    pub async fn reparent_role(&self, role_id: &str, new_parent: Option<RoleId>) -> Result<()> {
        self.resolver.reparent_role(role_id, new_parent).await?;
        let affected = self.cache.invalidate_role(role_id);

        info!(role_id, affected, "Role reparented");
        Ok(())
    }

    /// Soft-disable or re-enable a role
    pub async fn set_role_active(&self, role_id: &str, is_active: bool) -> Result<()> {
        self.resolver.set_role_active(role_id, is_active).await?;
        let affected = self.cache.invalidate_role(role_id);

        info!(role_id, is_active, affected, "Role activity changed");
        Ok(())
    }

    /// Hard-delete a role
    ///
    /// Refused while any user still validly holds it (`RoleInUse`) or
    /// while child roles point at it.
    pub async fn remove_role(&self, role_id: &str) -> Result<()> {
        self.resolver.remove_role(role_id).await?;
        let affected = self.cache.invalidate_role(role_id);

        info!(role_id, affected, "Role removed");
        Ok(())
    }
}
