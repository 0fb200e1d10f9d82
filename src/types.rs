//! Core data-model types for roles, permissions, grants, and assignments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Unique role identifier
pub type RoleId = String;

/// Unique permission identifier
pub type PermissionId = String;

/// Opaque user identifier
pub type UserId = String;

/// A role in the hierarchy
///
/// Roles form a forest via `parent_id`: a role inherits every permission
/// granted to any of its ancestors. The parent chain must be finite and
/// acyclic; `RoleGraph::build` rejects anything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Unique role identifier
    pub id: RoleId,

    /// Unique, immutable slug (e.g., "editor")
    pub slug: String,

    /// Human-readable name
    pub name: String,

    /// Authority level (higher = more authority)
    pub level: i32,

    /// Optional parent role
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<RoleId>,

    /// Soft-disable flag; inactive roles are excluded from resolution
    pub is_active: bool,
}

impl Role {
    /// Create a new active root role
    pub fn new(slug: impl Into<String>, name: impl Into<String>, level: i32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            slug: slug.into(),
            name: name.into(),
            level,
            parent_id: None,
            is_active: true,
        }
    }

    /// Set the parent role
    pub fn with_parent(mut self, parent_id: impl Into<RoleId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Set an explicit id (stores that mint their own ids use this)
    pub fn with_id(mut self, id: impl Into<RoleId>) -> Self {
        self.id = id.into();
        self
    }
}

/// A permission identified by its `service_action` slug
///
/// Either segment may be the wildcard `*` (`books_*`, `*_create`, `*_*`).
/// Slugs are immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Unique permission identifier
    pub id: PermissionId,

    /// Canonical slug (e.g., "books_create")
    pub slug: String,

    /// Soft-disable flag
    pub is_active: bool,
}

impl Permission {
    /// Create a new active permission
    pub fn new(slug: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            slug: slug.into(),
            is_active: true,
        }
    }

    /// Set an explicit id
    pub fn with_id(mut self, id: impl Into<PermissionId>) -> Self {
        self.id = id.into();
        self
    }
}

/// A grant linking a role to a permission
///
/// Historical rows for the same (role, permission) pair may coexist; only
/// the most recent active one counts during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePermissionGrant {
    /// Unique grant identifier
    pub id: String,

    /// The role receiving the permission
    pub role_id: RoleId,

    /// The permission being granted
    pub permission_id: PermissionId,

    /// Soft-delete flag; revocation deactivates rather than deletes
    pub is_active: bool,

    /// Who issued the grant
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_by: Option<String>,

    /// When the grant was issued
    pub granted_at: DateTime<Utc>,
}

impl RolePermissionGrant {
    /// Create a new active grant
    pub fn new(role_id: impl Into<RoleId>, permission_id: impl Into<PermissionId>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role_id: role_id.into(),
            permission_id: permission_id.into(),
            is_active: true,
            granted_by: None,
            granted_at: Utc::now(),
        }
    }

    /// Record who issued the grant
    pub fn with_granted_by(mut self, granted_by: impl Into<String>) -> Self {
        self.granted_by = Some(granted_by.into());
        self
    }
}

/// An assignment linking a user to a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleAssignment {
    /// Unique assignment identifier
    pub id: String,

    /// The user holding the role
    pub user_id: UserId,

    /// The role assigned
    pub role_id: RoleId,

    /// Soft-delete flag; revocation deactivates rather than deletes
    pub is_active: bool,

    /// Who made the assignment
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_by: Option<String>,

    /// When the assignment was made
    pub assigned_at: DateTime<Utc>,

    /// Optional expiry; an expired assignment is ignored even while active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl UserRoleAssignment {
    /// Create a new active, non-expiring assignment
    pub fn new(user_id: impl Into<UserId>, role_id: impl Into<RoleId>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            role_id: role_id.into(),
            is_active: true,
            assigned_by: None,
            assigned_at: Utc::now(),
            expires_at: None,
        }
    }

    /// Set an expiry on the assignment
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Record who made the assignment
    pub fn with_assigned_by(mut self, assigned_by: impl Into<String>) -> Self {
        self.assigned_by = Some(assigned_by.into());
        self
    }

    /// An assignment counts only while active and unexpired
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.map_or(true, |exp| exp > now)
    }
}

/// The resolved outcome for one user: effective slugs, highest level,
/// the roles observed along the way, and the earliest expiry deadline
///
/// `max_level` is `None` when the user has no valid active role.
/// `contributing_roles` records every role observed while walking the
/// user's ancestor chains, inactive ones included, so that reactivating a
/// role invalidates the users it would start affecting. It feeds the
/// cache's reverse index for role-scoped invalidation.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedPermissions {
    /// Effective permission slugs (wildcards kept as-is, expanded at check time)
    pub slugs: HashSet<String>,

    /// Highest `level` among directly-assigned active roles
    pub max_level: Option<i32>,

    /// Every role observed in the user's chains, active or not
    pub contributing_roles: HashSet<RoleId>,

    /// Earliest `expires_at` among the assignments this set was computed
    /// from; the cached snapshot stops being served at that instant
    pub expires_at: Option<DateTime<Utc>>,
}

impl ResolvedPermissions {
    /// An empty set for a user with no valid roles
    pub fn empty() -> Self {
        Self::default()
    }

    /// True iff any held slug covers the requested one
    pub fn grants(&self, requested: &str) -> bool {
        self.slugs
            .iter()
            .any(|held| crate::matcher::covers(held, requested))
    }
}
