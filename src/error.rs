//! Error types for the permission resolution engine

use thiserror::Error;

/// Permission engine errors
#[derive(Debug, Error)]
pub enum RbacError {
    /// A role's parent chain revisits itself
    #[error("Cyclic role hierarchy: {0}")]
    CyclicHierarchy(String),

    /// A role references a parent that does not exist
    #[error("Role '{role}' references missing parent '{parent}'")]
    DanglingParent { role: String, parent: String },

    /// The backing store could not be reached or timed out
    #[error("Assignment store unavailable: {0}")]
    StoreUnavailable(String),

    /// The user does not hold the requested permission
    #[error("Permission '{slug}' denied for user '{user_id}'")]
    PermissionDenied { user_id: String, slug: String },

    /// A mutation referenced a role the engine does not know
    #[error("Unknown role: {0}")]
    UnknownRole(String),

    /// A role cannot be hard-deleted while users still hold it
    #[error("Role '{0}' is still held by active assignments")]
    RoleInUse(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Result type for permission engine operations
pub type Result<T> = std::result::Result<T, RbacError>;
