//! # RBAC Permission Resolution Engine
//!
//! Computes a user's complete effective permission set by combining direct
//! role grants, hierarchical role inheritance, expiring assignments, and
//! wildcard permission patterns, with per-user caching invalidated
//! exactly when the underlying data changes.
//!
//! ## Features
//!
//! - **Role hierarchy** with cycle detection and atomic snapshot swaps
//! - **Wildcard slugs** (`books_*`, `*_read`, `*_*`) expanded lazily at
//!   check time, so new permissions are covered without grant changes
//! - **Explicit invalidation** instead of TTLs: a revoke is visible on
//!   the very next check
//! - **Single-flight resolution** collapsing concurrent misses for the
//!   same user into one graph walk
//! - **Fail-closed checks**: store failures and timeouts deny, never allow
//!
//! ## Example
//!
//! ```rust
//! use rbac_engine::{AccessEngine, EngineConfig, InMemoryAssignmentStore, Role};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(InMemoryAssignmentStore::new());
//!     let engine = AccessEngine::new(EngineConfig::default(), store).await?;
//!
//!     engine.create_role(Role::new("editor", "Editor", 50).with_id("editor")).await?;
//!     let books = engine.create_permission("books_*").await?;
//!     engine.grant_permission("editor", &books.id, Some("admin")).await?;
//!     engine.assign_role("alice", "editor", Some("admin"), None).await?;
//!
//!     assert!(engine.authorize("alice", "books_create").await);
//!     assert!(!engine.authorize("alice", "users_delete").await);
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod engine;
pub mod error;
pub mod graph;
pub mod matcher;
pub mod resolver;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use cache::{CacheStats, PermissionCache};
pub use engine::{AccessEngine, EngineConfig};
pub use error::{RbacError, Result};
pub use graph::RoleGraph;
pub use matcher::{build_permission_slug, covers, split_slug};
pub use resolver::Resolver;
pub use store::{AssignmentStore, InMemoryAssignmentStore};
pub use types::{
    Permission, PermissionId, ResolvedPermissions, Role, RoleId, RolePermissionGrant, UserId,
    UserRoleAssignment,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
