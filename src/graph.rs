//! In-memory role hierarchy with cycle detection and ancestor chains
//!
//! The graph is a pure topology value: it is built once from a snapshot of
//! role rows, validated (no cycles, no dangling parents), and then never
//! mutated. Topology changes produce a *new* graph that replaces the old
//! one atomically, so a failed validation can never leave readers with a
//! half-updated hierarchy.
//!
//! Activity filtering deliberately does NOT happen here: `ancestor_chain`
//! returns inactive roles too, and the resolver decides what to skip.

use crate::error::{RbacError, Result};
use crate::types::{Role, RoleId};
use std::collections::HashMap;

/// Immutable role hierarchy
///
/// Answers "ancestor chain of role R" in O(depth) by following validated
/// parent pointers.
#[derive(Debug, Clone, Default)]
pub struct RoleGraph {
    /// Role rows keyed by id
    roles: HashMap<RoleId, Role>,
}

impl RoleGraph {
    /// Build a graph from role rows, validating the topology
    ///
    /// # Errors
    ///
    /// - `RbacError::InvalidInput` on duplicate role ids
    /// - `RbacError::DanglingParent` when a `parent_id` references a
    ///   role that is not in the set
    /// - `RbacError::CyclicHierarchy` when any parent chain revisits a
    ///   role; the message names the cycle path
    pub fn build(rows: Vec<Role>) -> Result<Self> {
        let mut roles: HashMap<RoleId, Role> = HashMap::with_capacity(rows.len());
        for role in rows {
            if roles.insert(role.id.clone(), role.clone()).is_some() {
                return Err(RbacError::InvalidInput(format!(
                    "Duplicate role id: {}",
                    role.id
                )));
            }
        }

        // Dangling parents first, so the cycle walk can trust every edge
        for role in roles.values() {
            if let Some(parent_id) = &role.parent_id {
                if !roles.contains_key(parent_id) {
                    return Err(RbacError::DanglingParent {
                        role: role.slug.clone(),
                        parent: parent_id.clone(),
                    });
                }
            }
        }

        Self::check_acyclic(&roles)?;

        Ok(Self { roles })
    }

    /// Walk every parent chain, rejecting the first cycle found
    ///
    /// Three-state walk: unvisited, on the current chain (gray), fully
    /// checked (black). Each role has at most one parent, so one pass over
    /// the nodes is O(n) total.
    fn check_acyclic(roles: &HashMap<RoleId, Role>) -> Result<()> {
        const UNVISITED: u8 = 0;
        const ON_CHAIN: u8 = 1;
        const CHECKED: u8 = 2;

        let mut state: HashMap<&RoleId, u8> = HashMap::with_capacity(roles.len());

        for start in roles.keys() {
            if state.get(start).copied().unwrap_or(UNVISITED) != UNVISITED {
                continue;
            }

            let mut chain: Vec<&RoleId> = Vec::new();
            let mut current = start;

            loop {
                match state.get(current).copied().unwrap_or(UNVISITED) {
                    ON_CHAIN => {
                        let cycle_start =
                            chain.iter().position(|id| *id == current).unwrap_or(0);
                        let mut path: Vec<&str> = chain[cycle_start..]
                            .iter()
                            .map(|id| roles[*id].slug.as_str())
                            .collect();
                        path.push(roles[current].slug.as_str());
                        return Err(RbacError::CyclicHierarchy(path.join(" -> ")));
                    }
                    CHECKED => break,
                    _ => {}
                }

                state.insert(current, ON_CHAIN);
                chain.push(current);

                match &roles[current].parent_id {
                    Some(parent) => current = parent,
                    None => break,
                }
            }

            for id in chain {
                state.insert(id, CHECKED);
            }
        }

        Ok(())
    }

    /// Look up a role by id
    pub fn role(&self, role_id: &str) -> Option<&Role> {
        self.roles.get(role_id)
    }

    /// The role itself followed by its parents, closest first
    ///
    /// Returns an empty chain for an unknown role. Inactive roles are
    /// included; filtering them is the resolver's responsibility.
    pub fn ancestor_chain(&self, role_id: &str) -> Vec<&Role> {
        let mut chain = Vec::new();
        let mut current = self.roles.get(role_id);

        while let Some(role) = current {
            chain.push(role);
            current = role
                .parent_id
                .as_deref()
                .and_then(|parent_id| self.roles.get(parent_id));
        }

        chain
    }

    /// Produce a new graph with one role reparented
    ///
    /// Validates the candidate topology in full; on violation the error is
    /// returned and `self` is untouched.
    ///
    /// # Errors
    ///
    /// `RbacError::UnknownRole` for an unknown role or parent, plus the
    /// `build` errors for the candidate topology.
    pub fn reparented(&self, role_id: &str, new_parent: Option<RoleId>) -> Result<Self> {
        if !self.roles.contains_key(role_id) {
            return Err(RbacError::UnknownRole(role_id.to_string()));
        }
        if let Some(parent_id) = &new_parent {
            if !self.roles.contains_key(parent_id) {
                return Err(RbacError::UnknownRole(parent_id.clone()));
            }
        }

        let rows = self
            .roles
            .values()
            .map(|role| {
                if role.id == role_id {
                    let mut updated = role.clone();
                    updated.parent_id = new_parent.clone();
                    updated
                } else {
                    role.clone()
                }
            })
            .collect();

        Self::build(rows)
    }

    /// All role rows in the graph
    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.roles.values()
    }

    /// Number of roles
    pub fn len(&self) -> usize {
        self.roles.len()
    }

    /// True when the graph holds no roles
    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}
