//! Wildcard permission matching on `service_action` slugs
//!
//! A held slug covers a requested slug segment-by-segment: the service
//! segment matches when it is `*` or equal, and likewise for the action
//! segment. Matching is pure and total; it sits on every authorization
//! check's hot path and must never allocate, fail, or log.

/// Wildcard segment
pub const WILDCARD: &str = "*";

/// Split a slug into `(service, action)` at the first underscore
///
/// Returns `None` for malformed slugs: no underscore, or an empty service
/// segment. The action segment may itself contain underscores
/// (`books_bulk_import` → `("books", "bulk_import")`).
pub fn split_slug(slug: &str) -> Option<(&str, &str)> {
    let (service, action) = slug.split_once('_')?;
    if service.is_empty() || action.is_empty() {
        return None;
    }
    Some((service, action))
}

/// Build the canonical slug for a service/action pair
pub fn build_permission_slug(service: &str, action: &str) -> String {
    format!("{}_{}", service, action)
}

/// Decide whether a held permission pattern covers a requested slug
///
/// Malformed slugs on either side never match; the diagnostic for bad
/// stored rows is the resolver's job, not this function's.
pub fn covers(held: &str, requested: &str) -> bool {
    let Some((held_service, held_action)) = split_slug(held) else {
        return false;
    };
    let Some((req_service, req_action)) = split_slug(requested) else {
        return false;
    };

    (held_service == WILDCARD || held_service == req_service)
        && (held_action == WILDCARD || held_action == req_action)
}
