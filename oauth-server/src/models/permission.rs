//! RBAC permission value types and the set operations token issuance relies on.
//!
//! A permission pairs an action (`dashboards:read`) with a scope. Scopes are
//! concrete locators (`dashboards:uid:1`), wildcards (`dashboards:*`,
//! `dashboards:uid:*`, `*`) or self-placeholders (`users:self`,
//! `global.users:self`, `teams:self`) which only become meaningful once they
//! are bound to an impersonated subject with [`rewrite_self_scopes`].

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use utoipa::ToSchema;

pub const ACTION_USERS_READ: &str = "users:read";
pub const ACTION_USERS_PERMISSIONS_READ: &str = "users.permissions:read";
pub const ACTION_USERS_IMPERSONATE: &str = "users:impersonate";
pub const ACTION_TEAMS_READ: &str = "teams:read";

pub const SCOPE_USERS_ALL: &str = "users:*";
pub const SCOPE_USERS_SELF: &str = "users:self";
pub const SCOPE_GLOBAL_USERS_SELF: &str = "global.users:self";
pub const SCOPE_TEAMS_SELF: &str = "teams:self";

/// Action to scopes map, the shape of the `entitlements` claim
pub type PermissionMap = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
pub struct Permission {
    /// RBAC action, e.g. `dashboards:read`
    pub action: String,
    /// Resource scope the action applies to, e.g. `dashboards:uid:1`
    #[serde(default)]
    pub scope: String,
}

impl Permission {
    pub fn new(action: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            scope: scope.into(),
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.action, self.scope)
    }
}

/// Whether `scope` is one of the subject-relative placeholders
pub fn is_self_placeholder(scope: &str) -> bool {
    matches!(
        scope,
        SCOPE_USERS_SELF | SCOPE_GLOBAL_USERS_SELF | SCOPE_TEAMS_SELF
    )
}

/// Whether `pattern` grants access to everything `scope` designates.
///
/// A pattern ending in `*` covers every scope sharing its prefix, as long as
/// the wildcard stands for whole segments (`dashboards:*`, `dashboards:uid:*`
/// or the bare `*`). Anything else must match exactly.
pub fn scope_covers(pattern: &str, scope: &str) -> bool {
    if pattern == scope {
        return true;
    }
    match pattern.strip_suffix('*') {
        Some(prefix) => {
            (prefix.is_empty() || prefix.ends_with(':')) && scope.starts_with(prefix)
        }
        None => false,
    }
}

/// Builds the scope of a single resource, e.g. `users:id:56`
pub fn scope_for(kind: &str, attribute: &str, value: impl fmt::Display) -> String {
    format!("{kind}:{attribute}:{value}")
}

/// Intersects two permission sets.
///
/// For every action present on both sides, a scope is kept when the other
/// side holds the same scope or a wildcard covering it; of two overlapping
/// scopes the narrower one wins. Self-placeholders never match anything, they
/// must be rewritten first. The result is deduplicated and sorted.
pub fn intersect(a: &[Permission], b: &[Permission]) -> Vec<Permission> {
    let left = group_by_action(a);
    let right = group_by_action(b);

    let mut result = BTreeSet::new();
    for (action, left_scopes) in &left {
        let Some(right_scopes) = right.get(action) else {
            continue;
        };
        for l in left_scopes.iter().filter(|s| !is_self_placeholder(s)) {
            for r in right_scopes.iter().filter(|s| !is_self_placeholder(s)) {
                if scope_covers(l, r) {
                    result.insert(Permission::new(action.as_str(), r.as_str()));
                } else if scope_covers(r, l) {
                    result.insert(Permission::new(action.as_str(), l.as_str()));
                }
            }
        }
    }
    result.into_iter().collect()
}

/// Binds the self-placeholders of `permissions` to a concrete subject.
///
/// `teams:self` expands to one `teams:id:<id>` entry per team and vanishes
/// when `team_ids` is empty. Permissions without placeholders are returned
/// unchanged and in order.
pub fn rewrite_self_scopes(
    permissions: &[Permission],
    subject_id: i64,
    team_ids: &[i64],
) -> Vec<Permission> {
    let mut rewritten = Vec::with_capacity(permissions.len());
    for permission in permissions {
        match permission.scope.as_str() {
            SCOPE_USERS_SELF => rewritten.push(Permission::new(
                permission.action.as_str(),
                scope_for("users", "id", subject_id),
            )),
            SCOPE_GLOBAL_USERS_SELF => rewritten.push(Permission::new(
                permission.action.as_str(),
                scope_for("global.users", "id", subject_id),
            )),
            SCOPE_TEAMS_SELF => rewritten.extend(team_ids.iter().map(|team_id| {
                Permission::new(permission.action.as_str(), scope_for("teams", "id", team_id))
            })),
            _ => rewritten.push(permission.clone()),
        }
    }
    rewritten
}

/// Keeps only the permissions whose action is listed. An empty filter keeps everything.
pub fn filter_by_actions(permissions: &[Permission], actions: &[String]) -> Vec<Permission> {
    if actions.is_empty() {
        return permissions.to_vec();
    }
    permissions
        .iter()
        .filter(|p| actions.iter().any(|a| a == &p.action))
        .cloned()
        .collect()
}

/// Groups permissions into a freshly allocated action to sorted, deduplicated scopes map
pub fn group_by_action(permissions: &[Permission]) -> PermissionMap {
    let mut map = PermissionMap::new();
    for permission in permissions {
        map.entry(permission.action.clone())
            .or_default()
            .push(permission.scope.clone());
    }
    for scopes in map.values_mut() {
        scopes.sort();
        scopes.dedup();
    }
    map
}

/// Flattens an action to scopes map back into a permission list
pub fn flatten(map: &PermissionMap) -> Vec<Permission> {
    map.iter()
        .flat_map(|(action, scopes)| {
            scopes
                .iter()
                .map(move |scope| Permission::new(action.as_str(), scope.as_str()))
        })
        .collect()
}

/// Removes duplicate permissions while keeping the first occurrence order
pub fn dedup(permissions: Vec<Permission>) -> Vec<Permission> {
    let mut seen = BTreeSet::new();
    permissions
        .into_iter()
        .filter(|p| seen.insert(p.clone()))
        .collect()
}
