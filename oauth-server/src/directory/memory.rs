use super::{AccessControl, DirectoryError, ServiceAccounts, UserDirectory};
use crate::models::permission::{filter_by_actions, scope_covers};
use crate::models::{
    ManageServiceAccountCmd, Permission, ServiceAccountProfile, SignedInUser, Team, User,
};
use async_trait::async_trait;
use log::{debug, info};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const SERVICE_ACCOUNT_ROLE: &str = "None";

#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub id: i64,
    pub login: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    /// Ids of the teams the user belongs to
    #[serde(default)]
    pub teams: Vec<i64>,
}

/// JSON document the directory can be seeded from
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DirectorySeed {
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub teams: Vec<Team>,
}

#[derive(Debug, Default)]
struct DirectoryState {
    users: BTreeMap<i64, User>,
    teams: BTreeMap<i64, Team>,
    memberships: BTreeMap<i64, Vec<i64>>,
    permissions: BTreeMap<i64, Vec<Permission>>,
    service_accounts: BTreeMap<i64, ServiceAccountProfile>,
    next_id: i64,
}

impl DirectoryState {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn track_id(&mut self, id: i64) {
        self.next_id = self.next_id.max(id);
    }
}

/// Directory of users, teams and service accounts held in memory.
///
/// Users and service accounts share one id space, the way the host system
/// models service accounts as users.
#[derive(Clone, Default)]
pub struct InMemoryDirectory {
    state: Arc<RwLock<DirectoryState>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_seed(seed: DirectorySeed) -> Self {
        let mut state = DirectoryState::default();
        for team in seed.teams {
            state.teams.insert(team.id, team);
        }
        for user in seed.users {
            state.track_id(user.id);
            state.permissions.insert(user.id, user.permissions);
            state.memberships.insert(user.id, user.teams);
            state.users.insert(
                user.id,
                User {
                    id: user.id,
                    login: user.login,
                    name: user.name,
                    email: user.email,
                },
            );
        }
        Self {
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Reads a JSON seed file
    pub async fn load(path: &str) -> Result<Self, DirectoryError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| DirectoryError::Backend(format!("failed to read {path}: {e}")))?;
        let seed: DirectorySeed = serde_json::from_str(&raw)
            .map_err(|e| DirectoryError::Backend(format!("invalid directory seed {path}: {e}")))?;
        info!(
            "Loaded directory seed from {} ({} users, {} teams)",
            path,
            seed.users.len(),
            seed.teams.len()
        );
        Ok(Self::from_seed(seed))
    }

    pub async fn add_user(&self, user: User, permissions: Vec<Permission>) {
        let mut state = self.state.write().await;
        state.track_id(user.id);
        state.permissions.insert(user.id, permissions);
        state.users.insert(user.id, user);
    }

    pub async fn add_team(&self, team: Team, members: &[i64]) {
        let mut state = self.state.write().await;
        for member in members {
            state.memberships.entry(*member).or_default().push(team.id);
        }
        state.teams.insert(team.id, team);
    }

    /// Appends permissions to a user or service account
    pub async fn grant(&self, user_id: i64, permissions: Vec<Permission>) {
        let mut state = self.state.write().await;
        state.permissions.entry(user_id).or_default().extend(permissions);
    }

    pub async fn service_account_count(&self) -> usize {
        self.state.read().await.service_accounts.len()
    }
}

#[async_trait]
impl AccessControl for InMemoryDirectory {
    async fn evaluate(
        &self,
        user: &SignedInUser,
        permission: &Permission,
    ) -> Result<bool, DirectoryError> {
        let state = self.state.read().await;
        let granted = state
            .permissions
            .get(&user.user_id)
            .map(|held| {
                held.iter().any(|p| {
                    p.action == permission.action && scope_covers(&p.scope, &permission.scope)
                })
            })
            .unwrap_or(false);
        debug!(
            "Evaluated {} for user_id={}: {}",
            permission, user.user_id, granted
        );
        Ok(granted)
    }

    async fn search_user_permissions(
        &self,
        user_id: i64,
        actions: &[String],
    ) -> Result<Vec<Permission>, DirectoryError> {
        let state = self.state.read().await;
        if !state.users.contains_key(&user_id) {
            return Err(DirectoryError::UserNotFound(user_id));
        }
        let held = state.permissions.get(&user_id).cloned().unwrap_or_default();
        Ok(filter_by_actions(&held, actions))
    }

    async fn get_user_permissions(&self, user_id: i64) -> Result<Vec<Permission>, DirectoryError> {
        let state = self.state.read().await;
        Ok(state.permissions.get(&user_id).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl UserDirectory for InMemoryDirectory {
    async fn get_by_id(&self, user_id: i64) -> Result<User, DirectoryError> {
        let state = self.state.read().await;
        state
            .users
            .get(&user_id)
            .cloned()
            .ok_or(DirectoryError::UserNotFound(user_id))
    }

    async fn get_teams_by_user(&self, user_id: i64) -> Result<Vec<Team>, DirectoryError> {
        let state = self.state.read().await;
        if !state.users.contains_key(&user_id) {
            return Err(DirectoryError::UserNotFound(user_id));
        }
        Ok(state
            .memberships
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.teams.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ServiceAccounts for InMemoryDirectory {
    async fn manage_service_account(
        &self,
        current_id: i64,
        cmd: &ManageServiceAccountCmd,
    ) -> Result<i64, DirectoryError> {
        let mut state = self.state.write().await;

        if cmd.permissions.is_empty() {
            if state.service_accounts.remove(&current_id).is_some() {
                state.permissions.remove(&current_id);
                info!("Removed service account {} of {}", current_id, cmd.service_slug);
            }
            return Ok(0);
        }

        let id = if state.service_accounts.contains_key(&current_id) {
            current_id
        } else {
            let id = state.allocate_id();
            state.service_accounts.insert(
                id,
                ServiceAccountProfile {
                    id,
                    login: format!("sa-extsvc-{}", cmd.service_slug),
                    name: format!("extsvc-{}", cmd.service_slug),
                    role: SERVICE_ACCOUNT_ROLE.to_string(),
                    disabled: false,
                },
            );
            info!("Created service account {} for {}", id, cmd.service_slug);
            id
        };

        if let Some(profile) = state.service_accounts.get_mut(&id) {
            profile.disabled = !cmd.enabled;
        }
        state.permissions.insert(id, cmd.permissions.clone());
        Ok(id)
    }

    async fn retrieve_profile(&self, id: i64) -> Result<ServiceAccountProfile, DirectoryError> {
        let state = self.state.read().await;
        state
            .service_accounts
            .get(&id)
            .cloned()
            .ok_or(DirectoryError::ServiceAccountNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded() -> InMemoryDirectory {
        let seed: DirectorySeed = serde_json::from_value(serde_json::json!({
            "teams": [{"id": 1, "name": "core"}, {"id": 2, "name": "ops"}],
            "users": [{
                "id": 56,
                "login": "alice",
                "name": "Alice",
                "email": "alice@example.com",
                "teams": [1, 2],
                "permissions": [
                    {"action": "users:read", "scope": "global.users:id:*"},
                    {"action": "dashboards:read", "scope": "dashboards:uid:1"}
                ]
            }]
        }))
        .unwrap();
        InMemoryDirectory::from_seed(seed)
    }

    fn signed_in(user_id: i64) -> SignedInUser {
        SignedInUser {
            user_id,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_lookup_users_and_teams() {
        let directory = seeded();
        let user = directory.get_by_id(56).await.unwrap();
        assert_eq!(user.login, "alice");
        let teams = directory.get_teams_by_user(56).await.unwrap();
        assert_eq!(
            teams.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            vec!["core", "ops"]
        );
        assert!(matches!(
            directory.get_by_id(1).await,
            Err(DirectoryError::UserNotFound(1))
        ));
    }

    #[tokio::test]
    async fn test_evaluate_honours_wildcards() {
        let directory = seeded();
        let alice = signed_in(56);
        assert!(directory
            .evaluate(&alice, &Permission::new("users:read", "global.users:id:3"))
            .await
            .unwrap());
        assert!(!directory
            .evaluate(&alice, &Permission::new("dashboards:read", "dashboards:uid:2"))
            .await
            .unwrap());
        assert!(!directory
            .evaluate(&signed_in(99), &Permission::new("users:read", "global.users:id:3"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_search_user_permissions_filters_actions() {
        let directory = seeded();
        let filtered = directory
            .search_user_permissions(56, &["dashboards:read".to_string()])
            .await
            .unwrap();
        assert_eq!(filtered, vec![Permission::new("dashboards:read", "dashboards:uid:1")]);
        let all = directory.search_user_permissions(56, &[]).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_service_account_lifecycle() {
        let directory = seeded();
        let cmd = ManageServiceAccountCmd {
            service_slug: "my-plugin".to_string(),
            enabled: true,
            permissions: vec![Permission::new("dashboards:read", "dashboards:*")],
        };
        let id = directory.manage_service_account(0, &cmd).await.unwrap();
        assert!(id > 56);
        let profile = directory.retrieve_profile(id).await.unwrap();
        assert_eq!(profile.login, "sa-extsvc-my-plugin");
        assert!(!profile.disabled);

        let disabled = ManageServiceAccountCmd {
            enabled: false,
            ..cmd.clone()
        };
        assert_eq!(
            directory.manage_service_account(id, &disabled).await.unwrap(),
            id
        );
        assert!(directory.retrieve_profile(id).await.unwrap().disabled);

        let removed = ManageServiceAccountCmd {
            permissions: vec![],
            ..cmd
        };
        assert_eq!(directory.manage_service_account(id, &removed).await.unwrap(), 0);
        assert!(directory.retrieve_profile(id).await.is_err());
        assert!(directory.get_user_permissions(id).await.unwrap().is_empty());
    }
}
