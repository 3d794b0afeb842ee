//! External service registry: CRUD over the store with a read-through cache

use crate::cache::{Cache, CacheBackend, CacheError};
use crate::directory::{AccessControl, DirectoryError, ServiceAccounts};
use crate::keys::{
    generate_key_pair, hash_secret, random_string, validate_public_pem, ClientPublicKey, KeyError,
};
use crate::models::external_service::NO_SERVICE_ACCOUNT_ID;
use crate::models::identity::slugify;
use crate::models::permission::{
    dedup, group_by_action, ACTION_TEAMS_READ, ACTION_USERS_IMPERSONATE,
    ACTION_USERS_PERMISSIONS_READ, ACTION_USERS_READ, SCOPE_GLOBAL_USERS_SELF, SCOPE_TEAMS_SELF,
    SCOPE_USERS_ALL, SCOPE_USERS_SELF,
};
use crate::models::{
    ClientDTO, ExternalService, ExternalServiceRegistration, GrantType, KeyOption, KeyResult,
    ManageServiceAccountCmd, OAuthClient, Permission, SignedInUser,
};
use crate::store::{ExternalServiceStore, StoreError};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

const CLIENT_ID_LEN: usize = 20;
const CLIENT_SECRET_LEN: usize = 40;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("External service not found: {0}")]
    NotFound(String),
    #[error("{0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(StoreError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(key) => RegistryError::NotFound(key),
            StoreError::Conflict(name) => {
                RegistryError::InvalidRequest(format!("external service {name} already exists"))
            }
            other => RegistryError::Store(other),
        }
    }
}

/// Async locks keyed by string, removed from the map once released by
/// their last holder
#[derive(Clone, Default)]
struct KeyLocks {
    locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl KeyLocks {
    async fn lock(&self, key: String) -> KeyGuard {
        let lock = self
            .locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .clone();
        let guard = lock.lock_owned().await;
        KeyGuard {
            key,
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }
}

struct KeyGuard {
    key: String,
    locks: Arc<StdMutex<HashMap<String, Arc<Mutex<()>>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.guard.take());
        // Only the map still references the lock: nobody holds or awaits it
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

fn name_key(name: &str) -> String {
    format!("name:{name}")
}

fn client_key(client_id: &str) -> String {
    format!("client:{client_id}")
}

/// Owns the client store and the cache in front of it, and keeps the
/// service account backing each external service in sync.
///
/// Saves and deletes are serialized per service name. Cache fills and
/// invalidations of one client id are serialized against each other, so a
/// fill started before a write can never outlive that write's invalidation.
#[derive(Clone)]
pub struct ExternalServiceRegistry {
    store: Arc<dyn ExternalServiceStore>,
    cache: Cache,
    access_control: Arc<dyn AccessControl>,
    service_accounts: Arc<dyn ServiceAccounts>,
    locks: KeyLocks,
}

impl ExternalServiceRegistry {
    pub fn new(
        store: Arc<dyn ExternalServiceStore>,
        cache: Cache,
        access_control: Arc<dyn AccessControl>,
        service_accounts: Arc<dyn ServiceAccounts>,
    ) -> Self {
        Self {
            store,
            cache,
            access_control,
            service_accounts,
            locks: KeyLocks::default(),
        }
    }

    async fn cached(&self, client_id: &str) -> Option<ExternalService> {
        match self.cache.get::<ExternalService>(client_id).await {
            Ok(Some(service)) => {
                debug!("External service cache hit for client_id={client_id}");
                Some(service)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable cache entry for client_id={client_id}: {e}");
                None
            }
        }
    }

    /// Returns the fully hydrated external service, served from cache when possible
    pub async fn get(&self, client_id: &str) -> Result<ExternalService, RegistryError> {
        if let Some(service) = self.cached(client_id).await {
            return Ok(service);
        }

        let _fill = self.locks.lock(client_key(client_id)).await;
        if let Some(service) = self.cached(client_id).await {
            return Ok(service);
        }

        let client = self.store.get_external_service(client_id).await?;
        let service = if client.service_account_id == NO_SERVICE_ACCOUNT_ID {
            let signed_in_user = SignedInUser {
                user_id: NO_SERVICE_ACCOUNT_ID,
                name: client.name.clone(),
                ..Default::default()
            };
            ExternalService {
                client,
                self_permissions: Vec::new(),
                signed_in_user,
            }
        } else {
            let profile = self
                .service_accounts
                .retrieve_profile(client.service_account_id)
                .await?;
            let permissions = self
                .access_control
                .get_user_permissions(client.service_account_id)
                .await?;
            let signed_in_user = SignedInUser {
                user_id: profile.id,
                login: profile.login,
                name: profile.name,
                role: profile.role,
                permissions: group_by_action(&permissions),
            };
            ExternalService {
                client,
                self_permissions: permissions,
                signed_in_user,
            }
        };

        if let Err(e) = self.cache.set(client_id, &service).await {
            warn!("Failed to cache external service client_id={client_id}: {e}");
        }
        Ok(service)
    }

    /// Public key verifying the JWT-bearer assertions of a client
    pub async fn get_public_key(&self, client_id: &str) -> Result<ClientPublicKey, RegistryError> {
        Ok(self.store.get_external_service_public_key(client_id).await?)
    }

    pub async fn names(&self) -> Result<Vec<String>, RegistryError> {
        Ok(self.store.get_external_service_names().await?)
    }

    /// Creates or updates an external service from its registration.
    ///
    /// The returned DTO carries the plaintext secret only when the client
    /// was created by this call, and the private key only when one was generated.
    pub async fn save(
        &self,
        registration: &ExternalServiceRegistration,
    ) -> Result<ClientDTO, RegistryError> {
        let name = registration.name.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidRequest(
                "external service name is required".to_string(),
            ));
        }

        let _save = self.locks.lock(name_key(name)).await;
        let existing = match self.store.get_external_service_by_name(name).await {
            Ok(client) => Some(client),
            Err(StoreError::NotFound(_)) => None,
            Err(e) => return Err(e.into()),
        };

        let (self_permissions, impersonate_permissions) = registration_permissions(registration);

        let mut grant_types = Vec::new();
        if registration.self_cfg.enabled {
            grant_types.push(GrantType::ClientCredentials);
        }
        if registration.impersonation.enabled {
            grant_types.push(GrantType::JwtBearer);
        }

        let (public_pem, key) = resolve_key(
            registration.oauth.key.as_ref(),
            existing.as_ref(),
            registration.impersonation.enabled,
        )?;

        let (client_id, secret_digest, plaintext_secret) = match &existing {
            Some(client) => (client.client_id.clone(), client.secret.clone(), None),
            None => {
                let secret = random_string(CLIENT_SECRET_LEN);
                (random_string(CLIENT_ID_LEN), hash_secret(&secret), Some(secret))
            }
        };

        let current_service_account = existing
            .as_ref()
            .map(|c| c.service_account_id)
            .unwrap_or(NO_SERVICE_ACCOUNT_ID);
        let cmd = ManageServiceAccountCmd {
            service_slug: slugify(name),
            enabled: registration.self_cfg.enabled,
            permissions: self_permissions,
        };

        // An account being removed is released only once the stored client
        // no longer points at it
        let removes_account = cmd.permissions.is_empty();
        let service_account_id = if removes_account {
            NO_SERVICE_ACCOUNT_ID
        } else {
            self.service_accounts
                .manage_service_account(current_service_account, &cmd)
                .await?
        };

        let client = OAuthClient {
            id: existing.as_ref().map(|c| c.id).unwrap_or(0),
            name: name.to_string(),
            client_id,
            secret: secret_digest,
            grant_types,
            audiences: registration.oauth.audiences.clone(),
            redirect_uri: registration.oauth.redirect_uri.clone(),
            public_pem,
            service_account_id,
            impersonate_permissions,
        };
        let saved = match self.write(&client, existing.is_some()).await {
            Ok(saved) => saved,
            Err(e) => {
                if service_account_id != current_service_account {
                    self.release_service_account(service_account_id, name).await;
                }
                return Err(e);
            }
        };
        if removes_account && current_service_account != NO_SERVICE_ACCOUNT_ID {
            self.service_accounts
                .manage_service_account(current_service_account, &cmd)
                .await?;
        }

        info!(
            "{} external service {} (client_id={}, service_account_id={})",
            if existing.is_some() { "Updated" } else { "Registered" },
            saved.name,
            saved.client_id,
            saved.service_account_id
        );

        let mut dto = saved.to_dto();
        dto.secret = plaintext_secret;
        dto.key = key;
        Ok(dto)
    }

    /// Persists the client; updates drop the cached entry while holding
    /// the client id's fill lock
    async fn write(
        &self,
        client: &OAuthClient,
        exists: bool,
    ) -> Result<OAuthClient, RegistryError> {
        if !exists {
            return Ok(self.store.register_external_service(client).await?);
        }
        let _fill = self.locks.lock(client_key(&client.client_id)).await;
        let saved = self.store.save_external_service(client).await?;
        self.cache.delete(&saved.client_id).await?;
        Ok(saved)
    }

    async fn release_service_account(&self, service_account_id: i64, name: &str) {
        if service_account_id == NO_SERVICE_ACCOUNT_ID {
            return;
        }
        let cmd = ManageServiceAccountCmd {
            service_slug: slugify(name),
            enabled: false,
            permissions: Vec::new(),
        };
        if let Err(e) = self
            .service_accounts
            .manage_service_account(service_account_id, &cmd)
            .await
        {
            warn!("Failed to release service account {service_account_id} of {name}: {e}");
        }
    }

    /// Removes an external service together with its service account
    pub async fn delete(&self, client_id: &str) -> Result<(), RegistryError> {
        let name = self.store.get_external_service(client_id).await?.name;
        let _save = self.locks.lock(name_key(&name)).await;
        let _fill = self.locks.lock(client_key(client_id)).await;

        // Re-read under the locks, a concurrent delete may have won
        let client = self.store.get_external_service(client_id).await?;
        self.store.delete_external_service(client_id).await?;
        self.cache.delete(client_id).await?;
        self.release_service_account(client.service_account_id, &client.name)
            .await;
        info!("Deleted external service {} (client_id={})", client.name, client_id);
        Ok(())
    }

    pub async fn store_health(&self) -> Result<(), String> {
        self.store.health_check().await
    }

    pub async fn cache_health(&self) -> Result<(), String> {
        self.cache.health_check().await
    }
}

/// Self and impersonate permissions a registration resolves to
fn registration_permissions(
    registration: &ExternalServiceRegistration,
) -> (Vec<Permission>, Vec<Permission>) {
    let mut self_permissions = registration.self_cfg.permissions.clone();
    let mut impersonate_permissions = Vec::new();

    if registration.impersonation.enabled {
        impersonate_permissions = registration.impersonation.permissions.clone();
        impersonate_permissions.push(Permission::new(ACTION_USERS_READ, SCOPE_GLOBAL_USERS_SELF));
        impersonate_permissions.push(Permission::new(
            ACTION_USERS_PERMISSIONS_READ,
            SCOPE_USERS_SELF,
        ));
        if registration.impersonation.groups {
            impersonate_permissions.push(Permission::new(ACTION_TEAMS_READ, SCOPE_TEAMS_SELF));
        }
        self_permissions.push(Permission::new(ACTION_USERS_IMPERSONATE, SCOPE_USERS_ALL));
    }

    (dedup(self_permissions), dedup(impersonate_permissions))
}

/// Resolves the key option into the public PEM to persist and the key
/// material to hand back
fn resolve_key(
    option: Option<&KeyOption>,
    existing: Option<&OAuthClient>,
    key_required: bool,
) -> Result<(Option<String>, Option<KeyResult>), RegistryError> {
    let Some(option) = option else {
        return match existing.and_then(|c| c.public_pem.clone()) {
            Some(pem) => Ok((
                Some(pem.clone()),
                Some(KeyResult {
                    public_pem: pem,
                    private_pem: None,
                    generated: false,
                }),
            )),
            None if key_required => Err(RegistryError::InvalidRequest(
                "a key option is required when impersonation is enabled".to_string(),
            )),
            None => Ok((None, None)),
        };
    };

    if option.url.is_some() {
        return Err(RegistryError::InvalidRequest(
            "JWKS URL key option is not supported".to_string(),
        ));
    }

    if option.generate {
        let pair = generate_key_pair(option.algorithm.unwrap_or_default())?;
        return Ok((
            Some(pair.public_pem.clone()),
            Some(KeyResult {
                public_pem: pair.public_pem,
                private_pem: Some(pair.private_pem),
                generated: true,
            }),
        ));
    }

    match &option.public_pem {
        Some(pem) => {
            validate_public_pem(pem)
                .map_err(|e| RegistryError::InvalidRequest(format!("invalid public key: {e}")))?;
            Ok((
                Some(pem.clone()),
                Some(KeyResult {
                    public_pem: pem.clone(),
                    private_pem: None,
                    generated: false,
                }),
            ))
        }
        None => Err(RegistryError::InvalidRequest(
            "key option must either generate a key pair or provide a public PEM".to_string(),
        )),
    }
}
