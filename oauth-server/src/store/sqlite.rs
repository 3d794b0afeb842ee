use super::{ExternalServiceStore, StoreError};
use crate::config::DatabaseConfig;
use crate::keys::ClientPublicKey;
use crate::models::{GrantType, OAuthClient, Permission};
use async_trait::async_trait;
use log::{debug, info};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::str::FromStr;

const SCHEMA: [&str; 3] = [
    "CREATE TABLE IF NOT EXISTS oauth_client (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE,
        client_id TEXT NOT NULL UNIQUE,
        secret TEXT NOT NULL,
        grant_types TEXT NOT NULL DEFAULT '',
        audiences TEXT NOT NULL DEFAULT '',
        service_account_id INTEGER NOT NULL DEFAULT 0,
        public_pem TEXT,
        redirect_uri TEXT
    )",
    "CREATE TABLE IF NOT EXISTS oauth_impersonate_permission (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        client_id TEXT NOT NULL,
        action TEXT NOT NULL,
        scope TEXT NOT NULL DEFAULT ''
    )",
    "CREATE INDEX IF NOT EXISTS idx_oauth_impersonate_permission_client_id
        ON oauth_impersonate_permission (client_id)",
];

const SELECT_CLIENT: &str = "SELECT id, name, client_id, secret, grant_types, audiences, \
     service_account_id, public_pem, redirect_uri FROM oauth_client";

type ClientRow = (
    i64,
    String,
    String,
    String,
    String,
    String,
    i64,
    Option<String>,
    Option<String>,
);

/// SQLite backed [`ExternalServiceStore`]
#[derive(Clone)]
pub struct SqlStore {
    pool: SqlitePool,
}

impl SqlStore {
    /// Connects to the configured database and makes sure the schema exists
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(&config.url)?.create_if_missing(true);

        // Every connection to `:memory:` opens its own empty database
        let in_memory = config.url.contains(":memory:");
        let mut pool_options = SqlitePoolOptions::new();
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(config.max_connections)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store.ensure_schema().await?;
        info!("Connected to external service database at {}", config.url);
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn load_permissions(&self, client_id: &str) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String)>(
            "SELECT action, scope FROM oauth_impersonate_permission WHERE client_id = ? ORDER BY id",
        )
        .bind(client_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(action, scope)| Permission::new(action, scope))
            .collect())
    }

    async fn hydrate(&self, row: Option<ClientRow>, key: &str) -> Result<OAuthClient, StoreError> {
        let row = row.ok_or_else(|| StoreError::NotFound(key.to_string()))?;
        let mut client = client_from_row(row)?;
        client.impersonate_permissions = self.load_permissions(&client.client_id).await?;
        Ok(client)
    }
}

fn client_from_row(row: ClientRow) -> Result<OAuthClient, StoreError> {
    let (
        id,
        name,
        client_id,
        secret,
        grant_types,
        audiences,
        service_account_id,
        public_pem,
        redirect_uri,
    ) = row;
    let grant_types = split_list(&grant_types)
        .into_iter()
        .map(|g| {
            GrantType::parse(&g)
                .ok_or_else(|| StoreError::InvalidRecord(format!("unknown grant type '{g}'")))
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(OAuthClient {
        id,
        name,
        client_id,
        secret,
        grant_types,
        audiences: split_list(&audiences),
        redirect_uri: redirect_uri.filter(|uri| !uri.is_empty()),
        public_pem: public_pem.filter(|pem| !pem.is_empty()),
        service_account_id,
        impersonate_permissions: Vec::new(),
    })
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn join_grant_types(grant_types: &[GrantType]) -> String {
    grant_types
        .iter()
        .map(GrantType::as_str)
        .collect::<Vec<_>>()
        .join(",")
}

fn conflict_or(err: sqlx::Error, client: &OAuthClient) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Conflict(client.name.clone())
        }
        _ => StoreError::Database(err),
    }
}

async fn insert_client(
    tx: &mut Transaction<'_, Sqlite>,
    client: &OAuthClient,
) -> Result<i64, StoreError> {
    let result = sqlx::query(
        "INSERT INTO oauth_client (name, client_id, secret, grant_types, audiences, \
         service_account_id, public_pem, redirect_uri) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&client.name)
    .bind(&client.client_id)
    .bind(&client.secret)
    .bind(join_grant_types(&client.grant_types))
    .bind(client.audiences.join(","))
    .bind(client.service_account_id)
    .bind(&client.public_pem)
    .bind(&client.redirect_uri)
    .execute(&mut **tx)
    .await
    .map_err(|e| conflict_or(e, client))?;
    Ok(result.last_insert_rowid())
}

async fn insert_permissions(
    tx: &mut Transaction<'_, Sqlite>,
    client_id: &str,
    permissions: &[Permission],
) -> Result<(), StoreError> {
    for permission in permissions {
        sqlx::query(
            "INSERT INTO oauth_impersonate_permission (client_id, action, scope) VALUES (?, ?, ?)",
        )
        .bind(client_id)
        .bind(&permission.action)
        .bind(&permission.scope)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

#[async_trait]
impl ExternalServiceStore for SqlStore {
    async fn register_external_service(
        &self,
        client: &OAuthClient,
    ) -> Result<OAuthClient, StoreError> {
        let mut tx = self.pool.begin().await?;
        let id = insert_client(&mut tx, client).await?;
        insert_permissions(&mut tx, &client.client_id, &client.impersonate_permissions).await?;
        tx.commit().await?;

        debug!("Registered external service {} (client_id={})", client.name, client.client_id);
        Ok(OAuthClient {
            id,
            ..client.clone()
        })
    }

    async fn save_external_service(
        &self,
        client: &OAuthClient,
    ) -> Result<OAuthClient, StoreError> {
        let mut tx = self.pool.begin().await?;
        let existing = sqlx::query_as::<_, (i64, String, String)>(
            "SELECT id, client_id, secret FROM oauth_client WHERE name = ?",
        )
        .bind(&client.name)
        .fetch_optional(&mut *tx)
        .await?;

        // Credentials handed out at creation stay valid across updates
        let saved = match existing {
            None => {
                let id = insert_client(&mut tx, client).await?;
                OAuthClient {
                    id,
                    ..client.clone()
                }
            }
            Some((id, client_id, secret)) => {
                sqlx::query("DELETE FROM oauth_impersonate_permission WHERE client_id = ?")
                    .bind(&client_id)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query(
                    "UPDATE oauth_client SET grant_types = ?, audiences = ?, \
                     service_account_id = ?, public_pem = ?, redirect_uri = ? WHERE id = ?",
                )
                .bind(join_grant_types(&client.grant_types))
                .bind(client.audiences.join(","))
                .bind(client.service_account_id)
                .bind(&client.public_pem)
                .bind(&client.redirect_uri)
                .bind(id)
                .execute(&mut *tx)
                .await?;
                OAuthClient {
                    id,
                    client_id,
                    secret,
                    ..client.clone()
                }
            }
        };
        insert_permissions(&mut tx, &saved.client_id, &saved.impersonate_permissions).await?;
        tx.commit().await?;

        debug!("Saved external service {} (client_id={})", saved.name, saved.client_id);
        Ok(saved)
    }

    async fn get_external_service(&self, client_id: &str) -> Result<OAuthClient, StoreError> {
        let row = sqlx::query_as::<_, ClientRow>(&format!("{SELECT_CLIENT} WHERE client_id = ?"))
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row, client_id).await
    }

    async fn get_external_service_by_name(&self, name: &str) -> Result<OAuthClient, StoreError> {
        let row = sqlx::query_as::<_, ClientRow>(&format!("{SELECT_CLIENT} WHERE name = ?"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        self.hydrate(row, name).await
    }

    async fn get_external_service_public_key(
        &self,
        client_id: &str,
    ) -> Result<ClientPublicKey, StoreError> {
        let row = sqlx::query_as::<_, (Option<String>,)>(
            "SELECT public_pem FROM oauth_client WHERE client_id = ?",
        )
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some((Some(pem),)) if !pem.is_empty() => Ok(ClientPublicKey::from_pem(&pem)?),
            Some(_) => Err(StoreError::NotFound(format!(
                "no public key registered for {client_id}"
            ))),
            None => Err(StoreError::NotFound(client_id.to_string())),
        }
    }

    async fn get_external_service_names(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query_as::<_, (String,)>("SELECT name FROM oauth_client ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn delete_external_service(&self, client_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM oauth_impersonate_permission WHERE client_id = ?")
            .bind(client_id)
            .execute(&mut *tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM oauth_client WHERE client_id = ?")
            .bind(client_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if deleted == 0 {
            return Err(StoreError::NotFound(client_id.to_string()));
        }
        tx.commit().await?;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), String> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| format!("Database health check failed: {e}"))
    }
}
