//! Platform credential storage
//!
//! A credential is the bearer token that lets Castline publish on behalf of
//! one user on one platform. Credentials are acquired by the platform
//! connection flow (OAuth) and written here; the publication pipeline only
//! ever reads them through [`CredentialStore`].
//!
//! # Architecture
//!
//! - `CredentialStore` trait: the read-only view the pipeline depends on
//! - `SqliteCredentialStore`: the `credentials` table, plus the writes the
//!   connection flow (and the `cast-creds` operator tool) performs
//!
//! Tokens are wrapped in [`SecretString`] so they never show up in `Debug`
//! output or log lines.
//!
//! # Example
//!
//! ```no_run
//! use libcastline::credentials::{CredentialStore, NewCredential, SqliteCredentialStore};
//! use libcastline::{Database, PlatformId};
//!
//! # async fn example() -> libcastline::Result<()> {
//! let db = Database::new("~/.local/share/castline/castline.db").await?;
//! let store = SqliteCredentialStore::new(db);
//!
//! store
//!     .upsert_credential(NewCredential::bearer("user-1", PlatformId::Twitter, "token"))
//!     .await?;
//!
//! let credential = store.find_active_credential("user-1", PlatformId::Twitter).await?;
//! assert!(credential.is_some());
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use secrecy::SecretString;
use serde::Serialize;
use sqlx::Row;
use std::str::FromStr;

use crate::db::Database;
use crate::error::{DbError, Result};
use crate::types::PlatformId;

/// An active access credential for one (user, platform) pair.
#[derive(Debug)]
pub struct Credential {
    pub user_id: String,
    pub platform: PlatformId,
    pub access_token: SecretString,
    pub refresh_token: Option<SecretString>,
    /// Unix seconds; informational, the platform decides whether it is still valid
    pub expires_at: Option<i64>,
    /// Platform-side account id (LinkedIn member id, Instagram business user id)
    pub external_account_id: Option<String>,
}

/// Read access to credentials, as seen by the publication pipeline.
///
/// Implementations must be safe to call concurrently for different
/// platforms of the same post.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find the active credential for `user_id` on `platform`.
    ///
    /// Returns `Ok(None)` when the user never connected the platform or the
    /// connection was deactivated. Expired credentials are still returned.
    async fn find_active_credential(
        &self,
        user_id: &str,
        platform: PlatformId,
    ) -> Result<Option<Credential>>;
}

/// Input for storing a credential from the connection flow.
#[derive(Debug)]
pub struct NewCredential {
    pub user_id: String,
    pub platform: PlatformId,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<i64>,
    pub external_account_id: Option<String>,
}

impl NewCredential {
    /// A bare access token with no refresh token, expiry or account id
    pub fn bearer(user_id: &str, platform: PlatformId, access_token: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            platform,
            access_token: access_token.to_string(),
            refresh_token: None,
            expires_at: None,
            external_account_id: None,
        }
    }

    pub fn with_account_id(mut self, account_id: &str) -> Self {
        self.external_account_id = Some(account_id.to_string());
        self
    }
}

/// Listing row; never carries token material.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CredentialSummary {
    pub platform: PlatformId,
    pub active: bool,
    pub expires_at: Option<i64>,
    pub external_account_id: Option<String>,
    pub updated_at: i64,
}

/// `credentials` table backed store
#[derive(Clone)]
pub struct SqliteCredentialStore {
    db: Database,
}

impl SqliteCredentialStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the credential for (user, platform) and mark it active.
    pub async fn upsert_credential(&self, credential: NewCredential) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO credentials (user_id, platform, access_token, refresh_token, expires_at,
                                     external_account_id, active, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 1, ?, ?)
            ON CONFLICT(user_id, platform) DO UPDATE SET
                access_token = excluded.access_token,
                refresh_token = excluded.refresh_token,
                expires_at = excluded.expires_at,
                external_account_id = excluded.external_account_id,
                active = 1,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&credential.user_id)
        .bind(credential.platform.as_str())
        .bind(&credential.access_token)
        .bind(&credential.refresh_token)
        .bind(credential.expires_at)
        .bind(&credential.external_account_id)
        .bind(now)
        .bind(now)
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        tracing::info!(
            user_id = %credential.user_id,
            platform = %credential.platform,
            "Stored platform credential"
        );
        Ok(())
    }

    /// Deactivate without deleting; returns false if nothing was stored.
    pub async fn deactivate_credential(&self, user_id: &str, platform: PlatformId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE credentials SET active = 0, updated_at = ? WHERE user_id = ? AND platform = ?",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(user_id)
        .bind(platform.as_str())
        .execute(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    pub async fn list_credentials(&self, user_id: &str) -> Result<Vec<CredentialSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT platform, active, expires_at, external_account_id, updated_at
            FROM credentials
            WHERE user_id = ?
            ORDER BY platform
            "#,
        )
        .bind(user_id)
        .fetch_all(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        rows.iter()
            .map(|r| {
                Ok(CredentialSummary {
                    platform: PlatformId::from_str(&r.get::<String, _>("platform"))?,
                    active: r.get("active"),
                    expires_at: r.get("expires_at"),
                    external_account_id: r.get("external_account_id"),
                    updated_at: r.get("updated_at"),
                })
            })
            .collect()
    }
}

#[async_trait]
impl CredentialStore for SqliteCredentialStore {
    async fn find_active_credential(
        &self,
        user_id: &str,
        platform: PlatformId,
    ) -> Result<Option<Credential>> {
        let row = sqlx::query(
            r#"
            SELECT access_token, refresh_token, expires_at, external_account_id
            FROM credentials
            WHERE user_id = ? AND platform = ? AND active = 1
            "#,
        )
        .bind(user_id)
        .bind(platform.as_str())
        .fetch_optional(self.db.pool())
        .await
        .map_err(DbError::SqlxError)?;

        Ok(row.map(|r| Credential {
            user_id: user_id.to_string(),
            platform,
            access_token: SecretString::from(r.get::<String, _>("access_token")),
            refresh_token: r
                .get::<Option<String>, _>("refresh_token")
                .map(SecretString::from),
            expires_at: r.get("expires_at"),
            external_account_id: r.get("external_account_id"),
        }))
    }
}
