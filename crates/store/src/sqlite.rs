//! SQLite backend for messages, profiles and accounts.
//!
//! Uses a single SQLite database file with three tables:
//! - `messages`: chat message rows keyed by owner
//! - `profiles`: one row per identity
//! - `accounts`: email/password credentials for the local auth service
//!
//! Timestamps are stored as fixed-width RFC 3339 strings (microseconds, `Z`)
//! so that text ordering equals time ordering.

use std::collections::BTreeMap;
use std::str::FromStr;

use async_trait::async_trait;
use chatdeck_core::auth::{AuthService, AuthStateChange, AuthUser, Session};
use chatdeck_core::error::{AuthError, StoreError};
use chatdeck_core::identity::{NewProfile, Profile, UserId};
use chatdeck_core::store::{MessageRecordStore, MessageRow, NewMessageRow, ProfileStore};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

use crate::auth::{SessionSlot, hash_password, normalize_email, validate_credentials};

/// A SQLite-backed record store and auth service.
pub struct SqliteStore {
    pool: SqlitePool,
    session: SessionSlot,
}

impl SqliteStore {
    /// Open (or create) a database at `path`.
    ///
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| StoreError::Unavailable(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // Every connection to an in-memory database sees its own database
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self::from_pool(pool).await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool (useful for testing).
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self {
            pool,
            session: SessionSlot::new(),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run schema migrations: creates tables and indexes.
    async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements = [
            (
                "messages table",
                r#"
                CREATE TABLE IF NOT EXISTS messages (
                    iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                    id           TEXT UNIQUE NOT NULL,
                    user_id      TEXT NOT NULL,
                    content      TEXT NOT NULL,
                    type         TEXT NOT NULL,
                    attachments  TEXT NOT NULL DEFAULT '[]',
                    is_streaming INTEGER,
                    created_at   TEXT NOT NULL
                )
                "#,
            ),
            (
                "messages owner index",
                "CREATE INDEX IF NOT EXISTS idx_messages_owner_created ON messages(user_id, created_at)",
            ),
            (
                "profiles table",
                r#"
                CREATE TABLE IF NOT EXISTS profiles (
                    id           TEXT PRIMARY KEY,
                    auth_id      TEXT UNIQUE NOT NULL,
                    email        TEXT NOT NULL,
                    display_name TEXT,
                    avatar_url   TEXT,
                    settings     TEXT NOT NULL DEFAULT '{}',
                    api_keys     TEXT NOT NULL DEFAULT '{}',
                    created_at   TEXT NOT NULL,
                    updated_at   TEXT NOT NULL
                )
                "#,
            ),
            (
                "accounts table",
                r#"
                CREATE TABLE IF NOT EXISTS accounts (
                    id            TEXT PRIMARY KEY,
                    email         TEXT UNIQUE NOT NULL,
                    salt          TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    created_at    TEXT NOT NULL
                )
                "#,
            ),
        ];

        for (label, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Unavailable(format!("Migration failed ({label}): {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn format_ts(ts: &DateTime<Utc>) -> String {
        ts.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn parse_ts(raw: &str, column: &str) -> Result<DateTime<Utc>, StoreError> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| StoreError::Malformed(format!("{column}: {e}")))
    }

    /// Parse a `MessageRow` from a SQLite row.
    fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<MessageRow, StoreError> {
        let get = |column: &str| -> Result<String, StoreError> {
            row.try_get::<String, _>(column)
                .map_err(|e| StoreError::Malformed(format!("{column} column: {e}")))
        };

        let attachments_json = get("attachments")?;
        let attachments = serde_json::from_str(&attachments_json)
            .unwrap_or_else(|_| serde_json::Value::Array(vec![]));
        let is_streaming: Option<bool> = row
            .try_get("is_streaming")
            .map_err(|e| StoreError::Malformed(format!("is_streaming column: {e}")))?;

        Ok(MessageRow {
            id: get("id")?,
            user_id: UserId(get("user_id")?),
            content: get("content")?,
            kind: get("type")?,
            attachments,
            is_streaming,
            created_at: Self::parse_ts(&get("created_at")?, "created_at")?,
        })
    }

    fn row_to_profile(row: &sqlx::sqlite::SqliteRow) -> Result<Profile, StoreError> {
        let get = |column: &str| -> Result<String, StoreError> {
            row.try_get::<String, _>(column)
                .map_err(|e| StoreError::Malformed(format!("{column} column: {e}")))
        };
        let get_opt = |column: &str| -> Result<Option<String>, StoreError> {
            row.try_get::<Option<String>, _>(column)
                .map_err(|e| StoreError::Malformed(format!("{column} column: {e}")))
        };

        let settings = serde_json::from_str(&get("settings")?).unwrap_or_default();
        let api_keys: BTreeMap<String, String> =
            serde_json::from_str(&get("api_keys")?).unwrap_or_default();

        Ok(Profile {
            id: get("id")?,
            auth_id: UserId(get("auth_id")?),
            email: get("email")?,
            display_name: get_opt("display_name")?,
            avatar_url: get_opt("avatar_url")?,
            settings,
            api_keys,
            created_at: Self::parse_ts(&get("created_at")?, "created_at")?,
            updated_at: Self::parse_ts(&get("updated_at")?, "updated_at")?,
        })
    }

    async fn insert_account(&self, email: &str, password: &str) -> Result<AuthUser, AuthError> {
        validate_credentials(email, password)?;
        let email = normalize_email(email);
        let salt = Uuid::new_v4().to_string();
        let user = AuthUser {
            id: UserId(Uuid::new_v4().to_string()),
            email: email.clone(),
            display_name: None,
            avatar_url: None,
        };

        let result = sqlx::query(
            "INSERT INTO accounts (id, email, salt, password_hash, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(user.id.as_str())
        .bind(&email)
        .bind(&salt)
        .bind(hash_password(&salt, password))
        .bind(Self::format_ts(&Utc::now()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {
                info!(user_id = %user.id, "Account registered");
                Ok(user)
            }
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AuthError::AlreadyRegistered(email))
            }
            Err(e) => Err(AuthError::Unavailable(format!("account insert failed: {e}"))),
        }
    }
}

#[async_trait]
impl MessageRecordStore for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn insert_message(&self, row: NewMessageRow) -> Result<MessageRow, StoreError> {
        let id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let attachments = serde_json::to_string(&row.attachments)
            .map_err(|e| StoreError::Malformed(format!("Attachments serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO messages (id, user_id, content, type, attachments, is_streaming, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&id)
        .bind(row.user_id.as_str())
        .bind(&row.content)
        .bind(&row.kind)
        .bind(&attachments)
        .bind(row.is_streaming)
        .bind(Self::format_ts(&created_at))
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("INSERT failed: {e}")))?;

        debug!(message_id = %id, "Stored message row");

        let stored = sqlx::query("SELECT * FROM messages WHERE id = ?1")
            .bind(&id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Read-back failed: {e}")))?;
        Self::row_to_message(&stored)
    }

    async fn select_messages(&self, owner: &UserId) -> Result<Vec<MessageRow>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM messages WHERE user_id = ?1 ORDER BY created_at ASC, iid ASC",
        )
        .bind(owner.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("SELECT failed: {e}")))?;

        rows.iter().map(Self::row_to_message).collect()
    }

    async fn update_streaming(&self, id: &str, streaming: bool) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE messages SET is_streaming = ?1 WHERE id = ?2")
            .bind(streaming)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("UPDATE failed: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileStore for SqliteStore {
    async fn get_profile(&self, owner: &UserId) -> Result<Option<Profile>, StoreError> {
        let row = sqlx::query("SELECT * FROM profiles WHERE auth_id = ?1")
            .bind(owner.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Unavailable(format!("Profile lookup failed: {e}")))?;

        row.as_ref().map(Self::row_to_profile).transpose()
    }

    async fn create_profile(&self, profile: NewProfile) -> Result<Profile, StoreError> {
        let now = Self::format_ts(&Utc::now());
        let settings = serde_json::to_string(&profile.settings)
            .map_err(|e| StoreError::Malformed(format!("Settings serialization: {e}")))?;
        let api_keys = serde_json::to_string(&profile.api_keys)
            .map_err(|e| StoreError::Malformed(format!("Secrets serialization: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO profiles (id, auth_id, email, display_name, avatar_url, settings, api_keys, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(auth_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(profile.auth_id.as_str())
        .bind(&profile.email)
        .bind(&profile.display_name)
        .bind(&profile.avatar_url)
        .bind(&settings)
        .bind(&api_keys)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Profile insert failed: {e}")))?;

        self.get_profile(&profile.auth_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(profile.auth_id.to_string()))
    }
}

#[async_trait]
impl AuthService for SqliteStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn get_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.session.current().await)
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthStateChange> {
        self.session.subscribe()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let email = normalize_email(email);
        let row = sqlx::query("SELECT id, salt, password_hash FROM accounts WHERE email = ?1")
            .bind(&email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| AuthError::Unavailable(format!("account lookup failed: {e}")))?
            .ok_or(AuthError::InvalidCredentials)?;

        let field = |column: &str| -> Result<String, AuthError> {
            row.try_get::<String, _>(column)
                .map_err(|e| AuthError::Unavailable(format!("{column} column: {e}")))
        };
        if hash_password(&field("salt")?, password) != field("password_hash")? {
            return Err(AuthError::InvalidCredentials);
        }

        self.session
            .open(AuthUser {
                id: UserId(field("id")?),
                email,
                display_name: None,
                avatar_url: None,
            })
            .await;
        Ok(())
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<(), AuthError> {
        let user = self.insert_account(email, password).await?;
        self.session.open(user).await;
        Ok(())
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.session.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatdeck_core::identity::Identity;

    async fn test_store() -> SqliteStore {
        SqliteStore::new("sqlite::memory:").await.unwrap()
    }

    fn new_row(owner: &str, content: &str, streaming: bool) -> NewMessageRow {
        NewMessageRow {
            user_id: UserId::from(owner),
            content: content.into(),
            kind: if streaming { "assistant" } else { "user" }.into(),
            attachments: serde_json::json!([{"id": "a1", "name": "notes.pdf", "type": "file", "url": "blob:local/a1", "size": 10}]),
            is_streaming: streaming,
        }
    }

    #[tokio::test]
    async fn insert_and_select_in_order() {
        let store = test_store().await;
        let first = store.insert_message(new_row("u1", "first", false)).await.unwrap();
        store.insert_message(new_row("u2", "elsewhere", false)).await.unwrap();
        let second = store.insert_message(new_row("u1", "second", true)).await.unwrap();

        let rows = store.select_messages(&UserId::from("u1")).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, first.id);
        assert_eq!(rows[1].id, second.id);
        assert_eq!(rows[1].is_streaming, Some(true));
        assert_eq!(rows[0].attachments[0]["name"], "notes.pdf");
    }

    #[tokio::test]
    async fn update_streaming_patches_flag() {
        let store = test_store().await;
        let stored = store.insert_message(new_row("u1", "reply", true)).await.unwrap();

        store.update_streaming(&stored.id, false).await.unwrap();
        store.update_streaming(&stored.id, false).await.unwrap();

        let rows = store.select_messages(&UserId::from("u1")).await.unwrap();
        assert_eq!(rows[0].is_streaming, Some(false));
    }

    #[tokio::test]
    async fn update_missing_row_is_not_found() {
        let store = test_store().await;
        assert!(matches!(
            store.update_streaming("nope", false).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn profile_roundtrip_with_defaults() {
        let store = test_store().await;
        let identity = Identity {
            id: UserId::from("u1"),
            email: "u1@example.com".into(),
        };
        assert!(store.get_profile(&identity.id).await.unwrap().is_none());

        let created = store
            .create_profile(NewProfile::for_identity(&identity, Some("Ada".into()), None))
            .await
            .unwrap();
        assert_eq!(created.display_name.as_deref(), Some("Ada"));
        assert!(created.api_keys.is_empty());

        let again = store
            .create_profile(NewProfile::for_identity(&identity, None, None))
            .await
            .unwrap();
        assert_eq!(again.id, created.id);
    }

    #[tokio::test]
    async fn accounts_sign_up_and_sign_in() {
        let store = test_store().await;
        store.sign_up("ada@example.com", "pw").await.unwrap();
        let first = store.get_session().await.unwrap().unwrap();

        store.sign_out().await.unwrap();
        assert!(store.get_session().await.unwrap().is_none());

        assert_eq!(
            store.sign_in("ada@example.com", "wrong").await,
            Err(AuthError::InvalidCredentials)
        );
        store.sign_in("ADA@example.com", "pw").await.unwrap();
        let second = store.get_session().await.unwrap().unwrap();
        assert_eq!(first.user.id, second.user.id);

        assert!(matches!(
            store.sign_up("ada@example.com", "pw").await,
            Err(AuthError::AlreadyRegistered(_))
        ));
    }

    #[tokio::test]
    async fn data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = format!("sqlite://{}", dir.path().join("chat.db").display());

        let owner = {
            let store = SqliteStore::new(&path).await.unwrap();
            store.sign_up("ada@example.com", "pw").await.unwrap();
            let owner = store.get_session().await.unwrap().unwrap().user.id;
            store
                .insert_message(NewMessageRow {
                    user_id: owner.clone(),
                    content: "persisted".into(),
                    kind: "user".into(),
                    attachments: serde_json::json!([]),
                    is_streaming: false,
                })
                .await
                .unwrap();
            owner
        };

        let store = SqliteStore::new(&path).await.unwrap();
        store.sign_in("ada@example.com", "pw").await.unwrap();
        let rows = store.select_messages(&owner).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].content, "persisted");
    }
}
