use sqlx::sqlite::SqlitePool;

use crate::auth::{IdentityLookup, RequestIdentity};
use crate::reset::{ResetRecord, ResetStore};

#[derive(Clone)]
pub struct UserStore {
    pool: SqlitePool,
}

/// User role for authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "admin" => UserRole::Admin,
            _ => UserRole::User,
        }
    }
}

#[derive(Clone)]
pub struct User {
    pub id: i64,
    pub uuid: String,
    pub name: String,
    pub email: String,
    pub password_hash: String,
    pub role: UserRole,
    pub verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("id", &self.id)
            .field("uuid", &self.uuid)
            .field("email", &self.email)
            .field("role", &self.role)
            .field("verified", &self.verified)
            .finish_non_exhaustive()
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    uuid: String,
    name: String,
    email: String,
    password_hash: String,
    role: String,
    verified: i32,
    created_at: String,
    updated_at: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            name: row.name,
            email: row.email,
            password_hash: row.password_hash,
            role: UserRole::from_str(&row.role),
            verified: row.verified != 0,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ResetRow {
    email: String,
    reset_token: String,
    reset_expires_at: i64,
}

impl From<ResetRow> for ResetRecord {
    fn from(row: ResetRow) -> Self {
        Self {
            email: row.email,
            reset_secret: row.reset_token,
            expires_at: u64::try_from(row.reset_expires_at).unwrap_or(0),
        }
    }
}

const USER_COLUMNS: &str =
    "id, uuid, name, email, password_hash, role, verified, created_at, updated_at";

/// Stored timestamps are Unix seconds in an INTEGER column.
fn to_db_time(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX)
}

impl UserStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new unverified user. Returns the user ID.
    pub async fn create(
        &self,
        uuid: &str,
        name: &str,
        email: &str,
        password_hash: &str,
        verification_code: &str,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO users (uuid, name, email, password_hash, verification_code) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(uuid)
        .bind(name)
        .bind(email)
        .bind(password_hash)
        .bind(verification_code)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get a user by email (case-insensitive).
    pub async fn get_by_email(&self, email: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "SELECT {} FROM users WHERE email = ?",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE id = ?", USER_COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    /// Get a user by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<User>, sqlx::Error> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {} FROM users WHERE uuid = ?", USER_COLUMNS))
                .bind(uuid)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(User::from))
    }

    pub async fn is_email_taken(&self, email: &str) -> Result<bool, sqlx::Error> {
        let count: (i32,) = sqlx::query_as("SELECT COUNT(*) FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0 > 0)
    }

    /// Mark the user owning this verification code as verified.
    /// The code is single use. Returns false if no unverified user holds it.
    pub async fn verify(&self, verification_code: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET verified = 1, verification_code = NULL, updated_at = datetime('now')
             WHERE verification_code = ? AND verified = 0",
        )
        .bind(verification_code)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Set the role for a user.
    pub async fn set_role(&self, id: i64, role: UserRole) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a user by ID.
    pub async fn delete(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Clear reset records that expired before `before`. Returns how many were cleared.
    pub async fn clear_expired_resets(&self, before: u64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users SET reset_token = NULL, reset_expires_at = NULL
             WHERE reset_token IS NOT NULL AND reset_expires_at < ?",
        )
        .bind(to_db_time(before))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

impl IdentityLookup for UserStore {
    async fn get_identity_by_id(
        &self,
        subject_id: &str,
    ) -> Result<Option<RequestIdentity>, sqlx::Error> {
        let user = self.get_by_uuid(subject_id).await?;
        Ok(user.map(|u| RequestIdentity {
            subject_id: u.uuid,
            role: u.role,
        }))
    }
}

impl ResetStore for UserStore {
    async fn put_reset(
        &self,
        email: &str,
        reset_secret: &str,
        expires_at: u64,
    ) -> Result<bool, sqlx::Error> {
        let result =
            sqlx::query("UPDATE users SET reset_token = ?, reset_expires_at = ? WHERE email = ?")
                .bind(reset_secret)
                .bind(to_db_time(expires_at))
                .bind(email)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_reset(&self, reset_secret: &str) -> Result<Option<ResetRecord>, sqlx::Error> {
        let row: Option<ResetRow> = sqlx::query_as(
            "SELECT email, reset_token, reset_expires_at FROM users
             WHERE reset_token = ? AND reset_expires_at IS NOT NULL",
        )
        .bind(reset_secret)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ResetRecord::from))
    }

    async fn clear_reset(&self, email: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE users SET reset_token = NULL, reset_expires_at = NULL WHERE email = ?")
            .bind(email)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn replace_password_and_clear(
        &self,
        reset_secret: &str,
        password_hash: &str,
        now: u64,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE users
             SET password_hash = ?, reset_token = NULL, reset_expires_at = NULL, updated_at = datetime('now')
             WHERE reset_token = ? AND reset_expires_at >= ?",
        )
        .bind(password_hash)
        .bind(reset_secret)
        .bind(to_db_time(now))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
