//! Postgres-backed RBAC store.
//!
//! Uniqueness lives in the schema: `(subject, action)` for permissions, `name`
//! for roles, and partial unique indexes over live users for `username` and
//! `email`. Upserts use `INSERT … ON CONFLICT DO NOTHING RETURNING` and fall
//! back to a lookup, so concurrent bootstraps converge on one record.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError |
//! |------------|----------------------|------------|
//! | Database (unique violation) | `23505` | `Conflict` |
//! | Database (other) | Any other | `Backend` |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Unavailable` |
//! | Other | N/A | `Backend` |

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Row};
use tracing::instrument;
use uuid::Uuid;

use hive_auth::{
    Permission, PermissionKey, PermissionStore, Role, RoleStore, StoreError, UpsertOutcome, User,
    UserStore,
};
use hive_core::{PermissionId, RoleId, Stamps, UserId};

use super::StoreConnection;

const DEFAULT_MAX_CONNECTIONS: u32 = 5;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS permissions (
        id UUID PRIMARY KEY,
        subject TEXT NOT NULL,
        action TEXT NOT NULL,
        display_name TEXT,
        UNIQUE (subject, action)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS roles (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        display_name TEXT,
        permissions UUID[] NOT NULL DEFAULT '{}'
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id UUID PRIMARY KEY,
        username TEXT NOT NULL,
        password_hash TEXT,
        email TEXT,
        roles UUID[] NOT NULL DEFAULT '{}',
        blocked BOOLEAN NOT NULL DEFAULT FALSE,
        deleted BOOLEAN NOT NULL DEFAULT FALSE,
        created_at TIMESTAMPTZ,
        updated_at TIMESTAMPTZ
    )
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS users_live_username
        ON users (username) WHERE NOT deleted
    "#,
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS users_live_email
        ON users (email) WHERE NOT deleted AND email IS NOT NULL
    "#,
];

/// Postgres-backed store. Cloning shares the pool.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `url` and make sure the schema exists.
    #[instrument(skip(url), err)]
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(DEFAULT_MAX_CONNECTIONS)
            .connect(url)
            .await
            .map_err(|e| StoreError::Unavailable(format!("postgres connect failed: {e}")))?;

        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create tables and indexes. Safe to run from every process.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| map_sqlx_error("migrate", e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for PostgresStore {
    async fn find_permission(&self, id: &PermissionId) -> Result<Option<Permission>, StoreError> {
        let row = sqlx::query(
            "SELECT id, subject, action, display_name FROM permissions WHERE id = $1",
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_permission", e))?;

        row.map(|r| decode::<PermissionRow>(&r).map(Permission::from))
            .transpose()
    }

    async fn find_permission_by_key(&self, key: &PermissionKey) -> Result<Option<Permission>, StoreError> {
        let row = sqlx::query(
            "SELECT id, subject, action, display_name FROM permissions WHERE subject = $1 AND action = $2",
        )
        .bind(key.subject())
        .bind(key.action())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("find_permission_by_key", e))?;

        row.map(|r| decode::<PermissionRow>(&r).map(Permission::from))
            .transpose()
    }

    #[instrument(skip(self, permission), fields(subject = %permission.subject, action = %permission.action), err)]
    async fn upsert_permission(&self, permission: Permission) -> Result<UpsertOutcome<Permission>, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO permissions (id, subject, action, display_name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (subject, action) DO NOTHING
            RETURNING id, subject, action, display_name
            "#,
        )
        .bind(permission.id.as_uuid())
        .bind(&permission.subject)
        .bind(&permission.action)
        .bind(&permission.display_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_permission", e))?;

        if let Some(row) = inserted {
            return Ok(UpsertOutcome::Created(decode::<PermissionRow>(&row)?.into()));
        }

        self.find_permission_by_key(&permission.key())
            .await?
            .map(UpsertOutcome::Existing)
            .ok_or_else(|| StoreError::Backend("permission vanished during upsert".to_string()))
    }

    async fn list_permissions(&self) -> Result<Vec<Permission>, StoreError> {
        let rows = sqlx::query("SELECT id, subject, action, display_name FROM permissions ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_permissions", e))?;

        rows.iter()
            .map(|r| decode::<PermissionRow>(r).map(Permission::from))
            .collect()
    }
}

#[async_trait]
impl RoleStore for PostgresStore {
    async fn find_role(&self, id: &RoleId) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query("SELECT id, name, display_name, permissions FROM roles WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role", e))?;

        row.map(|r| decode::<RoleRow>(&r).map(Role::from)).transpose()
    }

    async fn find_role_by_name(&self, name: &str) -> Result<Option<Role>, StoreError> {
        let row = sqlx::query("SELECT id, name, display_name, permissions FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_role_by_name", e))?;

        row.map(|r| decode::<RoleRow>(&r).map(Role::from)).transpose()
    }

    #[instrument(skip(self, role), fields(role = %role.name), err)]
    async fn upsert_role(&self, role: Role) -> Result<UpsertOutcome<Role>, StoreError> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO roles (id, name, display_name, permissions)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (name) DO NOTHING
            RETURNING id, name, display_name, permissions
            "#,
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.display_name)
        .bind(permission_uuids(&role.permissions))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("upsert_role", e))?;

        if let Some(row) = inserted {
            return Ok(UpsertOutcome::Created(decode::<RoleRow>(&row)?.into()));
        }

        self.find_role_by_name(&role.name)
            .await?
            .map(UpsertOutcome::Existing)
            .ok_or_else(|| StoreError::Backend("role vanished during upsert".to_string()))
    }

    #[instrument(skip(self, role), fields(role = %role.name), err)]
    async fn save_role(&self, role: Role) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE roles SET name = $2, display_name = $3, permissions = $4 WHERE id = $1",
        )
        .bind(role.id.as_uuid())
        .bind(&role.name)
        .bind(&role.display_name)
        .bind(permission_uuids(&role.permissions))
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_role", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("role {}", role.id)));
        }
        Ok(())
    }

    async fn list_roles(&self) -> Result<Vec<Role>, StoreError> {
        let rows = sqlx::query("SELECT id, name, display_name, permissions FROM roles ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_roles", e))?;

        rows.iter().map(|r| decode::<RoleRow>(r).map(Role::from)).collect()
    }
}

const USER_COLUMNS: &str =
    "id, username, password_hash, email, roles, blocked, deleted, created_at, updated_at";

#[async_trait]
impl UserStore for PostgresStore {
    async fn find_user(&self, id: &UserId) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_user", e))?;

        row.map(|r| decode::<UserRow>(&r).map(User::from)).transpose()
    }

    async fn find_live_user(&self, username: &str) -> Result<Option<User>, StoreError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1 AND NOT deleted");
        let row = sqlx::query(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("find_live_user", e))?;

        row.map(|r| decode::<UserRow>(&r).map(User::from)).transpose()
    }

    #[instrument(skip(self, user), fields(username = %user.username), err)]
    async fn upsert_user(&self, user: User) -> Result<UpsertOutcome<User>, StoreError> {
        let sql = format!(
            r#"
            INSERT INTO users ({USER_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (username) WHERE NOT deleted DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        );
        let inserted = bind_user(sqlx::query(&sql), &user)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("upsert_user", e))?;

        if let Some(row) = inserted {
            return Ok(UpsertOutcome::Created(decode::<UserRow>(&row)?.into()));
        }

        self.find_live_user(&user.username)
            .await?
            .map(UpsertOutcome::Existing)
            .ok_or_else(|| StoreError::Backend("user vanished during upsert".to_string()))
    }

    #[instrument(skip(self, user), fields(username = %user.username), err)]
    async fn save_user(&self, user: User) -> Result<(), StoreError> {
        let result = bind_user(
            sqlx::query(
                r#"
                UPDATE users SET
                    username = $2,
                    password_hash = $3,
                    email = $4,
                    roles = $5,
                    blocked = $6,
                    deleted = $7,
                    created_at = $8,
                    updated_at = $9
                WHERE id = $1
                "#,
            ),
            &user,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("save_user", e))?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {}", user.id)));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreConnection for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.pool.close().await;
        Ok(())
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

fn bind_user<'q>(query: PgQuery<'q>, user: &'q User) -> PgQuery<'q> {
    query
        .bind(user.id.as_uuid())
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.email)
        .bind(user.roles.iter().map(|r| *r.as_uuid()).collect::<Vec<Uuid>>())
        .bind(user.blocked)
        .bind(user.stamps.deleted)
        .bind(user.stamps.created_at)
        .bind(user.stamps.updated_at)
}

fn permission_uuids(ids: &[PermissionId]) -> Vec<Uuid> {
    ids.iter().map(|id| *id.as_uuid()).collect()
}

fn decode<T>(row: &PgRow) -> Result<T, StoreError>
where
    T: for<'r> FromRow<'r, PgRow>,
{
    T::from_row(row).map_err(|e| StoreError::Backend(format!("failed to decode row: {e}")))
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut => {
            StoreError::Unavailable(format!("connection pool unavailable in {operation}"))
        }
        sqlx::Error::Io(e) => StoreError::Unavailable(format!("io error in {operation}: {e}")),
        other => StoreError::Backend(format!("sqlx error in {operation}: {other}")),
    }
}

struct PermissionRow {
    id: Uuid,
    subject: String,
    action: String,
    display_name: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for PermissionRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PermissionRow {
            id: row.try_get("id")?,
            subject: row.try_get("subject")?,
            action: row.try_get("action")?,
            display_name: row.try_get("display_name")?,
        })
    }
}

impl From<PermissionRow> for Permission {
    fn from(row: PermissionRow) -> Self {
        Permission {
            id: PermissionId::from_uuid(row.id),
            subject: row.subject,
            action: row.action,
            display_name: row.display_name,
        }
    }
}

struct RoleRow {
    id: Uuid,
    name: String,
    display_name: Option<String>,
    permissions: Vec<Uuid>,
}

impl<'r> FromRow<'r, PgRow> for RoleRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(RoleRow {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            display_name: row.try_get("display_name")?,
            permissions: row.try_get("permissions")?,
        })
    }
}

impl From<RoleRow> for Role {
    fn from(row: RoleRow) -> Self {
        Role {
            id: RoleId::from_uuid(row.id),
            name: row.name,
            display_name: row.display_name,
            permissions: row.permissions.into_iter().map(PermissionId::from_uuid).collect(),
        }
    }
}

struct UserRow {
    id: Uuid,
    username: String,
    password_hash: Option<String>,
    email: Option<String>,
    roles: Vec<Uuid>,
    blocked: bool,
    deleted: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for UserRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(UserRow {
            id: row.try_get("id")?,
            username: row.try_get("username")?,
            password_hash: row.try_get("password_hash")?,
            email: row.try_get("email")?,
            roles: row.try_get("roles")?,
            blocked: row.try_get("blocked")?,
            deleted: row.try_get("deleted")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: UserId::from_uuid(row.id),
            username: row.username,
            password_hash: row.password_hash,
            email: row.email,
            roles: row.roles.into_iter().map(RoleId::from_uuid).collect(),
            blocked: row.blocked,
            stamps: Stamps {
                created_at: row.created_at,
                updated_at: row.updated_at,
                deleted: row.deleted,
            },
        }
    }
}
