//! User repository contract and SQLite implementation.
//!
//! # Invariants
//! - Write paths call `User::validate()` before SQL mutations.
//! - `public_keys` and `key_pair` are stored as JSON text.

use super::{
    bool_to_int, ensure_connection_ready, from_epoch_ms, int_to_bool, to_epoch_ms, RepoError,
    RepoResult, SchemaRequirement,
};
use crate::db::run_atomic;
use crate::model::now_utc;
use crate::model::user::{SystemRole, User, UserKeyPair, UserPublicKey};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

const USER_SELECT_SQL: &str = "SELECT
    id,
    name,
    email,
    email_verified,
    key_pair,
    public_keys,
    role,
    created_at,
    updated_at
FROM users";

const REQUIRED_SCHEMA: &[SchemaRequirement] = &[(
    "users",
    &[
        "id",
        "name",
        "email",
        "email_verified",
        "key_pair",
        "public_keys",
        "role",
        "created_at",
        "updated_at",
    ],
)];

#[derive(Debug, Clone, Default)]
pub struct UserListQuery {
    pub role: Option<SystemRole>,
    pub limit: Option<u32>,
    pub offset: u32,
}

pub trait UserRepository {
    fn insert(&self, user: &User) -> RepoResult<()>;
    /// All-or-nothing insert of several users.
    fn insert_batch(&self, users: &[User]) -> RepoResult<usize>;
    fn update(&self, user: &User) -> RepoResult<()>;
    /// Deletes the user; their memberships go with them.
    fn delete(&self, id: &str) -> RepoResult<()>;
    fn get(&self, id: &str) -> RepoResult<Option<User>>;
    fn list(&self, query: &UserListQuery) -> RepoResult<Vec<User>>;
    fn count(&self) -> RepoResult<u64>;
}

pub struct SqliteUserRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteUserRepository<'conn> {
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        ensure_connection_ready(conn, REQUIRED_SCHEMA)?;
        Ok(Self { conn })
    }

    fn insert_one(&self, user: &User) -> RepoResult<()> {
        user.validate()?;
        self.conn.execute(
            "INSERT INTO users (
                id,
                name,
                email,
                email_verified,
                key_pair,
                public_keys,
                role,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
            params![
                user.id.as_str(),
                user.name.as_str(),
                user.email.as_str(),
                bool_to_int(user.email_verified),
                key_pair_to_db(user.key_pair.as_ref())?,
                public_keys_to_db(&user.public_keys)?,
                user.role.as_str(),
                to_epoch_ms(user.created_at),
                to_epoch_ms(user.updated_at),
            ],
        )?;
        Ok(())
    }
}

impl UserRepository for SqliteUserRepository<'_> {
    fn insert(&self, user: &User) -> RepoResult<()> {
        self.insert_one(user)
    }

    fn insert_batch(&self, users: &[User]) -> RepoResult<usize> {
        run_atomic(self.conn, || {
            for user in users {
                self.insert_one(user)?;
            }
            Ok(users.len())
        })
    }

    fn update(&self, user: &User) -> RepoResult<()> {
        user.validate()?;
        let changed = self.conn.execute(
            "UPDATE users
             SET
                name = ?1,
                email = ?2,
                email_verified = ?3,
                key_pair = ?4,
                public_keys = ?5,
                role = ?6,
                updated_at = ?7
             WHERE id = ?8;",
            params![
                user.name.as_str(),
                user.email.as_str(),
                bool_to_int(user.email_verified),
                key_pair_to_db(user.key_pair.as_ref())?,
                public_keys_to_db(&user.public_keys)?,
                user.role.as_str(),
                to_epoch_ms(now_utc()),
                user.id.as_str(),
            ],
        )?;

        if changed == 0 {
            return Err(RepoError::UserNotFound(user.id.clone()));
        }
        Ok(())
    }

    fn delete(&self, id: &str) -> RepoResult<()> {
        let changed = self.conn.execute("DELETE FROM users WHERE id = ?1;", [id])?;
        if changed == 0 {
            return Err(RepoError::UserNotFound(id.to_string()));
        }
        Ok(())
    }

    fn get(&self, id: &str) -> RepoResult<Option<User>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{USER_SELECT_SQL} WHERE id = ?1;"))?;
        let row = stmt
            .query_row([id], |row| Ok(read_raw_user(row)))
            .optional()?;
        row.transpose()
    }

    fn list(&self, query: &UserListQuery) -> RepoResult<Vec<User>> {
        let mut sql = format!("{USER_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if let Some(role) = query.role {
            sql.push_str(" AND role = ?");
            bind_values.push(Value::Text(role.as_str().to_string()));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut users = Vec::new();
        while let Some(row) = rows.next()? {
            users.push(read_raw_user(row)?);
        }
        Ok(users)
    }

    fn count(&self) -> RepoResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM users;", [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }
}

fn read_raw_user(row: &Row<'_>) -> RepoResult<User> {
    let role_text: String = row.get("role")?;
    let role = SystemRole::parse(&role_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid role `{role_text}` in users.role"))
    })?;

    let key_pair = match row.get::<_, Option<String>>("key_pair")? {
        Some(raw) => Some(serde_json::from_str::<UserKeyPair>(&raw).map_err(|err| {
            RepoError::InvalidData(format!("invalid JSON in users.key_pair: {err}"))
        })?),
        None => None,
    };

    let public_keys_raw: String = row.get("public_keys")?;
    let public_keys = serde_json::from_str::<Vec<UserPublicKey>>(&public_keys_raw)
        .map_err(|err| {
            RepoError::InvalidData(format!("invalid JSON in users.public_keys: {err}"))
        })?;

    let user = User {
        id: row.get("id")?,
        name: row.get("name")?,
        email: row.get("email")?,
        email_verified: int_to_bool(row.get("email_verified")?, "users.email_verified")?,
        key_pair,
        public_keys,
        role,
        created_at: from_epoch_ms(row.get("created_at")?, "users.created_at")?,
        updated_at: from_epoch_ms(row.get("updated_at")?, "users.updated_at")?,
    };
    user.validate()?;
    Ok(user)
}

fn public_keys_to_db(keys: &[UserPublicKey]) -> RepoResult<String> {
    serde_json::to_string(keys)
        .map_err(|err| RepoError::InvalidData(format!("cannot encode public keys: {err}")))
}

fn key_pair_to_db(key_pair: Option<&UserKeyPair>) -> RepoResult<Option<String>> {
    key_pair
        .map(|pair| {
            serde_json::to_string(pair)
                .map_err(|err| RepoError::InvalidData(format!("cannot encode key pair: {err}")))
        })
        .transpose()
}
