use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use schoolbus_auth_common::Role;

use super::{NewUser, RepositoryError, User, UserRepository};

const USER_COLUMNS: &str = "id, first_name, last_name, email, phone_number, role, firebase_uid, \
     is_active, last_login, profile_image_url, created_at, updated_at";

/// SQLite-backed user store.
pub struct SqliteUserRepository {
    conn: Mutex<Connection>,
}

impl SqliteUserRepository {
    /// Open (or create) the database at `database_url`.
    ///
    /// Accepts plain paths, `sqlite:`-prefixed paths and `:memory:`.
    pub fn new(database_url: &str) -> Result<Self, RepositoryError> {
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        let conn = if path == ":memory:" || path == "memory" {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| RepositoryError::Database(e.to_string()))?;
            }
            Connection::open(path)
        }
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                phone_number TEXT,
                role TEXT NOT NULL DEFAULT 'parent'
                    CHECK (role IN ('admin', 'school_admin', 'teacher', 'driver', 'parent')),
                firebase_uid TEXT NOT NULL UNIQUE,
                is_active INTEGER NOT NULL DEFAULT 1,
                last_login TEXT,
                profile_image_url TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        ).map_err(|e| RepositoryError::Database(e.to_string()))?;

        // firebase_uid is the join key to the provider; it never changes
        conn.execute(
            "CREATE TRIGGER IF NOT EXISTS users_firebase_uid_immutable
             BEFORE UPDATE OF firebase_uid ON users
             WHEN NEW.firebase_uid IS NOT OLD.firebase_uid
             BEGIN
                 SELECT RAISE(ABORT, 'firebase_uid is immutable');
             END",
            [],
        ).map_err(|e| RepositoryError::Database(e.to_string()))?;

        tracing::info!("User store initialized with database: {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn find_one(&self, column: &str, value: &str) -> Result<Option<User>, RepositoryError> {
        let conn = self.conn.lock()
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        conn.query_row(
            &format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column),
            params![value],
            row_to_user,
        )
        .optional()
        .map_err(|e| RepositoryError::Database(e.to_string()))
    }
}

#[cfg(test)]
impl SqliteUserRepository {
    pub(crate) fn set_active(&self, id: &str, active: bool) -> Result<(), RepositoryError> {
        let conn = self.conn.lock()
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active as i32, id],
        ).map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }
}

fn row_to_user(row: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = row.get(5)?;
    let role = role.parse::<Role>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(User {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        email: row.get(3)?,
        phone_number: row.get(4)?,
        role,
        firebase_uid: row.get(6)?,
        is_active: row.get::<_, i32>(7)? != 0,
        last_login_at: row
            .get::<_, Option<String>>(8)?
            .map(|s| parse_timestamp(8, &s))
            .transpose()?,
        profile_image_url: row.get(9)?,
        created_at: parse_timestamp(10, &row.get::<_, String>(10)?)?,
        updated_at: parse_timestamp(11, &row.get::<_, String>(11)?)?,
    })
}

fn parse_timestamp(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, RepositoryError> {
        self.find_one("id", id)
    }

    async fn find_by_external_id(
        &self,
        firebase_uid: &str,
    ) -> Result<Option<User>, RepositoryError> {
        self.find_one("firebase_uid", firebase_uid)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, RepositoryError> {
        self.find_one("email", email)
    }

    async fn create(&self, new_user: NewUser) -> Result<User, RepositoryError> {
        let conn = self.conn.lock()
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let now = Utc::now();
        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            first_name: new_user.first_name,
            last_name: new_user.last_name,
            email: new_user.email,
            phone_number: new_user.phone_number,
            role: new_user.role.unwrap_or_default(),
            firebase_uid: new_user.firebase_uid,
            is_active: true,
            last_login_at: None,
            profile_image_url: new_user.profile_image_url,
            created_at: now,
            updated_at: now,
        };

        conn.execute(
            &format!(
                "INSERT INTO users ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, NULL, ?8, ?9, ?9)",
                USER_COLUMNS
            ),
            params![
                user.id,
                user.first_name,
                user.last_name,
                user.email,
                user.phone_number,
                user.role.as_str(),
                user.firebase_uid,
                user.profile_image_url,
                now.to_rfc3339(),
            ],
        ).map_err(|e| {
            if is_constraint_violation(&e) {
                RepositoryError::Conflict(user.firebase_uid.clone())
            } else {
                RepositoryError::Database(e.to_string())
            }
        })?;

        tracing::info!("Created user {} (role {})", user.id, user.role);
        Ok(user)
    }

    async fn update_last_login(
        &self,
        id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let conn = self.conn.lock()
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        let changed = conn.execute(
            "UPDATE users SET last_login = ?1, updated_at = ?1 WHERE id = ?2",
            params![at.to_rfc3339(), id],
        ).map_err(|e| RepositoryError::Database(e.to_string()))?;

        if changed == 0 {
            return Err(RepositoryError::NotFound(id.to_string()));
        }

        tracing::debug!("Updated last login for user {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn repo() -> SqliteUserRepository {
        SqliteUserRepository::new(":memory:").unwrap()
    }

    fn new_user(email: &str, uid: &str) -> NewUser {
        NewUser {
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            email: email.to_string(),
            phone_number: None,
            role: None,
            firebase_uid: uid.to_string(),
            profile_image_url: None,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_defaults() {
        let repo = repo();
        let user = repo.create(new_user("jane@example.com", "uid-1")).await.unwrap();

        assert!(uuid::Uuid::parse_str(&user.id).is_ok());
        assert_eq!(user.role, Role::Parent);
        assert!(user.is_active);
        assert!(user.last_login_at.is_none());
        assert_eq!(user.created_at, user.updated_at);
    }

    #[tokio::test]
    async fn test_create_keeps_explicit_role() {
        let repo = repo();
        let mut request = new_user("drv@example.com", "uid-drv");
        request.role = Some(Role::Driver);
        let user = repo.create(request).await.unwrap();

        let stored = repo.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.role, Role::Driver);
    }

    #[tokio::test]
    async fn test_lookups_return_stored_user() {
        let repo = repo();
        let mut request = new_user("jane@example.com", "uid-1");
        request.phone_number = Some("+40712345678".to_string());
        request.profile_image_url = Some("https://example.com/jane.jpg".to_string());
        let created = repo.create(request).await.unwrap();

        let by_uid = repo.find_by_external_id("uid-1").await.unwrap().unwrap();
        let by_email = repo.find_by_email("jane@example.com").await.unwrap().unwrap();
        let by_id = repo.find_by_id(&created.id).await.unwrap().unwrap();

        assert_eq!(by_uid.id, created.id);
        assert_eq!(by_email.id, created.id);
        assert_eq!(by_id.phone_number.as_deref(), Some("+40712345678"));
        assert_eq!(by_id.profile_image_url.as_deref(), Some("https://example.com/jane.jpg"));
        assert_eq!(by_id.created_at.timestamp(), created.created_at.timestamp());
    }

    #[tokio::test]
    async fn test_lookups_miss_returns_none() {
        let repo = repo();
        assert!(repo.find_by_external_id("nobody").await.unwrap().is_none());
        assert!(repo.find_by_email("nobody@example.com").await.unwrap().is_none());
        assert!(repo.find_by_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_firebase_uid_is_conflict() {
        let repo = repo();
        repo.create(new_user("a@example.com", "uid-1")).await.unwrap();

        let err = repo.create(new_user("b@example.com", "uid-1")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_duplicate_email_is_conflict() {
        let repo = repo();
        repo.create(new_user("a@example.com", "uid-1")).await.unwrap();

        let err = repo.create(new_user("a@example.com", "uid-2")).await.unwrap_err();
        assert!(matches!(err, RepositoryError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_update_last_login() {
        let repo = repo();
        let user = repo.create(new_user("a@example.com", "uid-1")).await.unwrap();
        let at = Utc::now() + Duration::seconds(5);

        repo.update_last_login(&user.id, at).await.unwrap();

        let stored = repo.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.last_login_at.unwrap().timestamp(), at.timestamp());
        assert_eq!(stored.updated_at.timestamp(), at.timestamp());
    }

    #[tokio::test]
    async fn test_update_last_login_unknown_user() {
        let repo = repo();
        let err = repo.update_last_login("missing", Utc::now()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_firebase_uid_cannot_be_changed() {
        let repo = repo();
        let user = repo.create(new_user("a@example.com", "uid-1")).await.unwrap();

        let conn = repo.conn.lock().unwrap();
        let result = conn.execute(
            "UPDATE users SET firebase_uid = 'uid-2' WHERE id = ?1",
            params![user.id],
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_file_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("nested/auth.db").display());

        let id = {
            let repo = SqliteUserRepository::new(&url).unwrap();
            repo.create(new_user("a@example.com", "uid-1")).await.unwrap().id
        };

        let reopened = SqliteUserRepository::new(&url).unwrap();
        let user = reopened.find_by_external_id("uid-1").await.unwrap().unwrap();
        assert_eq!(user.id, id);
    }
}
