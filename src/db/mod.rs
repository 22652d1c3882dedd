//! Application database - users and query history (rusqlite)
//!
//! Every history query is scoped by `user_id`; a record owned by another
//! user behaves exactly like a missing one.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("user name already taken")]
    DuplicateUserName,

    #[error("email already taken")]
    DuplicateEmail,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        DbError::Other(e.into())
    }
}

/// User row
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub user_name: String,
    pub email: Option<String>,
    pub hashed_password: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

/// User without credentials (API responses)
#[derive(Debug, Clone, Serialize)]
pub struct PublicUser {
    pub id: i64,
    pub user_name: String,
    pub email: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            user_name: user.user_name.clone(),
            email: user.email.clone(),
            is_active: user.is_active,
            created_at: user.created_at,
            last_login: user.last_login,
        }
    }
}

/// Stored question / answer pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRecord {
    pub id: i64,
    pub user_id: i64,
    pub query: String,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

/// One page of history plus the user's total record count
#[derive(Debug, Clone, Serialize)]
pub struct HistoryPage {
    pub records: Vec<QueryRecord>,
    pub total: usize,
}

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl Database {
    /// Open (or create) the database file
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.to_path_buf(),
        };
        db.initialize()?;

        tracing::info!("Database ready at {}", db.path.display());
        Ok(db)
    }

    /// In-memory database (tests, throwaway runs)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
            path: PathBuf::from(":memory:"),
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_name TEXT NOT NULL UNIQUE,
                email TEXT UNIQUE,
                hashed_password TEXT NOT NULL,
                is_active INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                last_login TEXT
            );
            CREATE TABLE IF NOT EXISTS query_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id INTEGER NOT NULL REFERENCES users(id),
                query TEXT NOT NULL,
                response TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_query_records_user ON query_records(user_id);",
        )
        .context("Failed to create tables")?;

        Ok(())
    }

    // ------------------------------------------------------------------------
    // Users
    // ------------------------------------------------------------------------

    /// Insert a user; name is checked before email
    pub fn create_user(
        &self,
        user_name: &str,
        email: Option<&str>,
        hashed_password: &str,
    ) -> Result<User, DbError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let name_taken: Option<i64> = tx
            .query_row(
                "SELECT id FROM users WHERE user_name = ?1",
                params![user_name],
                |row| row.get(0),
            )
            .optional()?;
        if name_taken.is_some() {
            return Err(DbError::DuplicateUserName);
        }

        if let Some(email) = email {
            let email_taken: Option<i64> = tx
                .query_row(
                    "SELECT id FROM users WHERE email = ?1",
                    params![email],
                    |row| row.get(0),
                )
                .optional()?;
            if email_taken.is_some() {
                return Err(DbError::DuplicateEmail);
            }
        }

        let created_at = Utc::now();
        tx.execute(
            "INSERT INTO users (user_name, email, hashed_password, is_active, created_at)
             VALUES (?1, ?2, ?3, 1, ?4)",
            params![user_name, email, hashed_password, timestamp(&created_at)],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;

        tracing::info!("Created user {} (id={})", user_name, id);

        Ok(User {
            id,
            user_name: user_name.to_string(),
            email: email.map(str::to_string),
            hashed_password: hashed_password.to_string(),
            is_active: true,
            created_at,
            last_login: None,
        })
    }

    pub fn find_user_by_name(&self, user_name: &str) -> Result<Option<User>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT id, user_name, email, hashed_password, is_active, created_at, last_login
                 FROM users WHERE user_name = ?1",
                params![user_name],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn find_user_by_id(&self, id: i64) -> Result<Option<User>> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                "SELECT id, user_name, email, hashed_password, is_active, created_at, last_login
                 FROM users WHERE id = ?1",
                params![id],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    pub fn update_last_login(&self, user_id: i64) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE users SET last_login = ?1 WHERE id = ?2",
            params![timestamp(&Utc::now()), user_id],
        )?;
        Ok(())
    }

    pub fn set_user_active(&self, user_id: i64, active: bool) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE users SET is_active = ?1 WHERE id = ?2",
            params![active, user_id],
        )?;
        Ok(rows > 0)
    }

    // ------------------------------------------------------------------------
    // Query history
    // ------------------------------------------------------------------------

    pub fn add_record(&self, user_id: i64, query: &str, response: &str) -> Result<QueryRecord> {
        let conn = self.lock()?;
        let created_at = Utc::now();

        conn.execute(
            "INSERT INTO query_records (user_id, query, response, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, query, response, timestamp(&created_at)],
        )
        .context("Failed to save query record")?;

        Ok(QueryRecord {
            id: conn.last_insert_rowid(),
            user_id,
            query: query.to_string(),
            response: response.to_string(),
            created_at,
        })
    }

    /// Newest first
    pub fn list_records(&self, user_id: i64, skip: usize, limit: usize) -> Result<HistoryPage> {
        let conn = self.lock()?;

        let mut stmt = conn.prepare(
            "SELECT id, user_id, query, response, created_at
             FROM query_records WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2 OFFSET ?3",
        )?;
        let records = stmt
            .query_map(params![user_id, limit as i64, skip as i64], row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let total: i64 = conn.query_row(
            "SELECT COUNT(*) FROM query_records WHERE user_id = ?1",
            params![user_id],
            |row| row.get(0),
        )?;

        Ok(HistoryPage {
            records,
            total: total as usize,
        })
    }

    pub fn latest_record(&self, user_id: i64) -> Result<Option<QueryRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, user_id, query, response, created_at
                 FROM query_records WHERE user_id = ?1
                 ORDER BY created_at DESC, id DESC LIMIT 1",
                params![user_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn get_record(&self, user_id: i64, record_id: i64) -> Result<Option<QueryRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                "SELECT id, user_id, query, response, created_at
                 FROM query_records WHERE id = ?1 AND user_id = ?2",
                params![record_id, user_id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// # Returns
    /// `false` when the record is missing or owned by someone else
    pub fn delete_record(&self, user_id: i64, record_id: i64) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM query_records WHERE id = ?1 AND user_id = ?2",
            params![record_id, user_id],
        )?;
        Ok(rows > 0)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        user_name: row.get(1)?,
        email: row.get(2)?,
        hashed_password: row.get(3)?,
        is_active: row.get(4)?,
        created_at: parse_datetime(&row.get::<_, String>(5)?),
        last_login: row
            .get::<_, Option<String>>(6)?
            .map(|s| parse_datetime(&s)),
    })
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueryRecord> {
    Ok(QueryRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        query: row.get(2)?,
        response: row.get(3)?,
        created_at: parse_datetime(&row.get::<_, String>(4)?),
    })
}

/// Fixed-width RFC3339 so that text order matches time order
fn timestamp(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn db_with_user(name: &str) -> (Database, User) {
        let db = Database::open_in_memory().unwrap();
        let user = db
            .create_user(name, Some(&format!("{}@example.com", name)), "hash")
            .unwrap();
        (db, user)
    }

    #[test]
    fn test_create_and_find_user() {
        let (db, user) = db_with_user("alice");
        assert!(user.is_active);
        assert!(user.last_login.is_none());

        let found = db.find_user_by_name("alice").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.email.as_deref(), Some("alice@example.com"));
        assert_eq!(db.find_user_by_id(user.id).unwrap().unwrap().user_name, "alice");
        assert!(db.find_user_by_name("bob").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_user_name_checked_first() {
        let (db, _) = db_with_user("alice");
        // same name and same email: name wins
        let err = db
            .create_user("alice", Some("alice@example.com"), "hash")
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateUserName));
    }

    #[test]
    fn test_duplicate_email() {
        let (db, _) = db_with_user("alice");
        let err = db
            .create_user("alice2", Some("alice@example.com"), "hash")
            .unwrap_err();
        assert!(matches!(err, DbError::DuplicateEmail));
    }

    #[test]
    fn test_users_without_email() {
        let db = Database::open_in_memory().unwrap();
        db.create_user("a", None, "h").unwrap();
        db.create_user("b", None, "h").unwrap();
    }

    #[test]
    fn test_update_last_login_and_deactivate() {
        let (db, user) = db_with_user("alice");
        db.update_last_login(user.id).unwrap();
        assert!(db.find_user_by_id(user.id).unwrap().unwrap().last_login.is_some());

        assert!(db.set_user_active(user.id, false).unwrap());
        assert!(!db.find_user_by_id(user.id).unwrap().unwrap().is_active);
    }

    #[test]
    fn test_history_paging_newest_first() {
        let (db, user) = db_with_user("alice");
        for i in 0..5 {
            db.add_record(user.id, &format!("q{}", i), &format!("a{}", i))
                .unwrap();
        }

        let page = db.list_records(user.id, 0, 2).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.records.len(), 2);
        assert_eq!(page.records[0].query, "q4");
        assert_eq!(page.records[1].query, "q3");

        let page = db.list_records(user.id, 4, 10).unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].query, "q0");

        assert_eq!(db.latest_record(user.id).unwrap().unwrap().query, "q4");
    }

    #[test]
    fn test_history_is_scoped_to_owner() {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", None, "h").unwrap();
        let bob = db.create_user("bob", None, "h").unwrap();

        let record = db.add_record(alice.id, "九份怎麼去", "搭公車").unwrap();

        assert!(db.get_record(bob.id, record.id).unwrap().is_none());
        assert!(!db.delete_record(bob.id, record.id).unwrap());
        assert!(db.latest_record(bob.id).unwrap().is_none());
        assert_eq!(db.list_records(bob.id, 0, 10).unwrap().total, 0);

        assert_eq!(
            db.get_record(alice.id, record.id).unwrap().unwrap().response,
            "搭公車"
        );
        assert!(db.delete_record(alice.id, record.id).unwrap());
        assert!(db.get_record(alice.id, record.id).unwrap().is_none());
    }

    #[test]
    fn test_open_file_persists() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("database.db");
        {
            let db = Database::open(&path).unwrap();
            db.create_user("alice", None, "h").unwrap();
        }
        let db = Database::open(&path).unwrap();
        assert!(db.find_user_by_name("alice").unwrap().is_some());
    }
}
