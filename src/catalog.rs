//! SecureVault - File Catalog (SQLite)
//!
//! Two tables: `admins` holds the operator credential record, `vault_files`
//! holds one row per stored blob. Short-lived writers from the same process
//! are tolerated through a retry-with-backoff loop on SQLITE_BUSY; every
//! multi-step mutation runs in a single transaction.
//!
//! `LIKE` search inherits SQLite's default collation, so matching is
//! case-insensitive for ASCII.

use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::crypto;
use crate::error::{VaultError, VaultResult};
use crate::models::{
    format_timestamp, now, parse_timestamp, FileEntry, NewFileEntry, Operator,
};

/// Backoff base for SQLITE_BUSY; doubles per retry.
const RETRY_BASE: Duration = Duration::from_millis(100);

/// Retries after the initial attempt (100 + 200 + 400 ms worst case).
const RETRY_ATTEMPTS: u32 = 3;

/// Default seed credentials written on first initialization.
pub const SEED_USERNAME: &str = "admin";
pub const SEED_PASSWORD: &str = "admin123";

/// Catalog store for operator and file-entry records.
pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    /// Open (or create) the catalog database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> VaultResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create tables if absent and seed the default operator when the vault
    /// has none.
    pub fn initialize(&self) -> VaultResult<()> {
        self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS admins (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    username TEXT UNIQUE NOT NULL,
                    password_hash TEXT NOT NULL,
                    salt TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    last_login TEXT,
                    is_active BOOLEAN DEFAULT 1
                );

                CREATE TABLE IF NOT EXISTS vault_files (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    original_name TEXT NOT NULL,
                    encrypted_path TEXT NOT NULL,
                    file_type TEXT,
                    file_size INTEGER,
                    date_added TEXT NOT NULL,
                    description TEXT,
                    tags TEXT
                );
                "#,
            )?;
            tx.commit()?;
            Ok(())
        })?;

        let operators: i64 = self.with_retry(|conn| {
            conn.query_row("SELECT COUNT(*) FROM admins", [], |row| row.get(0))
        })?;

        if operators == 0 {
            let salt = crypto::generate_salt()?;
            let verifier = crypto::hash_password(SEED_PASSWORD, &salt)?;
            let created = format_timestamp(&now());
            self.with_retry(move |conn| {
                conn.execute(
                    "INSERT INTO admins (username, password_hash, salt, created_at, is_active)
                     VALUES (?1, ?2, ?3, ?4, 1)",
                    params![SEED_USERNAME, verifier, salt, created],
                )
            })?;
            log::info!("seeded default operator");
        }

        Ok(())
    }

    /// Look up the active operator by name and verify the password.
    ///
    /// Returns `None` for unknown names and wrong passwords alike. A failed
    /// last-login update is logged, never propagated.
    pub fn authenticate(&self, username: &str, password: &str) -> VaultResult<Option<Operator>> {
        let Some(operator) = self.operator_by_name(username)? else {
            return Ok(None);
        };
        if !crypto::verify_password(password, &operator.password_hash, &operator.salt)? {
            return Ok(None);
        }

        if let Err(e) = self.touch_last_login(operator.id) {
            log::warn!("failed to update last login: {e}");
        }
        Ok(Some(operator))
    }

    /// Fetch the active operator record by name (no password check).
    pub fn operator_by_name(&self, username: &str) -> VaultResult<Option<Operator>> {
        let raw = self.with_retry(|conn| {
            conn.query_row(
                "SELECT id, username, password_hash, salt, created_at, last_login, is_active
                 FROM admins WHERE username = ?1 AND is_active = 1",
                params![username],
                read_operator,
            )
            .optional()
        })?;
        raw.map(RawOperator::into_operator).transpose()
    }

    fn touch_last_login(&self, operator_id: i64) -> VaultResult<()> {
        let stamp = format_timestamp(&now());
        self.with_retry(move |conn| {
            conn.execute(
                "UPDATE admins SET last_login = ?1 WHERE id = ?2",
                params![stamp, operator_id],
            )
        })?;
        Ok(())
    }

    /// Insert a file entry and return its assigned identity.
    pub fn insert_file_entry(&self, entry: &NewFileEntry) -> VaultResult<i64> {
        let date_added = format_timestamp(&entry.date_added);
        self.with_retry(|conn| {
            conn.execute(
                "INSERT INTO vault_files
                 (original_name, encrypted_path, file_type, file_size, date_added, description, tags)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    entry.original_name,
                    entry.blob_path.to_string_lossy(),
                    entry.file_type,
                    entry.file_size as i64,
                    date_added,
                    entry.description,
                    entry.tags,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// All file entries, newest first.
    pub fn list_files(&self) -> VaultResult<Vec<FileEntry>> {
        self.query_entries(
            "SELECT id, original_name, encrypted_path, file_type, file_size,
                    date_added, description, tags
             FROM vault_files ORDER BY date_added DESC, id DESC",
            params![],
        )
    }

    /// File entries whose name, tags, or description contain `term`.
    pub fn search_files(&self, term: &str) -> VaultResult<Vec<FileEntry>> {
        let pattern = format!("%{term}%");
        self.query_entries(
            "SELECT id, original_name, encrypted_path, file_type, file_size,
                    date_added, description, tags
             FROM vault_files
             WHERE original_name LIKE ?1 OR tags LIKE ?1 OR description LIKE ?1
             ORDER BY date_added DESC, id DESC",
            params![pattern],
        )
    }

    /// Fetch one file entry by id.
    pub fn file_entry(&self, id: i64) -> VaultResult<Option<FileEntry>> {
        let raw = self.with_retry(|conn| {
            conn.query_row(
                "SELECT id, original_name, encrypted_path, file_type, file_size,
                        date_added, description, tags
                 FROM vault_files WHERE id = ?1",
                params![id],
                read_file_entry,
            )
            .optional()
        })?;
        raw.map(RawFileEntry::into_entry).transpose()
    }

    /// Remove a file entry; true iff a row was deleted.
    pub fn delete_file_entry(&self, id: i64) -> VaultResult<bool> {
        let removed = self.with_retry(move |conn| {
            conn.execute("DELETE FROM vault_files WHERE id = ?1", params![id])
        })?;
        Ok(removed > 0)
    }

    /// Commit new credentials (and optionally a new name) for an operator
    /// in a single transaction. Returns false when the requested name is
    /// already taken by another row; the transaction rolls back.
    pub fn update_operator(
        &self,
        id: i64,
        new_name: Option<&str>,
        new_verifier: &str,
        new_salt: &str,
    ) -> VaultResult<bool> {
        self.with_retry(|conn| {
            let tx = conn.unchecked_transaction()?;

            if let Some(name) = new_name {
                let taken: i64 = tx.query_row(
                    "SELECT COUNT(*) FROM admins WHERE username = ?1 AND id <> ?2",
                    params![name, id],
                    |row| row.get(0),
                )?;
                if taken > 0 {
                    return Ok(false);
                }
            }

            let updated = match new_name {
                Some(name) => tx.execute(
                    "UPDATE admins SET username = ?1, password_hash = ?2, salt = ?3 WHERE id = ?4",
                    params![name, new_verifier, new_salt, id],
                )?,
                None => tx.execute(
                    "UPDATE admins SET password_hash = ?1, salt = ?2 WHERE id = ?3",
                    params![new_verifier, new_salt, id],
                )?,
            };

            tx.commit()?;
            Ok(updated > 0)
        })
    }

    /// Whether `name` belongs to a different operator row.
    pub fn username_taken(&self, name: &str, excluding_id: i64) -> VaultResult<bool> {
        let count: i64 = self.with_retry(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM admins WHERE username = ?1 AND id <> ?2",
                params![name, excluding_id],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    fn query_entries(
        &self,
        sql: &str,
        args: impl rusqlite::Params + Copy,
    ) -> VaultResult<Vec<FileEntry>> {
        let raw = self.with_retry(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map(args, read_file_entry)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        raw.into_iter().map(RawFileEntry::into_entry).collect()
    }

    /// Run `op`, retrying on SQLITE_BUSY with exponential backoff.
    fn with_retry<T>(
        &self,
        mut op: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> VaultResult<T> {
        let conn = self.conn.lock();
        let mut delay = RETRY_BASE;
        let mut attempt = 0;
        loop {
            match op(&conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_busy(&e) && attempt < RETRY_ATTEMPTS => {
                    log::warn!("catalog busy, retrying in {delay:?}");
                    std::thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == rusqlite::ErrorCode::DatabaseBusy
                || e.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

struct RawOperator {
    id: i64,
    username: String,
    password_hash: String,
    salt: String,
    created_at: String,
    last_login: Option<String>,
    is_active: bool,
}

fn read_operator(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawOperator> {
    Ok(RawOperator {
        id: row.get(0)?,
        username: row.get(1)?,
        password_hash: row.get(2)?,
        salt: row.get(3)?,
        created_at: row.get(4)?,
        last_login: row.get(5)?,
        is_active: row.get(6)?,
    })
}

impl RawOperator {
    fn into_operator(self) -> VaultResult<Operator> {
        Ok(Operator {
            id: self.id,
            username: self.username,
            password_hash: self.password_hash,
            salt: self.salt,
            created_at: parse_timestamp(&self.created_at)?,
            last_login: self
                .last_login
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            is_active: self.is_active,
        })
    }
}

struct RawFileEntry {
    id: i64,
    original_name: String,
    blob_path: String,
    file_type: Option<String>,
    file_size: Option<i64>,
    date_added: String,
    description: Option<String>,
    tags: Option<String>,
}

fn read_file_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawFileEntry> {
    Ok(RawFileEntry {
        id: row.get(0)?,
        original_name: row.get(1)?,
        blob_path: row.get(2)?,
        file_type: row.get(3)?,
        file_size: row.get(4)?,
        date_added: row.get(5)?,
        description: row.get(6)?,
        tags: row.get(7)?,
    })
}

impl RawFileEntry {
    fn into_entry(self) -> VaultResult<FileEntry> {
        let size = self.file_size.unwrap_or(0);
        if size < 0 {
            return Err(VaultError::StoreFailed(format!(
                "negative file size for entry {}",
                self.id
            )));
        }
        Ok(FileEntry {
            id: self.id,
            original_name: self.original_name,
            blob_path: PathBuf::from(self.blob_path),
            file_type: self.file_type.unwrap_or_default(),
            file_size: size as u64,
            date_added: parse_timestamp(&self.date_added)?,
            description: self.description.unwrap_or_default(),
            tags: self.tags.unwrap_or_default(),
        })
    }
}
