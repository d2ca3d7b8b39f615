//! SQLite store backend.
//!
//! One connection behind a mutex; SQLite serializes the read-modify-write
//! sequences that concurrent connections would otherwise race on. Schema
//! follows the service's long-lived on-disk layout: accounts, favorites,
//! friendships (canonically ordered pair), friend_requests, favorite_tags.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use tracing::info;

use super::{
    ordered_pair, AccountRecord, Favorite, FriendRequest, Friendship, RequestStatus, Store,
    StoreError, StoreResult, TaggedFavorite,
};

const STATUS_PENDING: i64 = 0;
const STATUS_ACCEPTED: i64 = 1;
const STATUS_REJECTED: i64 = 2;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts(
    username TEXT PRIMARY KEY,
    password TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS favorites(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    owner TEXT NOT NULL,
    name TEXT NOT NULL,
    category TEXT NOT NULL,
    location TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
    FOREIGN KEY(owner) REFERENCES accounts(username) ON DELETE CASCADE
);
CREATE TABLE IF NOT EXISTS friendships(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_a TEXT NOT NULL,
    user_b TEXT NOT NULL,
    since INTEGER NOT NULL DEFAULT (strftime('%s','now')),
    UNIQUE(user_a, user_b)
);
CREATE TABLE IF NOT EXISTS friend_requests(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    requester TEXT NOT NULL,
    requestee TEXT NOT NULL,
    status INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s','now'))
);
CREATE TABLE IF NOT EXISTS favorite_tags(
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fav_id INTEGER NOT NULL,
    tagger TEXT NOT NULL,
    tagged TEXT NOT NULL,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s','now')),
    UNIQUE(fav_id, tagged),
    FOREIGN KEY(fav_id) REFERENCES favorites(id) ON DELETE CASCADE
);
";

/// Persistent store over a single SQLite database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| StoreError::Internal(format!("open {}: {}", path.display(), e)))?;
        Self::init(conn, Some(path))
    }

    /// Fully in-memory database, for tests.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Self::init(conn, None)
    }

    fn init(conn: Connection, path: Option<&Path>) -> StoreResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        if let Some(path) = path {
            info!(path = %path.display(), "Opened sqlite store");
        }
        Ok(SqliteStore {
            conn: Mutex::new(conn),
        })
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Conflict
            }
            other => StoreError::Internal(other.to_string()),
        }
    }
}

fn status_from_row(status: i64) -> RequestStatus {
    match status {
        STATUS_ACCEPTED => RequestStatus::Accepted,
        STATUS_REJECTED => RequestStatus::Rejected,
        _ => RequestStatus::Pending,
    }
}

fn favorite_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Favorite> {
    Ok(Favorite {
        id: row.get(0)?,
        owner: row.get(1)?,
        name: row.get(2)?,
        category: row.get(3)?,
        location: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn request_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<FriendRequest> {
    Ok(FriendRequest {
        id: row.get(0)?,
        from: row.get(1)?,
        to: row.get(2)?,
        status: status_from_row(row.get(3)?),
        created_at: row.get(4)?,
    })
}

impl Store for SqliteStore {
    fn load_accounts(&self) -> StoreResult<Vec<AccountRecord>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT username, password FROM accounts ORDER BY username")?;
        let rows = stmt.query_map([], |row| {
            Ok(AccountRecord {
                username: row.get(0)?,
                password: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn create_account(&self, username: &str, password: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO accounts(username, password) VALUES(?1, ?2)",
            params![username, password],
        )?;
        Ok(())
    }

    fn create_favorite(
        &self,
        owner: &str,
        name: &str,
        category: &str,
        location: &str,
    ) -> StoreResult<i64> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO favorites(owner, name, category, location) VALUES(?1, ?2, ?3, ?4)",
            params![owner, name, category, location],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn update_favorite(
        &self,
        owner: &str,
        id: i64,
        name: &str,
        category: &str,
        location: &str,
    ) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE favorites SET name = ?1, category = ?2, location = ?3
             WHERE id = ?4 AND owner = ?5",
            params![name, category, location, id, owner],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn delete_favorite(&self, owner: &str, id: i64) -> StoreResult<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM favorites WHERE id = ?1 AND owner = ?2",
            params![id, owner],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn get_favorite(&self, id: i64) -> StoreResult<Favorite> {
        let conn = self.conn.lock();
        Ok(conn.query_row(
            "SELECT id, owner, name, category, location, created_at
             FROM favorites WHERE id = ?1",
            params![id],
            favorite_from_row,
        )?)
    }

    fn list_favorites(&self, owner: &str) -> StoreResult<Vec<Favorite>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, owner, name, category, location, created_at
             FROM favorites WHERE owner = ?1 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![owner], favorite_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_tagged_favorites(&self, username: &str) -> StoreResult<Vec<TaggedFavorite>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT f.id, f.owner, f.name, f.category, f.location, t.tagger, f.created_at
             FROM favorite_tags t JOIN favorites f ON f.id = t.fav_id
             WHERE t.tagged = ?1 ORDER BY t.created_at DESC, t.id DESC",
        )?;
        let rows = stmt.query_map(params![username], |row| {
            Ok(TaggedFavorite {
                id: row.get(0)?,
                owner: row.get(1)?,
                name: row.get(2)?,
                category: row.get(3)?,
                location: row.get(4)?,
                tagger: row.get(5)?,
                created_at: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn create_friend_request(&self, from: &str, to: &str) -> StoreResult<i64> {
        let conn = self.conn.lock();
        // "Still pending" cannot be a UNIQUE constraint; check and insert
        // under the connection lock instead.
        let pending: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM friend_requests
             WHERE requester = ?1 AND requestee = ?2 AND status = ?3)",
            params![from, to, STATUS_PENDING],
            |row| row.get(0),
        )?;
        if pending {
            return Err(StoreError::Conflict);
        }
        conn.execute(
            "INSERT INTO friend_requests(requester, requestee) VALUES(?1, ?2)",
            params![from, to],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get_friend_request(&self, id: i64) -> StoreResult<FriendRequest> {
        let conn = self.conn.lock();
        Ok(conn.query_row(
            "SELECT id, requester, requestee, status, created_at
             FROM friend_requests WHERE id = ?1",
            params![id],
            request_from_row,
        )?)
    }

    fn accept_friend_request(&self, id: i64, requestee: &str) -> StoreResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction().map_err(StoreError::from)?;

        let row: Option<(String, String, i64)> = tx
            .query_row(
                "SELECT requester, requestee, status FROM friend_requests WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;

        let (requester, addressee, status) = row.ok_or(StoreError::NotFound)?;
        if addressee != requestee {
            return Err(StoreError::NotFound);
        }
        if status != STATUS_PENDING {
            return Err(StoreError::Conflict);
        }

        let (user_a, user_b) = ordered_pair(&requester, &addressee);
        tx.execute(
            "INSERT OR IGNORE INTO friendships(user_a, user_b) VALUES(?1, ?2)",
            params![user_a, user_b],
        )?;
        tx.execute(
            "UPDATE friend_requests SET status = ?1 WHERE id = ?2",
            params![STATUS_ACCEPTED, id],
        )?;
        tx.commit().map_err(StoreError::from)?;
        Ok(())
    }

    fn reject_friend_request(&self, id: i64, requestee: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        let row: Option<(String, i64)> = conn
            .query_row(
                "SELECT requestee, status FROM friend_requests WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (addressee, status) = row.ok_or(StoreError::NotFound)?;
        if addressee != requestee {
            return Err(StoreError::NotFound);
        }
        if status != STATUS_PENDING {
            return Err(StoreError::Conflict);
        }

        conn.execute(
            "UPDATE friend_requests SET status = ?1 WHERE id = ?2",
            params![STATUS_REJECTED, id],
        )?;
        Ok(())
    }

    fn remove_friendship(&self, user_a: &str, user_b: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        let (first, second) = ordered_pair(user_a, user_b);
        let changed = conn.execute(
            "DELETE FROM friendships WHERE user_a = ?1 AND user_b = ?2",
            params![first, second],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    fn are_friends(&self, user_a: &str, user_b: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        let (first, second) = ordered_pair(user_a, user_b);
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM friendships WHERE user_a = ?1 AND user_b = ?2)",
            params![first, second],
            |row| row.get(0),
        )?)
    }

    fn has_pending_request(&self, user_a: &str, user_b: &str) -> StoreResult<bool> {
        let conn = self.conn.lock();
        Ok(conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM friend_requests
             WHERE ((requester = ?1 AND requestee = ?2)
                 OR (requester = ?2 AND requestee = ?1))
               AND status = ?3)",
            params![user_a, user_b, STATUS_PENDING],
            |row| row.get(0),
        )?)
    }

    fn list_friends(&self, username: &str) -> StoreResult<Vec<Friendship>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT user_a, user_b, since FROM friendships
             WHERE user_a = ?1 OR user_b = ?1 ORDER BY since DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![username], |row| {
            let user_a: String = row.get(0)?;
            let user_b: String = row.get(1)?;
            let since: i64 = row.get(2)?;
            let other = if user_a == username { user_b } else { user_a };
            Ok(Friendship {
                username: other,
                since,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn list_friend_requests(&self, username: &str) -> StoreResult<Vec<FriendRequest>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, requester, requestee, status, created_at FROM friend_requests
             WHERE requestee = ?1 AND status = ?2 ORDER BY created_at DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![username, STATUS_PENDING], request_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    fn tag_favorite(&self, favorite_id: i64, tagger: &str, tagged: &str) -> StoreResult<()> {
        let conn = self.conn.lock();
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM favorites WHERE id = ?1)",
            params![favorite_id],
            |row| row.get(0),
        )?;
        if !exists {
            return Err(StoreError::NotFound);
        }
        conn.execute(
            "INSERT INTO favorite_tags(fav_id, tagger, tagged) VALUES(?1, ?2, ?3)",
            params![favorite_id, tagger, tagged],
        )?;
        Ok(())
    }
}
