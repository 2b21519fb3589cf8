use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{PlaylistStore, StoredEntry};
use crate::error::StoreError;
use crate::models::{EntryId, PlaylistEntry, UNORDERED};

const SELECT_COLUMNS: &str = "_id, name, url, is_read, play_order, story_id, is_stream";

/// Playlist persisted in a SQLite `items` table
pub struct SqlitePlaylistStore {
    conn: Mutex<Connection>,
}

impl SqlitePlaylistStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.migrate()?;
        Ok(store)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.conn();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                _id INTEGER PRIMARY KEY,
                name TEXT,
                url VARCHAR,
                is_read BOOLEAN,
                play_order INTEGER
            );
            CREATE INDEX IF NOT EXISTS idx_items_play_order ON items(play_order, _id);
            "#,
        )?;

        // Older databases predate these columns
        let columns = {
            let mut stmt = conn.prepare("PRAGMA table_info(items)")?;
            let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
            names.collect::<Result<Vec<_>, _>>()?
        };
        if !columns.iter().any(|c| c == "story_id") {
            log::info!("Adding story_id column to playlist table");
            conn.execute_batch("ALTER TABLE items ADD COLUMN story_id TEXT DEFAULT NULL;")?;
        }
        if !columns.iter().any(|c| c == "is_stream") {
            conn.execute_batch("ALTER TABLE items ADD COLUMN is_stream BOOLEAN DEFAULT 0;")?;
        }
        Ok(())
    }

    fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredEntry> {
        Ok(StoredEntry {
            entry: PlaylistEntry {
                id: Some(row.get(0)?),
                title: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                url: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                order: row.get(4)?,
                story_ref: row.get(5)?,
                is_stream: row.get::<_, Option<bool>>(6)?.unwrap_or(false),
            },
            is_read: row.get::<_, Option<bool>>(3)?.unwrap_or(false),
        })
    }

    fn query_one(&self, sql: &str, order: i64) -> Result<Option<PlaylistEntry>, StoreError> {
        let conn = self.conn();
        let stored = conn
            .query_row(sql, params![order], Self::row_to_stored)
            .optional()?;
        Ok(stored.map(|s| s.entry))
    }
}

impl PlaylistStore for SqlitePlaylistStore {
    fn insert(&self, entry: &PlaylistEntry) -> Result<EntryId, StoreError> {
        let order = if entry.order == UNORDERED {
            self.max_order()? + 1
        } else {
            entry.order
        };
        let conn = self.conn();
        conn.execute(
            "INSERT INTO items (name, url, is_read, play_order, story_id, is_stream)
             VALUES (?1, ?2, 0, ?3, ?4, ?5)",
            params![entry.title, entry.url, order, entry.story_ref, entry.is_stream],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn mark_read(&self, id: EntryId) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute("UPDATE items SET is_read = 1 WHERE _id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    fn next_unread_after(&self, order: i64) -> Result<Option<PlaylistEntry>, StoreError> {
        self.query_one(
            &format!(
                "SELECT {} FROM items WHERE is_read = 0 AND play_order > ?1
                 ORDER BY play_order ASC, _id ASC LIMIT 1",
                SELECT_COLUMNS
            ),
            order,
        )
    }

    fn previous_unread_before(&self, order: i64) -> Result<Option<PlaylistEntry>, StoreError> {
        self.query_one(
            &format!(
                "SELECT {} FROM items WHERE is_read = 0 AND play_order < ?1
                 ORDER BY play_order DESC, _id DESC LIMIT 1",
                SELECT_COLUMNS
            ),
            order,
        )
    }

    fn get(&self, id: EntryId) -> Result<Option<StoredEntry>, StoreError> {
        let conn = self.conn();
        let stored = conn
            .query_row(
                &format!("SELECT {} FROM items WHERE _id = ?1", SELECT_COLUMNS),
                params![id],
                Self::row_to_stored,
            )
            .optional()?;
        Ok(stored)
    }

    fn list(&self) -> Result<Vec<StoredEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items ORDER BY play_order ASC, _id ASC",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map([], Self::row_to_stored)?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    fn max_order(&self) -> Result<i64, StoreError> {
        let max: Option<i64> = self
            .conn()
            .query_row("SELECT MAX(play_order) FROM items", [], |row| row.get(0))?;
        Ok(max.unwrap_or(UNORDERED))
    }

    fn delete(&self, id: EntryId) -> Result<(), StoreError> {
        let changed = self
            .conn()
            .execute("DELETE FROM items WHERE _id = ?1", params![id])?;
        if changed == 0 {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    fn delete_where(&self, read: bool) -> Result<usize, StoreError> {
        Ok(self
            .conn()
            .execute("DELETE FROM items WHERE is_read = ?1", params![read])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(title: &str) -> PlaylistEntry {
        PlaylistEntry::new(format!("http://example.org/{}.mp3", title), title, false)
    }

    #[test]
    fn test_insert_and_traverse() {
        let store = SqlitePlaylistStore::open_in_memory().unwrap();
        assert_eq!(store.max_order().unwrap(), -1);

        let a = store.insert(&entry("a").with_story_ref("100")).unwrap();
        store.insert(&entry("b")).unwrap();
        store.mark_read(a).unwrap();

        let next = store.next_unread_after(UNORDERED).unwrap().unwrap();
        assert_eq!(next.title, "b");
        assert_eq!(next.order, 1);

        let stored_a = store.get(a).unwrap().unwrap();
        assert!(stored_a.is_read);
        assert_eq!(stored_a.entry.story_ref.as_deref(), Some("100"));
    }

    #[test]
    fn test_stream_flag_round_trips() {
        let store = SqlitePlaylistStore::open_in_memory().unwrap();
        let id = store
            .insert(&PlaylistEntry::new("http://x/live", "Live", true))
            .unwrap();
        assert!(store.get(id).unwrap().unwrap().entry.is_stream);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("playlist.db");
        {
            let store = SqlitePlaylistStore::open(&path).unwrap();
            store.insert(&entry("kept")).unwrap();
        }
        let store = SqlitePlaylistStore::open(&path).unwrap();
        let items = store.list().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].entry.title, "kept");
    }

    #[test]
    fn test_migrates_old_schema() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE items (_id INTEGER PRIMARY KEY, name TEXT, url VARCHAR,
                                 is_read BOOLEAN, play_order INTEGER);
             INSERT INTO items (name, url, is_read, play_order) VALUES ('old', 'http://x/o.mp3', 0, 3);",
        )
        .unwrap();

        let store = SqlitePlaylistStore::from_connection(conn).unwrap();
        let next = store.next_unread_after(0).unwrap().unwrap();
        assert_eq!(next.title, "old");
        assert_eq!(next.story_ref, None);
        assert!(!next.is_stream);
    }

    #[test]
    fn test_delete_operations() {
        let store = SqlitePlaylistStore::open_in_memory().unwrap();
        let a = store.insert(&entry("a")).unwrap();
        let b = store.insert(&entry("b")).unwrap();
        store.mark_read(a).unwrap();

        assert_eq!(store.delete_where(true).unwrap(), 1);
        store.delete(b).unwrap();
        assert!(store.list().unwrap().is_empty());
        assert!(matches!(store.delete(b), Err(StoreError::NotFound { .. })));
    }
}
