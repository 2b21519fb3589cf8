use std::sync::{Mutex, MutexGuard};

use crate::error::StoreError;
use crate::models::{EntryId, PlaylistEntry, UNORDERED};

pub mod sqlite;

pub use sqlite::SqlitePlaylistStore;

/// A stored entry together with its read flag
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredEntry {
    pub entry: PlaylistEntry,
    pub is_read: bool,
}

/// Durable ordered playlist
///
/// Ordering is `order` ascending, ties broken by id.
pub trait PlaylistStore: Send + Sync {
    /// Persist an entry and return its id. An entry without an order is
    /// appended after the current maximum.
    fn insert(&self, entry: &PlaylistEntry) -> Result<EntryId, StoreError>;

    fn mark_read(&self, id: EntryId) -> Result<(), StoreError>;

    /// First unread entry whose order is greater than `order`
    fn next_unread_after(&self, order: i64) -> Result<Option<PlaylistEntry>, StoreError>;

    /// Last unread entry whose order is lower than `order`
    fn previous_unread_before(&self, order: i64) -> Result<Option<PlaylistEntry>, StoreError>;

    fn get(&self, id: EntryId) -> Result<Option<StoredEntry>, StoreError>;

    fn list(&self) -> Result<Vec<StoredEntry>, StoreError>;

    /// Highest order in the store, or -1 when empty
    fn max_order(&self) -> Result<i64, StoreError>;

    fn delete(&self, id: EntryId) -> Result<(), StoreError>;

    /// Remove every entry whose read flag equals `read`; returns the count
    fn delete_where(&self, read: bool) -> Result<usize, StoreError>;
}

/// Volatile store used for transient sessions and tests
#[derive(Default)]
pub struct MemoryPlaylistStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    items: Vec<StoredEntry>,
    next_id: EntryId,
}

impl MemoryPlaylistStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn sort_key(item: &StoredEntry) -> (i64, EntryId) {
    (item.entry.order, item.entry.id.unwrap_or_default())
}

impl PlaylistStore for MemoryPlaylistStore {
    fn insert(&self, entry: &PlaylistEntry) -> Result<EntryId, StoreError> {
        let mut inner = self.inner();
        inner.next_id += 1;
        let id = inner.next_id;

        let mut stored = entry.clone();
        stored.id = Some(id);
        if stored.order == UNORDERED {
            stored.order = inner
                .items
                .iter()
                .map(|item| item.entry.order)
                .max()
                .unwrap_or(UNORDERED)
                + 1;
        }
        inner.items.push(StoredEntry {
            entry: stored,
            is_read: false,
        });
        Ok(id)
    }

    fn mark_read(&self, id: EntryId) -> Result<(), StoreError> {
        let mut inner = self.inner();
        let item = inner
            .items
            .iter_mut()
            .find(|item| item.entry.id == Some(id))
            .ok_or(StoreError::NotFound { id })?;
        item.is_read = true;
        Ok(())
    }

    fn next_unread_after(&self, order: i64) -> Result<Option<PlaylistEntry>, StoreError> {
        let inner = self.inner();
        Ok(inner
            .items
            .iter()
            .filter(|item| !item.is_read && item.entry.order > order)
            .min_by_key(|item| sort_key(item))
            .map(|item| item.entry.clone()))
    }

    fn previous_unread_before(&self, order: i64) -> Result<Option<PlaylistEntry>, StoreError> {
        let inner = self.inner();
        Ok(inner
            .items
            .iter()
            .filter(|item| !item.is_read && item.entry.order < order)
            .max_by_key(|item| sort_key(item))
            .map(|item| item.entry.clone()))
    }

    fn get(&self, id: EntryId) -> Result<Option<StoredEntry>, StoreError> {
        Ok(self
            .inner()
            .items
            .iter()
            .find(|item| item.entry.id == Some(id))
            .cloned())
    }

    fn list(&self) -> Result<Vec<StoredEntry>, StoreError> {
        let mut items = self.inner().items.clone();
        items.sort_by_key(sort_key);
        Ok(items)
    }

    fn max_order(&self) -> Result<i64, StoreError> {
        Ok(self
            .inner()
            .items
            .iter()
            .map(|item| item.entry.order)
            .max()
            .unwrap_or(UNORDERED))
    }

    fn delete(&self, id: EntryId) -> Result<(), StoreError> {
        let mut inner = self.inner();
        let before = inner.items.len();
        inner.items.retain(|item| item.entry.id != Some(id));
        if inner.items.len() == before {
            return Err(StoreError::NotFound { id });
        }
        Ok(())
    }

    fn delete_where(&self, read: bool) -> Result<usize, StoreError> {
        let mut inner = self.inner();
        let before = inner.items.len();
        inner.items.retain(|item| item.is_read != read);
        Ok(before - inner.items.len())
    }
}
