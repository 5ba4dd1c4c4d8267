// Buffer Pool Manager (spec.md §4.3): a two-queue (history + cache)
// residency policy over pages fetched through the Storage Manager, with
// pin counts, dirty tracking, and write-back eviction.
//
// State (the resident arena, both recency lists, pin counts, and dirty
// flags) lives behind a single `tokio::sync::Mutex`, held for the full
// duration of each public operation including its internal storage I/O.
// This mirrors the source's single-threaded cooperative scheduling model
// (spec.md §5): at most one logical operation mutates buffer pool state at
// a time, so no mutation can ever straddle a suspension point as seen by a
// second caller. The I/O Queue's own 16-way concurrency ceiling still
// applies to the Storage Manager calls the pool makes; only the pool's own
// bookkeeping is serialized.

use crate::config::MIN_POOL_CAPACITY;
use crate::error::{DbError, Result};
use crate::storage::disk::StorageManager;
use crate::storage::page::{Page, PageId};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Which of the two recency lists an entry currently belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum List {
    History,
    Cache,
}

impl List {
    fn name(self) -> &'static str {
        match self {
            List::History => "history",
            List::Cache => "cache",
        }
    }
}

/// Which list a resident page is in, exposed for introspection/tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    History,
    Cache,
}

struct Entry {
    page: Page,
    list: List,
}

struct Inner {
    entries: HashMap<PageId, Entry>,
    history: VecDeque<PageId>,
    cache: VecDeque<PageId>,
}

/// Caches pages in memory behind a 2Q (history/cache) residency policy.
///
/// `N` is the configured capacity; `history_capacity = floor(N/4)` and
/// `cache_capacity = 3 * floor(N/4)` per spec.md §4.3.
pub struct BufferPoolManager {
    storage: Arc<StorageManager>,
    inner: Mutex<Inner>,
    history_capacity: usize,
    cache_capacity: usize,
}

impl BufferPoolManager {
    /// `capacity` must be >= 4 (spec.md §8's boundary behavior).
    pub fn new(capacity: usize, storage: Arc<StorageManager>) -> Result<Self> {
        if capacity < MIN_POOL_CAPACITY {
            return Err(DbError::ConfigOutOfRange(format!(
                "buffer pool capacity must be >= {MIN_POOL_CAPACITY}, got {capacity}"
            )));
        }
        let history_capacity = capacity / 4;
        let cache_capacity = 3 * history_capacity;
        Ok(Self {
            storage,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                history: VecDeque::new(),
                cache: VecDeque::new(),
            }),
            history_capacity,
            cache_capacity,
        })
    }

    pub fn history_capacity(&self) -> usize {
        self.history_capacity
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache_capacity
    }

    /// Allocate a new page through the Storage Manager, register it with a
    /// pin count of 1 and `dirty = true`, and return its id and buffer.
    pub async fn create_page(&self) -> Result<(PageId, Vec<u8>)> {
        let page_id = self.storage.allocate_page().await?;

        let mut inner = self.inner.lock().await;
        if inner.history.len() >= self.history_capacity {
            Self::evict(&mut inner, List::History, &self.storage).await?;
        }

        let mut page = Page::new(page_id, self.storage.page_size as usize);
        page.pin_count = 1;
        page.mark_dirty();
        let buffer = page.data.clone();
        inner.entries.insert(
            page_id,
            Entry {
                page,
                list: List::History,
            },
        );
        inner.history.push_back(page_id);
        debug!(page_id, "created page in history list");
        Ok((page_id, buffer))
    }

    /// Fetch a page, incrementing its pin count unconditionally before any
    /// residency lookup or eviction decision (spec.md §4.3).
    pub async fn get_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock().await;

        let current_list = inner.entries.get_mut(&page_id).map(|entry| {
            entry.page.pin_count += 1;
            entry.list
        });

        if let Some(list) = current_list {
            match list {
                List::Cache => {
                    touch(&mut inner.cache, page_id);
                }
                List::History => {
                    if inner.cache.len() >= self.cache_capacity {
                        Self::evict(&mut inner, List::Cache, &self.storage).await?;
                    }
                    inner.history.retain(|&id| id != page_id);
                    inner.cache.push_back(page_id);
                    if let Some(entry) = inner.entries.get_mut(&page_id) {
                        entry.list = List::Cache;
                    }
                    trace!(page_id, "promoted page history -> cache");
                }
            }
            return Ok(inner.entries[&page_id].page.data.clone());
        }

        // Not resident.
        if inner.history.len() >= self.history_capacity {
            Self::evict(&mut inner, List::History, &self.storage).await?;
        }
        let buffer = self.storage.read_page(page_id).await?;
        let mut page = Page::from_bytes(page_id, buffer.clone());
        page.pin_count = 1;
        inner.entries.insert(
            page_id,
            Entry {
                page,
                list: List::History,
            },
        );
        inner.history.push_back(page_id);
        trace!(page_id, "loaded page into history list");
        Ok(buffer)
    }

    /// Decrement the pin count if positive; sticky-set the dirty flag when
    /// `is_dirty` is true. A no-op for a page already at pin count 0.
    pub async fn unpin_page(&self, page_id: PageId, is_dirty: bool) {
        let mut inner = self.inner.lock().await;
        if let Some(entry) = inner.entries.get_mut(&page_id) {
            if entry.page.pin_count > 0 {
                entry.page.pin_count -= 1;
            }
            if is_dirty {
                entry.page.mark_dirty();
            }
        }
    }

    /// Overwrite a byte in a resident page's buffer. The page must already
    /// be pinned via `get_page`; used by the FSM accessor to encode a
    /// used-space percentage without a full page round-trip.
    pub async fn write_page_byte(&self, page_id: PageId, offset: usize, value: u8) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.get_mut(&page_id).ok_or_else(|| {
            DbError::Storage(format!("page {page_id} is not resident; call get_page first"))
        })?;
        entry.page.data[offset] = value;
        Ok(())
    }

    /// Write every dirty resident page back through the Storage Manager,
    /// awaiting each write before clearing its dirty flag (spec.md §9's
    /// resolution of the source's fire-and-forget `flushAll`).
    pub async fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let dirty_ids: Vec<PageId> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.page.is_dirty)
            .map(|(&id, _)| id)
            .collect();

        for page_id in dirty_ids {
            let buffer = inner.entries[&page_id].page.data.clone();
            self.storage.write_page(page_id, buffer).await?;
            if let Some(entry) = inner.entries.get_mut(&page_id) {
                entry.page.is_dirty = false;
            }
        }
        Ok(())
    }

    /// Current pin count, 0 if the page is not resident.
    pub async fn pin_count(&self, page_id: PageId) -> u32 {
        self.inner
            .lock()
            .await
            .entries
            .get(&page_id)
            .map(|e| e.page.pin_count)
            .unwrap_or(0)
    }

    /// Current dirty flag, `false` if the page is not resident.
    pub async fn is_dirty(&self, page_id: PageId) -> bool {
        self.inner
            .lock()
            .await
            .entries
            .get(&page_id)
            .map(|e| e.page.is_dirty)
            .unwrap_or(false)
    }

    /// Which list a resident page is in, `None` if it is not resident.
    pub async fn residency(&self, page_id: PageId) -> Option<Residency> {
        self.inner.lock().await.entries.get(&page_id).map(|e| match e.list {
            List::History => Residency::History,
            List::Cache => Residency::Cache,
        })
    }

    /// Scan `which` from the head (oldest) for the first entry with
    /// `pin_count == 0`. If found, write it back (when dirty) and remove it
    /// from its list; otherwise fail with `BufferPoolOverflow`.
    async fn evict(inner: &mut Inner, which: List, storage: &StorageManager) -> Result<()> {
        let list = match which {
            List::History => &inner.history,
            List::Cache => &inner.cache,
        };
        let victim = list
            .iter()
            .copied()
            .find(|id| inner.entries[id].page.pin_count == 0)
            .ok_or(DbError::BufferPoolOverflow(which.name()))?;

        if inner.entries[&victim].page.is_dirty {
            let buffer = inner.entries[&victim].page.data.clone();
            storage.write_page(victim, buffer).await?;
            if let Some(entry) = inner.entries.get_mut(&victim) {
                entry.page.is_dirty = false;
            }
            debug!(page_id = victim, list = which.name(), "wrote back dirty victim before eviction");
        }

        inner.entries.remove(&victim);
        let list_mut = match which {
            List::History => &mut inner.history,
            List::Cache => &mut inner.cache,
        };
        list_mut.retain(|&id| id != victim);
        trace!(page_id = victim, list = which.name(), "evicted page");
        Ok(())
    }
}

/// Move `page_id` to the tail of `list` (most-recently-touched position).
fn touch(list: &mut VecDeque<PageId>, page_id: PageId) {
    list.retain(|&id| id != page_id);
    list.push_back(page_id);
}
