// Free Space Map Accessor (spec.md §4.4): encodes the used-space percentage
// of any page as a single byte inside a dedicated FSM page, via the buffer
// pool. An FSM page is an ordinary page: the accessor pins it, reads or
// writes one byte, and unpins (marking dirty on writes). It never touches
// the Storage Manager directly.

use crate::error::Result;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::PageId;
use std::sync::Arc;

pub struct FsmAccessor {
    pool: Arc<BufferPoolManager>,
    page_size: u32,
}

impl FsmAccessor {
    pub fn new(pool: Arc<BufferPoolManager>, page_size: u32) -> Self {
        Self { pool, page_size }
    }

    /// `fsmPageId = floor(pageId / pageSize) * pageSize`, `offset = pageId mod pageSize`.
    fn addressing(&self, page_id: PageId) -> (PageId, usize) {
        let page_size = self.page_size as PageId;
        let fsm_page_id = (page_id / page_size) * page_size;
        let offset = (page_id % page_size) as usize;
        (fsm_page_id, offset)
    }

    /// Read the used-space percentage for `page_id`.
    pub async fn get_used_space_percent(&self, page_id: PageId) -> Result<u8> {
        let (fsm_page_id, offset) = self.addressing(page_id);
        let buffer = self.pool.get_page(fsm_page_id).await?;
        let pct = buffer[offset];
        self.pool.unpin_page(fsm_page_id, false).await;
        Ok(pct)
    }

    /// Write the used-space percentage for `page_id`.
    pub async fn set_used_space_percent(&self, page_id: PageId, pct: u8) -> Result<()> {
        let (fsm_page_id, offset) = self.addressing(page_id);
        self.pool.get_page(fsm_page_id).await?;
        self.pool.write_page_byte(fsm_page_id, offset, pct).await?;
        self.pool.unpin_page(fsm_page_id, true).await;
        Ok(())
    }

    /// Free bytes implied by a used-space percentage.
    ///
    /// spec.md §9 flags the source's literal formula `(100 - pct) * pageSize`
    /// as almost certainly wrong (it overstates free bytes 100x for any
    /// non-zero `pct`, since `pct` is a percentage). This implements the
    /// corrected reading: `((100 - pct) * pageSize) / 100`.
    pub fn free_space_left_bytes(&self, pct: u8) -> usize {
        ((100 - pct as usize) * self.page_size as usize) / 100
    }
}
