use std::sync::Arc;

use parking_lot::{
    ArcRwLockReadGuard, ArcRwLockWriteGuard, MappedRwLockReadGuard, MappedRwLockWriteGuard,
    Mutex, RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard,
};

use crate::common::config::{PageId, PAGE_SIZE};

#[derive(Debug)]
struct PageMeta {
    page_id: Option<PageId>,
    pin_count: i64,
    is_dirty: bool,
}

/// `Page` is the frame contents: a fixed-size data
/// buffer plus the bookkeeping the Buffer Pool Manager needs (page id, pin
/// count, dirty flag). One `Page` exists per frame in the pool's frame
/// array, constructed once at pool construction and reused for the pool's
/// lifetime; its `PageId`/pin/dirty state is overwritten in place as frames
/// are recycled between residents.
///
/// Data and metadata live behind independent locks so that a page's byte
/// buffer can be latched (see `ReadPageGuard`/`WritePageGuard`) without
/// blocking the pin/dirty bookkeeping the Buffer Pool Manager needs to
/// mutate on every `fetch`/`unpin`, and vice versa. `Page` is a cheap
/// `Clone` (both fields are `Arc`s) so a pinned frame can be handed to a
/// caller without that caller holding the pool-wide latch.
#[derive(Debug, Clone)]
pub struct Page {
    data: Arc<RwLock<[u8; PAGE_SIZE]>>,
    meta: Arc<Mutex<PageMeta>>,
}

impl Page {
    /// Constructs a frame with a zeroed, unoccupied page.
    pub fn new() -> Page {
        Page {
            data: Arc::new(RwLock::new([0; PAGE_SIZE])),
            meta: Arc::new(Mutex::new(PageMeta {
                page_id: None,
                pin_count: 0,
                is_dirty: false,
            })),
        }
    }

    /// Resets the frame to its unoccupied state: zeroed data, no page id,
    /// zero pin count, not dirty. Used when a frame is returned to the free
    /// list after `delete_page`, or before it is repurposed for a new
    /// resident page.
    pub fn reset(&self) {
        self.data.write().fill(0);
        let mut meta = self.meta.lock();
        meta.page_id = None;
        meta.pin_count = 0;
        meta.is_dirty = false;
    }

    pub fn get_data(&self) -> MappedRwLockReadGuard<'_, [u8; PAGE_SIZE]> {
        RwLockReadGuard::map(self.data.read(), |d| d)
    }

    pub fn get_data_mut(&self) -> MappedRwLockWriteGuard<'_, [u8; PAGE_SIZE]> {
        RwLockWriteGuard::map(self.data.write(), |d| d)
    }

    /// Acquires the page's data lock for reading and returns an owned guard
    /// (does not borrow from `self`), for use by `ReadPageGuard`.
    pub(crate) fn data_read_arc(&self) -> ArcRwLockReadGuard<RawRwLock, [u8; PAGE_SIZE]> {
        RwLock::read_arc(&self.data)
    }

    /// Acquires the page's data lock for writing and returns an owned
    /// guard, for use by `WritePageGuard`.
    pub(crate) fn data_write_arc(&self) -> ArcRwLockWriteGuard<RawRwLock, [u8; PAGE_SIZE]> {
        RwLock::write_arc(&self.data)
    }

    pub fn set_page_id(&self, page_id: PageId) {
        self.meta.lock().page_id = Some(page_id);
    }

    pub fn get_page_id(&self) -> Option<PageId> {
        self.meta.lock().page_id
    }

    pub fn get_pin_count(&self) -> i64 {
        self.meta.lock().pin_count
    }

    pub fn pin(&self) {
        self.meta.lock().pin_count += 1;
    }

    /// Decrements the pin count. Returns the pin count after decrementing,
    /// or `None` if it was already zero (caller bug; see
    /// `UnpinUnderflow`).
    pub fn unpin(&self) -> Option<i64> {
        let mut meta = self.meta.lock();
        if meta.pin_count <= 0 {
            return None;
        }
        meta.pin_count -= 1;
        Some(meta.pin_count)
    }

    pub fn is_dirty(&self) -> bool {
        self.meta.lock().is_dirty
    }

    /// `dirty |= is_dirty`: a page only ever becomes *more*
    /// dirty from a caller's perspective; a prior unflushed write must
    /// survive until the next flush or eviction write-back.
    pub fn set_dirty(&self, is_dirty: bool) {
        if is_dirty {
            self.meta.lock().is_dirty = true;
        }
    }

    pub fn clear_dirty(&self) {
        self.meta.lock().is_dirty = false;
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new()
    }
}
