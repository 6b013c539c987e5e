use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, MappedRwLockReadGuard, MappedRwLockWriteGuard, RawRwLock};

use crate::buffer::buffer_pool_manager::BufferPoolManager;
use crate::common::config::PageId;
use crate::storage::page::page::Page;

/// A pinned page with no latch held on its data buffer. Holds the pin for as
/// long as the guard is alive and calls `unpin_page` on `Drop`, so callers
/// cannot forget to unpin ("callers receive a borrowed view valid for
/// the duration of their pin").
pub struct PageGuard {
    bpm: Arc<BufferPoolManager>,
    page: Page,
    is_dirty: bool,
}

impl PageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: Page) -> PageGuard {
        Self {
            bpm,
            page,
            is_dirty: false,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page
            .get_page_id()
            .expect("guard holds a pin on a resident page")
    }

    pub fn get_data(&self) -> MappedRwLockReadGuard<'_, [u8; crate::common::config::PAGE_SIZE]> {
        self.page.get_data()
    }

    pub fn get_data_mut(&mut self) -> MappedRwLockWriteGuard<'_, [u8; crate::common::config::PAGE_SIZE]> {
        self.is_dirty = true;
        self.page.get_data_mut()
    }

    /// Upgrades to a `ReadPageGuard`. The protected page is not evicted
    /// during the upgrade; `self` is consumed so its `Drop` does not also
    /// unpin.
    pub fn upgrade_read(self) -> ReadPageGuard {
        let data = self.page.data_read_arc();
        let (bpm, page, is_dirty) = self.into_parts();
        ReadPageGuard {
            bpm,
            page,
            is_dirty,
            data,
        }
    }

    /// Upgrades to a `WritePageGuard`. Same contract as `upgrade_read`.
    pub fn upgrade_write(self) -> WritePageGuard {
        let data = self.page.data_write_arc();
        let (bpm, page, is_dirty) = self.into_parts();
        WritePageGuard {
            bpm,
            page,
            is_dirty,
            data,
        }
    }

    fn into_parts(self) -> (Arc<BufferPoolManager>, Page, bool) {
        let me = std::mem::ManuallyDrop::new(self);
        let bpm = me.bpm.clone();
        let page = me.page.clone();
        let is_dirty = me.is_dirty;
        (bpm, page, is_dirty)
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let page_id = self
            .page
            .get_page_id()
            .expect("guard holds a pin on a resident page");
        self.bpm.unpin_page(page_id, self.is_dirty);
    }
}

/// A pinned page with its data buffer latched for reading. The latch is
/// acquired eagerly at construction and released (alongside the pin) on
/// `Drop`.
pub struct ReadPageGuard {
    bpm: Arc<BufferPoolManager>,
    page: Page,
    is_dirty: bool,
    data: ArcRwLockReadGuard<RawRwLock, [u8; crate::common::config::PAGE_SIZE]>,
}

impl ReadPageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: Page) -> Self {
        let data = page.data_read_arc();
        Self {
            bpm,
            page,
            is_dirty: false,
            data,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page
            .get_page_id()
            .expect("guard holds a pin on a resident page")
    }

    pub fn get_data(&self) -> &[u8; crate::common::config::PAGE_SIZE] {
        &self.data
    }
}

impl Drop for ReadPageGuard {
    fn drop(&mut self) {
        let page_id = self
            .page
            .get_page_id()
            .expect("guard holds a pin on a resident page");
        self.bpm.unpin_page(page_id, self.is_dirty);
    }
}

/// A pinned page with its data buffer latched for writing.
pub struct WritePageGuard {
    bpm: Arc<BufferPoolManager>,
    page: Page,
    is_dirty: bool,
    data: ArcRwLockWriteGuard<RawRwLock, [u8; crate::common::config::PAGE_SIZE]>,
}

impl WritePageGuard {
    pub(crate) fn new(bpm: Arc<BufferPoolManager>, page: Page) -> Self {
        let data = page.data_write_arc();
        Self {
            bpm,
            page,
            is_dirty: false,
            data,
        }
    }

    pub fn page_id(&self) -> PageId {
        self.page
            .get_page_id()
            .expect("guard holds a pin on a resident page")
    }

    pub fn get_data(&self) -> &[u8; crate::common::config::PAGE_SIZE] {
        &self.data
    }

    pub fn get_data_mut(&mut self) -> &mut [u8; crate::common::config::PAGE_SIZE] {
        self.is_dirty = true;
        &mut self.data
    }
}

impl Drop for WritePageGuard {
    fn drop(&mut self) {
        let page_id = self
            .page
            .get_page_id()
            .expect("guard holds a pin on a resident page");
        self.bpm.unpin_page(page_id, self.is_dirty);
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::buffer::lru_replacer::LruReplacer;
    use crate::storage::disk::disk_manager::DiskManager;

    fn new_bpm(pool_size: usize) -> (Arc<BufferPoolManager>, TempDir, crate::common::config::FileId) {
        let dir = TempDir::new().unwrap();
        let db_file = dir.path().join("test.db");
        let disk_manager = DiskManager::new();
        disk_manager.create_file(&db_file).unwrap();
        let file_id = disk_manager.open_file(&db_file).unwrap();
        let bpm = Arc::new(BufferPoolManager::new(
            pool_size,
            disk_manager,
            LruReplacer::new(),
        ));
        (bpm, dir, file_id)
    }

    #[test]
    fn basic_guard_unpins_on_drop() {
        let (bpm, _dir, file_id) = new_bpm(2);
        let (_page_id, page) = bpm.new_page(file_id).unwrap();
        assert_eq!(page.get_pin_count(), 1);

        let guard = PageGuard::new(bpm.clone(), page.clone());
        assert_eq!(page.get_pin_count(), 1);
        drop(guard);
        assert_eq!(page.get_pin_count(), 0);
    }

    #[test]
    fn write_guard_marks_dirty_and_unpins() {
        let (bpm, _dir, file_id) = new_bpm(2);
        let (page_id, page) = bpm.new_page(file_id).unwrap();

        {
            let mut guard = bpm.clone().fetch_page_write(page_id).unwrap();
            guard.get_data_mut()[0] = 7;
        }
        assert_eq!(page.get_pin_count(), 0);
        assert!(page.is_dirty());
    }

    #[test]
    fn read_guard_does_not_mark_dirty() {
        let (bpm, _dir, file_id) = new_bpm(2);
        let (page_id, page) = bpm.new_page(file_id).unwrap();
        page.clear_dirty();

        {
            let guard = bpm.clone().fetch_page_read(page_id).unwrap();
            assert_eq!(guard.get_data()[0], 0);
        }
        assert!(!page.is_dirty());
    }

    #[test]
    fn upgrade_read_preserves_pin_and_dirty() {
        let (bpm, _dir, file_id) = new_bpm(2);
        let (_page_id, page) = bpm.new_page(file_id).unwrap();

        let mut basic = PageGuard::new(bpm.clone(), page.clone());
        basic.get_data_mut()[0] = 9;
        let read_guard = basic.upgrade_read();
        assert_eq!(page.get_pin_count(), 1);
        assert_eq!(read_guard.get_data()[0], 9);
        drop(read_guard);
        assert_eq!(page.get_pin_count(), 0);
        assert!(page.is_dirty());
    }
}
