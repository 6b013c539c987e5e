//! Buffer pool manager: frame array, page table, free list, and eviction.
//!
//! The pool's single mutex (`state`) serializes every public operation's
//! state-mutating region. The Replacer has its own internal
//! mutex; this manager always acquires `state` before touching the replacer
//! (lock ordering pool -> replacer).
//! Disk I/O for a victim write-back or a page read happens while `state` is
//! held, serializing all I/O through the pool — a deliberate trade-off that
//! eliminates races between two threads racing to materialize the same page
//! into different frames.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::buffer::lru_replacer::LruReplacer;
use crate::common::config::{FileId, FrameId, PageId, PAGE_SIZE};
use crate::error::Result;
use crate::storage::disk::disk_manager::DiskManager;
use crate::storage::page::page::Page;
use crate::storage::page::page_guard::{PageGuard, ReadPageGuard, WritePageGuard};

struct PoolState {
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
}

/// Owns the frame array and mediates all page acquisitions, invoking the
/// Disk Manager for I/O and the Replacer for victim selection.
pub struct BufferPoolManager {
    pool_size: usize,
    pages: Vec<Page>,
    disk_manager: DiskManager,
    state: Mutex<PoolState>,
    replacer: LruReplacer,
}

impl BufferPoolManager {
    pub fn new(
        pool_size: usize,
        disk_manager: DiskManager,
        replacer: LruReplacer,
    ) -> BufferPoolManager {
        assert!(pool_size >= 1, "pool_size must be at least 1");
        let free_list = (0..pool_size).rev().collect();
        Self {
            pool_size,
            pages: (0..pool_size).map(|_| Page::new()).collect(),
            disk_manager,
            state: Mutex::new(PoolState {
                page_table: HashMap::new(),
                free_list,
            }),
            replacer,
        }
    }

    /// Number of frames in the pool.
    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// All frames in the pool, for introspection and testing.
    pub fn get_pages(&self) -> &[Page] {
        &self.pages
    }

    /// Picks a replacement frame: the free list front if non-empty
    /// (free frames carry no write-back cost), otherwise a replacer victim.
    /// A replacer victim is evicted in place before being returned.
    fn find_victim_frame(&self, state: &mut PoolState) -> Result<Option<FrameId>> {
        if let Some(frame_id) = state.free_list.pop() {
            return Ok(Some(frame_id));
        }
        let Some(frame_id) = self.replacer.victim() else {
            return Ok(None);
        };
        self.update_page(state, frame_id)?;
        Ok(Some(frame_id))
    }

    /// Transitions `frame_id` from its old resident state to empty: writes
    /// back if dirty, removes the old `PageId` from the page table, zeros
    /// the data buffer, and clears `dirty`/`pin_count`. If
    /// write-back fails the frame is left dirty and resident and no
    /// page-table mutation occurs; the frame is handed back to the replacer
    /// so it remains a discoverable eviction candidate instead of vanishing
    /// from {free list, LRU, pinned} entirely.
    fn update_page(&self, state: &mut PoolState, frame_id: FrameId) -> Result<()> {
        let page = &self.pages[frame_id];
        if page.is_dirty() {
            let page_id = page.get_page_id().expect("dirty frame must be resident");
            if let Err(err) = self.disk_manager.write_page(
                page_id.file_id,
                page_id.page_no,
                &page.get_data()[..],
                PAGE_SIZE,
            ) {
                warn!(%page_id, frame_id, "update_page: write-back failed, frame stays resident");
                self.replacer.unpin(frame_id);
                return Err(err);
            }
            page.clear_dirty();
        }
        if let Some(old_page_id) = page.get_page_id() {
            state.page_table.remove(&old_page_id);
        }
        page.reset();
        Ok(())
    }

    /// Fetches `page_id` from the pool, reading it from disk on a miss.
    /// Returns `None` if the page table misses and every frame is pinned
    /// (pool exhaustion: all frames pinned).
    pub fn fetch_page(&self, page_id: PageId) -> Result<Option<Page>> {
        let mut state = self.state.lock();

        if let Some(&frame_id) = state.page_table.get(&page_id) {
            let page = &self.pages[frame_id];
            page.pin();
            self.replacer.pin(frame_id);
            trace!(%page_id, frame_id, "fetch_page: hit");
            return Ok(Some(page.clone()));
        }

        let Some(frame_id) = self.find_victim_frame(&mut state)? else {
            warn!(%page_id, "fetch_page: pool exhausted");
            return Ok(None);
        };

        let page = &self.pages[frame_id];
        let mut buf = [0u8; PAGE_SIZE];
        if let Err(err) = self
            .disk_manager
            .read_page(page_id.file_id, page_id.page_no, &mut buf, PAGE_SIZE)
        {
            // The frame was already carved out of the free list (or reset
            // and removed from the replacer) by `find_victim_frame`; since
            // we never install it in the page table, hand it straight back
            // to the free list instead of orphaning it.
            state.free_list.push(frame_id);
            return Err(match err {
                // A short read on a known, open file means page_no was never
                // allocated on disk: a more specific signal than a generic
                // I/O short read.
                crate::error::BufferPoolError::ShortRead { .. } => {
                    crate::error::BufferPoolError::InvalidPageId(page_id)
                }
                other => other,
            });
        }
        page.get_data_mut().copy_from_slice(&buf);
        page.set_page_id(page_id);
        page.pin();
        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);
        debug!(%page_id, frame_id, "fetch_page: read from disk");
        Ok(Some(page.clone()))
    }

    /// `fetch_page` wrapped in a `PageGuard` that unpins on `Drop`.
    pub fn fetch_page_basic(self: &Arc<Self>, page_id: PageId) -> Result<Option<PageGuard>> {
        Ok(self
            .fetch_page(page_id)?
            .map(|page| PageGuard::new(self.clone(), page)))
    }

    /// `fetch_page` wrapped in a `ReadPageGuard` (data latched for reading).
    pub fn fetch_page_read(self: &Arc<Self>, page_id: PageId) -> Result<Option<ReadPageGuard>> {
        Ok(self
            .fetch_page(page_id)?
            .map(|page| ReadPageGuard::new(self.clone(), page)))
    }

    /// `fetch_page` wrapped in a `WritePageGuard` (data latched for writing).
    pub fn fetch_page_write(self: &Arc<Self>, page_id: PageId) -> Result<Option<WritePageGuard>> {
        Ok(self
            .fetch_page(page_id)?
            .map(|page| WritePageGuard::new(self.clone(), page)))
    }

    /// Allocates a fresh page in `file_id` and installs it in a frame. The
    /// page is zeroed in memory but **not** written to disk; it becomes
    /// durable on eviction or explicit flush.
    pub fn new_page(&self, file_id: FileId) -> Result<Option<(PageId, Page)>> {
        let mut state = self.state.lock();

        let Some(frame_id) = self.find_victim_frame(&mut state)? else {
            warn!(file_id, "new_page: pool exhausted");
            return Ok(None);
        };

        let page_no = match self.disk_manager.allocate_page(file_id) {
            Ok(page_no) => page_no,
            Err(err) => {
                // Same rationale as `fetch_page`: the frame is already
                // carved out and not yet installed anywhere, so return it
                // to the free list rather than orphaning it.
                state.free_list.push(frame_id);
                return Err(err);
            }
        };
        let page_id = PageId::new(file_id, page_no);

        let page = &self.pages[frame_id];
        page.set_page_id(page_id);
        page.pin();
        state.page_table.insert(page_id, frame_id);
        self.replacer.pin(frame_id);
        debug!(%page_id, frame_id, "new_page");
        Ok(Some((page_id, page.clone())))
    }

    /// `new_page` wrapped in a `PageGuard`.
    pub fn new_page_guarded(self: &Arc<Self>, file_id: FileId) -> Result<Option<PageGuard>> {
        Ok(self
            .new_page(file_id)?
            .map(|(_, page)| PageGuard::new(self.clone(), page)))
    }

    /// Decrements `page_id`'s pin count; if it reaches zero, the frame
    /// becomes evictable. Returns `false` if `page_id` is not resident
    /// (idempotent, not an error). Decrementing an already-zero pin count
    /// is a caller bug: detected with
    /// `debug_assert!`, logged, and ignored in release builds.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };

        let page = &self.pages[frame_id];
        match page.unpin() {
            Some(0) => {
                page.set_dirty(is_dirty);
                self.replacer.unpin(frame_id);
            }
            Some(_) => page.set_dirty(is_dirty),
            None => {
                debug_assert!(false, "unpin_page: pin count underflow for {page_id}");
                warn!(%page_id, "unpin_page: pin count already zero, ignoring");
                return false;
            }
        }
        true
    }

    /// Writes `page_id`'s current contents to disk unconditionally and
    /// clears `dirty`, regardless of pin count. Returns `false` if not
    /// resident.
    pub fn flush_page(&self, page_id: PageId) -> Result<bool> {
        let state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        let page = &self.pages[frame_id];
        self.disk_manager.write_page(
            page_id.file_id,
            page_id.page_no,
            &page.get_data()[..],
            PAGE_SIZE,
        )?;
        page.clear_dirty();
        trace!(%page_id, "flush_page");
        Ok(true)
    }

    /// Flushes every resident page belonging to `file_id`.
    pub fn flush_all_pages(&self, file_id: FileId) -> Result<()> {
        let state = self.state.lock();
        for (&page_id, &frame_id) in state.page_table.iter() {
            if page_id.file_id != file_id {
                continue;
            }
            let page = &self.pages[frame_id];
            self.disk_manager.write_page(
                page_id.file_id,
                page_id.page_no,
                &page.get_data()[..],
                PAGE_SIZE,
            )?;
            page.clear_dirty();
        }
        debug!(file_id, "flush_all_pages");
        Ok(())
    }

    /// Removes `page_id` from the pool. Returns `true` if it wasn't
    /// resident (nothing to do), `false` if it is resident and pinned
    /// (caller must unpin first), or `true` after resetting and freeing
    /// its frame.
    pub fn delete_page(&self, page_id: PageId) -> Result<bool> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(true);
        };

        let page = &self.pages[frame_id];
        if page.get_pin_count() > 0 {
            return Ok(false);
        }

        state.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        page.reset();
        state.free_list.push(frame_id);
        debug!(%page_id, frame_id, "delete_page");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use rand::distributions::{Distribution, Uniform};
    use tempfile::TempDir;

    use super::*;

    fn new_bpm(pool_size: usize, dir: &TempDir) -> (BufferPoolManager, FileId) {
        let path = dir.path().join("test.db");
        let disk_manager = DiskManager::new();
        disk_manager.create_file(&path).unwrap();
        let file_id = disk_manager.open_file(&path).unwrap();
        (BufferPoolManager::new(pool_size, disk_manager, LruReplacer::new()), file_id)
    }

    #[test]
    fn binary_data_round_trips_through_eviction_and_refetch() {
        let _ = tracing_subscriber::fmt::try_init();

        let dir = TempDir::new().unwrap();
        let (bpm, file_id) = new_bpm(10, &dir);

        let mut rng = rand::thread_rng();
        let uniform = Uniform::from(u8::MIN..=u8::MAX);
        let mut data: Vec<u8> = (0..PAGE_SIZE).map(|_| uniform.sample(&mut rng)).collect();
        data[PAGE_SIZE / 2] = 0;
        data[PAGE_SIZE - 1] = 0;

        let (page0_id, page0) = bpm.new_page(file_id).unwrap().unwrap();
        page0.get_data_mut().copy_from_slice(&data);
        assert_eq!(&page0.get_data()[..], &data[..]);

        for _ in 1..10 {
            assert!(bpm.new_page(file_id).unwrap().is_some());
        }
        for _ in 10..20 {
            assert!(bpm.new_page(file_id).unwrap().is_none());
        }

        for i in 0..5u32 {
            let pid = PageId::new(file_id, i);
            assert!(bpm.unpin_page(pid, true));
            bpm.flush_page(pid).unwrap();
        }
        for _ in 0..5 {
            let (pid, _) = bpm.new_page(file_id).unwrap().unwrap();
            bpm.unpin_page(pid, false);
        }

        let refetched = bpm.fetch_page(page0_id).unwrap().unwrap();
        assert_eq!(&refetched.get_data()[..], &data[..]);
        assert!(bpm.unpin_page(page0_id, true));
    }

    #[test]
    fn scenario_lru_ordering() {
        let dir = TempDir::new().unwrap();
        let (bpm, file_id) = new_bpm(3, &dir);

        let (a, _) = bpm.new_page(file_id).unwrap().unwrap();
        bpm.unpin_page(a, false);
        let (b, page_b) = bpm.new_page(file_id).unwrap().unwrap();
        bpm.unpin_page(b, false);
        let (c, _) = bpm.new_page(file_id).unwrap().unwrap();
        bpm.unpin_page(c, false);

        bpm.fetch_page(a).unwrap().unwrap();
        bpm.unpin_page(a, false);

        let (d, _) = bpm.new_page(file_id).unwrap().unwrap();

        // B was least-recently-unpinned: its frame (same underlying `Page`)
        // was reused for D.
        assert_eq!(page_b.get_page_id(), Some(d));

        // A and C are still resident and fetchable without needing a new frame.
        assert!(bpm.fetch_page(a).unwrap().is_some());
        bpm.unpin_page(a, false);
        assert!(bpm.fetch_page(c).unwrap().is_some());
        bpm.unpin_page(c, false);
    }

    #[test]
    fn scenario_dirty_write_back_on_eviction() {
        let dir = TempDir::new().unwrap();
        let (bpm, file_id) = new_bpm(1, &dir);

        let (a, page_a) = bpm.new_page(file_id).unwrap().unwrap();
        page_a.get_data_mut().fill(b'X');
        bpm.unpin_page(a, true);

        let (_b, _) = bpm.new_page(file_id).unwrap().unwrap();

        let path = dir.path().join("test.db");
        let disk_manager = DiskManager::new();
        let file_id2 = disk_manager.open_file(&path).unwrap();
        let mut buf = [0u8; PAGE_SIZE];
        disk_manager
            .read_page(file_id2, a.page_no, &mut buf, PAGE_SIZE)
            .unwrap();
        assert!(buf.iter().all(|&b| b == b'X'));
    }

    #[test]
    fn scenario_pool_exhaustion() {
        let dir = TempDir::new().unwrap();
        let (bpm, file_id) = new_bpm(2, &dir);

        let (a, _) = bpm.new_page(file_id).unwrap().unwrap();
        let (b, _) = bpm.new_page(file_id).unwrap().unwrap();
        assert_eq!(a.page_no, 0);
        assert_eq!(b.page_no, 1);

        // Both frames are pinned; the third call fails and leaves state
        // (and allocation) untouched.
        assert!(bpm.new_page(file_id).unwrap().is_none());
        assert!(bpm.new_page(file_id).unwrap().is_none());

        assert!(bpm.fetch_page(a).unwrap().is_some());
        bpm.unpin_page(a, false);
        bpm.unpin_page(a, false);
        assert!(bpm.fetch_page(b).unwrap().is_some());
        bpm.unpin_page(b, false);
        bpm.unpin_page(b, false);
    }

    #[test]
    fn scenario_double_fetch_pin_counting() {
        let dir = TempDir::new().unwrap();
        let (bpm, file_id) = new_bpm(1, &dir);

        let (a, _) = bpm.new_page(file_id).unwrap().unwrap();
        bpm.unpin_page(a, false);

        let page_first = bpm.fetch_page(a).unwrap().unwrap();
        let _page_second = bpm.fetch_page(a).unwrap().unwrap();
        assert_eq!(page_first.get_pin_count(), 2);

        bpm.unpin_page(a, false);
        // Still pinned once: the pool (size 1) cannot evict A for a new page.
        assert!(bpm.new_page(file_id).unwrap().is_none());

        bpm.unpin_page(a, false);
        assert_eq!(page_first.get_pin_count(), 0);
        assert!(bpm.new_page(file_id).unwrap().is_some());
    }

    #[test]
    fn scenario_flush_then_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let disk_manager = DiskManager::new();
        disk_manager.create_file(&path).unwrap();
        let file_id = disk_manager.open_file(&path).unwrap();
        let bpm = BufferPoolManager::new(1, disk_manager, LruReplacer::new());

        let (a, page_a) = bpm.new_page(file_id).unwrap().unwrap();
        page_a.get_data_mut().fill(b'Y');
        bpm.unpin_page(a, true);
        bpm.flush_page(a).unwrap();
        drop(bpm);

        let disk_manager = DiskManager::new();
        let file_id = disk_manager.open_file(&path).unwrap();
        let bpm = BufferPoolManager::new(1, disk_manager, LruReplacer::new());
        let page_a = bpm.fetch_page(a).unwrap().unwrap();
        assert!(page_a.get_data().iter().all(|&b| b == b'Y'));
        let _ = file_id;
    }

    #[test]
    fn scenario_delete_unpinned_page() {
        let dir = TempDir::new().unwrap();
        let (bpm, file_id) = new_bpm(2, &dir);

        let (a, _) = bpm.new_page(file_id).unwrap().unwrap();
        bpm.unpin_page(a, false);
        assert!(bpm.delete_page(a).unwrap());
        // Deleting again is a no-op that still reports success.
        assert!(bpm.delete_page(a).unwrap());
    }

    #[test]
    fn delete_page_refuses_while_pinned() {
        let dir = TempDir::new().unwrap();
        let (bpm, file_id) = new_bpm(2, &dir);
        let (a, _) = bpm.new_page(file_id).unwrap().unwrap();
        assert!(!bpm.delete_page(a).unwrap());
        bpm.unpin_page(a, false);
        assert!(bpm.delete_page(a).unwrap());
    }

    #[test]
    fn fetch_page_error_does_not_orphan_the_frame() {
        let dir = TempDir::new().unwrap();
        let (bpm, file_id) = new_bpm(1, &dir);

        // page_no 0 was never allocated: the file is empty, so the read
        // behind this fetch short-reads and the call fails. The single
        // frame it carved off the free list must not vanish.
        let err = bpm
            .fetch_page(PageId::new(file_id, 0))
            .expect_err("fetching an unallocated page must fail");
        assert!(matches!(err, crate::error::BufferPoolError::InvalidPageId(_)));

        // The pool must still have a usable frame, not be permanently
        // exhausted.
        assert!(bpm.new_page(file_id).unwrap().is_some());
    }

    #[test]
    fn new_page_error_does_not_orphan_the_frame() {
        let dir = TempDir::new().unwrap();
        let (bpm, file_id) = new_bpm(1, &dir);

        // An unopened file_id makes `allocate_page` fail after the frame has
        // already been carved off the free list.
        let bogus_file_id = file_id + 1;
        let err = bpm
            .new_page(bogus_file_id)
            .expect_err("allocating in an unopened file must fail");
        assert!(matches!(err, crate::error::BufferPoolError::FileNotOpen(_)));

        // The frame must have been returned to the free list, not lost.
        assert!(bpm.new_page(file_id).unwrap().is_some());
    }
}
