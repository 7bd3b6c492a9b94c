//! Manages the buffer pool, a collection of in-memory frames that cache disk pages.
//!
//! One mutex guards the frame metadata, the page table, the free list, and
//! the replacer. Page contents live behind per-frame reader/writer latches
//! (`Arc<RwLock<Page>>`) so that RAII guards can hold a latch across scopes
//! while the pool keeps the frame pinned.

use std::collections::HashMap;
use std::io;
use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{Mutex, RawRwLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::disk::{DiskManager, DiskScheduler};
use crate::replacer::LruKReplacer;
use crate::{FrameId, Page, PageId, INVALID_PAGE_ID};

type PageLock = Arc<RwLock<Page>>;
type OwnedReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;
type OwnedWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;

#[derive(Debug, Clone, Copy)]
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn empty() -> Self {
        Self {
            page_id: INVALID_PAGE_ID,
            pin_count: 0,
            is_dirty: false,
        }
    }
}

struct PoolState {
    frame_meta: Vec<FrameMeta>,
    page_table: HashMap<PageId, FrameId>,
    free_list: Vec<FrameId>,
    next_page_id: PageId,
}

/// The buffer pool manager.
pub struct BufferPoolManager {
    frames: Vec<PageLock>,
    replacer: LruKReplacer,
    scheduler: DiskScheduler,
    state: Mutex<PoolState>,
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: DiskManager) -> Self {
        let next_page_id = disk_manager.num_pages as PageId;
        let frames = (0..pool_size)
            .map(|_| Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))))
            .collect();
        // Lowest frame ids pop first.
        let free_list: Vec<FrameId> = (0..pool_size).rev().collect();
        Self {
            frames,
            replacer: LruKReplacer::new(replacer_k),
            scheduler: DiskScheduler::new(disk_manager),
            state: Mutex::new(PoolState {
                frame_meta: vec![FrameMeta::empty(); pool_size],
                page_table: HashMap::new(),
                free_list,
                next_page_id,
            }),
        }
    }

    /// Finds a frame for a new occupant: the free list first, then eviction.
    /// The previous occupant, if any, is flushed when dirty and unmapped.
    fn acquire_frame(&self, state: &mut PoolState) -> io::Result<FrameId> {
        let frame_id = if let Some(frame_id) = state.free_list.pop() {
            frame_id
        } else if let Some(frame_id) = self.replacer.evict() {
            frame_id
        } else {
            return Err(io::Error::other("no evictable frame in the buffer pool"));
        };

        let meta = state.frame_meta[frame_id];
        if meta.page_id != INVALID_PAGE_ID {
            if meta.is_dirty {
                // The frame is unpinned, so no latch holder can exist.
                let data = Box::new(self.frames[frame_id].read().data);
                self.scheduler.write_page_sync(meta.page_id, data)?;
            }
            state.page_table.remove(&meta.page_id);
        }
        state.frame_meta[frame_id] = FrameMeta::empty();
        Ok(frame_id)
    }

    fn install(&self, state: &mut PoolState, frame_id: FrameId, page_id: PageId) {
        state.frame_meta[frame_id] = FrameMeta {
            page_id,
            pin_count: 1,
            is_dirty: false,
        };
        state.page_table.insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        self.replacer.set_evictable(frame_id, false);
    }

    /// Allocates a fresh page id, pins it into a frame, and returns a basic
    /// guard over the zeroed page.
    pub fn new_page(&self) -> io::Result<PageGuard<'_>> {
        let mut state = self.state.lock();
        let frame_id = self.acquire_frame(&mut state)?;
        let page_id = state.next_page_id;
        state.next_page_id += 1;
        self.frames[frame_id].write().reset(page_id);
        self.install(&mut state, frame_id, page_id);
        crate::stratum_debug_log!("[BufferPool::new_page] page {page_id} -> frame {frame_id}");
        Ok(PageGuard {
            bpm: self,
            page_id,
            frame: Some(self.frames[frame_id].clone()),
            is_dirty: false,
        })
    }

    /// Pins `page_id` into the pool, reading it from disk if it is not
    /// already resident, and returns a basic guard.
    pub fn acquire_page(&self, page_id: PageId) -> io::Result<PageGuard<'_>> {
        if page_id == INVALID_PAGE_ID {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "acquire of invalid page id",
            ));
        }
        let mut state = self.state.lock();
        if let Some(&frame_id) = state.page_table.get(&page_id) {
            state.frame_meta[frame_id].pin_count += 1;
            self.replacer.record_access(frame_id);
            self.replacer.set_evictable(frame_id, false);
            return Ok(PageGuard {
                bpm: self,
                page_id,
                frame: Some(self.frames[frame_id].clone()),
                is_dirty: false,
            });
        }

        let frame_id = self.acquire_frame(&mut state)?;
        let buf = self.scheduler.read_page_sync(page_id)?;
        {
            let mut page = self.frames[frame_id].write();
            page.id = page_id;
            page.data.copy_from_slice(&buf[..]);
        }
        self.install(&mut state, frame_id, page_id);
        crate::stratum_debug_log!("[BufferPool::acquire_page] page {page_id} -> frame {frame_id}");
        Ok(PageGuard {
            bpm: self,
            page_id,
            frame: Some(self.frames[frame_id].clone()),
            is_dirty: false,
        })
    }

    pub fn acquire_page_read(&self, page_id: PageId) -> io::Result<ReadPageGuard<'_>> {
        Ok(self.acquire_page(page_id)?.upgrade_read())
    }

    pub fn acquire_page_write(&self, page_id: PageId) -> io::Result<WritePageGuard<'_>> {
        Ok(self.acquire_page(page_id)?.upgrade_write())
    }

    /// Drops one pin. On the last pin the frame becomes evictable. The dirty
    /// flag is sticky: unpinning clean never clears a prior dirty mark.
    /// Returns false when the page is not resident or was not pinned.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> bool {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return false;
        };
        let meta = &mut state.frame_meta[frame_id];
        if meta.pin_count == 0 {
            return false;
        }
        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            self.replacer.set_evictable(frame_id, true);
        }
        true
    }

    /// Writes the page to disk regardless of the dirty flag, then clears it.
    pub fn flush_page(&self, page_id: PageId) -> io::Result<bool> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            return Ok(false);
        };
        let data = Box::new(self.frames[frame_id].read().data);
        self.scheduler.write_page_sync(page_id, data)?;
        state.frame_meta[frame_id].is_dirty = false;
        Ok(true)
    }

    pub fn flush_all_pages(&self) -> io::Result<()> {
        let mut state = self.state.lock();
        let resident: Vec<(PageId, FrameId)> =
            state.page_table.iter().map(|(&p, &f)| (p, f)).collect();
        for (page_id, frame_id) in resident {
            let data = Box::new(self.frames[frame_id].read().data);
            self.scheduler.write_page_sync(page_id, data)?;
            state.frame_meta[frame_id].is_dirty = false;
        }
        Ok(())
    }

    /// Evicts `page_id` from the pool and notifies the disk allocator.
    /// Fails (returns false) when the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> io::Result<bool> {
        let mut state = self.state.lock();
        let Some(&frame_id) = state.page_table.get(&page_id) else {
            self.scheduler.deallocate(page_id);
            return Ok(true);
        };
        if state.frame_meta[frame_id].pin_count > 0 {
            return Ok(false);
        }
        state.page_table.remove(&page_id);
        self.replacer.remove(frame_id);
        self.frames[frame_id].write().reset(INVALID_PAGE_ID);
        state.frame_meta[frame_id] = FrameMeta::empty();
        state.free_list.push(frame_id);
        self.scheduler.deallocate(page_id);
        Ok(true)
    }

    /// Test/diagnostic hook: the pin count of a resident page.
    pub fn pin_count(&self, page_id: PageId) -> Option<u32> {
        let state = self.state.lock();
        let &frame_id = state.page_table.get(&page_id)?;
        Some(state.frame_meta[frame_id].pin_count)
    }
}

/// An RAII pin on a page. Holds no latch; `read`/`write` take the page
/// latch for the duration of the returned borrow. Dropping the guard
/// releases the pin, with the dirty flag set if `write` was ever called.
pub struct PageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    /// Present until the guard is upgraded; the upgrade moves the frame
    /// into the latch guard and the pin into the upgraded guard.
    frame: Option<PageLock>,
    is_dirty: bool,
}

impl<'a> PageGuard<'a> {
    pub fn id(&self) -> PageId {
        self.page_id
    }

    fn frame(&self) -> &PageLock {
        self.frame.as_ref().expect("guard not upgraded")
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame().read()
    }

    pub fn write(&mut self) -> RwLockWriteGuard<'_, Page> {
        self.is_dirty = true;
        self.frame().write()
    }

    /// Converts into a guard that holds the shared latch for its lifetime.
    pub fn upgrade_read(mut self) -> ReadPageGuard<'a> {
        let frame = self.frame.take().expect("guard not upgraded");
        let guard = ReadPageGuard {
            bpm: self.bpm,
            page_id: self.page_id,
            is_dirty: self.is_dirty,
            latch: Some(frame.read_arc()),
        };
        // The pin moves into the new guard.
        std::mem::forget(self);
        guard
    }

    /// Converts into a guard that holds the exclusive latch for its lifetime.
    pub fn upgrade_write(mut self) -> WritePageGuard<'a> {
        let frame = self.frame.take().expect("guard not upgraded");
        let guard = WritePageGuard {
            bpm: self.bpm,
            page_id: self.page_id,
            latch: Some(frame.write_arc()),
        };
        std::mem::forget(self);
        guard
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// A pinned page held under its shared latch.
pub struct ReadPageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    is_dirty: bool,
    latch: Option<OwnedReadGuard>,
}

impl ReadPageGuard<'_> {
    pub fn id(&self) -> PageId {
        self.page_id
    }
}

impl std::ops::Deref for ReadPageGuard<'_> {
    type Target = Page;
    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("latch held until drop")
    }
}

impl Drop for ReadPageGuard<'_> {
    fn drop(&mut self) {
        // Latch before pin: a waiting writer may proceed while we unpin.
        self.latch.take();
        self.bpm.unpin_page(self.page_id, self.is_dirty);
    }
}

/// A pinned page held under its exclusive latch. Dropping marks it dirty.
pub struct WritePageGuard<'a> {
    bpm: &'a BufferPoolManager,
    page_id: PageId,
    latch: Option<OwnedWriteGuard>,
}

impl WritePageGuard<'_> {
    pub fn id(&self) -> PageId {
        self.page_id
    }
}

impl std::ops::Deref for WritePageGuard<'_> {
    type Target = Page;
    fn deref(&self) -> &Page {
        self.latch.as_ref().expect("latch held until drop")
    }
}

impl std::ops::DerefMut for WritePageGuard<'_> {
    fn deref_mut(&mut self) -> &mut Page {
        self.latch.as_mut().expect("latch held until drop")
    }
}

impl Drop for WritePageGuard<'_> {
    fn drop(&mut self) {
        self.latch.take();
        self.bpm.unpin_page(self.page_id, true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn pool(dir: &tempfile::TempDir, pool_size: usize, k: usize) -> BufferPoolManager {
        let dm = DiskManager::open(dir.path().join("test.db")).unwrap();
        BufferPoolManager::new(pool_size, k, dm)
    }

    #[test]
    fn new_page_allocates_monotonic_ids() {
        let dir = tempdir().unwrap();
        let bpm = pool(&dir, 4, 2);
        let p0 = bpm.new_page().unwrap();
        let p1 = bpm.new_page().unwrap();
        assert_eq!(p0.id(), 0);
        assert_eq!(p1.id(), 1);
    }

    #[test]
    fn pinned_pages_cannot_be_evicted() {
        let dir = tempdir().unwrap();
        let bpm = pool(&dir, 2, 2);
        let _p0 = bpm.new_page().unwrap();
        let _p1 = bpm.new_page().unwrap();
        assert!(bpm.new_page().is_err());
    }

    #[test]
    fn unpin_makes_frame_reusable_and_dirty_page_survives() {
        let dir = tempdir().unwrap();
        let bpm = pool(&dir, 2, 2);
        let p0_id = {
            let mut p0 = bpm.new_page().unwrap();
            p0.write().data[0] = 0x5A;
            p0.id()
        };
        let _p1 = bpm.new_page().unwrap();
        // p0 was unpinned by guard drop; this eviction must flush it.
        let _p2 = bpm.new_page().unwrap();

        let p0 = bpm.acquire_page(p0_id).unwrap();
        assert_eq!(p0.read().data[0], 0x5A);
    }

    #[test]
    fn unpin_dirty_flag_is_sticky() {
        let dir = tempdir().unwrap();
        let bpm = pool(&dir, 2, 2);
        let p0 = bpm.new_page().unwrap();
        let id = p0.id();
        drop(p0);

        let mut g = bpm.acquire_page(id).unwrap();
        g.write().data[10] = 7;
        drop(g);
        // A clean re-pin and unpin must not clear the dirty mark.
        let g = bpm.acquire_page(id).unwrap();
        drop(g);

        let _a = bpm.new_page().unwrap();
        let _b = bpm.new_page().unwrap();
        let g = bpm.acquire_page(id).unwrap();
        assert_eq!(g.read().data[10], 7);
    }

    #[test]
    fn delete_page_fails_while_pinned() {
        let dir = tempdir().unwrap();
        let bpm = pool(&dir, 2, 2);
        let p0 = bpm.new_page().unwrap();
        let id = p0.id();
        assert!(!bpm.delete_page(id).unwrap());
        drop(p0);
        assert!(bpm.delete_page(id).unwrap());
        assert_eq!(bpm.pin_count(id), None);
    }

    #[test]
    fn read_guard_holds_shared_latch_and_unpins_on_drop() {
        let dir = tempdir().unwrap();
        let bpm = pool(&dir, 2, 2);
        let id = bpm.new_page().unwrap().id();

        let r1 = bpm.acquire_page_read(id).unwrap();
        let r2 = bpm.acquire_page_read(id).unwrap();
        assert_eq!(r1.id, id);
        assert_eq!(r2.id, id);
        assert_eq!(bpm.pin_count(id), Some(2));
        drop(r1);
        drop(r2);
        assert_eq!(bpm.pin_count(id), Some(0));
    }

    #[test]
    fn write_guard_changes_persist_across_eviction() {
        let dir = tempdir().unwrap();
        let bpm = pool(&dir, 2, 2);
        let id = bpm.new_page().unwrap().id();
        {
            let mut w = bpm.acquire_page_write(id).unwrap();
            w.data[42] = 0x42;
        }
        let _a = bpm.new_page().unwrap();
        let _b = bpm.new_page().unwrap();
        let r = bpm.acquire_page_read(id).unwrap();
        assert_eq!(r.data[42], 0x42);
    }
}
