//! The table heap: a linked list of slotted pages storing tuple payloads.

use std::io;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::page::TupleMeta;
use crate::{BufferPoolManager, PageId, Rid, INVALID_PAGE_ID};

/// A heap file. Insertion always targets the last page and links a fresh
/// page onto the chain when it runs out of room.
pub struct TableHeap {
    bpm: Arc<BufferPoolManager>,
    first_page_id: PageId,
    last_page_id: Mutex<PageId>,
}

impl TableHeap {
    /// Creates an empty heap with one initialized page.
    pub fn new(bpm: Arc<BufferPoolManager>) -> io::Result<Self> {
        let first_page_id = {
            let mut guard = bpm.new_page()?;
            guard.write().init_table_page();
            guard.id()
        };
        Ok(Self {
            bpm,
            first_page_id,
            last_page_id: Mutex::new(first_page_id),
        })
    }

    pub fn first_page_id(&self) -> PageId {
        self.first_page_id
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    /// Inserts a tuple and returns its RID.
    pub fn insert_tuple(&self, meta: TupleMeta, payload: &[u8]) -> io::Result<Rid> {
        let mut last_page_id = self.last_page_id.lock();
        let mut guard = self.bpm.acquire_page_write(*last_page_id)?;
        if let Some(slot) = guard.insert_table_tuple(meta, payload) {
            return Ok(Rid::new(*last_page_id, slot));
        }

        // Current tail is full: chain a new page and retry there.
        let mut new_guard = self.bpm.new_page()?.upgrade_write();
        let new_page_id = new_guard.id();
        new_guard.init_table_page();
        guard.set_next_page_id(new_page_id);
        drop(guard);
        *last_page_id = new_page_id;

        match new_guard.insert_table_tuple(meta, payload) {
            Some(slot) => Ok(Rid::new(new_page_id, slot)),
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "tuple does not fit in an empty page",
            )),
        }
    }

    pub fn tuple(&self, rid: Rid) -> io::Result<(TupleMeta, Vec<u8>)> {
        let guard = self.bpm.acquire_page_read(rid.page_id)?;
        let (meta, payload) = guard
            .table_tuple(rid.slot)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no tuple at rid"))?;
        Ok((meta, payload.to_vec()))
    }

    pub fn tuple_meta(&self, rid: Rid) -> io::Result<TupleMeta> {
        let guard = self.bpm.acquire_page_read(rid.page_id)?;
        guard
            .table_tuple_meta(rid.slot)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no tuple at rid"))
    }

    pub fn update_tuple_meta(&self, meta: TupleMeta, rid: Rid) -> io::Result<()> {
        let mut guard = self.bpm.acquire_page_write(rid.page_id)?;
        if !guard.set_table_tuple_meta(rid.slot, meta) {
            return Err(io::Error::new(io::ErrorKind::NotFound, "no tuple at rid"));
        }
        Ok(())
    }

    /// Overwrites a tuple in place. The payload must fit the existing slot.
    pub fn update_tuple_in_place(
        &self,
        meta: TupleMeta,
        payload: &[u8],
        rid: Rid,
    ) -> io::Result<()> {
        let mut guard = self.bpm.acquire_page_write(rid.page_id)?;
        if !guard.update_table_tuple(rid.slot, meta, payload) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "in-place update does not fit the existing slot",
            ));
        }
        Ok(())
    }

    /// An iterator over `(meta, payload, rid)` in heap order. Delete markers
    /// are yielded; filtering is the caller's concern.
    pub fn iter(&self) -> TableIterator<'_> {
        TableIterator {
            heap: self,
            current_page_id: self.first_page_id,
            current_slot: 0,
        }
    }
}

pub struct TableIterator<'a> {
    heap: &'a TableHeap,
    current_page_id: PageId,
    current_slot: u16,
}

impl TableIterator<'_> {
    #[allow(clippy::type_complexity)]
    pub fn next(&mut self) -> io::Result<Option<(TupleMeta, Vec<u8>, Rid)>> {
        loop {
            if self.current_page_id == INVALID_PAGE_ID {
                return Ok(None);
            }
            let guard = self.heap.bpm.acquire_page_read(self.current_page_id)?;
            if self.current_slot >= guard.tuple_count() {
                self.current_page_id = guard.next_page_id();
                self.current_slot = 0;
                continue;
            }
            let slot = self.current_slot;
            self.current_slot += 1;
            if let Some((meta, payload)) = guard.table_tuple(slot) {
                let rid = Rid::new(guard.id, slot);
                return Ok(Some((meta, payload.to_vec(), rid)));
            }
        }
    }
}
