//! The in-memory page representation and the slotted table-page layout.
//!
//! A page is a fixed-size byte array. Typed layouts (table page, hash index
//! pages) are overlaid on the raw bytes with `repr(C)` structs written and
//! read unaligned at computed offsets.

use crate::{PageId, INVALID_PAGE_ID, PAGE_SIZE};

/// Per-tuple header stamped into the slot directory.
///
/// `ts` is a tagged 64-bit timestamp: with bit 62 set it names the
/// transaction that currently owns the (uncommitted) version, otherwise it
/// is the commit timestamp of the version.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TupleMeta {
    pub ts: u64,
    pub is_deleted: bool,
}

impl TupleMeta {
    pub fn new(ts: u64, is_deleted: bool) -> Self {
        Self { ts, is_deleted }
    }
}

#[repr(C)]
#[derive(Copy, Clone)]
struct TablePageHeader {
    next_page_id: PageId,
    tuple_cnt: u16,
    /// Offset of the lowest tuple payload byte; payloads grow downward.
    upper_offset: u16,
}

/// One slot directory entry: where the payload lives plus the tuple meta.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
struct TupleInfo {
    ts: u64,
    offset: u16,
    size: u16,
    is_deleted: u8,
}

const TABLE_PAGE_HEADER_SIZE: usize = std::mem::size_of::<TablePageHeader>();
const TUPLE_INFO_SIZE: usize = std::mem::size_of::<TupleInfo>();

#[derive(Debug, Clone)]
pub struct Page {
    pub id: PageId,
    pub data: [u8; PAGE_SIZE],
}

impl Page {
    pub fn new(id: PageId) -> Self {
        Self {
            id,
            data: [0; PAGE_SIZE],
        }
    }

    /// Rebinds this frame to a fresh zeroed page.
    pub fn reset(&mut self, id: PageId) {
        self.id = id;
        self.data = [0; PAGE_SIZE];
    }

    pub(crate) fn read_at<T: Copy>(&self, offset: usize) -> T {
        debug_assert!(offset + std::mem::size_of::<T>() <= PAGE_SIZE);
        unsafe { std::ptr::read_unaligned(self.data.as_ptr().add(offset) as *const T) }
    }

    pub(crate) fn write_at<T: Copy>(&mut self, offset: usize, value: T) {
        debug_assert!(offset + std::mem::size_of::<T>() <= PAGE_SIZE);
        unsafe { std::ptr::write_unaligned(self.data.as_mut_ptr().add(offset) as *mut T, value) }
    }
}

// Slotted table-page layout: header, then the slot directory growing from
// the front, tuple payloads growing from the back.
impl Page {
    pub fn init_table_page(&mut self) {
        self.write_at(
            0,
            TablePageHeader {
                next_page_id: INVALID_PAGE_ID,
                tuple_cnt: 0,
                upper_offset: PAGE_SIZE as u16,
            },
        );
    }

    fn table_header(&self) -> TablePageHeader {
        self.read_at(0)
    }

    fn table_header_write(&mut self, header: TablePageHeader) {
        self.write_at(0, header);
    }

    pub fn next_page_id(&self) -> PageId {
        self.table_header().next_page_id
    }

    pub fn set_next_page_id(&mut self, next_page_id: PageId) {
        let mut header = self.table_header();
        header.next_page_id = next_page_id;
        self.table_header_write(header);
    }

    pub fn tuple_count(&self) -> u16 {
        self.table_header().tuple_cnt
    }

    fn tuple_info(&self, slot: u16) -> Option<TupleInfo> {
        if slot >= self.tuple_count() {
            return None;
        }
        Some(self.read_at(TABLE_PAGE_HEADER_SIZE + slot as usize * TUPLE_INFO_SIZE))
    }

    fn tuple_info_write(&mut self, slot: u16, info: TupleInfo) {
        self.write_at(TABLE_PAGE_HEADER_SIZE + slot as usize * TUPLE_INFO_SIZE, info);
    }

    /// Free bytes between the slot directory and the payload region.
    pub fn free_space(&self) -> usize {
        let header = self.table_header();
        let lower = TABLE_PAGE_HEADER_SIZE + header.tuple_cnt as usize * TUPLE_INFO_SIZE;
        (header.upper_offset as usize).saturating_sub(lower)
    }

    /// Appends a tuple, returning its slot number, or `None` when the page
    /// has no room for payload plus a slot entry.
    pub fn insert_table_tuple(&mut self, meta: TupleMeta, payload: &[u8]) -> Option<u16> {
        if self.free_space() < payload.len() + TUPLE_INFO_SIZE {
            return None;
        }
        let mut header = self.table_header();
        let slot = header.tuple_cnt;
        let offset = header.upper_offset as usize - payload.len();
        self.data[offset..offset + payload.len()].copy_from_slice(payload);
        self.tuple_info_write(
            slot,
            TupleInfo {
                ts: meta.ts,
                offset: offset as u16,
                size: payload.len() as u16,
                is_deleted: meta.is_deleted as u8,
            },
        );
        header.tuple_cnt += 1;
        header.upper_offset = offset as u16;
        self.table_header_write(header);
        Some(slot)
    }

    pub fn table_tuple(&self, slot: u16) -> Option<(TupleMeta, &[u8])> {
        let info = self.tuple_info(slot)?;
        let payload = &self.data[info.offset as usize..(info.offset + info.size) as usize];
        Some((TupleMeta::new(info.ts, info.is_deleted != 0), payload))
    }

    pub fn table_tuple_meta(&self, slot: u16) -> Option<TupleMeta> {
        let info = self.tuple_info(slot)?;
        Some(TupleMeta::new(info.ts, info.is_deleted != 0))
    }

    pub fn set_table_tuple_meta(&mut self, slot: u16, meta: TupleMeta) -> bool {
        let Some(mut info) = self.tuple_info(slot) else {
            return false;
        };
        info.ts = meta.ts;
        info.is_deleted = meta.is_deleted as u8;
        self.tuple_info_write(slot, info);
        true
    }

    /// Overwrites a tuple's payload and meta in place. The new payload must
    /// fit the existing slot; larger payloads are rejected.
    pub fn update_table_tuple(&mut self, slot: u16, meta: TupleMeta, payload: &[u8]) -> bool {
        let Some(mut info) = self.tuple_info(slot) else {
            return false;
        };
        if payload.len() > info.size as usize {
            return false;
        }
        let offset = info.offset as usize;
        self.data[offset..offset + payload.len()].copy_from_slice(payload);
        info.size = payload.len() as u16;
        info.ts = meta.ts;
        info.is_deleted = meta.is_deleted as u8;
        self.tuple_info_write(slot, info);
        true
    }
}
