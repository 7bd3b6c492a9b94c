//! The disk manager and its background I/O scheduler.
//!
//! All page I/O funnels through a single worker thread so that a page is
//! never read and written concurrently. Callers block on a per-request
//! completion channel to observe synchronous semantics.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use crate::{PageId, PAGE_SIZE};

/// A heap-allocated page-sized buffer carried by disk requests.
pub type PageBuf = Box<[u8; PAGE_SIZE]>;

pub fn new_page_buf() -> PageBuf {
    Box::new([0u8; PAGE_SIZE])
}

/// File-backed page store. Pages are addressed by id at fixed offsets.
pub struct DiskManager {
    file: File,
    pub num_pages: u32,
}

impl DiskManager {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path_ref = path.as_ref();
        crate::stratum_debug_log!("[DiskManager::open] Opening database file at: {path_ref:?}");
        if let Some(parent) = path_ref.parent() {
            create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path_ref)?;

        let file_size = file.metadata()?.len();
        let num_pages = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self { file, num_pages })
    }

    /// Reads one full page into `buf`. Reads past the end of the file yield
    /// a zeroed page.
    pub fn read_page(&mut self, page_id: PageId, buf: &mut [u8; PAGE_SIZE]) -> io::Result<()> {
        if page_id < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "read of invalid page id",
            ));
        }
        if page_id as u32 >= self.num_pages {
            buf.fill(0);
            return Ok(());
        }

        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        let bytes_read = self.file.read(buf)?;
        if bytes_read < PAGE_SIZE {
            buf[bytes_read..].fill(0);
        }
        Ok(())
    }

    pub fn write_page(&mut self, page_id: PageId, buf: &[u8; PAGE_SIZE]) -> io::Result<()> {
        if page_id < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write of invalid page id",
            ));
        }
        let offset = page_id as u64 * PAGE_SIZE as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        self.file.sync_all()?;
        if page_id as u32 >= self.num_pages {
            self.num_pages = page_id as u32 + 1;
        }
        Ok(())
    }

    /// Hook for the external allocator; freed pages are not reused.
    pub fn deallocate_page(&mut self, _page_id: PageId) {}
}

/// A single I/O request dispatched to the scheduler's worker.
pub enum DiskRequest {
    Read {
        page_id: PageId,
        completion: Sender<io::Result<PageBuf>>,
    },
    Write {
        page_id: PageId,
        data: PageBuf,
        completion: Sender<io::Result<()>>,
    },
    /// Fire-and-forget notification that a page id was freed.
    Deallocate { page_id: PageId },
}

/// Serializes page I/O onto one background worker.
///
/// Dropping the scheduler enqueues a terminal sentinel and joins the worker.
pub struct DiskScheduler {
    queue: Sender<Option<DiskRequest>>,
    worker: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    pub fn new(disk_manager: DiskManager) -> Self {
        let (queue, requests) = mpsc::channel::<Option<DiskRequest>>();
        let worker = std::thread::spawn(move || Self::worker_loop(disk_manager, requests));
        Self {
            queue,
            worker: Some(worker),
        }
    }

    /// Enqueues a request for the worker. The caller observes completion by
    /// receiving on the channel it put into the request.
    pub fn schedule(&self, request: DiskRequest) {
        // The worker only exits once the sentinel is queued from drop, so
        // the send cannot fail while the scheduler is alive.
        let _ = self.queue.send(Some(request));
    }

    /// Convenience wrapper: schedule a read and wait for it.
    pub fn read_page_sync(&self, page_id: PageId) -> io::Result<PageBuf> {
        let (completion, done) = mpsc::channel();
        self.schedule(DiskRequest::Read {
            page_id,
            completion,
        });
        recv_completion(done)
    }

    /// Notifies the disk manager that a page id is no longer in use.
    pub fn deallocate(&self, page_id: PageId) {
        self.schedule(DiskRequest::Deallocate { page_id });
    }

    /// Convenience wrapper: schedule a write and wait for it.
    pub fn write_page_sync(&self, page_id: PageId, data: PageBuf) -> io::Result<()> {
        let (completion, done) = mpsc::channel();
        self.schedule(DiskRequest::Write {
            page_id,
            data,
            completion,
        });
        recv_completion(done)
    }

    fn worker_loop(mut disk_manager: DiskManager, requests: Receiver<Option<DiskRequest>>) {
        while let Ok(Some(request)) = requests.recv() {
            match request {
                DiskRequest::Read {
                    page_id,
                    completion,
                } => {
                    let mut buf = new_page_buf();
                    let result = disk_manager.read_page(page_id, &mut buf).map(|()| buf);
                    let _ = completion.send(result);
                }
                DiskRequest::Write {
                    page_id,
                    data,
                    completion,
                } => {
                    let _ = completion.send(disk_manager.write_page(page_id, &data));
                }
                DiskRequest::Deallocate { page_id } => {
                    disk_manager.deallocate_page(page_id);
                }
            }
        }
        crate::stratum_debug_log!("[DiskScheduler] worker received shutdown sentinel");
    }
}

fn recv_completion<T>(done: Receiver<io::Result<T>>) -> io::Result<T> {
    done.recv()
        .map_err(|_| io::Error::other("disk scheduler worker hung up"))?
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        let _ = self.queue.send(None);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
