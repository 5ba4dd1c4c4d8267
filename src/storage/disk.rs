// Storage Manager (spec.md §4.2): owns the data file, lock file, and binary
// log, and exposes a page-granular, queue-serialized view of the data file.

use crate::config::PAGE_SIZE_GRANULARITY;
use crate::error::{DbError, Result};
use crate::io_queue::IoQueue;
use crate::storage::page::PageId;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};

pub const DATA_FILE_NAME: &str = "pico.db";
pub const LOCK_FILE_NAME: &str = "picodb.lock";
pub const BINLOG_FILE_NAME: &str = "picodb.binlog";

/// Bytes reserved at the start of the data file for the page-size header.
const HEADER_BYTES: u64 = 4;

/// Decoded file header: just the page size, per spec.md §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metadata {
    pub page_size: u32,
}

/// Owns `pico.db`/`picodb.lock`/`picodb.binlog` and routes all page I/O
/// through a bounded-concurrency [`IoQueue`].
///
/// Cheaply `Clone`: every clone shares the same open files, lock, and queue.
#[derive(Clone)]
pub struct StorageManager {
    data_file: Arc<File>,
    /// Held for the manager's lifetime; releases the advisory lock on drop.
    _lock_file: Arc<File>,
    /// Reserved for future replay; never read or written by this core.
    _binlog_file: Arc<File>,
    /// Public per spec.md §9: the FSM accessor reads this directly.
    pub page_size: u32,
    /// Serializes `allocate_page`'s stat-then-extend sequence (spec.md §5).
    alloc_lock: Arc<AsyncMutex<()>>,
    io_queue: IoQueue,
}

impl StorageManager {
    /// Open an already-initialized database directory.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let data_path = dir.join(DATA_FILE_NAME);
        if !data_path.exists() {
            return Err(DbError::NotInitialized(dir.display().to_string()));
        }

        let data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&data_path)?;

        let lock_path = dir.join(LOCK_FILE_NAME);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&lock_path)?;
        lock_file.try_lock_exclusive().map_err(|_| {
            DbError::AccessDenied(format!(
                "{} is held by another process",
                lock_path.display()
            ))
        })?;

        let binlog_path = dir.join(BINLOG_FILE_NAME);
        let binlog_file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&binlog_path)?;

        let page_size = read_page_size(&data_file)?;
        debug!(page_size, dir = %dir.display(), "opened storage manager");

        let io_queue = IoQueue::new();
        let manager = Self {
            data_file: Arc::new(data_file),
            _lock_file: Arc::new(lock_file),
            _binlog_file: Arc::new(binlog_file),
            page_size,
            alloc_lock: Arc::new(AsyncMutex::new(())),
            io_queue,
        };
        manager.io_queue.start();
        Ok(manager)
    }

    /// Extend the data file by one page and return its id. Allocations are
    /// serialized by `alloc_lock`; reads and writes of other pages still run
    /// with the full 16-way queue concurrency.
    pub async fn allocate_page(&self) -> Result<PageId> {
        let _guard = self.alloc_lock.lock().await;

        let data_file = self.data_file.clone();
        let page_size = self.page_size;

        self.io_queue
            .enqueue(move || async move {
                run_blocking(move || {
                    let len = data_file.metadata()?.len();
                    let page_index = len / page_size as u64;
                    let zeros = vec![0u8; page_size as usize];
                    platform::write_at_all(&data_file, &zeros, len)?;
                    Ok(page_index)
                })
                .await
            })
            .await
    }

    /// Read exactly `page_size` bytes for `page_id`.
    pub async fn read_page(&self, page_id: PageId) -> Result<Vec<u8>> {
        let data_file = self.data_file.clone();
        let page_size = self.page_size;

        self.io_queue
            .enqueue(move || async move {
                run_blocking(move || {
                    let offset = HEADER_BYTES + page_id * page_size as u64;
                    let mut buf = vec![0u8; page_size as usize];
                    platform::read_at_exact(&data_file, &mut buf, offset)?;
                    Ok(buf)
                })
                .await
            })
            .await
    }

    /// Write `data` (must be exactly `page_size` bytes) at `page_id`'s offset.
    pub async fn write_page(&self, page_id: PageId, data: Vec<u8>) -> Result<()> {
        if data.len() != self.page_size as usize {
            return Err(DbError::PageSizeMismatch {
                expected: self.page_size as usize,
                actual: data.len(),
            });
        }

        let data_file = self.data_file.clone();
        let page_size = self.page_size;

        self.io_queue
            .enqueue(move || async move {
                run_blocking(move || {
                    let offset = HEADER_BYTES + page_id * page_size as u64;
                    platform::write_at_all(&data_file, &data, offset)?;
                    Ok(())
                })
                .await
            })
            .await
    }

    /// Create a fresh database directory (administrative, not in the hot path).
    pub fn create(page_size_kb: u32, dir_path: impl AsRef<Path>, overwrite: bool) -> Result<()> {
        if page_size_kb == 0 {
            return Err(DbError::ConfigOutOfRange(
                "pageSizeKB must be a positive integer".into(),
            ));
        }

        let dir_path = dir_path.as_ref();
        if dir_path.exists() {
            if !overwrite {
                return Err(DbError::AlreadyExists(dir_path.display().to_string()));
            }
            std::fs::remove_dir_all(dir_path)?;
        }
        std::fs::create_dir_all(dir_path)?;

        let page_size = page_size_kb * 1024;
        let mut data_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(dir_path.join(DATA_FILE_NAME))?;
        data_file.write_all(&page_size.to_le_bytes())?;
        data_file.write_all(&vec![0u8; page_size as usize])?;

        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir_path.join(LOCK_FILE_NAME))?;
        OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(dir_path.join(BINLOG_FILE_NAME))?;

        info!(page_size, dir = %dir_path.display(), "created database");
        Ok(())
    }

    /// Read the header of an existing database directory without opening it
    /// for page I/O.
    pub fn get_metadata(dir_path: impl AsRef<Path>) -> Result<Metadata> {
        let dir_path = dir_path.as_ref();
        let data_path = dir_path.join(DATA_FILE_NAME);
        let file = OpenOptions::new().read(true).open(&data_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DbError::NotInitialized(dir_path.display().to_string())
            } else {
                DbError::Io(e)
            }
        })?;
        Ok(Metadata {
            page_size: read_page_size(&file)?,
        })
    }
}

fn read_page_size(file: &File) -> Result<u32> {
    let mut buf = [0u8; HEADER_BYTES as usize];
    platform::read_at_exact(file, &mut buf, 0)?;
    let page_size = u32::from_le_bytes(buf);
    if page_size == 0 || page_size % PAGE_SIZE_GRANULARITY != 0 {
        return Err(DbError::ConfigOutOfRange(format!(
            "page size {page_size} must be a positive multiple of {PAGE_SIZE_GRANULARITY}"
        )));
    }
    Ok(page_size)
}

/// Run a blocking closure on the blocking thread pool and flatten its result.
async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(result) => result,
        Err(join_err) => Err(DbError::Storage(format!(
            "blocking io task panicked: {join_err}"
        ))),
    }
}

/// Positional (offset-carrying) I/O so concurrent tasks can share one file
/// descriptor without racing on a shared seek cursor.
mod platform {
    use std::fs::File;
    use std::io::Result;

    #[cfg(unix)]
    pub fn read_at_exact(file: &File, buf: &mut [u8], offset: u64) -> Result<()> {
        use std::os::unix::fs::FileExt;
        file.read_exact_at(buf, offset)
    }

    #[cfg(unix)]
    pub fn write_at_all(file: &File, buf: &[u8], offset: u64) -> Result<()> {
        use std::os::unix::fs::FileExt;
        file.write_all_at(buf, offset)
    }

    #[cfg(windows)]
    pub fn read_at_exact(file: &File, mut buf: &mut [u8], mut offset: u64) -> Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            let n = file.seek_read(buf, offset)?;
            if n == 0 {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "short read",
                ));
            }
            buf = &mut buf[n..];
            offset += n as u64;
        }
        Ok(())
    }

    #[cfg(windows)]
    pub fn write_at_all(file: &File, mut buf: &[u8], mut offset: u64) -> Result<()> {
        use std::os::windows::fs::FileExt;
        while !buf.is_empty() {
            let n = file.seek_write(buf, offset)?;
            buf = &buf[n..];
            offset += n as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn allocate_read_write_round_trip() {
        let dir = tempdir().unwrap();
        StorageManager::create(4, dir.path(), false).unwrap();
        let manager = StorageManager::open(dir.path()).await.unwrap();

        let page_id = manager.allocate_page().await.unwrap();
        assert_eq!(page_id, 1); // page 0 is the reserved header page

        let mut data = vec![0u8; manager.page_size as usize];
        data[0] = 0x41;
        data[1] = 0x42;
        data[2] = 0x43;
        manager.write_page(page_id, data.clone()).await.unwrap();

        let read_back = manager.read_page(page_id).await.unwrap();
        assert_eq!(read_back, data);
    }

    #[tokio::test]
    async fn write_page_rejects_wrong_length() {
        let dir = tempdir().unwrap();
        StorageManager::create(4, dir.path(), false).unwrap();
        let manager = StorageManager::open(dir.path()).await.unwrap();
        let page_id = manager.allocate_page().await.unwrap();

        let err = manager
            .write_page(page_id, vec![0u8; 17])
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::PageSizeMismatch { .. }));
    }

    #[tokio::test]
    async fn open_without_init_fails_not_initialized() {
        let dir = tempdir().unwrap();
        let err = StorageManager::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, DbError::NotInitialized(_)));
    }

    #[tokio::test]
    async fn create_rejects_existing_directory_without_overwrite() {
        let dir = tempdir().unwrap();
        StorageManager::create(4, dir.path(), false).unwrap();
        let err = StorageManager::create(4, dir.path(), false).unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists(_)));
    }

    #[test]
    fn get_metadata_reads_header_without_opening_queue() {
        let dir = tempdir().unwrap();
        StorageManager::create(8, dir.path(), false).unwrap();
        let meta = StorageManager::get_metadata(dir.path()).unwrap();
        assert_eq!(meta.page_size, 8 * 1024);
    }

    #[tokio::test]
    async fn thirty_two_concurrent_reads_all_succeed() {
        let dir = tempdir().unwrap();
        StorageManager::create(4, dir.path(), false).unwrap();
        let manager = StorageManager::open(dir.path()).await.unwrap();

        let mut page_ids = Vec::new();
        for _ in 0..32 {
            page_ids.push(manager.allocate_page().await.unwrap());
        }

        let mut handles = Vec::new();
        for &page_id in &page_ids {
            let manager = manager.clone();
            handles.push(tokio::spawn(
                async move { manager.read_page(page_id).await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
    }
}
