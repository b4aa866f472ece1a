use super::{word_range, Flush, Storage, WORD_SIZE};
use crate::error::{RequestCounterError, RequestCounterResult};
use memmap2::{MmapOptions, MmapRaw};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Words stored in a memory-mapped file, little-endian, no header.
///
/// The file is sized to exactly `len * 8` bytes. Reads and writes go through
/// the mapping, so a mutation is a mutation of the file's page cache and
/// becomes durable on the next [`Storage::flush`].
pub struct DurableStorage {
    path: PathBuf,
    file: File,
    /// Shared with [`MmapFlusher`] handles; unmapped when the last one drops.
    map: Arc<MmapRaw>,
    /// Flush step used by [`Storage::flush`] and by `close`.
    flusher: Arc<dyn Flush>,
    len: usize,
}

impl std::fmt::Debug for DurableStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DurableStorage")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl DurableStorage {
    /// Open or create the file at `path` and map `len` words of it.
    pub fn open(path: &Path, len: usize) -> RequestCounterResult<Self> {
        if len == 0 {
            return Err(RequestCounterError::InvalidArgument(
                "durable storage needs at least one word".into(),
            ));
        }
        let size = len
            .checked_mul(WORD_SIZE)
            .and_then(|bytes| u64::try_from(bytes).ok())
            .ok_or_else(|| {
                RequestCounterError::InvalidArgument(format!("{} words do not fit in a file", len))
            })?;

        let file = File::options()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)
            .map_err(|e| RequestCounterError::storage("open", e))?;

        let existing = file
            .metadata()
            .map_err(|e| RequestCounterError::storage("open", e))?
            .len();
        if existing != size {
            if existing != 0 {
                warn!(
                    operation = "storage_open",
                    path = %path.display(),
                    existing_bytes = existing,
                    expected_bytes = size,
                    "backing file does not match the bucket layout, resizing"
                );
            }
            file.set_len(size)
                .map_err(|e| RequestCounterError::storage("resize", e))?;
        }

        let map = MmapOptions::new()
            .len(len * WORD_SIZE)
            .map_raw(&file)
            .map_err(|e| RequestCounterError::storage("map", e))?;

        debug!(
            operation = "storage_open",
            path = %path.display(),
            words = len,
            "mapped backing file"
        );

        let map = Arc::new(map);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            flusher: Arc::new(MmapFlusher {
                map: Arc::clone(&map),
            }),
            map,
            len,
        })
    }

    fn bytes(&self) -> &[u8] {
        // SAFETY: the mapping is `map.len()` bytes and stays alive while `self`
        // holds the Arc. Writes only happen through `&mut self`; flush handles
        // never create references into the mapping.
        unsafe { std::slice::from_raw_parts(self.map.as_ptr(), self.map.len()) }
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        // SAFETY: as in `bytes`, and `&mut self` makes this the only live view.
        unsafe { std::slice::from_raw_parts_mut(self.map.as_mut_ptr(), self.map.len()) }
    }
}

impl Storage for DurableStorage {
    fn len(&self) -> usize {
        self.len
    }

    fn load(&self, index: usize) -> RequestCounterResult<u64> {
        let range = word_range(index, self.len)?;
        let mut word = [0u8; WORD_SIZE];
        word.copy_from_slice(&self.bytes()[range]);
        Ok(u64::from_le_bytes(word))
    }

    fn store(&mut self, index: usize, value: u64) -> RequestCounterResult<()> {
        let range = word_range(index, self.len)?;
        self.bytes_mut()[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn flush(&self) -> RequestCounterResult<()> {
        self.flusher.flush()
    }

    fn flusher(&self) -> Option<Arc<dyn Flush>> {
        Some(Arc::clone(&self.flusher))
    }

    fn close(self: Box<Self>) -> RequestCounterResult<()> {
        let DurableStorage {
            path,
            file,
            map,
            flusher,
            ..
        } = *self;
        let mut first_err = None;

        if let Err(e) = flusher.flush() {
            error!(operation = "storage_close", step = "flush", path = %path.display(), error = %e);
            first_err.get_or_insert(e);
        }
        drop(flusher);

        // munmap failures are not reported by memmap2; dropping the last
        // reference is the unmap.
        match Arc::try_unwrap(map) {
            Ok(map) => drop(map),
            Err(shared) => {
                warn!(
                    operation = "storage_close",
                    step = "unmap",
                    path = %path.display(),
                    references = Arc::strong_count(&shared) - 1,
                    "mapping still referenced by a flush handle, deferring unmap"
                );
                drop(shared);
            }
        }

        if let Err(e) = file.sync_all() {
            error!(operation = "storage_close", step = "close", path = %path.display(), error = %e);
            first_err.get_or_insert(RequestCounterError::storage("close", e));
        }
        drop(file);

        debug!(operation = "storage_close", path = %path.display(), "released backing file");

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Flushes a shared mapping without access to the words themselves.
#[derive(Debug)]
struct MmapFlusher {
    map: Arc<MmapRaw>,
}

impl Flush for MmapFlusher {
    fn flush(&self) -> RequestCounterResult<()> {
        self.map
            .flush()
            .map_err(|e| RequestCounterError::storage("flush", e))
    }
}
