//! Backing media for the counter array.
//!
//! A storage exposes a fixed number of `u64` words through bounds-checked
//! accessors. The volatile variant keeps them on the heap; the durable variant
//! keeps them in a memory-mapped file where word `i` lives at byte `i * 8`.

mod durable;
mod volatile;

pub use durable::DurableStorage;
pub use volatile::VolatileStorage;

use crate::error::{RequestCounterError, RequestCounterResult};
use std::ops::Range;
use std::path::Path;
use std::sync::Arc;

/// Size in bytes of one stored word.
pub const WORD_SIZE: usize = std::mem::size_of::<u64>();

/// Fixed-length array of `u64` words with an owned backing medium.
pub trait Storage: Send + std::fmt::Debug {
    /// Number of words.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn load(&self, index: usize) -> RequestCounterResult<u64>;

    fn store(&mut self, index: usize, value: u64) -> RequestCounterResult<()>;

    /// Make already-written words durable. A no-op for volatile storage.
    fn flush(&self) -> RequestCounterResult<()>;

    /// Handle that flushes without borrowing the storage, for use by a
    /// background task while the storage itself sits behind a lock.
    /// `None` when there is nothing to flush.
    fn flusher(&self) -> Option<Arc<dyn Flush>>;

    /// Flush and release the backing medium. Every teardown step runs even if
    /// an earlier one failed; the first failure is returned.
    fn close(self: Box<Self>) -> RequestCounterResult<()>;
}

/// Detached flush capability.
#[cfg_attr(test, mockall::automock)]
pub trait Flush: Send + Sync {
    fn flush(&self) -> RequestCounterResult<()>;
}

/// Open a storage of `len` words. `path` is only used by the durable variant.
pub fn open(persistent: bool, path: &Path, len: usize) -> RequestCounterResult<Box<dyn Storage>> {
    if persistent {
        Ok(Box::new(DurableStorage::open(path, len)?))
    } else {
        Ok(Box::new(VolatileStorage::open(len)))
    }
}

/// Byte range of word `index` in an array of `len` words.
pub(crate) fn word_range(index: usize, len: usize) -> RequestCounterResult<Range<usize>> {
    if index >= len {
        return Err(RequestCounterError::OutOfBounds { index, len });
    }
    let start = index * WORD_SIZE;
    Ok(start..start + WORD_SIZE)
}
