use super::{Flush, Storage};
use crate::error::{RequestCounterError, RequestCounterResult};
use std::sync::Arc;

/// Heap-backed words; starts zeroed and is lost on exit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolatileStorage {
    words: Vec<u64>,
}

impl VolatileStorage {
    pub fn open(len: usize) -> Self {
        Self {
            words: vec![0; len],
        }
    }

    fn out_of_bounds(&self, index: usize) -> RequestCounterError {
        RequestCounterError::OutOfBounds {
            index,
            len: self.words.len(),
        }
    }
}

impl Storage for VolatileStorage {
    fn len(&self) -> usize {
        self.words.len()
    }

    fn load(&self, index: usize) -> RequestCounterResult<u64> {
        self.words
            .get(index)
            .copied()
            .ok_or_else(|| self.out_of_bounds(index))
    }

    fn store(&mut self, index: usize, value: u64) -> RequestCounterResult<()> {
        let err = self.out_of_bounds(index);
        let word = self.words.get_mut(index).ok_or(err)?;
        *word = value;
        Ok(())
    }

    fn flush(&self) -> RequestCounterResult<()> {
        Ok(())
    }

    fn flusher(&self) -> Option<Arc<dyn Flush>> {
        None
    }

    fn close(self: Box<Self>) -> RequestCounterResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_is_zeroed() {
        let storage = VolatileStorage::open(4);
        assert_eq!(storage.len(), 4);
        for i in 0..4 {
            assert_eq!(storage.load(i).unwrap(), 0);
        }
    }

    #[test]
    fn test_store_and_load() {
        let mut storage = VolatileStorage::open(3);
        storage.store(1, 42).unwrap();
        storage.store(2, u64::MAX).unwrap();

        assert_eq!(storage.load(0).unwrap(), 0);
        assert_eq!(storage.load(1).unwrap(), 42);
        assert_eq!(storage.load(2).unwrap(), u64::MAX);
    }

    #[test]
    fn test_out_of_bounds() {
        let mut storage = VolatileStorage::open(2);
        assert!(matches!(
            storage.load(2),
            Err(RequestCounterError::OutOfBounds { index: 2, len: 2 })
        ));
        assert!(storage.store(5, 1).is_err());
    }

    #[test]
    fn test_flush_and_close_are_noops() {
        let storage = VolatileStorage::open(2);
        assert!(storage.flush().is_ok());
        assert!(storage.flusher().is_none());
        assert!(Box::new(storage).close().is_ok());
    }
}
