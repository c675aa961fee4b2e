//! Batched transactional commits.
//!
//! Rows are staged inside an open batch and committed in groups, so an
//! interrupted run loses at most one batch of work and a resumed run
//! re-reads only rows that never became durable.

use perch_core::{EntityStore, StoreError};

/// Rows committed per batch unless the caller overrides it.
pub const DEFAULT_BATCH_SIZE: u64 = 1000;

/// Tracks batch occupancy and drives `begin`/`commit` on the store.
#[derive(Debug)]
pub struct BatchCommitter {
    batch_size: u64,
    staged_rows: u64,
    committed_rows: u64,
}

impl BatchCommitter {
    /// Create a committer flushing every `batch_size` rows (minimum one).
    #[must_use]
    pub fn new(batch_size: u64) -> Self {
        Self {
            batch_size: batch_size.max(1),
            staged_rows: 0,
            committed_rows: 0,
        }
    }

    /// Open the first batch.
    pub fn begin<S: EntityStore>(&self, store: &mut S) -> Result<(), StoreError> {
        store.begin()
    }

    /// Record one fully staged row. When the batch is full, commit it and
    /// open the next one; returns `true` when that happened so the caller
    /// can emit a progress marker.
    pub fn row_staged<S: EntityStore>(&mut self, store: &mut S) -> Result<bool, StoreError> {
        self.staged_rows += 1;
        if self.staged_rows < self.batch_size {
            return Ok(false);
        }
        store.commit()?;
        self.committed_rows += self.staged_rows;
        self.staged_rows = 0;
        store.begin()?;
        Ok(true)
    }

    /// Commit whatever is staged, leaving no batch open. Called at end of
    /// input, and before surfacing a fault so completed rows stay durable.
    pub fn flush<S: EntityStore>(&mut self, store: &mut S) -> Result<(), StoreError> {
        store.commit()?;
        self.committed_rows += self.staged_rows;
        self.staged_rows = 0;
        Ok(())
    }

    /// Rows made durable so far.
    #[must_use]
    pub fn committed_rows(&self) -> u64 {
        self.committed_rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use perch_core::test_support::MemoryStore;
    use rstest::rstest;

    #[rstest]
    fn commits_every_full_batch_and_reopens() {
        let mut store = MemoryStore::new();
        let mut committer = BatchCommitter::new(3);
        committer.begin(&mut store).expect("open batch");
        let mut markers = 0;
        for _ in 0..7 {
            if committer.row_staged(&mut store).expect("stage row") {
                markers += 1;
            }
        }
        committer.flush(&mut store).expect("flush");
        assert_eq!(markers, 2);
        assert_eq!(store.commits, 3);
        assert_eq!(store.begins, 3);
        assert_eq!(committer.committed_rows(), 7);
    }

    #[rstest]
    fn flush_commits_a_partial_batch() {
        let mut store = MemoryStore::new();
        let mut committer = BatchCommitter::new(100);
        committer.begin(&mut store).expect("open batch");
        committer.row_staged(&mut store).expect("stage row");
        assert_eq!(store.commits, 0);
        committer.flush(&mut store).expect("flush");
        assert_eq!(store.commits, 1);
        assert_eq!(committer.committed_rows(), 1);
    }

    #[rstest]
    fn zero_batch_size_is_clamped_to_one() {
        let mut store = MemoryStore::new();
        let mut committer = BatchCommitter::new(0);
        committer.begin(&mut store).expect("open batch");
        assert!(committer.row_staged(&mut store).expect("stage row"));
        assert_eq!(store.commits, 1);
    }
}
