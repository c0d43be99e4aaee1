//! Hi-lo document id allocation.
//!
//! The store holds one in-memory pool that hands out contiguous blocks;
//! sessions cache a block each so `save` can assign ids without touching the
//! database. Durability is settled at flush: before the first INSERT, the
//! flush advances the identifiers row past every id it is about to use with
//! a compare-and-set loop. A cross-process race on the same range surfaces
//! as a primary-key violation at insert, which is reported as a concurrency
//! conflict.

use std::sync::Mutex;

use crate::document::DocId;

/// The dimension key under which document ids are tracked in the
/// identifiers table.
pub(crate) const ID_DIMENSION: &str = "document";

/// Default number of ids a session reserves at a time.
pub(crate) const DEFAULT_BLOCK_SIZE: i64 = 64;

/// A contiguous id range handed to one session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct IdBlock {
    next: i64,
    limit: i64,
}

impl IdBlock {
    pub fn take(&mut self) -> Option<DocId> {
        if self.next < self.limit {
            let id = self.next;
            self.next += 1;
            Some(id)
        } else {
            None
        }
    }
}

#[derive(Debug)]
struct PoolState {
    /// Next id the pool will hand out.
    next: i64,
    /// Ids below this value are durably reserved in the identifiers table.
    durable_high: i64,
}

/// The store-wide id pool.
#[derive(Debug)]
pub(crate) struct IdAllocator {
    block_size: i64,
    state: Mutex<PoolState>,
}

impl IdAllocator {
    pub fn new(block_size: i64) -> Self {
        Self {
            block_size,
            state: Mutex::new(PoolState { next: 1, durable_high: 1 }),
        }
    }

    /// Seeds the pool from the identifiers row read at bootstrap.
    pub fn seed(&self, next_value: i64) {
        let mut state = self.state.lock().expect("id pool poisoned");
        state.next = next_value.max(1);
        state.durable_high = next_value.max(1);
    }

    /// Takes the next block. Synchronous: durability is deferred to flush.
    pub fn take_block(&self) -> IdBlock {
        let mut state = self.state.lock().expect("id pool poisoned");
        let block = IdBlock {
            next: state.next,
            limit: state.next + self.block_size,
        };
        state.next = block.limit;
        block
    }

    /// Ids below this value need no durable confirmation.
    pub fn durable_high(&self) -> i64 {
        self.state.lock().expect("id pool poisoned").durable_high
    }

    /// Records that ids below `high` are now durably reserved.
    pub fn mark_durable(&self, high: i64) {
        let mut state = self.state.lock().expect("id pool poisoned");
        if high > state.durable_high {
            state.durable_high = high;
        }
    }
}
