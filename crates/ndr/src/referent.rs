//! Per-call referent bookkeeping
//!
//! Every [`NdrWriter`](crate::NdrWriter) and [`NdrReader`](crate::NdrReader)
//! owns one table. It records the deferred pointer bodies queued during the
//! fixed part of a structure, in encounter order, and hands out referent
//! ids. Tables are never shared between calls.

use std::collections::{HashSet, VecDeque};

/// First referent id handed out by a writer, as Windows peers do
pub const FIRST_REFERENT_ID: u32 = 0x0002_0000;

/// Distance between consecutive referent ids
const REFERENT_STEP: u32 = 4;

/// Queue of deferred bodies keyed by referent id
pub struct ReferentTable<F> {
    next_id: u32,
    pending: VecDeque<(u32, F)>,
    seen: HashSet<u32>,
}

impl<F> ReferentTable<F> {
    pub fn new() -> Self {
        Self {
            next_id: FIRST_REFERENT_ID,
            pending: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Allocate a fresh, nonzero referent id.
    pub fn allocate(&mut self) -> u32 {
        let id = self.next_id;
        self.next_id = match self.next_id.wrapping_add(REFERENT_STEP) {
            0 => FIRST_REFERENT_ID,
            next => next,
        };
        id
    }

    /// Queue `body` behind the bodies already pending.
    pub fn defer(&mut self, referent_id: u32, body: F) {
        self.pending.push_back((referent_id, body));
    }

    /// Take every pending body, leaving the queue empty for nested pointers.
    pub fn take_pending(&mut self) -> VecDeque<(u32, F)> {
        std::mem::take(&mut self.pending)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Record a referent id seen on input. Returns false if it was seen before.
    pub fn observe(&mut self, referent_id: u32) -> bool {
        self.seen.insert(referent_id)
    }
}

impl<F> Default for ReferentTable<F> {
    fn default() -> Self {
        Self::new()
    }
}
