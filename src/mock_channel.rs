//! A test/benchmark collaborator that answers parity queries directly from a held correct key
//! (spec.md C8), grounded in the reference `MockClassicalChannel`: it never looks at Bob's
//! working key, only at the shuffle and range named in each request.

use crate::channel::{ClassicalChannel, ParityRequest};
use crate::error::{CascadeError, Result};
use crate::key::Key;

/// Answers `ask_parities` against a correct key held in memory. Used by tests, benchmarks, and
/// the demo binary; never by the engine's library surface directly.
#[derive(Debug, Clone)]
pub struct MockClassicalChannel {
    correct_key: Key,
    reconciliation_active: bool,
}

impl MockClassicalChannel {
    pub fn new(correct_key: Key) -> MockClassicalChannel {
        MockClassicalChannel {
            correct_key,
            reconciliation_active: false,
        }
    }

    pub fn correct_key(&self) -> &Key {
        &self.correct_key
    }
}

impl ClassicalChannel for MockClassicalChannel {
    fn start_reconciliation(&mut self) {
        self.reconciliation_active = true;
    }

    fn end_reconciliation(&mut self) {
        self.reconciliation_active = false;
    }

    fn ask_parities(&mut self, requests: &[ParityRequest]) -> Result<Vec<u8>> {
        if !self.reconciliation_active {
            return Err(CascadeError::ChannelAfterEnd);
        }
        requests
            .iter()
            .map(|request| {
                let size = request.shuffle.get_size();
                if request.start > request.end || request.end > size {
                    return Err(CascadeError::IndexOutOfRange {
                        index: request.end,
                        size,
                    });
                }
                Ok(request
                    .shuffle
                    .calculate_parity(&self.correct_key, request.start, request.end))
            })
            .collect()
    }
}
