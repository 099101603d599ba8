//! The abstract interface Bob uses to query Alice for correct parities (spec.md §4.5). This is
//! the only external port of the engine; everything else is local computation.

use crate::error::Result;
use crate::shuffle::SharedShuffle;

/// One outstanding parity question: the shuffle it was asked under and the `[start, end)`
/// range within that shuffle. This triple, with the shuffle reduced to its identifier, is the
/// only thing that ever needs to cross the wire (spec.md §6).
#[derive(Debug, Clone)]
pub struct ParityRequest {
    pub shuffle: SharedShuffle,
    pub start: u32,
    pub end: u32,
}

/// Abstract classical channel to the peer holding the error-free key.
///
/// `ask_parities` is the only suspension point in the engine (spec.md §5): it is synchronous
/// and must return exactly one parity per request, in the same order the requests were given.
/// A peer implementation MUST NOT reorder the reply.
pub trait ClassicalChannel {
    /// Signal the peer to initialize any per-session caches (e.g. a shuffle-identifier cache).
    fn start_reconciliation(&mut self);

    /// Signal the peer that the session is over; caches may be released.
    fn end_reconciliation(&mut self);

    /// Ask for the correct parity of each requested block, in order. Implementations may batch
    /// the whole slice onto one wire message; semantically this is one round-trip.
    fn ask_parities(&mut self, requests: &[ParityRequest]) -> Result<Vec<u8>>;
}
