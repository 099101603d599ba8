//! Error taxonomy for the Cascade engine (spec.md §7): configuration errors and protocol
//! errors are both fatal and fail the call; residual bit errors are not modeled as errors
//! at all, they show up in [`crate::stats::Stats`] instead.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum CascadeError {
    #[error("unknown cascade variant: {0}")]
    UnknownVariant(String),

    #[error("invalid estimated bit error rate: {0} (must be in [0, 1])")]
    InvalidErrorRate(f32),

    #[error("key size mismatch: expected {expected}, got {actual}")]
    KeySizeMismatch { expected: u32, actual: u32 },

    #[error("index {index} out of range for size {size}")]
    IndexOutOfRange { index: u32, size: u32 },

    #[error("classical channel used after end_reconciliation")]
    ChannelAfterEnd,

    #[error("ask_parities returned {actual} parities, expected {expected}")]
    ParityReplyLengthMismatch { expected: usize, actual: usize },

    #[error("ask_parities returned an invalid parity value: {0} (must be 0 or 1)")]
    InvalidParityValue(u8),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, CascadeError>;
