//! Error types shared by every layer of the crate.
//!
//! Errors fall into four groups: range errors raised by the local storage
//! types, protocol-misuse errors raised by the relocation and replication
//! bookkeeping, transport errors raised by a [`Team`](crate::team::Team)
//! implementation, and codec errors raised while encoding or decoding wire
//! payloads. None of them are retried by the library.

use crate::range::{Interval, Rectangle};
use crate::registry::DecoderId;
use crate::team::Place;
use thiserror::Error;

/// Errors produced by distributed collections and their relocation machinery.
#[derive(Debug, Error)]
pub enum DistError {
    /// An index fell outside the range of the storage it addressed.
    #[error("index {index} out of range {range}")]
    OutOfRange { index: i64, range: Interval },

    /// An index is not held by any local partition.
    #[error("index {0} is not held by this place")]
    NotLocal(i64),

    /// A cell fell outside a two-dimensional range.
    #[error("cell ({outer}, {inner}) out of range {rect}")]
    CellOutOfRange { outer: i64, inner: i64, rect: Rectangle },

    /// A requested sub-rectangle is not contained in the storage rectangle.
    #[error("rectangle {requested} is not contained in {rect}")]
    RectangleOutOfBounds { requested: Rectangle, rect: Rectangle },

    /// A requested sub-range is not contained in the storage range.
    #[error("range {requested} is not contained in {range}")]
    RangeOutOfBounds { requested: Interval, range: Interval },

    /// An interval with `from > to` was requested.
    #[error("malformed interval: from ({from}) > to ({to})")]
    MalformedInterval { from: i64, to: i64 },

    /// A chunk exceeds the configured maximum number of elements.
    #[error("chunk {range} holds {size} elements, more than the maximum of {max}")]
    ChunkTooLarge { range: Interval, size: u64, max: u64 },

    /// Chunks must cover at least one index.
    #[error("chunk range {0} is empty")]
    EmptyChunk(Interval),

    /// A buffer does not have one slot per index of its range.
    #[error("buffer of length {len} does not match range {range}")]
    LengthMismatch { range: Interval, len: usize },

    /// An operation was called in a state that does not allow it.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A relocation primitive was called out of order.
    #[error("relocation tag mismatch for {key}: {reason}")]
    TagMismatch { key: String, reason: String },

    /// A one-sided move manager was asked to target another place.
    #[error("move manager bound to place {expected} cannot target place {requested}")]
    WrongDestination { expected: Place, requested: Place },

    /// A range collides with one that is already present.
    #[error("range {range} overlaps existing range {existing}")]
    Overlap { range: Interval, existing: Interval },

    /// A range is mirrored in, or has been shared out, and cannot be restructured.
    #[error("range {range} overlaps shared range {shared}")]
    Shared { range: Interval, shared: Interval },

    /// A payload named a decoder this place never registered.
    #[error("no decoder registered for {0}")]
    UnknownDecoder(DecoderId),

    /// The same decoder id was registered twice.
    #[error("decoder {0} is already registered")]
    DuplicateDecoder(DecoderId),

    /// The collective transport failed or was used inconsistently.
    #[error("transport error: {0}")]
    Transport(String),

    /// A remote place reported a failure while decoding our payload.
    #[error("place {place} failed to decode payload: {message}")]
    Remote { place: Place, message: String },

    /// A wire payload could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// A user-supplied callback reported a failure.
    #[error("callback failed: {0}")]
    Callback(String),
}

impl DistError {
    pub(crate) fn tag_mismatch(key: impl std::fmt::Debug, reason: impl Into<String>) -> Self {
        Self::TagMismatch {
            key: format!("{key:?}"),
            reason: reason.into(),
        }
    }

    /// Build a callback error from anything printable.
    pub fn callback(message: impl std::fmt::Display) -> Self {
        Self::Callback(message.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DistError>;
