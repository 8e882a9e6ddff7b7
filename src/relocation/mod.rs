//! # Relocation
//!
//! Move managers batch `(decoder, encoder)` requests per destination and ship
//! them as one payload:
//!
//! ```text
//! payload  := count:u64  decoder_id * count  segment * count
//! segment  := len:u64  bytes
//! ```
//!
//! The receiver reads the decoder ids, then hands each segment to its decoder
//! in registration order. [`CollectiveMoveManager`] exchanges all payloads in
//! one collective round; [`OneSidedMoveManager`] posts to a single
//! destination.

mod collective;
mod one_sided;

pub use collective::{CollectiveMoveManager, SyncReport};
pub use one_sided::{deliver_incoming, Dispatcher, OneSidedMoveManager, SendHandle};

use crate::context::PlaceContext;
use crate::error::{DistError, Result};
use crate::registry::DecoderId;
use crate::team::Place;
use crate::wire::{ByteReader, ByteWriter};
use tracing::warn;

/// Writes one request's bytes at encode time.
pub type Encoder = Box<dyn FnOnce(&mut ByteWriter) -> Result<()>>;

/// Queue of relocation requests, flushed by the manager's own send call.
pub trait MoveManager {
    fn context(&self) -> &PlaceContext;

    /// Queue `encoder` for `dest`; on arrival its bytes are handed to `decoder`.
    fn request_boxed(&mut self, dest: Place, decoder: DecoderId, encoder: Encoder) -> Result<()>;

    fn request<E>(&mut self, dest: Place, decoder: DecoderId, encoder: E) -> Result<()>
    where
        E: FnOnce(&mut ByteWriter) -> Result<()> + 'static,
        Self: Sized,
    {
        self.request_boxed(dest, decoder, Box::new(encoder))
    }

    /// Number of requests queued since the last flush.
    fn pending(&self) -> usize;
}

pub(crate) struct Request {
    decoder: DecoderId,
    encoder: Encoder,
}

impl Request {
    pub(crate) fn new(decoder: DecoderId, encoder: Encoder) -> Self {
        Self { decoder, encoder }
    }
}

/// Payload for one destination plus the outcome of its encoders.
pub(crate) struct EncodedBatch {
    /// Empty when no request encoded.
    pub(crate) bytes: Vec<u8>,
    pub(crate) encoded: usize,
    pub(crate) first_error: Option<DistError>,
}

/// Run every encoder in order and lay out the payload for one destination.
///
/// Each request is encoded into its own segment. A request whose encoder
/// fails is left out of the payload (decoder id and segment both), the
/// others still ship: their encoders have already detached local state.
/// The first failure is kept in the result, later ones are logged.
pub(crate) fn encode_batch(place: Place, dest: Place, requests: Vec<Request>) -> EncodedBatch {
    let mut decoders = Vec::with_capacity(requests.len());
    let mut segments = Vec::with_capacity(requests.len());
    let mut first_error: Option<DistError> = None;
    for request in requests {
        let mut segment = ByteWriter::new();
        match (request.encoder)(&mut segment) {
            Ok(()) => {
                decoders.push(request.decoder);
                segments.push(segment.into_bytes());
            }
            Err(err) => {
                warn!(
                    "place {} dropped request {} for place {}: {}",
                    place, request.decoder, dest, err
                );
                first_error.get_or_insert(err);
            }
        }
    }

    let encoded = decoders.len();
    if encoded == 0 {
        return EncodedBatch {
            bytes: Vec::new(),
            encoded,
            first_error,
        };
    }
    match write_payload(&decoders, &segments) {
        Ok(bytes) => EncodedBatch {
            bytes,
            encoded,
            first_error,
        },
        Err(err) => EncodedBatch {
            bytes: Vec::new(),
            encoded: 0,
            first_error: Some(first_error.unwrap_or(err)),
        },
    }
}

fn write_payload(decoders: &[DecoderId], segments: &[Vec<u8>]) -> Result<Vec<u8>> {
    let total: usize = segments.iter().map(|s| s.len() + 8).sum();
    let mut writer = ByteWriter::with_capacity(total + 8 + decoders.len() * 8);
    writer.write(&(decoders.len() as u64))?;
    for decoder in decoders {
        writer.write(decoder)?;
    }
    for segment in segments {
        writer.append_segment(segment)?;
    }
    Ok(writer.into_bytes())
}

/// Run the decoders named in a payload from `source`, in order.
///
/// A failing decoder does not stop the ones after it; the first failure is
/// returned and the rest are logged. Returns the number of requests decoded.
pub(crate) fn decode_batch(ctx: &PlaceContext, source: Place, bytes: &[u8]) -> Result<usize> {
    let mut reader = ByteReader::new(bytes);
    let count = reader.read::<u64>()? as usize;
    let decoders = (0..count)
        .map(|_| reader.read::<DecoderId>())
        .collect::<Result<Vec<_>>>()?;

    let mut first_error: Option<DistError> = None;
    for decoder in decoders {
        let mut segment = reader.read_segment()?;
        if let Err(err) = ctx.registry().decode(decoder, source, &mut segment) {
            match first_error {
                None => first_error = Some(err),
                Some(_) => warn!(
                    "place {} decoder {} for payload from place {} failed: {}",
                    ctx.place(),
                    decoder,
                    source,
                    err
                ),
            }
        }
    }
    match first_error {
        Some(err) => Err(err),
        None => Ok(count),
    }
}
