//! Per-place decoder registry.
//!
//! Payloads name the decoder that must consume them by [`DecoderId`]; the
//! code itself never crosses the wire. Every place brings its collections up
//! in the same order, so the collection ids handed out here agree across
//! places.

use crate::error::{DistError, Result};
use crate::team::Place;
use crate::wire::ByteReader;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Identity of a distributed collection, agreed on by every place.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CollectionId(pub u32);

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One decoder of one collection.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DecoderId {
    pub collection: CollectionId,
    pub op: u16,
}

impl DecoderId {
    pub const fn new(collection: CollectionId, op: u16) -> Self {
        Self { collection, op }
    }
}

impl fmt::Display for DecoderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.op)
    }
}

/// Consumes one request's segment; receives the place that sent it.
pub type Decoder = Arc<dyn Fn(Place, &mut ByteReader<'_>) -> Result<()> + Send + Sync>;

#[derive(Default)]
pub struct DecoderRegistry {
    next_collection: AtomicU32,
    decoders: RwLock<FxHashMap<DecoderId, Decoder>>,
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderRegistry")
            .field("next_collection", &self.next_collection)
            .field("decoders", &self.decoders.read().len())
            .finish()
    }
}

impl DecoderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out the next collection id.
    pub fn allocate_collection(&self) -> CollectionId {
        CollectionId(self.next_collection.fetch_add(1, Ordering::Relaxed))
    }

    pub fn register<F>(&self, id: DecoderId, decoder: F) -> Result<()>
    where
        F: Fn(Place, &mut ByteReader<'_>) -> Result<()> + Send + Sync + 'static,
    {
        let mut decoders = self.decoders.write();
        if decoders.contains_key(&id) {
            return Err(DistError::DuplicateDecoder(id));
        }
        decoders.insert(id, Arc::new(decoder));
        Ok(())
    }

    /// Drop every decoder of `collection`.
    pub fn unregister_collection(&self, collection: CollectionId) {
        self.decoders
            .write()
            .retain(|id, _| id.collection != collection);
    }

    pub fn get(&self, id: DecoderId) -> Result<Decoder> {
        self.decoders
            .read()
            .get(&id)
            .cloned()
            .ok_or(DistError::UnknownDecoder(id))
    }

    /// Run decoder `id` over `reader`. The registry lock is not held while
    /// the decoder runs.
    pub fn decode(&self, id: DecoderId, source: Place, reader: &mut ByteReader<'_>) -> Result<()> {
        let decoder = self.get(id)?;
        decoder(source, reader)
    }

    pub fn len(&self) -> usize {
        self.decoders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
