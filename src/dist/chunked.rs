//! # Distributed chunked list
//!
//! A global index space split into chunks spread over the places of a team.
//! Each place holds its chunks in a [`ChunkedList`] and tracks ownership of
//! chunk ranges in a [`LocationManager`]. Location keys always coincide with
//! the local chunk ranges: whenever a chunk is cut for relocation its key is
//! split at the same bounds.

use super::{ops, Element};
use crate::chunk::{Chunk, ChunkedList, RangedList};
use crate::context::PlaceContext;
use crate::distribution::RangedDistribution;
use crate::error::{DistError, Result};
use crate::location::{LocationManager, Provenance, SharedSnapshot};
use crate::range::Interval;
use crate::registry::{CollectionId, DecoderId};
use crate::relocation::{CollectiveMoveManager, MoveManager, OneSidedMoveManager, SyncReport};
use crate::team::Place;
use crate::wire::{ByteReader, ByteWriter};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tracing::{debug, instrument, warn};

struct Inner<T> {
    id: CollectionId,
    ctx: PlaceContext,
    list: RwLock<ChunkedList<T>>,
    locations: Mutex<LocationManager<Interval>>,
    distribution: Arc<RwLock<RangedDistribution>>,
}

impl<T> Drop for Inner<T> {
    fn drop(&mut self) {
        self.ctx.registry().unregister_collection(self.id);
    }
}

impl<T: Element> Inner<T> {
    fn check_size(&self, range: Interval) -> Result<()> {
        let max = self.ctx.config().collections.max_chunk_elements;
        if range.size() > max {
            return Err(DistError::ChunkTooLarge {
                range,
                size: range.size(),
                max,
            });
        }
        Ok(())
    }

    /// Encode side of a move: cut `range` out of local storage and hand its
    /// keys to `dest`.
    fn send_chunks(&self, range: Interval, dest: Place, w: &mut ByteWriter) -> Result<()> {
        let mut list = self.list.write();
        let mut locations = self.locations.lock();
        if !list.covers(range) {
            return Err(DistError::NotLocal(range.from()));
        }
        for key in locations.local_overlapping(&range) {
            if range.contains_range(&key) {
                continue;
            }
            let mut pieces = key.difference(&range);
            pieces.extend(key.intersection(&range));
            pieces.sort();
            locations.split(&key, &pieces)?;
        }
        let chunks = list.take(range)?;
        w.write(&(chunks.len() as u64))?;
        for chunk in chunks {
            let provenance = locations.move_out(&chunk.range(), dest)?;
            w.write(&provenance)?;
            w.write(&chunk)?;
        }
        Ok(())
    }

    fn receive_chunks(&self, source: Place, reader: &mut ByteReader<'_>) -> Result<()> {
        let count = reader.read::<u64>()?;
        for _ in 0..count {
            let provenance: Provenance = reader.read()?;
            let chunk: Chunk<T> = reader.read()?;
            chunk.validate()?;
            let range = chunk.range();
            self.check_size(range)?;
            self.list.write().add(chunk)?;
            self.locations.lock().move_in(range, provenance)?;
            debug!(
                "place {} received chunk {} from place {}",
                self.ctx.place(),
                range,
                source
            );
        }
        Ok(())
    }
}

/// Handle to one place's share of a distributed chunked list. Clones share
/// the same storage.
pub struct DistChunkedList<T: Element> {
    inner: Arc<Inner<T>>,
}

impl<T: Element> Clone for DistChunkedList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Element> std::fmt::Debug for DistChunkedList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistChunkedList")
            .field("id", &self.inner.id)
            .field("place", &self.inner.ctx.place())
            .field("len", &self.len())
            .finish()
    }
}

impl<T: Element> DistChunkedList<T> {
    /// Bring up this place's handle. Every place must create its
    /// collections in the same order.
    pub fn new(ctx: &PlaceContext) -> Result<Self> {
        let id = ctx.registry().allocate_collection();
        let distribution = Arc::new(RwLock::new(RangedDistribution::new()));
        let mut locations = LocationManager::new(ctx.place());
        locations.register_distribution(distribution.clone());

        let inner = Arc::new(Inner {
            id,
            ctx: ctx.clone(),
            list: RwLock::new(ChunkedList::new()),
            locations: Mutex::new(locations),
            distribution,
        });
        let weak: Weak<Inner<T>> = Arc::downgrade(&inner);
        ctx.registry()
            .register(DecoderId::new(id, ops::MOVE_CHUNKS), move |source, reader| {
                let inner = weak.upgrade().ok_or_else(|| {
                    DistError::IllegalState(format!("collection {id} was dropped"))
                })?;
                inner.receive_chunks(source, reader)
            })?;
        Ok(Self { inner })
    }

    pub fn id(&self) -> CollectionId {
        self.inner.id
    }

    pub fn context(&self) -> &PlaceContext {
        &self.inner.ctx
    }

    /// Register a chunk created on this place. Its range must not overlap
    /// any range this place knows to be owned, here or elsewhere.
    pub fn add_chunk(&self, chunk: Chunk<T>) -> Result<()> {
        let range = chunk.range();
        self.inner.check_size(range)?;
        let mut list = self.inner.list.write();
        let mut locations = self.inner.locations.lock();
        if let Some((existing, _)) = self.inner.distribution.read().find_overlapping(&range) {
            return Err(DistError::Overlap { range, existing });
        }
        list.add(chunk)?;
        locations.add(range)
    }

    /// Remove the local chunk registered under exactly `range`.
    pub fn remove_chunk(&self, range: Interval) -> Result<Chunk<T>> {
        let mut list = self.inner.list.write();
        let mut locations = self.inner.locations.lock();
        let chunk = list
            .remove(&range)
            .ok_or(DistError::NotLocal(range.from()))?;
        locations.remove(&range)?;
        Ok(chunk)
    }

    pub fn get(&self, index: i64) -> Result<T> {
        self.inner.list.read().get(index).cloned()
    }

    /// Replace a locally held element, returning the previous value.
    pub fn set(&self, index: i64, value: T) -> Result<T> {
        self.inner.list.write().set(index, value)
    }

    pub fn contains(&self, index: i64) -> bool {
        self.inner.list.read().contains(index)
    }

    /// Read access to the local chunks.
    pub fn with_local<R>(&self, f: impl FnOnce(&ChunkedList<T>) -> R) -> R {
        f(&self.inner.list.read())
    }

    /// Cut the local chunk holding `index` so that a chunk boundary, and a
    /// location key boundary, falls on it. A no-op on an existing boundary.
    pub fn split_at(&self, index: i64) -> Result<()> {
        let mut list = self.inner.list.write();
        let mut locations = self.inner.locations.lock();
        let Some(key) = list.chunk_containing(index).map(|c| c.range()) else {
            return Err(DistError::NotLocal(index));
        };
        if key.from() == index {
            return Ok(());
        }
        let head = Interval::new(key.from(), index)?;
        let tail = Interval::new(index, key.to())?;
        locations.split(&key, &[head, tail])?;
        list.split_at(index)
    }

    /// Apply `f` to every locally held element of `range`; indices not held
    /// here are skipped.
    pub(crate) fn update_local_in(
        &self,
        range: Interval,
        mut f: impl FnMut(i64, &mut T) -> Result<()>,
    ) -> Result<()> {
        let mut list = self.inner.list.write();
        for index in range.indices() {
            if let Ok(value) = list.get_mut(index) {
                f(index, value)?;
            }
        }
        Ok(())
    }

    /// Number of locally held elements.
    pub fn len(&self) -> usize {
        self.inner.list.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Collective: number of elements over all places.
    pub fn global_len(&self) -> Result<u64> {
        let mut writer = ByteWriter::new();
        writer.write(&(self.len() as u64))?;
        let gathered = self.inner.ctx.team().all_gather(writer.into_bytes())?;
        gathered
            .iter()
            .map(|bytes| ByteReader::new(bytes).read::<u64>())
            .sum()
    }

    /// Ranges of the local chunks in index order.
    pub fn ranges(&self) -> Vec<Interval> {
        self.inner.list.read().ranges()
    }

    /// Owner of `index` as far as this place knows.
    pub fn owner_of(&self, index: i64) -> Option<Place> {
        self.inner.distribution.read().place_of(index)
    }

    /// Copy of this place's view of the distribution.
    pub fn distribution(&self) -> RangedDistribution {
        self.inner.distribution.read().clone()
    }

    /// Subscribe an external snapshot to ownership changes.
    pub fn register_distribution(&self, snapshot: SharedSnapshot<Interval>) {
        self.inner.locations.lock().register_distribution(snapshot);
    }

    /// Collective: reconcile ownership knowledge with every place.
    pub fn update_dist(&self) -> Result<usize> {
        self.inner.locations.lock().update(self.inner.ctx.team())
    }

    /// Queue the relocation of `range` to `dest`. The range must be held
    /// here now and still be held when the manager flushes; chunks are cut
    /// at its bounds at that point.
    pub fn move_range_at_sync<M: MoveManager>(
        &self,
        range: Interval,
        dest: Place,
        mm: &mut M,
    ) -> Result<()> {
        self.move_range_guarded(range, dest, mm, || Ok(()))
    }

    /// Like [`DistChunkedList::move_range_at_sync`], with `guard` checked
    /// again when the manager flushes, before anything is cut.
    pub(crate) fn move_range_guarded<M, G>(
        &self,
        range: Interval,
        dest: Place,
        mm: &mut M,
        guard: G,
    ) -> Result<()>
    where
        M: MoveManager,
        G: FnOnce() -> Result<()> + 'static,
    {
        if range.is_empty() {
            return Ok(());
        }
        if !self.inner.list.read().covers(range) {
            return Err(DistError::NotLocal(range.from()));
        }
        let inner = self.inner.clone();
        mm.request(
            dest,
            DecoderId::new(self.inner.id, ops::MOVE_CHUNKS),
            move |w| {
                guard()?;
                inner.send_chunks(range, dest, w)
            },
        )
    }

    /// Relocate `range` to the manager's destination and wait until it has
    /// been received there.
    pub fn move_range_one_sided(&self, range: Interval, mm: &mut OneSidedMoveManager) -> Result<()> {
        self.move_range_at_sync(range, mm.destination(), mm)?;
        mm.send()
    }

    /// Collective: even out the number of elements per place.
    ///
    /// Every place gathers all ranges, sorts them and splits the
    /// concatenation into one equal share per place; share `p` goes to place
    /// `p`. The plan is computed identically everywhere, so each place only
    /// queues the moves of its own ranges. Ownership is reconciled before
    /// returning.
    ///
    /// A local failure does not skip the collective steps: the place still
    /// takes part in the sync and the reconciliation, and the first failure
    /// is returned afterwards.
    #[instrument(skip(self, mm), level = "debug", fields(place = %self.inner.ctx.place()))]
    pub fn balance(&self, mm: &mut CollectiveMoveManager) -> Result<SyncReport> {
        let team = self.inner.ctx.team();
        let me = team.place();
        let local = self.ranges();
        let mut first_error: Option<DistError> = None;

        let mut writer = ByteWriter::new();
        if let Err(err) = writer.write(&local) {
            first_error.get_or_insert(err);
            writer = ByteWriter::new();
        }
        let mut all: Vec<Interval> = Vec::new();
        for bytes in team.all_gather(writer.into_bytes())? {
            if bytes.is_empty() {
                continue;
            }
            match ByteReader::new(&bytes).read::<Vec<Interval>>() {
                Ok(ranges) => all.extend(ranges),
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        all.sort();

        let shares = match first_error {
            None => Interval::split_list(team.size(), &all),
            Some(_) => Ok(Vec::new()),
        };
        match shares {
            Ok(shares) => {
                for (target, share) in shares.iter().enumerate() {
                    let target = Place::new(target);
                    if target == me {
                        continue;
                    }
                    for piece in share {
                        if !local.iter().any(|r| r.contains_range(piece)) {
                            continue;
                        }
                        if let Err(err) = self.move_range_at_sync(*piece, target, mm) {
                            warn!(
                                "place {} cannot move {} to place {}: {}",
                                me, piece, target, err
                            );
                            first_error.get_or_insert(err);
                        }
                    }
                }
            }
            Err(err) => {
                first_error.get_or_insert(err);
            }
        }
        let synced = mm.sync();
        let updated = self.update_dist();
        if let Some(err) = first_error {
            return Err(err);
        }
        let report = synced?;
        updated?;
        Ok(report)
    }

    /// Visit every local element in index order.
    pub fn for_each(&self, f: impl FnMut(i64, &T)) {
        self.inner.list.read().for_each(f);
    }

    /// Update every local element in index order. Chunk ranges stay as
    /// they are.
    pub fn for_each_mut(&self, f: impl FnMut(i64, &mut T)) {
        self.inner.list.write().for_each_mut(f);
    }

    /// Visit every local element, collecting each failure.
    pub fn try_for_each_collect(
        &self,
        f: impl FnMut(i64, &T) -> Result<()>,
    ) -> Vec<(i64, DistError)> {
        self.inner.list.read().try_for_each_collect(f)
    }

    /// Visit every local element on the rayon pool, split into the
    /// configured number of parts.
    pub fn parallel_for_each<F>(&self, f: F) -> Result<()>
    where
        F: Fn(i64, &T) + Sync + Send,
    {
        let parts = self.inner.ctx.config().collections.parallelism;
        self.inner.list.read().parallel_for_each(parts, f)
    }

    pub fn parallel_for_each_mut<F>(&self, f: F) -> Result<()>
    where
        F: Fn(i64, &mut T) + Sync + Send,
    {
        let parts = self.inner.ctx.config().collections.parallelism;
        self.inner.list.write().parallel_for_each_mut(parts, f)
    }
}
