//! # Cachable chunked list
//!
//! A distributed chunked list whose places may also hold read-only copies
//! ("mirrors") of ranges owned elsewhere. Owned data lives in a
//! [`DistChunkedList`], so it keeps its location tracking, distribution and
//! relocation. Mirrors are kept apart and are only written by the collective
//! [`CachableChunkedList::allreduce`] and [`CachableChunkedList::bcast`]
//! calls.
//!
//! Bookkeeping per place:
//!
//! * `sent`: ranges of owned data shared out, per destination;
//! * `all_sent`: every range of owned data shared out;
//! * `forwarded`: mirrored ranges re-shared to a third place since the last
//!   [`CachableChunkedList::update_shared`].
//!
//! Owned ranges that are mirrored somewhere, and mirrored ranges, cannot be
//! removed, split or relocated; see [`CachableChunkedList::assert_unshared`].
//!
//! Lock order: share state, then the owned list.

use crate::chunk::{Chunk, ChunkedList, RangedList, RangedSlice};
use crate::context::PlaceContext;
use crate::dist::{ops, DistChunkedList, Element};
use crate::distribution::RangedDistribution;
use crate::error::{DistError, Result};
use crate::range::{coalesce, find_overlapping, Interval};
use crate::registry::{CollectionId, DecoderId};
use crate::relocation::MoveManager;
use crate::team::Place;
use crate::wire::{ByteReader, ByteWriter};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use tracing::{debug, instrument, warn};

/// Read-only copy of a range owned by another place.
#[derive(Debug, Clone)]
pub struct Mirror<T> {
    owner: Place,
    chunk: Chunk<T>,
}

impl<T> Mirror<T> {
    pub fn owner(&self) -> Place {
        self.owner
    }

    pub fn range(&self) -> Interval {
        self.chunk.range()
    }

    pub fn get(&self, index: i64) -> Result<&T> {
        self.chunk.get(index)
    }

    pub fn as_view(&self) -> RangedSlice<'_, T> {
        self.chunk.as_view()
    }
}

/// A mirrored range passed on to `dest` by a place that does not own it.
type Forward = (Place, Interval, Place);

struct ShareState<T> {
    mirrors: BTreeMap<Interval, Mirror<T>>,
    sent: BTreeMap<Place, BTreeSet<Interval>>,
    all_sent: BTreeSet<Interval>,
    forwarded: Vec<Forward>,
}

impl<T> Default for ShareState<T> {
    fn default() -> Self {
        Self {
            mirrors: BTreeMap::new(),
            sent: BTreeMap::new(),
            all_sent: BTreeSet::new(),
            forwarded: Vec::new(),
        }
    }
}

impl<T> ShareState<T> {
    fn overlapping_mirror(&self, range: &Interval) -> Option<Interval> {
        find_overlapping(&self.mirrors, range).map(|(key, _)| *key)
    }

    fn overlapping_sent(&self, range: &Interval) -> Option<Interval> {
        self.all_sent
            .iter()
            .find(|sent| sent.is_overlapped(range))
            .copied()
    }

    fn assert_unshared(&self, range: Interval) -> Result<()> {
        if let Some(shared) = self.overlapping_mirror(&range) {
            return Err(DistError::Shared { range, shared });
        }
        if let Some(shared) = self.overlapping_sent(&range) {
            return Err(DistError::Shared { range, shared });
        }
        Ok(())
    }

    fn record_sent(&mut self, dest: Place, range: Interval) {
        self.sent.entry(dest).or_default().insert(range);
        self.all_sent.insert(range);
    }

    /// Run `apply` on every mirrored slot inside `range`.
    fn update_mirrors_in(
        &mut self,
        range: Interval,
        mut apply: impl FnMut(i64, &mut T) -> Result<()>,
    ) -> Result<()> {
        for mirror in self.mirrors.values_mut() {
            if let Some(common) = mirror.range().intersection(&range) {
                for index in common.indices() {
                    apply(index, mirror.chunk.get_mut(index)?)?;
                }
            }
        }
        Ok(())
    }
}

/// Pack one `(range, values)` fragment per range, reading owned slots first
/// and mirrors second.
fn pack_fragments<T, P, F>(
    owned: &ChunkedList<T>,
    mirrors: &BTreeMap<Interval, Mirror<T>>,
    ranges: &[Interval],
    pack: &F,
) -> Result<Vec<u8>>
where
    P: Serialize,
    F: Fn(i64, &T) -> Result<P>,
{
    let mut writer = ByteWriter::new();
    writer.write(&(ranges.len() as u64))?;
    for range in ranges {
        let mut packed = Vec::with_capacity(range.size() as usize);
        for index in range.indices() {
            let value = match owned.get(index) {
                Ok(value) => value,
                Err(_) => find_overlapping(mirrors, &Interval::singleton(index))
                    .ok_or(DistError::NotLocal(index))
                    .and_then(|(_, mirror)| mirror.get(index))?,
            };
            packed.push(pack(index, value)?);
        }
        writer.write(range)?;
        writer.write_segment(|w| w.write(&packed))?;
    }
    Ok(writer.into_bytes())
}

struct Inner<T: Element> {
    id: CollectionId,
    ctx: PlaceContext,
    owned: DistChunkedList<T>,
    state: RwLock<ShareState<T>>,
}

impl<T: Element> Drop for Inner<T> {
    fn drop(&mut self) {
        self.ctx.registry().unregister_collection(self.id);
    }
}

impl<T: Element> Inner<T> {
    fn send_share(&self, range: Interval, dest: Place, w: &mut ByteWriter) -> Result<()> {
        let me = self.ctx.place();
        let mut state = self.state.write();
        let mut pieces: Vec<(Place, Chunk<T>)> = self.owned.with_local(|owned| {
            owned
                .overlapping(range)
                .filter_map(|chunk| {
                    let common = chunk.range().intersection(&range)?;
                    Some(chunk.sub_chunk(common).map(|piece| (me, piece)))
                })
                .collect::<Result<_>>()
        })?;
        let mut forwards = Vec::new();
        for mirror in state.mirrors.values() {
            let Some(common) = mirror.range().intersection(&range) else {
                continue;
            };
            if mirror.owner == dest {
                continue;
            }
            forwards.push((mirror.owner, common, dest));
            pieces.push((mirror.owner, mirror.chunk.sub_chunk(common)?));
        }

        w.write(&(pieces.len() as u64))?;
        for (owner, chunk) in &pieces {
            w.write(owner)?;
            w.write(chunk)?;
        }
        for (owner, chunk) in &pieces {
            if *owner == me {
                state.record_sent(dest, chunk.range());
            }
        }
        state.forwarded.extend(forwards);
        debug!(
            "place {} shared {} pieces of {} with place {}",
            me,
            pieces.len(),
            range,
            dest
        );
        Ok(())
    }

    fn receive_share(&self, source: Place, reader: &mut ByteReader<'_>) -> Result<()> {
        let count = reader.read::<u64>()?;
        let mut state = self.state.write();
        for _ in 0..count {
            let owner: Place = reader.read()?;
            let chunk: Chunk<T> = reader.read()?;
            chunk.validate()?;
            let range = chunk.range();
            let owned_overlap = self
                .owned
                .with_local(|owned| owned.overlapping(range).next().map(|c| c.range()));
            if let Some(existing) = owned_overlap {
                return Err(DistError::Overlap { range, existing });
            }
            if let Some(existing) = state.overlapping_sent(&range) {
                return Err(DistError::Overlap { range, existing });
            }
            match state.overlapping_mirror(&range) {
                Some(existing) if existing == range => {
                    debug!("place {} refreshing mirror {}", self.ctx.place(), range);
                }
                Some(existing) => return Err(DistError::Overlap { range, existing }),
                None => {}
            }
            debug!(
                "place {} mirroring {} owned by place {} (via place {})",
                self.ctx.place(),
                range,
                owner,
                source
            );
            state.mirrors.insert(range, Mirror { owner, chunk });
        }
        Ok(())
    }

    fn owns_part_of(&self, range: Interval) -> bool {
        self.owned
            .with_local(|owned| owned.overlapping(range).next().is_some())
    }
}

/// Handle to one place's share of a cachable chunked list. Clones share
/// the same storage.
pub struct CachableChunkedList<T: Element> {
    inner: Arc<Inner<T>>,
}

impl<T: Element> Clone for CachableChunkedList<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Element> std::fmt::Debug for CachableChunkedList<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.read();
        f.debug_struct("CachableChunkedList")
            .field("id", &self.inner.id)
            .field("place", &self.inner.ctx.place())
            .field("owned", &self.inner.owned.with_local(ChunkedList::num_chunks))
            .field("mirrors", &state.mirrors.len())
            .field("shared", &state.all_sent.len())
            .finish()
    }
}

impl<T: Element> CachableChunkedList<T> {
    /// Bring up this place's handle. Every place must create its
    /// collections in the same order; a cachable list takes two collection
    /// ids, one for its owned chunks and one for its shares.
    pub fn new(ctx: &PlaceContext) -> Result<Self> {
        let owned = DistChunkedList::new(ctx)?;
        let id = ctx.registry().allocate_collection();
        let inner = Arc::new(Inner {
            id,
            ctx: ctx.clone(),
            owned,
            state: RwLock::new(ShareState::default()),
        });
        let weak: Weak<Inner<T>> = Arc::downgrade(&inner);
        ctx.registry()
            .register(DecoderId::new(id, ops::SHARE_CHUNKS), move |source, reader| {
                let inner = weak.upgrade().ok_or_else(|| {
                    DistError::IllegalState(format!("collection {id} was dropped"))
                })?;
                inner.receive_share(source, reader)
            })?;
        Ok(Self { inner })
    }

    pub fn id(&self) -> CollectionId {
        self.inner.id
    }

    pub fn context(&self) -> &PlaceContext {
        &self.inner.ctx
    }

    /// Add an owned chunk. It may not overlap mirrored data, nor any range
    /// this place knows to be owned.
    pub fn add_chunk(&self, chunk: Chunk<T>) -> Result<()> {
        let range = chunk.range();
        let state = self.inner.state.read();
        if let Some(existing) = state.overlapping_mirror(&range) {
            return Err(DistError::Overlap { range, existing });
        }
        self.inner.owned.add_chunk(chunk)
    }

    /// Remove the owned chunk registered under exactly `range`. Fails with
    /// [`DistError::Shared`] if any part of it has been shared out.
    pub fn remove_chunk(&self, range: Interval) -> Result<Chunk<T>> {
        let state = self.inner.state.write();
        state.assert_unshared(range)?;
        self.inner.owned.remove_chunk(range)
    }

    /// Cut the owned chunk holding `index` at `index`. The chunk must not
    /// be shared.
    pub fn split_at(&self, index: i64) -> Result<()> {
        let state = self.inner.state.write();
        let range = self
            .inner
            .owned
            .with_local(|owned| owned.chunk_containing(index).map(|c| c.range()))
            .ok_or(DistError::NotLocal(index))?;
        state.assert_unshared(range)?;
        self.inner.owned.split_at(index)
    }

    /// Fail with [`DistError::Shared`] if `range` overlaps a mirror or a
    /// range this place has shared out.
    pub fn assert_unshared(&self, range: Interval) -> Result<()> {
        self.inner.state.read().assert_unshared(range)
    }

    /// Read an element, owned or mirrored.
    pub fn get(&self, index: i64) -> Result<T> {
        let state = self.inner.state.read();
        if let Ok(value) = self.inner.owned.get(index) {
            return Ok(value);
        }
        find_overlapping(&state.mirrors, &Interval::singleton(index))
            .ok_or(DistError::NotLocal(index))
            .and_then(|(_, mirror)| mirror.get(index).cloned())
    }

    /// Overwrite an owned element. Mirrored elements are read-only.
    pub fn set(&self, index: i64, value: T) -> Result<T> {
        self.inner.owned.set(index, value)
    }

    pub fn is_mirrored(&self, index: i64) -> bool {
        let state = self.inner.state.read();
        state.overlapping_mirror(&Interval::singleton(index)).is_some()
    }

    /// Read access to the owned chunks.
    pub fn with_owned<R>(&self, f: impl FnOnce(&ChunkedList<T>) -> R) -> R {
        self.inner.owned.with_local(f)
    }

    /// Update every owned element in index order. Mirrors are untouched.
    pub fn for_each_mut(&self, f: impl FnMut(i64, &mut T)) {
        self.inner.owned.for_each_mut(f);
    }

    /// Update every owned element on the rayon pool.
    pub fn parallel_for_each_mut<F>(&self, f: F) -> Result<()>
    where
        F: Fn(i64, &mut T) + Sync + Send,
    {
        self.inner.owned.parallel_for_each_mut(f)
    }

    /// Read access to the mirror registered under exactly `range`.
    pub fn with_mirror<R>(&self, range: Interval, f: impl FnOnce(&Mirror<T>) -> R) -> Option<R> {
        self.inner.state.read().mirrors.get(&range).map(f)
    }

    /// Mirrored ranges with their owners, in index order.
    pub fn mirrors(&self) -> Vec<(Interval, Place)> {
        self.inner
            .state
            .read()
            .mirrors
            .iter()
            .map(|(range, mirror)| (*range, mirror.owner))
            .collect()
    }

    /// Ranges of owned data shared with `dest`.
    pub fn sent_ranges(&self, dest: Place) -> Vec<Interval> {
        self.inner
            .state
            .read()
            .sent
            .get(&dest)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every range of owned data shared out, merged into disjoint ranges.
    pub fn shared_ranges(&self) -> Vec<Interval> {
        coalesce(self.inner.state.read().all_sent.iter().copied())
    }

    /// Number of owned elements held here.
    pub fn len(&self) -> usize {
        self.inner.owned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ranges of the owned chunks in index order.
    pub fn ranges(&self) -> Vec<Interval> {
        self.inner.owned.ranges()
    }

    /// Owner of `index` as far as this place knows. Mirrors do not count.
    pub fn owner_of(&self, index: i64) -> Option<Place> {
        self.inner.owned.owner_of(index)
    }

    pub fn distribution(&self) -> RangedDistribution {
        self.inner.owned.distribution()
    }

    /// Collective: number of owned elements over all places.
    pub fn global_len(&self) -> Result<u64> {
        self.inner.owned.global_len()
    }

    /// Collective: reconcile ownership of owned ranges with every place.
    pub fn update_dist(&self) -> Result<usize> {
        self.inner.owned.update_dist()
    }

    /// Queue the relocation of owned `range` to `dest`.
    ///
    /// The range must not be shared, now or when the manager flushes;
    /// otherwise [`DistError::Shared`] is returned and nothing is cut.
    pub fn move_range_at_sync<M: MoveManager>(
        &self,
        range: Interval,
        dest: Place,
        mm: &mut M,
    ) -> Result<()> {
        self.assert_unshared(range)?;
        let inner = self.inner.clone();
        self.inner
            .owned
            .move_range_guarded(range, dest, mm, move || {
                let state = inner.state.read();
                state.assert_unshared(range)
            })
    }

    /// Queue a share of every local piece, owned or mirrored, overlapping
    /// `range` with `dest`. Pieces mirrored from `dest` itself are skipped.
    pub fn share_range_at_sync<M: MoveManager>(
        &self,
        range: Interval,
        dest: Place,
        mm: &mut M,
    ) -> Result<()> {
        if range.is_empty() {
            return Ok(());
        }
        let inner = self.inner.clone();
        mm.request(
            dest,
            DecoderId::new(self.inner.id, ops::SHARE_CHUNKS),
            move |w| inner.send_share(range, dest, w),
        )
    }

    /// Collective: combine owner and mirror contributions on every shared
    /// range.
    ///
    /// Owners pack their shared-out ranges, mirrors pack their mirrored
    /// ranges; every place then applies `unpack` once per foreign fragment
    /// onto its owned and mirrored slots in the overlap.
    #[instrument(skip(self, pack, unpack), level = "debug", fields(place = %self.inner.ctx.place()))]
    pub fn allreduce<P, F, U>(&self, pack: F, unpack: U) -> Result<()>
    where
        P: Serialize + DeserializeOwned,
        F: Fn(i64, &T) -> Result<P>,
        U: Fn(i64, &mut T, P) -> Result<()>,
    {
        let (owner_ranges, mirror_ranges) = {
            let state = self.inner.state.read();
            let owners = coalesce(state.all_sent.iter().copied());
            let mirrors: Vec<Interval> = state.mirrors.keys().copied().collect();
            (owners, mirrors)
        };
        let mut ranges = owner_ranges;
        ranges.extend(mirror_ranges);
        self.exchange(&ranges, true, pack, unpack)
    }

    /// Collective: overwrite every mirror with its owner's values.
    #[instrument(skip(self, pack, unpack), level = "debug", fields(place = %self.inner.ctx.place()))]
    pub fn bcast<P, F, U>(&self, pack: F, unpack: U) -> Result<()>
    where
        P: Serialize + DeserializeOwned,
        F: Fn(i64, &T) -> Result<P>,
        U: Fn(i64, &mut T, P) -> Result<()>,
    {
        let ranges = coalesce(self.inner.state.read().all_sent.iter().copied());
        self.exchange(&ranges, false, pack, unpack)
    }

    /// Pack `ranges`, all-gather the fragments and unpack every foreign
    /// fragment onto local slots. `into_owned` selects whether owned slots
    /// receive contributions or only mirrors do.
    ///
    /// A place whose packing fails contributes nothing but still takes part
    /// in the gather and applies what it receives; its error is returned
    /// afterwards.
    fn exchange<P, F, U>(
        &self,
        ranges: &[Interval],
        into_owned: bool,
        pack: F,
        unpack: U,
    ) -> Result<()>
    where
        P: Serialize + DeserializeOwned,
        F: Fn(i64, &T) -> Result<P>,
        U: Fn(i64, &mut T, P) -> Result<()>,
    {
        let ctx = &self.inner.ctx;
        let me = ctx.place();

        let packed = {
            let state = self.inner.state.read();
            self.inner
                .owned
                .with_local(|owned| pack_fragments(owned, &state.mirrors, ranges, &pack))
        };
        let mut first_error: Option<DistError> = None;
        let contribution = packed.unwrap_or_else(|err| {
            warn!("place {} contributes nothing to the exchange: {}", me, err);
            first_error = Some(err);
            Vec::new()
        });
        let gathered = ctx.team().all_gather(contribution)?;

        let mut state = self.inner.state.write();
        let mut applied = 0usize;
        for (source, bytes) in gathered.iter().enumerate() {
            if Place::new(source) == me || bytes.is_empty() {
                continue;
            }
            let mut reader = ByteReader::new(bytes);
            let count = reader.read::<u64>()?;
            for _ in 0..count {
                let range: Interval = reader.read()?;
                let owned_hit = into_owned && self.inner.owns_part_of(range);
                if !owned_hit && state.overlapping_mirror(&range).is_none() {
                    reader.skip_segment()?;
                    continue;
                }
                let mut segment = reader.read_segment()?;
                let mut values: Vec<Option<P>> =
                    segment.read::<Vec<P>>()?.into_iter().map(Some).collect();
                let mut apply = |index: i64, slot: &mut T| {
                    let offset = index.abs_diff(range.from()) as usize;
                    match values.get_mut(offset).and_then(Option::take) {
                        Some(value) => unpack(index, slot, value),
                        None => Err(DistError::IllegalState(format!(
                            "fragment {range} has no value for index {index}"
                        ))),
                    }
                };
                if owned_hit {
                    self.inner.owned.update_local_in(range, &mut apply)?;
                }
                state.update_mirrors_in(range, &mut apply)?;
                applied += 1;
            }
        }
        debug!("place {} applied {} foreign fragments", me, applied);
        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Collective: tell owners about every place their data was forwarded
    /// to by a mirror. Returns the number of records this place applied.
    #[instrument(skip(self), level = "debug", fields(place = %self.inner.ctx.place()))]
    pub fn update_shared(&self) -> Result<usize> {
        let ctx = &self.inner.ctx;
        let me = ctx.place();
        let forwarded = std::mem::take(&mut self.inner.state.write().forwarded);
        let mut first_error: Option<DistError> = None;
        let mut writer = ByteWriter::new();
        if let Err(err) = writer.write(&forwarded) {
            first_error = Some(err);
            writer = ByteWriter::new();
        }
        let gathered = ctx.team().all_gather(writer.into_bytes())?;

        let mut state = self.inner.state.write();
        let mut applied = 0;
        for bytes in gathered.iter().filter(|bytes| !bytes.is_empty()) {
            for (owner, range, dest) in ByteReader::new(bytes).read::<Vec<Forward>>()? {
                if owner != me {
                    continue;
                }
                if !self.inner.owns_part_of(range) {
                    warn!(
                        "place {} told it shared {} with place {} but no longer owns it",
                        me, range, dest
                    );
                }
                state.record_sent(dest, range);
                applied += 1;
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }
}
