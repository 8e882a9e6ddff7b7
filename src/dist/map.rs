//! # Distributed map
//!
//! A hashed collection whose entries are spread over the places of a team.
//! Keys are tracked individually by a [`LocationManager`].

use super::{ops, Element};
use crate::context::PlaceContext;
use crate::distribution::MapDistribution;
use crate::error::{DistError, Result};
use crate::location::{LocationKey, LocationManager, Provenance, SharedSnapshot};
use crate::registry::{CollectionId, DecoderId};
use crate::relocation::MoveManager;
use crate::team::Place;
use crate::wire::{ByteReader, ByteWriter};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::{Arc, Weak};
use tracing::debug;

struct Inner<K: LocationKey, V> {
    id: CollectionId,
    ctx: PlaceContext,
    entries: RwLock<FxHashMap<K, V>>,
    locations: Mutex<LocationManager<K>>,
    distribution: Arc<RwLock<MapDistribution<K>>>,
}

impl<K: LocationKey, V> Drop for Inner<K, V> {
    fn drop(&mut self) {
        self.ctx.registry().unregister_collection(self.id);
    }
}

impl<K: LocationKey, V: Element> Inner<K, V> {
    fn send_entries(&self, keys: &[K], dest: Place, w: &mut ByteWriter) -> Result<()> {
        let mut entries = self.entries.write();
        let mut locations = self.locations.lock();
        // Resolve everything before touching ownership so a missing key
        // leaves the map untouched.
        if let Some(missing) = keys.iter().find(|key| !entries.contains_key(*key)) {
            return Err(DistError::tag_mismatch(
                missing,
                format!("not held at place {}", self.ctx.place()),
            ));
        }
        w.write(&(keys.len() as u64))?;
        for key in keys {
            let provenance = locations.move_out(key, dest)?;
            let value = entries
                .remove(key)
                .ok_or_else(|| DistError::tag_mismatch(key, "entry vanished while moving"))?;
            w.write(key)?;
            w.write(&provenance)?;
            w.write(&value)?;
        }
        Ok(())
    }

    fn receive_entries(&self, source: Place, reader: &mut ByteReader<'_>) -> Result<()> {
        let count = reader.read::<u64>()?;
        let mut entries = self.entries.write();
        let mut locations = self.locations.lock();
        for _ in 0..count {
            let key: K = reader.read()?;
            let provenance: Provenance = reader.read()?;
            let value: V = reader.read()?;
            locations.move_in(key.clone(), provenance)?;
            entries.insert(key, value);
        }
        debug!(
            "place {} received {} entries from place {}",
            self.ctx.place(),
            count,
            source
        );
        Ok(())
    }
}

/// Handle to one place's share of a distributed map. Clones share storage.
pub struct DistMap<K: LocationKey, V: Element> {
    inner: Arc<Inner<K, V>>,
}

impl<K: LocationKey, V: Element> Clone for DistMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: LocationKey, V: Element> std::fmt::Debug for DistMap<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistMap")
            .field("id", &self.inner.id)
            .field("place", &self.inner.ctx.place())
            .field("len", &self.len())
            .finish()
    }
}

impl<K: LocationKey, V: Element> DistMap<K, V> {
    /// Bring up this place's handle. Every place must create its
    /// collections in the same order.
    pub fn new(ctx: &PlaceContext) -> Result<Self> {
        let id = ctx.registry().allocate_collection();
        let distribution = Arc::new(RwLock::new(MapDistribution::new()));
        let mut locations = LocationManager::new(ctx.place());
        locations.register_distribution(distribution.clone());

        let inner = Arc::new(Inner {
            id,
            ctx: ctx.clone(),
            entries: RwLock::new(FxHashMap::default()),
            locations: Mutex::new(locations),
            distribution,
        });
        let weak: Weak<Inner<K, V>> = Arc::downgrade(&inner);
        ctx.registry().register(
            DecoderId::new(id, ops::MOVE_ENTRIES),
            move |source, reader| {
                let inner = weak.upgrade().ok_or_else(|| {
                    DistError::IllegalState(format!("collection {id} was dropped"))
                })?;
                inner.receive_entries(source, reader)
            },
        )?;
        Ok(Self { inner })
    }

    pub fn id(&self) -> CollectionId {
        self.inner.id
    }

    /// Insert or overwrite a local entry. A new key must not be known to be
    /// owned by another place.
    pub fn put(&self, key: K, value: V) -> Result<Option<V>> {
        let mut entries = self.inner.entries.write();
        if let Some(slot) = entries.get_mut(&key) {
            return Ok(Some(std::mem::replace(slot, value)));
        }
        self.inner.locations.lock().add(key.clone())?;
        entries.insert(key, value);
        Ok(None)
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.entries.read().get(key).cloned()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.entries.read().contains_key(key)
    }

    /// Remove a local entry, returning its value.
    pub fn remove(&self, key: &K) -> Result<Option<V>> {
        let mut entries = self.inner.entries.write();
        let Some(value) = entries.remove(key) else {
            return Ok(None);
        };
        self.inner.locations.lock().remove(key)?;
        Ok(Some(value))
    }

    /// Number of local entries.
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn local_keys(&self) -> Vec<K> {
        self.inner.entries.read().keys().cloned().collect()
    }

    /// Visit every local entry.
    pub fn for_each(&self, mut f: impl FnMut(&K, &V)) {
        for (key, value) in self.inner.entries.read().iter() {
            f(key, value);
        }
    }

    /// Owner of `key` as far as this place knows.
    pub fn owner_of(&self, key: &K) -> Option<Place> {
        self.inner.distribution.read().place_of(key)
    }

    /// Copy of this place's view of the distribution.
    pub fn distribution(&self) -> MapDistribution<K> {
        self.inner.distribution.read().clone()
    }

    /// Subscribe an external snapshot to ownership changes.
    pub fn register_distribution(&self, snapshot: SharedSnapshot<K>) {
        self.inner.locations.lock().register_distribution(snapshot);
    }

    /// Collective: number of entries over all places.
    pub fn global_len(&self) -> Result<u64> {
        let mut writer = ByteWriter::new();
        writer.write(&(self.len() as u64))?;
        let gathered = self.inner.ctx.team().all_gather(writer.into_bytes())?;
        gathered
            .iter()
            .map(|bytes| ByteReader::new(bytes).read::<u64>())
            .sum()
    }

    /// Collective: reconcile ownership knowledge with every place.
    pub fn update_dist(&self) -> Result<usize> {
        self.inner.locations.lock().update(self.inner.ctx.team())
    }

    /// Queue the relocation of `keys` to `dest`. Every key must be held
    /// here when the manager flushes.
    pub fn move_at_sync<M: MoveManager>(&self, keys: Vec<K>, dest: Place, mm: &mut M) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let inner = self.inner.clone();
        mm.request(
            dest,
            DecoderId::new(self.inner.id, ops::MOVE_ENTRIES),
            move |w| inner.send_entries(&keys, dest, w),
        )
    }

    /// Queue the relocation of every local entry selected by `rule`, which
    /// maps an entry to its destination.
    pub fn move_matching_at_sync<M: MoveManager>(
        &self,
        mut rule: impl FnMut(&K, &V) -> Place,
        mm: &mut M,
    ) -> Result<()> {
        let me = self.inner.ctx.place();
        let mut by_dest: FxHashMap<Place, Vec<K>> = FxHashMap::default();
        for (key, value) in self.inner.entries.read().iter() {
            let dest = rule(key, value);
            if dest != me {
                by_dest.entry(dest).or_default().push(key.clone());
            }
        }
        let mut targets: Vec<_> = by_dest.into_iter().collect();
        targets.sort_by_key(|(dest, _)| *dest);
        for (dest, keys) in targets {
            self.move_at_sync(keys, dest, mm)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relocation::CollectiveMoveManager;
    use crate::team::run_places;

    #[test]
    fn test_put_get_remove() {
        run_places(1, |team| {
            let ctx = PlaceContext::with_defaults(team);
            let map: DistMap<String, u32> = DistMap::new(&ctx)?;
            assert_eq!(map.put("a".to_string(), 1)?, None);
            assert_eq!(map.put("a".to_string(), 2)?, Some(1));
            assert_eq!(map.get(&"a".to_string()), Some(2));
            assert_eq!(map.owner_of(&"a".to_string()), Some(Place(0)));
            assert_eq!(map.remove(&"a".to_string())?, Some(2));
            assert_eq!(map.remove(&"a".to_string())?, None);
            assert!(map.is_empty());
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_move_entries_by_hash() {
        let results = run_places(3, |team| {
            let ctx = PlaceContext::with_defaults(team);
            let map: DistMap<u64, String> = DistMap::new(&ctx)?;
            let me = ctx.place().0 as u64;
            for k in 0..10u64 {
                map.put(me * 100 + k, format!("v{}", me * 100 + k))?;
            }
            map.update_dist()?;

            let size = ctx.size() as u64;
            let mut mm = CollectiveMoveManager::new(&ctx);
            map.move_matching_at_sync(|key, _| Place::new((key % size) as usize), &mut mm)?;
            mm.sync()?;
            map.update_dist()?;

            let mut keys = map.local_keys();
            keys.sort();
            let total = map.global_len()?;
            let owner_of_101 = map.owner_of(&101);
            Ok((keys, total, owner_of_101))
        })
        .unwrap();

        for (place, (keys, total, owner_of_101)) in results.iter().enumerate() {
            assert_eq!(*total, 30);
            assert!(keys.iter().all(|k| k % 3 == place as u64));
            assert_eq!(*owner_of_101, Some(Place(2)));
        }
    }

    #[test]
    fn test_moving_unknown_key_fails_at_sync() {
        let results = run_places(2, |team| {
            let ctx = PlaceContext::with_defaults(team);
            let map: DistMap<u64, u64> = DistMap::new(&ctx)?;
            let mut mm = CollectiveMoveManager::new(&ctx);
            if ctx.place() == Place(0) {
                map.move_at_sync(vec![42], Place(1), &mut mm)?;
            }
            Ok(matches!(mm.sync(), Err(DistError::TagMismatch { .. })))
        })
        .unwrap();
        assert_eq!(results, vec![true, false]);
    }
}
