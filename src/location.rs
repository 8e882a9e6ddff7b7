//! # Location manager
//!
//! Tracks which place owns each key of one collection. Local mutations
//! (`add`, `remove`, `move_out`, `move_in`) update the local map right away
//! and are also recorded in a diff; [`LocationManager::update`] is the
//! collective call that publishes every place's diff so that, once it
//! returns everywhere, all places agree on every key.
//!
//! Between two updates the map is only what this place has seen. A place
//! that moved a key out points it at the destination; other places still
//! point it at the old owner.

use crate::distribution::DistributionSnapshot;
use crate::error::{DistError, Result};
use crate::range::Interval;
use crate::team::{Place, Team};
use crate::wire::{ByteReader, ByteWriter};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Keys a location manager can track.
pub trait LocationKey:
    Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<K> LocationKey for K where
    K: Clone + Eq + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Travels with a relocated key so the receiver records it with the right
/// provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provenance {
    /// Created since the last update and never published.
    New,
    /// Published by an earlier update.
    Relocated,
}

/// Local change since the last update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    Added,
    MovedIn,
    MovedOut,
    Removed,
}

/// What a place publishes about one key during an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
enum Published {
    Owned,
    Removed,
}

pub type SharedSnapshot<K> = Arc<RwLock<dyn DistributionSnapshot<K> + Send + Sync>>;

pub struct LocationManager<K: LocationKey> {
    place: Place,
    owners: FxHashMap<K, Place>,
    diff: FxHashMap<K, Change>,
    snapshots: Vec<SharedSnapshot<K>>,
}

impl<K: LocationKey> Debug for LocationManager<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocationManager")
            .field("place", &self.place)
            .field("keys", &self.owners.len())
            .field("pending", &self.diff.len())
            .field("snapshots", &self.snapshots.len())
            .finish()
    }
}

impl<K: LocationKey> LocationManager<K> {
    pub fn new(place: Place) -> Self {
        Self {
            place,
            owners: FxHashMap::default(),
            diff: FxHashMap::default(),
            snapshots: Vec::new(),
        }
    }

    pub fn place(&self) -> Place {
        self.place
    }

    /// Owner of `key` as far as this place knows.
    pub fn owner_of(&self, key: &K) -> Option<Place> {
        self.owners.get(key).copied()
    }

    pub fn is_local(&self, key: &K) -> bool {
        self.owner_of(key) == Some(self.place)
    }

    pub fn local_keys(&self) -> Vec<K> {
        self.owners
            .iter()
            .filter(|(_, place)| **place == self.place)
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &Place)> + '_ {
        self.owners.iter()
    }

    /// Number of keys known to this place.
    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }

    /// Number of keys changed locally since the last update.
    pub fn pending_changes(&self) -> usize {
        self.diff.len()
    }

    /// Subscribe `snapshot` to every future change; it is first seeded with
    /// everything this place currently knows.
    pub fn register_distribution(&mut self, snapshot: SharedSnapshot<K>) {
        {
            let mut guard = snapshot.write();
            for (key, place) in &self.owners {
                guard.update_location(key, *place);
            }
        }
        self.snapshots.push(snapshot);
    }

    fn set_owner(&mut self, key: K, place: Place) {
        for snapshot in &self.snapshots {
            snapshot.write().update_location(&key, place);
        }
        self.owners.insert(key, place);
    }

    fn drop_owner(&mut self, key: &K) -> Option<Place> {
        let previous = self.owners.remove(key);
        if previous.is_some() {
            for snapshot in &self.snapshots {
                snapshot.write().remove_location(key);
            }
        }
        previous
    }

    fn require_local(&self, key: &K) -> Result<()> {
        match self.owner_of(key) {
            Some(owner) if owner == self.place => Ok(()),
            Some(owner) => Err(DistError::tag_mismatch(
                key,
                format!("owned by place {owner}, not {}", self.place),
            )),
            None => Err(DistError::tag_mismatch(
                key,
                format!("not known at place {}", self.place),
            )),
        }
    }

    /// Register a key created on this place.
    pub fn add(&mut self, key: K) -> Result<()> {
        if let Some(owner) = self.owner_of(&key) {
            return Err(DistError::tag_mismatch(
                &key,
                format!("already owned by place {owner}"),
            ));
        }
        let change = match self.diff.get(&key) {
            Some(Change::Removed) => Change::MovedIn,
            _ => Change::Added,
        };
        self.diff.insert(key.clone(), change);
        self.set_owner(key, self.place);
        Ok(())
    }

    /// Forget a locally owned key.
    pub fn remove(&mut self, key: &K) -> Result<()> {
        self.require_local(key)?;
        match self.diff.remove(key) {
            Some(Change::Added) => {}
            _ => {
                self.diff.insert(key.clone(), Change::Removed);
            }
        }
        self.drop_owner(key);
        Ok(())
    }

    /// Give up ownership of `key` to `dest`; the returned tag must be handed
    /// to `move_in` on `dest`.
    ///
    /// A key that was never published (pending `Added`) is forgotten and
    /// tagged [`Provenance::New`]. Otherwise the local entry is not removed:
    /// it is repointed at `dest`, so lookups here name the new owner right
    /// away instead of reporting the key unknown until the next `update`.
    pub fn move_out(&mut self, key: &K, dest: Place) -> Result<Provenance> {
        self.require_local(key)?;
        if dest == self.place {
            return Err(DistError::tag_mismatch(
                key,
                "cannot move a key to the place that owns it",
            ));
        }
        if self.diff.get(key) == Some(&Change::Added) {
            self.diff.remove(key);
            self.drop_owner(key);
            return Ok(Provenance::New);
        }
        self.diff.insert(key.clone(), Change::MovedOut);
        self.set_owner(key.clone(), dest);
        Ok(Provenance::Relocated)
    }

    /// Take ownership of a key that another place moved out with `provenance`.
    pub fn move_in(&mut self, key: K, provenance: Provenance) -> Result<()> {
        let known = self.owner_of(&key);
        if known == Some(self.place) {
            return Err(DistError::tag_mismatch(&key, "moved in but already owned here"));
        }
        let change = match provenance {
            Provenance::New => {
                if let Some(owner) = known {
                    return Err(DistError::tag_mismatch(
                        &key,
                        format!("tagged new but already published as owned by place {owner}"),
                    ));
                }
                match self.diff.get(&key) {
                    Some(Change::Removed) => Change::MovedIn,
                    _ => Change::Added,
                }
            }
            Provenance::Relocated => {
                if known.is_none() {
                    return Err(DistError::tag_mismatch(
                        &key,
                        "tagged relocated but never published to this place",
                    ));
                }
                Change::MovedIn
            }
        };
        self.diff.insert(key.clone(), change);
        self.set_owner(key, self.place);
        Ok(())
    }

    /// Collective: publish this place's diff and merge every other place's.
    ///
    /// Removals are applied before ownership claims. If two places claim the
    /// same key in one round the higher place wins and a warning is logged.
    /// Returns the number of entries merged.
    #[instrument(skip(self, team), level = "debug", fields(place = %self.place))]
    pub fn update(&mut self, team: &dyn Team) -> Result<usize> {
        let published: Vec<(K, Published)> = self
            .diff
            .iter()
            .filter_map(|(key, change)| match change {
                Change::Added | Change::MovedIn => Some((key.clone(), Published::Owned)),
                Change::Removed => Some((key.clone(), Published::Removed)),
                Change::MovedOut => None,
            })
            .collect();
        let mut writer = ByteWriter::new();
        writer.write(&published)?;
        let gathered = team.all_gather(writer.into_bytes())?;

        let rounds = gathered
            .iter()
            .map(|bytes| ByteReader::new(bytes).read::<Vec<(K, Published)>>())
            .collect::<Result<Vec<_>>>()?;
        self.diff.clear();

        let mut merged = 0usize;
        for entries in &rounds {
            for (key, _) in entries.iter().filter(|(_, p)| *p == Published::Removed) {
                self.drop_owner(key);
                merged += 1;
            }
        }
        let mut claimed: FxHashMap<K, Place> = FxHashMap::default();
        for (source, entries) in rounds.into_iter().enumerate() {
            let source = Place::new(source);
            for (key, _) in entries.into_iter().filter(|(_, p)| *p == Published::Owned) {
                if let Some(previous) = claimed.insert(key.clone(), source) {
                    warn!(
                        "key {:?} claimed by both place {} and place {}; keeping place {}",
                        key, previous, source, source
                    );
                }
                self.set_owner(key, source);
                merged += 1;
            }
        }
        debug!("place {} merged {} location entries", self.place, merged);
        Ok(merged)
    }
}

impl LocationManager<Interval> {
    /// Replace the locally owned range `key` by `pieces`, which must cover it
    /// exactly, in order and without gaps.
    pub fn split(&mut self, key: &Interval, pieces: &[Interval]) -> Result<()> {
        self.require_local(key)?;
        let contiguous = pieces.windows(2).all(|w| w[0].to() == w[1].from());
        let covers = pieces.first().map(Interval::from) == Some(key.from())
            && pieces.last().map(Interval::to) == Some(key.to());
        if !contiguous || !covers || pieces.iter().any(Interval::is_empty) {
            return Err(DistError::IllegalState(format!(
                "{pieces:?} do not partition {key}"
            )));
        }
        if pieces.len() == 1 {
            return Ok(());
        }
        match self.diff.remove(key) {
            Some(Change::Added) => {}
            _ => {
                self.diff.insert(*key, Change::Removed);
            }
        }
        self.drop_owner(key);
        for piece in pieces {
            self.diff.insert(*piece, Change::Added);
            self.set_owner(*piece, self.place);
        }
        Ok(())
    }

    /// Locally owned range keys overlapping `range`, in index order.
    pub fn local_overlapping(&self, range: &Interval) -> Vec<Interval> {
        let mut keys: Vec<Interval> = self
            .owners
            .iter()
            .filter(|(key, place)| **place == self.place && key.is_overlapped(range))
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        keys
    }
}
