//! Distribution snapshots: live views of "which place owns what" kept up to
//! date by a [`LocationManager`](crate::location::LocationManager).

use crate::range::{find_overlapping, Interval};
use crate::team::Place;
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::hash::Hash;

/// Receives every ownership change a location manager makes.
pub trait DistributionSnapshot<K> {
    fn update_location(&mut self, key: &K, place: Place);

    fn remove_location(&mut self, key: &K);
}

/// Owner of every range, with lookup by single index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangedDistribution {
    ranges: BTreeMap<Interval, Place>,
}

impl RangedDistribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Owner of the range holding `index`.
    pub fn place_of(&self, index: i64) -> Option<Place> {
        find_overlapping(&self.ranges, &Interval::singleton(index)).map(|(_, place)| *place)
    }

    pub fn owner_of(&self, range: &Interval) -> Option<Place> {
        self.ranges.get(range).copied()
    }

    /// Some known range overlapping `range`, with its owner.
    pub fn find_overlapping(&self, range: &Interval) -> Option<(Interval, Place)> {
        find_overlapping(&self.ranges, range).map(|(key, place)| (*key, *place))
    }

    /// Ranges owned by `place`, in index order.
    pub fn ranges_of(&self, place: Place) -> Vec<Interval> {
        self.ranges
            .iter()
            .filter(|(_, owner)| **owner == place)
            .map(|(range, _)| *range)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Interval, &Place)> + '_ {
        self.ranges.iter()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

impl DistributionSnapshot<Interval> for RangedDistribution {
    fn update_location(&mut self, key: &Interval, place: Place) {
        self.ranges.insert(*key, place);
    }

    fn remove_location(&mut self, key: &Interval) {
        self.ranges.remove(key);
    }
}

/// Owner of every key of a hashed collection.
#[derive(Debug, Clone)]
pub struct MapDistribution<K> {
    owners: FxHashMap<K, Place>,
}

impl<K> Default for MapDistribution<K> {
    fn default() -> Self {
        Self {
            owners: FxHashMap::default(),
        }
    }
}

impl<K: Hash + Eq + Clone> MapDistribution<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place_of(&self, key: &K) -> Option<Place> {
        self.owners.get(key).copied()
    }

    /// Number of keys owned by each place, indexed by place.
    pub fn counts(&self, places: usize) -> Vec<usize> {
        let mut counts = vec![0; places];
        for place in self.owners.values() {
            if let Some(count) = counts.get_mut(place.index()) {
                *count += 1;
            }
        }
        counts
    }

    pub fn len(&self) -> usize {
        self.owners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.is_empty()
    }
}

impl<K: Hash + Eq + Clone> DistributionSnapshot<K> for MapDistribution<K> {
    fn update_location(&mut self, key: &K, place: Place) {
        self.owners.insert(key.clone(), place);
    }

    fn remove_location(&mut self, key: &K) {
        self.owners.remove(key);
    }
}
