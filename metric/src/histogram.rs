use crate::{CountMetric, Metric, TxHashMap};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::hash::Hash;

/// Counts per key, e.g. reads per cell barcode. Keys never observed count zero.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent, bound = "")]
pub struct SimpleHistogram<K: Eq + Hash + Serialize + DeserializeOwned> {
    counts: TxHashMap<K, CountMetric>,
}

impl<K: Eq + Hash + Serialize + DeserializeOwned> Default for SimpleHistogram<K> {
    fn default() -> Self {
        SimpleHistogram {
            counts: TxHashMap::default(),
        }
    }
}

impl<K: Eq + Hash + Serialize + DeserializeOwned> Metric for SimpleHistogram<K> {
    fn merge(&mut self, other: Self) {
        for (key, count) in other.counts {
            self.observe_by(key, count.count());
        }
    }
}

impl<K: Eq + Hash + Serialize + DeserializeOwned> SimpleHistogram<K> {
    /// Count `key` once.
    pub fn observe(&mut self, key: K) {
        self.observe_by(key, 1);
    }

    /// Count `key` `n` times. A zero count does not add the key.
    pub fn observe_by(&mut self, key: K, n: i64) {
        if n != 0 {
            self.counts.entry(key).or_default().increment_by(n);
        }
    }

    /// The count of `key`.
    pub fn get<Q>(&self, key: &Q) -> i64
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.counts.get(key).map_or(0, |c| c.count())
    }

    /// Sum over all keys.
    pub fn total(&self) -> i64 {
        self.counts.values().map(|c| c.count()).sum()
    }

    /// Number of keys with a non-zero count.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// True if no key was counted.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// `(key, count)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, i64)> + '_ {
        self.counts.iter().map(|(k, c)| (k, c.count()))
    }
}
