//! Range and ordering views over a [`SkipMap`].
//!
//! A [`SubMap`] is a lightweight window: it stores only a reference to the
//! backing map, the two key bounds and a direction flag, so it is `Copy` and
//! costs nothing to create.  All reads and writes go straight through to the
//! backing map and observe (and produce) live data; a view is never a
//! snapshot.

use std::cmp;
use std::fmt;
use std::iter;
use std::ops::Bound;
use std::sync::atomic::Ordering::Acquire;

use crossbeam_epoch as epoch;

use crate::key::Key;
use crate::skipmap::{EQ, GT, LT, Keys, Range, SkipMap};

// ////////////////////////////////////////////////////////////////////////////
// View constructors
// ////////////////////////////////////////////////////////////////////////////

impl<K: Key, V> SkipMap<K, V> {
    /// A view of the entries whose keys lie between `lo` and `hi`.
    ///
    /// The view is live: entries inserted into or removed from the backing
    /// map inside the window appear in the view and vice versa.  Mutating
    /// through the view outside the window panics.
    ///
    /// # Panics
    ///
    /// Panics if either key is the reserved sentinel value, or if the bounds
    /// are inverted under the map's order.
    ///
    /// # Examples
    ///
    /// ```
    /// use skipmap::SkipMap;
    ///
    /// let map: SkipMap<i64, i64> = (0..10).map(|x| (x, x)).collect();
    /// let window = map.sub_map(2, true, 6, false);
    /// assert_eq!(window.keys().collect::<Vec<_>>(), vec![2, 3, 4, 5]);
    /// assert!(!window.contains_key(6));
    /// ```
    pub fn sub_map(
        &self,
        lo: K,
        lo_inclusive: bool,
        hi: K,
        hi_inclusive: bool,
    ) -> SubMap<'_, K, V> {
        self.check_key(&lo);
        self.check_key(&hi);
        assert!(
            self.cpr(&lo, &hi) != cmp::Ordering::Greater,
            "inverted range bounds"
        );
        SubMap {
            map: self,
            lo: Some(lo),
            lo_inclusive,
            hi: Some(hi),
            hi_inclusive,
            descending: false,
        }
    }

    /// A view of the entries with keys below `hi`.
    ///
    /// # Panics
    ///
    /// Panics if `hi` is the reserved sentinel value.
    pub fn head_map(&self, hi: K, inclusive: bool) -> SubMap<'_, K, V> {
        self.check_key(&hi);
        SubMap {
            map: self,
            lo: None,
            lo_inclusive: false,
            hi: Some(hi),
            hi_inclusive: inclusive,
            descending: false,
        }
    }

    /// A view of the entries with keys above `lo`.
    ///
    /// # Panics
    ///
    /// Panics if `lo` is the reserved sentinel value.
    pub fn tail_map(&self, lo: K, inclusive: bool) -> SubMap<'_, K, V> {
        self.check_key(&lo);
        SubMap {
            map: self,
            lo: Some(lo),
            lo_inclusive: inclusive,
            hi: None,
            hi_inclusive: false,
            descending: false,
        }
    }

    /// A reverse-ordered view of the whole map.
    ///
    /// Taking the descending view of a descending view yields the original
    /// ascending order again.
    ///
    /// # Examples
    ///
    /// ```
    /// use skipmap::SkipMap;
    ///
    /// let map: SkipMap<i64, i64> = (0..5).map(|x| (x, x)).collect();
    /// let reversed = map.descending_map();
    /// assert_eq!(reversed.keys().collect::<Vec<_>>(), vec![4, 3, 2, 1, 0]);
    /// assert_eq!(reversed.first_key(), 4);
    /// ```
    pub fn descending_map(&self) -> SubMap<'_, K, V> {
        SubMap {
            map: self,
            lo: None,
            lo_inclusive: false,
            hi: None,
            hi_inclusive: false,
            descending: true,
        }
    }

    /// An iterator over the keys in descending order.
    pub fn descending_keys(&self) -> SubKeys<'_, K, V>
    where
        V: Clone + Send + Sync + 'static,
    {
        self.descending_map().keys()
    }

    /// A set view of the keys.
    pub fn key_set(&self) -> KeySet<'_, K, V> {
        KeySet { map: self }
    }
}

// ////////////////////////////////////////////////////////////////////////////
// SubMap
// ////////////////////////////////////////////////////////////////////////////

/// A live, bounded, possibly reverse-ordered view of a [`SkipMap`].
///
/// Created by [`SkipMap::sub_map`], [`SkipMap::head_map`],
/// [`SkipMap::tail_map`] or [`SkipMap::descending_map`].  Relative
/// operations (`first`, `lower`, iteration order and so on) follow the
/// view's own direction, and every key-accepting operation is clamped to
/// the window: lookups outside it return `None`, mutations panic.
pub struct SubMap<'a, K, V> {
    map: &'a SkipMap<K, V>,
    lo: Option<K>,
    lo_inclusive: bool,
    hi: Option<K>,
    hi_inclusive: bool,
    descending: bool,
}

impl<K: Key, V> Clone for SubMap<'_, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: Key, V> Copy for SubMap<'_, K, V> {}

// ///////////////////////////////////////////////
// Bound bookkeeping
// ///////////////////////////////////////////////

impl<'a, K: Key, V> SubMap<'a, K, V> {
    fn lo_bound(&self) -> Bound<K> {
        match self.lo {
            None => Bound::Unbounded,
            Some(k) if self.lo_inclusive => Bound::Included(k),
            Some(k) => Bound::Excluded(k),
        }
    }

    fn hi_bound(&self) -> Bound<K> {
        match self.hi {
            None => Bound::Unbounded,
            Some(k) if self.hi_inclusive => Bound::Included(k),
            Some(k) => Bound::Excluded(k),
        }
    }

    fn too_low(&self, key: &K) -> bool {
        match &self.lo {
            None => false,
            Some(lo) => match self.map.cpr(key, lo) {
                cmp::Ordering::Less => true,
                cmp::Ordering::Equal => !self.lo_inclusive,
                cmp::Ordering::Greater => false,
            },
        }
    }

    fn too_high(&self, key: &K) -> bool {
        match &self.hi {
            None => false,
            Some(hi) => match self.map.cpr(key, hi) {
                cmp::Ordering::Greater => true,
                cmp::Ordering::Equal => !self.hi_inclusive,
                cmp::Ordering::Less => false,
            },
        }
    }

    fn in_bounds(&self, key: &K) -> bool {
        !self.too_low(key) && !self.too_high(key)
    }

    /// Derive a narrower view; `from`/`to` are in the view's own order and
    /// get swapped back to absolute order for a descending view.
    fn narrowed(
        &self,
        from: Option<(K, bool)>,
        to: Option<(K, bool)>,
    ) -> SubMap<'a, K, V> {
        let (from, to) = if self.descending { (to, from) } else { (from, to) };
        if let (Some((f, _)), Some((t, _))) = (&from, &to) {
            assert!(
                self.map.cpr(f, t) != cmp::Ordering::Greater,
                "inverted range bounds"
            );
        }
        let (mut lo, mut lo_inclusive) = (self.lo, self.lo_inclusive);
        if let Some((k, inclusive)) = from {
            assert!(self.in_bounds(&k), "key out of range");
            lo = Some(k);
            lo_inclusive = inclusive;
        }
        let (mut hi, mut hi_inclusive) = (self.hi, self.hi_inclusive);
        if let Some((k, inclusive)) = to {
            assert!(self.in_bounds(&k), "key out of range");
            hi = Some(k);
            hi_inclusive = inclusive;
        }
        SubMap {
            map: self.map,
            lo,
            lo_inclusive,
            hi,
            hi_inclusive,
            descending: self.descending,
        }
    }
}

// ///////////////////////////////////////////////
// Keyed operations
// ///////////////////////////////////////////////

impl<'a, K: Key, V> SubMap<'a, K, V> {
    /// Whether `key` lies inside the window and has a live mapping.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn contains_key(&self, key: K) -> bool {
        self.map.check_key(&key);
        self.in_bounds(&key) && self.map.contains_key(key)
    }

    /// A further-restricted view; the new bounds are interpreted in this
    /// view's own order and must lie inside its window.
    ///
    /// # Panics
    ///
    /// Panics if a key is the reserved sentinel value, falls outside this
    /// view's window, or the bounds are inverted.
    pub fn sub_map(
        &self,
        from: K,
        from_inclusive: bool,
        to: K,
        to_inclusive: bool,
    ) -> SubMap<'a, K, V> {
        self.map.check_key(&from);
        self.map.check_key(&to);
        self.narrowed(Some((from, from_inclusive)), Some((to, to_inclusive)))
    }

    /// The prefix of this view up to `to`.
    ///
    /// # Panics
    ///
    /// Panics if `to` is the reserved sentinel value or outside the window.
    pub fn head_map(&self, to: K, inclusive: bool) -> SubMap<'a, K, V> {
        self.map.check_key(&to);
        self.narrowed(None, Some((to, inclusive)))
    }

    /// The suffix of this view from `from` on.
    ///
    /// # Panics
    ///
    /// Panics if `from` is the reserved sentinel value or outside the
    /// window.
    pub fn tail_map(&self, from: K, inclusive: bool) -> SubMap<'a, K, V> {
        self.map.check_key(&from);
        self.narrowed(Some((from, inclusive)), None)
    }

    /// The same window traversed in the opposite direction.
    pub fn descending_map(&self) -> SubMap<'a, K, V> {
        SubMap {
            descending: !self.descending,
            ..*self
        }
    }
}

impl<K: Key, V: Clone + Send + Sync + 'static> SubMap<'_, K, V> {
    /// Return a clone of the value mapped to `key`, if the key lies inside
    /// the window.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn get(&self, key: K) -> Option<V> {
        self.map.check_key(&key);
        if !self.in_bounds(&key) {
            return None;
        }
        self.map.get(key)
    }

    /// Insert into the backing map through this view.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value or outside the
    /// window.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.map.check_key(&key);
        assert!(self.in_bounds(&key), "key out of range");
        self.map.insert(key, value)
    }

    /// Insert through this view only if `key` is absent.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value or outside the
    /// window.
    pub fn insert_if_absent(&self, key: K, value: V) -> Option<V> {
        self.map.check_key(&key);
        assert!(self.in_bounds(&key), "key out of range");
        self.map.insert_if_absent(key, value)
    }

    /// Remove `key` from the backing map, if it lies inside the window.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn remove(&self, key: K) -> Option<V> {
        self.map.check_key(&key);
        if !self.in_bounds(&key) {
            return None;
        }
        self.map.remove(key)
    }
}

// ///////////////////////////////////////////////
// Relative operations
// ///////////////////////////////////////////////

impl<K: Key, V: Clone + Send + Sync + 'static> SubMap<'_, K, V> {
    /// The in-window entry at the low end of the backing map's order.
    fn lowest_entry(&self) -> Option<(K, V)> {
        let entry = match self.lo {
            None => self.map.first_entry(),
            Some(lo) => self
                .map
                .near_entry(lo, if self.lo_inclusive { EQ } else { GT }),
        }?;
        if self.too_high(&entry.0) { None } else { Some(entry) }
    }

    /// The in-window entry at the high end of the backing map's order.
    fn highest_entry(&self) -> Option<(K, V)> {
        let entry = match self.hi {
            None => self.map.last_entry(),
            Some(hi) => self
                .map
                .near_entry(hi, if self.hi_inclusive { LT | EQ } else { LT }),
        }?;
        if self.too_low(&entry.0) { None } else { Some(entry) }
    }

    /// The nearest in-window entry to `key` under `rel`, with the direction
    /// bit flipped for a descending view and probes outside the window
    /// clamped to its edges.
    fn near_entry_bounded(&self, key: K, rel: u8) -> Option<(K, V)> {
        self.map.check_key(&key);
        let rel = if self.descending { rel ^ LT } else { rel };
        if self.too_low(&key) {
            return if rel & LT != 0 {
                None
            } else {
                self.lowest_entry()
            };
        }
        if self.too_high(&key) {
            return if rel & LT != 0 {
                self.highest_entry()
            } else {
                None
            };
        }
        let entry = self.map.near_entry(key, rel)?;
        if self.in_bounds(&entry.0) { Some(entry) } else { None }
    }

    /// The first entry in the view's own order.
    pub fn first_entry(&self) -> Option<(K, V)> {
        if self.descending {
            self.highest_entry()
        } else {
            self.lowest_entry()
        }
    }

    /// The last entry in the view's own order.
    pub fn last_entry(&self) -> Option<(K, V)> {
        if self.descending {
            self.lowest_entry()
        } else {
            self.highest_entry()
        }
    }

    /// The first key in the view's own order.
    ///
    /// # Panics
    ///
    /// Panics if the view is empty.
    pub fn first_key(&self) -> K {
        match self.first_entry() {
            Some((key, _)) => key,
            None => panic!("first_key called on an empty view"),
        }
    }

    /// The last key in the view's own order.
    ///
    /// # Panics
    ///
    /// Panics if the view is empty.
    pub fn last_key(&self) -> K {
        match self.last_entry() {
            Some((key, _)) => key,
            None => panic!("last_key called on an empty view"),
        }
    }

    /// Remove and return the first entry in the view's own order.
    ///
    /// Seek and removal race against other threads, so the pair loops until
    /// it removes an entry itself or finds the window empty.
    pub fn pop_first(&self) -> Option<(K, V)> {
        loop {
            let (key, _) = self.first_entry()?;
            if let Some(value) = self.map.remove(key) {
                return Some((key, value));
            }
        }
    }

    /// Remove and return the last entry in the view's own order.
    pub fn pop_last(&self) -> Option<(K, V)> {
        loop {
            let (key, _) = self.last_entry()?;
            if let Some(value) = self.map.remove(key) {
                return Some((key, value));
            }
        }
    }

    /// The in-window entry with the greatest key strictly less than `key`,
    /// in the view's own order.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    ///
    /// # Examples
    ///
    /// ```
    /// use skipmap::SkipMap;
    ///
    /// let map: SkipMap<i64, i64> = (0..10).map(|x| (x, x)).collect();
    /// let window = map.sub_map(2, true, 6, true);
    /// assert_eq!(window.lower_entry(5), Some((4, 4)));
    /// // Probes beyond the window clamp to its edge.
    /// assert_eq!(window.lower_entry(9), Some((6, 6)));
    /// assert_eq!(window.lower_entry(2), None);
    /// ```
    pub fn lower_entry(&self, key: K) -> Option<(K, V)> {
        self.near_entry_bounded(key, LT)
    }

    /// The in-window entry with the greatest key less than or equal to
    /// `key`, in the view's own order.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn floor_entry(&self, key: K) -> Option<(K, V)> {
        self.near_entry_bounded(key, LT | EQ)
    }

    /// The in-window entry with the smallest key greater than or equal to
    /// `key`, in the view's own order.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn ceiling_entry(&self, key: K) -> Option<(K, V)> {
        self.near_entry_bounded(key, EQ)
    }

    /// The in-window entry with the smallest key strictly greater than
    /// `key`, in the view's own order.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn higher_entry(&self, key: K) -> Option<(K, V)> {
        self.near_entry_bounded(key, GT)
    }

    /// Key-only variant of [`lower_entry`][SubMap::lower_entry].
    pub fn lower_key(&self, key: K) -> Option<K> {
        self.lower_entry(key).map(|entry| entry.0)
    }

    /// Key-only variant of [`floor_entry`][SubMap::floor_entry].
    pub fn floor_key(&self, key: K) -> Option<K> {
        self.floor_entry(key).map(|entry| entry.0)
    }

    /// Key-only variant of [`ceiling_entry`][SubMap::ceiling_entry].
    pub fn ceiling_key(&self, key: K) -> Option<K> {
        self.ceiling_entry(key).map(|entry| entry.0)
    }

    /// Key-only variant of [`higher_entry`][SubMap::higher_entry].
    pub fn higher_key(&self, key: K) -> Option<K> {
        self.higher_entry(key).map(|entry| entry.0)
    }
}

// ///////////////////////////////////////////////
// Iteration
// ///////////////////////////////////////////////

impl<'a, K: Key, V: Clone + Send + Sync + 'static> SubMap<'a, K, V> {
    /// A weakly consistent iterator over the window, in the view's own
    /// order.
    pub fn iter(&self) -> SubIter<'a, K, V> {
        let inner = if self.descending {
            SubIterInner::Descending(DescendingIter {
                map: self.map,
                until: self.hi_bound(),
                min: self.lo_bound(),
            })
        } else {
            SubIterInner::Ascending(self.map.range(self.lo_bound(), self.hi_bound()))
        };
        SubIter { inner }
    }

    /// An iterator over the window's keys, in the view's own order.
    pub fn keys(&self) -> SubKeys<'a, K, V> {
        SubKeys(self.iter())
    }

    /// An iterator over the window's values, in the view's own order.
    pub fn values(&self) -> SubValues<'a, K, V> {
        SubValues(self.iter())
    }

    /// The number of entries inside the window, counted by traversal.
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Whether the window contains no entries.
    pub fn is_empty(&self) -> bool {
        self.first_entry().is_none()
    }
}

/// Iterator over a [`SubMap`]'s entries, in the view's own order.
pub struct SubIter<'a, K, V> {
    inner: SubIterInner<'a, K, V>,
}

enum SubIterInner<'a, K, V> {
    Ascending(Range<'a, K, V>),
    Descending(DescendingIter<'a, K, V>),
}

impl<K: Key, V: Clone + Send + Sync + 'static> Iterator for SubIter<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        match &mut self.inner {
            SubIterInner::Ascending(iter) => iter.next(),
            SubIterInner::Descending(iter) => iter.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

/// Iterator over a [`SubMap`]'s keys.
pub struct SubKeys<'a, K, V>(SubIter<'a, K, V>);

impl<K: Key, V: Clone + Send + Sync + 'static> Iterator for SubKeys<'_, K, V> {
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|entry| entry.0)
    }
}

/// Iterator over a [`SubMap`]'s values.
pub struct SubValues<'a, K, V>(SubIter<'a, K, V>);

impl<K: Key, V: Clone + Send + Sync + 'static> Iterator for SubValues<'_, K, V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|entry| entry.1)
    }
}

/// A descending iterator that re-seeks from the index tower for each step.
///
/// Base nodes only link forward, so walking backwards means seeking the
/// nearest key below the previously yielded one on every call.  Each seek
/// pins its own epoch, keeping the iterator from holding memory back while
/// idle, at the cost of `O(log n)` per step.
struct DescendingIter<'a, K, V> {
    map: &'a SkipMap<K, V>,
    /// Exclusive-from-above cursor: the next entry must sit below this.
    until: Bound<K>,
    /// Low end of the window.
    min: Bound<K>,
}

impl<K: Key, V> DescendingIter<'_, K, V> {
    fn below_min(&self, key: &K) -> bool {
        match &self.min {
            Bound::Unbounded => false,
            Bound::Included(lo) => self.map.cpr(key, lo) == cmp::Ordering::Less,
            Bound::Excluded(lo) => self.map.cpr(key, lo) != cmp::Ordering::Greater,
        }
    }
}

impl<K: Key, V: Clone + Send + Sync + 'static> Iterator for DescendingIter<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let guard = &epoch::pin();
        loop {
            let n = match self.until {
                Bound::Unbounded => self.map.find_last(guard),
                Bound::Included(k) => self.map.find_near(&k, LT | EQ, guard),
                Bound::Excluded(k) => self.map.find_near(&k, LT, guard),
            };
            let n_ref = unsafe { n.as_ref() }?;
            let key = n_ref.key;
            if self.below_min(&key) {
                return None;
            }
            let v = n_ref.val.load(Acquire, guard);
            if let Some(v_ref) = unsafe { v.as_ref() } {
                self.until = Bound::Excluded(key);
                return Some((key, v_ref.clone()));
            }
            // Deleted between the seek and the read; the next seek walks
            // past (and unlinks) the dead node.
        }
    }
}

impl<'a, K: Key, V: Clone + Send + Sync + 'static> iter::IntoIterator for SubMap<'a, K, V> {
    type Item = (K, V);
    type IntoIter = SubIter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V> fmt::Debug for SubMap<'_, K, V>
where
    K: Key + fmt::Debug,
    V: Clone + Send + Sync + 'static + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "({:?}, {:?})", k, v)?;
        }
        write!(f, "]")
    }
}

// ////////////////////////////////////////////////////////////////////////////
// KeySet
// ////////////////////////////////////////////////////////////////////////////

/// A live set view of a [`SkipMap`]'s keys.
///
/// Supports membership tests, removal and ordered traversal; there is
/// deliberately no way to add a key through the set, since a key without a
/// value has no meaning in the backing map.
pub struct KeySet<'a, K, V> {
    map: &'a SkipMap<K, V>,
}

impl<K: Key, V> Clone for KeySet<'_, K, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K: Key, V> Copy for KeySet<'_, K, V> {}

impl<K: Key, V> KeySet<'_, K, V> {
    /// Whether the key is present.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn contains(&self, key: K) -> bool {
        self.map.contains_key(key)
    }

    /// The number of keys in the set.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<'a, K: Key, V: Clone + Send + Sync + 'static> KeySet<'a, K, V> {
    /// Remove the key (and its entry) from the backing map.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn remove(&self, key: K) -> bool {
        self.map.remove(key).is_some()
    }

    /// Remove and return the smallest key.
    pub fn pop_first(&self) -> Option<K> {
        self.map.pop_first().map(|entry| entry.0)
    }

    /// Remove and return the greatest key.
    pub fn pop_last(&self) -> Option<K> {
        self.map.pop_last().map(|entry| entry.0)
    }

    /// An iterator over the keys, in ascending order.
    pub fn iter(&self) -> Keys<'a, K, V> {
        self.map.keys()
    }

    /// An iterator over the keys, in descending order.
    pub fn descending_iter(&self) -> SubKeys<'a, K, V> {
        self.map.descending_keys()
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Tests
// ////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::super::skipmap::SkipMap;

    fn digits() -> SkipMap<i64, i64> {
        (0..10).map(|x| (x, x * 10)).collect()
    }

    #[test]
    fn sub_map_window() {
        let map = digits();
        let window = map.sub_map(2, true, 6, false);
        assert_eq!(window.keys().collect::<Vec<_>>(), vec![2, 3, 4, 5]);
        assert_eq!(window.len(), 4);
        assert!(window.contains_key(2));
        assert!(!window.contains_key(6));
        assert!(!window.contains_key(9));
        assert_eq!(window.get(3), Some(30));
        assert_eq!(window.get(6), None);
    }

    #[test]
    fn sub_map_is_live_in_both_directions() {
        let map = digits();
        let window = map.sub_map(2, true, 6, false);
        map.insert(3, 333);
        assert_eq!(window.get(3), Some(333));
        assert_eq!(window.remove(4), Some(40));
        assert!(!map.contains_key(4));
        window.insert(4, 44);
        assert_eq!(map.get(4), Some(44));
    }

    #[test]
    #[should_panic(expected = "key out of range")]
    fn sub_map_insert_outside_window_panics() {
        let map = digits();
        let window = map.sub_map(2, true, 6, false);
        window.insert(7, 70);
    }

    #[test]
    #[should_panic(expected = "key out of range")]
    fn sub_map_insert_on_excluded_edge_panics() {
        let map = digits();
        let window = map.sub_map(2, true, 6, false);
        window.insert(6, 60);
    }

    #[test]
    fn sub_map_remove_outside_window_is_refused() {
        let map = digits();
        let window = map.sub_map(2, true, 6, false);
        assert_eq!(window.remove(8), None);
        assert!(map.contains_key(8));
    }

    #[test]
    #[should_panic(expected = "inverted range bounds")]
    fn sub_map_rejects_inverted_bounds() {
        let map = digits();
        let _ = map.sub_map(6, true, 2, true);
    }

    #[test]
    fn head_and_tail() {
        let map = digits();
        assert_eq!(
            map.head_map(3, true).keys().collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert_eq!(
            map.head_map(3, false).keys().collect::<Vec<_>>(),
            vec![0, 1, 2]
        );
        assert_eq!(
            map.tail_map(7, true).keys().collect::<Vec<_>>(),
            vec![7, 8, 9]
        );
        assert_eq!(
            map.tail_map(7, false).keys().collect::<Vec<_>>(),
            vec![8, 9]
        );
    }

    #[test]
    fn nested_sub_map_narrows() {
        let map = digits();
        let outer = map.sub_map(1, true, 8, true);
        let inner = outer.sub_map(3, true, 5, true);
        assert_eq!(inner.keys().collect::<Vec<_>>(), vec![3, 4, 5]);
        let tail = inner.tail_map(4, true);
        assert_eq!(tail.keys().collect::<Vec<_>>(), vec![4, 5]);
    }

    #[test]
    #[should_panic(expected = "key out of range")]
    fn nested_sub_map_cannot_widen() {
        let map = digits();
        let outer = map.sub_map(3, true, 6, true);
        let _ = outer.sub_map(1, true, 5, true);
    }

    #[test]
    fn descending_map_reverses() {
        let map = digits();
        let reversed = map.descending_map();
        assert_eq!(
            reversed.keys().collect::<Vec<_>>(),
            (0..10).rev().collect::<Vec<_>>()
        );
        assert_eq!(reversed.first_entry(), Some((9, 90)));
        assert_eq!(reversed.last_entry(), Some((0, 0)));
        assert_eq!(reversed.first_key(), 9);
        assert_eq!(reversed.last_key(), 0);
    }

    #[test]
    fn double_descending_restores_ascending() {
        let map = digits();
        let twice = map.descending_map().descending_map();
        assert_eq!(twice.keys().collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
        assert_eq!(twice.first_key(), 0);
    }

    #[test]
    fn descending_relative_ops_flip() {
        let map = digits();
        let reversed = map.descending_map();
        // "lower" looks toward the view's own start, which is the high end.
        assert_eq!(reversed.lower_key(5), Some(6));
        assert_eq!(reversed.higher_key(5), Some(4));
        assert_eq!(reversed.floor_key(5), Some(5));
        assert_eq!(reversed.ceiling_key(5), Some(5));
        assert_eq!(reversed.lower_key(9), None);
        assert_eq!(reversed.higher_key(0), None);
    }

    #[test]
    fn descending_sub_map_bounds_in_view_order() {
        let map = digits();
        let reversed = map.descending_map();
        // Bounds are given in the view's own (descending) order.
        let window = reversed.sub_map(6, true, 2, true);
        assert_eq!(window.keys().collect::<Vec<_>>(), vec![6, 5, 4, 3, 2]);
        assert_eq!(window.first_key(), 6);
        assert_eq!(window.pop_first(), Some((6, 60)));
        assert_eq!(window.pop_last(), Some((2, 20)));
        assert_eq!(window.keys().collect::<Vec<_>>(), vec![5, 4, 3]);
    }

    #[test]
    fn near_probes_clamp_to_window() {
        let map = digits();
        let window = map.sub_map(2, true, 6, true);
        // Probes past the high edge clamp down onto it.
        assert_eq!(window.floor_key(9), Some(6));
        assert_eq!(window.lower_key(9), Some(6));
        assert_eq!(window.ceiling_key(9), None);
        // Probes below the low edge clamp up onto it.
        assert_eq!(window.ceiling_key(0), Some(2));
        assert_eq!(window.higher_key(0), Some(2));
        assert_eq!(window.floor_key(0), None);
        // In-window probes behave like the backing map.
        assert_eq!(window.lower_key(4), Some(3));
        assert_eq!(window.higher_key(4), Some(5));
    }

    #[test]
    fn near_results_outside_window_are_dropped() {
        let map: SkipMap<i64, i64> = [1, 5, 9].into_iter().map(|k| (k, k)).collect();
        let window = map.sub_map(3, true, 7, true);
        // The backing map's floor of 4 is 1, which is outside the window.
        assert_eq!(window.floor_key(4), None);
        assert_eq!(window.ceiling_key(6), None);
        assert_eq!(window.floor_key(6), Some(5));
    }

    #[test]
    fn pop_ends() {
        let map = digits();
        let window = map.sub_map(3, true, 6, true);
        assert_eq!(window.pop_first(), Some((3, 30)));
        assert_eq!(window.pop_last(), Some((6, 60)));
        assert_eq!(window.keys().collect::<Vec<_>>(), vec![4, 5]);
        // The backing map lost the popped entries too.
        assert!(!map.contains_key(3));
        assert!(!map.contains_key(6));
        assert_eq!(window.pop_first(), Some((4, 40)));
        assert_eq!(window.pop_first(), Some((5, 50)));
        assert_eq!(window.pop_first(), None);
        assert!(window.is_empty());
    }

    #[test]
    #[should_panic(expected = "first_key called on an empty view")]
    fn first_key_panics_on_empty_view() {
        let map = digits();
        let window = map.sub_map(4, false, 5, false);
        let _ = window.first_key();
    }

    #[test]
    fn descending_iter_tolerates_removal() {
        let map = digits();
        let mut iter = map.descending_map().iter();
        assert_eq!(iter.next(), Some((9, 90)));
        map.remove(8);
        assert_eq!(iter.next(), Some((7, 70)));
    }

    #[test]
    fn descending_keys_on_map() {
        let map = digits();
        assert_eq!(
            map.descending_keys().collect::<Vec<_>>(),
            (0..10).rev().collect::<Vec<_>>()
        );
    }

    #[test]
    fn sub_map_debug() {
        let map = digits();
        let window = map.sub_map(1, true, 3, true);
        insta::assert_snapshot!(format!("{:?}", window), @"[(1, 10), (2, 20), (3, 30)]");
    }

    #[test]
    fn key_set() {
        let map = digits();
        let keys = map.key_set();
        assert_eq!(keys.len(), 10);
        assert!(keys.contains(5));
        assert!(keys.remove(5));
        assert!(!keys.contains(5));
        assert!(!keys.remove(5));
        assert_eq!(keys.pop_first(), Some(0));
        assert_eq!(keys.pop_last(), Some(9));
        assert_eq!(keys.iter().collect::<Vec<_>>(), vec![1, 2, 3, 4, 6, 7, 8]);
        assert_eq!(
            keys.descending_iter().collect::<Vec<_>>(),
            vec![8, 7, 6, 4, 3, 2, 1]
        );
        assert_eq!(keys.len(), 7);
        assert!(!keys.is_empty());
    }

    #[test]
    fn custom_comparator_views_follow_map_order() {
        let map = SkipMap::with_comparator(|a: &i64, b: &i64| b.cmp(a));
        for i in 0..10 {
            map.insert(i, i);
        }
        // Under the reversed comparator, 6 precedes 2.
        let window = map.sub_map(6, true, 2, true);
        assert_eq!(window.keys().collect::<Vec<_>>(), vec![6, 5, 4, 3, 2]);
        let reversed = map.descending_map();
        assert_eq!(reversed.first_key(), 0);
    }
}
