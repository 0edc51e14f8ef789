//! A lock-free sorted map keyed by fixed-width primitives.
//!
//! `SkipMap` stores key-value pairs with the keys unique and always sorted,
//! and supports fully concurrent access: any number of threads may insert,
//! remove, look up and iterate at the same time, without a lock anywhere.
//! All mutation happens through single-word compare-and-swap operations on
//! the base chain, the index tower, the head pointer and the value slots;
//! unlinked memory is reclaimed through epoch-based deferral.
//!
//! Removal is two-phase: a node's value slot is CAS-nulled (logical
//! deletion), a marker node is spliced in after it, and the predecessor is
//! then CAS-stepped past both.  Every traversal that walks past a deleted
//! node or a stale index entry helps unlink it; this cooperative cleanup is
//! what keeps the structure compact and must not be skipped.

use std::cmp;
use std::fmt;
use std::iter;
use std::ops::Bound;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed};

use crossbeam_epoch::{self as epoch, Atomic, Guard, Owned, Shared};

use crate::counter::StripedCounter;
use crate::key::Key;
use crate::level_generator::{Geometric, LevelGenerator};
use crate::skipnode::{Index, Node};

/// Relation bit: accept an exact key match.
pub(crate) const EQ: u8 = 1;
/// Relation bit: search below the key instead of above it.
pub(crate) const LT: u8 = 2;
/// Strictly-greater search, expressed as the absence of both bits.
pub(crate) const GT: u8 = 0;

/// An injected total order over the key type.
pub type Comparator<K> = Arc<dyn Fn(&K, &K) -> cmp::Ordering + Send + Sync>;

// ////////////////////////////////////////////////////////////////////////////
// SkipMap
// ////////////////////////////////////////////////////////////////////////////

/// A lock-free concurrent sorted map.
///
/// The map is a skip list: a base chain of nodes in ascending key order,
/// with a probabilistic tower of index levels above it that makes searches
/// expected `O(log n)`.  All operations take `&self` and are safe to call
/// from any number of threads concurrently.
///
/// Keys are fixed-width primitives implementing [`Key`]; each key type
/// reserves one sentinel value ([`Key::SENTINEL`]) for internal header and
/// marker nodes, and every key-accepting method panics when given it.
/// Values are handed out by clone, since a concurrent reader can never
/// receive unique ownership of a slot that other threads may still observe.
///
/// Iteration is *weakly consistent*: iterators never fail on concurrent
/// modification and reflect some, but not necessarily all, mutations that
/// happen while they are live.
///
/// # Examples
///
/// ```
/// use skipmap::SkipMap;
///
/// let map = SkipMap::new();
/// map.insert(3, "three");
/// map.insert(1, "one");
/// map.insert(2, "two");
///
/// assert_eq!(map.get(2), Some("two"));
/// assert_eq!(map.keys().collect::<Vec<_>>(), vec![1, 2, 3]);
/// ```
pub struct SkipMap<K, V> {
    /// Topmost index of the tower; null until the first insert.
    pub(crate) head: Atomic<Index<K, V>>,
    pub(crate) count: StripedCounter,
    pub(crate) comparator: Option<Comparator<K>>,
    level_generator: Box<dyn LevelGenerator>,
}

// ///////////////////////////////////////////////
// Construction
// ///////////////////////////////////////////////

impl<K: Key, V> SkipMap<K, V> {
    /// Create a new, empty map ordered by the key's natural ascending order.
    ///
    /// # Examples
    ///
    /// ```
    /// use skipmap::SkipMap;
    ///
    /// let map: SkipMap<i64, String> = SkipMap::new();
    /// assert!(map.is_empty());
    /// ```
    #[must_use]
    pub fn new() -> Self {
        SkipMap {
            head: Atomic::null(),
            count: StripedCounter::new(),
            comparator: None,
            level_generator: Box::new(Geometric::default()),
        }
    }

    /// Create a new, empty map ordered by `comparator`.
    ///
    /// The comparator must be a total order and is never invoked on the
    /// reserved sentinel key.
    ///
    /// # Examples
    ///
    /// ```
    /// use skipmap::SkipMap;
    ///
    /// // A map sorted in descending key order.
    /// let map = SkipMap::with_comparator(|a: &i64, b: &i64| b.cmp(a));
    /// map.insert(1, "one");
    /// map.insert(2, "two");
    /// assert_eq!(map.first_key(), 2);
    /// ```
    #[must_use]
    pub fn with_comparator(
        comparator: impl Fn(&K, &K) -> cmp::Ordering + Send + Sync + 'static,
    ) -> Self {
        SkipMap {
            head: Atomic::null(),
            count: StripedCounter::new(),
            comparator: Some(Arc::new(comparator)),
            level_generator: Box::new(Geometric::default()),
        }
    }

    /// Replace the probabilistic level generator.
    ///
    /// Only useful for tuning; the [`Geometric`] default is appropriate for
    /// almost every workload.
    #[must_use]
    pub fn with_level_generator(mut self, generator: impl LevelGenerator + 'static) -> Self {
        self.level_generator = Box::new(generator);
        self
    }
}

// ///////////////////////////////////////////////
// Internal helpers
// ///////////////////////////////////////////////

impl<K: Key, V> SkipMap<K, V> {
    /// Compare two keys under this map's order.
    pub(crate) fn cpr(&self, a: &K, b: &K) -> cmp::Ordering {
        match &self.comparator {
            Some(comparator) => comparator(a, b),
            None => a.compare(b),
        }
    }

    /// Reject the reserved sentinel before it can reach the comparator.
    pub(crate) fn check_key(&self, key: &K) {
        assert!(!key.is_sentinel(), "key is the reserved sentinel value");
    }

    /// Whether two maps observe the same order.
    fn same_order(&self, other: &Self) -> bool {
        match (&self.comparator, &other.comparator) {
            (None, None) => true,
            (Some(a), Some(b)) => ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b)),
            _ => false,
        }
    }

    /// The header node of the base chain, or null if uninitialized.
    pub(crate) fn base_head<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<K, V>> {
        let h = self.head.load(Acquire, guard);
        match unsafe { h.as_ref() } {
            Some(h_ref) => h_ref.node.load(Acquire, guard),
            None => Shared::null(),
        }
    }

    /// Unlink the stale index `r` from its predecessor `q` at the same level.
    fn unlink_index<'g>(
        &self,
        q: Shared<'g, Index<K, V>>,
        r: Shared<'g, Index<K, V>>,
        guard: &'g Guard,
    ) {
        let q_ref = unsafe { q.deref() };
        let rr = unsafe { r.deref() }.right.load(Acquire, guard);
        if q_ref
            .right
            .compare_exchange(r, rr, AcqRel, Acquire, guard)
            .is_ok()
        {
            // SAFETY: `r` is no longer reachable from this level; any thread
            // still holding it is pinned and keeps it alive until it unpins.
            unsafe { guard.defer_destroy(r) };
        }
    }

    /// Reclaim a retired index together with everything right of it.
    ///
    /// # Safety
    ///
    /// `first` must be unreachable for any thread pinning after this call.
    /// Threads pinned earlier may still splice into the chain, which is why
    /// the walk happens inside the deferred closure: by the time it runs, no
    /// such splice can still be in flight.
    unsafe fn defer_free_chain(first: Shared<'_, Index<K, V>>, guard: &Guard) {
        let raw = first.as_raw();
        unsafe {
            guard.defer_unchecked(move || {
                let unprotected = epoch::unprotected();
                let first: Shared<'_, Index<K, V>> = Shared::from(raw);
                let mut r = first.deref().right.load(Relaxed, unprotected);
                while !r.is_null() {
                    let next = r.deref().right.load(Relaxed, unprotected);
                    drop(r.into_owned());
                    r = next;
                }
                drop(first.into_owned());
            });
        }
    }
}

// ///////////////////////////////////////////////
// Traversal primitives
// ///////////////////////////////////////////////

impl<K: Key, V> SkipMap<K, V> {
    /// Return the base node that immediately precedes where `key` would sit,
    /// or the base header if no smaller key exists, or null if the map is
    /// uninitialized.
    ///
    /// Descends the index tower, moving right while the right neighbour
    /// indexes a live node with a smaller key and down when rightward
    /// progress stops.  Every stale index entry encountered on the way is
    /// unlinked; this incidental cleanup is what keeps the tower bounded and
    /// is relied upon by every caller.
    pub(crate) fn find_predecessor<'g>(&self, key: &K, guard: &'g Guard) -> Shared<'g, Node<K, V>> {
        let mut q = self.head.load(Acquire, guard);
        if q.is_null() {
            return Shared::null();
        }
        loop {
            loop {
                let q_ref = unsafe { q.deref() };
                let r = q_ref.right.load(Acquire, guard);
                let Some(r_ref) = (unsafe { r.as_ref() }) else {
                    break;
                };
                let p = r_ref.node.load(Acquire, guard);
                let p_ref = unsafe { p.deref() };
                if p_ref.val.load(Acquire, guard).is_null() {
                    self.unlink_index(q, r, guard);
                } else if self.cpr(key, &p_ref.key) == cmp::Ordering::Greater {
                    q = r;
                } else {
                    break;
                }
            }
            let q_ref = unsafe { q.deref() };
            let d = q_ref.down.load(Acquire, guard);
            if d.is_null() {
                return q_ref.node.load(Acquire, guard);
            }
            q = d;
        }
    }

    /// Return the live node holding exactly `key`, or null.
    pub(crate) fn find_node<'g>(&self, key: &K, guard: &'g Guard) -> Shared<'g, Node<K, V>> {
        'outer: loop {
            let mut b = self.find_predecessor(key, guard);
            if b.is_null() {
                return Shared::null();
            }
            loop {
                let b_ref = unsafe { b.deref() };
                let n = b_ref.next.load(Acquire, guard);
                let Some(n_ref) = (unsafe { n.as_ref() }) else {
                    return Shared::null();
                };
                if n_ref.is_sentinel() {
                    // A marker follows our predecessor: it is mid-unlink and
                    // no longer a valid anchor, so redo the whole search.
                    continue 'outer;
                }
                let v = n_ref.val.load(Acquire, guard);
                if v.is_null() {
                    self.unlink_node(b, n, guard);
                    continue;
                }
                match self.cpr(key, &n_ref.key) {
                    cmp::Ordering::Greater => b = n,
                    cmp::Ordering::Equal => return n,
                    cmp::Ordering::Less => return Shared::null(),
                }
            }
        }
    }

    /// Return the live node nearest to `key` under `rel`, or null.
    ///
    /// `rel` is a bitmask over [`EQ`] and [`LT`]: `LT` alone finds the
    /// strictly-lower neighbour, `LT | EQ` the floor, `EQ` the ceiling, and
    /// neither bit the strictly-higher neighbour.
    pub(crate) fn find_near<'g>(&self, key: &K, rel: u8, guard: &'g Guard) -> Shared<'g, Node<K, V>> {
        'outer: loop {
            let mut b = self.find_predecessor(key, guard);
            if b.is_null() {
                return Shared::null();
            }
            loop {
                let b_ref = unsafe { b.deref() };
                let n = b_ref.next.load(Acquire, guard);
                let Some(n_ref) = (unsafe { n.as_ref() }) else {
                    return if rel & LT != 0 && !b_ref.is_sentinel() {
                        b
                    } else {
                        Shared::null()
                    };
                };
                if n_ref.is_sentinel() {
                    continue 'outer;
                }
                let v = n_ref.val.load(Acquire, guard);
                if v.is_null() {
                    self.unlink_node(b, n, guard);
                    continue;
                }
                let c = self.cpr(key, &n_ref.key);
                if (c == cmp::Ordering::Equal && rel & EQ != 0)
                    || (c == cmp::Ordering::Less && rel & LT == 0)
                {
                    return n;
                }
                if c != cmp::Ordering::Greater && rel & LT != 0 {
                    return if b_ref.is_sentinel() { Shared::null() } else { b };
                }
                b = n;
            }
        }
    }

    /// The first live node of the base chain, or null.
    pub(crate) fn find_first<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<K, V>> {
        loop {
            let b = self.base_head(guard);
            let Some(b_ref) = (unsafe { b.as_ref() }) else {
                return Shared::null();
            };
            let n = b_ref.next.load(Acquire, guard);
            let Some(n_ref) = (unsafe { n.as_ref() }) else {
                return Shared::null();
            };
            if n_ref.val.load(Acquire, guard).is_null() {
                self.unlink_node(b, n, guard);
            } else {
                return n;
            }
        }
    }

    /// The last live node of the base chain, or null.
    ///
    /// No index points at the tail directly, so the search descends the
    /// tower keeping rightmost and then walks the remaining base suffix,
    /// skipping deletions.
    pub(crate) fn find_last<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<K, V>> {
        'outer: loop {
            let mut q = self.head.load(Acquire, guard);
            if q.is_null() {
                return Shared::null();
            }
            let mut b = loop {
                let q_ref = unsafe { q.deref() };
                let r = q_ref.right.load(Acquire, guard);
                if let Some(r_ref) = unsafe { r.as_ref() } {
                    let p = r_ref.node.load(Acquire, guard);
                    if unsafe { p.deref() }.val.load(Acquire, guard).is_null() {
                        self.unlink_index(q, r, guard);
                    } else {
                        q = r;
                    }
                    continue;
                }
                let d = q_ref.down.load(Acquire, guard);
                if d.is_null() {
                    break q_ref.node.load(Acquire, guard);
                }
                q = d;
            };
            loop {
                let b_ref = unsafe { b.deref() };
                let n = b_ref.next.load(Acquire, guard);
                let Some(n_ref) = (unsafe { n.as_ref() }) else {
                    return if b_ref.is_sentinel() { Shared::null() } else { b };
                };
                if n_ref.is_sentinel() {
                    continue 'outer;
                }
                if n_ref.val.load(Acquire, guard).is_null() {
                    self.unlink_node(b, n, guard);
                } else {
                    b = n;
                }
            }
        }
    }

    /// Physically unlink the logically deleted node `n` from its predecessor
    /// `b` using the marker protocol: append a marker after `n` so nothing
    /// can be linked behind it, then step `b` past both.
    ///
    /// Safe to call with a stale `b`; the final CAS simply fails and some
    /// other traversal completes the unlink.
    pub(crate) fn unlink_node<'g>(
        &self,
        b: Shared<'g, Node<K, V>>,
        n: Shared<'g, Node<K, V>>,
        guard: &'g Guard,
    ) {
        let n_ref = unsafe { n.deref() };
        loop {
            let f = n_ref.next.load(Acquire, guard);
            let marked = unsafe { f.as_ref() }.is_some_and(|f_ref| f_ref.is_sentinel());
            let p = if marked {
                unsafe { f.deref() }.next.load(Acquire, guard)
            } else {
                match n_ref.next.compare_exchange(
                    f,
                    Owned::new(Node::marker(f)),
                    AcqRel,
                    Acquire,
                    guard,
                ) {
                    Ok(_) => f,
                    Err(_) => continue,
                }
            };
            let b_ref = unsafe { b.deref() };
            if b_ref
                .next
                .compare_exchange(n, p, AcqRel, Acquire, guard)
                .is_ok()
            {
                // Winning this CAS makes `n` and its marker unreachable, so
                // the winner owns their reclamation.  The marker pointer is
                // stable: nothing ever swings `next` away from a marker.
                unsafe {
                    let marker = n_ref.next.load(Acquire, guard);
                    guard.defer_destroy(marker);
                    guard.defer_destroy(n);
                }
            }
            return;
        }
    }
}

// ///////////////////////////////////////////////
// Mutators
// ///////////////////////////////////////////////

impl<K: Key, V: Clone + Send + Sync + 'static> SkipMap<K, V> {
    /// Insert a key-value pair, returning the previously mapped value if the
    /// key was present.
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
    /// let map = SkipMap::new();
    /// assert_eq!(map.insert(1, "a"), None);
    /// assert_eq!(map.insert(1, "b"), Some("a"));
    /// assert_eq!(map.get(1), Some("b"));
    /// ```
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.check_key(&key);
        let guard = &epoch::pin();
        self.do_put(key, value, false, guard)
    }

    /// Insert only if the key is absent, returning the existing value
    /// otherwise.
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
    /// let map = SkipMap::new();
    /// assert_eq!(map.insert_if_absent(1, "a"), None);
    /// assert_eq!(map.insert_if_absent(1, "b"), Some("a"));
    /// assert_eq!(map.get(1), Some("a"));
    /// ```
    pub fn insert_if_absent(&self, key: K, value: V) -> Option<V> {
        self.check_key(&key);
        let guard = &epoch::pin();
        self.do_put(key, value, true, guard)
    }

    /// Remove a key, returning the value it mapped to.
    ///
    /// Removing an absent key returns `None` and changes nothing.
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
    /// let map = SkipMap::new();
    /// map.insert(1, "a");
    /// assert_eq!(map.remove(1), Some("a"));
    /// assert_eq!(map.remove(1), None);
    /// ```
    pub fn remove(&self, key: K) -> Option<V> {
        self.check_key(&key);
        let guard = &epoch::pin();
        self.do_remove(&key, |_| true, guard)
    }

    /// Replace the value of an existing key, returning the old value.
    ///
    /// Does nothing if the key is absent.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn replace(&self, key: K, value: V) -> Option<V> {
        self.check_key(&key);
        let guard = &epoch::pin();
        let mut value = value;
        loop {
            let n = self.find_node(&key, guard);
            let n_ref = unsafe { n.as_ref() }?;
            let v = n_ref.val.load(Acquire, guard);
            let Some(v_ref) = (unsafe { v.as_ref() }) else {
                // Deleted under us; the key is now absent.
                return None;
            };
            let old = v_ref.clone();
            match n_ref
                .val
                .compare_exchange(v, Owned::new(value), AcqRel, Acquire, guard)
            {
                Ok(_) => {
                    unsafe { guard.defer_destroy(v) };
                    return Some(old);
                }
                Err(e) => value = *e.new.into_box(),
            }
        }
    }

    /// Return the value mapped to the key, if absent compute one and insert
    /// it.
    ///
    /// If `f` returns `None` nothing is inserted.  When a racing insert beats
    /// the computed value in, the racer's value is returned and the computed
    /// one is discarded; `f` must therefore be side-effect free.
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
    /// let map: SkipMap<i64, i64> = SkipMap::new();
    /// assert_eq!(map.compute_if_absent(6, |k| Some(k * 7)), Some(42));
    /// assert_eq!(map.compute_if_absent(6, |_| Some(0)), Some(42));
    /// assert_eq!(map.compute_if_absent(7, |_| None), None);
    /// assert!(!map.contains_key(7));
    /// ```
    pub fn compute_if_absent(&self, key: K, f: impl FnOnce(K) -> Option<V>) -> Option<V> {
        self.check_key(&key);
        if let Some(existing) = self.get(key) {
            return Some(existing);
        }
        let computed = f(key)?;
        let guard = &epoch::pin();
        match self.do_put(key, computed.clone(), true, guard) {
            Some(existing) => Some(existing),
            None => Some(computed),
        }
    }

    /// Merge `value` into the mapping for `key`.
    ///
    /// If the key is absent, `value` is inserted.  Otherwise `remap` combines
    /// the current value with `value`: a `Some` result replaces the mapping,
    /// a `None` result removes it.  Returns the value the key maps to
    /// afterwards.
    ///
    /// Any lost CAS restarts the whole operation, so `remap` may run more
    /// than once and must be pure.
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
    /// let map: SkipMap<i64, i64> = SkipMap::new();
    /// assert_eq!(map.merge(1, 10, |old, new| Some(old + new)), Some(10));
    /// assert_eq!(map.merge(1, 10, |old, new| Some(old + new)), Some(20));
    /// assert_eq!(map.merge(1, 0, |_, _| None), None);
    /// assert!(!map.contains_key(1));
    /// ```
    pub fn merge(&self, key: K, value: V, remap: impl Fn(&V, &V) -> Option<V>) -> Option<V> {
        self.check_key(&key);
        let guard = &epoch::pin();
        loop {
            let n = self.find_node(&key, guard);
            let Some(n_ref) = (unsafe { n.as_ref() }) else {
                if self.do_put(key, value.clone(), true, guard).is_none() {
                    return Some(value);
                }
                continue;
            };
            let v = n_ref.val.load(Acquire, guard);
            let Some(v_ref) = (unsafe { v.as_ref() }) else {
                continue;
            };
            match remap(v_ref, &value) {
                Some(merged) => {
                    if n_ref
                        .val
                        .compare_exchange(v, Owned::new(merged.clone()), AcqRel, Acquire, guard)
                        .is_ok()
                    {
                        unsafe { guard.defer_destroy(v) };
                        return Some(merged);
                    }
                }
                None => {
                    if n_ref
                        .val
                        .compare_exchange(v, Shared::null(), AcqRel, Acquire, guard)
                        .is_ok()
                    {
                        unsafe { guard.defer_destroy(v) };
                        // Walk again purely to unlink the emptied node.
                        let _ = self.find_node(&key, guard);
                        self.try_reduce_level(guard);
                        self.count.add(-1);
                        return None;
                    }
                }
            }
        }
    }

    /// Remove and return the first entry.
    ///
    /// # Examples
    ///
    /// ```
    /// use skipmap::SkipMap;
    ///
    /// let map = SkipMap::new();
    /// map.insert(2, "b");
    /// map.insert(1, "a");
    /// assert_eq!(map.pop_first(), Some((1, "a")));
    /// assert_eq!(map.pop_first(), Some((2, "b")));
    /// assert_eq!(map.pop_first(), None);
    /// ```
    pub fn pop_first(&self) -> Option<(K, V)> {
        let guard = &epoch::pin();
        loop {
            let b = self.base_head(guard);
            let b_ref = unsafe { b.as_ref() }?;
            let n = b_ref.next.load(Acquire, guard);
            let n_ref = unsafe { n.as_ref() }?;
            let v = n_ref.val.load(Acquire, guard);
            if v.is_null() {
                self.unlink_node(b, n, guard);
                continue;
            }
            if n_ref
                .val
                .compare_exchange(v, Shared::null(), AcqRel, Acquire, guard)
                .is_ok()
            {
                let value = unsafe { v.deref() }.clone();
                unsafe { guard.defer_destroy(v) };
                self.unlink_node(b, n, guard);
                self.try_reduce_level(guard);
                self.count.add(-1);
                return Some((n_ref.key, value));
            }
        }
    }

    /// Remove and return the last entry.
    pub fn pop_last(&self) -> Option<(K, V)> {
        let guard = &epoch::pin();
        loop {
            let n = self.find_last(guard);
            let n_ref = unsafe { n.as_ref() }?;
            let v = n_ref.val.load(Acquire, guard);
            if v.is_null() {
                continue;
            }
            if n_ref
                .val
                .compare_exchange(v, Shared::null(), AcqRel, Acquire, guard)
                .is_ok()
            {
                let key = n_ref.key;
                let value = unsafe { v.deref() }.clone();
                unsafe { guard.defer_destroy(v) };
                // Walk again purely to unlink the emptied node.
                let _ = self.find_node(&key, guard);
                self.try_reduce_level(guard);
                self.count.add(-1);
                return Some((key, value));
            }
        }
    }

    /// Apply `f` to every entry, retrying each slot until its own update
    /// wins.  Concurrent external updates to a slot cause `f` to be re-run
    /// on the fresher value.
    pub fn replace_all(&self, f: impl Fn(K, &V) -> V) {
        let guard = &epoch::pin();
        let mut n = match unsafe { self.base_head(guard).as_ref() } {
            Some(b_ref) => b_ref.next.load(Acquire, guard),
            None => Shared::null(),
        };
        while let Some(n_ref) = unsafe { n.as_ref() } {
            loop {
                let v = n_ref.val.load(Acquire, guard);
                let Some(v_ref) = (unsafe { v.as_ref() }) else {
                    break;
                };
                let replacement = Owned::new(f(n_ref.key, v_ref));
                if n_ref
                    .val
                    .compare_exchange(v, replacement, AcqRel, Acquire, guard)
                    .is_ok()
                {
                    unsafe { guard.defer_destroy(v) };
                    break;
                }
            }
            n = n_ref.next.load(Acquire, guard);
        }
    }

    /// The insert/update retry loop shared by [`insert`][SkipMap::insert]
    /// and [`insert_if_absent`][SkipMap::insert_if_absent].
    ///
    /// Returns the previous value if the key was present (after replacing it
    /// unless `only_if_absent`), or `None` after a successful physical
    /// insert.
    pub(crate) fn do_put(
        &self,
        key: K,
        value: V,
        only_if_absent: bool,
        guard: &Guard,
    ) -> Option<V> {
        let mut value = value;
        'outer: loop {
            let mut levels = 0usize;
            let mut h = self.head.load(Acquire, guard);
            let b;
            if h.is_null() {
                // Install the initial header and a one-level tower.  Exactly
                // one racing thread wins; the rest retry against its result.
                let base = Owned::new(Node::header()).into_shared(guard);
                let first = Owned::new(Index::new(base, Shared::null(), Shared::null()));
                match self
                    .head
                    .compare_exchange(Shared::null(), first, AcqRel, Acquire, guard)
                {
                    Ok(installed) => {
                        h = installed;
                        b = base;
                    }
                    Err(e) => {
                        drop(e.new);
                        // SAFETY: the header was never published.
                        unsafe { drop(base.into_owned()) };
                        continue 'outer;
                    }
                }
            } else {
                // Descend to a base predecessor, counting the levels passed
                // for the index build below.
                let mut q = h;
                b = loop {
                    loop {
                        let q_ref = unsafe { q.deref() };
                        let r = q_ref.right.load(Acquire, guard);
                        let Some(r_ref) = (unsafe { r.as_ref() }) else {
                            break;
                        };
                        let p = r_ref.node.load(Acquire, guard);
                        let p_ref = unsafe { p.deref() };
                        if p_ref.val.load(Acquire, guard).is_null() {
                            self.unlink_index(q, r, guard);
                        } else if self.cpr(&key, &p_ref.key) == cmp::Ordering::Greater {
                            q = r;
                        } else {
                            break;
                        }
                    }
                    let q_ref = unsafe { q.deref() };
                    let d = q_ref.down.load(Acquire, guard);
                    if d.is_null() {
                        break q_ref.node.load(Acquire, guard);
                    }
                    levels += 1;
                    q = d;
                };
            }
            let mut b = b;
            let z;
            loop {
                let b_ref = unsafe { b.deref() };
                let n = b_ref.next.load(Acquire, guard);
                if let Some(n_ref) = unsafe { n.as_ref() } {
                    if n_ref.is_sentinel() {
                        // Our predecessor is mid-unlink; nothing can be
                        // appended behind the marker.
                        continue 'outer;
                    }
                    let v = n_ref.val.load(Acquire, guard);
                    if v.is_null() {
                        self.unlink_node(b, n, guard);
                        continue;
                    }
                    let c = self.cpr(&key, &n_ref.key);
                    if c == cmp::Ordering::Greater {
                        b = n;
                        continue;
                    }
                    if c == cmp::Ordering::Equal {
                        let old = unsafe { v.deref() }.clone();
                        if only_if_absent {
                            return Some(old);
                        }
                        match n_ref
                            .val
                            .compare_exchange(v, Owned::new(value), AcqRel, Acquire, guard)
                        {
                            Ok(_) => {
                                unsafe { guard.defer_destroy(v) };
                                return Some(old);
                            }
                            Err(e) => {
                                value = *e.new.into_box();
                                continue;
                            }
                        }
                    }
                    // c is Less: this is the insertion point.
                }
                let new_node = Owned::new(Node::new(key, value, n));
                match b_ref.next.compare_exchange(n, new_node, AcqRel, Acquire, guard) {
                    Ok(linked) => {
                        z = linked;
                        break;
                    }
                    Err(e) => {
                        let mut lost = e.new;
                        value = Node::take_value(&mut lost);
                        continue;
                    }
                }
            }
            self.build_index(z, h, levels, guard);
            self.count.add(1);
            return None;
        }
    }

    /// The removal retry loop: logically delete the first node matching
    /// `key` whose value passes `check`, then unlink it physically.
    pub(crate) fn do_remove(
        &self,
        key: &K,
        check: impl Fn(&V) -> bool,
        guard: &Guard,
    ) -> Option<V> {
        'outer: loop {
            let mut b = self.find_predecessor(key, guard);
            if b.is_null() {
                return None;
            }
            loop {
                let b_ref = unsafe { b.deref() };
                let n = b_ref.next.load(Acquire, guard);
                let Some(n_ref) = (unsafe { n.as_ref() }) else {
                    return None;
                };
                if n_ref.is_sentinel() {
                    continue 'outer;
                }
                let v = n_ref.val.load(Acquire, guard);
                if v.is_null() {
                    self.unlink_node(b, n, guard);
                    continue;
                }
                match self.cpr(key, &n_ref.key) {
                    cmp::Ordering::Greater => b = n,
                    cmp::Ordering::Less => return None,
                    cmp::Ordering::Equal => {
                        let v_ref = unsafe { v.deref() };
                        if !check(v_ref) {
                            return None;
                        }
                        if n_ref
                            .val
                            .compare_exchange(v, Shared::null(), AcqRel, Acquire, guard)
                            .is_ok()
                        {
                            let removed = v_ref.clone();
                            unsafe { guard.defer_destroy(v) };
                            self.unlink_node(b, n, guard);
                            self.try_reduce_level(guard);
                            self.count.add(-1);
                            return Some(removed);
                        }
                        // Lost the value CAS to a concurrent updater; the
                        // whole predecessor search restarts.
                        continue 'outer;
                    }
                }
            }
        }
    }

    /// Probabilistically attach index entries for the freshly linked `z`.
    ///
    /// The tower is spliced bottom-up into the existing index levels; only
    /// when the random height saturates every existing level is one new
    /// level added on top, by swapping in a taller head.
    fn build_index<'g>(
        &self,
        z: Shared<'g, Node<K, V>>,
        h: Shared<'g, Index<K, V>>,
        levels: usize,
        guard: &'g Guard,
    ) {
        let height = self.level_generator.random();
        if height == 0 {
            return;
        }
        let key = unsafe { z.deref() }.key;
        // `levels` down-moves means `levels + 1` existing index levels; the
        // tower may exceed them by at most the one new level added below.
        let tower = height.min(levels + 1);
        let mut below = Shared::<Index<K, V>>::null();
        for level in 1..=tower {
            match self.splice_index(&key, z, below, level, guard) {
                Some(linked) => below = linked,
                None => return,
            }
        }
        if height > levels + 1 {
            let h_ref = unsafe { h.deref() };
            let hx = Owned::new(Index::new(z, below, Shared::null())).into_shared(guard);
            let taller = Owned::new(Index::new(h_ref.node.load(Acquire, guard), h, hx));
            match self.head.compare_exchange(h, taller, AcqRel, Acquire, guard) {
                Ok(_) => {}
                Err(e) => {
                    drop(e.new);
                    // SAFETY: the new top index was never published.
                    unsafe { drop(hx.into_owned()) };
                }
            }
        }
        if unsafe { z.deref() }.val.load(Acquire, guard).is_null() {
            // Deleted while the indices were being attached; descend once
            // more so the stale entries are pruned immediately.
            let _ = self.find_predecessor(&key, guard);
        }
    }

    /// Find the splice point for `z` at index `level` (1 is the lowest index
    /// level) and link a new index entry there.
    ///
    /// Returns the linked entry, or `None` when the attempt should be
    /// abandoned: the node was deleted, the tower shrank below the target
    /// level, or another index already covers the key.
    fn splice_index<'g>(
        &self,
        key: &K,
        z: Shared<'g, Node<K, V>>,
        below: Shared<'g, Index<K, V>>,
        level: usize,
        guard: &'g Guard,
    ) -> Option<Shared<'g, Index<K, V>>> {
        let mut x = Owned::new(Index::new(z, below, Shared::null()));
        'restart: loop {
            if unsafe { z.deref() }.val.load(Acquire, guard).is_null() {
                return None;
            }
            let mut q = self.head.load(Acquire, guard);
            if q.is_null() {
                return None;
            }
            // Measure the tower so the descent knows where `level` sits.
            let mut at = {
                let mut depth = 1;
                let mut i = q;
                loop {
                    let d = unsafe { i.deref() }.down.load(Acquire, guard);
                    if d.is_null() {
                        break depth;
                    }
                    depth += 1;
                    i = d;
                }
            };
            if at < level {
                return None;
            }
            loop {
                let q_ref = unsafe { q.deref() };
                let r = q_ref.right.load(Acquire, guard);
                if let Some(r_ref) = unsafe { r.as_ref() } {
                    let p = r_ref.node.load(Acquire, guard);
                    let p_ref = unsafe { p.deref() };
                    if p_ref.val.load(Acquire, guard).is_null() {
                        self.unlink_index(q, r, guard);
                        continue;
                    }
                    match self.cpr(key, &p_ref.key) {
                        cmp::Ordering::Greater => {
                            q = r;
                            continue;
                        }
                        cmp::Ordering::Equal => return None,
                        cmp::Ordering::Less => {}
                    }
                }
                if at == level {
                    x.right.store(r, Relaxed);
                    match q_ref.right.compare_exchange(r, x, AcqRel, Acquire, guard) {
                        Ok(linked) => return Some(linked),
                        Err(e) => {
                            x = e.new;
                            continue 'restart;
                        }
                    }
                }
                let d = q_ref.down.load(Acquire, guard);
                if d.is_null() {
                    // The tower changed underneath the descent.
                    continue 'restart;
                }
                at -= 1;
                q = d;
            }
        }
    }

    /// Drop the top index level if the top three levels all look empty.
    ///
    /// The check races with concurrent index insertion and can occasionally
    /// retire a level that was just gaining content; the compensating CAS
    /// puts it back.  The heuristic costs at worst a little search
    /// performance, never correctness.
    pub(crate) fn try_reduce_level(&self, guard: &Guard) {
        let h = self.head.load(Acquire, guard);
        let Some(h_ref) = (unsafe { h.as_ref() }) else {
            return;
        };
        if !h_ref.right.load(Acquire, guard).is_null() {
            return;
        }
        let d = h_ref.down.load(Acquire, guard);
        let Some(d_ref) = (unsafe { d.as_ref() }) else {
            return;
        };
        if !d_ref.right.load(Acquire, guard).is_null() {
            return;
        }
        let e = d_ref.down.load(Acquire, guard);
        let Some(e_ref) = (unsafe { e.as_ref() }) else {
            return;
        };
        if !e_ref.right.load(Acquire, guard).is_null() {
            return;
        }
        if self
            .head
            .compare_exchange(h, d, AcqRel, Acquire, guard)
            .is_ok()
        {
            if !h_ref.right.load(Acquire, guard).is_null()
                && self
                    .head
                    .compare_exchange(d, h, AcqRel, Acquire, guard)
                    .is_ok()
            {
                // The retired level gained content right away; it is back in
                // place and must not be reclaimed.
                return;
            }
            // SAFETY: the level is permanently unreachable from `head`.
            unsafe { Self::defer_free_chain(h, guard) };
        }
    }
}

// ///////////////////////////////////////////////
// Lookups and whole-map operations
// ///////////////////////////////////////////////

impl<K: Key, V: Clone + Send + Sync + 'static> SkipMap<K, V> {
    /// Return a clone of the value mapped to `key`.
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
    /// let map = SkipMap::new();
    /// map.insert(1, "one");
    /// assert_eq!(map.get(1), Some("one"));
    /// assert_eq!(map.get(2), None);
    /// ```
    pub fn get(&self, key: K) -> Option<V> {
        self.check_key(&key);
        let guard = &epoch::pin();
        let n = self.find_node(&key, guard);
        let n_ref = unsafe { n.as_ref() }?;
        let v = n_ref.val.load(Acquire, guard);
        unsafe { v.as_ref() }.cloned()
    }

    /// The first (smallest) entry, or `None` if the map is empty.
    pub fn first_entry(&self) -> Option<(K, V)> {
        let guard = &epoch::pin();
        loop {
            let n = self.find_first(guard);
            let n_ref = unsafe { n.as_ref() }?;
            let v = n_ref.val.load(Acquire, guard);
            if let Some(v_ref) = unsafe { v.as_ref() } {
                return Some((n_ref.key, v_ref.clone()));
            }
        }
    }

    /// The last (greatest) entry, or `None` if the map is empty.
    pub fn last_entry(&self) -> Option<(K, V)> {
        let guard = &epoch::pin();
        loop {
            let n = self.find_last(guard);
            let n_ref = unsafe { n.as_ref() }?;
            let v = n_ref.val.load(Acquire, guard);
            if let Some(v_ref) = unsafe { v.as_ref() } {
                return Some((n_ref.key, v_ref.clone()));
            }
        }
    }

    /// The entry with the greatest key strictly less than `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn lower_entry(&self, key: K) -> Option<(K, V)> {
        self.near_entry(key, LT)
    }

    /// The entry with the greatest key less than or equal to `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn floor_entry(&self, key: K) -> Option<(K, V)> {
        self.near_entry(key, LT | EQ)
    }

    /// The entry with the smallest key greater than or equal to `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn ceiling_entry(&self, key: K) -> Option<(K, V)> {
        self.near_entry(key, EQ)
    }

    /// The entry with the smallest key strictly greater than `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn higher_entry(&self, key: K) -> Option<(K, V)> {
        self.near_entry(key, GT)
    }

    pub(crate) fn near_entry(&self, key: K, rel: u8) -> Option<(K, V)> {
        self.check_key(&key);
        let guard = &epoch::pin();
        loop {
            let n = self.find_near(&key, rel, guard);
            let n_ref = unsafe { n.as_ref() }?;
            let v = n_ref.val.load(Acquire, guard);
            if let Some(v_ref) = unsafe { v.as_ref() } {
                return Some((n_ref.key, v_ref.clone()));
            }
        }
    }
}

impl<K: Key, V: Clone + PartialEq + Send + Sync + 'static> SkipMap<K, V> {
    /// Remove `key` only if it currently maps to `expected`.
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
    /// let map = SkipMap::new();
    /// map.insert(1, "a");
    /// assert!(!map.remove_if_eq(1, &"b"));
    /// assert!(map.remove_if_eq(1, &"a"));
    /// assert!(map.is_empty());
    /// ```
    pub fn remove_if_eq(&self, key: K, expected: &V) -> bool {
        self.check_key(&key);
        let guard = &epoch::pin();
        self.do_remove(&key, |v| v == expected, guard).is_some()
    }

    /// Replace the value of `key` only if it currently equals `expected`.
    ///
    /// A stale expectation fails immediately without retrying.
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
    /// let map = SkipMap::new();
    /// map.insert(1, "a");
    /// assert!(map.replace_if_eq(1, &"a", "b"));
    /// assert!(!map.replace_if_eq(1, &"a", "c"));
    /// assert_eq!(map.get(1), Some("b"));
    /// ```
    pub fn replace_if_eq(&self, key: K, expected: &V, value: V) -> bool {
        self.check_key(&key);
        let guard = &epoch::pin();
        let mut value = value;
        loop {
            let n = self.find_node(&key, guard);
            let Some(n_ref) = (unsafe { n.as_ref() }) else {
                return false;
            };
            let v = n_ref.val.load(Acquire, guard);
            let Some(v_ref) = (unsafe { v.as_ref() }) else {
                return false;
            };
            if v_ref != expected {
                return false;
            }
            match n_ref
                .val
                .compare_exchange(v, Owned::new(value), AcqRel, Acquire, guard)
            {
                Ok(_) => {
                    unsafe { guard.defer_destroy(v) };
                    return true;
                }
                Err(e) => value = *e.new.into_box(),
            }
        }
    }

    /// Whether any entry maps to `value`.  Takes time linear in the map size.
    pub fn contains_value(&self, value: &V) -> bool {
        let guard = &epoch::pin();
        let mut n = match unsafe { self.base_head(guard).as_ref() } {
            Some(b_ref) => b_ref.next.load(Acquire, guard),
            None => Shared::null(),
        };
        while let Some(n_ref) = unsafe { n.as_ref() } {
            let v = n_ref.val.load(Acquire, guard);
            if unsafe { v.as_ref() }.is_some_and(|v_ref| v_ref == value) {
                return true;
            }
            n = n_ref.next.load(Acquire, guard);
        }
        false
    }
}

impl<K: Key, V> SkipMap<K, V> {
    /// Whether `key` has a live mapping.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn contains_key(&self, key: K) -> bool {
        self.check_key(&key);
        let guard = &epoch::pin();
        !self.find_node(&key, guard).is_null()
    }

    /// The number of entries in the map.
    ///
    /// The count is kept in a striped counter and is only exact once all
    /// mutators have quiesced; mid-flight it may transiently lag.
    pub fn len(&self) -> usize {
        self.count.sum()
    }

    /// Whether the map has no entries.
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        self.find_first(guard).is_null()
    }

    /// The smallest key.
    ///
    /// # Panics
    ///
    /// Panics if the map is empty.  Use
    /// [`first_entry`][SkipMap::first_entry] for a non-panicking variant.
    pub fn first_key(&self) -> K {
        let guard = &epoch::pin();
        let n = self.find_first(guard);
        let Some(n_ref) = (unsafe { n.as_ref() }) else {
            panic!("first_key called on an empty map");
        };
        n_ref.key
    }

    /// The greatest key.
    ///
    /// # Panics
    ///
    /// Panics if the map is empty.  Use [`last_entry`][SkipMap::last_entry]
    /// for a non-panicking variant.
    pub fn last_key(&self) -> K {
        let guard = &epoch::pin();
        let n = self.find_last(guard);
        let Some(n_ref) = (unsafe { n.as_ref() }) else {
            panic!("last_key called on an empty map");
        };
        n_ref.key
    }

    /// The greatest key strictly less than `key`.
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
    /// let map: SkipMap<i64, ()> = [1, 3, 5, 7].into_iter().map(|k| (k, ())).collect();
    /// assert_eq!(map.lower_key(5), Some(3));
    /// assert_eq!(map.lower_key(1), None);
    /// ```
    pub fn lower_key(&self, key: K) -> Option<K> {
        self.near_key(key, LT)
    }

    /// The greatest key less than or equal to `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn floor_key(&self, key: K) -> Option<K> {
        self.near_key(key, LT | EQ)
    }

    /// The smallest key greater than or equal to `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn ceiling_key(&self, key: K) -> Option<K> {
        self.near_key(key, EQ)
    }

    /// The smallest key strictly greater than `key`.
    ///
    /// # Panics
    ///
    /// Panics if `key` is the reserved sentinel value.
    pub fn higher_key(&self, key: K) -> Option<K> {
        self.near_key(key, GT)
    }

    pub(crate) fn near_key(&self, key: K, rel: u8) -> Option<K> {
        self.check_key(&key);
        let guard = &epoch::pin();
        let n = self.find_near(&key, rel, guard);
        unsafe { n.as_ref() }.map(|n_ref| n_ref.key)
    }

    /// Apply `f` to a weakly consistent snapshot of every entry, in
    /// ascending key order.
    pub fn for_each(&self, mut f: impl FnMut(K, &V)) {
        let guard = &epoch::pin();
        let mut n = match unsafe { self.base_head(guard).as_ref() } {
            Some(b_ref) => b_ref.next.load(Acquire, guard),
            None => Shared::null(),
        };
        while let Some(n_ref) = unsafe { n.as_ref() } {
            let v = n_ref.val.load(Acquire, guard);
            if let Some(v_ref) = unsafe { v.as_ref() } {
                f(n_ref.key, v_ref);
            }
            n = n_ref.next.load(Acquire, guard);
        }
    }

    /// Remove every entry.
    ///
    /// Strips the index levels first, then drains the base chain, and keeps
    /// going until a full pass removes nothing, so entries inserted
    /// concurrently behind the sweep are caught as well.
    pub fn clear(&self) {
        let guard = &epoch::pin();
        loop {
            let h = self.head.load(Acquire, guard);
            let Some(h_ref) = (unsafe { h.as_ref() }) else {
                return;
            };
            let r = h_ref.right.load(Acquire, guard);
            if !r.is_null() {
                if h_ref
                    .right
                    .compare_exchange(r, Shared::null(), AcqRel, Acquire, guard)
                    .is_ok()
                {
                    // SAFETY: the detached chain is unreachable.
                    unsafe { Self::defer_free_chain(r, guard) };
                }
            } else {
                let d = h_ref.down.load(Acquire, guard);
                if !d.is_null() {
                    if self
                        .head
                        .compare_exchange(h, d, AcqRel, Acquire, guard)
                        .is_ok()
                    {
                        // SAFETY: the retired level is unreachable.
                        unsafe { Self::defer_free_chain(h, guard) };
                    }
                } else {
                    let b = h_ref.node.load(Acquire, guard);
                    let b_ref = unsafe { b.deref() };
                    let mut removed = 0i64;
                    loop {
                        let n = b_ref.next.load(Acquire, guard);
                        let Some(n_ref) = (unsafe { n.as_ref() }) else {
                            break;
                        };
                        let v = n_ref.val.load(Acquire, guard);
                        let mut gone = v.is_null();
                        if !gone
                            && n_ref
                                .val
                                .compare_exchange(v, Shared::null(), AcqRel, Acquire, guard)
                                .is_ok()
                        {
                            unsafe { guard.defer_destroy(v) };
                            removed += 1;
                            gone = true;
                        }
                        if gone {
                            self.unlink_node(b, n, guard);
                        }
                    }
                    if removed != 0 {
                        self.count.add(-removed);
                    } else {
                        return;
                    }
                }
            }
        }
    }
}

// ///////////////////////////////////////////////
// Iterators
// ///////////////////////////////////////////////

impl<K: Key, V: Clone + Send + Sync + 'static> SkipMap<K, V> {
    /// A weakly consistent forward iterator over entry snapshots.
    ///
    /// The iterator pins an epoch for its whole lifetime and caches the next
    /// live entry ahead of time; it never fails on concurrent modification.
    ///
    /// # Examples
    ///
    /// ```
    /// use skipmap::SkipMap;
    ///
    /// let map: SkipMap<i64, i64> = (0..5).map(|x| (x, x * x)).collect();
    /// let squares: Vec<_> = map.iter().collect();
    /// assert_eq!(squares, vec![(0, 0), (1, 1), (2, 4), (3, 9), (4, 16)]);
    /// ```
    pub fn iter(&self) -> Iter<'_, K, V> {
        let mut iter = Iter {
            map: self,
            guard: epoch::pin(),
            node: ptr::null(),
            cached: None,
        };
        iter.prime();
        iter
    }

    /// An iterator over the keys, in ascending order.
    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys(self.iter())
    }

    /// An iterator over the values, in ascending key order.
    pub fn values(&self) -> Values<'_, K, V> {
        Values(self.iter())
    }

    /// A forward iterator over the entries within the given key bounds.
    ///
    /// # Panics
    ///
    /// Panics if either bound is the reserved sentinel value, or if the
    /// bounds are inverted.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::ops::Bound::{Excluded, Included};
    ///
    /// use skipmap::SkipMap;
    ///
    /// let map: SkipMap<i64, i64> = (0..10).map(|x| (x, x)).collect();
    /// let picked: Vec<_> = map.range(Included(3), Excluded(6)).map(|(k, _)| k).collect();
    /// assert_eq!(picked, vec![3, 4, 5]);
    /// ```
    pub fn range(&self, min: Bound<K>, max: Bound<K>) -> Range<'_, K, V> {
        if let Bound::Included(k) | Bound::Excluded(k) = min {
            self.check_key(&k);
        }
        if let Bound::Included(k) | Bound::Excluded(k) = max {
            self.check_key(&k);
        }
        if let (Bound::Included(lo) | Bound::Excluded(lo), Bound::Included(hi) | Bound::Excluded(hi)) =
            (&min, &max)
        {
            assert!(
                self.cpr(lo, hi) != cmp::Ordering::Greater,
                "inverted range bounds"
            );
        }
        let mut range = Range {
            map: self,
            guard: epoch::pin(),
            node: ptr::null(),
            cached: None,
            max,
        };
        range.prime(min);
        range
    }
}

/// A weakly consistent forward iterator over a [`SkipMap`].
pub struct Iter<'a, K, V> {
    map: &'a SkipMap<K, V>,
    guard: Guard,
    /// The node whose entry is currently cached; null once exhausted.
    node: *const Node<K, V>,
    cached: Option<(K, V)>,
}

impl<K: Key, V: Clone + Send + Sync + 'static> Iter<'_, K, V> {
    fn prime(&mut self) {
        loop {
            let n = self.map.find_first(&self.guard);
            let Some(n_ref) = (unsafe { n.as_ref() }) else {
                return;
            };
            let v = n_ref.val.load(Acquire, &self.guard);
            if let Some(v_ref) = unsafe { v.as_ref() } {
                self.node = n.as_raw();
                self.cached = Some((n_ref.key, v_ref.clone()));
                return;
            }
        }
    }

    fn advance(&mut self) {
        // The guard has been held since the current pointer was read, so
        // every node reachable from it is still valid memory.
        let mut current = self.node;
        loop {
            if current.is_null() {
                return;
            }
            let next = unsafe { &*current }.next.load(Acquire, &self.guard);
            let Some(next_ref) = (unsafe { next.as_ref() }) else {
                self.node = ptr::null();
                return;
            };
            let v = next_ref.val.load(Acquire, &self.guard);
            if let Some(v_ref) = unsafe { v.as_ref() } {
                self.node = next.as_raw();
                self.cached = Some((next_ref.key, v_ref.clone()));
                return;
            }
            // Deleted node or marker: step over it.
            current = next.as_raw();
        }
    }
}

impl<K: Key, V: Clone + Send + Sync + 'static> Iterator for Iter<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.cached.take()?;
        self.advance();
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

/// Iterator over a [`SkipMap`]'s keys.
pub struct Keys<'a, K, V>(Iter<'a, K, V>);

impl<K: Key, V: Clone + Send + Sync + 'static> Iterator for Keys<'_, K, V> {
    type Item = K;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|entry| entry.0)
    }
}

/// Iterator over a [`SkipMap`]'s values.
pub struct Values<'a, K, V>(Iter<'a, K, V>);

impl<K: Key, V: Clone + Send + Sync + 'static> Iterator for Values<'_, K, V> {
    type Item = V;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next().map(|entry| entry.1)
    }
}

/// A weakly consistent forward iterator over a bounded key range.
pub struct Range<'a, K, V> {
    map: &'a SkipMap<K, V>,
    guard: Guard,
    node: *const Node<K, V>,
    cached: Option<(K, V)>,
    max: Bound<K>,
}

impl<K: Key, V: Clone + Send + Sync + 'static> Range<'_, K, V> {
    fn prime(&mut self, min: Bound<K>) {
        loop {
            let n = match min {
                Bound::Unbounded => self.map.find_first(&self.guard),
                Bound::Included(k) => self.map.find_near(&k, EQ, &self.guard),
                Bound::Excluded(k) => self.map.find_near(&k, GT, &self.guard),
            };
            let Some(n_ref) = (unsafe { n.as_ref() }) else {
                return;
            };
            if !self.within_max(&n_ref.key) {
                return;
            }
            let v = n_ref.val.load(Acquire, &self.guard);
            if let Some(v_ref) = unsafe { v.as_ref() } {
                self.node = n.as_raw();
                self.cached = Some((n_ref.key, v_ref.clone()));
                return;
            }
        }
    }

    fn within_max(&self, key: &K) -> bool {
        match &self.max {
            Bound::Unbounded => true,
            Bound::Included(hi) => self.map.cpr(key, hi) != cmp::Ordering::Greater,
            Bound::Excluded(hi) => self.map.cpr(key, hi) == cmp::Ordering::Less,
        }
    }

    fn advance(&mut self) {
        let mut current = self.node;
        loop {
            if current.is_null() {
                return;
            }
            let next = unsafe { &*current }.next.load(Acquire, &self.guard);
            let Some(next_ref) = (unsafe { next.as_ref() }) else {
                self.node = ptr::null();
                return;
            };
            if !next_ref.is_sentinel() && !self.within_max(&next_ref.key) {
                self.node = ptr::null();
                return;
            }
            let v = next_ref.val.load(Acquire, &self.guard);
            if let Some(v_ref) = unsafe { v.as_ref() } {
                self.node = next.as_raw();
                self.cached = Some((next_ref.key, v_ref.clone()));
                return;
            }
            current = next.as_raw();
        }
    }
}

impl<K: Key, V: Clone + Send + Sync + 'static> Iterator for Range<'_, K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.cached.take()?;
        self.advance();
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, None)
    }
}

/// An owning iterator that drains the map front to back.
pub struct IntoIter<K, V> {
    map: SkipMap<K, V>,
}

impl<K: Key, V: Clone + Send + Sync + 'static> Iterator for IntoIter<K, V> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        self.map.pop_first()
    }
}

// ///////////////////////////////////////////////
// Trait implementations
// ///////////////////////////////////////////////

impl<K: Key, V> Default for SkipMap<K, V> {
    fn default() -> Self {
        SkipMap::new()
    }
}

impl<K, V> Drop for SkipMap<K, V> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` means no thread holds a guard into this map,
        // so every reachable node and index can be freed eagerly.  Nodes
        // already unlinked are owned by their pending deferred destructors
        // and are deliberately not touched here.
        unsafe {
            let guard = epoch::unprotected();
            let mut level = self.head.load(Relaxed, guard);
            let mut base: Shared<'_, Node<K, V>> = Shared::null();
            while let Some(level_ref) = level.as_ref() {
                let mut r = level_ref.right.load(Relaxed, guard);
                while let Some(r_ref) = r.as_ref() {
                    let next = r_ref.right.load(Relaxed, guard);
                    drop(r.into_owned());
                    r = next;
                }
                let down = level_ref.down.load(Relaxed, guard);
                if down.is_null() {
                    base = level_ref.node.load(Relaxed, guard);
                }
                drop(level.into_owned());
                level = down;
            }
            let mut n = base;
            while let Some(n_ref) = n.as_ref() {
                let next = n_ref.next.load(Relaxed, guard);
                let v = n_ref.val.load(Relaxed, guard);
                if !v.is_null() {
                    drop(v.into_owned());
                }
                drop(n.into_owned());
                n = next;
            }
        }
    }
}

/// Equality compares contents only: same keys mapping to equal values.
///
/// When both maps observe the same order the entry streams are merged in a
/// single parallel pass; otherwise every key is looked up in the other map,
/// in both directions.
impl<K: Key, V: Clone + PartialEq + Send + Sync + 'static> PartialEq for SkipMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.same_order(other) {
            let mut a = self.iter();
            let mut b = other.iter();
            loop {
                match (a.next(), b.next()) {
                    (None, None) => return true,
                    (Some(x), Some(y)) if self.cpr(&x.0, &y.0) == cmp::Ordering::Equal && x.1 == y.1 => {}
                    _ => return false,
                }
            }
        } else {
            self.iter()
                .all(|(k, v)| other.get(k).is_some_and(|w| w == v))
                && other
                    .iter()
                    .all(|(k, v)| self.get(k).is_some_and(|w| w == v))
        }
    }
}

impl<K: Key, V: Clone + Eq + Send + Sync + 'static> Eq for SkipMap<K, V> {}

impl<K: Key, V: Clone + Send + Sync + 'static> Extend<(K, V)> for SkipMap<K, V> {
    #[inline]
    fn extend<I: iter::IntoIterator<Item = (K, V)>>(&mut self, iterable: I) {
        for (key, value) in iterable {
            self.insert(key, value);
        }
    }
}

impl<K: Key, V: Clone + Send + Sync + 'static> iter::FromIterator<(K, V)> for SkipMap<K, V> {
    #[inline]
    fn from_iter<I>(iterable: I) -> SkipMap<K, V>
    where
        I: iter::IntoIterator<Item = (K, V)>,
    {
        let mut map = SkipMap::new();
        map.extend(iterable);
        map
    }
}

impl<K: Key, V: Clone + Send + Sync + 'static> iter::IntoIterator for SkipMap<K, V> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter { map: self }
    }
}

impl<'a, K: Key, V: Clone + Send + Sync + 'static> iter::IntoIterator for &'a SkipMap<K, V> {
    type Item = (K, V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<K, V> fmt::Debug for SkipMap<K, V>
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

impl<K, V> fmt::Display for SkipMap<K, V>
where
    K: Key + fmt::Display,
    V: Clone + Send + Sync + 'static + fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[")?;
        for (i, (k, v)) in self.iter().enumerate() {
            if i != 0 {
                write!(f, ", ")?;
            }
            write!(f, "({}, {})", k, v)?;
        }
        write!(f, "]")
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Tests
// ////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::ops::Bound::{Excluded, Included, Unbounded};
    use std::thread;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::SkipMap;

    /// Iterating must always yield strictly ascending keys; used after
    /// concurrent churn to assert the order invariant.
    fn assert_strictly_ascending(map: &SkipMap<i64, i64>) {
        let keys: Vec<_> = map.keys().collect();
        for pair in keys.windows(2) {
            assert!(pair[0] < pair[1], "keys out of order: {:?}", pair);
        }
    }

    #[test]
    fn basic_small() {
        let map: SkipMap<i64, i64> = SkipMap::new();
        assert!(map.remove(1).is_none());
        assert!(map.insert(1, 0).is_none());
        assert_eq!(map.insert(1, 5), Some(0));
        assert_eq!(map.remove(1), Some(5));
        assert!(map.insert(1, 10).is_none());
        assert!(map.insert(2, 20).is_none());
        assert_eq!(map.remove(1), Some(10));
        assert_eq!(map.remove(2), Some(20));
        assert!(map.remove(1).is_none());
        assert!(map.is_empty());
    }

    #[test]
    fn basic_large() {
        let size = 10_000i64;
        let map = SkipMap::new();
        assert!(map.is_empty());

        for i in 0..size {
            map.insert(i, i * 10);
            assert_eq!(map.len() as i64, i + 1);
        }
        assert_strictly_ascending(&map);

        for i in 0..size {
            assert_eq!(map.remove(i), Some(i * 10));
            assert_eq!(map.len() as i64, size - i - 1);
        }
        assert!(map.is_empty());
    }

    #[test]
    fn insert_existing() {
        let map = SkipMap::new();
        for i in 0..100i64 {
            assert!(map.insert(i, format!("{}", i)).is_none());
        }
        for i in 0..100i64 {
            assert_eq!(map.insert(i, format!("{}", i)), Some(format!("{}", i)));
        }
        assert_eq!(map.len(), 100);
    }

    #[test]
    fn insert_if_absent_keeps_first() {
        let map = SkipMap::new();
        assert_eq!(map.insert_if_absent(1, "first"), None);
        assert_eq!(map.insert_if_absent(1, "second"), Some("first"));
        assert_eq!(map.get(1), Some("first"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn get_and_contains() {
        let map: SkipMap<i64, i64> = (25..75).map(|x| (x, x)).collect();
        for i in 0..100 {
            if (25..75).contains(&i) {
                assert!(map.contains_key(i));
                assert_eq!(map.get(i), Some(i));
            } else {
                assert!(!map.contains_key(i));
                assert_eq!(map.get(i), None);
            }
        }
    }

    #[test]
    fn remove_absent_is_idempotent() {
        let map: SkipMap<i64, i64> = (0..10).map(|x| (x, x)).collect();
        assert_eq!(map.remove(42), None);
        assert_eq!(map.len(), 10);
        assert_eq!(map.remove(5), Some(5));
        assert_eq!(map.remove(5), None);
        assert_eq!(map.len(), 9);
    }

    #[test]
    fn replace_only_if_present() {
        let map = SkipMap::new();
        assert_eq!(map.replace(1, 10), None);
        assert!(!map.contains_key(1));
        map.insert(1, 1);
        assert_eq!(map.replace(1, 10), Some(1));
        assert_eq!(map.get(1), Some(10));
    }

    #[test]
    fn conditional_replace_and_remove() {
        let map = SkipMap::new();
        map.insert(1, 1);
        assert!(!map.replace_if_eq(1, &2, 20));
        assert!(map.replace_if_eq(1, &1, 10));
        assert_eq!(map.get(1), Some(10));
        assert!(!map.remove_if_eq(1, &1));
        assert!(map.remove_if_eq(1, &10));
        assert!(map.is_empty());
    }

    #[test]
    fn compute_if_absent() {
        let map: SkipMap<i64, i64> = SkipMap::new();
        assert_eq!(map.compute_if_absent(1, |k| Some(k * 100)), Some(100));
        // Present: the closure must not override the existing value.
        assert_eq!(map.compute_if_absent(1, |_| Some(0)), Some(100));
        assert_eq!(map.compute_if_absent(2, |_| None), None);
        assert!(!map.contains_key(2));
    }

    #[test]
    fn merge_inserts_updates_and_removes() {
        let map: SkipMap<i64, i64> = SkipMap::new();
        assert_eq!(map.merge(1, 5, |old, new| Some(old + new)), Some(5));
        assert_eq!(map.merge(1, 5, |old, new| Some(old + new)), Some(10));
        assert_eq!(map.merge(1, 0, |_, _| None), None);
        assert!(!map.contains_key(1));
        assert_eq!(map.len(), 0);
    }

    #[rstest]
    #[case::floor_between(4, Some(3))]
    #[case::floor_exact(5, Some(5))]
    #[case::floor_below_all(0, None)]
    fn floor_key(#[case] probe: i64, #[case] expected: Option<i64>) {
        let map: SkipMap<i64, ()> = [1, 3, 5, 7].into_iter().map(|k| (k, ())).collect();
        assert_eq!(map.floor_key(probe), expected);
    }

    #[rstest]
    #[case::ceiling_between(4, Some(5))]
    #[case::ceiling_exact(5, Some(5))]
    #[case::ceiling_above_all(8, None)]
    fn ceiling_key(#[case] probe: i64, #[case] expected: Option<i64>) {
        let map: SkipMap<i64, ()> = [1, 3, 5, 7].into_iter().map(|k| (k, ())).collect();
        assert_eq!(map.ceiling_key(probe), expected);
    }

    #[rstest]
    #[case::lower_exact(5, Some(3))]
    #[case::lower_of_first(1, None)]
    #[case::higher_like(8, Some(7))]
    fn lower_key(#[case] probe: i64, #[case] expected: Option<i64>) {
        let map: SkipMap<i64, ()> = [1, 3, 5, 7].into_iter().map(|k| (k, ())).collect();
        assert_eq!(map.lower_key(probe), expected);
    }

    #[rstest]
    #[case::higher_exact(5, Some(7))]
    #[case::higher_between(4, Some(5))]
    #[case::higher_of_last(7, None)]
    fn higher_key(#[case] probe: i64, #[case] expected: Option<i64>) {
        let map: SkipMap<i64, ()> = [1, 3, 5, 7].into_iter().map(|k| (k, ())).collect();
        assert_eq!(map.higher_key(probe), expected);
    }

    #[test]
    fn near_entries_carry_values() {
        let map: SkipMap<i64, &str> = [(1, "a"), (3, "b"), (5, "c")].into_iter().collect();
        assert_eq!(map.lower_entry(3), Some((1, "a")));
        assert_eq!(map.floor_entry(4), Some((3, "b")));
        assert_eq!(map.ceiling_entry(4), Some((5, "c")));
        assert_eq!(map.higher_entry(3), Some((5, "c")));
        assert_eq!(map.higher_entry(5), None);
    }

    #[test]
    fn first_and_last() {
        let map: SkipMap<i64, i64> = (1..=5).map(|x| (x, x * 2)).collect();
        assert_eq!(map.first_key(), 1);
        assert_eq!(map.last_key(), 5);
        assert_eq!(map.first_entry(), Some((1, 2)));
        assert_eq!(map.last_entry(), Some((5, 10)));
    }

    #[test]
    fn first_and_last_entry_on_empty() {
        let map: SkipMap<i64, i64> = SkipMap::new();
        assert_eq!(map.first_entry(), None);
        assert_eq!(map.last_entry(), None);
    }

    #[test]
    #[should_panic(expected = "first_key called on an empty map")]
    fn first_key_panics_on_empty() {
        let map: SkipMap<i64, i64> = SkipMap::new();
        let _ = map.first_key();
    }

    #[test]
    #[should_panic(expected = "last_key called on an empty map")]
    fn last_key_panics_on_empty() {
        let map: SkipMap<i64, i64> = SkipMap::new();
        let _ = map.last_key();
    }

    #[test]
    #[should_panic(expected = "key is the reserved sentinel value")]
    fn sentinel_key_is_rejected() {
        let map: SkipMap<i64, i64> = SkipMap::new();
        map.insert(i64::MIN, 0);
    }

    #[test]
    #[should_panic(expected = "key is the reserved sentinel value")]
    fn sentinel_key_is_rejected_on_get() {
        let map: SkipMap<i64, i64> = SkipMap::new();
        let _ = map.get(i64::MIN);
    }

    #[test]
    fn pop_front_and_back() {
        let map: SkipMap<i64, i64> = (0..100).map(|x| (x, 2 * x)).collect();
        for i in 0..50 {
            assert_eq!(map.pop_first(), Some((i, 2 * i)));
        }
        for i in (50..100).rev() {
            assert_eq!(map.pop_last(), Some((i, 2 * i)));
        }
        assert_eq!(map.pop_first(), None);
        assert_eq!(map.pop_last(), None);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn clear() {
        let map: SkipMap<i64, i64> = (0..1000).map(|x| (x, x)).collect();
        assert_eq!(map.len(), 1000);
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
        // The map stays usable after clearing.
        map.insert(1, 1);
        assert_eq!(map.get(1), Some(1));
    }

    #[test]
    fn iter() {
        let size = 10_000i64;
        let map: SkipMap<i64, i64> = (0..size).map(|x| (x, x)).collect();
        let mut expected = 0;
        for (k, v) in map.iter() {
            assert_eq!(k, expected);
            assert_eq!(v, expected);
            expected += 1;
        }
        assert_eq!(expected, size);
    }

    #[test]
    fn iter_key_val() {
        let map: SkipMap<i64, i64> = (0..100).map(|x| (x, 2 * x)).collect();
        assert_eq!(map.keys().collect::<Vec<_>>(), (0..100).collect::<Vec<_>>());
        assert_eq!(
            map.values().collect::<Vec<_>>(),
            (0..100).map(|x| 2 * x).collect::<Vec<_>>()
        );
    }

    #[test]
    fn iter_tolerates_concurrent_removal() {
        let map: SkipMap<i64, i64> = (0..10).map(|x| (x, x)).collect();
        let mut iter = map.iter();
        assert_eq!(iter.next(), Some((0, 0)));
        // Remove an element the iterator has not reached yet.
        map.remove(5);
        let rest: Vec<_> = iter.map(|(k, _)| k).collect();
        assert_eq!(rest, vec![1, 2, 3, 4, 6, 7, 8, 9]);
    }

    #[test]
    fn into_iter_drains() {
        let map: SkipMap<i64, i64> = (0..10).map(|x| (x, x)).collect();
        let drained: Vec<_> = map.into_iter().collect();
        assert_eq!(drained, (0..10).map(|x| (x, x)).collect::<Vec<_>>());
    }

    #[test]
    fn range_bounds() {
        let map: SkipMap<i64, i64> = (0..10).map(|x| (x, x)).collect();
        let grab = |min, max| -> Vec<i64> { map.range(min, max).map(|(k, _)| k).collect() };
        assert_eq!(grab(Unbounded, Unbounded), (0..10).collect::<Vec<_>>());
        assert_eq!(grab(Included(3), Included(6)), vec![3, 4, 5, 6]);
        assert_eq!(grab(Excluded(3), Included(6)), vec![4, 5, 6]);
        assert_eq!(grab(Included(3), Excluded(6)), vec![3, 4, 5]);
        assert_eq!(grab(Excluded(3), Excluded(6)), vec![4, 5]);
        assert_eq!(grab(Included(8), Unbounded), vec![8, 9]);
        assert_eq!(grab(Unbounded, Excluded(2)), vec![0, 1]);
    }

    #[test]
    #[should_panic(expected = "inverted range bounds")]
    fn range_rejects_inverted_bounds() {
        let map: SkipMap<i64, i64> = (0..10).map(|x| (x, x)).collect();
        let _ = map.range(Included(6), Included(3));
    }

    #[test]
    fn for_each_visits_in_order() {
        let map: SkipMap<i64, i64> = (0..50).map(|x| (x, x + 1)).collect();
        let mut seen = Vec::new();
        map.for_each(|k, v| seen.push((k, *v)));
        assert_eq!(seen, (0..50).map(|x| (x, x + 1)).collect::<Vec<_>>());
    }

    #[test]
    fn replace_all() {
        let map: SkipMap<i64, i64> = (0..50).map(|x| (x, x)).collect();
        map.replace_all(|k, v| k + v);
        for i in 0..50 {
            assert_eq!(map.get(i), Some(2 * i));
        }
    }

    #[test]
    fn contains_value() {
        let map: SkipMap<i64, String> = (0..10).map(|x| (x, format!("v{}", x))).collect();
        assert!(map.contains_value(&"v7".to_string()));
        assert!(!map.contains_value(&"v10".to_string()));
    }

    #[test]
    fn custom_comparator_orders_descending() {
        let map = SkipMap::with_comparator(|a: &i64, b: &i64| b.cmp(a));
        for i in 0..10 {
            map.insert(i, i);
        }
        assert_eq!(map.first_key(), 9);
        assert_eq!(map.last_key(), 0);
        assert_eq!(map.keys().collect::<Vec<_>>(), (0..10).rev().collect::<Vec<_>>());
        // "lower" is relative to the map's own order, so it looks upward.
        assert_eq!(map.lower_key(5), Some(6));
        assert_eq!(map.higher_key(5), Some(4));
    }

    #[test]
    fn equality() {
        let a: SkipMap<i64, i64> = (0..100).map(|x| (x, x)).collect();
        let b: SkipMap<i64, i64> = (0..100).map(|x| (x, x)).collect();
        let c: SkipMap<i64, i64> = (0..10).map(|x| (x, x)).collect();
        let d: SkipMap<i64, i64> = (0..100).map(|x| (x, x + 1)).collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
    }

    #[test]
    fn equality_across_comparators_uses_lookups() {
        let natural: SkipMap<i64, i64> = (0..50).map(|x| (x, x)).collect();
        let reversed = SkipMap::with_comparator(|a: &i64, b: &i64| b.cmp(a));
        for i in 0..50 {
            reversed.insert(i, i);
        }
        assert_eq!(natural, reversed);
        reversed.insert(50, 50);
        assert_ne!(natural, reversed);
    }

    #[test]
    fn debug_display() {
        let map: SkipMap<i64, i64> = (1..=3).map(|x| (x, 10 * x)).collect();
        insta::assert_snapshot!(format!("{:?}", map), @"[(1, 10), (2, 20), (3, 30)]");
        insta::assert_snapshot!(format!("{}", map), @"[(1, 10), (2, 20), (3, 30)]");
    }

    #[test]
    fn extend_and_from_iterator() {
        let mut map: SkipMap<i64, i64> = (0..5).map(|x| (x, x)).collect();
        map.extend((5..10).map(|x| (x, x)));
        assert_eq!(map.len(), 10);
        assert_eq!(map.keys().collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
    }

    // ///////////////////////////////////////////
    // Concurrency
    // ///////////////////////////////////////////

    #[test]
    fn concurrent_disjoint_inserts() {
        let map: SkipMap<i64, i64> = SkipMap::new();
        let threads = 8i64;
        let per_thread = 1_000i64;
        thread::scope(|scope| {
            for t in 0..threads {
                let map = &map;
                scope.spawn(move || {
                    for i in 0..per_thread {
                        let key = t * per_thread + i;
                        assert!(map.insert(key, key * 10).is_none());
                    }
                });
            }
        });
        assert_eq!(map.len() as i64, threads * per_thread);
        assert_strictly_ascending(&map);
        for key in 0..threads * per_thread {
            assert_eq!(map.get(key), Some(key * 10));
        }
    }

    #[test]
    fn concurrent_insert_and_remove_converges() {
        let map: SkipMap<i64, i64> = (0..2_000).map(|x| (x, x)).collect();
        thread::scope(|scope| {
            let map = &map;
            // Removers take the even keys while inserters add new ones above.
            scope.spawn(move || {
                for i in (0..2_000).step_by(2) {
                    map.remove(i);
                }
            });
            scope.spawn(move || {
                for i in 2_000..3_000 {
                    map.insert(i, i);
                }
            });
            scope.spawn(move || {
                for i in (0..2_000).step_by(2) {
                    let _ = map.get(i);
                }
            });
        });
        assert_strictly_ascending(&map);
        // Once quiesced, the striped counter agrees with an exact count.
        assert_eq!(map.len(), map.iter().count());
        assert_eq!(map.len(), 2_000);
    }

    #[test]
    fn concurrent_same_key_remove_removes_once() {
        for _ in 0..50 {
            let map: SkipMap<i64, i64> = (0..10).map(|x| (x, x)).collect();
            let removed: Vec<bool> = thread::scope(|scope| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        let map = &map;
                        scope.spawn(move || map.remove(5).is_some())
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });
            // Exactly one thread observes the removal.
            assert_eq!(removed.iter().filter(|&&r| r).count(), 1);
            assert_eq!(map.len(), 9);
        }
    }

    #[test]
    fn racing_conditional_replace_has_one_winner() {
        for _ in 0..50 {
            let map: SkipMap<i64, i64> = SkipMap::new();
            map.insert(1, 0);
            let outcomes: Vec<bool> = thread::scope(|scope| {
                let handles: Vec<_> = [10i64, 20i64]
                    .into_iter()
                    .map(|new| {
                        let map = &map;
                        scope.spawn(move || map.replace_if_eq(1, &0, new))
                    })
                    .collect();
                handles.into_iter().map(|h| h.join().unwrap()).collect()
            });
            assert_eq!(outcomes.iter().filter(|&&won| won).count(), 1);
            let value = map.get(1).unwrap();
            assert!(value == 10 || value == 20);
        }
    }

    #[test]
    fn concurrent_pop_first_yields_unique_entries() {
        let map: SkipMap<i64, i64> = (0..1_000).map(|x| (x, x)).collect();
        let mut popped: Vec<i64> = thread::scope(|scope| {
            let handles: Vec<_> = (0..4)
                .map(|_| {
                    let map = &map;
                    scope.spawn(move || {
                        let mut mine = Vec::new();
                        while let Some((k, _)) = map.pop_first() {
                            mine.push(k);
                        }
                        mine
                    })
                })
                .collect();
            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect()
        });
        popped.sort_unstable();
        assert_eq!(popped, (0..1_000).collect::<Vec<_>>());
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn put_then_get_is_visible_on_same_thread() {
        let map: SkipMap<i64, i64> = SkipMap::new();
        thread::scope(|scope| {
            for t in 0..4 {
                let map = &map;
                scope.spawn(move || {
                    for i in 0..500 {
                        let key = i * 4 + t;
                        map.insert(key, key);
                        assert_eq!(map.get(key), Some(key));
                    }
                });
            }
        });
    }
}
