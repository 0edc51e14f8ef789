//! The two building blocks of the map: base-chain nodes and index nodes.
//!
//! The base chain is a singly linked list of [`Node`]s in ascending key order
//! and is the ground truth of the map's contents.  Above it sits a
//! probabilistic tower of [`Index`] nodes, each level a sparser linked list
//! referencing a subset of the base nodes, which gives searches their
//! expected `O(log n)` cost.
//!
//! Three pointer fields are ever mutated, and each only by CAS: a node's
//! `next`, an index's `right`, and the map's `head`.  A node's value slot is
//! likewise CAS-only; a null value marks the node as logically deleted.
//! Header and marker nodes carry the key type's reserved sentinel, which is
//! why the sentinel can never be a user key.

use crossbeam_epoch::{Atomic, Owned, Shared};

use crate::key::Key;

// ////////////////////////////////////////////////////////////////////////////
// Node
// ////////////////////////////////////////////////////////////////////////////

/// One entry of the base chain.
///
/// A `Node` is one of three things, distinguishable in context:
///
/// - a live entry: non-sentinel key, non-null `val`;
/// - a logically deleted entry: non-sentinel key, null `val`, awaiting
///   physical unlinking;
/// - the base header or a deletion marker: sentinel key, permanently null
///   `val`.  A marker is spliced in directly after a deleted node so that
///   no new node can be appended to it mid-unlink; the header is the single
///   node every traversal starts from and is never deleted.
pub(crate) struct Node<K, V> {
    /// Immutable for the lifetime of the node.
    pub(crate) key: K,
    /// Null once the node has been logically deleted.
    pub(crate) val: Atomic<V>,
    pub(crate) next: Atomic<Node<K, V>>,
}

impl<K: Key, V> Node<K, V> {
    pub(crate) fn new<'g>(key: K, value: V, next: Shared<'g, Node<K, V>>) -> Self {
        Node {
            key,
            val: Atomic::new(value),
            next: Atomic::from(next),
        }
    }

    /// The base header: sentinel key, no value, start of the chain.
    pub(crate) fn header() -> Self {
        Node {
            key: K::SENTINEL,
            val: Atomic::null(),
            next: Atomic::null(),
        }
    }

    /// A deletion marker pointing at the deleted node's successor.
    pub(crate) fn marker<'g>(next: Shared<'g, Node<K, V>>) -> Self {
        Node {
            key: K::SENTINEL,
            val: Atomic::null(),
            next: Atomic::from(next),
        }
    }

    /// Whether this node is a header or marker rather than an entry.
    ///
    /// When seen as a *successor* during a base-chain walk this always means
    /// a marker, since the header has no predecessor.
    pub(crate) fn is_sentinel(&self) -> bool {
        self.key.is_sentinel()
    }

    /// Recover the value out of a node that was never published.
    ///
    /// Used when a link CAS loses a race: the freshly allocated node is handed
    /// back by the CAS and its value must be retrieved for the retry.
    pub(crate) fn take_value(node: &mut Owned<Node<K, V>>) -> V {
        let val = std::mem::replace(&mut node.val, Atomic::null());
        // SAFETY: the node was never shared, so the value slot is exclusively
        // owned and non-null (only `Node::new` paths call this).
        unsafe { *val.into_owned().into_box() }
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Index
// ////////////////////////////////////////////////////////////////////////////

/// One entry of the index tower.
///
/// `node` and `down` never change after construction; only `right` is
/// CAS-updated, either to splice a new index in or to unlink a stale one
/// (one whose node has been deleted).
pub(crate) struct Index<K, V> {
    /// The base node this index entry leads to.  Immutable.
    pub(crate) node: Atomic<Node<K, V>>,
    /// The index entry one level below, or null on the lowest index level.
    /// Immutable.
    pub(crate) down: Atomic<Index<K, V>>,
    pub(crate) right: Atomic<Index<K, V>>,
}

impl<K: Key, V> Index<K, V> {
    pub(crate) fn new<'g>(
        node: Shared<'g, Node<K, V>>,
        down: Shared<'g, Index<K, V>>,
        right: Shared<'g, Index<K, V>>,
    ) -> Self {
        Index {
            node: Atomic::from(node),
            down: Atomic::from(down),
            right: Atomic::from(right),
        }
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Tests
// ////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use crossbeam_epoch::{Owned, Shared};
    use pretty_assertions::assert_eq;

    use super::Node;

    #[test]
    fn header_and_marker_are_sentinels() {
        let header: Node<i64, ()> = Node::header();
        assert!(header.is_sentinel());
        let marker: Node<i64, ()> = Node::marker(Shared::null());
        assert!(marker.is_sentinel());
    }

    #[test]
    fn entry_is_not_sentinel() {
        let mut node: Owned<Node<i64, &str>> = Owned::new(Node::new(7, "seven", Shared::null()));
        assert!(!node.is_sentinel());
        assert_eq!(node.key, 7);
        // The value slot is not owned by the node; drain it before dropping.
        let _ = Node::take_value(&mut node);
    }

    #[test]
    fn take_value_recovers_the_value() {
        let mut node = Owned::new(Node::new(7i64, String::from("seven"), Shared::null()));
        assert_eq!(Node::take_value(&mut node), "seven");
    }
}
