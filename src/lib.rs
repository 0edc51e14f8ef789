//! A lock-free concurrent sorted map, implemented as a skip list.
//!
//! [`SkipMap`] keeps its entries in ascending key order and supports fully
//! concurrent use: any number of threads may insert, remove, look up and
//! iterate at the same time, through `&self`, without any locking.  Expected
//! cost for the keyed operations is `O(log n)`.
//!
//! The structure is a base chain of nodes holding the entries, with a
//! probabilistic tower of index levels above it providing the search
//! shortcuts:
//!
//! ```text
//! head  --------------------------------> [9] ---------> nil
//! head  ----------------> [5] ----------> [9] ---------> nil
//! head  --> [2] --------> [5] --> [7] --> [9] ---------> nil
//! base  --> [2] --> [4] --> [5] --> [7] --> [9] --> [12]
//! ```
//!
//! All mutation goes through single-word compare-and-swap operations, and
//! memory is reclaimed through [`crossbeam_epoch`]; readers pin an epoch
//! instead of taking a lock, so no operation can block another.
//!
//! Keys are fixed-width primitives implementing [`Key`]; values are shared
//! by cloning, which keeps reads wait-free on the value itself (wrap large
//! values in [`std::sync::Arc`] to make the clone cheap).  Beyond the map
//! operations there are navigation queries (floor, ceiling, lower, higher)
//! and live range and reverse views ([`SubMap`], created with
//! [`SkipMap::sub_map`] and friends).
//!
//! # Examples
//!
//! ```
//! use std::thread;
//!
//! use skipmap::SkipMap;
//!
//! let map = SkipMap::new();
//! thread::scope(|scope| {
//!     for t in 0..4i64 {
//!         let map = &map;
//!         scope.spawn(move || {
//!             for i in 0..100 {
//!                 map.insert(t * 100 + i, t);
//!             }
//!         });
//!     }
//! });
//!
//! assert_eq!(map.len(), 400);
//! assert_eq!(map.first_key(), 0);
//! assert_eq!(map.floor_key(150), Some(150));
//! assert_eq!(map.sub_map(10, true, 13, false).len(), 3);
//! ```

mod counter;
pub mod key;
pub mod level_generator;
mod skipnode;
pub mod skipmap;
pub mod submap;

pub use crate::key::{Key, TotalF64};
pub use crate::level_generator::{Geometric, GeometricNewError, LevelGenerator, MAX_LEVELS};
pub use crate::skipmap::{Comparator, IntoIter, Iter, Keys, Range, SkipMap, Values};
pub use crate::submap::{KeySet, SubIter, SubKeys, SubMap, SubValues};
