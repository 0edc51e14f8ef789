//! Skiplists use a probabilistic distribution of nodes over the internal
//! levels, whereby the lowest level (the base chain) contains all the nodes,
//! and each index level above it indexes a random subset of the nodes below.
//!
//! Most commonly, a geometric distribution is used whereby the chance that a
//! node occupies level $n$ is $p$ times the chance of occupying level $n-1$
//! (with $0 < p < 1$).
//!
//! It is very unlikely that this will need to be changed as the default should
//! suffice, but if need be custom level generators can be implemented.

use std::cell::RefCell;

use rand::prelude::*;
use thiserror::Error;

/// The tallest index tower the map will ever build.
///
/// The bound matters only for the tail of the distribution; any value large
/// enough that it is never reached in practice preserves the expected
/// `O(log n)` search cost.
pub const MAX_LEVELS: usize = 62;

thread_local! {
    /// Per-thread generator, so that concurrent inserters never contend on
    /// shared RNG state.
    static RNG: RefCell<SmallRng> = RefCell::new(SmallRng::from_rng(&mut rand::rng()));
}

// ////////////////////////////////////////////////////////////////////////////
// Level Generator
// ////////////////////////////////////////////////////////////////////////////

/// Upon the insertion of a new node in the list, the node is replicated to
/// high levels with a certain probability as determined by a
/// [`LevelGenerator`].
///
/// A result of `0` means the node gets no index entries at all; a result of
/// `n > 0` asks for an index tower `n` levels tall.  Generators are shared
/// between concurrent inserters and must therefore work through `&self`.
pub trait LevelGenerator: Send + Sync {
    /// The total number of levels that are assumed to exist.
    #[must_use]
    fn total(&self) -> usize;

    /// Generate a random tower height for a new node in the range
    /// `[0, total]`.
    #[must_use]
    fn random(&self) -> usize;
}

/// A level generator using a geometric distribution.
///
/// With a geometric distribution, the probability that a node carries a tower
/// of at least $n$ levels is $p^n$ (with $0 < p < 1$).  The distribution is
/// truncated at the maximum number of levels allowed.
#[derive(Debug)]
pub struct Geometric {
    /// The total number of levels that are assumed to exist.
    total: usize,
    /// The probability that a node is present in the next level.
    p: f64,
}

impl Geometric {
    /// Create a new geometric level generator with `total` number of levels,
    /// and `p` as the probability that a given node is present in the next
    /// level.
    ///
    /// # Errors
    ///
    /// `p` must be strictly between 0 and 1, and `total` must be at least 1.
    pub fn new(total: usize, p: f64) -> Result<Self, GeometricNewError> {
        if total == 0 {
            return Err(GeometricNewError::ZeroTotal);
        }
        if !(0.0 < p && p < 1.0) {
            return Err(GeometricNewError::InvalidProbability);
        }
        Ok(Geometric { total, p })
    }
}

impl Default for Geometric {
    /// The distribution used unless a caller supplies its own generator:
    /// one insert in four gets any tower at all, and each further level is
    /// again a factor of four rarer.
    fn default() -> Self {
        Geometric {
            total: MAX_LEVELS,
            p: 0.25,
        }
    }
}

/// Errors that can occur when creating a [`Geometric`] level generator.
#[derive(Error, Debug)]
pub enum GeometricNewError {
    /// The maximum number of levels must be non-zero.
    #[error("total must be non-zero.")]
    ZeroTotal,
    /// The probability $p$ must be in the range $(0, 1)$.
    #[error("p must be in (0, 1).")]
    InvalidProbability,
}

impl LevelGenerator for Geometric {
    fn random(&self) -> usize {
        RNG.with(|rng| {
            let mut rng = rng.borrow_mut();
            let mut h = 0;
            let mut x = self.p;
            let f = 1.0 - rng.random::<f64>();
            while x > f && h < self.total {
                h += 1;
                x *= self.p;
            }
            h
        })
    }

    fn total(&self) -> usize {
        self.total
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Tests
// ////////////////////////////////////////////////////////////////////////////
