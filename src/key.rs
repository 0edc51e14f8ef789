//! The key contract for [`SkipMap`][crate::SkipMap].
//!
//! Keys are fixed-width, cheaply copyable and totally ordered, and every key
//! type reserves a single *sentinel* value that the map uses internally for
//! its header and deletion-marker nodes.  The sentinel is therefore not a
//! valid user key: every key-accepting map operation panics when given it.
//!
//! For the signed integers the sentinel is the minimum representable value,
//! for the unsigned integers it is the maximum, and for [`TotalF64`] it is
//! NaN (total-order comparison makes every non-NaN float a valid key).

use std::cmp::Ordering;

// ////////////////////////////////////////////////////////////////////////////
// Key
// ////////////////////////////////////////////////////////////////////////////

/// A fixed-width, totally ordered key with a reserved sentinel value.
///
/// The sentinel never reaches the comparator: the map detects it with
/// [`is_sentinel`][Key::is_sentinel] before any comparison, so header and
/// marker nodes cannot corrupt the ordering even under a caller-supplied
/// comparator.
pub trait Key: Copy + Send + Sync + 'static {
    /// The reserved sentinel value.  Never a valid user key.
    const SENTINEL: Self;

    /// Natural ascending order over the key type.
    #[must_use]
    fn compare(&self, other: &Self) -> Ordering;

    /// Whether this key is the reserved sentinel.
    ///
    /// This is an identity test, independent of any comparator.
    #[must_use]
    fn is_sentinel(&self) -> bool;
}

macro_rules! signed_key {
    ($($t:ty),*) => {$(
        impl Key for $t {
            const SENTINEL: Self = <$t>::MIN;

            #[inline]
            fn compare(&self, other: &Self) -> Ordering {
                Ord::cmp(self, other)
            }

            #[inline]
            fn is_sentinel(&self) -> bool {
                *self == <$t>::MIN
            }
        }
    )*};
}

macro_rules! unsigned_key {
    ($($t:ty),*) => {$(
        impl Key for $t {
            const SENTINEL: Self = <$t>::MAX;

            #[inline]
            fn compare(&self, other: &Self) -> Ordering {
                Ord::cmp(self, other)
            }

            #[inline]
            fn is_sentinel(&self) -> bool {
                *self == <$t>::MAX
            }
        }
    )*};
}

signed_key!(i8, i16, i32, i64, i128, isize);
unsigned_key!(u8, u16, u32, u64, u128, usize);

// ////////////////////////////////////////////////////////////////////////////
// TotalF64
// ////////////////////////////////////////////////////////////////////////////

/// An `f64` key ordered by [`f64::total_cmp`].
///
/// NaN is the reserved sentinel, so no NaN is a valid key; every other
/// float, including the infinities and both zero signs, is.
///
/// # Examples
///
/// ```
/// use skipmap::{SkipMap, TotalF64};
///
/// let map = SkipMap::new();
/// map.insert(TotalF64::new(1.5), "low");
/// map.insert(TotalF64::new(2.5), "high");
/// assert_eq!(map.ceiling_key(TotalF64::new(2.0)), Some(TotalF64::new(2.5)));
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TotalF64(f64);

impl TotalF64 {
    /// Wrap a float for use as a map key.
    ///
    /// # Panics
    ///
    /// Panics if `value` is NaN.
    #[must_use]
    pub fn new(value: f64) -> Self {
        assert!(!value.is_nan(), "NaN is not a valid key");
        TotalF64(value)
    }

    /// The wrapped float.
    #[must_use]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Key for TotalF64 {
    const SENTINEL: Self = TotalF64(f64::NAN);

    #[inline]
    fn compare(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }

    #[inline]
    fn is_sentinel(&self) -> bool {
        self.0.is_nan()
    }
}

impl std::fmt::Display for TotalF64 {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Tests
// ////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;

    use pretty_assertions::assert_eq;

    use super::{Key, TotalF64};

    #[test]
    fn integer_sentinels() {
        assert!(i64::MIN.is_sentinel());
        assert!(!0i64.is_sentinel());
        assert!(u32::MAX.is_sentinel());
        assert!(!0u32.is_sentinel());
        assert_eq!(<i64 as Key>::SENTINEL, i64::MIN);
        assert_eq!(<usize as Key>::SENTINEL, usize::MAX);
    }

    #[test]
    fn integer_order() {
        assert_eq!(1i64.compare(&2), Ordering::Less);
        assert_eq!(2i64.compare(&2), Ordering::Equal);
        assert_eq!(3i64.compare(&2), Ordering::Greater);
    }

    #[test]
    fn float_order_is_total() {
        let a = TotalF64::new(-0.0);
        let b = TotalF64::new(0.0);
        assert_eq!(a.compare(&b), Ordering::Less);
        assert_eq!(
            TotalF64::new(f64::NEG_INFINITY).compare(&TotalF64::new(1.0)),
            Ordering::Less
        );
        assert_eq!(
            TotalF64::new(f64::INFINITY).compare(&TotalF64::new(1.0)),
            Ordering::Greater
        );
    }

    #[test]
    fn float_sentinel_is_nan() {
        assert!(TotalF64::SENTINEL.is_sentinel());
        assert!(!TotalF64::new(0.0).is_sentinel());
    }

    #[test]
    #[should_panic(expected = "NaN is not a valid key")]
    fn float_rejects_nan() {
        let _ = TotalF64::new(f64::NAN);
    }
}
