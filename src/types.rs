use core::fmt::Debug;

use num::Float;

/// Sentinel for "no node" / "no point reference".
pub(crate) const NIL: u32 = u32::MAX;

/// A point reference vended by the point store.
pub type PointIndex = u32;

/// The component type of stored points. Implemented for `f32` and `f64`;
/// choosing one fixes the precision of a forest at construction.
///
/// Range arithmetic (range sums, separation probabilities, scores) is always
/// carried out in `f64` regardless of the component type, hence the explicit
/// widening conversions here instead of `NumCast` round trips.
pub trait Scalar: Float + Send + Sync + Debug + 'static {
    fn as_f64(self) -> f64;
    fn of_f64(value: f64) -> Self;

    /// The next representable value below `self`, used to keep random cut
    /// values inside the half-open interval `[min, max)`.
    fn next_below(self) -> Self;
}

impl Scalar for f32 {
    fn as_f64(self) -> f64 {
        self as f64
    }

    fn of_f64(value: f64) -> f32 {
        value as f32
    }

    fn next_below(self) -> f32 {
        if self > 0.0 {
            f32::from_bits(self.to_bits() - 1)
        } else if self == 0.0 {
            -f32::from_bits(1)
        } else {
            f32::from_bits(self.to_bits() + 1)
        }
    }
}

impl Scalar for f64 {
    fn as_f64(self) -> f64 {
        self
    }

    fn of_f64(value: f64) -> f64 {
        value
    }

    fn next_below(self) -> f64 {
        if self > 0.0 {
            f64::from_bits(self.to_bits() - 1)
        } else if self == 0.0 {
            -f64::from_bits(1)
        } else {
            f64::from_bits(self.to_bits() + 1)
        }
    }
}

/// Copy a point, replacing `-0.0` with canonical `+0.0` so that bitwise
/// comparisons downstream never distinguish the two zeros.
pub(crate) fn canonical_copy<T: Scalar>(point: &[T]) -> Vec<T> {
    point
        .iter()
        .map(|&x| if x == T::zero() { T::zero() } else { x })
        .collect()
}
