pub mod attribution;
pub mod density;
pub mod impute;
pub mod neighbor;
pub mod score;

pub use attribution::AttributionVisitor;
pub use density::InterpolationVisitor;
pub use impute::{ImputeCandidate, ImputeVisitor};
pub use neighbor::NearNeighborVisitor;
pub use score::AnomalyScoreVisitor;

use crate::errors::Result;
use crate::tree::nodeview::NodeView;
use crate::types::Scalar;

/// A computation over one tree traversal.
///
/// The tree calls `accept_leaf` once, at the leaf the traversal resolves
/// to, then `accept` for each ancestor in leaf-to-root order, and finally
/// the caller takes `result`. A visitor that reports convergence stops the
/// walk early; one that asks for the shadow box gets sibling-only box
/// accounting for the rest of the walk.
pub trait Visitor<T: Scalar> {
    type Output;

    fn accept_leaf(&mut self, point: &[T], view: &NodeView<T>);

    fn accept(&mut self, point: &[T], view: &NodeView<T>);

    fn result(&self) -> Result<Self::Output>;

    fn is_converged(&self) -> bool {
        false
    }

    /// Visitors needing per-dimension box information make the traversal
    /// maintain the path box even when the cache could serve probabilities.
    fn needs_box(&self) -> bool {
        false
    }

    /// Requested after `accept_leaf`; see [`NodeView::active_box`].
    fn use_shadow_box(&self) -> bool {
        false
    }
}

/// A visitor that may explore both subtrees below chosen nodes.
pub trait MultiVisitor<T: Scalar>: Visitor<T> {
    /// Whether both children of the current node (its cut is already on the
    /// view) must be traversed.
    fn split_below(&self, view: &NodeView<T>) -> bool;

    /// Folds the results of the two branches just traversed into one.
    fn combine_branches(&mut self, point: &[T], view: &NodeView<T>);
}

// The standard score functions. `x` is the depth (or the argument being
// transformed for normalizers), `y` a mass.

pub(crate) fn score_seen(x: usize, y: usize) -> f64 {
    1.0 / (x as f64 + f64::log2(1.0 + y as f64))
}

pub(crate) fn score_unseen(x: usize, _y: usize) -> f64 {
    1.0 / (x as f64 + 1.0)
}

pub(crate) fn normalizer(x: f64, y: usize) -> f64 {
    x * f64::log2(1.0 + y as f64)
}

pub(crate) fn damp(x: usize, y: usize) -> f64 {
    1.0 - (x as f64) / (2.0 * y as f64)
}

// Displacement scoring estimates the expected number of points a query
// displaces rather than the expected inverse height. Seen and unseen points
// are deliberately close here; the distinction matters for anomaly scores
// but not for similarity queries.

pub(crate) fn score_seen_displacement(_x: usize, y: usize) -> f64 {
    1.0 / (1.0 + y as f64)
}

pub(crate) fn score_unseen_displacement(_x: usize, y: usize) -> f64 {
    y as f64
}

pub(crate) fn displacement_normalizer(x: f64, y: usize) -> f64 {
    x / (1.0 + y as f64)
}

pub(crate) fn identity(x: f64, _y: usize) -> f64 {
    x
}

/// The score-function bundle shared by the scoring visitors, so that the
/// same traversals serve the standard score, displacement scores and
/// density estimation.
#[derive(Clone, Copy)]
pub struct Scoring {
    pub ignore_mass: usize,
    pub score_seen: fn(usize, usize) -> f64,
    pub score_unseen: fn(usize, usize) -> f64,
    pub damp: fn(usize, usize) -> f64,
    pub normalizer: fn(f64, usize) -> f64,
}

impl Default for Scoring {
    fn default() -> Self {
        Scoring {
            ignore_mass: 0,
            score_seen,
            score_unseen,
            damp,
            normalizer,
        }
    }
}

impl Scoring {
    /// Expected-displacement scoring; the normalization makes the maximum
    /// one rather than centering typical points near one.
    pub fn displacement() -> Self {
        Scoring {
            ignore_mass: 0,
            score_seen: score_seen_displacement,
            score_unseen: score_unseen_displacement,
            damp,
            normalizer: displacement_normalizer,
        }
    }

    /// Density estimation reuses the unnormalized displacement measures.
    pub fn density() -> Self {
        Scoring {
            ignore_mass: 0,
            score_seen: score_seen_displacement,
            score_unseen: score_unseen_displacement,
            damp,
            normalizer: identity,
        }
    }
}

pub(crate) fn l1_distance<T: Scalar>(a: &[T], b: &[T]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x.as_f64() - y.as_f64()).abs())
        .sum()
}

pub(crate) fn linf_distance<T: Scalar>(a: &[T], b: &[T]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x.as_f64() - y.as_f64()).abs())
        .fold(0.0, f64::max)
}
