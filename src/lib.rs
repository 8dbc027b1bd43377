//! Online, unsupervised anomaly detection over numeric streams with random
//! cut forests.
//!
//! A [`RandomCutForest`] ingests an unbounded stream of fixed-width points
//! in bounded memory, maintaining per-tree samples under time-biased
//! reservoir sampling so the model tracks drift. Each point can be scored
//! against the current sample, attributed per dimension and side, completed
//! when partially observed, or used for density estimation, near-neighbor
//! lookup and short forecasts.
//!
//! ```ignore
//! use cutforest::{RandomCutForest, RandomCutForestBuilder};
//!
//! // the dimension is the only required parameter
//! let mut forest: RandomCutForest<f32> = RandomCutForestBuilder::new(3)
//!     .number_of_trees(50)
//!     .sample_size(256)
//!     .random_seed(42)
//!     .build()?;
//!
//! let data: Vec<Vec<f32>> = source();
//! for point in &data {
//!     // score first, then update: streaming evaluation
//!     let score = forest.score(point)?;
//!     forest.update(point)?;
//! }
//! # Ok::<(), cutforest::ForestError>(())
//! ```
//!
//! ### References
//!
//! Sudipto Guha, Nina Mishra, Gourav Roy, and Okke Schrijvers. *"Robust
//! random cut forest based anomaly detection on streams."* International
//! Conference on Machine Learning, pp. 2712-2721. PMLR, 2016.

pub mod accumulator;
pub mod common;
pub mod component;
pub mod errors;
pub mod forest;
pub mod pointstore;
pub mod sampler;
pub mod tree;
pub mod types;
pub mod visitor;

pub use common::divector::DiVector;
pub use common::interpolation::InterpolationMeasure;
pub use common::rangevector::RangeVector;
pub use errors::{ForestError, Result};
pub use forest::{Neighbor, RandomCutForest, RandomCutForestBuilder};
pub use types::Scalar;
