use core::marker::PhantomData;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;
use rayon::prelude::*;
use tracing::debug;

use crate::accumulator::OneSidedConvergingAccumulator;
use crate::common::divector::DiVector;
use crate::common::interpolation::InterpolationMeasure;
use crate::common::rangevector::RangeVector;
use crate::component::SamplerPlusTree;
use crate::errors::{check_argument, ForestError, Result};
use crate::pointstore::PointStore;
use crate::types::{canonical_copy, Scalar, NIL};
use crate::visitor::{
    AnomalyScoreVisitor, AttributionVisitor, ImputeCandidate, ImputeVisitor,
    InterpolationVisitor, NearNeighborVisitor, Scoring, Visitor,
};

/// Relative precision and minimum witness count of approximate queries.
const APPROXIMATE_PRECISION: f64 = 0.1;
const APPROXIMATE_MIN_WITNESSES: usize = 5;

/// A sampled point close to a query, as returned by
/// [`RandomCutForest::neighbors`].
#[derive(Clone, Debug)]
pub struct Neighbor<T> {
    pub point: Vec<T>,
    /// L-infinity distance from the query.
    pub distance: f64,
    /// The sequence indexes at which the point was admitted, when the
    /// forest stores them.
    pub sequence_indexes: Option<Vec<u64>>,
}

/// Configuration for a [`RandomCutForest`]; `new(dimensions)` plus the
/// defaults matches the standard parameterization.
pub struct RandomCutForestBuilder<T> {
    dimensions: usize,
    number_of_trees: usize,
    sample_size: usize,
    time_decay: Option<f64>,
    output_after: Option<usize>,
    parallel_enabled: bool,
    thread_pool_size: usize,
    store_sequence_indexes: bool,
    center_of_mass: bool,
    bounding_box_cache_fraction: f64,
    initial_accept_fraction: f64,
    random_seed: u64,
    internal_shingling: bool,
    shingle_size: usize,
    _precision: PhantomData<T>,
}

impl<T: Scalar> RandomCutForestBuilder<T> {
    pub fn new(dimensions: usize) -> Self {
        RandomCutForestBuilder {
            dimensions,
            number_of_trees: 50,
            sample_size: 256,
            time_decay: None,
            output_after: None,
            parallel_enabled: false,
            thread_pool_size: 0,
            store_sequence_indexes: false,
            center_of_mass: false,
            bounding_box_cache_fraction: 1.0,
            initial_accept_fraction: 0.125,
            random_seed: 42,
            internal_shingling: false,
            shingle_size: 1,
            _precision: PhantomData,
        }
    }

    pub fn number_of_trees(mut self, number_of_trees: usize) -> Self {
        self.number_of_trees = number_of_trees;
        self
    }

    pub fn sample_size(mut self, sample_size: usize) -> Self {
        self.sample_size = sample_size;
        self
    }

    /// Sampler decay rate; the default is `1 / (10 * sample_size)`.
    pub fn time_decay(mut self, time_decay: f64) -> Self {
        self.time_decay = Some(time_decay);
        self
    }

    /// Number of updates before queries return non-default values; the
    /// default is a quarter of the sample size.
    pub fn output_after(mut self, output_after: usize) -> Self {
        self.output_after = Some(output_after);
        self
    }

    pub fn parallel_enabled(mut self, parallel_enabled: bool) -> Self {
        self.parallel_enabled = parallel_enabled;
        self
    }

    /// Worker count for the parallel executor; 0 uses the global pool.
    pub fn thread_pool_size(mut self, thread_pool_size: usize) -> Self {
        self.thread_pool_size = thread_pool_size;
        self
    }

    pub fn store_sequence_indexes(mut self, store_sequence_indexes: bool) -> Self {
        self.store_sequence_indexes = store_sequence_indexes;
        self
    }

    pub fn center_of_mass(mut self, center_of_mass: bool) -> Self {
        self.center_of_mass = center_of_mass;
        self
    }

    pub fn bounding_box_cache_fraction(mut self, fraction: f64) -> Self {
        self.bounding_box_cache_fraction = fraction;
        self
    }

    pub fn initial_accept_fraction(mut self, fraction: f64) -> Self {
        self.initial_accept_fraction = fraction;
        self
    }

    pub fn random_seed(mut self, random_seed: u64) -> Self {
        self.random_seed = random_seed;
        self
    }

    /// With internal shingling the forest maintains the rolling shingle
    /// itself: updates and queries take base-width inputs.
    pub fn internal_shingling(mut self, internal_shingling: bool) -> Self {
        self.internal_shingling = internal_shingling;
        self
    }

    pub fn shingle_size(mut self, shingle_size: usize) -> Self {
        self.shingle_size = shingle_size;
        self
    }

    pub fn build(self) -> Result<RandomCutForest<T>> {
        check_argument(self.dimensions > 0, "dimensions must be positive")?;
        check_argument(self.number_of_trees > 0, "need at least one tree")?;
        check_argument(self.sample_size > 0, "sample size must be positive")?;
        check_argument(
            (0.0..=1.0).contains(&self.bounding_box_cache_fraction),
            "cache fraction must lie in [0, 1]",
        )?;
        check_argument(
            self.initial_accept_fraction > 0.0 && self.initial_accept_fraction <= 1.0,
            "initial accept fraction must lie in (0, 1]",
        )?;
        check_argument(self.shingle_size > 0, "shingle size must be positive")?;
        check_argument(
            self.shingle_size == 1 || self.dimensions % self.shingle_size == 0,
            "shingle size must divide dimensions",
        )?;
        check_argument(
            !self.internal_shingling || self.shingle_size > 1,
            "internal shingling requires shingle size > 1",
        )?;
        let time_decay = self
            .time_decay
            .unwrap_or(1.0 / (10.0 * self.sample_size as f64));
        check_argument(time_decay >= 0.0, "time decay cannot be negative")?;
        let output_after = self.output_after.unwrap_or(self.sample_size / 4);

        let point_store_capacity =
            (self.sample_size * self.number_of_trees + 1).max(2 * self.sample_size);
        let initial_store_capacity = 2 * self.sample_size;

        let mut rng = ChaCha20Rng::seed_from_u64(self.random_seed);
        let _ = rng.next_u64();
        let components = (0..self.number_of_trees)
            .map(|_| {
                SamplerPlusTree::new(
                    self.dimensions,
                    self.sample_size,
                    time_decay,
                    self.initial_accept_fraction,
                    self.bounding_box_cache_fraction,
                    self.store_sequence_indexes,
                    self.center_of_mass,
                    rng.next_u64(),
                )
            })
            .collect();

        let thread_pool = if self.parallel_enabled && self.thread_pool_size > 0 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(self.thread_pool_size)
                    .build()
                    .map_err(|_| ForestError::Internal {
                        msg: "failed to build the worker pool",
                    })?,
            )
        } else {
            None
        };

        debug!(
            dimensions = self.dimensions,
            number_of_trees = self.number_of_trees,
            sample_size = self.sample_size,
            time_decay,
            parallel = self.parallel_enabled,
            "building random cut forest"
        );

        Ok(RandomCutForest {
            dimensions: self.dimensions,
            shingle_size: self.shingle_size,
            internal_shingling: self.internal_shingling,
            number_of_trees: self.number_of_trees,
            sample_size: self.sample_size,
            time_decay,
            output_after,
            parallel_enabled: self.parallel_enabled,
            store_sequence_indexes: self.store_sequence_indexes,
            random_seed: self.random_seed,
            total_updates: 0,
            components,
            points: PointStore::new(self.dimensions, point_store_capacity, initial_store_capacity),
            last_shingle: vec![T::zero(); self.dimensions],
            shingle_fill: 0,
            thread_pool,
        })
    }
}

/// An online anomaly-detection model over a stream of fixed-width points.
///
/// The forest owns a shared point store and `number_of_trees` components,
/// each a time-biased sampler coupled to a random cut tree. Updates and
/// queries fan out over the components, sequentially or on a worker pool,
/// and reduce the per-tree results. Queries return documented defaults
/// (zero score, empty vectors) until `output_after` updates have been seen.
pub struct RandomCutForest<T> {
    dimensions: usize,
    shingle_size: usize,
    internal_shingling: bool,
    number_of_trees: usize,
    sample_size: usize,
    time_decay: f64,
    output_after: usize,
    parallel_enabled: bool,
    store_sequence_indexes: bool,
    random_seed: u64,
    total_updates: u64,
    components: Vec<SamplerPlusTree<T>>,
    points: PointStore<T>,
    last_shingle: Vec<T>,
    shingle_fill: usize,
    thread_pool: Option<rayon::ThreadPool>,
}

impl<T: Scalar> RandomCutForest<T> {
    pub fn builder(dimensions: usize) -> RandomCutForestBuilder<T> {
        RandomCutForestBuilder::new(dimensions)
    }

    // ---- bookkeeping ----------------------------------------------------

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn shingle_size(&self) -> usize {
        self.shingle_size
    }

    pub fn is_internal_shingling_enabled(&self) -> bool {
        self.internal_shingling
    }

    pub fn number_of_trees(&self) -> usize {
        self.number_of_trees
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub fn time_decay(&self) -> f64 {
        self.time_decay
    }

    pub fn total_updates(&self) -> u64 {
        self.total_updates
    }

    pub fn is_output_ready(&self) -> bool {
        self.total_updates >= self.output_after as u64
    }

    pub fn components(&self) -> &[SamplerPlusTree<T>] {
        &self.components
    }

    pub fn point_store(&self) -> &PointStore<T> {
        &self.points
    }

    /// Approximate model footprint in bytes.
    pub fn size(&self) -> usize {
        self.components.iter().map(|c| c.size()).sum::<usize>()
            + self.points.size()
            + core::mem::size_of::<Self>()
    }

    fn input_dimensions(&self) -> usize {
        if self.internal_shingling {
            self.dimensions / self.shingle_size
        } else {
            self.dimensions
        }
    }

    // ---- updates --------------------------------------------------------

    /// Feeds one observation to every component and reconciles the shared
    /// reference counts afterwards. With internal shingling the input is
    /// base-width and the first `shingle_size - 1` observations only warm
    /// the shingle.
    pub fn update(&mut self, point: &[T]) -> Result<()> {
        check_argument(
            point.iter().all(|x| x.is_finite()),
            "point components must be finite",
        )?;
        let shingled = if self.internal_shingling {
            check_argument(
                point.len() == self.input_dimensions(),
                "expected base-width input under internal shingling",
            )?;
            self.roll_shingle(&canonical_copy(point));
            if self.shingle_fill < self.shingle_size {
                self.shingle_fill += 1;
                if self.shingle_fill < self.shingle_size {
                    return Ok(());
                }
            }
            self.last_shingle.clone()
        } else {
            check_argument(point.len() == self.dimensions, "incorrect point length")?;
            canonical_copy(point)
        };

        let sequence_index = self.total_updates;
        let point_ref = self.points.add(&shingled)?;

        let results: Vec<Option<(u32, u32)>> = {
            let points = &self.points;
            let components = &mut self.components;
            if self.parallel_enabled {
                let mut task = || {
                    components
                        .par_iter_mut()
                        .map(|component| component.update(point_ref, sequence_index, points))
                        .collect::<Result<Vec<_>>>()
                };
                match &self.thread_pool {
                    Some(pool) => pool.install(task)?,
                    None => task()?,
                }
            } else {
                components
                    .iter_mut()
                    .map(|component| component.update(point_ref, sequence_index, points))
                    .collect::<Result<Vec<_>>>()?
            }
        };

        let pairs: Vec<(u32, u32)> = results
            .into_iter()
            .map(|outcome| outcome.unwrap_or((NIL, NIL)))
            .collect();
        self.points.adjust_counts(&pairs)?;
        self.points.decrement(point_ref)?;
        self.total_updates += 1;
        if self.total_updates == self.output_after as u64 {
            debug!(updates = self.total_updates, "forest output is ready");
        }
        Ok(())
    }

    fn roll_shingle(&mut self, block: &[T]) {
        let base = block.len();
        self.last_shingle.copy_within(base.., 0);
        let start = self.dimensions - base;
        self.last_shingle[start..].copy_from_slice(block);
    }

    /// Lifts a query input into the forest's internal width: full-width
    /// points pass through (canonicalized), base-width points are completed
    /// from the rolling shingle.
    fn query_point(&self, point: &[T]) -> Result<Vec<T>> {
        check_argument(
            point.iter().all(|x| x.is_finite()),
            "point components must be finite",
        )?;
        if point.len() == self.dimensions {
            return Ok(canonical_copy(point));
        }
        if self.internal_shingling && point.len() == self.input_dimensions() {
            let base = self.input_dimensions();
            let mut query = vec![T::zero(); self.dimensions];
            query[..self.dimensions - base].copy_from_slice(&self.last_shingle[base..]);
            query[self.dimensions - base..].copy_from_slice(&canonical_copy(point));
            return Ok(query);
        }
        Err(ForestError::InvalidArgument {
            msg: "incorrect query length",
        })
    }

    fn fan_out<R, F>(&self, op: F) -> Result<Vec<R>>
    where
        F: Fn(&SamplerPlusTree<T>) -> Result<R> + Sync,
        R: Send,
    {
        if self.parallel_enabled {
            let task = || {
                self.components
                    .par_iter()
                    .map(|component| op(component))
                    .collect::<Result<Vec<R>>>()
            };
            match &self.thread_pool {
                Some(pool) => pool.install(task),
                None => task(),
            }
        } else {
            self.components.iter().map(op).collect()
        }
    }

    // ---- queries --------------------------------------------------------

    /// The anomaly score of `point` against the current sample; near 1 for
    /// ordinary points, larger for anomalies, 0 before the forest is ready.
    pub fn score(&self, point: &[T]) -> Result<f64> {
        self.scored(point, Scoring::default())
    }

    /// Expected-displacement variant of the score.
    pub fn displacement_score(&self, point: &[T]) -> Result<f64> {
        self.scored(point, Scoring::displacement())
    }

    pub fn generic_score(&self, point: &[T], scoring: Scoring) -> Result<f64> {
        self.scored(point, scoring)
    }

    fn scored(&self, point: &[T], scoring: Scoring) -> Result<f64> {
        if !self.is_output_ready() {
            return Ok(0.0);
        }
        let query = self.query_point(point)?;
        let points = &self.points;
        let values = self.fan_out(|component| {
            let tree = component.tree();
            if tree.is_empty() {
                return Ok(None);
            }
            let mut visitor = AnomalyScoreVisitor::new(tree.mass(), scoring);
            tree.traverse(&query, &mut visitor, points)?;
            <AnomalyScoreVisitor as Visitor<T>>::result(&visitor).map(Some)
        })?;
        let sum: f64 = values.into_iter().flatten().sum();
        Ok(sum / self.number_of_trees as f64)
    }

    /// The score evaluated with early termination: components report
    /// sequentially until the running estimate is tight enough.
    pub fn approximate_score(&self, point: &[T]) -> Result<f64> {
        if !self.is_output_ready() {
            return Ok(0.0);
        }
        let query = self.query_point(point)?;
        let scoring = Scoring::default();
        let mut accumulator = OneSidedConvergingAccumulator::new(
            APPROXIMATE_PRECISION,
            APPROXIMATE_MIN_WITNESSES.min(self.number_of_trees),
            self.number_of_trees,
        );
        for component in &self.components {
            let tree = component.tree();
            let value = if tree.is_empty() {
                0.0
            } else {
                let mut visitor = AnomalyScoreVisitor::new(tree.mass(), scoring);
                tree.traverse(&query, &mut visitor, &self.points)?;
                <AnomalyScoreVisitor as Visitor<T>>::result(&visitor)?
            };
            accumulator.accept(value);
            if accumulator.is_converged() {
                break;
            }
        }
        Ok(accumulator.mean())
    }

    /// Per-dimension, per-side decomposition of the anomaly score; the
    /// total of the returned vector equals `score(point)`.
    pub fn attribution(&self, point: &[T]) -> Result<DiVector> {
        if !self.is_output_ready() {
            return Ok(DiVector::empty(self.dimensions));
        }
        let query = self.query_point(point)?;
        let points = &self.points;
        let scoring = Scoring::default();
        let values = self.fan_out(|component| {
            let tree = component.tree();
            if tree.is_empty() {
                return Ok(None);
            }
            let mut visitor = AttributionVisitor::new(tree.mass(), self.dimensions, scoring);
            tree.traverse(&query, &mut visitor, points)?;
            <AttributionVisitor as Visitor<T>>::result(&visitor).map(Some)
        })?;
        let mut total = DiVector::empty(self.dimensions);
        for value in values.into_iter().flatten() {
            value.add_to(&mut total);
        }
        total.divide(self.number_of_trees);
        Ok(total)
    }

    /// The full interpolation measure behind the density estimate.
    pub fn density_interpolant(&self, point: &[T]) -> Result<InterpolationMeasure> {
        if !self.is_output_ready() {
            return Ok(InterpolationMeasure::empty(self.dimensions, 0.0));
        }
        let query = self.query_point(point)?;
        let points = &self.points;
        let scoring = Scoring::density();
        let values = self.fan_out(|component| {
            let tree = component.tree();
            if tree.is_empty() {
                return Ok(None);
            }
            let mut visitor = InterpolationVisitor::new(tree.mass(), self.dimensions, scoring);
            tree.traverse(&query, &mut visitor, points)?;
            <InterpolationVisitor as Visitor<T>>::result(&visitor).map(Some)
        })?;
        let mut total = InterpolationMeasure::empty(self.dimensions, 0.0);
        for value in values.into_iter().flatten() {
            value.add_to(&mut total);
        }
        total.divide(self.number_of_trees);
        Ok(total)
    }

    /// A scalar density estimate at `point`.
    pub fn density(&self, point: &[T]) -> Result<f64> {
        Ok(self.density_interpolant(point)?.density())
    }

    /// The density split by dimension and side.
    pub fn directional_density(&self, point: &[T]) -> Result<DiVector> {
        Ok(self.density_interpolant(point)?.directional_density())
    }

    /// Fills the `missing` coordinates of `point` from the sample; returns
    /// one value per missing position. With internal shingling and a
    /// base-width input the positions refer to the base point.
    pub fn impute(&self, point: &[T], missing: &[usize]) -> Result<Vec<T>> {
        check_argument(!missing.is_empty(), "nothing to impute")?;
        let (values, _, _) = self.impute_with_bounds(point, missing)?;
        Ok(values)
    }

    fn impute_with_bounds(
        &self,
        point: &[T],
        missing: &[usize],
    ) -> Result<(Vec<T>, Vec<T>, Vec<T>)> {
        let mapped: Vec<usize> =
            if self.internal_shingling && point.len() == self.input_dimensions() {
                let base = self.input_dimensions();
                for &position in missing {
                    check_argument(position < base, "missing position out of range")?;
                }
                missing
                    .iter()
                    .map(|&position| self.dimensions - base + position)
                    .collect()
            } else {
                for &position in missing {
                    check_argument(position < self.dimensions, "missing position out of range")?;
                }
                Vec::from(missing)
            };
        let query = self.query_point(point)?;
        self.impute_ranges(&query, &mapped)
    }

    /// Per-tree candidate completions reduced to a median with bounds: the
    /// candidates are ranked by score and the central statistics are taken
    /// over the better half.
    fn impute_ranges(
        &self,
        query: &[T],
        missing: &[usize],
    ) -> Result<(Vec<T>, Vec<T>, Vec<T>)> {
        if !self.is_output_ready() {
            let zeros = vec![T::zero(); missing.len()];
            return Ok((zeros.clone(), zeros.clone(), zeros));
        }
        let mut mask = vec![false; self.dimensions];
        for &position in missing {
            mask[position] = true;
        }
        let points = &self.points;
        let seed = self.random_seed;
        let candidates: Vec<ImputeCandidate<T>> = self
            .fan_out(|component| {
                let tree = component.tree();
                if tree.is_empty() {
                    return Ok(None);
                }
                let mut visitor =
                    ImputeVisitor::new(missing, self.dimensions, tree.mass(), 1.0, seed, Scoring::default());
                tree.traverse_multi(query, &mask, &mut visitor, points)?;
                visitor.result().map(Some)
            })?
            .into_iter()
            .flatten()
            .collect();
        if candidates.is_empty() {
            let zeros = vec![T::zero(); missing.len()];
            return Ok((zeros.clone(), zeros.clone(), zeros));
        }

        let mut ranked = candidates;
        ranked.sort_by(|a, b| a.score.partial_cmp(&b.score).expect("scores are finite"));
        let central = ranked.len().div_ceil(2);
        let mut values = Vec::with_capacity(missing.len());
        let mut upper = Vec::with_capacity(missing.len());
        let mut lower = Vec::with_capacity(missing.len());
        for &position in missing {
            let mut column: Vec<T> = ranked[..central]
                .iter()
                .map(|candidate| candidate.completion[position])
                .collect();
            column.sort_by(|a, b| a.partial_cmp(b).expect("components are finite"));
            values.push(column[column.len() / 2]);
            lower.push(column[0]);
            upper.push(column[column.len() - 1]);
        }
        Ok((values, upper, lower))
    }

    /// Sampled points within `distance_threshold` (L-infinity) of the
    /// query, nearest first.
    pub fn neighbors(&self, point: &[T], distance_threshold: f64) -> Result<Vec<Neighbor<T>>> {
        check_argument(distance_threshold >= 0.0, "threshold cannot be negative")?;
        if !self.is_output_ready() {
            return Ok(Vec::new());
        }
        let query = self.query_point(point)?;
        let points = &self.points;
        let candidates = self.fan_out(|component| {
            let tree = component.tree();
            if tree.is_empty() {
                return Ok(None);
            }
            let mut visitor = NearNeighborVisitor::new();
            tree.traverse(&query, &mut visitor, points)?;
            let found = <NearNeighborVisitor as Visitor<T>>::result(&visitor)?;
            Ok(found.map(|(point_ref, distance)| {
                (point_ref, distance, tree.sequences_of(point_ref))
            }))
        })?;

        let mut merged: std::collections::BTreeMap<u32, (f64, Option<Vec<u64>>)> =
            std::collections::BTreeMap::new();
        for (point_ref, distance, sequences) in candidates.into_iter().flatten() {
            if distance <= distance_threshold {
                merged.entry(point_ref).or_insert((distance, sequences));
            }
        }
        let mut answer = Vec::with_capacity(merged.len());
        for (point_ref, (distance, sequence_indexes)) in merged {
            answer.push(Neighbor {
                point: self.points.point(point_ref)?.to_vec(),
                distance,
                sequence_indexes: if self.store_sequence_indexes {
                    sequence_indexes
                } else {
                    None
                },
            });
        }
        answer.sort_by(|a, b| a.distance.partial_cmp(&b.distance).expect("finite distances"));
        Ok(answer)
    }

    /// Forecasts the next `horizon` base-width observations by repeatedly
    /// imputing the newest block of a shifted shingle. Requires internal
    /// shingling.
    pub fn extrapolate(&self, horizon: usize) -> Result<RangeVector<T>> {
        check_argument(
            self.internal_shingling && self.shingle_size > 1,
            "extrapolation requires internal shingling",
        )?;
        let base = self.input_dimensions();
        if !self.is_output_ready() || horizon == 0 {
            return Ok(RangeVector::new(horizon * base));
        }
        let missing: Vec<usize> = (self.dimensions - base..self.dimensions).collect();
        let mut fictitious = self.last_shingle.clone();
        let mut values = Vec::with_capacity(horizon * base);
        let mut upper = Vec::with_capacity(horizon * base);
        let mut lower = Vec::with_capacity(horizon * base);
        for _ in 0..horizon {
            fictitious.copy_within(base.., 0);
            for slot in fictitious[self.dimensions - base..].iter_mut() {
                *slot = T::zero();
            }
            let (step_values, step_upper, step_lower) =
                self.impute_ranges(&fictitious, &missing)?;
            for j in 0..base {
                fictitious[self.dimensions - base + j] = step_values[j];
                values.push(step_values[j]);
                upper.push(step_upper[j]);
                lower.push(step_lower[j]);
            }
        }
        Ok(RangeVector::create(&values, &upper, &lower))
    }
}
