use crate::common::divector::DiVector;
use crate::tree::boundingbox::BoundingBox;
use crate::types::Scalar;

/// The raw material of a density estimate: directional measure, distance and
/// probability mass accumulated while a query point is interpolated into the
/// boxes along a traversal path.
#[derive(Clone, Debug)]
pub struct InterpolationMeasure {
    pub measure: DiVector,
    pub distance: DiVector,
    pub probability_mass: DiVector,
    pub sample_size: f64,
}

impl InterpolationMeasure {
    pub fn empty(dimensions: usize, sample_size: f64) -> Self {
        InterpolationMeasure {
            measure: DiVector::empty(dimensions),
            distance: DiVector::empty(dimensions),
            probability_mass: DiVector::empty(dimensions),
            sample_size,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.measure.dimensions()
    }

    pub fn add_to(&self, other: &mut InterpolationMeasure) {
        self.measure.add_to(&mut other.measure);
        self.distance.add_to(&mut other.distance);
        self.probability_mass.add_to(&mut other.probability_mass);
        other.sample_size += self.sample_size;
    }

    pub fn scale(&mut self, factor: f64) {
        self.measure.scale(factor);
        self.distance.scale(factor);
        self.probability_mass.scale(factor);
    }

    pub fn divide(&mut self, count: usize) {
        self.scale(1.0 / count as f64);
        self.sample_size /= count as f64;
    }

    /// Interpolates `point` into `bounding_box`: the previous accumulation is
    /// damped by the containment probability and each escaping direction
    /// receives its share of distance, probability mass and `value`. Returns
    /// the probability that a random cut on the merged box separates the
    /// point.
    pub fn update<T: Scalar>(
        &mut self,
        point: &[T],
        bounding_box: &BoundingBox<T>,
        value: f64,
    ) -> f64 {
        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();
        let mut gap_sum = 0.0;
        for ((&x, &lo), &hi) in point.iter().zip(min_values).zip(max_values) {
            if x < lo {
                gap_sum += lo.as_f64() - x.as_f64();
            } else if x > hi {
                gap_sum += x.as_f64() - hi.as_f64();
            }
        }
        let new_range = gap_sum + bounding_box.range_sum();
        if gap_sum == 0.0 {
            return 0.0;
        }
        let prob = gap_sum / new_range;
        self.scale(1.0 - prob);
        for i in 0..point.len() {
            let x = point[i].as_f64();
            let lo = min_values[i].as_f64();
            let hi = max_values[i].as_f64();
            if x > hi {
                let t = (x - hi) / new_range;
                self.distance.high[i] += t * (x - lo);
                self.probability_mass.high[i] += t;
                self.measure.high[i] += value * t;
            } else if x < lo {
                let t = (lo - x) / new_range;
                self.distance.low[i] += t * (hi - x);
                self.probability_mass.low[i] += t;
                self.measure.low[i] += value * t;
            }
        }
        prob
    }

    /// The directional measure scaled by the expected manifold volume factor.
    pub fn directional_measure(&self, threshold: f64, manifold_dimension: f64) -> DiVector {
        assert!(
            self.sample_size >= 0.0 && self.measure.total() >= 0.0,
            "negative samples or measure"
        );
        if self.sample_size == 0.0 || self.measure.total() == 0.0 {
            return DiVector::empty(self.dimensions());
        }

        let mut sum_of_factors = 0.0;
        for i in 0..self.dimensions() {
            let mass = self.probability_mass.high_low_sum(i);
            let mut t = if mass > 0.0 {
                self.distance.high_low_sum(i) / mass
            } else {
                0.0
            };
            if t > 0.0 {
                t = f64::exp(f64::ln(t) * manifold_dimension) * mass;
            }
            sum_of_factors += t;
        }

        let mut answer = self.measure.clone();
        answer.scale(1.0 / (threshold + sum_of_factors));
        answer
    }

    pub fn directional_density(&self) -> DiVector {
        self.directional_measure(1e-3, self.dimensions() as f64)
    }

    pub fn density(&self) -> f64 {
        self.directional_density().total()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_returns_zero_for_contained_point() {
        let bbox = BoundingBox::from_points(&[0.0f32, 0.0], &[1.0, 1.0]);
        let mut measure = InterpolationMeasure::empty(2, 10.0);
        assert_eq!(measure.update(&[0.5f32, 0.5], &bbox, 0.3), 0.0);
        assert_eq!(measure.measure.total(), 0.0);
    }

    #[test]
    fn update_attributes_escaping_directions() {
        let bbox = BoundingBox::from_points(&[0.0f32, 0.0], &[1.0, 1.0]);
        let mut measure = InterpolationMeasure::empty(2, 10.0);
        let prob = measure.update(&[2.0f32, 0.5], &bbox, 0.3);
        // gap 1.0 against total range 2.0 plus the gap
        assert!((prob - 1.0 / 3.0).abs() < 1e-12);
        assert!(measure.probability_mass.high[0] > 0.0);
        assert_eq!(measure.probability_mass.low[0], 0.0);
        assert_eq!(measure.probability_mass.high_low_sum(1), 0.0);
    }
}
