use crate::types::Scalar;

/// An axis-aligned hyper-rectangle with a cached total side length.
///
/// The per-dimension bounds are stored in the component type while the range
/// sum is accumulated in `f64`; separation probabilities inherit the double
/// precision arithmetic.
#[derive(Clone, Debug, PartialEq)]
pub struct BoundingBox<T> {
    min_values: Vec<T>,
    max_values: Vec<T>,
    range_sum: f64,
}

impl<T: Scalar> BoundingBox<T> {
    pub fn from_point(point: &[T]) -> Self {
        BoundingBox {
            min_values: Vec::from(point),
            max_values: Vec::from(point),
            range_sum: 0.0,
        }
    }

    pub fn from_points(first: &[T], second: &[T]) -> Self {
        assert!(first.len() == second.len(), "mismatched lengths");
        let min_values: Vec<T> = first
            .iter()
            .zip(second)
            .map(|(&x, &y)| if x < y { x } else { y })
            .collect();
        let max_values: Vec<T> = first
            .iter()
            .zip(second)
            .map(|(&x, &y)| if x > y { x } else { y })
            .collect();
        let range_sum = Self::range_sum_of(&min_values, &max_values);
        BoundingBox {
            min_values,
            max_values,
            range_sum,
        }
    }

    fn range_sum_of(min_values: &[T], max_values: &[T]) -> f64 {
        min_values
            .iter()
            .zip(max_values)
            .map(|(&lo, &hi)| hi.as_f64() - lo.as_f64())
            .sum()
    }

    pub fn dimensions(&self) -> usize {
        self.min_values.len()
    }

    pub fn min_values(&self) -> &[T] {
        &self.min_values
    }

    pub fn max_values(&self) -> &[T] {
        &self.max_values
    }

    pub fn range_sum(&self) -> f64 {
        self.range_sum
    }

    pub fn range(&self, dimension: usize) -> f64 {
        self.max_values[dimension].as_f64() - self.min_values[dimension].as_f64()
    }

    /// A box with zero total range holds exactly one point.
    pub fn is_point(&self) -> bool {
        self.range_sum == 0.0
    }

    pub fn contains(&self, point: &[T]) -> bool {
        self.min_values
            .iter()
            .zip(point)
            .zip(&self.max_values)
            .all(|((&lo, &x), &hi)| lo <= x && x <= hi)
    }

    /// Extends the box to cover `point`; returns `true` when the box was
    /// left unchanged, i.e. the point was already covered.
    pub fn extend_with_point(&mut self, point: &[T]) -> bool {
        self.extend_with_bounds(point, point)
    }

    pub fn extend_with_box(&mut self, other: &BoundingBox<T>) {
        self.extend_with_bounds(&other.min_values, &other.max_values);
    }

    fn extend_with_bounds(&mut self, low: &[T], high: &[T]) -> bool {
        let old_sum = self.range_sum;
        for (x, &y) in self.min_values.iter_mut().zip(low) {
            if y < *x {
                *x = y;
            }
        }
        for (x, &y) in self.max_values.iter_mut().zip(high) {
            if y > *x {
                *x = y;
            }
        }
        self.range_sum = Self::range_sum_of(&self.min_values, &self.max_values);
        old_sum == self.range_sum
    }

    /// Pure merge with a point.
    pub fn merged_with_point(&self, point: &[T]) -> BoundingBox<T> {
        let mut merged = self.clone();
        merged.extend_with_point(point);
        merged
    }

    /// The probability that a uniformly random cut on the box merged with
    /// `point` separates the point from this box: the relative increase in
    /// range sum caused by the merge.
    pub fn probability_of_separation(&self, point: &[T]) -> f64 {
        let mut gap_sum = 0.0;
        for ((&lo, &x), &hi) in self.min_values.iter().zip(point).zip(&self.max_values) {
            if x < lo {
                gap_sum += lo.as_f64() - x.as_f64();
            } else if x > hi {
                gap_sum += x.as_f64() - hi.as_f64();
            }
        }
        if gap_sum == 0.0 {
            return 0.0;
        }
        if self.range_sum == 0.0 {
            return 1.0;
        }
        gap_sum / (self.range_sum + gap_sum)
    }

    /// Separation probability with the masked coordinates excluded from both
    /// the gaps and nothing else; used by multi-path traversals over points
    /// with missing values.
    pub fn probability_of_separation_masked(&self, point: &[T], masked: &[bool]) -> f64 {
        let mut gap_sum = 0.0;
        for (((&lo, &x), &hi), &skip) in self
            .min_values
            .iter()
            .zip(point)
            .zip(&self.max_values)
            .zip(masked)
        {
            if skip {
                continue;
            }
            if x < lo {
                gap_sum += lo.as_f64() - x.as_f64();
            } else if x > hi {
                gap_sum += x.as_f64() - hi.as_f64();
            }
        }
        if gap_sum == 0.0 {
            return 0.0;
        }
        if self.range_sum == 0.0 {
            return 1.0;
        }
        gap_sum / (self.range_sum + gap_sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_updates_range_sum_incrementally() {
        let mut bbox = BoundingBox::from_point(&[1.0f32, 2.0]);
        assert!(bbox.is_point());
        assert!(bbox.extend_with_point(&[1.0, 2.0]));
        assert!(!bbox.extend_with_point(&[3.0, 0.0]));
        assert_eq!(bbox.range_sum(), 4.0);
        assert_eq!(bbox.min_values(), &[1.0, 0.0]);
        assert_eq!(bbox.max_values(), &[3.0, 2.0]);

        let other = BoundingBox::from_points(&[-1.0f32, 1.0], &[0.0, 1.0]);
        bbox.extend_with_box(&other);
        assert_eq!(bbox.range_sum(), 6.0);
    }

    #[test]
    fn contains_is_inclusive() {
        let bbox = BoundingBox::from_points(&[0.0f64, 0.0], &[2.0, 2.0]);
        assert!(bbox.contains(&[0.0, 2.0]));
        assert!(bbox.contains(&[1.0, 1.0]));
        assert!(!bbox.contains(&[2.0, 2.1]));
    }

    #[test]
    fn separation_probability_matches_range_growth() {
        let bbox = BoundingBox::from_points(&[0.0f32, 0.0], &[1.0, 1.0]);
        assert_eq!(bbox.probability_of_separation(&[0.5, 0.5]), 0.0);
        // gap of 1.0 against a range sum of 2.0
        let p = bbox.probability_of_separation(&[2.0, 0.5]);
        assert!((p - 1.0 / 3.0).abs() < 1e-12);
        // a point box separates any distinct point with certainty
        let degenerate = BoundingBox::from_point(&[1.0f32, 1.0]);
        assert_eq!(degenerate.probability_of_separation(&[1.0, 2.0]), 1.0);
    }

    #[test]
    fn masked_separation_ignores_missing_coordinates() {
        let bbox = BoundingBox::from_points(&[0.0f32, 0.0], &[1.0, 1.0]);
        let p = bbox.probability_of_separation_masked(&[5.0, 0.5], &[true, false]);
        assert_eq!(p, 0.0);
        let q = bbox.probability_of_separation_masked(&[5.0, 2.0], &[true, false]);
        assert!((q - 1.0 / 3.0).abs() < 1e-12);
    }
}
