use crate::errors::{ForestError, Result};
use crate::tree::boundingbox::BoundingBox;
use crate::types::Scalar;

/// A random cut: a dimension and a value splitting a bounding box into the
/// half-open intervals `[min, value]` and `(value, max]` along that
/// dimension. Points with `point[dimension] <= value` go left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cut<T> {
    pub dimension: usize,
    pub value: T,
}

impl<T: Scalar> Cut<T> {
    pub fn new(dimension: usize, value: T) -> Self {
        Cut { dimension, value }
    }

    /// Draws a cut uniformly over the total range of `bounding_box` using
    /// `factor` in `[0, 1)` as the uniform variate: dimensions are weighted
    /// by their ranges and the offset within the chosen dimension is the
    /// remainder of the accumulation walk.
    ///
    /// When the drawn value rounds onto the maximum of the chosen dimension
    /// it is snapped one representable value down, so the half-open contract
    /// holds for adjacent floats as well.
    pub fn random(factor: f64, bounding_box: &BoundingBox<T>) -> Result<Cut<T>> {
        if bounding_box.range_sum() <= 0.0 {
            return Err(ForestError::DegenerateBox);
        }
        let mut remainder = factor * bounding_box.range_sum();
        let mut chosen = None;
        for dimension in 0..bounding_box.dimensions() {
            let range = bounding_box.range(dimension);
            if range <= 0.0 {
                continue;
            }
            chosen = Some(dimension);
            if remainder < range {
                break;
            }
            remainder -= range;
        }
        // rounding in the walk can step past the final positive range; the
        // last such dimension then takes the cut at its upper end
        let dimension = chosen.ok_or(ForestError::DegenerateBox)?;
        let range = bounding_box.range(dimension);
        let low = bounding_box.min_values()[dimension];
        let high = bounding_box.max_values()[dimension];
        let mut value = T::of_f64(low.as_f64() + remainder.min(range));
        // conversion to the component type may round onto the maximum
        if value >= high {
            value = high.next_below();
        }
        if value < low {
            value = low;
        }
        Ok(Cut::new(dimension, value))
    }

    /// Whether this cut, drawn on `bounding_box` merged with `point`, lands
    /// outside the unmerged box on its dimension and therefore separates the
    /// point from everything the box covers.
    pub fn separates(&self, bounding_box: &BoundingBox<T>, point: &[T]) -> bool {
        let low = bounding_box.min_values()[self.dimension];
        let high = bounding_box.max_values()[self.dimension];
        let x = point[self.dimension];
        (x <= self.value && self.value < low) || (high <= self.value && self.value < x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_range_box_is_rejected() {
        let bbox = BoundingBox::from_point(&[1.0f32, 2.0]);
        assert_eq!(
            Cut::random(0.5, &bbox).unwrap_err(),
            ForestError::DegenerateBox
        );
    }

    #[test]
    fn cut_lands_in_the_weighted_dimension() {
        // ranges 1.0 and 3.0; a factor of 0.5 walks past dimension 0
        let bbox = BoundingBox::from_points(&[0.0f32, 0.0], &[1.0, 3.0]);
        let cut = Cut::random(0.5, &bbox).unwrap();
        assert_eq!(cut.dimension, 1);
        assert!((cut.value - 1.0).abs() < 1e-6);

        let cut = Cut::random(0.1, &bbox).unwrap();
        assert_eq!(cut.dimension, 0);
    }

    #[test]
    fn cut_value_stays_strictly_below_the_maximum() {
        let low = 48.08f32;
        let high = f32::from_bits(low.to_bits() + 1);
        let bbox = BoundingBox::from_points(&[low], &[high]);
        for factor in [0.0, 0.25, 0.5, 0.9999] {
            let cut = Cut::random(factor, &bbox).unwrap();
            assert_eq!(cut.dimension, 0);
            assert!(cut.value >= low && cut.value < high);
        }
    }

    #[test]
    fn separation_requires_the_value_between_point_and_box() {
        let bbox = BoundingBox::from_points(&[0.0f32, 0.0], &[1.0, 1.0]);
        assert!(Cut::new(0, 1.5).separates(&bbox, &[2.0, 0.5]));
        assert!(Cut::new(0, -0.5).separates(&bbox, &[-1.0, 0.5]));
        assert!(!Cut::new(0, 0.5).separates(&bbox, &[2.0, 0.5]));
        // a cut on the other dimension never separates along this one
        assert!(!Cut::new(1, 0.5).separates(&bbox, &[2.0, 0.5]));
    }
}
