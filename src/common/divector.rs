/// A directional vector with a low-side and a high-side component per
/// dimension.
///
/// Attribution uses a `DiVector` to record whether a query point's anomaly
/// score comes from a coordinate being unusually low or unusually high; the
/// component-wise total reproduces the scalar score.
#[derive(Clone, Debug, PartialEq)]
pub struct DiVector {
    pub low: Vec<f64>,
    pub high: Vec<f64>,
}

impl DiVector {
    pub fn empty(dimensions: usize) -> Self {
        DiVector {
            low: vec![0.0; dimensions],
            high: vec![0.0; dimensions],
        }
    }

    pub fn new(low: &[f64], high: &[f64]) -> Self {
        assert!(low.len() == high.len(), "mismatched lengths");
        DiVector {
            low: Vec::from(low),
            high: Vec::from(high),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.high.len()
    }

    pub fn total(&self) -> f64 {
        self.high.iter().sum::<f64>() + self.low.iter().sum::<f64>()
    }

    pub fn high_low_sum(&self, dimension: usize) -> f64 {
        self.high[dimension] + self.low[dimension]
    }

    pub fn scale(&mut self, factor: f64) {
        for x in self.high.iter_mut() {
            *x *= factor;
        }
        for x in self.low.iter_mut() {
            *x *= factor;
        }
    }

    pub fn add_to(&self, other: &mut DiVector) {
        for (x, &y) in other.high.iter_mut().zip(&self.high) {
            *x += y;
        }
        for (x, &y) in other.low.iter_mut().zip(&self.low) {
            *x += y;
        }
    }

    /// `self += other * factor`.
    pub fn add_from(&mut self, other: &DiVector, factor: f64) {
        for (x, &y) in self.high.iter_mut().zip(&other.high) {
            *x += y * factor;
        }
        for (x, &y) in self.low.iter_mut().zip(&other.low) {
            *x += y * factor;
        }
    }

    pub fn divide(&mut self, count: usize) {
        self.scale(1.0 / count as f64);
    }

    /// Rescales so the total equals `value`. A zero vector is filled
    /// uniformly, which keeps the total contract even when every direction
    /// contributed nothing.
    pub fn normalize(&mut self, value: f64) {
        let current = self.total();
        if current <= 0.0 {
            let v = value / (2.0 * self.high.len() as f64);
            self.high.fill(v);
            self.low.fill(v);
        } else {
            self.scale(value / current);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn totals_and_scaling() {
        let mut v = DiVector::new(&[0.0, 1.0], &[2.0, 3.0]);
        assert_eq!(v.total(), 6.0);
        assert_eq!(v.high_low_sum(1), 4.0);
        v.scale(0.5);
        assert_eq!(v.total(), 3.0);
    }

    #[test]
    fn normalize_preserves_total_contract() {
        let mut v = DiVector::new(&[1.0, 0.0], &[0.0, 3.0]);
        v.normalize(2.0);
        assert!((v.total() - 2.0).abs() < 1e-12);

        let mut zero = DiVector::empty(3);
        zero.normalize(1.5);
        assert!((zero.total() - 1.5).abs() < 1e-12);
    }

    #[test]
    fn add_from_is_scaled_accumulation() {
        let mut v = DiVector::empty(2);
        let w = DiVector::new(&[1.0, 0.0], &[0.0, 2.0]);
        v.add_from(&w, 0.5);
        assert_eq!(v.low[0], 0.5);
        assert_eq!(v.high[1], 1.0);
    }
}
