//! Stream generators shared by the integration tests.
#![allow(dead_code)]

use std::f32::consts::PI;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

pub struct LabeledData {
    pub data: Vec<Vec<f32>>,
    pub labels: Vec<usize>,
}

fn gaussian(mean: f32, scale: f32, rng: &mut ChaCha20Rng) -> f32 {
    let mut r = f64::sqrt(-2.0 * f64::ln(rng.gen::<f64>())) as f32;
    while r.is_infinite() {
        r = f64::sqrt(-2.0 * f64::ln(rng.gen::<f64>())) as f32;
    }
    if rng.gen::<f32>() < 0.5 {
        mean + scale * r * f32::cos(2.0 * PI * rng.gen::<f32>())
    } else {
        mean + scale * r * f32::sin(2.0 * PI * rng.gen::<f32>())
    }
}

/// A stream drawn from a weighted mixture of axis-aligned gaussians.
pub fn mixture(
    num: usize,
    means: &[Vec<f32>],
    scales: &[Vec<f32>],
    weights: &[f32],
    seed: u64,
) -> LabeledData {
    assert!(!means.is_empty() && means.len() == scales.len());
    assert!(weights.len() == means.len());
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let total: f32 = weights.iter().sum();
    let mut data = Vec::with_capacity(num);
    let mut labels = Vec::with_capacity(num);
    for _ in 0..num {
        let mut pick = total * rng.gen::<f32>();
        let mut label = 0;
        while pick > weights[label] && label + 1 < weights.len() {
            pick -= weights[label];
            label += 1;
        }
        let point = means[label]
            .iter()
            .zip(&scales[label])
            .map(|(&m, &s)| gaussian(m, s, &mut rng))
            .collect();
        data.push(point);
        labels.push(label);
    }
    LabeledData { data, labels }
}

/// A noisy multi-dimensional cosine stream, one period per dimension.
pub fn multi_cosine(
    num: usize,
    periods: &[usize],
    amplitudes: &[f32],
    noise: f32,
    seed: u64,
) -> Vec<Vec<f32>> {
    assert!(periods.len() == amplitudes.len());
    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let phases: Vec<usize> = periods.iter().map(|&p| rng.gen_range(0..p)).collect();
    (0..num)
        .map(|i| {
            periods
                .iter()
                .zip(amplitudes)
                .zip(&phases)
                .map(|((&period, &amplitude), &phase)| {
                    amplitude * (2.0 * PI * (i + phase) as f32 / period as f32).cos()
                        + noise * rng.gen::<f32>()
                })
                .collect()
        })
        .collect()
}
