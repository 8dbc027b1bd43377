mod common;

use cutforest::{RandomCutForest, RandomCutForestBuilder};

fn trained_forest(dimensions: usize, seed: u64) -> (RandomCutForest<f32>, Vec<Vec<f32>>) {
    let mut near = vec![0.0f32; dimensions];
    let mut far = vec![0.0f32; dimensions];
    near[0] = 5.0;
    far[0] = -5.0;
    let data = common::mixture(
        6_000,
        &[near, far],
        &[vec![0.2; dimensions], vec![0.2; dimensions]],
        &[0.5, 0.5],
        seed,
    )
    .data;
    let mut forest: RandomCutForest<f32> = RandomCutForestBuilder::new(dimensions)
        .number_of_trees(20)
        .sample_size(128)
        .random_seed(seed ^ 0x5eed)
        .build()
        .unwrap();
    for point in &data {
        forest.update(point).unwrap();
    }
    (forest, data)
}

#[test]
fn attribution_totals_reproduce_the_score() {
    let dimensions = 4;
    let (forest, data) = trained_forest(dimensions, 7);

    // probe with seen points, unseen inliers and outliers
    let mut probes: Vec<Vec<f32>> = data.iter().rev().take(10).cloned().collect();
    probes.push(vec![0.0; dimensions]);
    probes.push(vec![25.0; dimensions]);
    probes.push(vec![-25.0, 0.0, 0.0, 3.0]);

    for probe in &probes {
        let score = forest.score(probe).unwrap();
        let attribution = forest.attribution(probe).unwrap();
        assert!(
            (score - attribution.total()).abs() < 1e-10,
            "score {} vs attribution total {}",
            score,
            attribution.total()
        );
    }
}

#[test]
fn attribution_identifies_the_deviating_dimension_and_side() {
    let dimensions = 4;
    let (forest, _) = trained_forest(dimensions, 19);

    // an inlier except for a large spike in dimension 2
    let mut probe = vec![0.0f32; dimensions];
    probe[0] = 5.0;
    probe[2] = 30.0;
    let attribution = forest.attribution(&probe).unwrap();
    let total = attribution.total();
    assert!(total > 0.0);
    assert!(
        attribution.high[2] > 0.5 * total,
        "spike dimension carries {} of {}",
        attribution.high[2],
        total
    );
    assert!(attribution.low[2] < attribution.high[2]);

    // and the mirrored dip attributes to the low side
    probe[2] = -30.0;
    let attribution = forest.attribution(&probe).unwrap();
    assert!(attribution.low[2] > 0.5 * attribution.total());
}

#[test]
fn attribution_of_sampled_points_stays_small() {
    let dimensions = 3;
    let (forest, data) = trained_forest(dimensions, 23);
    let seen = &data[data.len() - 1];
    let seen_total = forest.attribution(seen).unwrap().total();
    let outlier_total = forest.attribution(&vec![40.0; dimensions]).unwrap().total();
    assert!(seen_total < outlier_total);
}
