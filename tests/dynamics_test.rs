mod common;

use cutforest::{ForestError, RandomCutForest, RandomCutForestBuilder};

#[test]
fn impute_recovers_a_correlated_coordinate() {
    // two tight clusters on the diagonal: knowing one coordinate pins the other
    let data = common::mixture(
        8_000,
        &[vec![0.0f32, 0.0], vec![5.0, 5.0]],
        &[vec![0.1; 2], vec![0.1; 2]],
        &[0.5, 0.5],
        43,
    )
    .data;
    let mut forest: RandomCutForest<f32> = RandomCutForestBuilder::new(2)
        .number_of_trees(30)
        .sample_size(128)
        .random_seed(101)
        .build()
        .unwrap();
    for point in &data {
        forest.update(point).unwrap();
    }

    let filled = forest.impute(&[5.0, 0.0], &[1]).unwrap();
    assert_eq!(filled.len(), 1);
    assert!((filled[0] - 5.0).abs() < 1.0, "imputed {}", filled[0]);

    let filled = forest.impute(&[0.0, 0.0], &[1]).unwrap();
    assert!(filled[0].abs() < 1.0, "imputed {}", filled[0]);
}

#[test]
fn impute_validates_positions() {
    let mut forest: RandomCutForest<f32> = RandomCutForestBuilder::new(3)
        .number_of_trees(5)
        .sample_size(32)
        .random_seed(1)
        .build()
        .unwrap();
    for i in 0..100 {
        forest.update(&[i as f32, 0.0, 1.0]).unwrap();
    }
    assert!(matches!(
        forest.impute(&[0.0, 0.0, 0.0], &[3]),
        Err(ForestError::InvalidArgument { .. })
    ));
}

#[test]
fn density_is_higher_where_the_data_lives() {
    let data = common::mixture(
        6_000,
        &[vec![0.0f32, 0.0, 0.0]],
        &[vec![0.5; 3]],
        &[1.0],
        47,
    )
    .data;
    let mut forest: RandomCutForest<f32> = RandomCutForestBuilder::new(3)
        .number_of_trees(20)
        .sample_size(128)
        .random_seed(7)
        .build()
        .unwrap();
    for point in &data {
        forest.update(point).unwrap();
    }
    let inside = forest.density(&[0.0, 0.0, 0.0]).unwrap();
    let outside = forest.density(&[20.0, 20.0, 20.0]).unwrap();
    assert!(inside >= 0.0 && outside >= 0.0);
    assert!(inside > outside);

    let directional = forest.directional_density(&[20.0, 0.0, 0.0]).unwrap();
    // mass escapes toward the high side of dimension 0
    assert!(directional.high[0] >= directional.low[0]);
}

#[test]
fn neighbors_come_from_the_sample_sorted_by_distance() {
    let data = common::mixture(
        4_000,
        &[vec![0.0f32, 0.0], vec![8.0, 8.0]],
        &[vec![0.2; 2], vec![0.2; 2]],
        &[0.5, 0.5],
        59,
    )
    .data;
    let mut forest: RandomCutForest<f32> = RandomCutForestBuilder::new(2)
        .number_of_trees(20)
        .sample_size(64)
        .store_sequence_indexes(true)
        .random_seed(3)
        .build()
        .unwrap();
    for point in &data {
        forest.update(point).unwrap();
    }

    let neighbors = forest.neighbors(&[0.0, 0.0], 1.0).unwrap();
    assert!(!neighbors.is_empty());
    for pair in neighbors.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    for neighbor in &neighbors {
        assert!(neighbor.distance <= 1.0);
        assert!(neighbor.point[0].abs() < 2.0 && neighbor.point[1].abs() < 2.0);
        let sequences = neighbor.sequence_indexes.as_ref().unwrap();
        assert!(!sequences.is_empty());
    }

    // nothing sampled lives near the midpoint
    assert!(forest.neighbors(&[4.0, 4.0], 0.5).unwrap().is_empty());
}

#[test]
fn extrapolation_requires_internal_shingling() {
    let forest: RandomCutForest<f32> = RandomCutForestBuilder::new(4)
        .number_of_trees(5)
        .random_seed(1)
        .build()
        .unwrap();
    assert!(matches!(
        forest.extrapolate(2),
        Err(ForestError::InvalidArgument { .. })
    ));
}

#[test]
fn internal_shingling_takes_base_width_inputs() {
    let shingle_size = 4;
    let values = common::multi_cosine(3_000, &[60], &[10.0], 0.5, 67);
    let mut forest: RandomCutForest<f32> = RandomCutForestBuilder::new(shingle_size)
        .number_of_trees(20)
        .sample_size(128)
        .internal_shingling(true)
        .shingle_size(shingle_size)
        .random_seed(29)
        .build()
        .unwrap();

    for (i, value) in values.iter().enumerate() {
        forest.update(value).unwrap();
        // the shingle warms up before the first real update
        if i < shingle_size - 1 {
            assert_eq!(forest.total_updates(), 0);
        }
    }
    assert_eq!(
        forest.total_updates(),
        (values.len() - (shingle_size - 1)) as u64
    );

    // base-width queries are lifted through the rolling shingle
    let score = forest.score(&[values[values.len() - 1][0]]).unwrap();
    assert!(score.is_finite());
    let spike = forest.score(&[80.0]).unwrap();
    assert!(spike > score);
}

#[test]
fn extrapolation_stays_in_the_signal_range() {
    let shingle_size = 4;
    let horizon = 5;
    let values = common::multi_cosine(4_000, &[60], &[10.0], 0.3, 71);
    let mut forest: RandomCutForest<f32> = RandomCutForestBuilder::new(shingle_size)
        .number_of_trees(30)
        .sample_size(256)
        .internal_shingling(true)
        .shingle_size(shingle_size)
        .random_seed(83)
        .build()
        .unwrap();
    for value in &values {
        forest.update(value).unwrap();
    }

    let forecast = forest.extrapolate(horizon).unwrap();
    assert_eq!(forecast.values.len(), horizon);
    assert_eq!(forecast.upper.len(), horizon);
    assert_eq!(forecast.lower.len(), horizon);
    for i in 0..horizon {
        assert!(forecast.lower[i] <= forecast.values[i]);
        assert!(forecast.values[i] <= forecast.upper[i]);
        assert!(
            forecast.values[i].abs() < 15.0,
            "forecast escaped the signal range: {}",
            forecast.values[i]
        );
    }
}

#[test]
fn center_of_mass_stays_within_the_data_range() {
    let data = common::mixture(
        2_000,
        &[vec![2.0f32, -3.0]],
        &[vec![0.5; 2]],
        &[1.0],
        73,
    )
    .data;
    let mut forest: RandomCutForest<f32> = RandomCutForestBuilder::new(2)
        .number_of_trees(10)
        .sample_size(64)
        .center_of_mass(true)
        .random_seed(31)
        .build()
        .unwrap();
    for point in &data {
        forest.update(point).unwrap();
    }
    for component in forest.components() {
        let center = component
            .tree()
            .center_of_mass(forest.point_store())
            .unwrap();
        assert!((center[0] - 2.0).abs() < 1.0);
        assert!((center[1] + 3.0).abs() < 1.0);
    }
}
