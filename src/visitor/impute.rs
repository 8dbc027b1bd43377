use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::errors::{check_argument, Result};
use crate::tree::nodeview::NodeView;
use crate::types::Scalar;
use crate::visitor::{l1_distance, MultiVisitor, Scoring, Visitor};

/// One tree's proposal for completing a partially observed point.
#[derive(Clone, Debug)]
pub struct ImputeCandidate<T> {
    pub score: f64,
    pub completion: Vec<T>,
    pub distance: f64,
}

/// Multi-path imputation. The traversal splits wherever the cut dimension
/// is missing from the query; every explored leaf proposes the completion
/// taken from its point, scored by the usual recurrence, and branch pairs
/// keep the proposal with the lower adjusted score.
///
/// `centrality` interpolates between ranking strictly by anomaly score (1)
/// and a uniformly random draw among the leaves reached (0); the random
/// tie-break stream makes the latter deterministic per seed.
pub struct ImputeVisitor<T> {
    scoring: Scoring,
    tree_mass: usize,
    centrality: f64,
    missing: Vec<usize>,
    missing_mask: Vec<bool>,
    rng: ChaCha20Rng,
    stack: Vec<Branch<T>>,
    use_shadow: bool,
}

struct Branch<T> {
    converged: bool,
    score: f64,
    tie_break: f64,
    completion: Vec<T>,
    distance: f64,
}

impl<T: Scalar> ImputeVisitor<T> {
    pub fn new(
        missing: &[usize],
        dimensions: usize,
        tree_mass: usize,
        centrality: f64,
        seed: u64,
        scoring: Scoring,
    ) -> Self {
        let mut missing_mask = vec![false; dimensions];
        for &i in missing {
            missing_mask[i] = true;
        }
        ImputeVisitor {
            scoring,
            tree_mass,
            centrality,
            missing: Vec::from(missing),
            missing_mask,
            rng: ChaCha20Rng::seed_from_u64(seed),
            stack: Vec::new(),
            use_shadow: false,
        }
    }

    /// Scores vary between the anomaly score and a pure random rank with
    /// `centrality`; these are the centrality = 1 and 0 extremes.
    fn adjusted_score(&self, branch: &Branch<T>) -> f64 {
        self.centrality * (self.scoring.normalizer)(branch.score, self.tree_mass)
            + (1.0 - self.centrality) * branch.tie_break
    }
}

impl<T: Scalar> Visitor<T> for ImputeVisitor<T> {
    type Output = ImputeCandidate<T>;

    fn accept_leaf(&mut self, point: &[T], view: &NodeView<T>) {
        let mass = view.mass();
        let leaf_point = view.leaf_point();
        let mut completion = Vec::from(point);
        for &i in self.missing.iter() {
            completion[i] = leaf_point[i];
        }

        let mut converged = false;
        let score;
        if mass > self.scoring.ignore_mass || !self.missing.is_empty() {
            if view.is_duplicate() {
                score = (self.scoring.damp)(mass, self.tree_mass)
                    * (self.scoring.score_seen)(view.depth(), mass);
                converged = true;
            } else {
                score = (self.scoring.score_unseen)(view.depth(), mass);
            }
        } else {
            // the shadow box is undefined under missing values; this branch
            // only arises for fully observed queries with ignored mass
            score = (self.scoring.score_unseen)(view.depth(), mass);
            self.use_shadow = true;
        }
        let distance = l1_distance(&completion, leaf_point);
        self.stack.push(Branch {
            converged,
            score,
            tie_break: self.rng.gen::<f64>(),
            completion,
            distance,
        });
    }

    fn accept(&mut self, _point: &[T], view: &NodeView<T>) {
        let top = self.stack.last_mut().expect("accept without a leaf");
        if top.converged {
            return;
        }
        let probability = if self.use_shadow {
            view.shadow_probability_of_separation()
        } else {
            view.probability_of_separation()
        };
        if probability == 0.0 {
            top.converged = true;
        } else {
            top.score = (1.0 - probability) * top.score
                + probability * (self.scoring.score_unseen)(view.depth(), view.mass());
        }
    }

    fn result(&self) -> Result<ImputeCandidate<T>> {
        check_argument(self.stack.len() == 1, "unbalanced impute traversal")?;
        let branch = self.stack.last().expect("length checked");
        Ok(ImputeCandidate {
            score: (self.scoring.normalizer)(branch.score, self.tree_mass),
            completion: branch.completion.clone(),
            distance: branch.distance,
        })
    }

    fn is_converged(&self) -> bool {
        self.stack.last().map_or(false, |branch| branch.converged)
    }

    fn use_shadow_box(&self) -> bool {
        self.use_shadow
    }
}

impl<T: Scalar> MultiVisitor<T> for ImputeVisitor<T> {
    fn split_below(&self, view: &NodeView<T>) -> bool {
        self.missing_mask[view.cut_dimension()]
    }

    fn combine_branches(&mut self, _point: &[T], _view: &NodeView<T>) {
        let second = self.stack.pop().expect("combine requires two branches");
        let first = self.stack.pop().expect("combine requires two branches");
        let converged = first.converged || second.converged;
        let mut winner = if self.adjusted_score(&second) < self.adjusted_score(&first) {
            second
        } else {
            first
        };
        winner.converged = converged;
        self.stack.push(winner);
    }
}
