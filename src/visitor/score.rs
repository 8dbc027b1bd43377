use crate::errors::Result;
use crate::tree::nodeview::NodeView;
use crate::types::Scalar;
use crate::visitor::{Scoring, Visitor};

/// The standard recursive anomaly score.
///
/// At the leaf the score depends on whether the query is already in the
/// sample; each ancestor then mixes in the chance that a random cut there
/// would have separated the query from the subtree. Once the query falls
/// inside a subtree box no ancestor can change the score and the traversal
/// converges.
pub struct AnomalyScoreVisitor {
    scoring: Scoring,
    tree_mass: usize,
    score: f64,
    converged: bool,
    use_shadow: bool,
}

impl AnomalyScoreVisitor {
    pub fn new(tree_mass: usize, scoring: Scoring) -> Self {
        AnomalyScoreVisitor {
            scoring,
            tree_mass,
            score: 0.0,
            converged: false,
            use_shadow: false,
        }
    }
}

impl<T: Scalar> Visitor<T> for AnomalyScoreVisitor {
    type Output = f64;

    fn accept_leaf(&mut self, _point: &[T], view: &NodeView<T>) {
        let mass = view.mass();
        if mass > self.scoring.ignore_mass {
            if view.is_duplicate() {
                self.score = (self.scoring.damp)(mass, self.tree_mass)
                    * (self.scoring.score_seen)(view.depth(), mass);
                self.converged = true;
            } else {
                self.score = (self.scoring.score_unseen)(view.depth(), mass);
            }
        } else {
            self.score = (self.scoring.score_unseen)(view.depth(), mass);
            self.use_shadow = true;
        }
    }

    fn accept(&mut self, _point: &[T], view: &NodeView<T>) {
        if self.converged {
            return;
        }
        let probability = if self.use_shadow {
            view.shadow_probability_of_separation()
        } else {
            view.probability_of_separation()
        };
        if probability == 0.0 {
            self.converged = true;
        } else {
            self.score = (1.0 - probability) * self.score
                + probability * (self.scoring.score_unseen)(view.depth(), view.mass());
        }
    }

    fn result(&self) -> Result<f64> {
        Ok((self.scoring.normalizer)(self.score, self.tree_mass))
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn use_shadow_box(&self) -> bool {
        self.use_shadow
    }
}
