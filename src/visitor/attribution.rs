use crate::common::divector::DiVector;
use crate::errors::Result;
use crate::tree::nodeview::NodeView;
use crate::types::Scalar;
use crate::visitor::{Scoring, Visitor};

/// Anomaly attribution: the score recurrence of
/// [`AnomalyScoreVisitor`](crate::visitor::AnomalyScoreVisitor) carried out
/// directionally, so each dimension's low and high side receives the share
/// of the score that its separation gaps caused. The final vector is
/// rescaled to total exactly the scalar score.
///
/// When the query is already in the sample the recurrence runs against the
/// shadow box, the counterfactual sample without that point, otherwise its
/// attribution would collapse to the duplicate leaf.
pub struct AttributionVisitor {
    scoring: Scoring,
    tree_mass: usize,
    score: f64,
    converged: bool,
    hit_duplicate: bool,
    use_shadow: bool,
    attribution: DiVector,
    probability: DiVector,
}

impl AttributionVisitor {
    pub fn new(tree_mass: usize, dimensions: usize, scoring: Scoring) -> Self {
        AttributionVisitor {
            scoring,
            tree_mass,
            score: 0.0,
            converged: false,
            hit_duplicate: false,
            use_shadow: false,
            attribution: DiVector::empty(dimensions),
            probability: DiVector::empty(dimensions),
        }
    }
}

impl<T: Scalar> Visitor<T> for AttributionVisitor {
    type Output = DiVector;

    fn accept_leaf(&mut self, point: &[T], view: &NodeView<T>) {
        let mass = view.mass();
        if mass > self.scoring.ignore_mass {
            if view.is_duplicate() {
                self.score = (self.scoring.damp)(mass, self.tree_mass)
                    * (self.scoring.score_seen)(view.depth(), mass);
                self.hit_duplicate = true;
                self.use_shadow = true;
            } else {
                self.score = (self.scoring.score_unseen)(view.depth(), mass);
                view.assign_directional_separation(point, &mut self.probability);
                debug_assert!((self.probability.total() - 1.0).abs() < 1e-6);
                self.attribution.add_from(&self.probability, self.score);
            }
        } else {
            self.score = (self.scoring.score_unseen)(view.depth(), mass);
            self.use_shadow = true;
        }
    }

    fn accept(&mut self, point: &[T], view: &NodeView<T>) {
        if self.converged {
            return;
        }
        view.assign_directional_separation(point, &mut self.probability);
        let probability = self.probability.total();
        if probability == 0.0 {
            self.converged = true;
        } else {
            let new_value = (self.scoring.score_unseen)(view.depth(), view.mass());
            if !self.hit_duplicate {
                self.score = (1.0 - probability) * self.score + probability * new_value;
            }
            self.attribution.scale(1.0 - probability);
            self.attribution.add_from(&self.probability, new_value);
        }
    }

    fn result(&self) -> Result<DiVector> {
        let total = (self.scoring.normalizer)(self.score, self.tree_mass);
        let mut answer = self.attribution.clone();
        answer.normalize(total);
        Ok(answer)
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn needs_box(&self) -> bool {
        true
    }

    fn use_shadow_box(&self) -> bool {
        self.use_shadow
    }
}
