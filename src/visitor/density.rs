use crate::common::interpolation::InterpolationMeasure;
use crate::errors::Result;
use crate::tree::nodeview::NodeView;
use crate::types::Scalar;
use crate::visitor::{Scoring, Visitor};

/// Accumulates an [`InterpolationMeasure`] along the traversal: at every
/// box on the path the query is interpolated against the box bounds,
/// splitting mass, distance and probability mass across the escaping
/// directions. A finisher turns the measure into a scalar density or a
/// directional one.
pub struct InterpolationVisitor {
    scoring: Scoring,
    tree_mass: usize,
    score: f64,
    converged: bool,
    hit_duplicate: bool,
    use_shadow: bool,
    measure: InterpolationMeasure,
}

impl InterpolationVisitor {
    pub fn new(tree_mass: usize, dimensions: usize, scoring: Scoring) -> Self {
        InterpolationVisitor {
            scoring,
            tree_mass,
            score: 0.0,
            converged: false,
            hit_duplicate: false,
            use_shadow: false,
            measure: InterpolationMeasure::empty(dimensions, tree_mass as f64),
        }
    }
}

impl<T: Scalar> Visitor<T> for InterpolationVisitor {
    type Output = InterpolationMeasure;

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
                let bbox = view.bounding_box().expect("interpolation maintains the box");
                self.measure.update(point, bbox, self.score);
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
        let bbox = view.active_box().expect("interpolation maintains the box");
        let new_value = (self.scoring.score_unseen)(view.depth(), view.mass());
        let probability = self.measure.update(point, bbox, new_value);
        if probability == 0.0 {
            self.converged = true;
        } else if !self.hit_duplicate {
            self.score = (1.0 - probability) * self.score + probability * new_value;
        }
    }

    fn result(&self) -> Result<InterpolationMeasure> {
        let total = (self.scoring.normalizer)(self.score, self.tree_mass);
        let mut answer = self.measure.clone();
        answer.measure.normalize(total);
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
