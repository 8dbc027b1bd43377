use crate::errors::Result;
use crate::tree::nodeview::NodeView;
use crate::types::Scalar;
use crate::visitor::{linf_distance, Visitor};

/// Reports the sampled point the traversal resolves to, with its L-infinity
/// distance from the query. The up-walk carries no information for this
/// query, so the visitor converges at the leaf.
pub struct NearNeighborVisitor {
    candidate: Option<(u32, f64)>,
}

impl NearNeighborVisitor {
    pub fn new() -> Self {
        NearNeighborVisitor { candidate: None }
    }
}

impl Default for NearNeighborVisitor {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Scalar> Visitor<T> for NearNeighborVisitor {
    type Output = Option<(u32, f64)>;

    fn accept_leaf(&mut self, point: &[T], view: &NodeView<T>) {
        let distance = linf_distance(point, view.leaf_point());
        self.candidate = Some((view.leaf_ref(), distance));
    }

    fn accept(&mut self, _point: &[T], _view: &NodeView<T>) {}

    fn result(&self) -> Result<Option<(u32, f64)>> {
        Ok(self.candidate)
    }

    fn is_converged(&self) -> bool {
        self.candidate.is_some()
    }
}
