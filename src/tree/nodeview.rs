use crate::common::divector::DiVector;
use crate::errors::Result;
use crate::pointstore::PointStore;
use crate::tree::boundingbox::BoundingBox;
use crate::tree::nodestore::NodeStore;
use crate::types::Scalar;

/// The traversal state handed to visitors: one view is created per
/// traversal, positioned at the leaf first and then moved ancestor by
/// ancestor toward the root.
///
/// When `maintain_box` is set (visitors that need directional information,
/// or sparse box caches) the view carries the subtree box of the current
/// node along the path, growing it by the sibling subtree at every step;
/// otherwise separation probabilities come from the node store's cache.
///
/// The shadow box is the union of the sibling subtrees alone. It excludes
/// the traversal leaf and is the counterfactual used when the query point
/// itself is in the sample (or its leaf is mass-ignored): "what would the
/// box look like had this point not been inserted".
pub struct NodeView<T> {
    node: u32,
    depth: usize,
    mass: usize,
    probability: f64,
    shadow_probability: f64,
    leaf_ref: u32,
    leaf_point: Vec<T>,
    duplicate: bool,
    cut_dimension: usize,
    cut_value: T,
    path_box: Option<BoundingBox<T>>,
    shadow_box: Option<BoundingBox<T>>,
    use_shadow: bool,
    maintain_box: bool,
}

impl<T: Scalar> NodeView<T> {
    pub(crate) fn new(maintain_box: bool) -> Self {
        NodeView {
            node: crate::types::NIL,
            depth: 0,
            mass: 0,
            probability: f64::MAX,
            shadow_probability: f64::MAX,
            leaf_ref: crate::types::NIL,
            leaf_point: Vec::new(),
            duplicate: false,
            cut_dimension: usize::MAX,
            cut_value: T::zero(),
            path_box: None,
            shadow_box: None,
            use_shadow: false,
            maintain_box,
        }
    }

    // ---- visitor-facing accessors ---------------------------------------

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn mass(&self) -> usize {
        self.mass
    }

    /// Probability that a random cut separates the query from the current
    /// node's subtree box.
    pub fn probability_of_separation(&self) -> f64 {
        self.probability
    }

    pub fn shadow_probability_of_separation(&self) -> f64 {
        self.shadow_probability
    }

    pub fn leaf_ref(&self) -> u32 {
        self.leaf_ref
    }

    pub fn leaf_point(&self) -> &[T] {
        &self.leaf_point
    }

    /// Whether the traversal leaf holds exactly the query point.
    pub fn is_duplicate(&self) -> bool {
        self.duplicate
    }

    pub fn cut_dimension(&self) -> usize {
        self.cut_dimension
    }

    pub fn cut_value(&self) -> T {
        self.cut_value
    }

    pub fn bounding_box(&self) -> Option<&BoundingBox<T>> {
        self.path_box.as_ref()
    }

    /// The box separation probabilities are currently computed against: the
    /// shadow box once shadow accounting is active, the path box otherwise.
    pub fn active_box(&self) -> Option<&BoundingBox<T>> {
        if self.use_shadow {
            self.shadow_box.as_ref()
        } else {
            self.path_box.as_ref()
        }
    }

    /// Fills `out` with the per-dimension, per-side separation
    /// probabilities of the query against the current box (the shadow box
    /// when one is active); the total equals the scalar separation
    /// probability.
    pub fn assign_directional_separation(&self, point: &[T], out: &mut DiVector) {
        let bbox = if self.use_shadow {
            self.shadow_box.as_ref()
        } else {
            self.path_box.as_ref()
        }
        .expect("directional visitors maintain a path box");
        let min_values = bbox.min_values();
        let max_values = bbox.max_values();
        let mut gap_sum = 0.0;
        for i in 0..point.len() {
            let x = point[i].as_f64();
            let lo = min_values[i].as_f64();
            let hi = max_values[i].as_f64();
            out.low[i] = if x < lo { lo - x } else { 0.0 };
            out.high[i] = if x > hi { x - hi } else { 0.0 };
            gap_sum += out.low[i] + out.high[i];
        }
        if gap_sum > 0.0 {
            out.scale(1.0 / (bbox.range_sum() + gap_sum));
        }
    }

    // ---- tree-facing state transitions ----------------------------------

    pub(crate) fn at_leaf(
        &mut self,
        leaf: u32,
        depth: usize,
        point: &[T],
        store: &NodeStore<T>,
        points: &PointStore<T>,
    ) -> Result<()> {
        self.node = leaf;
        self.depth = depth;
        self.mass = store.mass(leaf);
        self.leaf_ref = store.point_ref(leaf);
        self.leaf_point = points.point(self.leaf_ref)?.to_vec();
        self.duplicate = self.leaf_point == point;
        self.probability = if self.duplicate { 0.0 } else { 1.0 };
        self.path_box = if self.maintain_box {
            Some(BoundingBox::from_point(&self.leaf_point))
        } else {
            None
        };
        self.shadow_box = None;
        Ok(())
    }

    /// Switches the remainder of the traversal to shadow-box accounting.
    /// Only meaningful directly after `at_leaf`.
    pub(crate) fn enable_shadow(&mut self) {
        self.use_shadow = true;
        if self.path_box.is_none() {
            self.path_box = Some(BoundingBox::from_point(&self.leaf_point));
        }
        self.maintain_box = true;
    }

    pub(crate) fn set_cut(&mut self, cut: (usize, T)) {
        self.cut_dimension = cut.0;
        self.cut_value = cut.1;
    }

    /// Moves to `parent` on the way up, growing the path (and shadow) box
    /// by the sibling subtree or falling back to the store's cached
    /// probabilities.
    pub(crate) fn ascend(
        &mut self,
        parent: u32,
        depth: usize,
        point: &[T],
        store: &NodeStore<T>,
        points: &PointStore<T>,
    ) -> Result<()> {
        let sibling = store.sibling(self.node, parent);
        if let Some(path_box) = self.path_box.as_mut() {
            if self.use_shadow {
                let sibling_box = store.bounding_box(sibling, points)?;
                path_box.extend_with_box(&sibling_box);
                match self.shadow_box.as_mut() {
                    Some(shadow) => shadow.extend_with_box(&sibling_box),
                    None => self.shadow_box = Some(sibling_box),
                }
                self.shadow_probability = self
                    .shadow_box
                    .as_ref()
                    .expect("just set")
                    .probability_of_separation(point);
            } else {
                store.grow_box_with_subtree(path_box, sibling, points)?;
            }
            self.probability = path_box.probability_of_separation(point);
        } else {
            self.probability = store.probability_of_separation(parent, point, points)?;
        }
        self.arrive_at(parent, depth, store);
        Ok(())
    }

    /// `ascend` for multi-path traversals: separation probabilities ignore
    /// the masked coordinates.
    pub(crate) fn ascend_masked(
        &mut self,
        parent: u32,
        depth: usize,
        point: &[T],
        masked: &[bool],
        store: &NodeStore<T>,
        points: &PointStore<T>,
    ) -> Result<()> {
        if let Some(path_box) = self.path_box.as_mut() {
            let sibling = store.sibling(self.node, parent);
            store.grow_box_with_subtree(path_box, sibling, points)?;
            self.probability = path_box.probability_of_separation_masked(point, masked);
        } else {
            self.probability =
                store.probability_of_separation_masked(parent, point, masked, points)?;
        }
        self.arrive_at(parent, depth, store);
        Ok(())
    }

    pub(crate) fn take_path_box(&mut self) -> Option<BoundingBox<T>> {
        self.path_box.take()
    }

    /// After both branches of a split have been traversed, fold the first
    /// branch's box back in and position the view at the split node.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn merge_up(
        &mut self,
        node: u32,
        depth: usize,
        saved_box: Option<BoundingBox<T>>,
        point: &[T],
        masked: &[bool],
        store: &NodeStore<T>,
        points: &PointStore<T>,
    ) -> Result<()> {
        if let Some(path_box) = self.path_box.as_mut() {
            let saved = saved_box.expect("both branch boxes are maintained together");
            path_box.extend_with_box(&saved);
            self.probability = path_box.probability_of_separation_masked(point, masked);
        } else {
            self.probability =
                store.probability_of_separation_masked(node, point, masked, points)?;
        }
        self.arrive_at(node, depth, store);
        Ok(())
    }

    fn arrive_at(&mut self, node: u32, depth: usize, store: &NodeStore<T>) {
        self.node = node;
        self.depth = depth;
        self.mass = store.mass(node);
        let (dimension, value) = store.cut_info(node);
        self.cut_dimension = dimension;
        self.cut_value = value;
    }
}
