use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::errors::{ForestError, Result};
use crate::pointstore::PointStore;
use crate::tree::boundingbox::BoundingBox;
use crate::tree::cut::Cut;
use crate::tree::nodestore::NodeStore;
use crate::tree::nodeview::NodeView;
use crate::types::{Scalar, NIL};
use crate::visitor::{MultiVisitor, Visitor};

/// A random cut tree over at most `capacity` point references.
///
/// Inserting a point draws candidate cuts on the boxes along its descent
/// path and splices a new internal node at the level closest to the root
/// whose cut separates the point from the subtree there; deleting splices
/// the leaf and its parent back out. Both maintain masses, cached bounding
/// boxes and (optionally) per-subtree point sums on the touched path only,
/// for expected logarithmic work per operation.
pub struct RandomCutTree<T> {
    dimensions: usize,
    store: NodeStore<T>,
    root: u32,
    mass: usize,
    rng: ChaCha20Rng,
}

impl<T: Scalar> RandomCutTree<T> {
    pub(crate) fn new(
        dimensions: usize,
        capacity: usize,
        cache_fraction: f64,
        store_sequences: bool,
        center_of_mass: bool,
        seed: u64,
    ) -> Self {
        RandomCutTree {
            dimensions,
            store: NodeStore::new(
                capacity,
                dimensions,
                cache_fraction,
                store_sequences,
                center_of_mass,
            ),
            root: NIL,
            mass: 0,
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    pub fn mass(&self) -> usize {
        self.mass
    }

    pub fn is_empty(&self) -> bool {
        self.root == NIL
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// The sequence-index multiset of a sampled point, when multisets are
    /// kept.
    pub fn sequences_of(&self, point_ref: u32) -> Option<Vec<u64>> {
        self.store.sequences_of(point_ref)
    }

    /// The mass-weighted mean of all sampled points.
    pub fn center_of_mass(&self, points: &PointStore<T>) -> Result<Vec<f64>> {
        if self.root == NIL {
            return Ok(vec![0.0; self.dimensions]);
        }
        let mut sum = self.store.subtree_sum(self.root, points)?;
        for x in sum.iter_mut() {
            *x /= self.mass as f64;
        }
        Ok(sum)
    }

    /// Inserts `point_ref`, returning the reference now holding the point:
    /// the input reference, or an existing leaf's when the point is a
    /// bitwise duplicate of one already sampled.
    pub(crate) fn insert(
        &mut self,
        point_ref: u32,
        sequence_index: u64,
        points: &PointStore<T>,
    ) -> Result<u32> {
        if self.root == NIL {
            self.root = self.store.leaf_index(point_ref);
            self.mass = 1;
            self.store.record_sequence(point_ref, sequence_index);
            return Ok(point_ref);
        }

        let point = points.point(point_ref)?;
        let mut path = Vec::new();
        self.store.descend_path(self.root, point, &mut path);
        let (leaf_node, leaf_sibling) = path.pop().expect("path holds at least the root");
        let leaf_ref = self.store.point_ref(leaf_node);
        let old_point = points.point(leaf_ref)?;

        if point == old_point {
            self.store.increase_leaf_mass(leaf_ref);
            self.store.record_sequence(leaf_ref, sequence_index);
            self.store.ancestors_after_insert(&mut path, point, true);
            self.mass += 1;
            return Ok(leaf_ref);
        }

        // Walk back toward the root, growing the subtree box level by level
        // and drawing one candidate cut per level on the box merged with the
        // point. The surviving candidate is the separating cut closest to
        // the root; levels above it that failed to separate are kept aside
        // so their masses and boxes can be fixed up after the splice.
        let mut current_box = BoundingBox::from_point(old_point);
        let mut saved_box = current_box.clone();
        let mut node = leaf_node;
        let mut sibling = leaf_sibling;
        let mut parent = path.last().map(|&(n, _)| n).unwrap_or(NIL);
        let mut saved_parent = parent;
        let mut saved_node = node;
        let mut saved_cut: Option<Cut<T>> = None;
        let mut above_splice: Vec<(u32, u32)> = Vec::new();

        loop {
            let factor: f64 = self.rng.gen();
            let merged = current_box.merged_with_point(point);
            let mut separated = false;
            if merged.range_sum() > current_box.range_sum() {
                let cut = Cut::random(factor, &merged)?;
                if cut.separates(&current_box, point) {
                    saved_cut = Some(cut);
                    saved_parent = parent;
                    saved_node = node;
                    saved_box = current_box.clone();
                    above_splice.clear();
                    separated = true;
                }
            }
            if !separated {
                above_splice.push((node, sibling));
            }
            if saved_cut.is_none() {
                return Err(ForestError::Internal {
                    msg: "no separating cut against a distinct leaf point",
                });
            }
            if parent == NIL {
                break;
            }
            self.store
                .grow_box_with_subtree(&mut current_box, sibling, points)?;
            let (next_node, next_sibling) = path.pop().expect("parent was recorded");
            node = next_node;
            sibling = next_sibling;
            parent = path.last().map(|&(n, _)| n).unwrap_or(NIL);
        }

        let cut = saved_cut.expect("checked in the loop");
        let merged_node = self.store.splice_internal(
            saved_parent,
            point,
            saved_node,
            point_ref,
            cut,
            &saved_box,
            points,
        )?;
        self.store.record_sequence(point_ref, sequence_index);
        self.mass += 1;

        if saved_parent == NIL {
            self.root = merged_node;
        } else {
            while let Some(entry) = above_splice.pop() {
                path.push(entry);
            }
            debug_assert!(path.last().map(|&(n, _)| n) == Some(saved_parent));
            self.store.ancestors_after_insert(&mut path, point, false);
        }
        Ok(point_ref)
    }

    /// Removes one instance of `(point_ref, sequence_index)`. Returns the
    /// reference the tree actually held, which is what refcount bookkeeping
    /// must release.
    pub(crate) fn remove(
        &mut self,
        point_ref: u32,
        sequence_index: u64,
        points: &PointStore<T>,
    ) -> Result<u32> {
        if self.root == NIL {
            return Err(ForestError::EmptyTree);
        }
        let point = points.point(point_ref)?;
        let mut path = Vec::new();
        self.store.descend_path(self.root, point, &mut path);
        let (leaf_node, leaf_sibling) = path.pop().expect("path holds at least the root");
        let leaf_ref = self.store.point_ref(leaf_node);

        if leaf_ref != point_ref && !points.equals(leaf_ref, point)? {
            return Err(ForestError::PointMismatch);
        }
        self.store.remove_sequence(leaf_ref, sequence_index)?;

        if self.store.decrease_leaf_mass(leaf_ref) > 0 {
            self.store
                .ancestors_after_delete(&mut path, point, true, points)?;
        } else if path.is_empty() {
            self.root = NIL;
        } else {
            let (parent_node, _) = path.pop().expect("non-empty");
            let grandparent = path.last().map(|&(n, _)| n).unwrap_or(NIL);
            if grandparent == NIL {
                self.root = leaf_sibling;
                self.store.set_root(leaf_sibling);
            } else {
                self.store.replace_child(grandparent, parent_node, leaf_sibling);
                self.store
                    .ancestors_after_delete(&mut path, point, false, points)?;
            }
            self.store.release_internal(parent_node);
        }
        self.mass -= 1;
        Ok(leaf_ref)
    }

    /// Single-path traversal: descend to the leaf the cuts select, then
    /// visit the leaf and every ancestor in leaf-to-root order.
    pub fn traverse<V: Visitor<T>>(
        &self,
        point: &[T],
        visitor: &mut V,
        points: &PointStore<T>,
    ) -> Result<()> {
        if self.root == NIL {
            return Err(ForestError::EmptyTree);
        }
        let mut path = Vec::new();
        self.store.descend_path(self.root, point, &mut path);
        let maintain = visitor.needs_box() || self.store.use_path_for_box();
        let mut view = NodeView::new(maintain);
        let (leaf_node, _) = *path.last().expect("non-empty");
        view.at_leaf(leaf_node, path.len() - 1, point, &self.store, points)?;
        visitor.accept_leaf(point, &view);
        if visitor.use_shadow_box() {
            view.enable_shadow();
        }
        for depth in (0..path.len() - 1).rev() {
            if visitor.is_converged() {
                break;
            }
            let (ancestor, _) = path[depth];
            view.ascend(ancestor, depth, point, &self.store, points)?;
            visitor.accept(point, &view);
        }
        Ok(())
    }

    /// Multi-path traversal: where the visitor asks to split (a masked
    /// coordinate on the cut dimension), both subtrees are explored and the
    /// branch results combined; elsewhere the descent is canonical.
    pub fn traverse_multi<V: MultiVisitor<T>>(
        &self,
        point: &[T],
        masked: &[bool],
        visitor: &mut V,
        points: &PointStore<T>,
    ) -> Result<()> {
        if self.root == NIL {
            return Err(ForestError::EmptyTree);
        }
        let maintain = visitor.needs_box() || self.store.use_path_for_box();
        let mut view = NodeView::new(maintain);
        self.multi_step(self.root, 0, point, masked, visitor, &mut view, points)
    }

    #[allow(clippy::too_many_arguments)]
    fn multi_step<V: MultiVisitor<T>>(
        &self,
        node: u32,
        depth: usize,
        point: &[T],
        masked: &[bool],
        visitor: &mut V,
        view: &mut NodeView<T>,
        points: &PointStore<T>,
    ) -> Result<()> {
        if self.store.is_leaf(node) {
            view.at_leaf(node, depth, point, &self.store, points)?;
            visitor.accept_leaf(point, view);
            return Ok(());
        }
        view.set_cut(self.store.cut_info(node));
        if visitor.split_below(view) {
            let left = self.store.left(node);
            let right = self.store.right(node);
            self.multi_step(left, depth + 1, point, masked, visitor, view, points)?;
            let saved_box = view.take_path_box();
            self.multi_step(right, depth + 1, point, masked, visitor, view, points)?;
            visitor.combine_branches(point, view);
            if !visitor.is_converged() {
                view.merge_up(node, depth, saved_box, point, masked, &self.store, points)?;
            }
        } else {
            let next = if self.store.is_left_of(node, point) {
                self.store.left(node)
            } else {
                self.store.right(node)
            };
            self.multi_step(next, depth + 1, point, masked, visitor, view, points)?;
            if !visitor.is_converged() {
                view.ascend_masked(node, depth, point, masked, &self.store, points)?;
            }
        }
        if !visitor.is_converged() {
            visitor.accept(point, view);
        }
        Ok(())
    }

    /// Approximate heap footprint in bytes.
    pub fn size(&self) -> usize {
        self.store.size() + core::mem::size_of::<Self>()
    }
}

#[cfg(test)]
impl<T: Scalar> RandomCutTree<T> {
    pub(crate) fn root_box(&self, points: &PointStore<T>) -> Result<BoundingBox<T>> {
        if self.root == NIL {
            return Err(ForestError::EmptyTree);
        }
        self.store.bounding_box(self.root, points)
    }

    /// Verifies the structural invariants over the whole tree: mass sums,
    /// parent links via the descent structure, cut separation of the two
    /// child subtrees and cached-box agreement with recomputation.
    pub(crate) fn check_consistency(&self, points: &PointStore<T>) -> Result<()> {
        if self.root == NIL {
            return crate::errors::check_argument(self.mass == 0, "empty tree with mass");
        }
        let (mass, _) = self.check_subtree(self.root, points)?;
        crate::errors::check_argument(mass == self.mass, "leaf masses do not sum to tree mass")
    }

    fn check_subtree(&self, node: u32, points: &PointStore<T>) -> Result<(usize, BoundingBox<T>)> {
        if self.store.is_leaf(node) {
            let point = points.point(self.store.point_ref(node))?;
            return Ok((self.store.mass(node), BoundingBox::from_point(point)));
        }
        let left = self.store.left(node);
        let right = self.store.right(node);
        for child in [left, right] {
            if self.store.is_internal(child) {
                crate::errors::check_argument(
                    self.store.parent_of(child) == node,
                    "child does not link back to its parent",
                )?;
            }
        }
        let (left_mass, left_box) = self.check_subtree(left, points)?;
        let (right_mass, right_box) = self.check_subtree(right, points)?;
        crate::errors::check_argument(
            self.store.mass(node) == left_mass + right_mass,
            "internal mass is not the sum of its children",
        )?;
        let (dimension, value) = self.store.cut_info(node);
        crate::errors::check_argument(
            left_box.max_values()[dimension] <= value
                && value < right_box.min_values()[dimension],
            "cut does not separate the children",
        )?;
        let mut bbox = left_box;
        bbox.extend_with_box(&right_box);
        if let Some(cached) = self.store.cached_box_of(node) {
            crate::errors::check_argument(
                cached.min_values() == bbox.min_values()
                    && cached.max_values() == bbox.max_values(),
                "cached box disagrees with recomputation",
            )?;
        }
        Ok((left_mass + right_mass, bbox))
    }
}

#[cfg(test)]
mod tests {
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha20Rng;

    use super::*;

    fn store_with(points: &[Vec<f32>]) -> (PointStore<f32>, Vec<u32>) {
        let dimensions = points[0].len();
        let mut store = PointStore::new(dimensions, points.len() + 4, points.len() + 4);
        let refs = points
            .iter()
            .map(|p| store.add(p).expect("store has room"))
            .collect();
        (store, refs)
    }

    #[test]
    fn first_insert_becomes_the_root_leaf() {
        let (store, refs) = store_with(&[vec![1.0, 2.0]]);
        let mut tree = RandomCutTree::new(2, 8, 1.0, false, false, 0);
        assert!(tree.is_empty());
        assert_eq!(tree.insert(refs[0], 0, &store).unwrap(), refs[0]);
        assert_eq!(tree.mass(), 1);
        tree.check_consistency(&store).unwrap();
    }

    #[test]
    fn duplicate_points_share_a_leaf() {
        let (store, refs) = store_with(&[vec![0.0, 0.0], vec![1.0, 1.0], vec![1.0, 1.0]]);
        let mut tree = RandomCutTree::new(2, 8, 1.0, false, false, 1);
        tree.insert(refs[0], 0, &store).unwrap();
        tree.insert(refs[1], 1, &store).unwrap();
        // the third point equals the second; the tree keeps the old reference
        assert_eq!(tree.insert(refs[2], 2, &store).unwrap(), refs[1]);
        assert_eq!(tree.mass(), 3);
        tree.check_consistency(&store).unwrap();

        // removing one instance leaves the leaf in place
        assert_eq!(tree.remove(refs[1], 1, &store).unwrap(), refs[1]);
        assert_eq!(tree.mass(), 2);
        tree.check_consistency(&store).unwrap();
    }

    #[test]
    fn mass_and_box_after_deletion() {
        let data = vec![
            vec![-1.0f32, -1.0],
            vec![1.0, 1.0],
            vec![-1.0, 0.0],
            vec![0.0, 1.0],
            vec![0.0, 1.0],
        ];
        let (store, refs) = store_with(&data);
        let mut tree = RandomCutTree::new(2, 8, 1.0, false, false, 99);
        for (i, &r) in refs.iter().enumerate() {
            tree.insert(r, i as u64, &store).unwrap();
        }
        assert_eq!(tree.mass(), 5);
        tree.check_consistency(&store).unwrap();

        tree.remove(refs[2], 2, &store).unwrap();
        assert_eq!(tree.mass(), 4);
        tree.check_consistency(&store).unwrap();
        let bbox = tree.root_box(&store).unwrap();
        assert_eq!(bbox.min_values(), &[-1.0, -1.0]);
        assert_eq!(bbox.max_values(), &[1.0, 1.0]);
    }

    #[test]
    fn deleting_from_an_empty_tree_fails() {
        let (store, refs) = store_with(&[vec![1.0f32]]);
        let mut tree = RandomCutTree::<f32>::new(1, 4, 1.0, false, false, 5);
        assert_eq!(
            tree.remove(refs[0], 0, &store).unwrap_err(),
            ForestError::EmptyTree
        );
    }

    #[test]
    fn deleting_a_point_not_in_the_tree_fails() {
        let (store, refs) = store_with(&[vec![1.0f32], vec![2.0f32]]);
        let mut tree = RandomCutTree::new(1, 4, 1.0, false, false, 5);
        tree.insert(refs[0], 0, &store).unwrap();
        assert_eq!(
            tree.remove(refs[1], 1, &store).unwrap_err(),
            ForestError::PointMismatch
        );
        assert_eq!(tree.mass(), 1);
    }

    #[test]
    fn sequence_multisets_guard_deletions() {
        let (store, refs) = store_with(&[vec![1.0f32, 0.0], vec![1.0, 0.0], vec![3.0, 4.0]]);
        let mut tree = RandomCutTree::new(2, 8, 1.0, true, false, 17);
        tree.insert(refs[0], 10, &store).unwrap();
        assert_eq!(tree.insert(refs[1], 11, &store).unwrap(), refs[0]);
        tree.insert(refs[2], 12, &store).unwrap();
        assert_eq!(tree.sequences_of(refs[0]).unwrap().len(), 2);

        assert_eq!(
            tree.remove(refs[0], 999, &store).unwrap_err(),
            ForestError::SequenceNotFound
        );
        assert_eq!(tree.mass(), 3, "failed delete must not change the tree");

        tree.remove(refs[0], 10, &store).unwrap();
        assert_eq!(tree.sequences_of(refs[0]).unwrap(), vec![11]);
        assert_eq!(tree.mass(), 2);
        tree.check_consistency(&store).unwrap();
    }

    #[test]
    fn adjacent_floats_survive_repeated_turnover() {
        let low = 48.08f32;
        let high = f32::from_bits(low.to_bits() + 1);
        let (store, refs) = store_with(&[vec![low], vec![high]]);
        let mut tree = RandomCutTree::new(1, 4, 1.0, false, false, 7);
        tree.insert(refs[0], 1, &store).unwrap();
        tree.insert(refs[1], 2, &store).unwrap();
        for i in 0..10_000u64 {
            let target = refs[(i % 2) as usize];
            tree.remove(target, i % 2 + 1, &store).unwrap();
            tree.insert(target, i % 2 + 1, &store).unwrap();
            if i % 1000 == 0 {
                tree.check_consistency(&store).unwrap();
            }
        }
        assert_eq!(tree.mass(), 2);
        assert_eq!(tree.store.internal_nodes_in_use(), 1);
        tree.check_consistency(&store).unwrap();
    }

    #[test]
    fn randomized_turnover_keeps_the_tree_consistent() {
        let mut rng = ChaCha20Rng::seed_from_u64(23);
        let dimensions = 3;
        let capacity = 64;
        let mut store = PointStore::<f32>::new(dimensions, 512, 64);
        let mut tree = RandomCutTree::new(dimensions, capacity, 0.7, false, false, 31);
        let mut live: Vec<(u32, u64)> = Vec::new();

        for seq in 0..2000u64 {
            if live.len() == capacity || (!live.is_empty() && rng.gen::<f32>() < 0.4) {
                let slot = rng.gen_range(0..live.len());
                let (r, s) = live.swap_remove(slot);
                let kept = tree.remove(r, s, &store).unwrap();
                store.decrement(kept).unwrap();
            }
            let point: Vec<f32> = (0..dimensions)
                .map(|_| (rng.gen::<f32>() * 8.0).round() / 4.0)
                .collect();
            let r = store.add(&point).unwrap();
            let kept = tree.insert(r, seq, &store).unwrap();
            if kept != r {
                store.increment(kept).unwrap();
                store.decrement(r).unwrap();
            }
            live.push((kept, seq));
            if seq % 100 == 0 {
                tree.check_consistency(&store).unwrap();
            }
        }
        assert_eq!(tree.mass(), live.len());
        tree.check_consistency(&store).unwrap();
    }

    #[test]
    fn center_of_mass_tracks_the_sample_mean() {
        let (store, refs) = store_with(&[
            vec![0.0f32, 0.0],
            vec![2.0, 0.0],
            vec![2.0, 0.0],
            vec![0.0, 4.0],
        ]);
        let mut tree = RandomCutTree::new(2, 8, 1.0, false, true, 3);
        for (i, &r) in refs.iter().enumerate() {
            tree.insert(r, i as u64, &store).unwrap();
        }
        let center = tree.center_of_mass(&store).unwrap();
        assert!((center[0] - 1.0).abs() < 1e-9);
        assert!((center[1] - 1.0).abs() < 1e-9);

        tree.remove(refs[3], 3, &store).unwrap();
        let center = tree.center_of_mass(&store).unwrap();
        assert!((center[0] - 4.0 / 3.0).abs() < 1e-9);
        assert!((center[1] - 0.0).abs() < 1e-9);
    }
}
