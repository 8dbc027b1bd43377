use std::collections::HashMap;

use crate::common::slots::SlotManager;
use crate::errors::{ForestError, Result};
use crate::pointstore::PointStore;
use crate::tree::boundingbox::BoundingBox;
use crate::tree::cut::Cut;
use crate::types::{Scalar, NIL};

/// Below this cache fraction traversals maintain their own box along the
/// path instead of asking the store at every step.
pub(crate) const SWITCH_FRACTION: f64 = 0.5;

/// Struct-of-arrays storage for one tree.
///
/// Internal nodes live in slots `0..capacity-1` (a binary tree over
/// `capacity` leaves has at most `capacity - 1` internals). A leaf is not
/// stored at all: it is encoded as `capacity + point_ref`, its mass defaults
/// to 1 with a map overlay for duplicates, and its optional sequence-index
/// multiset lives in a second overlay. `NIL` is the null node.
///
/// Bounding boxes are materialized for the internal slots below
/// `cache_limit` (a direct-mapped prefix chosen by the cache fraction);
/// boxes of other internals are recomputed from their subtrees on demand.
pub(crate) struct NodeStore<T> {
    capacity: usize,
    dimensions: usize,
    cache_fraction: f64,
    cache_limit: usize,
    parent: Vec<u32>,
    left: Vec<u32>,
    right: Vec<u32>,
    cut_dimension: Vec<u32>,
    cut_value: Vec<T>,
    mass: Vec<u32>,
    slots: SlotManager,
    box_data: Vec<T>,
    range_sum: Vec<f64>,
    duplicate_mass: HashMap<u32, u32>,
    sequences: Option<HashMap<u32, Vec<u64>>>,
    point_sum: Option<Vec<f64>>,
}

impl<T: Scalar> NodeStore<T> {
    pub fn new(
        capacity: usize,
        dimensions: usize,
        cache_fraction: f64,
        store_sequences: bool,
        center_of_mass: bool,
    ) -> Self {
        let internal_slots = capacity.saturating_sub(1);
        let cache_limit = ((cache_fraction * capacity as f64) as usize).min(internal_slots);
        NodeStore {
            capacity,
            dimensions,
            cache_fraction,
            cache_limit,
            parent: vec![NIL; internal_slots],
            left: vec![NIL; internal_slots],
            right: vec![NIL; internal_slots],
            cut_dimension: vec![u32::MAX; internal_slots],
            cut_value: vec![T::zero(); internal_slots],
            mass: vec![0; internal_slots],
            slots: SlotManager::new(internal_slots as u32),
            box_data: vec![T::zero(); 2 * dimensions * cache_limit],
            range_sum: vec![0.0; cache_limit],
            duplicate_mass: HashMap::new(),
            sequences: if store_sequences {
                Some(HashMap::new())
            } else {
                None
            },
            point_sum: if center_of_mass {
                Some(vec![0.0; internal_slots * dimensions])
            } else {
                None
            },
        }
    }

    // ---- index encoding -------------------------------------------------

    pub fn leaf_index(&self, point_ref: u32) -> u32 {
        self.capacity as u32 + point_ref
    }

    pub fn is_leaf(&self, index: u32) -> bool {
        index != NIL && index >= self.capacity as u32
    }

    pub fn is_internal(&self, index: u32) -> bool {
        index != NIL && (index as usize) < self.capacity
    }

    pub fn point_ref(&self, index: u32) -> u32 {
        debug_assert!(self.is_leaf(index));
        index - self.capacity as u32
    }

    #[cfg(test)]
    pub(crate) fn internal_nodes_in_use(&self) -> usize {
        self.slots.in_use() as usize
    }

    // ---- basic accessors ------------------------------------------------

    pub fn mass(&self, index: u32) -> usize {
        if self.is_leaf(index) {
            *self
                .duplicate_mass
                .get(&self.point_ref(index))
                .unwrap_or(&1) as usize
        } else {
            self.mass[index as usize] as usize
        }
    }

    pub fn left(&self, index: u32) -> u32 {
        self.left[index as usize]
    }

    pub fn right(&self, index: u32) -> u32 {
        self.right[index as usize]
    }

    pub fn cut_info(&self, index: u32) -> (usize, T) {
        (
            self.cut_dimension[index as usize] as usize,
            self.cut_value[index as usize],
        )
    }

    pub fn sibling(&self, node: u32, parent: u32) -> u32 {
        let left = self.left[parent as usize];
        if node == left {
            self.right[parent as usize]
        } else {
            left
        }
    }

    pub fn is_left_of(&self, index: u32, point: &[T]) -> bool {
        let dimension = self.cut_dimension[index as usize] as usize;
        point[dimension] <= self.cut_value[index as usize]
    }

    pub fn use_path_for_box(&self) -> bool {
        self.cache_fraction < SWITCH_FRACTION
    }

    /// Descends from `root` by the stored cuts, recording `(node, sibling)`
    /// per level; the first entry is `(root, NIL)` and the last is the leaf.
    pub fn descend_path(&self, root: u32, point: &[T], path: &mut Vec<(u32, u32)>) {
        path.clear();
        let mut node = root;
        path.push((root, NIL));
        while !self.is_leaf(node) {
            let (next, sibling) = if self.is_left_of(node, point) {
                (self.left[node as usize], self.right[node as usize])
            } else {
                (self.right[node as usize], self.left[node as usize])
            };
            path.push((next, sibling));
            node = next;
        }
    }

    // ---- leaf overlays --------------------------------------------------

    pub fn increase_leaf_mass(&mut self, point_ref: u32) {
        *self.duplicate_mass.entry(point_ref).or_insert(1) += 1;
    }

    /// Returns the remaining mass.
    pub fn decrease_leaf_mass(&mut self, point_ref: u32) -> usize {
        match self.duplicate_mass.remove(&point_ref) {
            Some(mass) if mass > 2 => {
                self.duplicate_mass.insert(point_ref, mass - 1);
                (mass - 1) as usize
            }
            Some(_) => 1,
            None => 0,
        }
    }

    pub fn record_sequence(&mut self, point_ref: u32, sequence_index: u64) {
        if let Some(sequences) = self.sequences.as_mut() {
            sequences
                .entry(point_ref)
                .or_insert_with(Vec::new)
                .push(sequence_index);
        }
    }

    pub fn remove_sequence(&mut self, point_ref: u32, sequence_index: u64) -> Result<()> {
        if let Some(sequences) = self.sequences.as_mut() {
            let list = sequences
                .get_mut(&point_ref)
                .ok_or(ForestError::SequenceNotFound)?;
            let position = list
                .iter()
                .position(|&s| s == sequence_index)
                .ok_or(ForestError::SequenceNotFound)?;
            list.swap_remove(position);
            if list.is_empty() {
                sequences.remove(&point_ref);
            }
        }
        Ok(())
    }

    pub fn sequences_of(&self, point_ref: u32) -> Option<Vec<u64>> {
        self.sequences
            .as_ref()
            .and_then(|sequences| sequences.get(&point_ref).cloned())
    }

    // ---- structural edits -----------------------------------------------

    /// Splices a new internal node above `old_node`, separating the new leaf
    /// for `point_ref` from it by `cut`. `box_before_point` is the subtree
    /// box of `old_node`; the cached box of the new node covers it plus the
    /// point. Returns the new node's slot.
    #[allow(clippy::too_many_arguments)]
    pub fn splice_internal(
        &mut self,
        parent: u32,
        point: &[T],
        old_node: u32,
        point_ref: u32,
        cut: Cut<T>,
        box_before_point: &BoundingBox<T>,
        points: &PointStore<T>,
    ) -> Result<u32> {
        let slot = self.slots.acquire().ok_or(ForestError::Internal {
            msg: "internal node slots exhausted",
        })?;
        let index = slot as usize;
        self.cut_dimension[index] = cut.dimension as u32;
        self.cut_value[index] = cut.value;
        let new_leaf = self.leaf_index(point_ref);
        if point[cut.dimension] <= cut.value {
            self.left[index] = new_leaf;
            self.right[index] = old_node;
        } else {
            self.left[index] = old_node;
            self.right[index] = new_leaf;
        }
        self.mass[index] = self.mass(old_node) as u32 + 1;
        self.parent[index] = parent;
        if self.is_internal(old_node) {
            self.parent[old_node as usize] = slot;
        }
        if self.cached(slot) {
            let mut bbox = box_before_point.clone();
            bbox.extend_with_point(point);
            self.write_cached_box(slot, &bbox);
        }
        if self.point_sum.is_some() {
            let mut sum = self.subtree_sum(old_node, points)?;
            for (s, &x) in sum.iter_mut().zip(point) {
                *s += x.as_f64();
            }
            self.write_point_sum(slot, &sum);
        }
        if parent != NIL {
            self.replace_child(parent, old_node, slot);
        }
        Ok(slot)
    }

    pub fn release_internal(&mut self, index: u32) {
        let i = index as usize;
        self.left[i] = NIL;
        self.right[i] = NIL;
        self.parent[i] = NIL;
        self.mass[i] = 0;
        self.cut_dimension[i] = u32::MAX;
        self.cut_value[i] = T::zero();
        if let Some(sums) = self.point_sum.as_mut() {
            sums[i * self.dimensions..(i + 1) * self.dimensions].fill(0.0);
        }
        self.slots.release(index);
    }

    pub fn replace_child(&mut self, parent: u32, old_child: u32, new_child: u32) {
        let i = parent as usize;
        if self.left[i] == old_child {
            self.left[i] = new_child;
        } else {
            debug_assert!(self.right[i] == old_child);
            self.right[i] = new_child;
        }
        if self.is_internal(new_child) {
            self.parent[new_child as usize] = parent;
        }
    }

    pub fn set_root(&mut self, index: u32) {
        if self.is_internal(index) {
            self.parent[index as usize] = NIL;
        }
    }

    /// Walks the remaining `path` bottom-up after an insertion: masses grow,
    /// point sums absorb the point and cached boxes are extended until one
    /// already contains it.
    pub fn ancestors_after_insert(
        &mut self,
        path: &mut Vec<(u32, u32)>,
        point: &[T],
        box_resolved: bool,
    ) {
        let mut resolved = box_resolved;
        while let Some((index, _)) = path.pop() {
            let i = index as usize;
            self.mass[i] += 1;
            self.add_to_point_sum(index, point, 1.0);
            if !resolved && self.cached(index) {
                resolved = self.cache_extend_with_point(index, point);
            }
        }
    }

    /// Bottom-up repair after a deletion: masses shrink, point sums release
    /// the point and cached boxes are rebuilt from their children until one
    /// strictly contains the deleted point.
    pub fn ancestors_after_delete(
        &mut self,
        path: &mut Vec<(u32, u32)>,
        point: &[T],
        box_resolved: bool,
        points: &PointStore<T>,
    ) -> Result<()> {
        let mut resolved = box_resolved;
        while let Some((index, _)) = path.pop() {
            let i = index as usize;
            self.mass[i] -= 1;
            self.add_to_point_sum(index, point, -1.0);
            if !resolved && self.cached(index) {
                resolved = self.check_contains_or_rebuild(index, point, points)?;
            }
        }
        Ok(())
    }

    // ---- bounding boxes -------------------------------------------------

    fn cached(&self, index: u32) -> bool {
        (index as usize) < self.cache_limit
    }

    fn write_cached_box(&mut self, index: u32, bbox: &BoundingBox<T>) {
        let base = 2 * index as usize * self.dimensions;
        let mid = base + self.dimensions;
        self.box_data[base..mid].copy_from_slice(bbox.min_values());
        self.box_data[mid..mid + self.dimensions].copy_from_slice(bbox.max_values());
        self.range_sum[index as usize] = bbox.range_sum();
    }

    fn cached_box(&self, index: u32) -> BoundingBox<T> {
        let base = 2 * index as usize * self.dimensions;
        let mid = base + self.dimensions;
        BoundingBox::from_points(
            &self.box_data[base..mid],
            &self.box_data[mid..mid + self.dimensions],
        )
    }

    /// Extends the cached box with `point`; returns `true` when the box was
    /// already covering it.
    fn cache_extend_with_point(&mut self, index: u32, point: &[T]) -> bool {
        let base = 2 * index as usize * self.dimensions;
        let mid = base + self.dimensions;
        for (x, &y) in self.box_data[base..mid].iter_mut().zip(point) {
            if y < *x {
                *x = y;
            }
        }
        for (x, &y) in self.box_data[mid..mid + self.dimensions].iter_mut().zip(point) {
            if y > *x {
                *x = y;
            }
        }
        let new_sum: f64 = self.box_data[base..mid]
            .iter()
            .zip(&self.box_data[mid..mid + self.dimensions])
            .map(|(&lo, &hi)| hi.as_f64() - lo.as_f64())
            .sum();
        let unchanged = self.range_sum[index as usize] == new_sum;
        self.range_sum[index as usize] = new_sum;
        unchanged
    }

    fn strictly_contains(&self, index: u32, point: &[T]) -> bool {
        let base = 2 * index as usize * self.dimensions;
        let mid = base + self.dimensions;
        self.box_data[base..mid]
            .iter()
            .zip(point)
            .zip(&self.box_data[mid..mid + self.dimensions])
            .all(|((&lo, &x), &hi)| lo < x && x < hi)
    }

    fn check_contains_or_rebuild(
        &mut self,
        index: u32,
        point: &[T],
        points: &PointStore<T>,
    ) -> Result<bool> {
        if self.strictly_contains(index, point) {
            return Ok(true);
        }
        let rebuilt = self.rebuild_box(index, points)?;
        self.write_cached_box(index, &rebuilt);
        Ok(false)
    }

    fn rebuild_box(&self, index: u32, points: &PointStore<T>) -> Result<BoundingBox<T>> {
        let mut bbox = self.bounding_box(self.left[index as usize], points)?;
        self.grow_box_with_subtree(&mut bbox, self.right[index as usize], points)?;
        Ok(bbox)
    }

    /// The subtree box of `index`: a leaf's point box, the cached box, or an
    /// on-demand recomputation paying the subtree size.
    pub fn bounding_box(&self, index: u32, points: &PointStore<T>) -> Result<BoundingBox<T>> {
        if self.is_leaf(index) {
            let point = points.point(self.point_ref(index))?;
            return Ok(BoundingBox::from_point(point));
        }
        if self.cached(index) {
            return Ok(self.cached_box(index));
        }
        self.rebuild_box(index, points)
    }

    /// Extends `bbox` with the subtree of `node` without materializing the
    /// subtree box when the cache or a leaf can serve it directly.
    pub fn grow_box_with_subtree(
        &self,
        bbox: &mut BoundingBox<T>,
        node: u32,
        points: &PointStore<T>,
    ) -> Result<()> {
        if self.is_leaf(node) {
            bbox.extend_with_point(points.point(self.point_ref(node))?);
        } else if self.cached(node) {
            let base = 2 * node as usize * self.dimensions;
            let mid = base + self.dimensions;
            bbox.extend_with_point(&self.box_data[base..mid]);
            bbox.extend_with_point(&self.box_data[mid..mid + self.dimensions]);
        } else {
            self.grow_box_with_subtree(bbox, self.left[node as usize], points)?;
            self.grow_box_with_subtree(bbox, self.right[node as usize], points)?;
        }
        Ok(())
    }

    pub fn probability_of_separation(
        &self,
        index: u32,
        point: &[T],
        points: &PointStore<T>,
    ) -> Result<f64> {
        if self.is_internal(index) && self.cached(index) {
            let base = 2 * index as usize * self.dimensions;
            let mid = base + self.dimensions;
            let mut gap_sum = 0.0;
            for ((&lo, &x), &hi) in self.box_data[base..mid]
                .iter()
                .zip(point)
                .zip(&self.box_data[mid..mid + self.dimensions])
            {
                if x < lo {
                    gap_sum += lo.as_f64() - x.as_f64();
                } else if x > hi {
                    gap_sum += x.as_f64() - hi.as_f64();
                }
            }
            if gap_sum == 0.0 {
                return Ok(0.0);
            }
            return Ok(gap_sum / (self.range_sum[index as usize] + gap_sum));
        }
        Ok(self
            .bounding_box(index, points)?
            .probability_of_separation(point))
    }

    pub fn probability_of_separation_masked(
        &self,
        index: u32,
        point: &[T],
        masked: &[bool],
        points: &PointStore<T>,
    ) -> Result<f64> {
        Ok(self
            .bounding_box(index, points)?
            .probability_of_separation_masked(point, masked))
    }

    // ---- center of mass -------------------------------------------------

    fn write_point_sum(&mut self, index: u32, sum: &[f64]) {
        if let Some(sums) = self.point_sum.as_mut() {
            let base = index as usize * self.dimensions;
            sums[base..base + self.dimensions].copy_from_slice(sum);
        }
    }

    fn add_to_point_sum(&mut self, index: u32, point: &[T], sign: f64) {
        let dimensions = self.dimensions;
        if let Some(sums) = self.point_sum.as_mut() {
            let base = index as usize * dimensions;
            for (s, &x) in sums[base..base + dimensions].iter_mut().zip(point) {
                *s += sign * x.as_f64();
            }
        }
    }

    /// The sum of all points below `node`, weighted by leaf mass.
    pub fn subtree_sum(&self, node: u32, points: &PointStore<T>) -> Result<Vec<f64>> {
        if self.is_leaf(node) {
            let mass = self.mass(node) as f64;
            let point = points.point(self.point_ref(node))?;
            return Ok(point.iter().map(|&x| x.as_f64() * mass).collect());
        }
        if let Some(sums) = self.point_sum.as_ref() {
            let base = node as usize * self.dimensions;
            return Ok(sums[base..base + self.dimensions].to_vec());
        }
        let mut sum = self.subtree_sum(self.left[node as usize], points)?;
        let right = self.subtree_sum(self.right[node as usize], points)?;
        for (s, r) in sum.iter_mut().zip(right) {
            *s += r;
        }
        Ok(sum)
    }

    #[cfg(test)]
    pub(crate) fn parent_of(&self, index: u32) -> u32 {
        self.parent[index as usize]
    }

    #[cfg(test)]
    pub(crate) fn cached_box_of(&self, index: u32) -> Option<BoundingBox<T>> {
        if self.is_internal(index) && self.cached(index) {
            Some(self.cached_box(index))
        } else {
            None
        }
    }

    /// Approximate heap footprint in bytes.
    pub fn size(&self) -> usize {
        (self.parent.len() + self.left.len() + self.right.len() + self.mass.len())
            * core::mem::size_of::<u32>()
            + self.cut_dimension.len() * core::mem::size_of::<u32>()
            + self.cut_value.len() * core::mem::size_of::<T>()
            + self.box_data.len() * core::mem::size_of::<T>()
            + self.range_sum.len() * core::mem::size_of::<f64>()
            + self
                .point_sum
                .as_ref()
                .map_or(0, |s| s.len() * core::mem::size_of::<f64>())
            + core::mem::size_of::<Self>()
    }
}
