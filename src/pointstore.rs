use tracing::debug;

use crate::common::slots::SlotManager;
use crate::errors::{check_argument, ForestError, Result};
use crate::types::{Scalar, NIL};

/// A reference-counted arena of fixed-width points shared by every tree in a
/// forest.
///
/// References are small integers; a reference stays valid while its count is
/// positive and the slot is recycled when the count reaches zero. Storage is
/// grown geometrically up to the hard capacity fixed at construction
/// (`number_of_trees * sample_size + 1`), so a forest that never fills its
/// samplers never pays for the worst case.
///
/// The store itself does not deduplicate: equality-based sharing happens at
/// leaf insertion in the trees, which return the surviving reference, and the
/// update coordinator reconciles counts afterwards.
pub struct PointStore<T> {
    dimensions: usize,
    capacity: usize,
    store: Vec<T>,
    reference_count: Vec<u32>,
    slots: SlotManager,
}

impl<T: Scalar> PointStore<T> {
    pub fn new(dimensions: usize, capacity: usize, initial_capacity: usize) -> Self {
        assert!(dimensions > 0, "dimensions must be positive");
        assert!(capacity > 0, "capacity must be positive");
        let allocated = initial_capacity.clamp(1, capacity);
        PointStore {
            dimensions,
            capacity,
            store: vec![T::zero(); allocated * dimensions],
            reference_count: vec![0; allocated],
            slots: SlotManager::new(allocated as u32),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Stores a copy of `point` and returns its reference with a count of 1.
    pub fn add(&mut self, point: &[T]) -> Result<u32> {
        check_argument(point.len() == self.dimensions, "incorrect point length")?;
        if self.slots.is_exhausted() {
            self.grow()?;
        }
        let index = self
            .slots
            .acquire()
            .ok_or(ForestError::CapacityExceeded)?;
        debug_assert!(self.reference_count[index as usize] == 0);
        self.reference_count[index as usize] = 1;
        let base = index as usize * self.dimensions;
        self.store[base..base + self.dimensions].copy_from_slice(point);
        Ok(index)
    }

    fn grow(&mut self) -> Result<()> {
        let allocated = self.slots.capacity() as usize;
        if allocated >= self.capacity {
            return Err(ForestError::CapacityExceeded);
        }
        let new_size = (allocated + allocated / 5 + 1).min(self.capacity);
        debug!(from = allocated, to = new_size, "growing point store");
        self.store.resize(new_size * self.dimensions, T::zero());
        self.reference_count.resize(new_size, 0);
        self.slots.extend_to(new_size as u32);
        Ok(())
    }

    fn check_in_use(&self, index: u32) -> Result<()> {
        if (index as usize) < self.reference_count.len()
            && self.reference_count[index as usize] > 0
        {
            Ok(())
        } else {
            Err(ForestError::InvalidRef { index })
        }
    }

    pub fn increment(&mut self, index: u32) -> Result<()> {
        self.check_in_use(index)?;
        self.reference_count[index as usize] += 1;
        Ok(())
    }

    /// Decrements the count; the slot is freed for reuse when it reaches
    /// zero.
    pub fn decrement(&mut self, index: u32) -> Result<()> {
        self.check_in_use(index)?;
        let count = &mut self.reference_count[index as usize];
        *count -= 1;
        if *count == 0 {
            self.slots.release(index);
        }
        Ok(())
    }

    pub fn point(&self, index: u32) -> Result<&[T]> {
        self.check_in_use(index)?;
        let base = index as usize * self.dimensions;
        Ok(&self.store[base..base + self.dimensions])
    }

    /// Component-wise equality against a stored point; the coordinator's
    /// canonicalization of `-0.0` keeps this equivalent to bitwise equality.
    pub fn equals(&self, index: u32, point: &[T]) -> Result<bool> {
        Ok(self.point(index)? == point)
    }

    /// Applies the per-component `(added, deleted)` outcomes of one update:
    /// every accepting component retains its surviving reference and drops
    /// the one its sampler evicted.
    pub fn adjust_counts(&mut self, results: &[(u32, u32)]) -> Result<()> {
        for &(added, deleted) in results {
            if added != NIL {
                self.increment(added)?;
                if deleted != NIL {
                    self.decrement(deleted)?;
                }
            }
        }
        Ok(())
    }

    /// Number of references currently live.
    pub fn active_points(&self) -> usize {
        self.slots.in_use() as usize
    }

    /// Sum of all reference counts; equals the total sampler membership of
    /// the owning forest between updates.
    pub fn total_references(&self) -> u64 {
        self.reference_count.iter().map(|&c| c as u64).sum()
    }

    /// Approximate heap footprint in bytes.
    pub fn size(&self) -> usize {
        self.store.len() * core::mem::size_of::<T>()
            + self.reference_count.len() * core::mem::size_of::<u32>()
            + core::mem::size_of::<Self>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_get_release_cycle() {
        let mut store = PointStore::<f32>::new(2, 8, 2);
        let a = store.add(&[1.0, 2.0]).unwrap();
        let b = store.add(&[3.0, 4.0]).unwrap();
        assert_eq!(store.point(a).unwrap(), &[1.0, 2.0]);
        assert_eq!(store.point(b).unwrap(), &[3.0, 4.0]);
        assert!(store.equals(a, &[1.0, 2.0]).unwrap());
        assert!(!store.equals(a, &[1.0, 2.5]).unwrap());

        store.increment(a).unwrap();
        store.decrement(a).unwrap();
        assert!(store.point(a).is_ok());
        store.decrement(a).unwrap();
        assert_eq!(
            store.point(a).unwrap_err(),
            ForestError::InvalidRef { index: a }
        );

        // freed slot is recycled
        let c = store.add(&[5.0, 6.0]).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn grows_to_hard_capacity_then_fails() {
        let mut store = PointStore::<f64>::new(1, 3, 1);
        let mut refs = Vec::new();
        for i in 0..3 {
            refs.push(store.add(&[i as f64]).unwrap());
        }
        assert_eq!(store.add(&[9.0]).unwrap_err(), ForestError::CapacityExceeded);
        store.decrement(refs[1]).unwrap();
        assert!(store.add(&[9.0]).is_ok());
    }

    #[test]
    fn adjust_counts_reconciles_update_outcomes() {
        let mut store = PointStore::<f32>::new(1, 8, 8);
        let old = store.add(&[1.0]).unwrap();
        store.increment(old).unwrap(); // held by a tree
        let new = store.add(&[2.0]).unwrap();

        // one component accepted `new` and evicted `old`
        store.adjust_counts(&[(new, old), (NIL, NIL)]).unwrap();
        store.decrement(new).unwrap(); // coordinator drops its own hold
        store.decrement(old).unwrap();

        assert_eq!(store.total_references(), 1);
        assert!(store.point(new).is_ok());
        assert!(store.point(old).is_err());
    }

    #[test]
    fn wrong_dimension_is_rejected() {
        let mut store = PointStore::<f32>::new(3, 4, 4);
        assert!(matches!(
            store.add(&[0.0, 1.0]),
            Err(ForestError::InvalidArgument { .. })
        ));
    }
}
