use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::errors::Result;
use crate::pointstore::PointStore;
use crate::sampler::StreamSampler;
use crate::tree::RandomCutTree;
use crate::types::{Scalar, NIL};

/// One sampler coupled to one tree. An update keeps the two consistent:
/// the tree's membership always mirrors the sampler's.
pub struct SamplerPlusTree<T> {
    sampler: StreamSampler,
    tree: RandomCutTree<T>,
}

impl<T: Scalar> SamplerPlusTree<T> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        dimensions: usize,
        sample_size: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        cache_fraction: f64,
        store_sequences: bool,
        center_of_mass: bool,
        seed: u64,
    ) -> Self {
        let mut rng = ChaCha20Rng::seed_from_u64(seed);
        let sampler_seed = rng.next_u64();
        let tree_seed = rng.next_u64();
        SamplerPlusTree {
            sampler: StreamSampler::new(
                sample_size,
                time_decay,
                initial_accept_fraction,
                sampler_seed,
            ),
            tree: RandomCutTree::new(
                dimensions,
                sample_size,
                cache_fraction,
                store_sequences,
                center_of_mass,
                tree_seed,
            ),
        }
    }

    /// Offers `(point_ref, sequence_index)` to the sampler and, on
    /// acceptance, applies the eviction and insertion to the tree in that
    /// order. Returns the `(added, deleted)` reference pair for refcount
    /// reconciliation, with `deleted == NIL` when nothing was evicted, or
    /// `None` when the point was not accepted.
    pub(crate) fn update(
        &mut self,
        point_ref: u32,
        sequence_index: u64,
        points: &PointStore<T>,
    ) -> Result<Option<(u32, u32)>> {
        if !self.sampler.accept_point(sequence_index) {
            return Ok(None);
        }
        let deleted = match self.sampler.evicted_point() {
            Some(evicted) => self
                .tree
                .remove(evicted.point_ref, evicted.sequence_index, points)?,
            None => NIL,
        };
        // the tree may hand back a reference to an existing equal point
        let added = self.tree.insert(point_ref, sequence_index, points)?;
        self.sampler.add_point(added);
        Ok(Some((added, deleted)))
    }

    pub fn tree(&self) -> &RandomCutTree<T> {
        &self.tree
    }

    pub fn sampler(&self) -> &StreamSampler {
        &self.sampler
    }

    /// Approximate heap footprint in bytes.
    pub fn size(&self) -> usize {
        self.tree.size() + self.sampler.size() + core::mem::size_of::<Self>()
    }
}
