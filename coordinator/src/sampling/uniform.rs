use ndarray::{ArrayView1, ArrayView2};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{SubsetSampler, top_up_random};
use crate::{Result, SubsetAssignment};

/// Deals a random permutation of the rows round-robin, then adds random rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformSampler;

impl SubsetSampler for UniformSampler {
    fn sample(
        &self,
        points: ArrayView2<f64>,
        _targets: ArrayView1<f64>,
        k: usize,
        subset_size: usize,
        seed: u64,
    ) -> Result<SubsetAssignment> {
        let nrows = points.nrows();
        let mut rng = StdRng::seed_from_u64(seed);

        let mut order: Vec<usize> = (0..nrows).collect();
        order.shuffle(&mut rng);

        let mut parts = vec![Vec::new(); k];
        for (i, row) in order.into_iter().enumerate() {
            parts[i % k].push(row);
        }

        top_up_random(&mut parts, nrows, subset_size, &mut rng);
        Ok(SubsetAssignment::from_parts(parts))
    }
}
