use ndarray::{ArrayView1, ArrayView2};
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};

use super::{SubsetSampler, top_up_random};
use crate::{Result, SubsetAssignment};

/// Splits the rows into target quantiles and deals every quantile over all
/// subsets, so each subset sees the whole range of the target.
#[derive(Debug, Clone, Copy)]
pub struct StratifiedSampler {
    pub strata: usize,
}

impl SubsetSampler for StratifiedSampler {
    fn sample(
        &self,
        points: ArrayView2<f64>,
        targets: ArrayView1<f64>,
        k: usize,
        subset_size: usize,
        seed: u64,
    ) -> Result<SubsetAssignment> {
        let nrows = points.nrows();
        let strata = self.strata.clamp(1, nrows.max(1));
        let mut rng = StdRng::seed_from_u64(seed);

        let mut order: Vec<usize> = (0..nrows).collect();
        order.sort_by(|&a, &b| targets[a].total_cmp(&targets[b]).then(a.cmp(&b)));

        let mut parts = vec![Vec::new(); k];
        let mut dealt = 0;
        for s in 0..strata {
            let stratum = &mut order[s * nrows / strata..(s + 1) * nrows / strata];
            stratum.shuffle(&mut rng);

            for &row in stratum.iter() {
                parts[dealt % k].push(row);
                dealt += 1;
            }
        }

        top_up_random(&mut parts, nrows, subset_size, &mut rng);
        Ok(SubsetAssignment::from_parts(parts))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array2};

    use super::*;

    #[test]
    fn every_subset_spans_the_target_range() {
        let points = Array2::<f64>::zeros((40, 1));
        let targets = Array1::from_shape_fn(40, |i| i as f64);

        let sampler = StratifiedSampler { strata: 4 };
        let assignment = sampler.sample(points.view(), targets.view(), 4, 1, 11).unwrap();

        for (_, rows) in assignment.iter() {
            for s in 0..4 {
                let lo = s * 10;
                assert!(
                    rows.iter().any(|&r| r >= lo && r < lo + 10),
                    "stratum {s} missing from {rows:?}"
                );
            }
        }
    }
}
