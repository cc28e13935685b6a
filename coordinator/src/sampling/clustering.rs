use linfa::{DatasetBase, traits::{Fit, Predict}};
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use ndarray::{Array1, ArrayView1, ArrayView2, Axis};
use rand_xoshiro::{Xoshiro256Plus, rand_core::SeedableRng};

use super::{SubsetSampler, top_up_nearest};
use crate::{LessError, Result, SubsetAssignment};

/// Each subset is a cluster found by a seeded k-means.
///
/// Clusters that end up empty are dropped, so fewer than `k` subsets may come
/// out.
#[derive(Debug, Clone, Copy)]
pub struct ClusteringSampler {
    pub max_iters: usize,
}

impl SubsetSampler for ClusteringSampler {
    fn sample(
        &self,
        points: ArrayView2<f64>,
        _targets: ArrayView1<f64>,
        k: usize,
        subset_size: usize,
        seed: u64,
    ) -> Result<SubsetAssignment> {
        let k = k.min(points.nrows());
        let dataset = DatasetBase::new(points.to_owned(), Array1::<f64>::zeros(points.nrows()));

        let model = KMeans::params_with(k, Xoshiro256Plus::seed_from_u64(seed), L2Dist)
            .max_n_iterations(self.max_iters as u64)
            .fit(&dataset)
            .map_err(|e| LessError::Configuration(format!("k-means failed: {e}")))?;
        let labels = model.predict(dataset.records());

        let mut parts = vec![Vec::new(); k];
        for (row, &label) in labels.iter().enumerate() {
            parts[label].push(row);
        }

        let kept: Vec<usize> = (0..k).filter(|&c| !parts[c].is_empty()).collect();
        let mut parts: Vec<Vec<usize>> = kept.iter().map(|&c| std::mem::take(&mut parts[c])).collect();
        let centroids = model.centroids().select(Axis(0), &kept);

        top_up_nearest(&mut parts, points, centroids.view(), subset_size)?;
        Ok(SubsetAssignment::from_parts(parts))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array2, array};

    use super::*;

    #[test]
    fn separated_groups_become_clusters() {
        let points = array![[0.0, 0.0], [0.1, 0.0], [0.0, 0.1], [9.0, 9.0], [9.1, 9.0], [9.0, 9.1]];
        let targets = Array1::<f64>::zeros(6);

        let sampler = ClusteringSampler { max_iters: 50 };
        let assignment = sampler.sample(points.view(), targets.view(), 2, 1, 5).unwrap();

        let mut subsets: Vec<Vec<usize>> = assignment.iter().map(|(_, rows)| rows.to_vec()).collect();
        subsets.sort();
        assert_eq!(subsets, vec![vec![0, 1, 2], vec![3, 4, 5]]);
    }

    #[test]
    fn duplicated_rows_drop_empty_clusters() {
        let points = Array2::<f64>::zeros((5, 1));
        let targets = Array1::<f64>::zeros(5);

        let sampler = ClusteringSampler { max_iters: 10 };
        let assignment = sampler.sample(points.view(), targets.view(), 3, 1, 0).unwrap();

        assert_eq!(assignment.len(), 1);
        assert!(assignment.covers(5));
    }

    #[test]
    fn same_seed_gives_the_same_clusters() {
        let points = Array2::from_shape_fn((40, 2), |(i, j)| ((i * 7 + j * 3) % 11) as f64);
        let targets = Array1::<f64>::zeros(40);

        let sampler = ClusteringSampler { max_iters: 100 };
        let a = sampler.sample(points.view(), targets.view(), 4, 12, 9).unwrap();
        let b = sampler.sample(points.view(), targets.view(), 4, 12, 9).unwrap();

        assert_eq!(a, b);
        assert!(a.covers(40));
        assert!(a.iter().all(|(_, rows)| rows.len() >= 12));
    }

    #[test]
    fn zero_iterations_are_rejected() {
        let points = Array2::<f64>::zeros((4, 1));
        let targets = Array1::<f64>::zeros(4);

        let sampler = ClusteringSampler { max_iters: 0 };
        let result = sampler.sample(points.view(), targets.view(), 2, 1, 0);
        assert!(matches!(result, Err(LessError::Configuration(_))));
    }
}
