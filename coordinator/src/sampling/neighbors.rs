use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng, rngs::StdRng, seq::index};

use super::{SubsetSampler, kd_tree, nearest_rows};
use crate::{Result, SubsetAssignment};

/// Each subset holds the rows nearest to a randomly drawn anchor row.
///
/// Rows that no subset picked up join the subset of their nearest anchor.
#[derive(Debug, Clone, Copy, Default)]
pub struct NeighborsSampler;

impl SubsetSampler for NeighborsSampler {
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

        let anchors: Vec<usize> = if k <= nrows {
            index::sample(&mut rng, nrows, k).into_vec()
        } else {
            (0..k).map(|_| rng.random_range(0..nrows)).collect()
        };

        let points = points.as_standard_layout();
        let rows = kd_tree(&points)?;
        let mut parts = anchors
            .iter()
            .map(|&anchor| nearest_rows(rows.as_ref(), points.row(anchor), subset_size))
            .collect::<Result<Vec<_>>>()?;

        let mut covered = vec![false; nrows];
        for &row in parts.iter().flatten() {
            covered[row] = true;
        }

        let anchor_points = points.select(Axis(0), &anchors);
        let by_anchor = kd_tree(&anchor_points)?;
        for row in (0..nrows).filter(|&r| !covered[r]) {
            if let Some(&closest) = nearest_rows(by_anchor.as_ref(), points.row(row), 1)?.first() {
                parts[closest].push(row);
            }
        }

        Ok(SubsetAssignment::from_parts(parts))
    }
}

#[cfg(test)]
mod tests {
    use ndarray::{Array1, Array2};

    use super::*;

    #[test]
    fn subsets_hold_a_window_around_their_anchor() {
        let points = Array2::from_shape_fn((30, 1), |(i, _)| i as f64);
        let targets = Array1::<f64>::zeros(30);

        for seed in 0..10 {
            let assignment = NeighborsSampler
                .sample(points.view(), targets.view(), 3, 10, seed)
                .unwrap();
            assert!(assignment.covers(30));

            for (_, rows) in assignment.iter() {
                let has_window = (0..=20).any(|start| (start..start + 10).all(|r| rows.contains(&r)));
                assert!(has_window, "seed {seed}: no contiguous window in {rows:?}");
            }
        }
    }

    #[test]
    fn strided_points_are_indexed() {
        let wide = Array2::from_shape_fn((3, 12), |(j, i)| (i * 3 + j) as f64);
        let points = wide.t();
        let targets = Array1::<f64>::zeros(12);

        let assignment = NeighborsSampler.sample(points, targets.view(), 2, 5, 3).unwrap();
        assert!(assignment.covers(12));
        assert!(assignment.iter().all(|(_, rows)| rows.len() >= 5));
    }
}
