//! Subset construction strategies.
//!
//! Every sampler first builds a covering partition of the rows, so the union
//! of all subsets is the whole training set, and then grows each part to the
//! requested subset size. Parts larger than the requested size are kept whole.

mod clustering;
mod neighbors;
mod stratified;
mod uniform;

use linfa_nn::{CommonNearestNeighbour, NearestNeighbour, NearestNeighbourIndex, distance::L2Dist};
use ndarray::{ArrayBase, ArrayView1, ArrayView2, Data, Ix2};
use rand::{rngs::StdRng, seq::SliceRandom};

pub use clustering::ClusteringSampler;
pub use neighbors::NeighborsSampler;
pub use stratified::StratifiedSampler;
pub use uniform::UniformSampler;

use crate::{LessError, Result, SubsetAssignment, config::SamplerConfig};

/// Decides which rows each local estimator trains on.
///
/// Implementations must be deterministic for a given seed.
pub trait SubsetSampler {
    /// Splits the rows of `points` into at most `k` covering subsets.
    ///
    /// # Arguments
    /// * `points` - The training features, one row per sample.
    /// * `targets` - The training targets.
    /// * `k` - The amount of subsets to build.
    /// * `subset_size` - The minimum amount of rows per subset, at most `points.nrows()`.
    /// * `seed` - Seeds every random draw.
    fn sample(
        &self,
        points: ArrayView2<f64>,
        targets: ArrayView1<f64>,
        k: usize,
        subset_size: usize,
        seed: u64,
    ) -> Result<SubsetAssignment>;
}

/// Builds the sampler selected by `config`.
pub fn sampler(config: SamplerConfig) -> Box<dyn SubsetSampler> {
    match config {
        SamplerConfig::Uniform => Box::new(UniformSampler),
        SamplerConfig::Neighbors => Box::new(NeighborsSampler),
        SamplerConfig::Clustering { max_iters } => Box::new(ClusteringSampler { max_iters }),
        SamplerConfig::Stratified { strata } => Box::new(StratifiedSampler { strata }),
    }
}

/// A KD tree over the rows of `points`, which must be in standard layout.
pub(crate) fn kd_tree<'a, S>(
    points: &'a ArrayBase<S, Ix2>,
) -> Result<Box<dyn NearestNeighbourIndex<f64> + Send + Sync + 'a>>
where
    S: Data<Elem = f64>,
{
    CommonNearestNeighbour::KdTree
        .from_batch(points, L2Dist)
        .map_err(|e| LessError::Configuration(format!("cannot index the rows: {e}")))
}

/// Positions of the `k` indexed rows nearest to `point`, closest first.
pub(crate) fn nearest_rows(
    index: &dyn NearestNeighbourIndex<f64>,
    point: ArrayView1<f64>,
    k: usize,
) -> Result<Vec<usize>> {
    let point = point.as_standard_layout();
    let found = index
        .k_nearest(point.view(), k)
        .map_err(|e| LessError::Configuration(format!("nearest neighbour query failed: {e}")))?;

    Ok(found.into_iter().map(|(_, row)| row).collect())
}

fn membership(part: &[usize], nrows: usize) -> Vec<bool> {
    let mut member = vec![false; nrows];
    for &row in part {
        member[row] = true;
    }
    member
}

/// Grows every part to `size` rows with rows drawn at random.
pub(crate) fn top_up_random(parts: &mut [Vec<usize>], nrows: usize, size: usize, rng: &mut StdRng) {
    let size = size.min(nrows);
    for part in parts.iter_mut().filter(|p| p.len() < size) {
        let member = membership(part, nrows);
        let mut candidates: Vec<usize> = (0..nrows).filter(|&r| !member[r]).collect();
        candidates.shuffle(rng);

        let missing = size - part.len();
        part.extend(candidates.into_iter().take(missing));
    }
}

/// Grows every part to `size` rows with the rows nearest to its center.
pub(crate) fn top_up_nearest(
    parts: &mut [Vec<usize>],
    points: ArrayView2<f64>,
    centers: ArrayView2<f64>,
    size: usize,
) -> Result<()> {
    let nrows = points.nrows();
    let size = size.min(nrows);

    let points = points.as_standard_layout();
    let index = kd_tree(&points)?;

    for (part, center) in parts.iter_mut().zip(centers.rows()) {
        if part.len() >= size {
            continue;
        }

        // At most `part.len()` of the `size` nearest rows are members already.
        let member = membership(part, nrows);
        let missing = size - part.len();
        let closest: Vec<usize> = nearest_rows(index.as_ref(), center, size)?
            .into_iter()
            .filter(|&r| !member[r])
            .take(missing)
            .collect();

        part.extend(closest);
    }

    Ok(())
}
