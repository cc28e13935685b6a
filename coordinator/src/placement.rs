use serde::{Deserialize, Serialize};

/// How local estimators are spread over the workers.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Placement {
    /// Contiguous blocks, the first `K mod W` workers take one extra estimator.
    #[default]
    Block,
    /// Estimator `i` goes to worker `i mod W`.
    RoundRobin,
}

impl Placement {
    /// Distributes `nestimators` estimator positions over `nworkers` workers.
    ///
    /// # Returns
    /// One list of estimator positions per worker; workers may get none when
    /// there are more workers than estimators.
    pub fn place(&self, nestimators: usize, nworkers: usize) -> Vec<Vec<usize>> {
        if nworkers == 0 {
            return Vec::new();
        }

        match self {
            Self::Block => {
                let base = nestimators / nworkers;
                let extra = nestimators % nworkers;

                let mut start = 0;
                (0..nworkers)
                    .map(|w| {
                        let len = base + usize::from(w < extra);
                        let block = (start..start + len).collect();
                        start += len;
                        block
                    })
                    .collect()
            }
            Self::RoundRobin => (0..nworkers)
                .map(|w| (w..nestimators).step_by(nworkers).collect())
                .collect(),
        }
    }
}
