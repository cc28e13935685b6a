use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};

/// Shape of a dataset broadcast to the workers.
///
/// The features follow as row-major `Features` chunks of at most `chunk_rows`
/// rows each, then a single `Targets` payload of `nrows` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub nrows: usize,
    pub nfeatures: usize,
    pub chunk_rows: NonZeroUsize,
}

impl DatasetSpec {
    /// The total amount of feature values that will be sent.
    pub fn feature_len(&self) -> usize {
        self.nrows * self.nfeatures
    }
}
