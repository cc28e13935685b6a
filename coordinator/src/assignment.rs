use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Estimator id to the sorted rows of its training subset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsetAssignment {
    subsets: BTreeMap<usize, Vec<usize>>,
}

impl SubsetAssignment {
    /// Builds an assignment where part `i` becomes the subset of estimator `i`.
    ///
    /// Rows are sorted and deduplicated; empty parts are dropped and the
    /// remaining ones renumbered so ids stay contiguous.
    pub fn from_parts(parts: Vec<Vec<usize>>) -> Self {
        let subsets = parts
            .into_iter()
            .filter(|part| !part.is_empty())
            .map(|mut part| {
                part.sort_unstable();
                part.dedup();
                part
            })
            .enumerate()
            .collect();

        Self { subsets }
    }

    /// The amount of subsets.
    pub fn len(&self) -> usize {
        self.subsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subsets.is_empty()
    }

    pub fn get(&self, estimator_id: usize) -> Option<&[usize]> {
        self.subsets.get(&estimator_id).map(Vec::as_slice)
    }

    pub fn ids(&self) -> Vec<usize> {
        self.subsets.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> {
        self.subsets.iter().map(|(&id, rows)| (id, rows.as_slice()))
    }

    /// Returns true if every row in `0..nrows` belongs to some subset.
    pub fn covers(&self, nrows: usize) -> bool {
        let mut seen = vec![false; nrows];
        for &row in self.subsets.values().flatten() {
            if let Some(slot) = seen.get_mut(row) {
                *slot = true;
            }
        }

        seen.into_iter().all(|s| s)
    }

    /// Shifts every estimator id by `offset`.
    pub fn offset(self, offset: usize) -> Self {
        let subsets = self
            .subsets
            .into_iter()
            .map(|(id, rows)| (id + offset, rows))
            .collect();

        Self { subsets }
    }

    /// Translates positions into rows of a larger dataset, `rows[p]` being the row at position `p`.
    pub fn translate(self, rows: &[usize]) -> Self {
        let subsets = self
            .subsets
            .into_iter()
            .map(|(id, positions)| {
                let mut translated: Vec<usize> = positions.into_iter().map(|p| rows[p]).collect();
                translated.sort_unstable();
                (id, translated)
            })
            .collect();

        Self { subsets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_parts_are_dropped_and_ids_compacted() {
        let assignment = SubsetAssignment::from_parts(vec![vec![3, 1, 3], vec![], vec![0, 2]]);
        assert_eq!(assignment.len(), 2);
        assert_eq!(assignment.get(0), Some(&[1, 3][..]));
        assert_eq!(assignment.get(1), Some(&[0, 2][..]));
        assert!(assignment.covers(4));
        assert!(!assignment.covers(5));
    }

    #[test]
    fn translate_and_offset() {
        let assignment = SubsetAssignment::from_parts(vec![vec![0, 1], vec![2]])
            .translate(&[10, 4, 7])
            .offset(5);

        assert_eq!(assignment.ids(), vec![5, 6]);
        assert_eq!(assignment.get(5), Some(&[4, 10][..]));
        assert_eq!(assignment.get(6), Some(&[7][..]));
    }
}
