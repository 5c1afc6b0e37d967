//! Exact 1-nearest-neighbour search under cosine distance.
//!
//! The answer pool of a chat workspace is small enough (tens of thousands
//! of messages) for a brute-force scan to answer in milliseconds, and an
//! exact scan keeps row `i` trivially aligned with answer `i`.

use anyhow::{bail, Result};

use crate::embedding::cosine_similarity;

/// The nearest row and its cosine distance (`1 - cosine similarity`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub index: usize,
    pub distance: f32,
}

/// A fitted cosine 1-NN index over a row-stacked embedding matrix.
#[derive(Debug, Clone)]
pub struct NearestNeighbors {
    rows: Vec<Vec<f32>>,
    dims: usize,
}

impl NearestNeighbors {
    /// Fit the index. All rows must be non-empty, finite, and share one
    /// dimensionality.
    pub fn fit(rows: Vec<Vec<f32>>) -> Result<Self> {
        let Some(first) = rows.first() else {
            bail!("cannot fit a nearest-neighbour index on zero rows");
        };
        let dims = first.len();
        if dims == 0 {
            bail!("embedding vectors must not be empty");
        }
        if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != dims) {
            bail!(
                "embedding row {} has {} dimensions, expected {}",
                i,
                row.len(),
                dims
            );
        }
        if let Some(i) = rows.iter().position(|r| !all_finite(r)) {
            bail!("embedding row {} contains a non-finite value", i);
        }
        Ok(Self { rows, dims })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn rows(&self) -> &[Vec<f32>] {
        &self.rows
    }

    /// The closest row to `query`. Ties resolve to the lowest index.
    pub fn nearest(&self, query: &[f32]) -> Result<Neighbor> {
        if query.len() != self.dims {
            bail!(
                "query has {} dimensions but the index was fitted on {}",
                query.len(),
                self.dims
            );
        }
        if !all_finite(query) {
            bail!("query embedding contains a non-finite value");
        }

        let mut best = Neighbor {
            index: 0,
            distance: f32::INFINITY,
        };
        for (index, row) in self.rows.iter().enumerate() {
            let distance = 1.0 - cosine_similarity(query, row);
            if distance < best.distance {
                best = Neighbor { index, distance };
            }
        }
        Ok(best)
    }
}

fn all_finite(v: &[f32]) -> bool {
    v.iter().all(|x| x.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_nearest_by_direction() {
        let index = NearestNeighbors::fit(vec![
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![-1.0, 0.0],
        ])
        .unwrap();
        let hit = index.nearest(&[0.1, 5.0]).unwrap();
        assert_eq!(hit.index, 1);
        assert!(hit.distance < 0.01);

        // Magnitude does not matter, only direction.
        let hit = index.nearest(&[-40.0, 0.0]).unwrap();
        assert_eq!(hit.index, 2);
        assert!(hit.distance.abs() < 1e-6);
    }

    #[test]
    fn opposite_direction_has_distance_two() {
        let index = NearestNeighbors::fit(vec![vec![1.0, 0.0]]).unwrap();
        let hit = index.nearest(&[-1.0, 0.0]).unwrap();
        assert!((hit.distance - 2.0).abs() < 1e-6);
    }

    #[test]
    fn ties_resolve_to_first_row() {
        let index = NearestNeighbors::fit(vec![vec![1.0, 1.0], vec![1.0, 1.0]]).unwrap();
        assert_eq!(index.nearest(&[3.0, 3.0]).unwrap().index, 0);
    }

    #[test]
    fn rejects_bad_shapes() {
        assert!(NearestNeighbors::fit(vec![]).is_err());
        assert!(NearestNeighbors::fit(vec![vec![]]).is_err());
        assert!(NearestNeighbors::fit(vec![vec![1.0], vec![1.0, 2.0]]).is_err());
        let index = NearestNeighbors::fit(vec![vec![1.0, 2.0]]).unwrap();
        assert!(index.nearest(&[1.0]).is_err());
    }

    #[test]
    fn rejects_non_finite_values() {
        assert!(NearestNeighbors::fit(vec![vec![1.0, 0.0], vec![f32::NAN, 1.0]]).is_err());
        assert!(NearestNeighbors::fit(vec![vec![f32::INFINITY, 0.0]]).is_err());

        let index = NearestNeighbors::fit(vec![vec![1.0, 0.0], vec![0.0, 1.0]]).unwrap();
        assert!(index.nearest(&[f32::NAN, 1.0]).is_err());
        assert!(index.nearest(&[0.0, f32::NEG_INFINITY]).is_err());
    }
}
