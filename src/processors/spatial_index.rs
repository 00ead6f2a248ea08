//! Exact radius search over a per-frame KD-tree.
//!
//! The index is built once per frame and never mutated. Coordinates that are
//! not finite (invalid depth pixels, points without a normal) are left out of
//! the tree and report an empty neighborhood.

use kiddo::{ImmutableKdTree, SquaredEuclidean};
use thiserror::Error;

/// Errors that can occur while building an index.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    #[error("cannot build a spatial index over an empty point set")]
    EmptyInput,
}

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Relative slack added to the tree query so boundary points survive the
/// tree's own distance comparison; the exact test runs afterwards.
const QUERY_SLACK: f32 = 1e-4;

/// Radius-query index over a fixed set of 3D coordinates.
pub struct SpatialIndex {
    coords: Vec<[f32; 3]>,
    tree: Option<ImmutableKdTree<f32, 3>>,
    /// Tree item -> original point index.
    tree_ids: Vec<usize>,
}

impl SpatialIndex {
    /// Build an index over `coords`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::EmptyInput`] if `coords` is empty.
    pub fn build(coords: Vec<[f32; 3]>) -> Result<Self> {
        if coords.is_empty() {
            return Err(IndexError::EmptyInput);
        }

        let mut finite = Vec::with_capacity(coords.len());
        let mut tree_ids = Vec::with_capacity(coords.len());
        for (i, c) in coords.iter().enumerate() {
            if c.iter().all(|v| v.is_finite()) {
                finite.push(*c);
                tree_ids.push(i);
            }
        }

        let tree = if finite.is_empty() {
            None
        } else {
            Some(ImmutableKdTree::new_from_slice(&finite))
        };

        Ok(Self {
            coords,
            tree,
            tree_ids,
        })
    }

    /// Number of points covered by the index, including non-finite ones.
    #[inline]
    pub fn len(&self) -> usize {
        self.coords.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// Number of points actually stored in the tree.
    #[inline]
    pub fn indexed_len(&self) -> usize {
        self.tree_ids.len()
    }

    #[inline]
    pub fn coords(&self, index: usize) -> [f32; 3] {
        self.coords[index]
    }

    /// All indices within Euclidean distance `radius` of point `center`,
    /// excluding `center` itself, in ascending order.
    pub fn radius_query(&self, center: usize, radius: f32) -> Vec<usize> {
        let mut out = Vec::new();
        self.radius_query_into(center, radius, &mut out);
        out
    }

    /// Like [`SpatialIndex::radius_query`] but reuses `out`'s allocation.
    pub fn radius_query_into(&self, center: usize, radius: f32, out: &mut Vec<usize>) {
        out.clear();
        let tree = match &self.tree {
            Some(tree) => tree,
            None => return,
        };
        let query = self.coords[center];
        if !query.iter().all(|v| v.is_finite()) || radius.is_nan() || radius < 0.0 {
            return;
        }

        let radius_sq = radius * radius;
        let padded = radius_sq * (1.0 + QUERY_SLACK) + f32::EPSILON;

        for nn in tree.within::<SquaredEuclidean>(&query, padded) {
            let idx = self.tree_ids[nn.item as usize];
            if idx != center && squared_distance(&self.coords[idx], &query) <= radius_sq {
                out.push(idx);
            }
        }
        out.sort_unstable();
    }
}

/// The distance test every neighbor decision goes through.
#[inline]
pub(crate) fn squared_distance(a: &[f32; 3], b: &[f32; 3]) -> f32 {
    let dx = a[0] - b[0];
    let dy = a[1] - b[1];
    let dz = a[2] - b[2];
    dx * dx + dy * dy + dz * dz
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn brute_force(coords: &[[f32; 3]], center: usize, radius: f32) -> Vec<usize> {
        (0..coords.len())
            .filter(|&j| j != center && squared_distance(&coords[j], &coords[center]) <= radius * radius)
            .collect()
    }

    #[test]
    fn test_build_empty_fails() {
        assert_eq!(
            SpatialIndex::build(Vec::new()).err(),
            Some(IndexError::EmptyInput)
        );
    }

    #[test]
    fn test_query_excludes_self_and_is_sorted() {
        let coords = vec![
            [0.5, 0.0, 0.0],
            [10.0, 0.0, 0.0],
            [0.0, 0.0, 0.0],
            [0.0, 0.5, 0.0],
        ];
        let index = SpatialIndex::build(coords).unwrap();
        assert_eq!(index.radius_query(2, 1.0), vec![0, 3]);
        assert_eq!(index.radius_query(1, 1.0), Vec::<usize>::new());
    }

    #[test]
    fn test_query_includes_boundary() {
        let coords = vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let index = SpatialIndex::build(coords).unwrap();
        assert_eq!(index.radius_query(0, 1.0), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_points_are_neighbors() {
        let coords = vec![[1.0, 1.0, 1.0]; 3];
        let index = SpatialIndex::build(coords).unwrap();
        assert_eq!(index.radius_query(1, 0.01), vec![0, 2]);
    }

    #[test]
    fn test_non_finite_points_are_isolated() {
        let coords = vec![
            [0.0, 0.0, 0.0],
            [f32::NAN, 0.0, 0.0],
            [0.1, 0.0, 0.0],
        ];
        let index = SpatialIndex::build(coords).unwrap();
        assert_eq!(index.len(), 3);
        assert_eq!(index.indexed_len(), 2);
        assert_eq!(index.radius_query(0, 1.0), vec![2]);
        assert!(index.radius_query(1, 1.0).is_empty());
    }

    #[test]
    fn test_all_non_finite_builds_but_has_no_neighbors() {
        let coords = vec![[f32::NAN; 3]; 4];
        let index = SpatialIndex::build(coords).unwrap();
        assert_eq!(index.indexed_len(), 0);
        assert!(index.radius_query(0, 10.0).is_empty());
    }

    proptest! {
        #[test]
        fn prop_radius_query_matches_brute_force(
            coords in prop::collection::vec(prop::array::uniform3(-5.0f32..5.0), 1..120),
            radius in 0.05f32..3.0,
        ) {
            let index = SpatialIndex::build(coords.clone()).unwrap();
            for center in 0..coords.len() {
                prop_assert_eq!(index.radius_query(center, radius), brute_force(&coords, center, radius));
            }
        }
    }
}
