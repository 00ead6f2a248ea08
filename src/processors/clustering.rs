//! DBSCAN density clustering over a [`SpatialIndex`].
//!
//! This module implements a sequential, deterministic DBSCAN:
//! - points are visited in ascending index order
//! - clusters grow through an explicit FIFO worklist (no recursion)
//! - a border point belongs to the first cluster that reaches it
//!
//! Planar surfaces put thousands of identical normals next to each other, so
//! points in densely packed grid cells skip the tree query: every member of
//! such a cell is a core point, and the cell's own members are claimed once
//! for the whole cell. Labels are the same as with a query per point.
//!
//! # Example
//!
//! ```no_run
//! use normal_pipeline::processors::clustering::DensityClusterer;
//! use normal_pipeline::processors::spatial_index::SpatialIndex;
//!
//! let coords = vec![[0.0f32, 0.0, 0.0], [0.1, 0.0, 0.0], [5.0, 5.0, 5.0]];
//! let index = SpatialIndex::build(coords).unwrap();
//! let labeling = DensityClusterer::new(0.5, 1).unwrap().cluster(&index);
//! assert_eq!(labeling.num_clusters(), 1);
//! ```

use std::collections::{HashMap, VecDeque};

use thiserror::Error;

use super::spatial_index::{squared_distance, IndexError, SpatialIndex};
use crate::config::ClusteringConfig;

/// Errors that can occur when setting up a clustering run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClusterError {
    #[error("invalid clustering parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Result type for clustering operations.
pub type Result<T> = std::result::Result<T, ClusterError>;

/// Cluster assignment of a single point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    Noise,
    Cluster(usize),
}

impl Label {
    #[inline]
    pub fn is_noise(&self) -> bool {
        *self == Label::Noise
    }

    #[inline]
    pub fn cluster_id(&self) -> Option<usize> {
        match self {
            Label::Noise => None,
            Label::Cluster(id) => Some(*id),
        }
    }

    /// Integer form used by renderers: `-1` for noise. Ids beyond
    /// `i32::MAX` saturate.
    #[inline]
    pub fn as_i32(&self) -> i32 {
        match self {
            Label::Noise => -1,
            Label::Cluster(id) => i32::try_from(*id).unwrap_or(i32::MAX),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    Visited,
}

/// Result of one clustering run: exactly one label per point.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterLabeling {
    labels: Vec<Label>,
    num_clusters: usize,
}

impl ClusterLabeling {
    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn label(&self, index: usize) -> Label {
        self.labels[index]
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    /// Number of clusters found; ids run `0..num_clusters`.
    #[inline]
    pub fn num_clusters(&self) -> usize {
        self.num_clusters
    }

    pub fn noise_count(&self) -> usize {
        self.labels.iter().filter(|l| l.is_noise()).count()
    }

    /// Point count per cluster id.
    pub fn cluster_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.num_clusters];
        for label in &self.labels {
            if let Label::Cluster(id) = label {
                sizes[*id] += 1;
            }
        }
        sizes
    }

    /// Indices labeled with cluster `id`, ascending.
    pub fn members(&self, id: usize) -> Vec<usize> {
        self.labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == Label::Cluster(id))
            .map(|(i, _)| i)
            .collect()
    }

    /// Labels as integers, `-1` for noise.
    pub fn to_i32(&self) -> Vec<i32> {
        self.labels.iter().map(Label::as_i32).collect()
    }
}

/// Sorted, deduplicated union of two index sets, stored in `a`.
///
/// Both inputs are sorted first, so they may arrive in any order.
pub fn union_sorted(a: &mut Vec<usize>, b: &mut Vec<usize>) {
    a.sort_unstable();
    b.sort_unstable();

    let mut merged = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        if a[i] <= b[j] {
            merged.push(a[i]);
            i += 1;
        } else {
            merged.push(b[j]);
            j += 1;
        }
    }
    merged.extend_from_slice(&a[i..]);
    merged.extend_from_slice(&b[j..]);
    merged.dedup();

    *a = merged;
}

/// DBSCAN with a fixed radius and core-point threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityClusterer {
    radius: f32,
    min_neighbors: usize,
}

impl DensityClusterer {
    /// Create a clusterer.
    ///
    /// A point is a core point when at least `min_neighbors` other points lie
    /// within `radius` of it.
    ///
    /// # Errors
    ///
    /// [`ClusterError::InvalidParameter`] if `radius` is not a positive number
    /// or `min_neighbors` is zero.
    pub fn new(radius: f32, min_neighbors: usize) -> Result<Self> {
        if !(radius.is_finite() && radius > 0.0) {
            return Err(ClusterError::InvalidParameter {
                name: "radius",
                reason: format!("must be a positive number, got {}", radius),
            });
        }
        if min_neighbors < 1 {
            return Err(ClusterError::InvalidParameter {
                name: "min_neighbors",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(Self {
            radius,
            min_neighbors,
        })
    }

    pub fn from_config(config: &ClusteringConfig) -> Result<Self> {
        Self::new(config.radius, config.min_neighbors)
    }

    #[inline]
    pub fn radius(&self) -> f32 {
        self.radius
    }

    #[inline]
    pub fn min_neighbors(&self) -> usize {
        self.min_neighbors
    }

    /// Label every point of `index`.
    pub fn cluster(&self, index: &SpatialIndex) -> ClusterLabeling {
        let n = index.len();
        let mut visit = vec![VisitState::Unvisited; n];
        let mut labels = vec![Label::Noise; n];
        let mut next_cluster_id = 0usize;

        let mut dense = DenseCells::build(index, self.radius, self.min_neighbors);
        let mut neighbors = Vec::new();
        let mut worklist = VecDeque::new();

        for i in 0..n {
            if visit[i] == VisitState::Visited {
                continue;
            }
            visit[i] = VisitState::Visited;

            if !self.core_neighbors(index, &mut dense, i, &mut neighbors) {
                // Stays noise unless a later core point reaches it.
                continue;
            }

            let cluster = Label::Cluster(next_cluster_id);
            next_cluster_id += 1;

            let mut seeds = neighbors.clone();
            union_sorted(&mut seeds, &mut vec![i]);
            for &j in &seeds {
                if labels[j] == Label::Noise {
                    labels[j] = cluster;
                    worklist.push_back(j);
                }
            }

            // A label of `cluster` marks membership of the seed set, so each
            // point is queued at most once per cluster.
            while let Some(j) = worklist.pop_front() {
                if visit[j] == VisitState::Visited {
                    continue;
                }
                visit[j] = VisitState::Visited;

                if self.core_neighbors(index, &mut dense, j, &mut neighbors) {
                    for &k in &neighbors {
                        if labels[k] == Label::Noise {
                            labels[k] = cluster;
                            worklist.push_back(k);
                        }
                    }
                }
            }
        }

        ClusterLabeling {
            labels,
            num_clusters: next_cluster_id,
        }
    }

    /// Fill `out` with the neighbors of `point` that may still need a label
    /// and report whether `point` is a core point.
    ///
    /// Outside dense cells this is the plain radius query. Inside one, the
    /// members of a dense cell are returned only the first time that cell is
    /// reached; after that they all carry a label already.
    fn core_neighbors(
        &self,
        index: &SpatialIndex,
        dense: &mut DenseCells,
        point: usize,
        out: &mut Vec<usize>,
    ) -> bool {
        match dense.cell_of[point] {
            Some(cell) => {
                dense.neighbors_into(index, point, cell, self.radius, out);
                true
            }
            None => {
                index.radius_query_into(point, self.radius, out);
                out.len() >= self.min_neighbors
            }
        }
    }
}

/// Cells scanned on each side of a dense cell. Two cover `radius`, the third
/// absorbs rounding in the f32 distance test.
const CELL_REACH: i64 = 3;

/// Largest cell coordinate for which keys are exact enough to trust.
const MAX_CELL: f64 = 1e12;

type CellKey = (i64, i64, i64);

/// Grid cells of side `radius / 2` holding more than `min_neighbors` points.
///
/// Any two points in one cell are closer than `radius`, so every member of a
/// dense cell is a core point.
struct DenseCells {
    /// Points of every occupied cell.
    cells: Vec<Vec<usize>>,
    /// Dense cells are the first `dense` entries of `cells`.
    dense: usize,
    /// Dense cell of each point.
    cell_of: Vec<Option<usize>>,
    /// Occupied cells around each dense cell, candidates for the exact test.
    around: Vec<Vec<usize>>,
    /// Dense cells whose members all carry a label.
    claimed: Vec<bool>,
}

impl DenseCells {
    fn build(index: &SpatialIndex, radius: f32, min_neighbors: usize) -> Self {
        let mut dense = Self {
            cells: Vec::new(),
            dense: 0,
            cell_of: vec![None; index.len()],
            around: Vec::new(),
            claimed: Vec::new(),
        };

        let inv_side = 2.0 / radius as f64;
        let mut grid: HashMap<CellKey, Vec<usize>> = HashMap::new();
        for i in 0..index.len() {
            let c = index.coords(i);
            if !c.iter().all(|v| v.is_finite()) {
                continue;
            }
            match cell_key(&c, inv_side) {
                Some(key) => grid.entry(key).or_default().push(i),
                // Out of range for exact keys: query every point instead.
                None => return dense,
            }
        }

        let mut keys: Vec<CellKey> = grid.keys().copied().collect();
        keys.sort_unstable_by_key(|k| grid[k].len() <= min_neighbors);
        dense.dense = keys.iter().take_while(|k| grid[*k].len() > min_neighbors).count();
        if dense.dense == 0 {
            return dense;
        }

        let slot: HashMap<CellKey, usize> =
            keys.iter().enumerate().map(|(id, k)| (*k, id)).collect();
        for (id, key) in keys.iter().enumerate().take(dense.dense) {
            for &p in &grid[key] {
                dense.cell_of[p] = Some(id);
            }

            let mut around = Vec::new();
            for dx in -CELL_REACH..=CELL_REACH {
                for dy in -CELL_REACH..=CELL_REACH {
                    for dz in -CELL_REACH..=CELL_REACH {
                        if (dx, dy, dz) == (0, 0, 0) {
                            continue;
                        }
                        if let Some(&other) = slot.get(&(key.0 + dx, key.1 + dy, key.2 + dz)) {
                            around.push(other);
                        }
                    }
                }
            }
            dense.around.push(around);
        }
        dense.cells = keys
            .iter()
            .map(|k| grid.remove(k).unwrap_or_default())
            .collect();
        dense.claimed = vec![false; dense.dense];

        log::trace!("{} dense cells of side {}", dense.dense, radius / 2.0);
        dense
    }

    fn neighbors_into(
        &mut self,
        index: &SpatialIndex,
        point: usize,
        cell: usize,
        radius: f32,
        out: &mut Vec<usize>,
    ) {
        out.clear();
        if !self.claimed[cell] {
            self.claimed[cell] = true;
            out.extend(self.cells[cell].iter().copied().filter(|&m| m != point));
        }

        let center = index.coords(point);
        let radius_sq = radius * radius;
        for &other in &self.around[cell] {
            if other < self.dense && self.claimed[other] {
                continue;
            }
            out.extend(
                self.cells[other]
                    .iter()
                    .copied()
                    .filter(|&q| squared_distance(&index.coords(q), &center) <= radius_sq),
            );
        }
        out.sort_unstable();
    }
}

fn cell_key(point: &[f32; 3], inv_side: f64) -> Option<CellKey> {
    let cell = point.map(|v| (v as f64 * inv_side).floor());
    if cell.iter().any(|c| !c.is_finite() || c.abs() > MAX_CELL) {
        return None;
    }
    Some((cell[0] as i64, cell[1] as i64, cell[2] as i64))
}

/// Build an index over `coords` and cluster it with `config`.
pub fn cluster_points(coords: Vec<[f32; 3]>, config: &ClusteringConfig) -> Result<ClusterLabeling> {
    let clusterer = DensityClusterer::from_config(config)?;
    let index = SpatialIndex::build(coords)?;
    let labeling = clusterer.cluster(&index);
    log::debug!(
        "clustered {} points into {} clusters ({} noise)",
        labeling.len(),
        labeling.num_clusters(),
        labeling.noise_count()
    );
    Ok(labeling)
}
