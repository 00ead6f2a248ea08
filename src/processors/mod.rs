//! Per-frame geometry processing.

pub mod clustering;
pub mod normals;
pub mod spatial_index;

// Re-export key types for convenience
pub use clustering::{
    cluster_points, union_sorted, ClusterError, ClusterLabeling, DensityClusterer, Label,
};
pub use normals::{IntegralImageEstimator, NormalEstimationError, NormalEstimator};
pub use spatial_index::{IndexError, SpatialIndex};
