//! Immutable per-frame result handed from the producer to the consumer.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::cloud::PointCloud;
use super::normals::NormalField;
use crate::config::NormalEstimationMethod;
use crate::processors::clustering::ClusterLabeling;

/// One self-consistent frame: cloud, normals and cluster labels.
///
/// Built fresh for every frame and never modified after publishing.
#[derive(Debug, Clone)]
pub struct FrameSnapshot {
    /// Monotonic frame counter assigned by the pipeline.
    pub sequence: u64,
    pub cloud: Arc<PointCloud>,
    pub normals: NormalField,
    pub labeling: ClusterLabeling,
    /// Wall-clock time the snapshot was assembled.
    pub timestamp: SystemTime,
    /// Method the normals were estimated with.
    pub method: NormalEstimationMethod,
    /// Time spent from frame arrival to snapshot assembly.
    pub processing_time: Duration,
}

impl FrameSnapshot {
    #[inline]
    pub fn len(&self) -> usize {
        self.cloud.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.cloud.is_empty()
    }

    #[inline]
    pub fn num_clusters(&self) -> usize {
        self.labeling.num_clusters()
    }
}
