//! Snapshot rendering.
//!
//! Writes a frame snapshot as a PNG image using the plotters bitmap backend.
//! Organized clouds are drawn as a depth image, one block of `scale x scale`
//! pixels per point, colored by cluster. Points without a cluster are drawn
//! in the noise color, invalid points are left black.

use std::path::Path;

use plotters::prelude::*;
use plotters_bitmap::BitMapBackend;
use thiserror::Error;

use crate::core::snapshot::FrameSnapshot;
use crate::processors::clustering::Label;

/// Errors that can occur during rendering.
#[derive(Error, Debug)]
pub enum VisualizationError {
    #[error("Plotting error: {0}")]
    PlottingError(String),

    #[error("Empty snapshot")]
    EmptySnapshot,

    #[error("Snapshot is not an organized cloud ({width}x{height})")]
    Unorganized { width: usize, height: usize },

    #[error("Invalid scale: {0}")]
    InvalidScale(u32),
}

/// Result type for visualization operations.
pub type Result<T> = std::result::Result<T, VisualizationError>;

/// Color palette for cluster visualization.
const CLUSTER_COLORS: &[(u8, u8, u8)] = &[
    (228, 26, 28),   // Red
    (55, 126, 184),  // Blue
    (77, 175, 74),   // Green
    (152, 78, 163),  // Purple
    (255, 127, 0),   // Orange
    (255, 255, 51),  // Yellow
    (166, 86, 40),   // Brown
    (247, 129, 191), // Pink
    (0, 206, 209),   // Turquoise
    (138, 43, 226),  // Blue Violet
    (50, 205, 50),   // Lime Green
    (255, 20, 147),  // Deep Pink
    (0, 191, 255),   // Deep Sky Blue
    (255, 215, 0),   // Gold
];

/// Noise color (gray) for points in no cluster.
const NOISE_COLOR: (u8, u8, u8) = (128, 128, 128);

/// Color of a point without valid coordinates.
const INVALID_COLOR: (u8, u8, u8) = (0, 0, 0);

/// Color assigned to a cluster label.
pub fn label_color(label: Label) -> RGBColor {
    let (r, g, b) = label
        .cluster_id()
        .map_or(NOISE_COLOR, |id| CLUSTER_COLORS[id % CLUSTER_COLORS.len()]);
    RGBColor(r, g, b)
}

/// Render `snapshot` to a PNG at `output_path`.
///
/// # Arguments
///
/// * `output_path` - Path to save the PNG image
/// * `snapshot` - Snapshot of an organized cloud
/// * `scale` - Output pixels per cloud point along each axis
pub fn render_snapshot(output_path: &Path, snapshot: &FrameSnapshot, scale: u32) -> Result<()> {
    let cloud = &snapshot.cloud;
    if cloud.is_empty() {
        return Err(VisualizationError::EmptySnapshot);
    }
    if !cloud.is_organized() {
        return Err(VisualizationError::Unorganized {
            width: cloud.width,
            height: cloud.height,
        });
    }
    if scale == 0 {
        return Err(VisualizationError::InvalidScale(scale));
    }

    let width = cloud.width as u32 * scale;
    let height = cloud.height as u32 * scale;
    let root = BitMapBackend::new(output_path, (width, height)).into_drawing_area();

    root.fill(&BLACK)
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    let block = scale as i32;
    let labels = snapshot.labeling.labels();
    for i in 0..cloud.len() {
        let color = if cloud.point(i).is_valid() {
            labels.get(i).copied().map_or_else(
                || RGBColor(NOISE_COLOR.0, NOISE_COLOR.1, NOISE_COLOR.2),
                label_color,
            )
        } else {
            RGBColor(INVALID_COLOR.0, INVALID_COLOR.1, INVALID_COLOR.2)
        };
        if color == BLACK {
            continue;
        }
        let x = (i % cloud.width) as i32 * block;
        let y = (i / cloud.width) as i32 * block;
        root.draw(&Rectangle::new(
            [(x, y), (x + block - 1, y + block - 1)],
            color.filled(),
        ))
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;
    }

    root.present()
        .map_err(|e| VisualizationError::PlottingError(e.to_string()))?;

    log::debug!(
        "rendered snapshot {} ({} clusters) to {}",
        snapshot.sequence,
        snapshot.num_clusters(),
        output_path.display()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PipelineConfig;
    use crate::core::cloud::PointCloud;
    use crate::pipeline::FramePipeline;
    use crate::processors::normals::IntegralImageEstimator;
    use crate::sensor::SyntheticScene;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn synthetic_snapshot() -> FrameSnapshot {
        let pipeline =
            FramePipeline::new(PipelineConfig::default(), Box::new(IntegralImageEstimator))
                .unwrap();
        let cloud = Arc::new(SyntheticScene::new(32, 24).render(0.0));
        pipeline
            .process(cloud, &PipelineConfig::default())
            .unwrap()
    }

    #[test]
    fn test_label_colors() {
        assert_eq!(label_color(Label::Noise), RGBColor(128, 128, 128));
        assert_eq!(label_color(Label::Cluster(0)), RGBColor(228, 26, 28));
        assert_eq!(
            label_color(Label::Cluster(CLUSTER_COLORS.len())),
            label_color(Label::Cluster(0))
        );
    }

    #[test]
    fn test_render_writes_png() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let snapshot = synthetic_snapshot();

        render_snapshot(&path, &snapshot, 2).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.len() > 8);
        assert_eq!(&bytes[1..4], b"PNG");
    }

    #[test]
    fn test_render_rejects_unorganized() {
        let dir = tempdir().unwrap();
        let mut snapshot = synthetic_snapshot();
        snapshot.cloud = Arc::new(PointCloud::from_coords(&[[0.0, 0.0, 1.0]]));
        assert!(matches!(
            render_snapshot(&dir.path().join("x.png"), &snapshot, 1),
            Err(VisualizationError::Unorganized { .. })
        ));
    }

    #[test]
    fn test_render_rejects_zero_scale() {
        let dir = tempdir().unwrap();
        let snapshot = synthetic_snapshot();
        assert!(matches!(
            render_snapshot(&dir.path().join("x.png"), &snapshot, 0),
            Err(VisualizationError::InvalidScale(0))
        ));
    }
}
