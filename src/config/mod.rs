//! Configuration types for the normal pipeline.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Result type for configuration operations.
pub type Result<T> = std::result::Result<T, ConfigError>;

/// Normal estimation method for organized clouds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NormalEstimationMethod {
    /// Smallest eigenvector of the windowed covariance matrix.
    CovarianceMatrix,
    /// Cross product of window-averaged horizontal and vertical 3D gradients.
    #[serde(rename = "average_3d_gradient")]
    Average3DGradient,
    /// Normal from window-averaged depth changes along both image axes.
    AverageDepthChange,
    /// Cross product of single-sample horizontal and vertical 3D gradients.
    #[serde(rename = "simple_3d_gradient")]
    Simple3DGradient,
}

impl NormalEstimationMethod {
    pub const ALL: [NormalEstimationMethod; 4] = [
        NormalEstimationMethod::CovarianceMatrix,
        NormalEstimationMethod::Average3DGradient,
        NormalEstimationMethod::AverageDepthChange,
        NormalEstimationMethod::Simple3DGradient,
    ];

    /// Viewer key binding: `1`..`4` select the methods in [`Self::ALL`] order.
    pub fn from_key(key: char) -> Option<Self> {
        match key {
            '1' => Some(Self::CovarianceMatrix),
            '2' => Some(Self::Average3DGradient),
            '3' => Some(Self::AverageDepthChange),
            '4' => Some(Self::Simple3DGradient),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::CovarianceMatrix => "COVARIANCE_MATRIX",
            Self::Average3DGradient => "AVERAGE_3D_GRADIENT",
            Self::AverageDepthChange => "AVERAGE_DEPTH_CHANGE",
            Self::Simple3DGradient => "SIMPLE_3D_GRADIENT",
        }
    }
}

impl fmt::Display for NormalEstimationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which coordinates the clusterer indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterSpace {
    /// Group points with similar surface orientation.
    #[default]
    Normals,
    /// Group points by spatial proximity.
    Positions,
}

/// Configuration for normal estimation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalEstimationConfig {
    #[serde(default = "default_method")]
    pub method: NormalEstimationMethod,

    /// Grow the smoothing window with depth
    #[serde(default = "default_depth_dependent_smoothing")]
    pub depth_dependent_smoothing: bool,

    /// Depth jump (relative to depth) treated as an object border
    #[serde(default = "default_max_depth_change_factor")]
    pub max_depth_change_factor: f32,

    /// Smoothing window size in pixels
    #[serde(default = "default_normal_smoothing_size")]
    pub normal_smoothing_size: f32,
}

fn default_method() -> NormalEstimationMethod {
    NormalEstimationMethod::Simple3DGradient
}

fn default_depth_dependent_smoothing() -> bool {
    true
}

fn default_max_depth_change_factor() -> f32 {
    0.02
}

fn default_normal_smoothing_size() -> f32 {
    15.0
}

impl Default for NormalEstimationConfig {
    fn default() -> Self {
        Self {
            method: default_method(),
            depth_dependent_smoothing: default_depth_dependent_smoothing(),
            max_depth_change_factor: default_max_depth_change_factor(),
            normal_smoothing_size: default_normal_smoothing_size(),
        }
    }
}

impl NormalEstimationConfig {
    pub fn validate(&self) -> Result<()> {
        positive("max_depth_change_factor", self.max_depth_change_factor)?;
        positive("normal_smoothing_size", self.normal_smoothing_size)?;
        Ok(())
    }
}

/// Configuration for DBSCAN clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusteringConfig {
    /// Neighborhood radius
    #[serde(default = "default_radius")]
    pub radius: f32,

    /// Neighbors (excluding the point itself) needed for a core point
    #[serde(default = "default_min_neighbors")]
    pub min_neighbors: usize,

    #[serde(default)]
    pub space: ClusterSpace,
}

// In normal space: tight enough to split the floor from the wall, with a core
// threshold a curved surface's spread-out normals never reach.
fn default_radius() -> f32 {
    0.05
}

fn default_min_neighbors() -> usize {
    200
}

impl Default for ClusteringConfig {
    fn default() -> Self {
        Self {
            radius: default_radius(),
            min_neighbors: default_min_neighbors(),
            space: ClusterSpace::default(),
        }
    }
}

impl ClusteringConfig {
    pub fn validate(&self) -> Result<()> {
        positive("clustering.radius", self.radius)?;
        if self.min_neighbors < 1 {
            return Err(ConfigError::InvalidParameter {
                name: "clustering.min_neighbors",
                reason: format!("must be at least 1, got {}", self.min_neighbors),
            });
        }
        Ok(())
    }
}

/// Sensor selection and frame geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Device identifier handed to the driver ("" picks the first device)
    #[serde(default)]
    pub device_id: String,

    #[serde(default = "default_width")]
    pub width: usize,

    #[serde(default = "default_height")]
    pub height: usize,

    /// Frames per second
    #[serde(default = "default_fps")]
    pub fps: f32,
}

fn default_width() -> usize {
    160
}

fn default_height() -> usize {
    120
}

fn default_fps() -> f32 {
    30.0
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
        }
    }
}

/// Main pipeline configuration combining all sub-configs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub normals: NormalEstimationConfig,

    #[serde(default)]
    pub clustering: ClusteringConfig,

    #[serde(default)]
    pub sensor: SensorConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: PipelineConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a YAML file.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Check every runtime parameter the pipeline depends on.
    pub fn validate(&self) -> Result<()> {
        self.normals.validate()?;
        self.clustering.validate()?;
        Ok(())
    }

    /// Apply a single change, validating the result before committing it.
    pub fn apply(&mut self, change: ConfigChange) -> Result<()> {
        let mut next = self.clone();
        match change {
            ConfigChange::Method(method) => next.normals.method = method,
            ConfigChange::ClusterRadius(radius) => next.clustering.radius = radius,
            ConfigChange::MinNeighbors(n) => next.clustering.min_neighbors = n,
            ConfigChange::ClusterSpace(space) => next.clustering.space = space,
            ConfigChange::DepthDependentSmoothing(on) => {
                next.normals.depth_dependent_smoothing = on
            }
            ConfigChange::MaxDepthChangeFactor(f) => next.normals.max_depth_change_factor = f,
            ConfigChange::NormalSmoothingSize(s) => next.normals.normal_smoothing_size = s,
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

/// One runtime configuration mutation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConfigChange {
    Method(NormalEstimationMethod),
    ClusterRadius(f32),
    MinNeighbors(usize),
    ClusterSpace(ClusterSpace),
    DepthDependentSmoothing(bool),
    MaxDepthChangeFactor(f32),
    NormalSmoothingSize(f32),
}

fn positive(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidParameter {
            name,
            reason: format!("must be a positive number, got {}", value),
        })
    }
}
