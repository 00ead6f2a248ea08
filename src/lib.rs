//! Real-time depth sensor pipeline.
//!
//! This crate provides tools for:
//! - Estimating per-point surface normals on organized clouds (integral images)
//! - Clustering the normal field with DBSCAN over a KD-tree
//! - Publishing the latest per-frame snapshot to a consumer without blocking
//!   the sensor thread
//! - Driving the pipeline from a grabber (a synthetic depth camera is built in)
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use normal_pipeline::{
//!     pipeline::FramePipeline, processors::IntegralImageEstimator, sensor, PipelineConfig,
//! };
//!
//! let config = PipelineConfig::default();
//! let pipeline = Arc::new(
//!     FramePipeline::new(config.clone(), Box::new(IntegralImageEstimator)).unwrap(),
//! );
//! let mut grabber = sensor::open_device("", &config.sensor).unwrap();
//! grabber.register_callback(pipeline.frame_callback());
//! grabber.start().unwrap();
//!
//! let handoff = pipeline.handoff();
//! if let Some(snapshot) = handoff.take_latest() {
//!     println!("{} clusters", snapshot.num_clusters());
//! }
//! grabber.stop();
//! pipeline.shutdown();
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod pipeline;
pub mod processors;
pub mod sensor;
pub mod visualization;

pub use config::{
    ClusterSpace, ClusteringConfig, ConfigChange, NormalEstimationConfig, NormalEstimationMethod,
    PipelineConfig, SensorConfig,
};
pub use core::{FrameSnapshot, Normal, NormalField, PointCloud};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
