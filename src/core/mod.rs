//! Core data types.

pub mod cloud;
pub mod normals;
pub mod snapshot;

pub use cloud::{Point, PointCloud};
pub use normals::{Normal, NormalField};
pub use snapshot::FrameSnapshot;
