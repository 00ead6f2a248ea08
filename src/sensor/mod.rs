//! Frame sources.
//!
//! A [`Grabber`] owns an acquisition thread and hands every captured cloud to
//! a registered [`FrameCallback`]. Devices are selected by id string through
//! [`open_device`]; the only built-in device is the synthetic depth camera.

mod synthetic;

use std::sync::Arc;

use thiserror::Error;

use crate::config::SensorConfig;
use crate::core::cloud::PointCloud;

pub use synthetic::{SyntheticGrabber, SyntheticScene};

/// Errors raised while opening or driving a frame source.
#[derive(Error, Debug)]
pub enum SensorError {
    #[error("no device matches '{0}'")]
    DeviceNotFound(String),

    #[error("device '{0}' is already running")]
    AlreadyRunning(String),

    #[error("no frame callback registered")]
    NoCallback,

    #[error("invalid sensor setting '{name}': {reason}")]
    InvalidConfig { name: &'static str, reason: String },

    #[error("failed to spawn acquisition thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),
}

/// Result type for sensor operations.
pub type Result<T> = std::result::Result<T, SensorError>;

/// Callback invoked on the acquisition thread for every frame.
pub type FrameCallback = Arc<dyn Fn(Arc<PointCloud>) + Send + Sync>;

/// A device that produces point-cloud frames on its own thread.
pub trait Grabber: Send {
    fn device_id(&self) -> &str;

    /// Replace the frame callback. Takes effect at the next `start`.
    fn register_callback(&mut self, callback: FrameCallback);

    /// Start acquisition.
    fn start(&mut self) -> Result<()>;

    /// Stop acquisition and join the acquisition thread.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    /// Number of frames delivered since the last `start`.
    fn frames_delivered(&self) -> u64;
}

/// A device [`open_device`] can open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub id: &'static str,
    pub description: &'static str,
}

/// Id strings accepted for the synthetic camera.
const SYNTHETIC_IDS: &[&str] = &["", "#1", "synthetic"];

/// Enumerate the available devices.
pub fn list_devices() -> Vec<DeviceInfo> {
    vec![DeviceInfo {
        id: "synthetic",
        description: "simulated depth camera (floor, back wall, moving sphere)",
    }]
}

/// Open the device named by `device_id`.
///
/// An empty id or `#1` selects the first device.
pub fn open_device(device_id: &str, config: &SensorConfig) -> Result<Box<dyn Grabber>> {
    if !SYNTHETIC_IDS.contains(&device_id) {
        return Err(SensorError::DeviceNotFound(device_id.to_string()));
    }
    validate(config)?;
    log::info!(
        "opened synthetic depth camera ({}x{} @ {} Hz)",
        config.width,
        config.height,
        config.fps
    );
    Ok(Box::new(SyntheticGrabber::new(config.clone())))
}

fn validate(config: &SensorConfig) -> Result<()> {
    if config.width < 2 || config.height < 2 {
        return Err(SensorError::InvalidConfig {
            name: "width/height",
            reason: format!("{}x{} is too small", config.width, config.height),
        });
    }
    if !(config.fps.is_finite() && config.fps > 0.0) {
        return Err(SensorError::InvalidConfig {
            name: "fps",
            reason: format!("must be a positive number, got {}", config.fps),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_device_ids() {
        let config = SensorConfig::default();
        for id in ["", "#1", "synthetic"] {
            let grabber = open_device(id, &config).unwrap();
            assert_eq!(grabber.device_id(), "synthetic");
            assert!(!grabber.is_running());
        }
    }

    #[test]
    fn test_open_unknown_device() {
        let err = open_device("#2", &SensorConfig::default()).err().unwrap();
        assert!(matches!(err, SensorError::DeviceNotFound(id) if id == "#2"));
    }

    #[test]
    fn test_open_rejects_bad_fps() {
        let config = SensorConfig {
            fps: 0.0,
            ..SensorConfig::default()
        };
        assert!(matches!(
            open_device("", &config),
            Err(SensorError::InvalidConfig { name: "fps", .. })
        ));
    }

    #[test]
    fn test_list_devices() {
        let devices = list_devices();
        assert_eq!(devices.len(), 1);
        assert!(open_device(devices[0].id, &SensorConfig::default()).is_ok());
    }
}
