//! Simulated depth camera.
//!
//! Ray-casts a small scene through a pinhole camera at the configured
//! resolution. Camera frame: x right, y down, z forward, sensor at the origin.
//!
//! ```text
//!        ┌───────────── back wall (z = 3.0) ─────────────┐
//!        │                                               │
//!        │            ( sphere, swings along x )         │
//!        │                                               │
//!        └──────────────── floor (y = 0.8) ──────────────┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{FrameCallback, Grabber, Result, SensorError};
use crate::config::SensorConfig;
use crate::core::cloud::PointCloud;

/// Focal length of a 640 px wide depth camera; scaled with the image width.
const REFERENCE_FOCAL: f32 = 525.0;
const REFERENCE_WIDTH: f32 = 640.0;

const FLOOR_Y: f32 = 0.8;
const WALL_Z: f32 = 3.0;
const SPHERE_RADIUS: f32 = 0.35;
const SPHERE_CENTER: [f32; 3] = [0.0, 0.3, 1.8];
/// Sphere swing amplitude (m) and period (s).
const SWING: f32 = 0.6;
const SWING_PERIOD: f32 = 4.0;
/// Returns beyond this range are invalid.
const MAX_RANGE: f32 = 4.0;

/// The static scene plus camera intrinsics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyntheticScene {
    pub width: usize,
    pub height: usize,
    fx: f32,
    fy: f32,
    cx: f32,
    cy: f32,
}

impl SyntheticScene {
    pub fn new(width: usize, height: usize) -> Self {
        let f = REFERENCE_FOCAL * width as f32 / REFERENCE_WIDTH;
        Self {
            width,
            height,
            fx: f,
            fy: f,
            cx: (width as f32 - 1.0) / 2.0,
            cy: (height as f32 - 1.0) / 2.0,
        }
    }

    /// Sphere center at time `t` seconds.
    pub fn sphere_center(&self, t: f32) -> [f32; 3] {
        let phase = t / SWING_PERIOD * std::f32::consts::TAU;
        [
            SPHERE_CENTER[0] + SWING * phase.sin(),
            SPHERE_CENTER[1],
            SPHERE_CENTER[2],
        ]
    }

    /// Render the organized cloud seen at time `t` seconds.
    pub fn render(&self, t: f32) -> PointCloud {
        let mut cloud = PointCloud::organized(self.width, self.height);
        let center = self.sphere_center(t);

        for v in 0..self.height {
            for u in 0..self.width {
                let ray = [
                    (u as f32 - self.cx) / self.fx,
                    (v as f32 - self.cy) / self.fy,
                    1.0,
                ];
                if let Some(depth) = self.cast(ray, center) {
                    cloud.set(
                        v * self.width + u,
                        [ray[0] * depth, ray[1] * depth, depth],
                    );
                }
            }
        }
        cloud
    }

    /// Depth (z) of the nearest hit along `ray`, which has unit z.
    fn cast(&self, ray: [f32; 3], sphere: [f32; 3]) -> Option<f32> {
        let mut nearest = WALL_Z;

        if ray[1] > 0.0 {
            nearest = nearest.min(FLOOR_Y / ray[1]);
        }

        // |t * ray - c|^2 = r^2
        let a = ray[0] * ray[0] + ray[1] * ray[1] + 1.0;
        let b = -2.0 * (ray[0] * sphere[0] + ray[1] * sphere[1] + sphere[2]);
        let c = sphere[0] * sphere[0] + sphere[1] * sphere[1] + sphere[2] * sphere[2]
            - SPHERE_RADIUS * SPHERE_RADIUS;
        let disc = b * b - 4.0 * a * c;
        if disc >= 0.0 {
            let t = (-b - disc.sqrt()) / (2.0 * a);
            if t > 0.0 {
                nearest = nearest.min(t);
            }
        }

        let range = nearest * (ray[0] * ray[0] + ray[1] * ray[1] + 1.0).sqrt();
        (range <= MAX_RANGE).then_some(nearest)
    }
}

/// Grabber driving a [`SyntheticScene`] at the configured frame rate.
pub struct SyntheticGrabber {
    config: SensorConfig,
    scene: SyntheticScene,
    frame_limit: Option<u64>,
    callback: Option<FrameCallback>,
    running: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl SyntheticGrabber {
    pub fn new(config: SensorConfig) -> Self {
        let scene = SyntheticScene::new(config.width, config.height);
        Self {
            config,
            scene,
            frame_limit: None,
            callback: None,
            running: Arc::new(AtomicBool::new(false)),
            delivered: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Stop by itself after `limit` frames.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    /// Block until the acquisition thread exits.
    pub fn join(&mut self) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("synthetic camera thread panicked");
            }
        }
        self.running.store(false, Ordering::Release);
    }
}

impl Grabber for SyntheticGrabber {
    fn device_id(&self) -> &str {
        "synthetic"
    }

    fn register_callback(&mut self, callback: FrameCallback) {
        self.callback = Some(callback);
    }

    fn start(&mut self) -> Result<()> {
        if self.is_running() {
            return Err(SensorError::AlreadyRunning(self.device_id().to_string()));
        }
        // Reap a thread that ended on its own.
        self.join();

        let callback = self.callback.clone().ok_or(SensorError::NoCallback)?;
        let scene = self.scene;
        let limit = self.frame_limit;
        let interval = Duration::from_secs_f32(1.0 / self.config.fps);
        let running = Arc::clone(&self.running);
        let delivered = Arc::clone(&self.delivered);

        delivered.store(0, Ordering::Relaxed);
        running.store(true, Ordering::Release);

        let handle = thread::Builder::new()
            .name("synthetic-camera".into())
            .spawn(move || {
                let started = Instant::now();
                let mut frame = 0u64;
                while running.load(Ordering::Acquire) && limit.map_or(true, |l| frame < l) {
                    let tick = Instant::now();
                    let t = frame as f32 * interval.as_secs_f32();
                    callback(Arc::new(scene.render(t)));
                    frame += 1;
                    delivered.store(frame, Ordering::Relaxed);

                    let elapsed = tick.elapsed();
                    if elapsed < interval {
                        thread::sleep(interval - elapsed);
                    }
                }
                running.store(false, Ordering::Release);
                log::debug!(
                    "synthetic camera stopped after {} frames in {:.2?}",
                    frame,
                    started.elapsed()
                );
            })
            .map_err(|e| {
                self.running.store(false, Ordering::Release);
                SensorError::ThreadSpawn(e)
            })?;

        self.handle = Some(handle);
        log::info!("synthetic camera started");
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        self.join();
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn frames_delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

impl Drop for SyntheticGrabber {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NormalEstimationConfig, NormalEstimationMethod};
    use crate::processors::normals::{IntegralImageEstimator, NormalEstimator};

    fn fast_config() -> SensorConfig {
        SensorConfig {
            fps: 500.0,
            ..SensorConfig::default()
        }
    }

    #[test]
    fn test_render_is_organized() {
        let scene = SyntheticScene::new(160, 120);
        let cloud = scene.render(0.0);
        assert!(cloud.is_organized());
        assert_eq!(cloud.len(), 160 * 120);
        assert_eq!(cloud.valid_count(), cloud.len());
    }

    #[test]
    fn test_render_hits_expected_surfaces() {
        let scene = SyntheticScene::new(160, 120);
        let cloud = scene.render(0.0);

        // Top-left corner looks at the back wall.
        assert!((cloud.coords_at(0)[2] - WALL_Z).abs() < 1e-5);

        // Bottom row lands on the floor.
        let bottom = cloud.coords_at(119 * 160 + 80);
        assert!((bottom[1] - FLOOR_Y).abs() < 1e-4);

        // The center pixel hits the front of the sphere.
        let [cx, cy, cz] = scene.sphere_center(0.0);
        let center = cloud.coords_at(60 * 160 + 80);
        let d = ((center[0] - cx).powi(2) + (center[1] - cy).powi(2) + (center[2] - cz).powi(2))
            .sqrt();
        assert!((d - SPHERE_RADIUS).abs() < 1e-3);
        assert!(center[2] < cz);
    }

    #[test]
    fn test_sphere_moves() {
        let scene = SyntheticScene::new(160, 120);
        let a = scene.sphere_center(0.0);
        let b = scene.sphere_center(SWING_PERIOD / 4.0);
        assert!((b[0] - a[0] - SWING).abs() < 1e-4);
    }

    #[test]
    fn test_frame_limit_delivers_exact_count() {
        let seen = Arc::new(AtomicU64::new(0));
        let mut grabber = SyntheticGrabber::new(fast_config()).with_frame_limit(5);
        {
            let seen = Arc::clone(&seen);
            grabber.register_callback(Arc::new(move |cloud| {
                assert!(cloud.is_organized());
                seen.fetch_add(1, Ordering::Relaxed);
            }));
        }
        grabber.start().unwrap();
        grabber.join();

        assert_eq!(seen.load(Ordering::Relaxed), 5);
        assert_eq!(grabber.frames_delivered(), 5);
        assert!(!grabber.is_running());
    }

    #[test]
    fn test_start_without_callback() {
        let mut grabber = SyntheticGrabber::new(fast_config());
        assert!(matches!(grabber.start(), Err(SensorError::NoCallback)));
        assert!(!grabber.is_running());
    }

    #[test]
    fn test_double_start_and_stop() {
        let mut grabber = SyntheticGrabber::new(fast_config());
        grabber.register_callback(Arc::new(|_| {}));
        grabber.start().unwrap();
        assert!(grabber.is_running());
        assert!(matches!(grabber.start(), Err(SensorError::AlreadyRunning(_))));

        grabber.stop();
        assert!(!grabber.is_running());

        // Restart after stop is allowed.
        grabber.start().unwrap();
        grabber.stop();
    }

    #[test]
    fn test_synthetic_frame_yields_normals() {
        let scene = SyntheticScene::new(160, 120);
        let cloud = scene.render(0.0);
        let config = NormalEstimationConfig {
            method: NormalEstimationMethod::CovarianceMatrix,
            ..NormalEstimationConfig::default()
        };
        let normals = IntegralImageEstimator.estimate(&cloud, &config).unwrap();
        assert_eq!(normals.len(), cloud.len());
        assert!(normals.valid_count() > cloud.len() / 2);

        // A floor pixel well away from the sphere faces up toward the camera.
        let floor = normals.get(115 * 160 + 20).unwrap();
        assert!(floor.is_valid());
        assert!(floor.normal[1] < -0.9);
    }
}
