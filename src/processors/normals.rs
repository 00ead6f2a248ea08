//! Integral-image normal estimation for organized point clouds.
//!
//! Normal estimation is reached through the [`NormalEstimator`] trait so the
//! pipeline can run against any backend. [`IntegralImageEstimator`] is the
//! built-in one. It works on depth images (organized clouds) and supports
//! four methods:
//!
//! | Method | Normal from |
//! |--------|-------------|
//! | `CovarianceMatrix` | smallest eigenvector of the window covariance |
//! | `Average3DGradient` | cross product of window-averaged 3D gradients |
//! | `AverageDepthChange` | window-averaged depth change along both axes |
//! | `Simple3DGradient` | cross product of single-sample 3D gradients |
//!
//! Window sums come from summed-area tables, so each pixel costs O(1)
//! regardless of smoothing size. The window shrinks near depth
//! discontinuities (a chamfer distance map over depth-change borders) and
//! pixels closer than two pixels to a border get no normal. All normals are
//! flipped to face the sensor origin.

use nalgebra::{Matrix3, SymmetricEigen, Vector3};
use rayon::prelude::*;
use thiserror::Error;

use crate::config::{NormalEstimationConfig, NormalEstimationMethod};
use crate::core::cloud::PointCloud;
use crate::core::normals::{Normal, NormalField};

/// Errors reported by normal estimation backends.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalEstimationError {
    #[error("normal estimation needs an organized cloud, got {width}x{height} with {len} points")]
    Unorganized {
        width: usize,
        height: usize,
        len: usize,
    },

    #[error("no valid normal could be estimated for any of {points} points")]
    NoValidNormals { points: usize },

    #[error("estimator returned {normals} normals for {points} points")]
    LengthMismatch { normals: usize, points: usize },
}

/// Result type for normal estimation.
pub type Result<T> = std::result::Result<T, NormalEstimationError>;

/// Produces one normal per point of a cloud.
///
/// Implementations must return a field with exactly `cloud.len()` entries
/// and should mark points without a usable estimate as [`Normal::INVALID`].
pub trait NormalEstimator: Send + Sync {
    fn estimate(&self, cloud: &PointCloud, config: &NormalEstimationConfig) -> Result<NormalField>;
}

/// Number of summed channels: count, x, y, z, xx, xy, xz, yy, yz, zz.
const CHANNELS: usize = 10;

/// Pixels with a border distance at or below this get no normal.
const MIN_SMOOTHING: f32 = 2.0;

/// Built-in estimator for organized clouds.
#[derive(Debug, Clone, Copy, Default)]
pub struct IntegralImageEstimator;

impl NormalEstimator for IntegralImageEstimator {
    fn estimate(&self, cloud: &PointCloud, config: &NormalEstimationConfig) -> Result<NormalField> {
        if cloud.is_empty() {
            return Ok(NormalField::default());
        }
        if !cloud.is_organized() {
            return Err(NormalEstimationError::Unorganized {
                width: cloud.width,
                height: cloud.height,
                len: cloud.len(),
            });
        }

        let ctx = FrameContext {
            cloud,
            config,
            integral: IntegralImage::new(cloud),
            border_distance: border_distance_map(cloud, config.max_depth_change_factor),
        };

        let normals: Vec<Normal> = (0..cloud.len())
            .into_par_iter()
            .map(|i| ctx.estimate_pixel(i % cloud.width, i / cloud.width))
            .collect();

        let field = NormalField::new(normals);
        if field.valid_count() == 0 {
            return Err(NormalEstimationError::NoValidNormals {
                points: cloud.len(),
            });
        }
        Ok(field)
    }
}

/// Summed-area table over valid points.
struct IntegralImage {
    width: usize,
    data: Vec<[f64; CHANNELS]>,
}

impl IntegralImage {
    fn new(cloud: &PointCloud) -> Self {
        let (w, h) = (cloud.width, cloud.height);
        let stride = w + 1;
        let mut data = vec![[0.0f64; CHANNELS]; stride * (h + 1)];

        for r in 0..h {
            let mut row = [0.0f64; CHANNELS];
            for c in 0..w {
                let p = cloud.point(r * w + c);
                if p.is_valid() {
                    let (x, y, z) = (p.x as f64, p.y as f64, p.z as f64);
                    let v = [1.0, x, y, z, x * x, x * y, x * z, y * y, y * z, z * z];
                    for k in 0..CHANNELS {
                        row[k] += v[k];
                    }
                }
                let above = data[r * stride + c + 1];
                let cell = &mut data[(r + 1) * stride + c + 1];
                for k in 0..CHANNELS {
                    cell[k] = above[k] + row[k];
                }
            }
        }

        Self { width: w, data }
    }

    /// Channel sums over columns `c0..=c1` and rows `r0..=r1`.
    fn sum(&self, c0: usize, r0: usize, c1: usize, r1: usize) -> [f64; CHANNELS] {
        let s = self.width + 1;
        let a = &self.data[r0 * s + c0];
        let b = &self.data[r0 * s + c1 + 1];
        let c = &self.data[(r1 + 1) * s + c0];
        let d = &self.data[(r1 + 1) * s + c1 + 1];
        let mut out = [0.0f64; CHANNELS];
        for k in 0..CHANNELS {
            out[k] = d[k] - b[k] - c[k] + a[k];
        }
        out
    }

    /// Mean valid point over the rectangle, if any point is valid.
    fn mean(&self, c0: usize, r0: usize, c1: usize, r1: usize) -> Option<Vector3<f64>> {
        if c0 > c1 || r0 > r1 {
            return None;
        }
        let s = self.sum(c0, r0, c1, r1);
        if s[0] < 1.0 {
            return None;
        }
        Some(Vector3::new(s[1], s[2], s[3]) / s[0])
    }
}

/// Distance in pixels from every pixel to the nearest depth discontinuity
/// or invalid pixel (chamfer 1 / sqrt 2 metric).
fn border_distance_map(cloud: &PointCloud, max_depth_change_factor: f32) -> Vec<f32> {
    let (w, h) = (cloud.width, cloud.height);
    let z = &cloud.z;
    let mut edge = vec![false; w * h];

    let changes = |a: f32, b: f32| -> bool {
        if !a.is_finite() || !b.is_finite() {
            return true;
        }
        let threshold = max_depth_change_factor * (a.abs() + 1.0) * 2.0;
        (a - b).abs() > threshold
    };

    for r in 0..h {
        for c in 0..w {
            let i = r * w + c;
            if !z[i].is_finite() {
                edge[i] = true;
            }
            if c + 1 < w && changes(z[i], z[i + 1]) {
                edge[i] = true;
                edge[i + 1] = true;
            }
            if r + 1 < h && changes(z[i], z[i + w]) {
                edge[i] = true;
                edge[i + w] = true;
            }
        }
    }

    let far = (w + h) as f32;
    let mut dist: Vec<f32> = edge.iter().map(|&e| if e { 0.0 } else { far }).collect();
    let diag = std::f32::consts::SQRT_2;

    for r in 0..h {
        for c in 0..w {
            let i = r * w + c;
            let mut d = dist[i];
            if c > 0 {
                d = d.min(dist[i - 1] + 1.0);
            }
            if r > 0 {
                d = d.min(dist[i - w] + 1.0);
                if c > 0 {
                    d = d.min(dist[i - w - 1] + diag);
                }
                if c + 1 < w {
                    d = d.min(dist[i - w + 1] + diag);
                }
            }
            dist[i] = d;
        }
    }

    for r in (0..h).rev() {
        for c in (0..w).rev() {
            let i = r * w + c;
            let mut d = dist[i];
            if c + 1 < w {
                d = d.min(dist[i + 1] + 1.0);
            }
            if r + 1 < h {
                d = d.min(dist[i + w] + 1.0);
                if c + 1 < w {
                    d = d.min(dist[i + w + 1] + diag);
                }
                if c > 0 {
                    d = d.min(dist[i + w - 1] + diag);
                }
            }
            dist[i] = d;
        }
    }

    dist
}

struct FrameContext<'a> {
    cloud: &'a PointCloud,
    config: &'a NormalEstimationConfig,
    integral: IntegralImage,
    border_distance: Vec<f32>,
}

impl FrameContext<'_> {
    fn estimate_pixel(&self, c: usize, r: usize) -> Normal {
        let i = r * self.cloud.width + c;
        let p = self.cloud.point(i);
        if !p.is_valid() {
            return Normal::INVALID;
        }

        let mut size = self.config.normal_smoothing_size;
        if self.config.depth_dependent_smoothing {
            size += p.z / 10.0;
        }
        let smoothing = self.border_distance[i].min(size);
        if smoothing <= MIN_SMOOTHING {
            return Normal::INVALID;
        }
        let half = ((smoothing / 2.0) as usize).max(1);

        let (w, h) = (self.cloud.width, self.cloud.height);
        let win = Window {
            c,
            r,
            c0: c.saturating_sub(half),
            r0: r.saturating_sub(half),
            c1: (c + half).min(w - 1),
            r1: (r + half).min(h - 1),
        };

        let estimate = match self.config.method {
            NormalEstimationMethod::CovarianceMatrix => self.covariance(&win),
            NormalEstimationMethod::Average3DGradient => self.average_gradient(&win),
            NormalEstimationMethod::AverageDepthChange => self.average_depth_change(&win),
            NormalEstimationMethod::Simple3DGradient => self.simple_gradient(&win),
        };

        match estimate {
            Some((n, curvature)) => orient(n, p.coords(), curvature),
            None => Normal::INVALID,
        }
    }

    fn covariance(&self, win: &Window) -> Option<(Vector3<f64>, f32)> {
        let s = self.integral.sum(win.c0, win.r0, win.c1, win.r1);
        let n = s[0];
        if n < 3.0 {
            return None;
        }
        let m = Vector3::new(s[1], s[2], s[3]) / n;
        let cov = Matrix3::new(
            s[4] / n - m.x * m.x,
            s[5] / n - m.x * m.y,
            s[6] / n - m.x * m.z,
            s[5] / n - m.x * m.y,
            s[7] / n - m.y * m.y,
            s[8] / n - m.y * m.z,
            s[6] / n - m.x * m.z,
            s[8] / n - m.y * m.z,
            s[9] / n - m.z * m.z,
        );

        let eigen = SymmetricEigen::new(cov);
        let mut min_idx = 0;
        for k in 1..3 {
            if eigen.eigenvalues[k] < eigen.eigenvalues[min_idx] {
                min_idx = k;
            }
        }
        let total: f64 = eigen.eigenvalues.iter().map(|v| v.abs()).sum();
        let curvature = if total > 0.0 {
            (eigen.eigenvalues[min_idx].abs() / total) as f32
        } else {
            0.0
        };
        Some((eigen.eigenvectors.column(min_idx).into_owned(), curvature))
    }

    /// Horizontal and vertical differences of window-half means.
    fn half_window_gradients(&self, win: &Window) -> Option<(Vector3<f64>, Vector3<f64>)> {
        let ii = &self.integral;
        let right = ii.mean(win.c + 1, win.r0, win.c1, win.r1)?;
        let left = ii.mean(win.c0, win.r0, win.c.checked_sub(1)?, win.r1)?;
        let below = ii.mean(win.c0, win.r + 1, win.c1, win.r1)?;
        let above = ii.mean(win.c0, win.r0, win.c1, win.r.checked_sub(1)?)?;
        Some((right - left, below - above))
    }

    fn average_gradient(&self, win: &Window) -> Option<(Vector3<f64>, f32)> {
        let (dh, dv) = self.half_window_gradients(win)?;
        Some((dh.cross(&dv), 0.0))
    }

    fn average_depth_change(&self, win: &Window) -> Option<(Vector3<f64>, f32)> {
        let (dh, dv) = self.half_window_gradients(win)?;
        let th = Vector3::new(dh.x, 0.0, dh.z);
        let tv = Vector3::new(0.0, dv.y, dv.z);
        Some((th.cross(&tv), 0.0))
    }

    fn simple_gradient(&self, win: &Window) -> Option<(Vector3<f64>, f32)> {
        if win.c0 == win.c || win.c1 == win.c || win.r0 == win.r || win.r1 == win.r {
            return None;
        }
        let w = self.cloud.width;
        let at = |c: usize, r: usize| -> Option<Vector3<f64>> {
            let p = self.cloud.point(r * w + c);
            p.is_valid()
                .then(|| Vector3::new(p.x as f64, p.y as f64, p.z as f64))
        };
        let dh = at(win.c1, win.r)? - at(win.c0, win.r)?;
        let dv = at(win.c, win.r1)? - at(win.c, win.r0)?;
        Some((dh.cross(&dv), 0.0))
    }
}

/// Inclusive window bounds around pixel `(c, r)`.
struct Window {
    c: usize,
    r: usize,
    c0: usize,
    r0: usize,
    c1: usize,
    r1: usize,
}

/// Normalize `n` and flip it towards the sensor origin.
fn orient(n: Vector3<f64>, p: [f32; 3], curvature: f32) -> Normal {
    let len = n.norm();
    if !len.is_finite() || len < 1e-12 {
        return Normal::INVALID;
    }
    let mut n = n / len;
    let view = Vector3::new(p[0] as f64, p[1] as f64, p[2] as f64);
    if n.dot(&view) > 0.0 {
        n = -n;
    }
    Normal::new([n.x as f32, n.y as f32, n.z as f32], curvature)
}
