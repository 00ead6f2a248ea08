//! Point cloud container for depth-sensor frames.
//!
//! Coordinates are stored structure-of-arrays. A cloud captured from a depth
//! camera is *organized*: its points form a `width x height` image in scan
//! order, and pixels without a valid return carry NaN coordinates.

/// A single 3D point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point {
    /// Returns true if all three coordinates are finite.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    #[inline]
    pub fn coords(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

/// Container for one frame of 3D point data.
#[derive(Debug, Clone)]
pub struct PointCloud {
    /// X coordinates of all points.
    pub x: Vec<f32>,
    /// Y coordinates of all points.
    pub y: Vec<f32>,
    /// Z coordinates (depth) of all points.
    pub z: Vec<f32>,
    /// Image width for organized clouds, point count otherwise.
    pub width: usize,
    /// Image height for organized clouds, 1 otherwise.
    pub height: usize,
}

impl PointCloud {
    /// Creates a new empty (unorganized) point cloud.
    pub fn new() -> Self {
        Self {
            x: Vec::new(),
            y: Vec::new(),
            z: Vec::new(),
            width: 0,
            height: 1,
        }
    }

    /// Creates an unorganized point cloud from `[x, y, z]` triples.
    pub fn from_coords(coords: &[[f32; 3]]) -> Self {
        let mut cloud = Self::with_capacity(coords.len());
        for c in coords {
            cloud.push(c[0], c[1], c[2]);
        }
        cloud
    }

    /// Creates an organized point cloud with `width * height` NaN points.
    ///
    /// Pixels are filled in afterwards with [`PointCloud::set`].
    pub fn organized(width: usize, height: usize) -> Self {
        let n = width * height;
        Self {
            x: vec![f32::NAN; n],
            y: vec![f32::NAN; n],
            z: vec![f32::NAN; n],
            width,
            height,
        }
    }

    /// Creates a new point cloud with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            width: 0,
            height: 1,
        }
    }

    /// Returns the number of points in the cloud.
    #[inline]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    /// Returns true if the point cloud is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Returns true if the cloud is laid out as a depth image.
    #[inline]
    pub fn is_organized(&self) -> bool {
        self.height > 1 && self.width * self.height == self.len()
    }

    /// Returns the point at `index`.
    #[inline]
    pub fn point(&self, index: usize) -> Point {
        Point {
            x: self.x[index],
            y: self.y[index],
            z: self.z[index],
        }
    }

    /// Returns the `[x, y, z]` coordinates at `index`.
    #[inline]
    pub fn coords_at(&self, index: usize) -> [f32; 3] {
        [self.x[index], self.y[index], self.z[index]]
    }

    /// Number of points with finite coordinates.
    pub fn valid_count(&self) -> usize {
        (0..self.len()).filter(|&i| self.point(i).is_valid()).count()
    }

    /// Converts point cloud to a vector of [x, y, z] coordinate arrays.
    pub fn to_coords(&self) -> Vec<[f32; 3]> {
        (0..self.len()).map(|i| self.coords_at(i)).collect()
    }

    /// Appends a point to an unorganized cloud.
    #[inline]
    pub fn push(&mut self, x: f32, y: f32, z: f32) {
        self.x.push(x);
        self.y.push(y);
        self.z.push(z);
        self.width = self.x.len();
    }

    /// Overwrites the pixel at `index` of an organized cloud.
    #[inline]
    pub fn set(&mut self, index: usize, p: [f32; 3]) {
        self.x[index] = p[0];
        self.y[index] = p[1];
        self.z[index] = p[2];
    }
}

impl Default for PointCloud {
    fn default() -> Self {
        Self::new()
    }
}
