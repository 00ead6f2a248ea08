//! Surface normal types.

/// A unit surface normal with its curvature estimate.
///
/// Points for which no normal could be estimated hold NaN components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Normal {
    pub normal: [f32; 3],
    pub curvature: f32,
}

impl Normal {
    /// The marker value for "no normal at this point".
    pub const INVALID: Normal = Normal {
        normal: [f32::NAN; 3],
        curvature: f32::NAN,
    };

    pub fn new(normal: [f32; 3], curvature: f32) -> Self {
        Self { normal, curvature }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.normal.iter().all(|c| c.is_finite())
    }
}

/// Per-point normals for one cloud, indexed 1:1 with the cloud's points.
#[derive(Debug, Clone, Default)]
pub struct NormalField {
    normals: Vec<Normal>,
}

impl NormalField {
    pub fn new(normals: Vec<Normal>) -> Self {
        Self { normals }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.normals.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.normals.is_empty()
    }

    #[inline]
    pub fn get(&self, index: usize) -> Option<&Normal> {
        self.normals.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Normal> {
        self.normals.iter()
    }

    /// Number of points that received a finite normal.
    pub fn valid_count(&self) -> usize {
        self.normals.iter().filter(|n| n.is_valid()).count()
    }

    /// Normal vectors as coordinates, for indexing in normal space.
    pub fn to_coords(&self) -> Vec<[f32; 3]> {
        self.normals.iter().map(|n| n.normal).collect()
    }
}

impl FromIterator<Normal> for NormalField {
    fn from_iter<I: IntoIterator<Item = Normal>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_normal() {
        assert!(!Normal::INVALID.is_valid());
        assert!(Normal::new([0.0, 0.0, -1.0], 0.0).is_valid());
    }

    #[test]
    fn test_field_counts_valid() {
        let field: NormalField = vec![
            Normal::new([0.0, 0.0, -1.0], 0.01),
            Normal::INVALID,
            Normal::new([1.0, 0.0, 0.0], 0.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(field.len(), 3);
        assert_eq!(field.valid_count(), 2);
        assert_eq!(field.to_coords()[2], [1.0, 0.0, 0.0]);
    }
}
