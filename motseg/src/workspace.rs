//! # Workspace restriction
//!
//! Converts an organised point cloud plus configured volume bounds and crop
//! rectangle into the boolean mask that restricts segmentation to the region
//! of interest.

use crate::frame::BoolMask;
use nalgebra::Point3;
use serde::{Deserialize, Serialize};

/// Organised point cloud aligned with the image grid.
#[derive(Clone)]
pub struct PointCloud {
    points: Vec<Point3<f32>>,
    width: usize,
    height: usize,
}

impl PointCloud {
    /// Create a cloud from row-major points.
    ///
    /// # Arguments
    ///
    /// * `points` - `width * height` points in row-major order.
    /// * `width` - image width in pixels.
    /// * `height` - image height in pixels.
    pub fn new(points: Vec<Point3<f32>>, width: usize, height: usize) -> Self {
        assert_eq!(points.len(), width * height);
        Self {
            points,
            width,
            height,
        }
    }

    /// Get `(width, height)` of the cloud.
    pub fn dim(&self) -> (usize, usize) {
        (self.width, self.height)
    }

    /// Point at image coordinates.
    pub fn at(&self, col: usize, row: usize) -> Point3<f32> {
        self.points[row * self.width + col]
    }
}

/// 3D workspace volume plus 2D crop rectangle.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WorkspaceBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
    pub min_z: f32,
    pub max_z: f32,
    pub crop_min_x: usize,
    pub crop_max_x: usize,
    pub crop_min_y: usize,
    pub crop_max_y: usize,
}

impl Default for WorkspaceBounds {
    fn default() -> Self {
        Self {
            min_x: 0.0,
            max_x: 0.0,
            min_y: 0.0,
            max_y: 0.0,
            min_z: 0.0,
            max_z: 0.0,
            crop_min_x: 0,
            crop_max_x: 640,
            crop_min_y: 0,
            crop_max_y: 480,
        }
    }
}

impl WorkspaceBounds {
    /// True if the 3D point lies inside the workspace volume.
    pub fn contains(&self, pt: &Point3<f32>) -> bool {
        pt.x >= self.min_x
            && pt.x <= self.max_x
            && pt.y >= self.min_y
            && pt.y <= self.max_y
            && pt.z >= self.min_z
            && pt.z <= self.max_z
    }

    /// True if the pixel lies inside the crop rectangle.
    pub fn crop_contains(&self, col: usize, row: usize) -> bool {
        col >= self.crop_min_x
            && col <= self.crop_max_x
            && row >= self.crop_min_y
            && row <= self.crop_max_y
    }
}

/// Compute the per-pixel workspace mask for one cycle.
///
/// A pixel is inside the workspace when its cloud point lies within the
/// bounding volume and the pixel lies within the crop rectangle.
pub fn compute_mask(cloud: &PointCloud, bounds: &WorkspaceBounds) -> BoolMask {
    let (width, height) = cloud.dim();
    BoolMask::from_fn(height, width, |r, c| {
        bounds.contains(&cloud.at(c, r)) && bounds.crop_contains(c, r)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_cloud(width: usize, height: usize, z: f32) -> PointCloud {
        let points = (0..width * height)
            .map(|i| {
                let c = (i % width) as f32;
                let r = (i / width) as f32;
                Point3::new(c * 0.01, r * 0.01, z)
            })
            .collect();
        PointCloud::new(points, width, height)
    }

    fn bounds() -> WorkspaceBounds {
        WorkspaceBounds {
            min_x: 0.0,
            max_x: 1.0,
            min_y: 0.0,
            max_y: 1.0,
            min_z: 0.5,
            max_z: 1.5,
            crop_min_x: 0,
            crop_max_x: 63,
            crop_min_y: 0,
            crop_max_y: 47,
        }
    }

    #[test]
    fn in_volume_points_are_inside() {
        let cloud = flat_cloud(8, 6, 1.0);
        let mask = compute_mask(&cloud, &bounds());
        assert!(mask.iter().all(|&m| m));
    }

    #[test]
    fn out_of_volume_points_are_excluded() {
        let cloud = flat_cloud(8, 6, 3.0);
        let mask = compute_mask(&cloud, &bounds());
        assert!(mask.iter().all(|&m| !m));
    }

    #[test]
    fn crop_rectangle_limits_the_mask() {
        let cloud = flat_cloud(8, 6, 1.0);
        let mut b = bounds();
        b.crop_min_x = 2;
        b.crop_max_x = 5;
        let mask = compute_mask(&cloud, &b);
        for r in 0..6 {
            for c in 0..8 {
                assert_eq!(mask[(r, c)], (2..=5).contains(&c));
            }
        }
    }

    #[test]
    fn default_bounds_exclude_everything_off_origin() {
        let cloud = flat_cloud(4, 4, 1.0);
        let mask = compute_mask(&cloud, &WorkspaceBounds::default());
        assert!(!mask[(2, 2)]);
    }
}
