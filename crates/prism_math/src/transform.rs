// Transform helpers for instance placement.
//
// glam::Mat4 already provides transform_point3(), transform_vector3() and inverse();
// this adds the pieces the acceleration structures need on top.

use crate::Aabb;
use glam::{Mat3, Mat4, Vec3};

/// Extension trait for Mat4 to provide instance-transform utilities
pub trait Mat4Ext {
    /// Transform an axis-aligned bounding box.
    /// Computes the bounding box of all 8 transformed corners.
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb;

    /// Transform a surface normal (inverse-transpose of the upper 3x3), renormalized.
    fn transform_normal(&self, normal: Vec3) -> Vec3;

    /// True when the matrix can be inverted (non-zero, finite determinant).
    fn is_invertible(&self) -> bool;
}

impl Mat4Ext for Mat4 {
    fn transform_aabb(&self, aabb: &Aabb) -> Aabb {
        if aabb.is_empty() {
            return Aabb::EMPTY;
        }

        let (lo, hi) = (aabb.min(), aabb.max());
        let mut result_min = Vec3::splat(f32::INFINITY);
        let mut result_max = Vec3::splat(f32::NEG_INFINITY);

        for i in 0..8 {
            let corner = Vec3::new(
                if i & 1 == 0 { lo.x } else { hi.x },
                if i & 2 == 0 { lo.y } else { hi.y },
                if i & 4 == 0 { lo.z } else { hi.z },
            );
            let p = self.transform_point3(corner);
            result_min = result_min.min(p);
            result_max = result_max.max(p);
        }

        Aabb::from_points(result_min, result_max)
    }

    fn transform_normal(&self, normal: Vec3) -> Vec3 {
        let normal_matrix = Mat3::from_mat4(*self).inverse().transpose();
        (normal_matrix * normal).normalize_or_zero()
    }

    fn is_invertible(&self) -> bool {
        let det = self.determinant();
        det.is_finite() && det.abs() > f32::EPSILON
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_vector3_no_translation() {
        let mat = Mat4::from_translation(Vec3::new(10.0, 20.0, 30.0));
        let vector = Vec3::new(1.0, 0.0, 0.0);

        // Translation should NOT affect vectors (w=0)
        assert_eq!(mat.transform_vector3(vector), vector);
    }

    #[test]
    fn test_transform_aabb_translation() {
        let mat = Mat4::from_translation(Vec3::new(5.0, 5.0, 5.0));
        let aabb = Aabb::from_points(Vec3::ZERO, Vec3::ONE);
        let transformed = mat.transform_aabb(&aabb);

        assert!((transformed.min() - Vec3::splat(5.0)).length() < 0.001);
        assert!((transformed.max() - Vec3::splat(6.0)).length() < 0.001);
    }

    #[test]
    fn test_transform_aabb_rotation_grows_box() {
        use std::f32::consts::FRAC_PI_4;

        let mat = Mat4::from_rotation_y(FRAC_PI_4);
        let aabb = Aabb::from_points(Vec3::splat(-1.0), Vec3::splat(1.0));
        let transformed = mat.transform_aabb(&aabb);

        // Rotated cube corners reach sqrt(2) along X
        assert!((transformed.x.max - 2.0_f32.sqrt()).abs() < 0.001);
    }

    #[test]
    fn test_transform_aabb_empty_stays_empty() {
        let mat = Mat4::from_translation(Vec3::ONE);
        assert!(mat.transform_aabb(&Aabb::EMPTY).is_empty());
    }

    #[test]
    fn test_transform_normal_non_uniform_scale() {
        let mat = Mat4::from_scale(Vec3::new(2.0, 1.0, 1.0));
        // A 45 degree normal in XY tilts towards Y after stretching along X
        let n = mat.transform_normal(Vec3::new(1.0, 1.0, 0.0).normalize());
        assert!(n.y > n.x);
        assert!((n.length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_is_invertible() {
        assert!(Mat4::IDENTITY.is_invertible());
        assert!(!Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0)).is_invertible());
    }
}
