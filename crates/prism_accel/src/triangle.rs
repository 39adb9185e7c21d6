//! Ray-triangle intersection (Möller-Trumbore).

use prism_math::{Aabb, Interval, Ray, Vec3};

/// Distance and barycentrics of a triangle hit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriangleHit {
    pub t: f32,
    pub u: f32,
    pub v: f32,
}

/// Möller-Trumbore ray-triangle intersection.
///
/// Works with unnormalized ray directions; `t` is in the ray's own units.
/// Both faces are hit.
pub fn intersect_triangle(ray: &Ray, [v0, v1, v2]: &[Vec3; 3], ray_t: Interval) -> Option<TriangleHit> {
    let edge1 = *v1 - *v0;
    let edge2 = *v2 - *v0;

    let h = ray.direction.cross(edge2);
    let a = edge1.dot(h);

    // Ray is parallel to triangle
    if a.abs() < 1e-12 {
        return None;
    }

    let f = 1.0 / a;
    let s = ray.origin - *v0;
    let u = f * s.dot(h);
    if !(0.0..=1.0).contains(&u) {
        return None;
    }

    let q = s.cross(edge1);
    let v = f * ray.direction.dot(q);
    if v < 0.0 || u + v > 1.0 {
        return None;
    }

    let t = f * edge2.dot(q);
    if !ray_t.surrounds(t) {
        return None;
    }

    Some(TriangleHit { t, u, v })
}

pub fn triangle_bounds([v0, v1, v2]: &[Vec3; 3]) -> Aabb {
    Aabb::from_points(v0.min(*v1).min(*v2), v0.max(*v1).max(*v2))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tri() -> [Vec3; 3] {
        // Triangle in XY plane at z=-1
        [
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(0.0, 1.0, -1.0),
        ]
    }

    #[test]
    fn test_triangle_hit() {
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        let hit = intersect_triangle(&ray, &tri(), Interval::RAY).unwrap();

        assert!((hit.t - 1.0).abs() < 0.001);
        assert!(hit.u >= 0.0 && hit.v >= 0.0 && hit.u + hit.v <= 1.0);
    }

    #[test]
    fn test_triangle_miss() {
        // Ray pointing away
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, 1.0));
        assert!(intersect_triangle(&ray, &tri(), Interval::RAY).is_none());

        // Outside the edges
        let ray = Ray::new(Vec3::new(5.0, 0.0, 0.0), Vec3::new(0.0, 0.0, -1.0));
        assert!(intersect_triangle(&ray, &tri(), Interval::RAY).is_none());
    }

    #[test]
    fn test_triangle_scaled_direction() {
        // Half-length direction doubles t
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -0.5));
        let hit = intersect_triangle(&ray, &tri(), Interval::RAY).unwrap();
        assert!((hit.t - 2.0).abs() < 0.001);
    }

    #[test]
    fn test_triangle_interval_clips() {
        let ray = Ray::new(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0));
        assert!(intersect_triangle(&ray, &tri(), Interval::new(0.001, 0.5)).is_none());
    }

    #[test]
    fn test_flat_triangle_bounds_padded() {
        let bounds = triangle_bounds(&tri());
        assert!(bounds.z.size() > 0.0);
        assert_eq!(bounds.x.min, -1.0);
    }
}
