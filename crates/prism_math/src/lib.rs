// Re-export glam for convenience
pub use glam::*;

mod aabb;
mod camera;
mod interval;
mod ray;
mod transform;

pub use aabb::Aabb;
pub use camera::Camera;
pub use interval::Interval;
pub use ray::Ray;
pub use transform::Mat4Ext;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glam_reexport() {
        let c = Vec3::new(1.0, 2.0, 3.0) + Vec3::new(4.0, 5.0, 6.0);
        assert_eq!(c, Vec3::new(5.0, 7.0, 9.0));
    }
}
