use crate::{Aabb, Ray};
use glam::{Mat4, Vec2, Vec3};

/// Pinhole camera used to generate primary rays.
#[derive(Debug, Clone, Copy)]
pub struct Camera {
    pub position: Vec3,
    pub target: Vec3,
    pub up: Vec3,
    pub fov_y: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Camera {
    /// Create a new camera
    pub fn new(position: Vec3, target: Vec3, aspect: f32) -> Self {
        Self {
            position,
            target,
            up: Vec3::Y,
            fov_y: 45.0_f32.to_radians(),
            aspect,
            near: 0.1,
            far: 1000.0,
        }
    }

    /// Get the view matrix (world → camera space)
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    /// Get the projection matrix (camera → clip space)
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Update aspect ratio (e.g., on resize)
    pub fn set_aspect(&mut self, aspect: f32) {
        self.aspect = aspect;
    }

    /// Primary ray through a point on the image plane.
    ///
    /// `ndc` is in `[-1, 1]` on both axes with +Y up.
    pub fn primary_ray(&self, ndc: Vec2) -> Ray {
        let forward = (self.target - self.position).normalize_or_zero();
        let right = forward.cross(self.up).normalize_or_zero();
        let up = right.cross(forward);

        let half_h = (self.fov_y * 0.5).tan();
        let half_w = half_h * self.aspect;
        let direction = forward + right * (ndc.x * half_w) + up * (ndc.y * half_h);

        Ray::new(self.position, direction.normalize())
    }

    /// Move the camera so the whole box is in view, keeping the viewing direction.
    ///
    /// An empty box leaves the camera untouched.
    pub fn fit_bounds(&mut self, bounds: &Aabb) {
        if bounds.is_empty() {
            return;
        }

        let radius = bounds.diagonal() * 0.5;
        let center = bounds.centroid();
        let mut dir = (self.position - self.target).normalize_or_zero();
        if dir == Vec3::ZERO {
            dir = Vec3::Z;
        }

        let fov = self.fov_y.min(self.fov_y * self.aspect.min(1.0));
        let distance = radius / (fov * 0.5).sin();

        self.target = center;
        self.position = center + dir * distance;
        self.far = self.far.max(distance + radius * 2.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_camera_creation() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 16.0 / 9.0);

        assert_eq!(camera.position, Vec3::new(0.0, 0.0, 5.0));
        assert_eq!(camera.target, Vec3::ZERO);
        assert_eq!(camera.aspect, 16.0 / 9.0);
    }

    #[test]
    fn test_view_matrix() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 1.0);

        let view = camera.view_matrix();
        // View matrix should translate camera to origin
        assert!(view.w_axis.z < 0.0);
    }

    #[test]
    fn test_primary_ray_center() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 1.0);
        let ray = camera.primary_ray(Vec2::ZERO);

        assert_eq!(ray.origin, camera.position);
        assert!((ray.direction - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn test_primary_ray_corner_up_right() {
        let camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 1.0);
        let ray = camera.primary_ray(Vec2::new(1.0, 1.0));

        assert!(ray.direction.x > 0.0);
        assert!(ray.direction.y > 0.0);
    }

    #[test]
    fn test_fit_bounds() {
        let mut camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 1.0);
        let bounds = Aabb::from_points(Vec3::new(9.0, 9.0, 9.0), Vec3::new(11.0, 11.0, 11.0));
        camera.fit_bounds(&bounds);

        assert!((camera.target - Vec3::splat(10.0)).length() < 1e-4);
        // Still looking down -Z
        assert!(camera.position.z > camera.target.z);
        assert!((camera.position - camera.target).length() > bounds.diagonal() * 0.5);
    }

    #[test]
    fn test_fit_bounds_empty_is_noop() {
        let mut camera = Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 1.0);
        camera.fit_bounds(&Aabb::EMPTY);
        assert_eq!(camera.position, Vec3::new(0.0, 0.0, 5.0));
    }
}
