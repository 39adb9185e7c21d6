//! Progressive accumulation bookkeeping.
//!
//! The frame counter starts at -1 ("not started"). Each submitted frame bumps
//! it until it reaches the iteration cap, where it stays: the render is idle,
//! not reset. Anything that makes the accumulated samples stale (camera, field
//! of view, render region, renderer, scene) sets it back to -1 so the next
//! frame is frame 0 and overwrites the accumulation image.

use prism_math::{Camera, Mat4};
use serde::{Deserialize, Serialize};

/// Counter value meaning "no frame accumulated yet".
pub const NOT_STARTED: i32 = -1;

/// Sub-rectangle of the output that is actually rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RenderRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl RenderRegion {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// The whole of a `width` x `height` output.
    pub const fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Camera values compared frame to frame.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CameraKey {
    view: Mat4,
    fov_y: f32,
}

impl CameraKey {
    fn of(camera: &Camera) -> Self {
        Self {
            view: camera.view_matrix(),
            fov_y: camera.fov_y,
        }
    }

    fn bits_equal(&self, other: &CameraKey) -> bool {
        self.fov_y.to_bits() == other.fov_y.to_bits()
            && self
                .view
                .to_cols_array()
                .iter()
                .zip(other.view.to_cols_array().iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
    }

    fn within(&self, other: &CameraKey, epsilon: f32) -> bool {
        (self.fov_y - other.fov_y).abs() <= epsilon && self.view.abs_diff_eq(other.view, epsilon)
    }
}

/// Snapshot of the accumulation state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccumulationState {
    pub frame: i32,
    pub max_iterations: i32,
    pub render_region: RenderRegion,
}

#[derive(Debug, Clone)]
pub struct ConvergenceController {
    frame: i32,
    max_iterations: i32,
    render_region: RenderRegion,
    last_camera: Option<CameraKey>,
    /// `None` compares the camera bit for bit.
    camera_epsilon: Option<f32>,
}

impl ConvergenceController {
    pub fn new(max_iterations: i32) -> Self {
        Self {
            frame: NOT_STARTED,
            max_iterations: max_iterations.max(0),
            render_region: RenderRegion::default(),
            last_camera: None,
            camera_epsilon: None,
        }
    }

    pub fn with_camera_epsilon(mut self, epsilon: Option<f32>) -> Self {
        self.camera_epsilon = epsilon;
        self
    }

    pub fn frame(&self) -> i32 {
        self.frame
    }

    pub fn max_iterations(&self) -> i32 {
        self.max_iterations
    }

    pub fn render_region(&self) -> RenderRegion {
        self.render_region
    }

    pub fn state(&self) -> AccumulationState {
        AccumulationState {
            frame: self.frame,
            max_iterations: self.max_iterations,
            render_region: self.render_region,
        }
    }

    /// True while the counter is below the cap.
    pub fn should_continue(&self) -> bool {
        self.frame < self.max_iterations
    }

    /// Count one submitted frame. Holds at the cap.
    pub fn notify_frame_submitted(&mut self) {
        if self.frame < self.max_iterations {
            self.frame += 1;
        }
    }

    /// Discard accumulated samples; the next submitted frame is frame 0.
    pub fn invalidate(&mut self) {
        if self.frame != NOT_STARTED {
            log::debug!("Accumulation reset at frame {}", self.frame);
        }
        self.frame = NOT_STARTED;
    }

    /// Compare `camera` against the last one seen and invalidate on any change.
    ///
    /// Returns true if accumulation was reset.
    pub fn observe_camera(&mut self, camera: &Camera) -> bool {
        let key = CameraKey::of(camera);
        let unchanged = match (&self.last_camera, self.camera_epsilon) {
            (Some(last), None) => last.bits_equal(&key),
            (Some(last), Some(epsilon)) => last.within(&key, epsilon),
            (None, _) => false,
        };

        if unchanged {
            return false;
        }
        self.last_camera = Some(key);
        self.invalidate();
        true
    }

    /// Returns true if the region differed and accumulation was reset.
    pub fn set_render_region(&mut self, region: RenderRegion) -> bool {
        if region == self.render_region {
            return false;
        }
        self.render_region = region;
        self.invalidate();
        true
    }

    /// Change the cap. Lowering it below the current frame pauses accumulation.
    pub fn set_max_iterations(&mut self, max_iterations: i32) {
        self.max_iterations = max_iterations.max(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_math::Vec3;

    fn camera() -> Camera {
        Camera::new(Vec3::new(0.0, 1.0, 5.0), Vec3::ZERO, 1.5)
    }

    #[test]
    fn test_counter_increments_then_holds() {
        let mut controller = ConvergenceController::new(3);
        assert_eq!(controller.frame(), NOT_STARTED);

        let mut seen = Vec::new();
        for _ in 0..6 {
            controller.notify_frame_submitted();
            seen.push(controller.frame());
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 3, 3]);
        assert!(!controller.should_continue());
    }

    #[test]
    fn test_scenario_ten_iterations() {
        let mut controller = ConvergenceController::new(10);
        let mut dispatched = Vec::new();

        for _ in 0..15 {
            controller.notify_frame_submitted();
            if controller.should_continue() {
                dispatched.push(controller.frame());
            }
        }

        assert_eq!(dispatched, (0..10).collect::<Vec<_>>());
        assert_eq!(controller.frame(), 10);
    }

    #[test]
    fn test_invalidate_restarts_at_zero() {
        let mut controller = ConvergenceController::new(100);
        for _ in 0..43 {
            controller.notify_frame_submitted();
        }
        assert_eq!(controller.frame(), 42);

        controller.invalidate();
        assert_eq!(controller.frame(), NOT_STARTED);
        controller.notify_frame_submitted();
        assert_eq!(controller.frame(), 0);
    }

    #[test]
    fn test_invalidate_after_cap_resumes() {
        let mut controller = ConvergenceController::new(2);
        for _ in 0..5 {
            controller.notify_frame_submitted();
        }
        assert!(!controller.should_continue());

        controller.invalidate();
        controller.notify_frame_submitted();
        assert!(controller.should_continue());
        assert_eq!(controller.frame(), 0);
    }

    #[test]
    fn test_camera_change_invalidates() {
        let mut controller = ConvergenceController::new(100);
        let mut cam = camera();

        assert!(controller.observe_camera(&cam));
        controller.notify_frame_submitted();
        controller.notify_frame_submitted();

        // Same camera: keep accumulating
        assert!(!controller.observe_camera(&cam));
        assert_eq!(controller.frame(), 1);

        cam.position.x += 0.001;
        assert!(controller.observe_camera(&cam));
        controller.notify_frame_submitted();
        assert_eq!(controller.frame(), 0);
    }

    #[test]
    fn test_fov_change_invalidates() {
        let mut controller = ConvergenceController::new(100);
        let mut cam = camera();
        controller.observe_camera(&cam);
        controller.notify_frame_submitted();
        controller.notify_frame_submitted();

        cam.fov_y *= 1.1;
        assert!(controller.observe_camera(&cam));
        assert_eq!(controller.frame(), NOT_STARTED);
    }

    #[test]
    fn test_camera_epsilon() {
        let mut controller = ConvergenceController::new(100).with_camera_epsilon(Some(1e-3));
        let mut cam = camera();
        controller.observe_camera(&cam);
        controller.notify_frame_submitted();

        cam.position.x += 1e-5;
        assert!(!controller.observe_camera(&cam));
        assert_eq!(controller.frame(), 0);

        cam.position.x += 0.5;
        assert!(controller.observe_camera(&cam));
    }

    #[test]
    fn test_render_region_change_invalidates() {
        let mut controller = ConvergenceController::new(100);
        assert!(controller.set_render_region(RenderRegion::full(800, 600)));
        controller.notify_frame_submitted();

        assert!(!controller.set_render_region(RenderRegion::full(800, 600)));
        assert_eq!(controller.frame(), 0);

        assert!(controller.set_render_region(RenderRegion::new(10, 0, 790, 600)));
        assert_eq!(controller.frame(), NOT_STARTED);
    }

    #[test]
    fn test_lowering_cap_pauses() {
        let mut controller = ConvergenceController::new(100);
        for _ in 0..21 {
            controller.notify_frame_submitted();
        }
        controller.set_max_iterations(10);

        assert!(!controller.should_continue());
        controller.notify_frame_submitted();
        assert_eq!(controller.frame(), 20);
    }
}
