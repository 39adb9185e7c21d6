//! The render session: everything the render thread owns.
//!
//! One call to [`RenderSession::frame`] is one loop iteration. It first
//! reconciles any finished background load, then skips dispatch while the busy
//! gate is up, then asks the convergence controller whether another frame is
//! worth accumulating before recording and submitting one.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use prism_accel::{SceneIndex, SceneIndexError};
use prism_core::{AssetKind, AssetLoader, SceneDescription};
use prism_gpu::{CommandEncoder, Device, DeviceError, Extent2d, RayHit};
use prism_math::{Aabb, Camera, Interval, Vec2};
use thiserror::Error;

use crate::config::{ConfigError, SessionConfig};
use crate::convergence::{AccumulationState, ConvergenceController, RenderRegion};
use crate::coordinator::{AssetSwapCoordinator, LoadState, LoadTaskHandle, PreparedAsset, SwapError};
use crate::environment::EnvironmentBindings;
use crate::output::RenderOutput;
use crate::registry::RendererRegistry;
use crate::renderer::{ExternalBindingLayouts, ExternalBindingSets, RenderError, RendererKind};
use crate::scene_data::{CameraUniform, SceneData};
use crate::state::{RenderSettings, SunAndSky};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("a load is already in progress")]
    Busy,

    #[error("load failed: {0}")]
    Load(SwapError),

    #[error("device lost")]
    DeviceLost,

    #[error(transparent)]
    Render(RenderError),

    #[error(transparent)]
    Device(DeviceError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SessionError {
    /// Fatal errors end the session; everything else leaves it usable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionError::DeviceLost)
    }
}

impl From<DeviceError> for SessionError {
    fn from(e: DeviceError) -> Self {
        match e {
            DeviceError::Lost => SessionError::DeviceLost,
            e => SessionError::Device(e),
        }
    }
}

impl From<RenderError> for SessionError {
    fn from(e: RenderError) -> Self {
        match e {
            RenderError::Device(e) => e.into(),
            e => SessionError::Render(e),
        }
    }
}

impl From<SwapError> for SessionError {
    fn from(e: SwapError) -> Self {
        if e.is_device_lost() {
            return SessionError::DeviceLost;
        }
        match e {
            SwapError::Busy => SessionError::Busy,
            e => SessionError::Load(e),
        }
    }
}

impl From<SceneIndexError> for SessionError {
    fn from(e: SceneIndexError) -> Self {
        SwapError::from(e).into()
    }
}

/// What one loop iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A load is in flight; nothing was dispatched.
    Busy,
    /// The iteration cap is reached; nothing was dispatched.
    Converged,
    /// A frame was dispatched with this accumulation index.
    Rendered { frame: i32 },
}

/// A load that reached a terminal state during [`RenderSession::poll_loads`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadEvent {
    Swapped(AssetKind),
    Failed(String),
}

/// Device resources behind the four external binding sets.
struct SessionResources {
    device: Device,
    index: SceneIndex,
    output: RenderOutput,
    scene_data: SceneData,
    environment: EnvironmentBindings,
    scene: Option<SceneDescription>,
}

impl SessionResources {
    fn layouts(&self) -> ExternalBindingLayouts {
        ExternalBindingLayouts {
            scene_index: self.index.binding_layout().clone(),
            output: self.output.layout().clone(),
            scene_data: self.scene_data.layout().clone(),
            environment: self.environment.layout().clone(),
        }
    }

    fn sets(&self) -> ExternalBindingSets<'_> {
        ExternalBindingSets {
            scene_index: self.index.bindings(),
            output: self.output.bindings(),
            scene_data: self.scene_data.bindings(),
            environment: self.environment.bindings(),
        }
    }
}

pub struct RenderSession {
    config: SessionConfig,
    device: Device,
    coordinator: AssetSwapCoordinator,
    resources: SessionResources,
    registry: RendererRegistry,
    convergence: ConvergenceController,
    settings: RenderSettings,
}

impl RenderSession {
    /// Create the device, empty scene, output of `size` and the configured back-end.
    pub fn new(
        config: SessionConfig,
        loader: Arc<dyn AssetLoader>,
        size: Extent2d,
    ) -> Result<Self, SessionError> {
        let device = Device::new(config.device_descriptor());
        let resources = SessionResources {
            index: SceneIndex::empty(&device)?,
            output: RenderOutput::new(&device, size)?,
            scene_data: SceneData::empty(&device)?,
            environment: EnvironmentBindings::new(&device)?,
            scene: None,
            device: device.clone(),
        };

        let mut registry = RendererRegistry::new(&device, config.renderer);
        registry.recreate_all(size, &resources.layouts(), &resources.index)?;

        let mut convergence = ConvergenceController::new(config.max_iterations)
            .with_camera_epsilon(config.camera_epsilon);
        convergence.set_render_region(RenderRegion::full(size.width, size.height));

        log::info!(
            "Render session: {}x{}, {:?}, {} max iterations",
            size.width,
            size.height,
            config.renderer,
            config.max_iterations
        );

        Ok(Self {
            settings: config.defaults,
            coordinator: AssetSwapCoordinator::new(&device, loader),
            device,
            resources,
            registry,
            convergence,
            config,
        })
    }

    /// Build a session from a JSON config file.
    pub fn from_config_file(
        path: &Path,
        loader: Arc<dyn AssetLoader>,
        size: Extent2d,
    ) -> Result<Self, SessionError> {
        Self::new(SessionConfig::load(path)?, loader, size)
    }

    /// Run one loop iteration.
    pub fn frame(&mut self, camera: &Camera) -> Result<FrameOutcome, SessionError> {
        self.device.check()?;
        if let Some(LoadEvent::Failed(reason)) = self.poll_loads()? {
            log::warn!("Continuing with the previous scene: {}", reason);
        }

        if self.coordinator.is_busy() {
            return Ok(FrameOutcome::Busy);
        }

        self.convergence.observe_camera(camera);
        self.convergence.notify_frame_submitted();
        if !self.convergence.should_continue() {
            return Ok(FrameOutcome::Converged);
        }

        let frame = self.convergence.frame();
        self.dispatch(camera, frame)?;
        Ok(FrameOutcome::Rendered { frame })
    }

    fn dispatch(&mut self, camera: &Camera, frame: i32) -> Result<(), SessionError> {
        let size = self.dispatch_size();
        let mut encoder = CommandEncoder::new(&self.device, "frame");
        encoder.update_buffer(
            self.resources.scene_data.camera_buffer(),
            &[CameraUniform::from_camera(camera)],
        )?;
        self.resources.environment.update(&mut encoder)?;

        let renderer = self
            .registry
            .active_mut()
            .ok_or(RenderError::NotCreated("active renderer"))?;
        renderer.set_accumulation_state(self.settings.to_state(frame, size));
        renderer.run(&mut encoder, size, &self.resources.sets())?;

        self.device.submit(encoder.finish())?;
        log::debug!("Frame {} dispatched at {}x{}", frame, size.width, size.height);
        Ok(())
    }

    /// Region of the output actually traced.
    fn dispatch_size(&self) -> Extent2d {
        let output = self.resources.output.size();
        let region = self.convergence.render_region();
        Extent2d::new(region.width.min(output.width), region.height.min(output.height))
    }

    /// Swap in a finished load, if there is one.
    ///
    /// Load failures are reported as [`LoadEvent::Failed`] and leave the
    /// active scene in place; only device loss is an error.
    pub fn poll_loads(&mut self) -> Result<Option<LoadEvent>, SessionError> {
        let resources = &mut self.resources;
        let registry = &mut self.registry;
        let convergence = &mut self.convergence;
        let settings = &mut self.settings;

        let outcome = self.coordinator.poll(|prepared| {
            apply_prepared(resources, registry, convergence, settings, prepared)
        });

        match outcome {
            None => Ok(None),
            Some(Ok(kind)) => Ok(Some(LoadEvent::Swapped(kind))),
            Some(Err(e)) if e.is_device_lost() => Err(SessionError::DeviceLost),
            Some(Err(e)) => Ok(Some(LoadEvent::Failed(e.to_string()))),
        }
    }

    /// Block up to `timeout` for the load in flight, then reconcile it.
    pub fn wait_for_load(&mut self, timeout: Duration) -> Result<Option<LoadEvent>, SessionError> {
        if !self.coordinator.wait(timeout) {
            return Ok(None);
        }
        self.poll_loads()
    }

    /// Start loading a scene or environment in the background.
    pub fn request_load(&mut self, path: impl AsRef<Path>) -> Result<LoadTaskHandle, SessionError> {
        self.device.check()?;
        Ok(self.coordinator.request_load(path.as_ref())?)
    }

    pub fn cancel_load(&self) -> bool {
        self.coordinator.cancel()
    }

    pub fn is_busy(&self) -> bool {
        self.coordinator.is_busy()
    }

    pub fn load_state(&self) -> LoadState {
        self.coordinator.state()
    }

    /// How the most recent load ended, once one has been reconciled.
    pub fn last_load_state(&self) -> Option<LoadState> {
        self.coordinator.last_state()
    }

    pub fn on_resize(&mut self, size: Extent2d) -> Result<(), SessionError> {
        self.coordinator.quiesce()?;
        self.resources.output.resize(size)?;
        self.convergence
            .set_render_region(RenderRegion::full(size.width, size.height));
        self.convergence.invalidate();
        Ok(())
    }

    pub fn set_render_region(&mut self, region: RenderRegion) -> bool {
        self.convergence.set_render_region(region)
    }

    pub fn switch_renderer(&mut self, kind: RendererKind) -> Result<(), SessionError> {
        let size = self.resources.output.size();
        let layouts = self.resources.layouts();
        if self
            .registry
            .switch(kind, size, &layouts, &self.resources.index)?
        {
            self.convergence.invalidate();
        }
        Ok(())
    }

    pub fn active_renderer(&self) -> RendererKind {
        self.registry.active_kind()
    }

    /// Discard accumulated samples.
    pub fn reset_frame(&mut self) {
        self.convergence.invalidate();
    }

    pub fn settings(&self) -> &RenderSettings {
        &self.settings
    }

    /// Edit the render settings; any change restarts accumulation.
    pub fn update_settings(&mut self, update: impl FnOnce(&mut RenderSettings)) {
        let before = self.settings;
        update(&mut self.settings);
        if self.settings != before {
            self.convergence.invalidate();
        }
    }

    /// Restore the settings from the config's defaults record.
    pub fn reset_settings(&mut self) {
        let defaults = self.config.defaults;
        self.update_settings(|s| *s = defaults);
    }

    pub fn sun_and_sky(&self) -> &SunAndSky {
        self.resources.environment.sun_and_sky()
    }

    pub fn set_sun_and_sky(&mut self, sun_and_sky: SunAndSky) {
        if *self.resources.environment.sun_and_sky() != sun_and_sky {
            self.resources.environment.set_sun_and_sky(sun_and_sky);
            self.convergence.invalidate();
        }
    }

    pub fn set_max_iterations(&mut self, max_iterations: i32) {
        self.convergence.set_max_iterations(max_iterations);
    }

    pub fn accumulation(&self) -> AccumulationState {
        self.convergence.state()
    }

    /// Closest hit under output pixel (`x`, `y`).
    pub fn pick(&self, x: u32, y: u32, camera: &Camera) -> Option<RayHit> {
        let size = self.resources.output.size();
        if x >= size.width || y >= size.height {
            return None;
        }
        let ndc = Vec2::new(
            (x as f32 + 0.5) / size.width as f32 * 2.0 - 1.0,
            1.0 - (y as f32 + 0.5) / size.height as f32 * 2.0,
        );
        self.resources
            .index
            .intersect(&camera.primary_ray(ndc), Interval::RAY)
    }

    /// World bounds of the active scene, for camera fitting.
    pub fn scene_bounds(&self) -> Aabb {
        self.resources.index.bounds()
    }

    pub fn scene_index(&self) -> &SceneIndex {
        &self.resources.index
    }

    /// The active scene description, once one has been loaded.
    pub fn scene(&self) -> Option<&SceneDescription> {
        self.resources.scene.as_ref()
    }

    pub fn output_size(&self) -> Extent2d {
        self.resources.output.size()
    }

    pub fn output_rgba8(&self) -> Vec<u8> {
        self.resources.output.to_rgba8()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Cancel any load, wait for the device and release pipeline state.
    pub fn shutdown(mut self) -> Result<(), SessionError> {
        self.coordinator.cancel();
        self.coordinator.quiesce()?;
        self.registry.destroy_all();
        log::info!("Render session shut down");
        Ok(())
    }
}

/// Make a prepared asset active. Runs on the render thread after the quiesce.
fn apply_prepared(
    resources: &mut SessionResources,
    registry: &mut RendererRegistry,
    convergence: &mut ConvergenceController,
    settings: &mut RenderSettings,
    prepared: PreparedAsset,
) -> Result<(), SwapError> {
    match prepared {
        PreparedAsset::Scene {
            scene,
            index,
            skipped,
        } => {
            let scene_data = SceneData::new(&resources.device, &scene, &index)?;
            let previous = resources.index.replace(index);
            resources.scene_data = scene_data;
            drop(previous);

            // The scene-data layout follows the texture count; rebuild pipelines against it
            let size = resources.output.size();
            registry.recreate_all(size, &resources.layouts(), &resources.index)?;

            if skipped > 0 {
                log::warn!("Scene '{}' loaded with {} primitives skipped", scene.name, skipped);
            }
            resources.scene = Some(scene);
        }
        PreparedAsset::Environment(map) => {
            resources.environment.replace(&map)?;
            settings.firefly_clamp_threshold = map.integral * 4.0;
        }
    }
    convergence.invalidate();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_core::{FileLoader, LoadError};
    use prism_math::Vec3;

    fn session(max_iterations: i32) -> RenderSession {
        let config = SessionConfig {
            max_iterations,
            ..Default::default()
        };
        RenderSession::new(config, Arc::new(FileLoader::new()), Extent2d::new(8, 6)).unwrap()
    }

    fn camera() -> Camera {
        Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 8.0 / 6.0)
    }

    #[test]
    fn test_frames_until_converged() {
        let mut session = session(3);
        let camera = camera();
        let outcomes: Vec<_> = (0..5).map(|_| session.frame(&camera).unwrap()).collect();

        assert_eq!(
            outcomes,
            vec![
                FrameOutcome::Rendered { frame: 0 },
                FrameOutcome::Rendered { frame: 1 },
                FrameOutcome::Rendered { frame: 2 },
                FrameOutcome::Converged,
                FrameOutcome::Converged,
            ]
        );
        assert_eq!(session.accumulation().frame, 3);
        assert_eq!(session.device().submission_count(), 3);
    }

    #[test]
    fn test_camera_move_restarts() {
        let mut session = session(100);
        let mut camera = camera();
        session.frame(&camera).unwrap();
        session.frame(&camera).unwrap();

        camera.position.x += 0.25;
        assert_eq!(session.frame(&camera).unwrap(), FrameOutcome::Rendered { frame: 0 });
    }

    #[test]
    fn test_settings_change_restarts() {
        let mut session = session(100);
        let camera = camera();
        session.frame(&camera).unwrap();
        session.frame(&camera).unwrap();

        session.update_settings(|s| s.max_depth = 3);
        assert_eq!(session.frame(&camera).unwrap(), FrameOutcome::Rendered { frame: 0 });

        // Unchanged settings keep accumulating
        session.update_settings(|s| s.max_depth = 3);
        assert_eq!(session.frame(&camera).unwrap(), FrameOutcome::Rendered { frame: 1 });

        session.reset_settings();
        assert_eq!(session.settings(), &RenderSettings::default());
        assert_eq!(session.frame(&camera).unwrap(), FrameOutcome::Rendered { frame: 0 });
    }

    #[test]
    fn test_switch_renderer_restarts() {
        let mut session = session(100);
        let camera = camera();
        session.frame(&camera).unwrap();
        session.frame(&camera).unwrap();

        session.switch_renderer(RendererKind::NormalPreview).unwrap();
        assert_eq!(session.active_renderer(), RendererKind::NormalPreview);
        assert_eq!(session.frame(&camera).unwrap(), FrameOutcome::Rendered { frame: 0 });
        assert!(session.device().validation_errors().is_empty());
    }

    #[test]
    fn test_unsupported_load_is_synchronous() {
        let mut session = session(10);
        let result = session.request_load("scene.fbx");
        assert!(matches!(
            result,
            Err(SessionError::Load(SwapError::Load(LoadError::UnsupportedExtension(_))))
        ));
        assert!(!session.is_busy());
    }

    #[test]
    fn test_device_lost_is_fatal() {
        let mut session = session(10);
        session.device().mark_lost();
        let err = session.frame(&camera()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_oversized_resize_keeps_output() {
        let mut session = session(100);
        let camera = camera();
        session.frame(&camera).unwrap();
        session.frame(&camera).unwrap();

        let err = session.on_resize(Extent2d::new(100_000, 100_000)).unwrap_err();
        assert!(matches!(err, SessionError::Device(DeviceError::LimitExceeded { .. })));
        assert!(!err.is_fatal());
        assert_eq!(session.output_size(), Extent2d::new(8, 6));
        assert_eq!(session.frame(&camera).unwrap(), FrameOutcome::Rendered { frame: 2 });
    }

    #[test]
    fn test_pick_empty_scene() {
        let session = session(10);
        assert!(session.pick(4, 3, &camera()).is_none());
        assert!(session.pick(100, 3, &camera()).is_none());
    }
}
