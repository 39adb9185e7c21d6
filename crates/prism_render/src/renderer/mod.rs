//! Interchangeable rendering back-ends.
//!
//! Every back-end consumes the same four external binding sets, in this order:
//!
//! 0. scene index (top-level acceleration structure)
//! 1. output (accumulation image)
//! 2. scene data (camera, materials, textures)
//! 3. environment (sun/sky uniform, HDR image, importance table)
//!
//! and receives the accumulation state record by value before each `run`.

mod frame;
mod normal_preview;
mod path_tracer;

use std::sync::Arc;

use prism_accel::SceneIndex;
use prism_gpu::{BindingLayout, BindingSet, CommandEncoder, Device, DeviceError, Extent2d};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::RtxState;

pub use normal_preview::NormalPreview;
pub use path_tracer::PathTracer;

pub const SCENE_INDEX_SET: usize = 0;
pub const OUTPUT_SET: usize = 1;
pub const SCENE_DATA_SET: usize = 2;
pub const ENVIRONMENT_SET: usize = 3;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RenderError {
    #[error("renderer '{0}' has no pipeline; call create first")]
    NotCreated(&'static str),

    #[error("renderer '{0}' has not been set up with a device")]
    NotSetUp(&'static str),

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl RenderError {
    pub fn is_device_lost(&self) -> bool {
        matches!(self, RenderError::Device(DeviceError::Lost))
    }
}

/// Layouts of the four external sets, used when creating pipelines.
#[derive(Clone)]
pub struct ExternalBindingLayouts {
    pub scene_index: Arc<BindingLayout>,
    pub output: Arc<BindingLayout>,
    pub scene_data: Arc<BindingLayout>,
    pub environment: Arc<BindingLayout>,
}

impl ExternalBindingLayouts {
    pub fn to_vec(&self) -> Vec<Arc<BindingLayout>> {
        vec![
            self.scene_index.clone(),
            self.output.clone(),
            self.scene_data.clone(),
            self.environment.clone(),
        ]
    }
}

/// The four external sets bound for one dispatch.
#[derive(Clone, Copy)]
pub struct ExternalBindingSets<'a> {
    pub scene_index: &'a Arc<BindingSet>,
    pub output: &'a Arc<BindingSet>,
    pub scene_data: &'a Arc<BindingSet>,
    pub environment: &'a Arc<BindingSet>,
}

impl<'a> ExternalBindingSets<'a> {
    pub fn as_array(&self) -> [&'a Arc<BindingSet>; 4] {
        [self.scene_index, self.output, self.scene_data, self.environment]
    }
}

/// A rendering back-end.
pub trait Renderer: Send {
    fn name(&self) -> &'static str;

    /// Keep the device the back-end allocates pipeline state on.
    fn setup(&mut self, device: &Device);

    /// Release pipeline state. The device must be idle.
    fn destroy(&mut self);

    /// Build pipeline state against the given set layouts.
    fn create(
        &mut self,
        size: Extent2d,
        layouts: &ExternalBindingLayouts,
        scene: &SceneIndex,
    ) -> Result<(), RenderError>;

    fn is_created(&self) -> bool;

    /// Record one dispatch of `size` rays.
    fn run(
        &mut self,
        encoder: &mut CommandEncoder,
        size: Extent2d,
        sets: &ExternalBindingSets<'_>,
    ) -> Result<(), RenderError>;

    fn set_accumulation_state(&mut self, state: RtxState);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RendererKind {
    #[default]
    PathTracer,
    NormalPreview,
}

impl RendererKind {
    pub const ALL: [RendererKind; 2] = [RendererKind::PathTracer, RendererKind::NormalPreview];

    pub fn instantiate(self) -> Box<dyn Renderer> {
        match self {
            RendererKind::PathTracer => Box::new(PathTracer::new()),
            RendererKind::NormalPreview => Box::new(NormalPreview::new()),
        }
    }
}

/// Blend `sample` into the running average at `previous` for accumulation frame `frame`.
///
/// Frame 0 (and anything before it) overwrites.
pub(crate) fn accumulate(previous: [f32; 4], sample: [f32; 3], frame: i32) -> [f32; 4] {
    if frame <= 0 {
        return [sample[0], sample[1], sample[2], 1.0];
    }
    let weight = 1.0 / (frame as f32 + 1.0);
    let blend = |old: f32, new: f32| old + (new - old) * weight;
    [
        blend(previous[0], sample[0]),
        blend(previous[1], sample[1]),
        blend(previous[2], sample[2]),
        1.0,
    ]
}

/// Per-pixel, per-frame seed so that every frame draws fresh samples.
pub(crate) fn pixel_seed(x: u32, y: u32, frame: i32) -> u64 {
    let mut h = (x as u64) << 32 | y as u64;
    h ^= (frame as u32 as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    // splitmix64 finaliser
    h = (h ^ (h >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    h = (h ^ (h >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    h ^ (h >> 31)
}
