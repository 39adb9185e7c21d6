//! Shading-normal preview.
//!
//! One jittered primary ray per sample; hits show the world-space shading
//! normal mapped to `[0, 1]`, misses are black. Accumulates like the path
//! tracer, so edges converge to anti-aliased.

use std::sync::Arc;

use prism_accel::SceneIndex;
use prism_gpu::{CommandEncoder, Device, Extent2d, Pipeline};
use prism_math::{Interval, Ray, Vec3};
use rand::rngs::StdRng;

use super::frame::{begin_dispatch, create_pipeline, FrameInputs};
use super::{ExternalBindingLayouts, ExternalBindingSets, RenderError, Renderer};
use crate::state::RtxState;

const NAME: &str = "normal preview";

#[derive(Default)]
pub struct NormalPreview {
    device: Option<Device>,
    pipeline: Option<Arc<Pipeline>>,
    state: RtxState,
}

impl NormalPreview {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for NormalPreview {
    fn name(&self) -> &'static str {
        NAME
    }

    fn setup(&mut self, device: &Device) {
        self.device = Some(device.clone());
    }

    fn destroy(&mut self) {
        self.pipeline = None;
    }

    fn create(
        &mut self,
        _size: Extent2d,
        layouts: &ExternalBindingLayouts,
        _scene: &SceneIndex,
    ) -> Result<(), RenderError> {
        self.pipeline = Some(create_pipeline(self.device.as_ref(), NAME, layouts)?);
        Ok(())
    }

    fn is_created(&self) -> bool {
        self.pipeline.is_some()
    }

    fn run(
        &mut self,
        encoder: &mut CommandEncoder,
        size: Extent2d,
        sets: &ExternalBindingSets<'_>,
    ) -> Result<(), RenderError> {
        let dispatch = begin_dispatch(encoder, self.pipeline.as_ref(), NAME, &self.state, size, sets)?;
        let inputs = FrameInputs::resolve(&dispatch)?;
        inputs.accumulate_pixels(size, shade_normal)?;
        Ok(())
    }

    fn set_accumulation_state(&mut self, state: RtxState) {
        self.state = state;
    }
}

fn shade_normal(inputs: &FrameInputs<'_>, ray: Ray, _rng: &mut StdRng) -> Vec3 {
    match inputs.scene.trace(&ray, Interval::RAY) {
        Some(hit) => hit.shading_normal.normalize_or_zero() * 0.5 + Vec3::splat(0.5),
        None => Vec3::ZERO,
    }
}
