//! Monte Carlo path tracer.
//!
//! Lambertian bounces up to the configured depth with emission, and
//! next-event estimation toward the environment map combined with BSDF
//! sampling by the power heuristic. With the procedural sky in use only BSDF
//! sampling is used.

use std::f32::consts::PI;
use std::sync::Arc;

use prism_accel::SceneIndex;
use prism_gpu::{CommandEncoder, Device, Extent2d, Pipeline};
use prism_math::{Interval, Ray, Vec3};
use rand::rngs::StdRng;
use rand::Rng;

use super::frame::{begin_dispatch, create_pipeline, FrameInputs};
use super::{ExternalBindingLayouts, ExternalBindingSets, RenderError, Renderer};
use crate::state::RtxState;

const NAME: &str = "path tracer";

/// Offset along the normal for secondary ray origins.
const SURFACE_EPSILON: f32 = 1e-3;

#[derive(Default)]
pub struct PathTracer {
    device: Option<Device>,
    pipeline: Option<Arc<Pipeline>>,
    state: RtxState,
}

impl PathTracer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for PathTracer {
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
        size: Extent2d,
        layouts: &ExternalBindingLayouts,
        scene: &SceneIndex,
    ) -> Result<(), RenderError> {
        self.pipeline = Some(create_pipeline(self.device.as_ref(), NAME, layouts)?);
        log::debug!(
            "{}: created for {}x{}, {} instances",
            NAME,
            size.width,
            size.height,
            scene.instance_count()
        );
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
        inputs.accumulate_pixels(size, trace_path)?;
        Ok(())
    }

    fn set_accumulation_state(&mut self, state: RtxState) {
        self.state = state;
    }
}

fn trace_path(inputs: &FrameInputs<'_>, primary: Ray, rng: &mut StdRng) -> Vec3 {
    let mut radiance = Vec3::ZERO;
    let mut throughput = Vec3::ONE;
    let mut ray = primary;
    // Pdf of the BSDF sample that produced `ray`; `None` for the camera ray
    let mut bsdf_pdf: Option<f32> = None;

    for _ in 0..inputs.state.max_depth.max(1) {
        let Some(hit) = inputs.scene.trace(&ray, Interval::RAY) else {
            let direction = ray.direction.normalize_or_zero();
            let weight = match bsdf_pdf {
                Some(pdf) => power_heuristic(pdf, inputs.environment_pdf(direction)),
                None => 1.0,
            };
            radiance += throughput * inputs.environment(direction) * weight;
            break;
        };

        let material = inputs.material(hit.geometry_index);
        let albedo = inputs.base_color(&material, hit.uv);
        radiance += throughput * material.emissive();

        let normal = hit.shading_normal.normalize_or_zero();
        let origin = hit.position + hit.geometric_normal.normalize_or_zero() * SURFACE_EPSILON;

        // Light sample toward the environment
        if let Some(sample) = inputs.sample_environment([rng.gen(), rng.gen(), rng.gen()]) {
            let cos_theta = normal.dot(sample.direction);
            if cos_theta > 0.0 && sample.pdf > 0.0 {
                let shadow = Ray::new(origin, sample.direction);
                if !inputs.scene.occluded(&shadow, Interval::RAY) {
                    let brdf_pdf = cos_theta / PI;
                    let weight = power_heuristic(sample.pdf, brdf_pdf);
                    let light = inputs.environment(sample.direction);
                    radiance += throughput * albedo / PI * light * cos_theta * weight / sample.pdf;
                }
            }
        }

        // Cosine-weighted bounce: brdf * cos / pdf == albedo
        let direction = cosine_direction(normal, rng.gen(), rng.gen());
        let cos_theta = normal.dot(direction);
        if cos_theta <= 0.0 {
            break;
        }
        throughput *= albedo;
        if throughput.max_element() <= 0.0 {
            break;
        }
        bsdf_pdf = Some(cos_theta / PI);
        ray = Ray::new(origin, direction);
    }

    radiance
}

fn power_heuristic(a: f32, b: f32) -> f32 {
    let a2 = a * a;
    let b2 = b * b;
    if a2 + b2 > 0.0 {
        a2 / (a2 + b2)
    } else {
        1.0
    }
}

/// Cosine-distributed direction in the hemisphere around `normal`.
fn cosine_direction(normal: Vec3, r1: f32, r2: f32) -> Vec3 {
    let (tangent, bitangent) = normal.any_orthonormal_pair();
    let phi = 2.0 * PI * r1;
    let radius = r2.sqrt();
    let z = (1.0 - r2).max(0.0).sqrt();
    (tangent * (radius * phi.cos()) + bitangent * (radius * phi.sin()) + normal * z).normalize()
}
