//! Shared dispatch plumbing for the CPU back-ends.
//!
//! Binds the pipeline and the four external sets, then resolves everything a
//! ray needs from what was actually bound, so a back-end never reaches around
//! the binding sets to session state.

use std::mem::size_of;
use std::sync::Arc;

use prism_accel::SCENE_INDEX_BINDING;
use prism_core::environment::{direction_to_uv, sample_alias_table};
use prism_core::{EnvAccel, EnvSample};
use prism_gpu::{
    AccelerationStructure, CommandEncoder, Device, DeviceError, Dispatch, Extent2d, Image,
    Pipeline,
};
use prism_math::{Ray, Vec2, Vec3};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use super::{
    accumulate, pixel_seed, ExternalBindingLayouts, ExternalBindingSets, RenderError,
    ENVIRONMENT_SET, OUTPUT_SET, SCENE_DATA_SET, SCENE_INDEX_SET,
};
use crate::environment::{HDR_BINDING, IMPORTANCE_BINDING, SUN_SKY_BINDING};
use crate::output::OUTPUT_IMAGE_BINDING;
use crate::scene_data::{
    CameraUniform, GpuMaterial, CAMERA_BINDING, GEOMETRY_MATERIALS_BINDING, MATERIALS_BINDING,
    TEXTURES_BINDING,
};
use crate::state::{RtxState, SunAndSky};

pub(crate) fn create_pipeline(
    device: Option<&Device>,
    name: &'static str,
    layouts: &ExternalBindingLayouts,
) -> Result<Arc<Pipeline>, RenderError> {
    let device = device.ok_or(RenderError::NotSetUp(name))?;
    let layout = device.create_pipeline_layout(name, layouts.to_vec(), size_of::<RtxState>())?;
    Ok(device.create_pipeline(name, &layout)?)
}

pub(crate) fn begin_dispatch<'e>(
    encoder: &'e mut CommandEncoder,
    pipeline: Option<&Arc<Pipeline>>,
    name: &'static str,
    state: &RtxState,
    size: Extent2d,
    sets: &ExternalBindingSets<'_>,
) -> Result<Dispatch<'e>, RenderError> {
    let pipeline = pipeline.ok_or(RenderError::NotCreated(name))?;
    encoder.bind_pipeline(pipeline);
    encoder.bind_sets(&sets.as_array())?;
    encoder.push_constants(state)?;
    Ok(encoder.dispatch_rays(size)?)
}

/// Everything one dispatch reads, resolved from the bound sets.
pub(crate) struct FrameInputs<'a> {
    pub state: RtxState,
    pub scene: &'a Arc<dyn AccelerationStructure>,
    pub target: &'a Arc<Image>,
    pub camera: CameraUniform,
    pub materials: Vec<GpuMaterial>,
    pub geometry_materials: Vec<u32>,
    pub textures: &'a [Arc<Image>],
    pub sun_and_sky: SunAndSky,
    pub hdr: &'a Arc<Image>,
    pub importance: Vec<EnvAccel>,
}

impl<'a> FrameInputs<'a> {
    pub fn resolve(dispatch: &Dispatch<'a>) -> Result<Self, DeviceError> {
        let scene_index = dispatch.set(SCENE_INDEX_SET)?;
        let output = dispatch.set(OUTPUT_SET)?;
        let scene_data = dispatch.set(SCENE_DATA_SET)?;
        let environment = dispatch.set(ENVIRONMENT_SET)?;

        let hdr = environment
            .textures(HDR_BINDING)?
            .first()
            .ok_or_else(|| DeviceError::BindingMismatch {
                binding: HDR_BINDING,
                reason: "no environment image bound".to_string(),
            })?;

        Ok(Self {
            state: dispatch.push_constants()?,
            scene: scene_index.acceleration_structure(SCENE_INDEX_BINDING)?,
            target: output.storage_image(OUTPUT_IMAGE_BINDING)?,
            camera: scene_data
                .buffer(CAMERA_BINDING)?
                .read::<CameraUniform>()?
                .first()
                .copied()
                .unwrap_or_default(),
            materials: scene_data.buffer(MATERIALS_BINDING)?.read()?,
            geometry_materials: scene_data.buffer(GEOMETRY_MATERIALS_BINDING)?.read()?,
            textures: scene_data.textures(TEXTURES_BINDING)?,
            sun_and_sky: environment
                .buffer(SUN_SKY_BINDING)?
                .read::<SunAndSky>()?
                .first()
                .copied()
                .unwrap_or_default(),
            hdr,
            importance: environment.buffer(IMPORTANCE_BINDING)?.read()?,
        })
    }

    /// Material of the geometry a ray hit.
    pub fn material(&self, geometry_index: u32) -> GpuMaterial {
        self.geometry_materials
            .get(geometry_index as usize)
            .and_then(|&m| self.materials.get(m as usize))
            .or_else(|| self.materials.first())
            .copied()
            .unwrap_or_else(|| GpuMaterial::from(&prism_core::Material::default()))
    }

    pub fn base_color(&self, material: &GpuMaterial, uv: Vec2) -> Vec3 {
        let tint = usize::try_from(material.base_color_texture)
            .ok()
            .and_then(|t| self.textures.get(t))
            .map(|image| image.sample(uv).truncate())
            .unwrap_or(Vec3::ONE);
        material.base_color() * tint
    }

    fn sun_and_sky_in_use(&self) -> bool {
        self.sun_and_sky.in_use != 0
    }

    /// Radiance arriving from the environment along `direction`.
    pub fn environment(&self, direction: Vec3) -> Vec3 {
        if self.sun_and_sky_in_use() {
            self.sun_and_sky.radiance(direction)
        } else {
            self.hdr.sample(direction_to_uv(direction)).truncate() * self.state.hdr_multiplier
        }
    }

    /// Importance-sample the environment map. `None` with the procedural sky.
    pub fn sample_environment(&self, random: [f32; 3]) -> Option<EnvSample> {
        if self.sun_and_sky_in_use() {
            return None;
        }
        let extent = self.hdr.extent();
        sample_alias_table(&self.importance, extent.width, extent.height, random)
    }

    /// Solid-angle pdf with which `sample_environment` picks `direction`.
    pub fn environment_pdf(&self, direction: Vec3) -> f32 {
        if self.sun_and_sky_in_use() {
            return 0.0;
        }
        let extent = self.hdr.extent();
        if extent.is_empty() {
            return 0.0;
        }
        let uv = direction_to_uv(direction);
        let x = ((uv.x - uv.x.floor()) * extent.width as f32) as u32;
        let y = (uv.y.clamp(0.0, 1.0) * extent.height as f32) as u32;
        let index = (y.min(extent.height - 1) * extent.width + x.min(extent.width - 1)) as usize;
        self.importance.get(index).map(|e| e.pdf).unwrap_or(0.0)
    }

    /// Trace `shade` for every pixel of `size` and blend into the target.
    pub fn accumulate_pixels<F>(&self, size: Extent2d, shade: F) -> Result<(), DeviceError>
    where
        F: Fn(&Self, Ray, &mut StdRng) -> Vec3 + Sync,
    {
        let extent = self.target.extent();
        let width = size.width.min(extent.width) as usize;
        let height = size.height.min(extent.height) as usize;
        if width == 0 || height == 0 {
            return Ok(());
        }

        let frame = self.state.frame;
        let samples = self.state.max_samples.max(1);
        let clamp = self.state.firefly_clamp_threshold;
        let mut texels = self.target.read();

        texels
            .par_chunks_mut(extent.width as usize)
            .take(height)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, texel) in row.iter_mut().take(width).enumerate() {
                    let mut rng = StdRng::seed_from_u64(pixel_seed(x as u32, y as u32, frame));
                    let mut sum = Vec3::ZERO;
                    for _ in 0..samples {
                        let jitter = Vec2::new(rng.gen::<f32>(), rng.gen::<f32>());
                        let ndc = Vec2::new(
                            (x as f32 + jitter.x) / size.width as f32 * 2.0 - 1.0,
                            1.0 - (y as f32 + jitter.y) / size.height as f32 * 2.0,
                        );
                        let ray = self.camera.primary_ray(ndc);
                        sum += clamp_firefly(shade(self, ray, &mut rng), clamp);
                    }
                    let sample = sum / samples as f32;
                    *texel = accumulate(*texel, sample.to_array(), frame);
                }
            });

        self.target.write(&texels)
    }
}

/// Scale a sample down so its luminance does not exceed `threshold`.
fn clamp_firefly(radiance: Vec3, threshold: f32) -> Vec3 {
    if !radiance.is_finite() {
        return Vec3::ZERO;
    }
    let luminance = radiance.dot(Vec3::new(0.212671, 0.715160, 0.072169));
    if threshold > 0.0 && luminance > threshold {
        radiance * (threshold / luminance)
    } else {
        radiance
    }
}
