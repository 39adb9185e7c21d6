//! Environment and sun/sky bindings.
//!
//! The layout is fixed for the life of the session, so an environment swap
//! only replaces the binding set and pipelines stay valid.

use std::sync::Arc;

use prism_core::EnvironmentMap;
use prism_gpu::{
    BindingKind, BindingLayout, BindingResource, BindingSet, BindingSlot, Buffer, BufferUsage,
    CommandEncoder, Device, DeviceError, Extent2d,
};
use prism_math::Vec3;

use crate::state::SunAndSky;

pub const SUN_SKY_BINDING: u32 = 0;
pub const HDR_BINDING: u32 = 1;
pub const IMPORTANCE_BINDING: u32 = 2;

pub struct EnvironmentBindings {
    device: Device,
    layout: Arc<BindingLayout>,
    set: Arc<BindingSet>,
    sun_and_sky_buffer: Arc<Buffer>,
    sun_and_sky: SunAndSky,
    integral: f32,
}

impl EnvironmentBindings {
    /// Bindings for a constant grey sky.
    pub fn new(device: &Device) -> Result<Self, DeviceError> {
        let layout = device.create_binding_layout(
            "environment",
            vec![
                BindingSlot::new(SUN_SKY_BINDING, BindingKind::UniformBuffer),
                BindingSlot::new(HDR_BINDING, BindingKind::SampledTexture),
                BindingSlot::new(IMPORTANCE_BINDING, BindingKind::StorageBuffer),
            ],
        )?;
        let sun_and_sky = SunAndSky::default();
        let sun_and_sky_buffer =
            device.create_buffer_init("sun and sky", BufferUsage::Uniform, &[sun_and_sky])?;

        let default_map = EnvironmentMap::uniform(Vec3::splat(0.5));
        let set = Self::create_set(device, &layout, &sun_and_sky_buffer, &default_map)?;

        Ok(Self {
            device: device.clone(),
            layout,
            set,
            sun_and_sky_buffer,
            sun_and_sky,
            integral: default_map.integral,
        })
    }

    fn create_set(
        device: &Device,
        layout: &Arc<BindingLayout>,
        sun_and_sky: &Arc<Buffer>,
        map: &EnvironmentMap,
    ) -> Result<Arc<BindingSet>, DeviceError> {
        let texture = &map.texture;
        let image = device.create_image_init(
            &texture.path,
            Extent2d::new(texture.width, texture.height),
            texture.pixels.clone(),
        )?;
        let importance =
            device.create_buffer_init("environment importance", BufferUsage::Storage, &map.accel)?;

        device.create_binding_set(
            "environment",
            layout,
            vec![
                (SUN_SKY_BINDING, BindingResource::UniformBuffer(sun_and_sky.clone())),
                (HDR_BINDING, BindingResource::SampledTextures(vec![image])),
                (IMPORTANCE_BINDING, BindingResource::StorageBuffer(importance)),
            ],
        )
    }

    /// Point the bindings at a new map. The device must be idle.
    pub fn replace(&mut self, map: &EnvironmentMap) -> Result<(), DeviceError> {
        self.set = Self::create_set(&self.device, &self.layout, &self.sun_and_sky_buffer, map)?;
        self.integral = map.integral;
        log::info!(
            "Environment: {}x{}, integral {:.4}",
            map.texture.width,
            map.texture.height,
            map.integral
        );
        Ok(())
    }

    pub fn layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }

    pub fn bindings(&self) -> &Arc<BindingSet> {
        &self.set
    }

    pub fn sun_and_sky(&self) -> &SunAndSky {
        &self.sun_and_sky
    }

    pub fn set_sun_and_sky(&mut self, sun_and_sky: SunAndSky) {
        self.sun_and_sky = sun_and_sky;
    }

    /// Importance integral of the bound map.
    pub fn integral(&self) -> f32 {
        self.integral
    }

    /// Record the per-frame uniform upload.
    pub fn update(&self, encoder: &mut CommandEncoder) -> Result<(), DeviceError> {
        encoder.update_buffer(&self.sun_and_sky_buffer, &[self.sun_and_sky])
    }
}
