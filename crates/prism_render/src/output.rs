//! Accumulation target.
//!
//! One RGBA32F storage image the back-ends average samples into. The layout
//! never changes; resizing replaces the image and its binding set.

use std::sync::Arc;

use prism_gpu::{
    BindingKind, BindingLayout, BindingResource, BindingSet, BindingSlot, Device, DeviceError,
    Extent2d, Image,
};

pub const OUTPUT_IMAGE_BINDING: u32 = 0;

pub struct RenderOutput {
    device: Device,
    layout: Arc<BindingLayout>,
    image: Arc<Image>,
    set: Arc<BindingSet>,
}

impl RenderOutput {
    pub fn new(device: &Device, size: Extent2d) -> Result<Self, DeviceError> {
        let layout = device.create_binding_layout(
            "output",
            vec![BindingSlot::new(OUTPUT_IMAGE_BINDING, BindingKind::StorageImage)],
        )?;
        let (image, set) = Self::create_target(device, &layout, size)?;

        Ok(Self {
            device: device.clone(),
            layout,
            image,
            set,
        })
    }

    fn create_target(
        device: &Device,
        layout: &Arc<BindingLayout>,
        size: Extent2d,
    ) -> Result<(Arc<Image>, Arc<BindingSet>), DeviceError> {
        let image = device.create_image("accumulation", size)?;
        let set = device.create_binding_set(
            "output",
            layout,
            vec![(OUTPUT_IMAGE_BINDING, BindingResource::StorageImage(image.clone()))],
        )?;
        Ok((image, set))
    }

    /// Replace the accumulation image. The device must be idle.
    pub fn resize(&mut self, size: Extent2d) -> Result<(), DeviceError> {
        if size == self.image.extent() {
            return Ok(());
        }
        let (image, set) = Self::create_target(&self.device, &self.layout, size)?;
        self.image = image;
        self.set = set;
        log::debug!("Output resized to {}x{}", size.width, size.height);
        Ok(())
    }

    pub fn size(&self) -> Extent2d {
        self.image.extent()
    }

    pub fn layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }

    pub fn bindings(&self) -> &Arc<BindingSet> {
        &self.set
    }

    pub fn image(&self) -> &Arc<Image> {
        &self.image
    }

    /// Gamma-corrected 8-bit copy of the accumulation image.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let texels = self.image.read();
        let mut bytes = Vec::with_capacity(texels.len() * 4);
        for [r, g, b, _] in texels {
            bytes.extend_from_slice(&[to_byte(r), to_byte(g), to_byte(b), 255]);
        }
        bytes
    }
}

/// Gamma 2.0, clamped.
fn to_byte(linear: f32) -> u8 {
    let gamma = if linear > 0.0 { linear.sqrt() } else { 0.0 };
    (255.0 * gamma.clamp(0.0, 1.0)) as u8
}
