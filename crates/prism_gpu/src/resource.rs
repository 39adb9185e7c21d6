//! Buffers and images.

use crate::device::{ResourceGuard, ResourceKind};
use crate::{Device, DeviceError, ResourceId, Result};
use bytemuck::Pod;
use parking_lot::RwLock;
use prism_math::{Vec2, Vec4};
use serde::{Deserialize, Serialize};
use std::mem::size_of;
use std::sync::Arc;

/// Width and height of a 2D image or render region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    Storage,
    Uniform,
}

/// A linear block of device memory.
#[derive(Debug)]
pub struct Buffer {
    guard: ResourceGuard,
    label: String,
    usage: BufferUsage,
    data: RwLock<Vec<u8>>,
}

impl Buffer {
    pub fn id(&self) -> ResourceId {
        self.guard.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Size in bytes.
    pub fn size(&self) -> u64 {
        self.data.read().len() as u64
    }

    /// Number of whole `T` elements; fails if the size is not a multiple of the stride.
    pub fn element_count<T: Pod>(&self) -> Result<usize> {
        let size = self.size();
        let stride = size_of::<T>() as u64;
        if stride == 0 || size % stride != 0 {
            return Err(DeviceError::Misaligned { size, stride });
        }
        Ok((size / stride) as usize)
    }

    /// Copy the contents out as `T` elements.
    pub fn read<T: Pod>(&self) -> Result<Vec<T>> {
        self.element_count::<T>()?;
        let data = self.data.read();
        Ok(bytemuck::pod_collect_to_vec::<u8, T>(&data))
    }

    /// Overwrite the contents starting at byte 0. The buffer never grows.
    pub(crate) fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut data = self.data.write();
        if bytes.len() > data.len() {
            return Err(DeviceError::LimitExceeded {
                what: "buffer write",
                requested: bytes.len() as u64,
                limit: data.len() as u64,
            });
        }
        data[..bytes.len()].copy_from_slice(bytes);
        Ok(())
    }
}

/// A 2D image of linear RGBA `f32` texels.
#[derive(Debug)]
pub struct Image {
    guard: ResourceGuard,
    label: String,
    extent: Extent2d,
    texels: RwLock<Vec<[f32; 4]>>,
}

impl Image {
    pub fn id(&self) -> ResourceId {
        self.guard.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn extent(&self) -> Extent2d {
        self.extent
    }

    pub fn texel(&self, x: u32, y: u32) -> Vec4 {
        let x = x.min(self.extent.width.saturating_sub(1));
        let y = y.min(self.extent.height.saturating_sub(1));
        let index = (y * self.extent.width + x) as usize;
        self.texels
            .read()
            .get(index)
            .map(|t| Vec4::from_array(*t))
            .unwrap_or(Vec4::ZERO)
    }

    /// Nearest-neighbour lookup with wrapping UVs (v = 0 is the top row).
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        if self.extent.is_empty() {
            return Vec4::ZERO;
        }
        let u = uv.x - uv.x.floor();
        let v = uv.y - uv.y.floor();
        let x = (u * self.extent.width as f32) as u32;
        let y = (v * self.extent.height as f32) as u32;
        self.texel(x, y)
    }

    /// Snapshot of all texels, row-major.
    pub fn read(&self) -> Vec<[f32; 4]> {
        self.texels.read().clone()
    }

    /// Replace every texel. `texels` must match the extent exactly.
    pub fn write(&self, texels: &[[f32; 4]]) -> Result<()> {
        if texels.len() != self.extent.area() {
            return Err(DeviceError::BindingMismatch {
                binding: 0,
                reason: format!(
                    "image '{}' expects {} texels, got {}",
                    self.label,
                    self.extent.area(),
                    texels.len()
                ),
            });
        }
        self.texels.write().copy_from_slice(texels);
        Ok(())
    }

    pub fn clear(&self, value: [f32; 4]) {
        self.texels.write().fill(value);
    }
}

impl Device {
    /// Create a buffer filled with `contents`.
    pub fn create_buffer_init<T: Pod>(
        &self,
        label: &str,
        usage: BufferUsage,
        contents: &[T],
    ) -> Result<Arc<Buffer>> {
        let bytes: &[u8] = bytemuck::cast_slice(contents);
        self.create_buffer_bytes(label, usage, bytes.to_vec())
    }

    /// Create a zero-filled buffer of `size` bytes.
    pub fn create_buffer(&self, label: &str, usage: BufferUsage, size: u64) -> Result<Arc<Buffer>> {
        self.check_limit("buffer size", size, self.limits().max_buffer_size)?;
        self.create_buffer_bytes(label, usage, vec![0; size as usize])
    }

    fn create_buffer_bytes(
        &self,
        label: &str,
        usage: BufferUsage,
        bytes: Vec<u8>,
    ) -> Result<Arc<Buffer>> {
        self.check()?;
        self.check_limit("buffer size", bytes.len() as u64, self.limits().max_buffer_size)?;
        let guard = self.register(ResourceKind::Buffer, label)?;

        Ok(Arc::new(Buffer {
            guard,
            label: label.to_string(),
            usage,
            data: RwLock::new(bytes),
        }))
    }

    /// Create an image cleared to transparent black.
    pub fn create_image(&self, label: &str, extent: Extent2d) -> Result<Arc<Image>> {
        let bytes = (extent.area() as u64).saturating_mul(size_of::<[f32; 4]>() as u64);
        self.check_limit("image size", bytes, self.limits().max_buffer_size)?;
        self.create_image_init(label, extent, vec![[0.0; 4]; extent.area()])
    }

    /// Create an image from row-major texels.
    pub fn create_image_init(
        &self,
        label: &str,
        extent: Extent2d,
        texels: Vec<[f32; 4]>,
    ) -> Result<Arc<Image>> {
        self.check()?;
        let bytes = (texels.len() * size_of::<[f32; 4]>()) as u64;
        self.check_limit("image size", bytes, self.limits().max_buffer_size)?;
        if texels.len() != extent.area() {
            return Err(DeviceError::BindingMismatch {
                binding: 0,
                reason: format!(
                    "image '{}' is {}x{} but {} texels were supplied",
                    label,
                    extent.width,
                    extent.height,
                    texels.len()
                ),
            });
        }
        let guard = self.register(ResourceKind::Image, label)?;

        Ok(Arc::new(Image {
            guard,
            label: label.to_string(),
            extent,
            texels: RwLock::new(texels),
        }))
    }
}
