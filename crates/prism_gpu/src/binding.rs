//! Binding layouts and binding sets.
//!
//! A layout fixes the shape of a set (slot kinds and descriptor counts). A set
//! fills a layout with concrete resources and is validated against it once,
//! at creation.

use crate::device::{ResourceGuard, ResourceKind};
use crate::{AccelerationStructure, Buffer, Device, DeviceError, Image, ResourceId, Result};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    AccelerationStructure,
    StorageImage,
    StorageBuffer,
    UniformBuffer,
    SampledTexture,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingSlot {
    pub binding: u32,
    pub kind: BindingKind,
    /// Descriptor count; only texture arrays use more than one.
    pub count: u32,
}

impl BindingSlot {
    pub const fn new(binding: u32, kind: BindingKind) -> Self {
        Self {
            binding,
            kind,
            count: 1,
        }
    }

    pub const fn array(binding: u32, kind: BindingKind, count: u32) -> Self {
        Self {
            binding,
            kind,
            count,
        }
    }
}

pub struct BindingLayout {
    guard: ResourceGuard,
    label: String,
    slots: Vec<BindingSlot>,
}

impl BindingLayout {
    pub fn id(&self) -> ResourceId {
        self.guard.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn slots(&self) -> &[BindingSlot] {
        &self.slots
    }

    pub fn slot(&self, binding: u32) -> Option<&BindingSlot> {
        self.slots.iter().find(|s| s.binding == binding)
    }
}

impl fmt::Debug for BindingLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingLayout")
            .field("id", &self.id())
            .field("label", &self.label)
            .field("slots", &self.slots)
            .finish()
    }
}

/// A resource bound to one slot.
#[derive(Clone)]
pub enum BindingResource {
    AccelerationStructure(Arc<dyn AccelerationStructure>),
    StorageImage(Arc<Image>),
    StorageBuffer(Arc<Buffer>),
    UniformBuffer(Arc<Buffer>),
    SampledTextures(Vec<Arc<Image>>),
}

impl BindingResource {
    pub fn kind(&self) -> BindingKind {
        match self {
            BindingResource::AccelerationStructure(_) => BindingKind::AccelerationStructure,
            BindingResource::StorageImage(_) => BindingKind::StorageImage,
            BindingResource::StorageBuffer(_) => BindingKind::StorageBuffer,
            BindingResource::UniformBuffer(_) => BindingKind::UniformBuffer,
            BindingResource::SampledTextures(_) => BindingKind::SampledTexture,
        }
    }

    pub fn count(&self) -> u32 {
        match self {
            BindingResource::SampledTextures(images) => images.len() as u32,
            _ => 1,
        }
    }

    fn resource_ids(&self) -> Vec<ResourceId> {
        match self {
            BindingResource::AccelerationStructure(accel) => accel.resource_ids(),
            BindingResource::StorageImage(image) => vec![image.id()],
            BindingResource::StorageBuffer(buffer) | BindingResource::UniformBuffer(buffer) => {
                vec![buffer.id()]
            }
            BindingResource::SampledTextures(images) => images.iter().map(|i| i.id()).collect(),
        }
    }
}

pub struct BindingSet {
    guard: ResourceGuard,
    label: String,
    layout: Arc<BindingLayout>,
    entries: Vec<(u32, BindingResource)>,
}

impl BindingSet {
    pub fn id(&self) -> ResourceId {
        self.guard.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }

    fn entry(&self, binding: u32) -> Result<&BindingResource> {
        self.entries
            .iter()
            .find(|(b, _)| *b == binding)
            .map(|(_, r)| r)
            .ok_or_else(|| DeviceError::BindingMismatch {
                binding,
                reason: format!("no resource bound in set '{}'", self.label),
            })
    }

    fn wrong_kind(&self, binding: u32, expected: BindingKind) -> DeviceError {
        DeviceError::BindingMismatch {
            binding,
            reason: format!("set '{}' does not hold a {:?} here", self.label, expected),
        }
    }

    pub fn acceleration_structure(&self, binding: u32) -> Result<&Arc<dyn AccelerationStructure>> {
        match self.entry(binding)? {
            BindingResource::AccelerationStructure(accel) => Ok(accel),
            _ => Err(self.wrong_kind(binding, BindingKind::AccelerationStructure)),
        }
    }

    pub fn storage_image(&self, binding: u32) -> Result<&Arc<Image>> {
        match self.entry(binding)? {
            BindingResource::StorageImage(image) => Ok(image),
            _ => Err(self.wrong_kind(binding, BindingKind::StorageImage)),
        }
    }

    /// Storage or uniform buffer at `binding`.
    pub fn buffer(&self, binding: u32) -> Result<&Arc<Buffer>> {
        match self.entry(binding)? {
            BindingResource::StorageBuffer(buffer) | BindingResource::UniformBuffer(buffer) => {
                Ok(buffer)
            }
            _ => Err(self.wrong_kind(binding, BindingKind::StorageBuffer)),
        }
    }

    pub fn textures(&self, binding: u32) -> Result<&[Arc<Image>]> {
        match self.entry(binding)? {
            BindingResource::SampledTextures(images) => Ok(images),
            _ => Err(self.wrong_kind(binding, BindingKind::SampledTexture)),
        }
    }

    /// The set itself plus everything it references.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        let mut ids = vec![self.id()];
        for (_, resource) in &self.entries {
            ids.extend(resource.resource_ids());
        }
        ids
    }
}

impl fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindingSet")
            .field("id", &self.id())
            .field("label", &self.label)
            .field("layout", &self.layout.id())
            .finish()
    }
}

impl Device {
    pub fn create_binding_layout(
        &self,
        label: &str,
        slots: Vec<BindingSlot>,
    ) -> Result<Arc<BindingLayout>> {
        self.check()?;
        for slot in &slots {
            self.check_limit(
                "bindings per slot",
                slot.count as u64,
                self.limits().max_bindings_per_set as u64,
            )?;
            if slots.iter().filter(|s| s.binding == slot.binding).count() > 1 {
                return Err(DeviceError::BindingMismatch {
                    binding: slot.binding,
                    reason: format!("duplicate slot in layout '{}'", label),
                });
            }
        }
        let guard = self.register(ResourceKind::BindingLayout, label)?;

        Ok(Arc::new(BindingLayout {
            guard,
            label: label.to_string(),
            slots,
        }))
    }

    /// Create a set; every slot of `layout` must be filled with a resource of matching kind and count.
    pub fn create_binding_set(
        &self,
        label: &str,
        layout: &Arc<BindingLayout>,
        entries: Vec<(u32, BindingResource)>,
    ) -> Result<Arc<BindingSet>> {
        self.check()?;

        for slot in layout.slots() {
            let Some((_, resource)) = entries.iter().find(|(b, _)| *b == slot.binding) else {
                return Err(DeviceError::BindingMismatch {
                    binding: slot.binding,
                    reason: format!("slot left empty in set '{}'", label),
                });
            };
            if resource.kind() != slot.kind {
                return Err(DeviceError::BindingMismatch {
                    binding: slot.binding,
                    reason: format!("expected {:?}, got {:?}", slot.kind, resource.kind()),
                });
            }
            if resource.count() != slot.count {
                return Err(DeviceError::BindingMismatch {
                    binding: slot.binding,
                    reason: format!(
                        "layout declares {} descriptors, set supplies {}",
                        slot.count,
                        resource.count()
                    ),
                });
            }
        }
        if let Some((binding, _)) = entries.iter().find(|(b, _)| layout.slot(*b).is_none()) {
            return Err(DeviceError::BindingMismatch {
                binding: *binding,
                reason: format!("layout '{}' has no such slot", layout.label()),
            });
        }

        let guard = self.register(ResourceKind::BindingSet, label)?;
        Ok(Arc::new(BindingSet {
            guard,
            label: label.to_string(),
            layout: Arc::clone(layout),
            entries,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferUsage, DeviceDescriptor, Extent2d};

    fn device() -> Device {
        Device::new(DeviceDescriptor::default())
    }

    #[test]
    fn test_binding_set_matches_layout() {
        let device = device();
        let layout = device
            .create_binding_layout(
                "scene-data",
                vec![
                    BindingSlot::new(0, BindingKind::StorageBuffer),
                    BindingSlot::array(1, BindingKind::SampledTexture, 2),
                ],
            )
            .unwrap();

        let buffer = device
            .create_buffer_init("materials", BufferUsage::Storage, &[0u32; 4])
            .unwrap();
        let a = device.create_image("a", Extent2d::new(1, 1)).unwrap();
        let b = device.create_image("b", Extent2d::new(1, 1)).unwrap();

        let set = device
            .create_binding_set(
                "scene-data",
                &layout,
                vec![
                    (0, BindingResource::StorageBuffer(buffer.clone())),
                    (1, BindingResource::SampledTextures(vec![a, b])),
                ],
            )
            .unwrap();

        assert_eq!(set.layout().id(), layout.id());
        assert_eq!(set.buffer(0).unwrap().id(), buffer.id());
        assert_eq!(set.textures(1).unwrap().len(), 2);
        assert!(set.storage_image(0).is_err());
        // set + buffer + two images
        assert_eq!(set.resource_ids().len(), 4);
    }

    #[test]
    fn test_binding_set_count_mismatch() {
        let device = device();
        let layout = device
            .create_binding_layout(
                "textures",
                vec![BindingSlot::array(0, BindingKind::SampledTexture, 3)],
            )
            .unwrap();
        let a = device.create_image("a", Extent2d::new(1, 1)).unwrap();

        let result = device.create_binding_set(
            "textures",
            &layout,
            vec![(0, BindingResource::SampledTextures(vec![a]))],
        );
        assert!(matches!(result, Err(DeviceError::BindingMismatch { binding: 0, .. })));
    }

    #[test]
    fn test_binding_set_missing_and_extra_slots() {
        let device = device();
        let layout = device
            .create_binding_layout("out", vec![BindingSlot::new(0, BindingKind::StorageImage)])
            .unwrap();
        let image = device.create_image("img", Extent2d::new(1, 1)).unwrap();

        assert!(device.create_binding_set("out", &layout, vec![]).is_err());
        assert!(device
            .create_binding_set(
                "out",
                &layout,
                vec![
                    (0, BindingResource::StorageImage(image.clone())),
                    (7, BindingResource::StorageImage(image)),
                ],
            )
            .is_err());
    }

    #[test]
    fn test_layout_rejects_oversized_array() {
        let device = device();
        let too_many = device.limits().max_bindings_per_set + 1;
        let result = device.create_binding_layout(
            "textures",
            vec![BindingSlot::array(0, BindingKind::SampledTexture, too_many)],
        );
        assert!(matches!(result, Err(DeviceError::LimitExceeded { .. })));
    }
}
