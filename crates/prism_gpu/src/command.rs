//! Pipelines and command recording.

use crate::device::{ResourceGuard, ResourceKind};
use crate::{BindingLayout, BindingSet, Buffer, Device, DeviceError, Extent2d, ResourceId, Result};
use bytemuck::Pod;
use std::collections::BTreeSet;
use std::mem::size_of;
use std::sync::Arc;

/// Ordered list of set layouts plus the push-constant block size.
#[derive(Debug)]
pub struct PipelineLayout {
    guard: ResourceGuard,
    set_layouts: Vec<Arc<BindingLayout>>,
    push_constant_size: usize,
}

impl PipelineLayout {
    pub fn id(&self) -> ResourceId {
        self.guard.id()
    }

    pub fn set_layouts(&self) -> &[Arc<BindingLayout>] {
        &self.set_layouts
    }

    pub fn push_constant_size(&self) -> usize {
        self.push_constant_size
    }
}

#[derive(Debug)]
pub struct Pipeline {
    guard: ResourceGuard,
    label: String,
    layout: Arc<PipelineLayout>,
}

impl Pipeline {
    pub fn id(&self) -> ResourceId {
        self.guard.id()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn layout(&self) -> &Arc<PipelineLayout> {
        &self.layout
    }
}

impl Device {
    pub fn create_pipeline_layout(
        &self,
        label: &str,
        set_layouts: Vec<Arc<BindingLayout>>,
        push_constant_size: usize,
    ) -> Result<Arc<PipelineLayout>> {
        self.check()?;
        let guard = self.register(ResourceKind::PipelineLayout, label)?;
        Ok(Arc::new(PipelineLayout {
            guard,
            set_layouts,
            push_constant_size,
        }))
    }

    pub fn create_pipeline(&self, label: &str, layout: &Arc<PipelineLayout>) -> Result<Arc<Pipeline>> {
        self.check()?;
        let guard = self.register(ResourceKind::Pipeline, label)?;
        log::debug!("Pipeline '{}' created over {} sets", label, layout.set_layouts.len());
        Ok(Arc::new(Pipeline {
            guard,
            label: label.to_string(),
            layout: Arc::clone(layout),
        }))
    }
}

/// Recorded work, ready for [`Device::submit`].
#[derive(Debug)]
pub struct CommandList {
    pub(crate) label: String,
    pub(crate) resources: Vec<ResourceId>,
    dispatches: u32,
}

impl CommandList {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn dispatch_count(&self) -> u32 {
        self.dispatches
    }

    pub fn references(&self, id: ResourceId) -> bool {
        self.resources.contains(&id)
    }
}

/// State visible to a ray dispatch: the bound sets in pipeline order plus push constants.
pub struct Dispatch<'a> {
    pub size: Extent2d,
    sets: &'a [Arc<BindingSet>],
    push_constants: &'a [u8],
}

impl<'a> Dispatch<'a> {
    pub fn set(&self, index: usize) -> Result<&'a Arc<BindingSet>> {
        self.sets
            .get(index)
            .ok_or(DeviceError::IncompatibleLayout { set: index })
    }

    pub fn push_constants<T: Pod>(&self) -> Result<T> {
        if self.push_constants.len() != size_of::<T>() {
            return Err(DeviceError::PushConstantSize {
                expected: size_of::<T>(),
                got: self.push_constants.len(),
            });
        }
        Ok(bytemuck::pod_read_unaligned(self.push_constants))
    }
}

/// Records one command sequence.
///
/// Commands take effect as they are recorded; the resources they touch are
/// collected so the device can keep them alive until the submission retires.
pub struct CommandEncoder {
    device: Device,
    label: String,
    pipeline: Option<Arc<Pipeline>>,
    sets: Vec<Arc<BindingSet>>,
    push_constants: Vec<u8>,
    resources: BTreeSet<ResourceId>,
    dispatches: u32,
}

impl CommandEncoder {
    pub fn new(device: &Device, label: &str) -> Self {
        Self {
            device: device.clone(),
            label: label.to_string(),
            pipeline: None,
            sets: Vec::new(),
            push_constants: Vec::new(),
            resources: BTreeSet::new(),
            dispatches: 0,
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn bind_pipeline(&mut self, pipeline: &Arc<Pipeline>) {
        self.resources.insert(pipeline.id());
        self.resources.insert(pipeline.layout().id());
        self.pipeline = Some(Arc::clone(pipeline));
        self.sets.clear();
        self.push_constants.clear();
    }

    /// Bind sets in pipeline-layout order. Each set's layout must be the one the
    /// pipeline was created against; a set built for a newer layout means the
    /// pipeline is stale and must be recreated.
    pub fn bind_sets(&mut self, sets: &[&Arc<BindingSet>]) -> Result<()> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or(DeviceError::IncompatibleLayout { set: 0 })?;
        let expected = pipeline.layout().set_layouts();

        if sets.len() != expected.len() {
            return Err(DeviceError::IncompatibleLayout {
                set: sets.len().min(expected.len()),
            });
        }
        for (index, (set, layout)) in sets.iter().zip(expected).enumerate() {
            if set.layout().id() != layout.id() {
                log::error!(
                    "Set {} '{}' does not match pipeline '{}'",
                    index,
                    set.label(),
                    pipeline.label()
                );
                return Err(DeviceError::IncompatibleLayout { set: index });
            }
        }

        self.sets = sets.iter().map(|s| Arc::clone(s)).collect();
        for set in &self.sets {
            self.resources.extend(set.resource_ids());
        }
        Ok(())
    }

    pub fn push_constants<T: Pod>(&mut self, value: &T) -> Result<()> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or(DeviceError::IncompatibleLayout { set: 0 })?;
        let expected = pipeline.layout().push_constant_size();
        if size_of::<T>() != expected {
            return Err(DeviceError::PushConstantSize {
                expected,
                got: size_of::<T>(),
            });
        }
        self.push_constants = bytemuck::bytes_of(value).to_vec();
        Ok(())
    }

    /// Write `data` to the start of `buffer`.
    pub fn update_buffer<T: Pod>(&mut self, buffer: &Arc<Buffer>, data: &[T]) -> Result<()> {
        self.device.check()?;
        buffer.write_bytes(bytemuck::cast_slice(data))?;
        self.resources.insert(buffer.id());
        Ok(())
    }

    /// Validate the bound state and hand it to a ray dispatch of `size`.
    pub fn dispatch_rays(&mut self, size: Extent2d) -> Result<Dispatch<'_>> {
        self.device.check()?;
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or(DeviceError::IncompatibleLayout { set: 0 })?;
        let layout = pipeline.layout();

        if self.sets.len() != layout.set_layouts().len() {
            return Err(DeviceError::IncompatibleLayout {
                set: self.sets.len(),
            });
        }
        if self.push_constants.len() != layout.push_constant_size() {
            return Err(DeviceError::PushConstantSize {
                expected: layout.push_constant_size(),
                got: self.push_constants.len(),
            });
        }

        self.dispatches += 1;
        Ok(Dispatch {
            size,
            sets: &self.sets,
            push_constants: &self.push_constants,
        })
    }

    pub fn finish(self) -> CommandList {
        CommandList {
            label: self.label,
            resources: self.resources.into_iter().collect(),
            dispatches: self.dispatches,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BindingKind, BindingResource, BindingSlot, BufferUsage, DeviceDescriptor};

    fn setup() -> (Device, Arc<BindingLayout>, Arc<BindingSet>) {
        let device = Device::new(DeviceDescriptor::default());
        let layout = device
            .create_binding_layout("out", vec![BindingSlot::new(0, BindingKind::StorageImage)])
            .unwrap();
        let image = device.create_image("img", Extent2d::new(4, 4)).unwrap();
        let set = device
            .create_binding_set("out", &layout, vec![(0, BindingResource::StorageImage(image))])
            .unwrap();
        (device, layout, set)
    }

    #[test]
    fn test_dispatch_with_matching_layout() {
        let (device, layout, set) = setup();
        let pipeline_layout = device
            .create_pipeline_layout("pt", vec![layout], size_of::<[u32; 2]>())
            .unwrap();
        let pipeline = device.create_pipeline("pt", &pipeline_layout).unwrap();

        let mut encoder = CommandEncoder::new(&device, "frame");
        encoder.bind_pipeline(&pipeline);
        encoder.bind_sets(&[&set]).unwrap();
        encoder.push_constants(&[7u32, 9u32]).unwrap();

        let dispatch = encoder.dispatch_rays(Extent2d::new(4, 4)).unwrap();
        assert_eq!(dispatch.push_constants::<[u32; 2]>().unwrap(), [7, 9]);
        assert_eq!(dispatch.set(0).unwrap().id(), set.id());

        let list = encoder.finish();
        assert_eq!(list.dispatch_count(), 1);
        assert!(list.references(set.id()));
        assert!(list.references(pipeline.id()));
    }

    #[test]
    fn test_stale_pipeline_rejected() {
        let (device, old_layout, _) = setup();
        let pipeline_layout = device
            .create_pipeline_layout("pt", vec![old_layout], 0)
            .unwrap();
        let pipeline = device.create_pipeline("pt", &pipeline_layout).unwrap();

        // Same shape, but a different layout object
        let new_layout = device
            .create_binding_layout("out", vec![BindingSlot::new(0, BindingKind::StorageImage)])
            .unwrap();
        let image = device.create_image("img", Extent2d::new(4, 4)).unwrap();
        let new_set = device
            .create_binding_set("out", &new_layout, vec![(0, BindingResource::StorageImage(image))])
            .unwrap();

        let mut encoder = CommandEncoder::new(&device, "frame");
        encoder.bind_pipeline(&pipeline);
        assert_eq!(
            encoder.bind_sets(&[&new_set]),
            Err(DeviceError::IncompatibleLayout { set: 0 })
        );
    }

    #[test]
    fn test_push_constant_size_checked() {
        let (device, layout, set) = setup();
        let pipeline_layout = device.create_pipeline_layout("pt", vec![layout], 8).unwrap();
        let pipeline = device.create_pipeline("pt", &pipeline_layout).unwrap();

        let mut encoder = CommandEncoder::new(&device, "frame");
        encoder.bind_pipeline(&pipeline);
        encoder.bind_sets(&[&set]).unwrap();
        assert_eq!(
            encoder.push_constants(&1u32),
            Err(DeviceError::PushConstantSize { expected: 8, got: 4 })
        );
        // Dispatch refuses to run without the push block
        assert!(encoder.dispatch_rays(Extent2d::new(1, 1)).is_err());
    }

    #[test]
    fn test_update_buffer_writes_immediately() {
        let device = Device::new(DeviceDescriptor::default());
        let buffer = device
            .create_buffer_init("camera", BufferUsage::Uniform, &[0.0f32; 4])
            .unwrap();

        let mut encoder = CommandEncoder::new(&device, "frame");
        encoder.update_buffer(&buffer, &[1.0f32, 2.0]).unwrap();
        assert_eq!(buffer.read::<f32>().unwrap(), vec![1.0, 2.0, 0.0, 0.0]);

        // Larger than the buffer
        assert!(encoder.update_buffer(&buffer, &[0.0f32; 5]).is_err());
    }
}
