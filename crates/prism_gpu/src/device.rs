//! Software device: resource registry, submission tracking and the idle barrier.
//!
//! Work recorded through a [`crate::CommandEncoder`] executes as it is
//! recorded; what a submission models is *lifetime*. Every submitted command
//! list keeps the resources it referenced "in flight" until it retires, either
//! because more than `frames_in_flight` newer submissions exist or because
//! [`Device::wait_idle`] was called. Releasing a resource that an in-flight
//! submission still references is a use-after-free and is recorded as a
//! validation error.

use crate::{CommandList, DeviceError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Opaque identity of a device resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Buffer,
    Image,
    AccelerationStructure,
    BindingLayout,
    BindingSet,
    PipelineLayout,
    Pipeline,
}

/// Hard limits of the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceLimits {
    /// Largest single buffer, in bytes.
    pub max_buffer_size: u64,
    /// Most triangles a single bottom-level structure may hold.
    pub max_primitive_count: u32,
    /// Most instances a top-level structure may hold.
    pub max_instance_count: u32,
    /// Largest descriptor count of a single binding slot.
    pub max_bindings_per_set: u32,
}

impl Default for DeviceLimits {
    fn default() -> Self {
        Self {
            max_buffer_size: 1 << 30,
            max_primitive_count: 1 << 24,
            max_instance_count: 1 << 20,
            max_bindings_per_set: 4096,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DeviceDescriptor {
    pub label: String,
    pub limits: DeviceLimits,
    pub frames_in_flight: usize,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            label: "prism".to_string(),
            limits: DeviceLimits::default(),
            frames_in_flight: 2,
        }
    }
}

#[derive(Debug)]
struct LiveResource {
    kind: ResourceKind,
    label: String,
}

#[derive(Debug)]
struct Submission {
    index: u64,
    label: String,
    resources: Vec<ResourceId>,
}

#[derive(Debug, Default)]
struct DeviceState {
    live: HashMap<ResourceId, LiveResource>,
    in_flight: VecDeque<Submission>,
    validation_errors: Vec<String>,
    submitted: u64,
    idle_waits: u64,
}

pub(crate) struct DeviceShared {
    label: String,
    limits: DeviceLimits,
    frames_in_flight: usize,
    next_id: AtomicU64,
    lost: AtomicBool,
    state: Mutex<DeviceState>,
}

impl DeviceShared {
    fn release(&self, id: ResourceId) {
        let mut state = self.state.lock();
        let Some(resource) = state.live.remove(&id) else {
            return;
        };

        let in_use_by = state
            .in_flight
            .iter()
            .find(|s| s.resources.contains(&id))
            .map(|s| (s.index, s.label.clone()));

        if let Some((index, submission)) = in_use_by {
            let message = format!(
                "{:?} '{}' ({}) released while in use by submission {} '{}'",
                resource.kind, resource.label, id, index, submission
            );
            log::error!("[{}] validation: {}", self.label, message);
            state.validation_errors.push(message);
        }
    }
}

/// Registration of one resource with the device. Dropping it releases the resource.
pub struct ResourceGuard {
    id: ResourceId,
    kind: ResourceKind,
    device: Weak<DeviceShared>,
}

impl ResourceGuard {
    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }
}

impl fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceGuard")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        if let Some(shared) = self.device.upgrade() {
            shared.release(self.id);
        }
    }
}

/// Handle to the device. Cheap to clone; shared by the render thread and the load worker.
#[derive(Clone)]
pub struct Device {
    shared: Arc<DeviceShared>,
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("label", &self.shared.label)
            .field("lost", &self.is_lost())
            .finish()
    }
}

impl Device {
    pub fn new(descriptor: DeviceDescriptor) -> Self {
        log::info!(
            "Device '{}': {} frames in flight, {:?}",
            descriptor.label,
            descriptor.frames_in_flight,
            descriptor.limits
        );

        Self {
            shared: Arc::new(DeviceShared {
                label: descriptor.label,
                limits: descriptor.limits,
                frames_in_flight: descriptor.frames_in_flight.max(1),
                next_id: AtomicU64::new(1),
                lost: AtomicBool::new(false),
                state: Mutex::new(DeviceState::default()),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.shared.limits
    }

    pub fn frames_in_flight(&self) -> usize {
        self.shared.frames_in_flight
    }

    pub fn is_lost(&self) -> bool {
        self.shared.lost.load(Ordering::Acquire)
    }

    /// Simulate losing the device. Every later fallible call fails with [`DeviceError::Lost`].
    pub fn mark_lost(&self) {
        if !self.shared.lost.swap(true, Ordering::AcqRel) {
            log::error!("Device '{}' lost", self.shared.label);
        }
    }

    /// Fails with [`DeviceError::Lost`] once the device has been lost.
    pub fn check(&self) -> Result<()> {
        if self.is_lost() {
            Err(DeviceError::Lost)
        } else {
            Ok(())
        }
    }

    /// Fails with [`DeviceError::LimitExceeded`] when `requested > limit`.
    pub fn check_limit(&self, what: &'static str, requested: u64, limit: u64) -> Result<()> {
        if requested > limit {
            Err(DeviceError::LimitExceeded {
                what,
                requested,
                limit,
            })
        } else {
            Ok(())
        }
    }

    pub(crate) fn register(&self, kind: ResourceKind, label: &str) -> Result<ResourceGuard> {
        self.check()?;
        let id = ResourceId(self.shared.next_id.fetch_add(1, Ordering::Relaxed));
        self.shared.state.lock().live.insert(
            id,
            LiveResource {
                kind,
                label: label.to_string(),
            },
        );
        log::trace!("register {:?} '{}' {}", kind, label, id);

        Ok(ResourceGuard {
            id,
            kind,
            device: Arc::downgrade(&self.shared),
        })
    }

    /// Register an externally implemented resource (e.g. an acceleration structure).
    pub fn register_resource(&self, kind: ResourceKind, label: &str) -> Result<ResourceGuard> {
        self.register(kind, label)
    }

    pub fn is_live(&self, id: ResourceId) -> bool {
        self.shared.state.lock().live.contains_key(&id)
    }

    pub fn live_resource_count(&self) -> usize {
        self.shared.state.lock().live.len()
    }

    /// Submit recorded work. Returns the submission index.
    pub fn submit(&self, list: CommandList) -> Result<u64> {
        self.check()?;
        let mut state = self.shared.state.lock();

        if let Some(dead) = list
            .resources
            .iter()
            .find(|id| !state.live.contains_key(id))
        {
            let message = format!("submission '{}' references dead resource {}", list.label, dead);
            log::error!("[{}] validation: {}", self.shared.label, message);
            state.validation_errors.push(message);
            return Err(DeviceError::InvalidResource(*dead));
        }

        state.submitted += 1;
        let index = state.submitted;
        state.in_flight.push_back(Submission {
            index,
            label: list.label,
            resources: list.resources,
        });

        // The oldest frames complete once the queue is deeper than the frame budget
        while state.in_flight.len() > self.shared.frames_in_flight {
            state.in_flight.pop_front();
        }

        Ok(index)
    }

    /// Block until no submission is in flight.
    pub fn wait_idle(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        state.in_flight.clear();
        state.idle_waits += 1;
        drop(state);
        self.check()
    }

    pub fn in_flight_count(&self) -> usize {
        self.shared.state.lock().in_flight.len()
    }

    /// True if an in-flight submission references `id`.
    pub fn is_in_flight(&self, id: ResourceId) -> bool {
        self.shared
            .state
            .lock()
            .in_flight
            .iter()
            .any(|s| s.resources.contains(&id))
    }

    pub fn submission_count(&self) -> u64 {
        self.shared.state.lock().submitted
    }

    pub fn idle_wait_count(&self) -> u64 {
        self.shared.state.lock().idle_waits
    }

    /// Validation errors recorded so far (use-after-free, dead references).
    pub fn validation_errors(&self) -> Vec<String> {
        self.shared.state.lock().validation_errors.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BufferUsage, CommandEncoder};

    fn device() -> Device {
        Device::new(DeviceDescriptor::default())
    }

    #[test]
    fn test_register_and_release() {
        let device = device();
        let buffer = device
            .create_buffer_init("b", BufferUsage::Storage, &[1u32, 2, 3])
            .unwrap();
        let id = buffer.id();

        assert!(device.is_live(id));
        assert_eq!(device.live_resource_count(), 1);

        drop(buffer);
        assert!(!device.is_live(id));
        assert!(device.validation_errors().is_empty());
    }

    #[test]
    fn test_release_in_flight_is_validation_error() {
        let device = device();
        let buffer = device
            .create_buffer_init("b", BufferUsage::Uniform, &[0u32; 4])
            .unwrap();

        let mut encoder = CommandEncoder::new(&device, "frame");
        encoder.update_buffer(&buffer, &[1u32; 4]).unwrap();
        device.submit(encoder.finish()).unwrap();

        drop(buffer);
        let errors = device.validation_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("released while in use"));
    }

    #[test]
    fn test_wait_idle_allows_release() {
        let device = device();
        let buffer = device
            .create_buffer_init("b", BufferUsage::Uniform, &[0u32; 4])
            .unwrap();

        let mut encoder = CommandEncoder::new(&device, "frame");
        encoder.update_buffer(&buffer, &[1u32; 4]).unwrap();
        device.submit(encoder.finish()).unwrap();
        assert_eq!(device.in_flight_count(), 1);

        device.wait_idle().unwrap();
        assert_eq!(device.in_flight_count(), 0);
        assert_eq!(device.idle_wait_count(), 1);

        drop(buffer);
        assert!(device.validation_errors().is_empty());
    }

    #[test]
    fn test_frames_in_flight_retire() {
        let device = Device::new(DeviceDescriptor {
            frames_in_flight: 2,
            ..Default::default()
        });
        let buffer = device
            .create_buffer_init("b", BufferUsage::Uniform, &[0u32])
            .unwrap();

        for _ in 0..5 {
            let mut encoder = CommandEncoder::new(&device, "frame");
            encoder.update_buffer(&buffer, &[1u32]).unwrap();
            device.submit(encoder.finish()).unwrap();
        }

        assert_eq!(device.in_flight_count(), 2);
        assert_eq!(device.submission_count(), 5);
    }

    #[test]
    fn test_device_lost() {
        let device = device();
        device.mark_lost();

        assert!(device.is_lost());
        assert_eq!(device.check(), Err(DeviceError::Lost));
        assert!(matches!(
            device.create_buffer_init("b", BufferUsage::Storage, &[0u32]),
            Err(DeviceError::Lost)
        ));
        assert_eq!(device.wait_idle(), Err(DeviceError::Lost));
    }

    #[test]
    fn test_check_limit() {
        let device = device();
        assert!(device.check_limit("triangles", 10, 10).is_ok());
        assert!(matches!(
            device.check_limit("triangles", 11, 10),
            Err(DeviceError::LimitExceeded { requested: 11, limit: 10, .. })
        ));
    }
}
