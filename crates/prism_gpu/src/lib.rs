//! Device boundary for the prism renderer.
//!
//! A software stand-in for a GPU device that enforces the rules the rest of the
//! renderer depends on: resources stay alive while submissions reference them,
//! binding sets match their layouts, pipelines match the sets bound to them,
//! and a lost device stays lost.

mod accel;
mod binding;
mod command;
mod device;
mod error;
mod resource;

pub use accel::{AccelerationStructure, RayHit};
pub use binding::{BindingKind, BindingLayout, BindingResource, BindingSet, BindingSlot};
pub use command::{CommandEncoder, CommandList, Dispatch, Pipeline, PipelineLayout};
pub use device::{Device, DeviceDescriptor, DeviceLimits, ResourceGuard, ResourceId, ResourceKind};
pub use error::{DeviceError, Result};
pub use resource::{Buffer, BufferUsage, Extent2d, Image};
