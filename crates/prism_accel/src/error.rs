use prism_gpu::DeviceError;
use thiserror::Error;

/// Malformed or oversized geometry handed to the geometry index builder.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BuildError {
    #[error("primitive '{primitive}': {buffer} buffer is empty")]
    Empty {
        primitive: String,
        buffer: &'static str,
    },

    #[error("primitive '{primitive}': {buffer} buffer of {size} bytes is not a multiple of {stride}")]
    Misaligned {
        primitive: String,
        buffer: &'static str,
        size: u64,
        stride: u64,
    },

    #[error("primitive '{primitive}': {count} indices do not form a triangle list")]
    NotTriangleList { primitive: String, count: usize },

    #[error("primitive '{primitive}': index {index} out of range for {vertex_count} vertices")]
    IndexOutOfRange {
        primitive: String,
        index: u32,
        vertex_count: usize,
    },

    #[error("primitive '{primitive}': {triangles} triangles exceed the device limit of {limit}")]
    OverLimit {
        primitive: String,
        triangles: usize,
        limit: u32,
    },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl BuildError {
    pub fn is_device_lost(&self) -> bool {
        matches!(self, BuildError::Device(DeviceError::Lost))
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SceneIndexError {
    #[error("instance {instance} references geometry {geometry}, but only {count} were built")]
    UnknownGeometry {
        instance: usize,
        geometry: usize,
        count: usize,
    },

    #[error("instance {instance} has a non-invertible transform")]
    SingularTransform { instance: usize },

    #[error("{count} instances exceed the device limit of {limit}")]
    TooManyInstances { count: usize, limit: u32 },

    #[error(transparent)]
    Device(#[from] DeviceError),
}

impl SceneIndexError {
    pub fn is_device_lost(&self) -> bool {
        matches!(self, SceneIndexError::Device(DeviceError::Lost))
    }
}
