use crate::ResourceId;
use thiserror::Error;

/// Errors reported by the device boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device lost")]
    Lost,

    #[error("{what} exceeds device limit ({requested} > {limit})")]
    LimitExceeded {
        what: &'static str,
        requested: u64,
        limit: u64,
    },

    #[error("resource {0} is not alive")]
    InvalidResource(ResourceId),

    #[error("buffer of {size} bytes is not a multiple of element stride {stride}")]
    Misaligned { size: u64, stride: u64 },

    #[error("binding {binding}: {reason}")]
    BindingMismatch { binding: u32, reason: String },

    #[error("set {set} does not match the bound pipeline layout")]
    IncompatibleLayout { set: usize },

    #[error("push constant size mismatch: expected {expected} bytes, got {got}")]
    PushConstantSize { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, DeviceError>;
