//! Progressive rendering with background asset swaps.
//!
//! [`RenderSession`] is the render thread's context. It owns the active
//! [`SceneIndex`](prism_accel::SceneIndex), the accumulation bookkeeping in
//! [`ConvergenceController`], the interchangeable back-ends in
//! [`RendererRegistry`], and the [`AssetSwapCoordinator`] that builds new
//! scenes off-thread and hands them over at a safe point.

pub mod config;
pub mod convergence;
pub mod coordinator;
pub mod environment;
pub mod output;
pub mod registry;
pub mod renderer;
pub mod scene_data;
pub mod session;
pub mod state;

pub use config::{ConfigError, SessionConfig};
pub use convergence::{AccumulationState, ConvergenceController, RenderRegion, NOT_STARTED};
pub use coordinator::{
    AssetSwapCoordinator, BusyGate, CancellationToken, LoadState, LoadTaskHandle, PreparedAsset,
    SwapError,
};
pub use registry::RendererRegistry;
pub use renderer::{RenderError, Renderer, RendererKind};
pub use session::{FrameOutcome, LoadEvent, RenderSession, SessionError};
pub use state::{PbrMode, RenderSettings, RtxState, SunAndSky};
