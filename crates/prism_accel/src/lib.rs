//! Ray-query acceleration for prism.
//!
//! Two levels, both over the same flat [`bvh::Bvh`]:
//!
//! - [`GeometryIndexBuilder`] turns one primitive's vertex and index buffers into
//!   a bottom-level [`GeometryHandle`]. Builds are independent and run in parallel.
//! - [`SceneIndex`] places handles with [`InstanceRecord`]s into a top-level
//!   index and exposes it to renderers through a one-slot binding set.

pub mod bvh;
mod error;
mod geometry;
mod scene_index;
pub mod triangle;

pub use error::{BuildError, SceneIndexError};
pub use geometry::{GeometryHandle, GeometryIndexBuilder, LocalHit, Primitive, Vertex};
pub use scene_index::{GeometryId, InstanceRecord, SceneIndex, SCENE_INDEX_BINDING};
