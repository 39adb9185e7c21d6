//! Prism Core - CPU-side scene data and asset loading.
//!
//! This crate provides:
//!
//! - **Scene description**: `SceneDescription`, `MeshPrimitive`, `SceneInstance`, `Material`
//! - **Images**: `Texture` (linear RGBA) and `EnvironmentMap` with importance-sampling data
//! - **Loading**: the `AssetLoader` collaborator and the file-backed `FileLoader`
//!
//! # Example
//!
//! ```ignore
//! use prism_core::{AssetLoader, FileLoader, LoadedAsset};
//!
//! let loader = FileLoader::new();
//! let kind = loader.classify("scene.obj".as_ref())?;
//! if let LoadedAsset::Scene(scene) = loader.load("scene.obj".as_ref(), kind)? {
//!     println!("{} primitives, {} instances", scene.primitive_count(), scene.instance_count());
//! }
//! ```

pub mod environment;
pub mod loader;
pub mod mesh;
pub mod scene;
pub mod texture;

pub use environment::{EnvAccel, EnvSample, EnvironmentMap};
pub use loader::{AssetKind, AssetLoader, FileLoader, LoadError, LoadResult, LoadedAsset};
pub use mesh::Mesh;
pub use scene::{Material, MeshPrimitive, SceneCamera, SceneDescription, SceneInstance};
pub use texture::{Texture, TextureCache, TextureError};
