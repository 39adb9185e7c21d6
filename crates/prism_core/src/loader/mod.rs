//! Asset loading.
//!
//! The render session only knows the [`AssetLoader`] trait: it asks for the
//! kind of an asset up front (on the caller's thread) and then loads it on the
//! background worker. [`FileLoader`] is the file-backed implementation.

mod obj;

use std::path::Path;

use thiserror::Error;

use crate::environment::EnvironmentMap;
use crate::scene::SceneDescription;
use crate::texture::{self, TextureError};

/// Errors that can occur while loading an asset.
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OBJ error: {0}")]
    Obj(#[from] tobj::LoadError),

    #[error("Image error: {0}")]
    Image(#[from] TextureError),

    #[error("Unsupported file extension: {0}")]
    UnsupportedExtension(String),

    #[error("No geometry found in {0}")]
    NoGeometry(String),

    #[error("Invalid scene: {0}")]
    InvalidScene(String),
}

pub type LoadResult<T> = Result<T, LoadError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetKind {
    /// Geometry, materials and instances; replaces the scene index.
    Scene,
    /// An environment map; replaces only the environment bindings.
    Environment,
}

#[derive(Debug)]
pub enum LoadedAsset {
    Scene(SceneDescription),
    Environment(EnvironmentMap),
}

impl LoadedAsset {
    pub fn kind(&self) -> AssetKind {
        match self {
            LoadedAsset::Scene(_) => AssetKind::Scene,
            LoadedAsset::Environment(_) => AssetKind::Environment,
        }
    }
}

/// External loader collaborator.
pub trait AssetLoader: Send + Sync {
    /// Decide what a path holds without reading it. Called synchronously.
    fn classify(&self, path: &Path) -> LoadResult<AssetKind>;

    /// Parse and validate the asset. Called on the load worker.
    fn load(&self, path: &Path, kind: AssetKind) -> LoadResult<LoadedAsset>;
}

/// Loads Wavefront OBJ scenes and Radiance HDR / OpenEXR environments from disk.
#[derive(Debug, Default, Clone)]
pub struct FileLoader;

impl FileLoader {
    pub fn new() -> Self {
        Self
    }
}

impl AssetLoader for FileLoader {
    fn classify(&self, path: &Path) -> LoadResult<AssetKind> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "obj" => Ok(AssetKind::Scene),
            "hdr" | "exr" => Ok(AssetKind::Environment),
            _ => Err(LoadError::UnsupportedExtension(path.display().to_string())),
        }
    }

    fn load(&self, path: &Path, kind: AssetKind) -> LoadResult<LoadedAsset> {
        match kind {
            AssetKind::Scene => {
                let scene = obj::load_obj_scene(path)?;
                scene.validate()?;
                Ok(LoadedAsset::Scene(scene))
            }
            AssetKind::Environment => {
                let texture = texture::load_hdr(path)?;
                log::info!(
                    "Loaded environment {} ({}x{})",
                    path.display(),
                    texture.width,
                    texture.height
                );
                Ok(LoadedAsset::Environment(EnvironmentMap::new(texture)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_extension() {
        let loader = FileLoader::new();

        assert_eq!(loader.classify(Path::new("a/b/scene.obj")).unwrap(), AssetKind::Scene);
        assert_eq!(loader.classify(Path::new("SKY.HDR")).unwrap(), AssetKind::Environment);
        assert!(matches!(
            loader.classify(Path::new("scene.gltf")),
            Err(LoadError::UnsupportedExtension(_))
        ));
        assert!(loader.classify(Path::new("no_extension")).is_err());
    }

    #[test]
    fn test_load_missing_environment() {
        let loader = FileLoader::new();
        let result = loader.load(Path::new("/nonexistent/sky.hdr"), AssetKind::Environment);
        assert!(matches!(result, Err(LoadError::Image(_))));
    }

    #[test]
    fn test_load_hdr_environment() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sky.hdr");

        let pixels = vec![image::Rgb([2.0f32, 1.0, 0.5]); 8];
        let file = std::fs::File::create(&path).unwrap();
        image::codecs::hdr::HdrEncoder::new(file)
            .encode(&pixels, 4, 2)
            .unwrap();

        let loader = FileLoader::new();
        let kind = loader.classify(&path).unwrap();
        let LoadedAsset::Environment(env) = loader.load(&path, kind).unwrap() else {
            panic!("expected environment");
        };

        assert_eq!((env.texture.width, env.texture.height), (4, 2));
        assert_eq!(env.accel.len(), 8);
        assert!(env.integral > 0.0);
    }
}
