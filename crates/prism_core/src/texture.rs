//! Texture loading for materials and environments.
//!
//! Images are decoded with the `image` crate and stored as linear RGBA floats,
//! the same layout the device images use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use prism_math::{Vec2, Vec3, Vec4};
use thiserror::Error;

/// Errors that can occur during texture loading.
#[derive(Error, Debug)]
pub enum TextureError {
    #[error("Failed to load texture {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Texture {0} has no pixels")]
    Empty(String),
}

pub type TextureResult<T> = Result<T, TextureError>;

/// A loaded texture with pixel data.
#[derive(Clone, Debug)]
pub struct Texture {
    pub width: u32,
    pub height: u32,

    /// Pixel data in linear RGBA, row-major, top row first
    pub pixels: Vec<[f32; 4]>,

    /// Original file path (for debugging)
    pub path: String,
}

impl Texture {
    pub fn new(width: u32, height: u32, pixels: Vec<[f32; 4]>, path: impl Into<String>) -> Self {
        Self {
            width,
            height,
            pixels,
            path: path.into(),
        }
    }

    /// Create a solid color texture (1x1).
    pub fn solid_color(color: Vec3) -> Self {
        Self::new(1, 1, vec![[color.x, color.y, color.z, 1.0]], "<solid>")
    }

    /// Magenta placeholder bound when a scene has no textures.
    pub fn fallback() -> Self {
        Self::new(1, 1, vec![[1.0, 0.0, 1.0, 1.0]], "<fallback>")
    }

    /// Bilinear sample at UV (wrapping, v = 0 is the top row).
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        if self.width == 0 || self.height == 0 {
            return Vec4::ZERO;
        }

        let u = uv.x.rem_euclid(1.0);
        let v = uv.y.rem_euclid(1.0);
        let x = u * (self.width as f32 - 1.0);
        let y = v * (self.height as f32 - 1.0);

        let x0 = x.floor() as u32;
        let y0 = y.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = x.fract();
        let fy = y.fract();

        let top = self.get_pixel(x0, y0).lerp(self.get_pixel(x1, y0), fx);
        let bottom = self.get_pixel(x0, y1).lerp(self.get_pixel(x1, y1), fx);
        top.lerp(bottom, fy)
    }

    fn get_pixel(&self, x: u32, y: u32) -> Vec4 {
        let idx = (y * self.width + x) as usize;
        self.pixels
            .get(idx)
            .map(|p| Vec4::from_array(*p))
            .unwrap_or(Vec4::W)
    }

    /// Get total size in bytes (approximate).
    pub fn size_bytes(&self) -> usize {
        self.pixels.len() * std::mem::size_of::<[f32; 4]>()
    }
}

/// Deduplicating texture loader for one scene.
///
/// Returns stable indices into the texture list, which is what materials refer to.
pub struct TextureCache {
    textures: Vec<Texture>,
    by_path: HashMap<PathBuf, usize>,

    /// Base directory for resolving relative paths
    base_dir: Option<PathBuf>,
}

impl TextureCache {
    pub fn new() -> Self {
        Self {
            textures: Vec::new(),
            by_path: HashMap::new(),
            base_dir: None,
        }
    }

    /// Create a texture cache with a base directory for relative paths.
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: Some(base_dir.into()),
            ..Self::new()
        }
    }

    /// Load a color texture, reusing an earlier load of the same file.
    pub fn load(&mut self, path: &str) -> TextureResult<usize> {
        let full_path = self.resolve_path(path);
        if let Some(&index) = self.by_path.get(&full_path) {
            return Ok(index);
        }

        let texture = load_texture(&full_path)?;
        log::debug!(
            "Loaded texture: {} ({}x{}, {:.1} KB)",
            path,
            texture.width,
            texture.height,
            texture.size_bytes() as f32 / 1024.0
        );

        let index = self.textures.len();
        self.textures.push(texture);
        self.by_path.insert(full_path, index);
        Ok(index)
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    pub fn into_textures(self) -> Vec<Texture> {
        self.textures
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);

        if path.is_absolute() {
            path.to_path_buf()
        } else if let Some(base) = &self.base_dir {
            base.join(path)
        } else {
            path.to_path_buf()
        }
    }
}

impl Default for TextureCache {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(path: &Path) -> TextureResult<image::DynamicImage> {
    image::open(path).map_err(|source| TextureError::Decode {
        path: path.display().to_string(),
        source,
    })
}

/// Load an 8-bit color texture, converting sRGB to linear.
pub fn load_texture(path: &Path) -> TextureResult<Texture> {
    let rgba = decode(path)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(TextureError::Empty(path.display().to_string()));
    }

    let pixels: Vec<[f32; 4]> = rgba
        .pixels()
        .map(|p| {
            [
                srgb_to_linear(p[0]),
                srgb_to_linear(p[1]),
                srgb_to_linear(p[2]),
                p[3] as f32 / 255.0, // Alpha is linear
            ]
        })
        .collect();

    Ok(Texture::new(width, height, pixels, path.to_string_lossy()))
}

/// Load a high dynamic range image as-is (already linear).
pub fn load_hdr(path: &Path) -> TextureResult<Texture> {
    let rgba = decode(path)?.to_rgba32f();
    let (width, height) = rgba.dimensions();
    if width == 0 || height == 0 {
        return Err(TextureError::Empty(path.display().to_string()));
    }

    let pixels: Vec<[f32; 4]> = rgba.pixels().map(|p| p.0).collect();
    Ok(Texture::new(width, height, pixels, path.to_string_lossy()))
}

/// Convert sRGB byte value to linear float.
pub fn srgb_to_linear(value: u8) -> f32 {
    let v = value as f32 / 255.0;
    if v <= 0.04045 {
        v / 12.92
    } else {
        ((v + 0.055) / 1.055).powf(2.4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_color_texture() {
        let tex = Texture::solid_color(Vec3::new(1.0, 0.5, 0.0));
        assert_eq!((tex.width, tex.height), (1, 1));

        let sample = tex.sample(Vec2::new(0.5, 0.5));
        assert!((sample.x - 1.0).abs() < 0.001);
        assert!((sample.y - 0.5).abs() < 0.001);
        assert!(sample.z.abs() < 0.001);
    }

    #[test]
    fn test_bilinear_sample() {
        let tex = Texture::new(2, 1, vec![[0.0, 0.0, 0.0, 1.0], [1.0, 1.0, 1.0, 1.0]], "ramp");
        let mid = tex.sample(Vec2::new(0.5, 0.0));
        assert!((mid.x - 0.5).abs() < 0.001);
    }

    #[test]
    fn test_srgb_to_linear() {
        assert!(srgb_to_linear(0).abs() < 0.001);
        assert!((srgb_to_linear(255) - 1.0).abs() < 0.001);

        // Mid-gray is darker in linear
        let mid = srgb_to_linear(128);
        assert!(mid < 0.5 && mid > 0.1);
    }

    #[test]
    fn test_cache_dedups_and_reports_missing() {
        let dir = tempfile::tempdir().unwrap();
        let img = image::RgbaImage::from_pixel(2, 2, image::Rgba([255, 0, 0, 255]));
        img.save(dir.path().join("red.png")).unwrap();

        let mut cache = TextureCache::with_base_dir(dir.path());
        let a = cache.load("red.png").unwrap();
        let b = cache.load("red.png").unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.len(), 1);

        assert!(cache.load("missing.png").is_err());

        let textures = cache.into_textures();
        assert!((textures[0].pixels[0][0] - 1.0).abs() < 0.001);
    }
}
