//! Environment maps and their importance-sampling table.
//!
//! An equirectangular HDR image is turned into an alias table over its texels,
//! weighted by luminance times the solid angle each texel covers, so a single
//! uniform number picks a texel with probability proportional to the light it
//! contributes.

use bytemuck::{Pod, Zeroable};
use prism_math::{Vec2, Vec3};
use std::f32::consts::PI;

use crate::texture::Texture;

/// One alias-table entry, laid out for upload into a storage buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct EnvAccel {
    /// Probability of keeping this texel instead of jumping to `alias`.
    pub q: f32,
    pub alias: u32,
    /// Solid-angle pdf of this texel's direction.
    pub pdf: f32,
    /// Solid-angle pdf of the alias texel.
    pub alias_pdf: f32,
}

/// A sampled environment direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvSample {
    pub direction: Vec3,
    pub uv: Vec2,
    /// Solid-angle pdf of `direction`.
    pub pdf: f32,
}

#[derive(Debug, Clone)]
pub struct EnvironmentMap {
    pub texture: Texture,
    pub accel: Vec<EnvAccel>,
    /// Sum of importance over the sphere (max channel × solid angle).
    pub integral: f32,
    /// Average luminance over the sphere.
    pub average: f32,
}

impl EnvironmentMap {
    pub fn new(texture: Texture) -> Self {
        let (accel, integral, average) = build_importance(&texture);
        log::debug!(
            "Environment {} ({}x{}): integral {:.4}, average {:.4}",
            texture.path,
            texture.width,
            texture.height,
            integral,
            average
        );

        Self {
            texture,
            accel,
            integral,
            average,
        }
    }

    /// A constant-colored sky.
    pub fn uniform(color: Vec3) -> Self {
        Self::new(Texture::solid_color(color))
    }

    pub fn radiance(&self, direction: Vec3) -> Vec3 {
        self.texture.sample(direction_to_uv(direction)).truncate()
    }

    /// Importance-sample a direction from three uniform numbers in `[0, 1)`.
    pub fn sample(&self, random: [f32; 3]) -> Option<EnvSample> {
        sample_alias_table(&self.accel, self.texture.width, self.texture.height, random)
    }
}

/// Equirectangular lookup: +Y up, u wraps around the vertical axis, v = 0 at the zenith.
pub fn direction_to_uv(direction: Vec3) -> Vec2 {
    let d = direction.normalize_or_zero();
    let u = 0.5 + d.x.atan2(-d.z) / (2.0 * PI);
    let v = d.y.clamp(-1.0, 1.0).acos() / PI;
    Vec2::new(u, v)
}

pub fn uv_to_direction(uv: Vec2) -> Vec3 {
    let phi = (uv.x - 0.5) * 2.0 * PI;
    let theta = uv.y * PI;
    let (sin_theta, cos_theta) = theta.sin_cos();
    Vec3::new(sin_theta * phi.sin(), cos_theta, -sin_theta * phi.cos())
}

/// Pick a texel from an alias table and return a jittered direction inside it.
///
/// Works directly on the uploaded table, so renderers can sample from the
/// bound storage buffer without the CPU-side map.
pub fn sample_alias_table(
    table: &[EnvAccel],
    width: u32,
    height: u32,
    random: [f32; 3],
) -> Option<EnvSample> {
    let size = table.len();
    if size == 0 || size != width as usize * height as usize {
        return None;
    }

    let scaled = random[0] * size as f32;
    let index = (scaled as usize).min(size - 1);
    let fraction = scaled - index as f32;
    let entry = table[index];

    let (texel, pdf) = if fraction < entry.q {
        (index, entry.pdf)
    } else {
        (entry.alias as usize, entry.alias_pdf)
    };
    if pdf <= 0.0 {
        return None;
    }

    let px = (texel % width as usize) as f32;
    let py = (texel / width as usize) as f32;
    let uv = Vec2::new(
        (px + random[1]) / width as f32,
        (py + random[2]) / height as f32,
    );

    Some(EnvSample {
        direction: uv_to_direction(uv),
        uv,
        pdf,
    })
}

/// Returns (alias table, integral, average luminance).
fn build_importance(texture: &Texture) -> (Vec<EnvAccel>, f32, f32) {
    let width = texture.width as usize;
    let height = texture.height as usize;
    let size = width * height;
    if size == 0 || texture.pixels.len() != size {
        return (Vec::new(), 0.0, 0.0);
    }

    let step_phi = 2.0 * PI / width as f32;
    let step_theta = PI / height as f32;

    let mut importance = vec![0.0f32; size];
    let mut integral = 0.0f32;
    let mut luminance = 0.0f32;

    let mut cos_theta0 = 1.0f32;
    for y in 0..height {
        let cos_theta1 = ((y + 1) as f32 * step_theta).cos();
        let area = (cos_theta0 - cos_theta1) * step_phi;
        cos_theta0 = cos_theta1;

        for x in 0..width {
            let i = y * width + x;
            let [r, g, b, _] = texture.pixels[i];
            let weight = r.max(g).max(b).max(0.0) * area;
            importance[i] = weight;
            integral += weight;
            luminance += (0.2126 * r + 0.7152 * g + 0.0722 * b) * area;
        }
    }

    let average = luminance / (4.0 * PI);
    let mut accel = build_alias_map(&importance);

    // Solid-angle pdf: (weight / integral) / area == max channel / integral
    let inv_integral = if integral > 0.0 { 1.0 / integral } else { 0.0 };
    for (entry, pixel) in accel.iter_mut().zip(&texture.pixels) {
        entry.pdf = pixel[0].max(pixel[1]).max(pixel[2]).max(0.0) * inv_integral;
    }
    for i in 0..size {
        let alias = accel[i].alias as usize;
        accel[i].alias_pdf = accel[alias].pdf;
    }

    (accel, integral, average)
}

/// Vose's alias method. A zero-sum input degrades to uniform selection.
fn build_alias_map(weights: &[f32]) -> Vec<EnvAccel> {
    let size = weights.len();
    let sum: f32 = weights.iter().sum();

    let mut accel: Vec<EnvAccel> = (0..size)
        .map(|i| EnvAccel {
            q: if sum > 0.0 {
                size as f32 * weights[i] / sum
            } else {
                1.0
            },
            alias: i as u32,
            pdf: 0.0,
            alias_pdf: 0.0,
        })
        .collect();

    let mut small = Vec::new();
    let mut large = Vec::new();
    for (i, entry) in accel.iter().enumerate() {
        if entry.q < 1.0 {
            small.push(i);
        } else {
            large.push(i);
        }
    }

    while let (Some(&s), Some(&l)) = (small.last(), large.last()) {
        small.pop();
        accel[s].alias = l as u32;
        accel[l].q -= 1.0 - accel[s].q;
        if accel[l].q < 1.0 {
            large.pop();
            small.push(l);
        }
    }

    // Numerical leftovers keep themselves
    for i in small.into_iter().chain(large) {
        accel[i].q = 1.0;
    }

    accel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uv_direction_roundtrip() {
        for dir in [Vec3::X, Vec3::NEG_Z, Vec3::new(0.3, 0.5, -0.8).normalize()] {
            let back = uv_to_direction(direction_to_uv(dir));
            assert!((back - dir).length() < 1e-4, "{dir:?} -> {back:?}");
        }
        assert!(direction_to_uv(Vec3::Y).y < 1e-4);
    }

    #[test]
    fn test_uniform_environment() {
        let env = EnvironmentMap::uniform(Vec3::splat(0.5));

        assert!((env.integral - 0.5 * 4.0 * PI).abs() < 1e-3);
        assert!((env.average - 0.5).abs() < 1e-3);
        assert!((env.radiance(Vec3::X) - Vec3::splat(0.5)).length() < 1e-5);

        let sample = env.sample([0.3, 0.5, 0.5]).unwrap();
        // Uniform sphere pdf
        assert!((sample.pdf - 1.0 / (4.0 * PI)).abs() < 1e-4);
        assert!((sample.direction.length() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_alias_map_preserves_distribution() {
        let weights = [1.0, 3.0, 0.0, 4.0];
        let accel = build_alias_map(&weights);
        let sum: f32 = weights.iter().sum();

        // Probability of landing on i = (q_i + Σ_j (1 - q_j)[alias_j == i]) / n
        for (i, &w) in weights.iter().enumerate() {
            let mut p = accel[i].q;
            for entry in &accel {
                if entry.alias as usize == i {
                    p += 1.0 - entry.q;
                }
            }
            // Entries aliasing themselves were counted twice above
            if accel[i].alias as usize == i {
                p -= 1.0 - accel[i].q;
            }
            assert!((p / weights.len() as f32 - w / sum).abs() < 1e-5, "entry {i}");
        }
    }

    #[test]
    fn test_bright_texel_dominates() {
        // 4x2 map, one bright texel in the upper row
        let mut pixels = vec![[0.01, 0.01, 0.01, 1.0]; 8];
        pixels[1] = [100.0, 100.0, 100.0, 1.0];
        let env = EnvironmentMap::new(Texture::new(4, 2, pixels, "sun"));

        let mut hits = 0;
        for i in 0..100 {
            let sample = env.sample([i as f32 / 100.0, 0.5, 0.5]).unwrap();
            if sample.uv.x > 0.25 && sample.uv.x < 0.5 && sample.uv.y < 0.5 {
                hits += 1;
            }
        }
        assert!(hits > 90);
    }

    #[test]
    fn test_black_environment_never_samples() {
        let env = EnvironmentMap::uniform(Vec3::ZERO);
        assert_eq!(env.integral, 0.0);
        assert!(env.sample([0.5, 0.5, 0.5]).is_none());
    }
}
