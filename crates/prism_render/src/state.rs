//! Per-frame parameter records handed to the renderer.

use bytemuck::{Pod, Zeroable};
use prism_gpu::Extent2d;
use prism_math::Vec3;
use serde::{Deserialize, Serialize};

/// Material model used by the back-ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PbrMode {
    #[default]
    Disney,
    Gltf,
}

impl PbrMode {
    fn as_raw(self) -> i32 {
        match self {
            PbrMode::Disney => 0,
            PbrMode::Gltf => 1,
        }
    }
}

/// User-adjustable render settings.
///
/// The session keeps one copy it mutates and one immutable baseline taken from
/// its config; resetting copies the baseline back. `pbr_mode`,
/// `enable_foveation` and `enable_periphery_blur` are carried through to
/// [`RtxState`] for shaders that use them; the CPU back-ends ignore them.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    /// Maximum ray bounce depth
    pub max_depth: u32,
    /// Samples per pixel traced in each frame
    pub samples_per_frame: u32,
    /// Upper bound on the luminance a single sample may contribute
    pub firefly_clamp_threshold: f32,
    /// Environment intensity multiplier
    pub hdr_multiplier: f32,
    pub pbr_mode: PbrMode,
    pub enable_foveation: bool,
    pub enable_periphery_blur: bool,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            max_depth: 10,
            samples_per_frame: 1,
            firefly_clamp_threshold: 1.0,
            hdr_multiplier: 1.0,
            pbr_mode: PbrMode::Disney,
            enable_foveation: false,
            enable_periphery_blur: false,
        }
    }
}

impl RenderSettings {
    /// Build the push-constant record for one dispatch.
    pub fn to_state(&self, frame: i32, size: Extent2d) -> RtxState {
        RtxState {
            frame,
            max_depth: self.max_depth.min(i32::MAX as u32) as i32,
            max_samples: self.samples_per_frame.min(i32::MAX as u32) as i32,
            firefly_clamp_threshold: self.firefly_clamp_threshold,
            hdr_multiplier: self.hdr_multiplier,
            pbr_mode: self.pbr_mode.as_raw(),
            size: [size.width, size.height],
            enable_foveation: self.enable_foveation as u32,
            enable_periphery_blur: self.enable_periphery_blur as u32,
        }
    }
}

/// Accumulation state record, copied by value into the renderer each frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RtxState {
    /// Accumulation frame; 0 overwrites the accumulation image.
    pub frame: i32,
    pub max_depth: i32,
    pub max_samples: i32,
    pub firefly_clamp_threshold: f32,
    pub hdr_multiplier: f32,
    pub pbr_mode: i32,
    pub size: [u32; 2],
    pub enable_foveation: u32,
    pub enable_periphery_blur: u32,
}

impl Default for RtxState {
    fn default() -> Self {
        RenderSettings::default().to_state(0, Extent2d::default())
    }
}

/// Procedural sun and sky, uploaded as a uniform every frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SunAndSky {
    pub rgb_unit_conversion: [f32; 3],
    pub multiplier: f32,
    pub haze: f32,
    pub redblueshift: f32,
    pub saturation: f32,
    pub horizon_height: f32,
    pub ground_color: [f32; 3],
    pub horizon_blur: f32,
    pub night_color: [f32; 3],
    pub sun_disk_intensity: f32,
    pub sun_direction: [f32; 3],
    pub sun_disk_scale: f32,
    pub sun_glow_intensity: f32,
    pub y_is_up: i32,
    pub physically_scaled_sun: i32,
    /// Non-zero replaces the environment map with the procedural sky.
    pub in_use: i32,
}

impl Default for SunAndSky {
    fn default() -> Self {
        Self {
            rgb_unit_conversion: [1.0, 1.0, 1.0],
            multiplier: 0.0000101320,
            haze: 0.0,
            redblueshift: 0.0,
            saturation: 1.0,
            horizon_height: 0.0,
            ground_color: [0.4, 0.4, 0.4],
            horizon_blur: 0.1,
            night_color: [0.0, 0.0, 0.01],
            sun_disk_intensity: 0.8,
            sun_direction: [0.0, 0.78, 0.62],
            sun_disk_scale: 5.0,
            sun_glow_intensity: 1.0,
            y_is_up: 1,
            physically_scaled_sun: 1,
            in_use: 0,
        }
    }
}

impl SunAndSky {
    /// Cheap analytic approximation of the sky seen along `direction`.
    ///
    /// Blends ground, horizon and zenith colors and adds a sun disk with glow.
    /// The physically scaled variant is brought into display range by
    /// `multiplier` times the sun's photometric scale.
    pub fn radiance(&self, direction: Vec3) -> Vec3 {
        let d = direction.normalize_or_zero();
        let up = if self.y_is_up != 0 { d.y } else { d.z };
        let sun = Vec3::from(self.sun_direction).normalize_or_zero();
        let scale = if self.physically_scaled_sun != 0 {
            self.multiplier * 98_696.0
        } else {
            1.0
        };

        let height = up - self.horizon_height;
        let blur = self.horizon_blur.max(1e-3);
        let sky_weight = (height / blur).clamp(-1.0, 1.0) * 0.5 + 0.5;

        let zenith = Vec3::new(0.3, 0.5, 1.0).lerp(Vec3::new(0.6, 0.6, 0.6), (self.haze / 15.0).clamp(0.0, 1.0));
        let horizon = Vec3::ONE;
        let day = horizon.lerp(zenith, height.max(0.0));
        let sky = Vec3::from(self.ground_color).lerp(day, sky_weight);

        let sun_height = if self.y_is_up != 0 { sun.y } else { sun.z };
        let daylight = sun_height.clamp(0.0, 1.0);
        let mut color = Vec3::from(self.night_color).lerp(sky, daylight);

        let cos_angle = d.dot(sun);
        let disk_cos = (0.00465 * self.sun_disk_scale).cos();
        if cos_angle > disk_cos {
            color += Vec3::splat(self.sun_disk_intensity * 100.0);
        }
        color += Vec3::splat(self.sun_glow_intensity * cos_angle.max(0.0).powf(64.0));

        // Red/blue shift, then saturation around luminance
        let shifted = color * Vec3::new(1.0 + self.redblueshift, 1.0, 1.0 - self.redblueshift);
        let luma = shifted.dot(Vec3::new(0.2126, 0.7152, 0.0722));
        let saturated = Vec3::splat(luma).lerp(shifted, self.saturation);

        saturated * Vec3::from(self.rgb_unit_conversion) * scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rtx_state_layout() {
        // Four-byte fields only, no padding
        assert_eq!(std::mem::size_of::<RtxState>(), 40);
        assert_eq!(std::mem::size_of::<SunAndSky>() % 4, 0);
    }

    #[test]
    fn test_settings_defaults() {
        let settings = RenderSettings::default();
        assert_eq!(settings.max_depth, 10);
        assert_eq!(settings.samples_per_frame, 1);
        assert_eq!(settings.firefly_clamp_threshold, 1.0);
        assert_eq!(settings.hdr_multiplier, 1.0);
        assert_eq!(settings.pbr_mode, PbrMode::Disney);
        assert!(!settings.enable_foveation && !settings.enable_periphery_blur);
    }

    #[test]
    fn test_to_state() {
        let settings = RenderSettings {
            pbr_mode: PbrMode::Gltf,
            enable_foveation: true,
            ..Default::default()
        };
        let state = settings.to_state(7, Extent2d::new(800, 600));

        assert_eq!(state.frame, 7);
        assert_eq!(state.size, [800, 600]);
        assert_eq!(state.pbr_mode, 1);
        assert_eq!(state.enable_foveation, 1);
        assert_eq!(state.enable_periphery_blur, 0);
    }

    #[test]
    fn test_settings_from_partial_json() {
        let settings: RenderSettings = serde_json::from_str(r#"{ "max_depth": 3 }"#).unwrap();
        assert_eq!(settings.max_depth, 3);
        assert_eq!(settings.samples_per_frame, 1);
    }

    #[test]
    fn test_sun_and_sky_radiance() {
        let sky = SunAndSky {
            physically_scaled_sun: 0,
            ..Default::default()
        };
        let toward_sun = sky.radiance(Vec3::from(sky.sun_direction));
        let away = sky.radiance(Vec3::new(0.0, 0.3, -1.0));

        assert!(toward_sun.x > away.x);
        assert!(away.min_element() >= 0.0);
    }
}
