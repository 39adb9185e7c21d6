//! Materials, textures and the camera, as the back-ends see them.
//!
//! The texture slot holds one entry per scene texture, so the layout is
//! rebuilt with every scene. Pipelines created against the previous layout
//! are stale afterwards and must be recreated.

use std::sync::Arc;

use bytemuck::{Pod, Zeroable};
use prism_accel::SceneIndex;
use prism_core::{Material, SceneDescription, Texture};
use prism_gpu::{
    BindingKind, BindingLayout, BindingResource, BindingSet, BindingSlot, Buffer, BufferUsage,
    Device, DeviceError, Extent2d, Image,
};
use prism_math::{Camera, Mat4, Ray, Vec2, Vec3};

pub const CAMERA_BINDING: u32 = 0;
pub const MATERIALS_BINDING: u32 = 1;
pub const GEOMETRY_MATERIALS_BINDING: u32 = 2;
pub const TEXTURES_BINDING: u32 = 3;

/// Material record as uploaded to the materials buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct GpuMaterial {
    pub base_color: [f32; 4],
    pub emissive: [f32; 4],
    pub metallic: f32,
    pub roughness: f32,
    /// Index into the texture array, or -1.
    pub base_color_texture: i32,
    pub _pad: f32,
}

impl From<&Material> for GpuMaterial {
    fn from(material: &Material) -> Self {
        Self {
            base_color: material.base_color.extend(1.0).to_array(),
            emissive: material.emissive.extend(0.0).to_array(),
            metallic: material.metallic,
            roughness: material.roughness,
            base_color_texture: material
                .base_color_texture
                .map(|t| t as i32)
                .unwrap_or(-1),
            _pad: 0.0,
        }
    }
}

impl GpuMaterial {
    pub fn base_color(&self) -> Vec3 {
        Vec3::new(self.base_color[0], self.base_color[1], self.base_color[2])
    }

    pub fn emissive(&self) -> Vec3 {
        Vec3::new(self.emissive[0], self.emissive[1], self.emissive[2])
    }
}

/// Camera uniform, written every frame.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view_inverse: Mat4,
    pub proj_inverse: Mat4,
}

impl CameraUniform {
    pub fn from_camera(camera: &Camera) -> Self {
        Self {
            view_inverse: camera.view_matrix().inverse(),
            proj_inverse: camera.projection_matrix().inverse(),
        }
    }

    /// Primary ray through `ndc` (`[-1, 1]`, +Y up).
    pub fn primary_ray(&self, ndc: Vec2) -> Ray {
        let origin = self.view_inverse.transform_point3(Vec3::ZERO);
        let target = self.proj_inverse.project_point3(Vec3::new(ndc.x, ndc.y, 0.0));
        let direction = self
            .view_inverse
            .transform_vector3(target.normalize_or_zero());
        Ray::new(origin, direction)
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::from_camera(&Camera::new(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, 1.0))
    }
}

pub struct SceneData {
    layout: Arc<BindingLayout>,
    set: Arc<BindingSet>,
    camera: Arc<Buffer>,
    material_count: usize,
    texture_count: usize,
}

impl SceneData {
    /// Upload `scene`'s materials and textures, plus the material index of each
    /// geometry in `index`.
    pub fn new(
        device: &Device,
        scene: &SceneDescription,
        index: &SceneIndex,
    ) -> Result<Self, DeviceError> {
        Self::build(device, &scene.materials, &scene.textures, &index.geometry_materials())
    }

    /// Placeholder data before any scene has been loaded.
    pub fn empty(device: &Device) -> Result<Self, DeviceError> {
        Self::build(device, &[Material::default()], &[], &[])
    }

    fn build(
        device: &Device,
        materials: &[Material],
        textures: &[Texture],
        geometry_materials: &[u32],
    ) -> Result<Self, DeviceError> {
        let gpu_materials: Vec<GpuMaterial> = if materials.is_empty() {
            vec![GpuMaterial::from(&Material::default())]
        } else {
            materials.iter().map(GpuMaterial::from).collect()
        };

        // At least one texture so the slot is never empty
        let images = if textures.is_empty() {
            vec![upload_texture(device, &Texture::fallback())?]
        } else {
            textures
                .iter()
                .map(|t| upload_texture(device, t))
                .collect::<Result<Vec<_>, _>>()?
        };

        let layout = device.create_binding_layout(
            "scene data",
            vec![
                BindingSlot::new(CAMERA_BINDING, BindingKind::UniformBuffer),
                BindingSlot::new(MATERIALS_BINDING, BindingKind::StorageBuffer),
                BindingSlot::new(GEOMETRY_MATERIALS_BINDING, BindingKind::StorageBuffer),
                BindingSlot::array(TEXTURES_BINDING, BindingKind::SampledTexture, images.len() as u32),
            ],
        )?;

        let camera = device.create_buffer_init(
            "camera",
            BufferUsage::Uniform,
            &[CameraUniform::default()],
        )?;
        let materials_buffer =
            device.create_buffer_init("materials", BufferUsage::Storage, &gpu_materials)?;
        let geometry_buffer = device.create_buffer_init(
            "geometry materials",
            BufferUsage::Storage,
            geometry_materials,
        )?;

        let texture_count = images.len();
        let set = device.create_binding_set(
            "scene data",
            &layout,
            vec![
                (CAMERA_BINDING, BindingResource::UniformBuffer(camera.clone())),
                (MATERIALS_BINDING, BindingResource::StorageBuffer(materials_buffer)),
                (GEOMETRY_MATERIALS_BINDING, BindingResource::StorageBuffer(geometry_buffer)),
                (TEXTURES_BINDING, BindingResource::SampledTextures(images)),
            ],
        )?;

        log::debug!(
            "Scene data: {} materials, {} textures",
            gpu_materials.len(),
            texture_count
        );

        Ok(Self {
            layout,
            set,
            camera,
            material_count: gpu_materials.len(),
            texture_count,
        })
    }

    pub fn layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }

    pub fn bindings(&self) -> &Arc<BindingSet> {
        &self.set
    }

    pub fn camera_buffer(&self) -> &Arc<Buffer> {
        &self.camera
    }

    pub fn material_count(&self) -> usize {
        self.material_count
    }

    /// Entries in the texture slot, including the fallback.
    pub fn texture_count(&self) -> usize {
        self.texture_count
    }
}

fn upload_texture(device: &Device, texture: &Texture) -> Result<Arc<Image>, DeviceError> {
    device.create_image_init(
        &texture.path,
        Extent2d::new(texture.width, texture.height),
        texture.pixels.clone(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use prism_accel::{GeometryId, GeometryIndexBuilder, InstanceRecord, Primitive};
    use prism_core::Mesh;
    use prism_gpu::DeviceDescriptor;

    fn scene_with_textures(count: usize) -> SceneDescription {
        let mut scene = SceneDescription::new("test");
        let red = scene.add_material(Material::new("red", Vec3::new(1.0, 0.0, 0.0)));
        for _ in 0..count {
            scene.add_texture(Texture::solid_color(Vec3::ONE));
        }
        let primitive = scene.add_primitive("cube", Mesh::cuboid(Vec3::ONE), red);
        scene.add_instance(primitive, Mat4::IDENTITY);
        scene
    }

    fn index_for(device: &Device, scene: &SceneDescription) -> SceneIndex {
        let builder = GeometryIndexBuilder::new(device);
        let handles = scene
            .primitives
            .iter()
            .map(|p| builder.build(&Primitive::from_scene(device, p).unwrap()).unwrap())
            .collect();
        let instances: Vec<InstanceRecord> = scene
            .instances
            .iter()
            .enumerate()
            .map(|(i, inst)| InstanceRecord {
                geometry: GeometryId(inst.primitive),
                transform: inst.transform,
                instance_id: i as u32,
            })
            .collect();
        SceneIndex::build(device, handles, &instances).unwrap()
    }

    #[test]
    fn test_texture_count_changes_layout() {
        let device = Device::new(DeviceDescriptor::default());

        let scene = scene_with_textures(0);
        let data = SceneData::new(&device, &scene, &index_for(&device, &scene)).unwrap();
        assert_eq!(data.texture_count(), 1);
        assert_eq!(data.bindings().textures(TEXTURES_BINDING).unwrap().len(), 1);

        let scene = scene_with_textures(3);
        let bigger = SceneData::new(&device, &scene, &index_for(&device, &scene)).unwrap();
        assert_eq!(bigger.texture_count(), 3);
        assert_ne!(bigger.layout().id(), data.layout().id());
    }

    #[test]
    fn test_material_upload() {
        let device = Device::new(DeviceDescriptor::default());
        let scene = scene_with_textures(0);
        let index = index_for(&device, &scene);
        let data = SceneData::new(&device, &scene, &index).unwrap();

        let materials: Vec<GpuMaterial> = data
            .bindings()
            .buffer(MATERIALS_BINDING)
            .unwrap()
            .read()
            .unwrap();
        assert_eq!(materials.len(), 1);
        assert_eq!(materials[0].base_color(), Vec3::new(1.0, 0.0, 0.0));
        assert_eq!(materials[0].base_color_texture, -1);

        let per_geometry: Vec<u32> = data
            .bindings()
            .buffer(GEOMETRY_MATERIALS_BINDING)
            .unwrap()
            .read()
            .unwrap();
        assert_eq!(per_geometry, vec![0]);
    }

    #[test]
    fn test_camera_uniform_matches_camera() {
        let camera = Camera::new(Vec3::new(1.0, 2.0, 6.0), Vec3::new(0.0, 0.5, 0.0), 1.5);
        let uniform = CameraUniform::from_camera(&camera);

        for ndc in [Vec2::ZERO, Vec2::new(0.5, -0.25), Vec2::new(-1.0, 1.0)] {
            let expected = camera.primary_ray(ndc);
            let ray = uniform.primary_ray(ndc);
            assert!((ray.origin - expected.origin).length() < 1e-3);
            assert!((ray.direction.normalize() - expected.direction).length() < 1e-3);
        }
    }
}
