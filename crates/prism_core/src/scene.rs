//! Scene description produced by the loaders.
//!
//! Renderer-agnostic: meshes live on the CPU here and are uploaded by the
//! acceleration-structure builder. Primitives are shared geometry with a
//! material; instances place primitives in the world.

use std::sync::Arc;

use prism_math::{Aabb, Mat4, Mat4Ext, Vec3};

use crate::loader::LoadError;
use crate::mesh::Mesh;
use crate::texture::Texture;

/// A metallic-roughness material.
#[derive(Clone, Debug)]
pub struct Material {
    pub name: String,

    /// Diffuse/albedo color (RGB, linear)
    pub base_color: Vec3,

    /// Emitted radiance (RGB, for light-emitting surfaces)
    pub emissive: Vec3,

    /// Metallic factor (0=dielectric, 1=metal)
    pub metallic: f32,

    /// Roughness factor (0=smooth, 1=rough)
    pub roughness: f32,

    /// Index into `SceneDescription::textures`
    pub base_color_texture: Option<usize>,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            name: String::new(),
            base_color: Vec3::new(0.5, 0.5, 0.5), // Grey default
            emissive: Vec3::ZERO,
            metallic: 0.0,
            roughness: 0.5,
            base_color_texture: None,
        }
    }
}

impl Material {
    pub fn new(name: impl Into<String>, base_color: Vec3) -> Self {
        Self {
            name: name.into(),
            base_color,
            ..Default::default()
        }
    }

    pub fn emissive(name: impl Into<String>, emissive: Vec3) -> Self {
        Self {
            name: name.into(),
            base_color: Vec3::ZERO,
            emissive,
            ..Default::default()
        }
    }

    pub fn is_emissive(&self) -> bool {
        self.emissive.length_squared() > 0.0
    }
}

/// Shared mesh geometry with a material and a local transform.
#[derive(Clone, Debug)]
pub struct MeshPrimitive {
    pub name: String,
    pub mesh: Arc<Mesh>,
    /// Index into `SceneDescription::materials`
    pub material: usize,
    /// Mesh-local to instance space.
    pub transform: Mat4,
}

/// One placement of a primitive in the world.
#[derive(Clone, Debug)]
pub struct SceneInstance {
    /// Index into `SceneDescription::primitives`
    pub primitive: usize,
    pub transform: Mat4,
}

/// A camera-of-interest stored in the scene file.
#[derive(Clone, Debug)]
pub struct SceneCamera {
    pub name: String,
    pub eye: Vec3,
    pub center: Vec3,
    pub up: Vec3,
    pub fov_y: f32,
}

#[derive(Clone, Debug, Default)]
pub struct SceneDescription {
    pub name: String,
    pub primitives: Vec<MeshPrimitive>,
    pub instances: Vec<SceneInstance>,
    pub materials: Vec<Material>,
    pub textures: Vec<Texture>,
    pub cameras: Vec<SceneCamera>,
}

impl SceneDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn add_material(&mut self, material: Material) -> usize {
        self.materials.push(material);
        self.materials.len() - 1
    }

    pub fn add_texture(&mut self, texture: Texture) -> usize {
        self.textures.push(texture);
        self.textures.len() - 1
    }

    pub fn add_primitive(&mut self, name: impl Into<String>, mesh: Mesh, material: usize) -> usize {
        self.primitives.push(MeshPrimitive {
            name: name.into(),
            mesh: Arc::new(mesh),
            material,
            transform: Mat4::IDENTITY,
        });
        self.primitives.len() - 1
    }

    pub fn add_instance(&mut self, primitive: usize, transform: Mat4) {
        self.instances.push(SceneInstance {
            primitive,
            transform,
        });
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.instances
            .iter()
            .filter_map(|i| self.primitives.get(i.primitive))
            .map(|p| p.mesh.triangle_count())
            .sum()
    }

    /// World-space bounds of all instances.
    pub fn bounds(&self) -> Aabb {
        self.instances
            .iter()
            .filter_map(|instance| {
                let primitive = self.primitives.get(instance.primitive)?;
                let world = instance.transform * primitive.transform;
                Some(world.transform_aabb(&primitive.mesh.bounds))
            })
            .fold(Aabb::EMPTY, |acc, b| Aabb::surrounding(&acc, &b))
    }

    /// Check cross references (instance → primitive → material → texture).
    pub fn validate(&self) -> Result<(), LoadError> {
        let invalid = |what: String| Err(LoadError::InvalidScene(format!("{}: {}", self.name, what)));

        for (i, instance) in self.instances.iter().enumerate() {
            if instance.primitive >= self.primitives.len() {
                return invalid(format!(
                    "instance {} references primitive {} of {}",
                    i,
                    instance.primitive,
                    self.primitives.len()
                ));
            }
            if !instance.transform.is_finite() {
                return invalid(format!("instance {} has a non-finite transform", i));
            }
        }
        for primitive in &self.primitives {
            if primitive.material >= self.materials.len() {
                return invalid(format!(
                    "primitive '{}' references material {} of {}",
                    primitive.name,
                    primitive.material,
                    self.materials.len()
                ));
            }
        }
        for material in &self.materials {
            if let Some(texture) = material.base_color_texture {
                if texture >= self.textures.len() {
                    return invalid(format!(
                        "material '{}' references texture {} of {}",
                        material.name,
                        texture,
                        self.textures.len()
                    ));
                }
            }
        }
        Ok(())
    }
}
