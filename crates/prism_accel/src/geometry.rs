//! Bottom-level geometry indices.
//!
//! [`GeometryIndexBuilder`] turns one [`Primitive`] (vertex and index buffers
//! already on the device) into a [`GeometryHandle`]: a BVH over the primitive's
//! triangles plus its bounds. Builds are independent of each other and
//! deterministic for identical buffers.

use std::fmt;
use std::mem::size_of;

use bytemuck::{Pod, Zeroable};
use prism_core::{Mesh, MeshPrimitive};
use prism_gpu::{Buffer, BufferUsage, Device, DeviceError, ResourceGuard, ResourceId, ResourceKind};
use prism_math::{Aabb, Interval, Mat4, Ray, Vec2, Vec3};
use rayon::prelude::*;
use std::sync::Arc;

use crate::bvh::Bvh;
use crate::error::BuildError;
use crate::triangle::{intersect_triangle, triangle_bounds};

/// Interleaved vertex layout of the vertex buffers.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
    pub uv: [f32; 2],
}

/// Device-resident geometry of one mesh primitive.
#[derive(Clone)]
pub struct Primitive {
    pub name: String,
    pub vertex_buffer: Arc<Buffer>,
    pub index_buffer: Arc<Buffer>,
    /// Mesh-local to instance space.
    pub transform: Mat4,
    pub material_index: u32,
}

impl Primitive {
    /// Upload a mesh into fresh vertex and index buffers.
    pub fn upload(
        device: &Device,
        name: &str,
        mesh: &Mesh,
        transform: Mat4,
        material_index: u32,
    ) -> Result<Self, DeviceError> {
        let mut vertices = Vec::with_capacity(mesh.vertex_count());
        for (i, position) in mesh.positions.iter().enumerate() {
            let normal = mesh
                .normals
                .as_ref()
                .and_then(|n| n.get(i))
                .copied()
                .unwrap_or(Vec3::Y);
            let uv = mesh.uvs.as_ref().and_then(|uv| uv.get(i)).copied().unwrap_or([0.0; 2]);
            vertices.push(Vertex {
                position: position.to_array(),
                normal: normal.to_array(),
                uv,
            });
        }

        let vertex_buffer =
            device.create_buffer_init(&format!("{name} vertices"), BufferUsage::Vertex, &vertices)?;
        let index_buffer =
            device.create_buffer_init(&format!("{name} indices"), BufferUsage::Index, &mesh.indices)?;

        Ok(Self {
            name: name.to_string(),
            vertex_buffer,
            index_buffer,
            transform,
            material_index,
        })
    }

    pub fn from_scene(device: &Device, primitive: &MeshPrimitive) -> Result<Self, DeviceError> {
        Self::upload(
            device,
            &primitive.name,
            &primitive.mesh,
            primitive.transform,
            primitive.material as u32,
        )
    }
}

impl fmt::Debug for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Primitive")
            .field("name", &self.name)
            .field("vertex_buffer", &self.vertex_buffer.id())
            .field("index_buffer", &self.index_buffer.id())
            .field("material_index", &self.material_index)
            .finish()
    }
}

/// Closest hit inside one geometry, in its local space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalHit {
    pub t: f32,
    pub primitive_index: u32,
    pub barycentrics: Vec2,
    /// Unnormalized face normal from the winding order.
    pub geometric_normal: Vec3,
    pub shading_normal: Vec3,
    pub uv: Vec2,
}

/// A built bottom-level index. Owned by exactly one scene index.
pub struct GeometryHandle {
    guard: ResourceGuard,
    name: String,
    triangles: Vec<[Vec3; 3]>,
    normals: Vec<[Vec3; 3]>,
    uvs: Vec<[Vec2; 3]>,
    bvh: Bvh,
    bounds: Aabb,
    transform: Mat4,
    material_index: u32,
}

impl GeometryHandle {
    pub fn id(&self) -> ResourceId {
        self.guard.id()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local-space bounds of all triangles.
    pub fn bounds(&self) -> Aabb {
        self.bounds
    }

    pub fn transform(&self) -> Mat4 {
        self.transform
    }

    pub fn material_index(&self) -> u32 {
        self.material_index
    }

    pub fn triangle_count(&self) -> usize {
        self.triangles.len()
    }

    pub fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<LocalHit> {
        let mut best: Option<(u32, f32, f32)> = None;
        let t = self.bvh.traverse(ray, ray_t, |i, interval| {
            let hit = intersect_triangle(ray, &self.triangles[i as usize], interval)?;
            best = Some((i, hit.u, hit.v));
            Some(hit.t)
        })?;
        let (index, u, v) = best?;

        let w = 1.0 - u - v;
        let [p0, p1, p2] = self.triangles[index as usize];
        let [n0, n1, n2] = self.normals[index as usize];
        let [t0, t1, t2] = self.uvs[index as usize];

        Some(LocalHit {
            t,
            primitive_index: index,
            barycentrics: Vec2::new(u, v),
            geometric_normal: (p1 - p0).cross(p2 - p0),
            shading_normal: n0 * w + n1 * u + n2 * v,
            uv: t0 * w + t1 * u + t2 * v,
        })
    }
}

impl fmt::Debug for GeometryHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeometryHandle")
            .field("id", &self.id())
            .field("name", &self.name)
            .field("triangles", &self.triangles.len())
            .field("bounds", &self.bounds)
            .finish()
    }
}

/// Builds bottom-level indices. Stateless apart from the device it validates against.
#[derive(Clone)]
pub struct GeometryIndexBuilder {
    device: Device,
}

impl GeometryIndexBuilder {
    pub fn new(device: &Device) -> Self {
        Self {
            device: device.clone(),
        }
    }

    pub fn build(&self, primitive: &Primitive) -> Result<GeometryHandle, BuildError> {
        self.device.check()?;
        let name = primitive.name.as_str();

        let (vertices, indices) = self.read_buffers(primitive)?;
        let triangle_count = indices.len() / 3;
        let limit = self.device.limits().max_primitive_count;
        if triangle_count > limit as usize {
            return Err(BuildError::OverLimit {
                primitive: name.to_string(),
                triangles: triangle_count,
                limit,
            });
        }
        if let Some(&index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(BuildError::IndexOutOfRange {
                primitive: name.to_string(),
                index,
                vertex_count: vertices.len(),
            });
        }

        let mut triangles = Vec::with_capacity(triangle_count);
        let mut normals = Vec::with_capacity(triangle_count);
        let mut uvs = Vec::with_capacity(triangle_count);
        for face in indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|k| vertices[face[k] as usize]);
            triangles.push([a, b, c].map(|v| Vec3::from(v.position)));
            normals.push([a, b, c].map(|v| Vec3::from(v.normal)));
            uvs.push([a, b, c].map(|v| Vec2::from(v.uv)));
        }

        let boxes: Vec<Aabb> = triangles.iter().map(triangle_bounds).collect();
        let bvh = Bvh::build(&boxes);
        let bounds = bvh.bounds();
        let guard = self
            .device
            .register_resource(ResourceKind::AccelerationStructure, &format!("{name} blas"))?;

        log::debug!(
            "GeometryIndex '{}': {} triangles, {} nodes",
            name,
            triangle_count,
            bvh.node_count()
        );

        Ok(GeometryHandle {
            guard,
            name: name.to_string(),
            triangles,
            normals,
            uvs,
            bvh,
            bounds,
            transform: primitive.transform,
            material_index: primitive.material_index,
        })
    }

    /// Build every primitive in parallel. Results keep the input order.
    pub fn build_all(&self, primitives: &[Primitive]) -> Vec<Result<GeometryHandle, BuildError>> {
        primitives.par_iter().map(|p| self.build(p)).collect()
    }

    fn read_buffers(&self, primitive: &Primitive) -> Result<(Vec<Vertex>, Vec<u32>), BuildError> {
        let name = primitive.name.as_str();
        let checks: [(&Arc<Buffer>, &'static str, u64); 2] = [
            (&primitive.vertex_buffer, "vertex", size_of::<Vertex>() as u64),
            (&primitive.index_buffer, "index", size_of::<u32>() as u64),
        ];

        for (buffer, label, stride) in checks {
            if !self.device.is_live(buffer.id()) {
                return Err(DeviceError::InvalidResource(buffer.id()).into());
            }
            let size = buffer.size();
            if size == 0 {
                return Err(BuildError::Empty {
                    primitive: name.to_string(),
                    buffer: label,
                });
            }
            if size % stride != 0 {
                return Err(BuildError::Misaligned {
                    primitive: name.to_string(),
                    buffer: label,
                    size,
                    stride,
                });
            }
        }

        let vertices = primitive.vertex_buffer.read::<Vertex>()?;
        let indices = primitive.index_buffer.read::<u32>()?;
        if indices.len() % 3 != 0 {
            return Err(BuildError::NotTriangleList {
                primitive: name.to_string(),
                count: indices.len(),
            });
        }
        Ok((vertices, indices))
    }
}
