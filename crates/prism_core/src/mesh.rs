//! Triangle mesh geometry.
//!
//! A device-agnostic mesh populated by the loaders and uploaded into vertex and
//! index buffers before the bottom-level index is built.

use prism_math::{Aabb, Vec3};

/// A mesh consisting of vertex positions, optional normals and UVs, and triangle indices.
#[derive(Clone, Debug)]
pub struct Mesh {
    /// Vertex positions (one Vec3 per vertex)
    pub positions: Vec<Vec3>,

    /// Vertex normals (optional - call `ensure_normals()` to fill them in)
    pub normals: Option<Vec<Vec3>>,

    /// UV coordinates (optional - one [u, v] per vertex)
    pub uvs: Option<Vec<[f32; 2]>>,

    /// Triangle indices (every 3 indices form a triangle)
    pub indices: Vec<u32>,

    /// Axis-aligned bounding box
    pub bounds: Aabb,
}

impl Mesh {
    /// Create a new mesh from positions and indices, optionally with normals.
    pub fn new(positions: Vec<Vec3>, indices: Vec<u32>, normals: Option<Vec<Vec3>>) -> Self {
        Self::new_with_uvs(positions, indices, normals, None)
    }

    /// Create a new mesh with UV coordinates.
    pub fn new_with_uvs(
        positions: Vec<Vec3>,
        indices: Vec<u32>,
        normals: Option<Vec<Vec3>>,
        uvs: Option<Vec<[f32; 2]>>,
    ) -> Self {
        let bounds = Aabb::from_point_cloud(&positions);
        Self {
            positions,
            normals,
            uvs,
            indices,
            bounds,
        }
    }

    /// Axis-aligned box centred on the origin, 12 triangles, outward CCW winding.
    pub fn cuboid(half_extent: Vec3) -> Self {
        let h = half_extent;
        let mut positions = Vec::with_capacity(24);
        let mut normals = Vec::with_capacity(24);
        let mut uvs = Vec::with_capacity(24);
        let mut indices = Vec::with_capacity(36);

        // (normal, tangent u, tangent v) per face; u x v == normal
        let faces = [
            (Vec3::X, Vec3::NEG_Z, Vec3::Y),
            (Vec3::NEG_X, Vec3::Z, Vec3::Y),
            (Vec3::Y, Vec3::X, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::X, Vec3::Z),
            (Vec3::Z, Vec3::X, Vec3::Y),
            (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
        ];

        for (normal, u, v) in faces {
            let base = positions.len() as u32;
            for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                positions.push((normal + u * su + v * sv) * h);
                normals.push(normal);
                uvs.push([(su + 1.0) * 0.5, (1.0 - sv) * 0.5]);
            }
            indices.extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        Self::new_with_uvs(positions, indices, Some(normals), Some(uvs))
    }

    /// Compute smooth vertex normals by averaging face normals (CCW front faces).
    pub fn compute_normals(&mut self) {
        let vertex_count = self.positions.len();
        let mut normals = vec![Vec3::ZERO; vertex_count];

        for face in self.indices.chunks_exact(3) {
            let (i0, i1, i2) = (face[0] as usize, face[1] as usize, face[2] as usize);
            if i0 >= vertex_count || i1 >= vertex_count || i2 >= vertex_count {
                continue;
            }

            let p0 = self.positions[i0];
            let face_normal = (self.positions[i1] - p0).cross(self.positions[i2] - p0);

            normals[i0] += face_normal;
            normals[i1] += face_normal;
            normals[i2] += face_normal;
        }

        for normal in &mut normals {
            // Default up normal for degenerate cases
            *normal = normal.try_normalize().unwrap_or(Vec3::Y);
        }

        self.normals = Some(normals);
    }

    pub fn has_normals(&self) -> bool {
        self.normals.is_some()
    }

    pub fn has_uvs(&self) -> bool {
        self.uvs.is_some()
    }

    /// Ensure the mesh has one normal per vertex, computing them if necessary.
    pub fn ensure_normals(&mut self) {
        let vertex_count = self.positions.len();
        match &self.normals {
            Some(normals) if normals.len() == vertex_count => {}
            Some(normals) => {
                log::debug!(
                    "Normals array length ({}) doesn't match vertex count ({}), computing smooth normals",
                    normals.len(),
                    vertex_count
                );
                self.compute_normals();
            }
            None => self.compute_normals(),
        }
    }

    /// Diagonal length of the bounding box.
    pub fn size(&self) -> f32 {
        self.bounds.diagonal()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }
}
