//! Wavefront OBJ scenes via `tobj`.
//!
//! Every OBJ object becomes one primitive placed once with an identity
//! transform. MTL materials map onto [`Material`]; `Ke`, `Pr` and `Pm` are read
//! from the unknown-parameter table for emission, roughness and metallic.

use std::path::Path;

use prism_math::{Mat4, Vec3};

use super::{LoadError, LoadResult};
use crate::mesh::Mesh;
use crate::scene::{Material, SceneDescription};
use crate::texture::TextureCache;

pub(super) fn load_obj_scene(path: &Path) -> LoadResult<SceneDescription> {
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unnamed");

    let (models, materials) = tobj::load_obj(
        path,
        &tobj::LoadOptions {
            single_index: true,
            triangulate: true,
            ..Default::default()
        },
    )?;

    let mut scene = SceneDescription::new(name);
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut textures = TextureCache::with_base_dir(base_dir);

    // Slot 0 is the default material for objects without `usemtl`
    scene.add_material(Material::default());
    let mtl = match materials {
        Ok(materials) => materials,
        Err(e) => {
            log::warn!("{}: material library not loaded: {}", path.display(), e);
            Vec::new()
        }
    };
    for m in &mtl {
        scene.add_material(convert_material(m, &mut textures));
    }

    for model in &models {
        let mesh = &model.mesh;
        if mesh.indices.is_empty() {
            log::warn!("{}: object '{}' has no faces, skipping", path.display(), model.name);
            continue;
        }

        let positions: Vec<Vec3> = mesh.positions.chunks_exact(3).map(Vec3::from_slice).collect();
        let normals = (mesh.normals.len() == mesh.positions.len())
            .then(|| mesh.normals.chunks_exact(3).map(Vec3::from_slice).collect());
        // OBJ puts v = 0 at the bottom of the image
        let uvs = (mesh.texcoords.len() / 2 == positions.len())
            .then(|| mesh.texcoords.chunks_exact(2).map(|t| [t[0], 1.0 - t[1]]).collect());

        let mut converted = Mesh::new_with_uvs(positions, mesh.indices.clone(), normals, uvs);
        converted.ensure_normals();

        let material = mesh
            .material_id
            .filter(|&id| id < mtl.len())
            .map(|id| id + 1)
            .unwrap_or(0);
        let primitive = scene.add_primitive(model.name.clone(), converted, material);
        scene.add_instance(primitive, Mat4::IDENTITY);
    }

    if scene.primitives.is_empty() {
        return Err(LoadError::NoGeometry(path.display().to_string()));
    }
    scene.textures = textures.into_textures();

    log::info!(
        "Loaded {}: {} primitives, {} materials, {} textures, {} triangles",
        path.display(),
        scene.primitive_count(),
        scene.materials.len(),
        scene.textures.len(),
        scene.triangle_count()
    );

    Ok(scene)
}

fn convert_material(m: &tobj::Material, textures: &mut TextureCache) -> Material {
    let param = |key: &str| m.unknown_param.get(key).map(|s| s.as_str());
    let scalar = |key: &str| param(key).and_then(|v| v.trim().parse::<f32>().ok());
    let emissive = param("Ke")
        .map(|v| {
            let c: Vec<f32> = v.split_whitespace().filter_map(|s| s.parse().ok()).collect();
            match c.as_slice() {
                [r, g, b, ..] => Vec3::new(*r, *g, *b),
                [x] => Vec3::splat(*x),
                _ => Vec3::ZERO,
            }
        })
        .unwrap_or(Vec3::ZERO);

    let base_color_texture = m.diffuse_texture.as_ref().and_then(|tex| {
        textures
            .load(tex)
            .map_err(|e| log::warn!("Material '{}': skipping texture: {}", m.name, e))
            .ok()
    });

    Material {
        name: m.name.clone(),
        base_color: m.diffuse.map(Vec3::from).unwrap_or(Vec3::splat(0.5)),
        emissive,
        metallic: scalar("Pm").unwrap_or(0.0),
        roughness: scalar("Pr").unwrap_or(0.5),
        base_color_texture,
    }
}
