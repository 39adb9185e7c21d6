//! Top-level scene index.
//!
//! Aggregates instance transforms over previously built geometry handles into
//! one BVH over world-space instance boxes, and exposes it to renderers as a
//! one-slot binding set. Rays are moved into each instance's local space
//! without renormalizing the direction, so hit distances from different
//! instances compare directly.

use std::fmt;
use std::sync::Arc;

use prism_gpu::{
    AccelerationStructure, BindingKind, BindingLayout, BindingResource, BindingSet, BindingSlot,
    Device, RayHit, ResourceGuard, ResourceId, ResourceKind,
};
use prism_math::{Aabb, Interval, Mat4, Mat4Ext, Ray, Vec3};

use crate::bvh::Bvh;
use crate::error::SceneIndexError;
use crate::geometry::{GeometryHandle, LocalHit};

/// Binding slot of the top-level structure in the scene-index set.
pub const SCENE_INDEX_BINDING: u32 = 0;

/// Position of a geometry handle in the list handed to [`SceneIndex::build`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GeometryId(pub usize);

/// One placement of a geometry in the scene.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceRecord {
    /// Non-owning reference to a geometry handle.
    pub geometry: GeometryId,
    pub transform: Mat4,
    pub instance_id: u32,
}

struct TopLevelInstance {
    geometry: usize,
    /// Instance transform composed with the primitive's own transform.
    world_from_local: Mat4,
    local_from_world: Mat4,
    instance_id: u32,
}

struct TopLevel {
    guard: ResourceGuard,
    geometries: Vec<GeometryHandle>,
    instances: Vec<TopLevelInstance>,
    bvh: Bvh,
}

impl TopLevel {
    fn resolve(&self, ray: &Ray, instance_index: usize, local: LocalHit) -> RayHit {
        let instance = &self.instances[instance_index];
        let to_world = &instance.world_from_local;

        let geometric = to_world.transform_normal(local.geometric_normal);
        let front_face = ray.direction.dot(geometric) < 0.0;
        let geometric_normal = if front_face { geometric } else { -geometric };

        let mut shading_normal = to_world.transform_normal(local.shading_normal);
        if shading_normal == Vec3::ZERO {
            shading_normal = geometric_normal;
        } else if shading_normal.dot(geometric_normal) < 0.0 {
            shading_normal = -shading_normal;
        }

        RayHit {
            t: local.t,
            position: ray.at(local.t),
            geometric_normal,
            shading_normal,
            uv: local.uv,
            barycentrics: local.barycentrics,
            front_face,
            instance_id: instance.instance_id,
            instance_index: instance_index as u32,
            geometry_index: instance.geometry as u32,
            primitive_index: local.primitive_index,
        }
    }
}

impl AccelerationStructure for TopLevel {
    fn resource_id(&self) -> ResourceId {
        self.guard.id()
    }

    fn resource_ids(&self) -> Vec<ResourceId> {
        std::iter::once(self.guard.id())
            .chain(self.geometries.iter().map(GeometryHandle::id))
            .collect()
    }

    fn bounds(&self) -> Aabb {
        self.bvh.bounds()
    }

    fn trace(&self, ray: &Ray, ray_t: Interval) -> Option<RayHit> {
        let mut best: Option<(usize, LocalHit)> = None;
        self.bvh.traverse(ray, ray_t, |i, interval| {
            let instance = &self.instances[i as usize];
            let local_ray = ray.transformed(&instance.local_from_world);
            let hit = self.geometries[instance.geometry].intersect(&local_ray, interval)?;
            best = Some((i as usize, hit));
            Some(hit.t)
        })?;

        best.map(|(index, local)| self.resolve(ray, index, local))
    }
}

/// The top-level index plus the binding set renderers consume.
pub struct SceneIndex {
    device: Device,
    top: Arc<TopLevel>,
    layout: Arc<BindingLayout>,
    bindings: Arc<BindingSet>,
}

impl SceneIndex {
    /// Aggregate `instances` over `geometries`. The index takes ownership of the handles.
    pub fn build(
        device: &Device,
        geometries: Vec<GeometryHandle>,
        instances: &[InstanceRecord],
    ) -> Result<Self, SceneIndexError> {
        device.check()?;

        let limit = device.limits().max_instance_count;
        if instances.len() > limit as usize {
            return Err(SceneIndexError::TooManyInstances {
                count: instances.len(),
                limit,
            });
        }

        let mut top_instances = Vec::with_capacity(instances.len());
        let mut boxes = Vec::with_capacity(instances.len());
        for (i, record) in instances.iter().enumerate() {
            let geometry = geometries.get(record.geometry.0).ok_or(
                SceneIndexError::UnknownGeometry {
                    instance: i,
                    geometry: record.geometry.0,
                    count: geometries.len(),
                },
            )?;

            let world_from_local = record.transform * geometry.transform();
            if !world_from_local.is_invertible() {
                return Err(SceneIndexError::SingularTransform { instance: i });
            }

            boxes.push(world_from_local.transform_aabb(&geometry.bounds()));
            top_instances.push(TopLevelInstance {
                geometry: record.geometry.0,
                world_from_local,
                local_from_world: world_from_local.inverse(),
                instance_id: record.instance_id,
            });
        }

        let bvh = Bvh::build(&boxes);
        let guard = device.register_resource(ResourceKind::AccelerationStructure, "scene tlas")?;
        let top = Arc::new(TopLevel {
            guard,
            geometries,
            instances: top_instances,
            bvh,
        });

        let layout = device.create_binding_layout(
            "scene index",
            vec![BindingSlot::new(SCENE_INDEX_BINDING, BindingKind::AccelerationStructure)],
        )?;
        let accel: Arc<dyn AccelerationStructure> = top.clone();
        let bindings = device.create_binding_set(
            "scene index",
            &layout,
            vec![(SCENE_INDEX_BINDING, BindingResource::AccelerationStructure(accel))],
        )?;

        log::info!(
            "SceneIndex: {} instances over {} geometries, {} nodes",
            top.instances.len(),
            top.geometries.len(),
            top.bvh.node_count()
        );

        Ok(Self {
            device: device.clone(),
            top,
            layout,
            bindings,
        })
    }

    /// An index with nothing in it; every ray misses.
    pub fn empty(device: &Device) -> Result<Self, SceneIndexError> {
        Self::build(device, Vec::new(), &[])
    }

    /// The binding set every renderer back-end binds as its scene-index set.
    pub fn bindings(&self) -> &Arc<BindingSet> {
        &self.bindings
    }

    pub fn binding_layout(&self) -> &Arc<BindingLayout> {
        &self.layout
    }

    pub fn instance_count(&self) -> usize {
        self.top.instances.len()
    }

    pub fn geometry_count(&self) -> usize {
        self.top.geometries.len()
    }

    /// Material index per geometry, in geometry order (the `geometry_index` of a hit).
    pub fn geometry_materials(&self) -> Vec<u32> {
        self.top.geometries.iter().map(|g| g.material_index()).collect()
    }

    /// World-space bounds of all instances.
    pub fn bounds(&self) -> Aabb {
        self.top.bvh.bounds()
    }

    pub fn intersect(&self, ray: &Ray, ray_t: Interval) -> Option<RayHit> {
        self.top.trace(ray, ray_t)
    }

    /// Every device resource this index owns.
    pub fn resource_ids(&self) -> Vec<ResourceId> {
        let mut ids = self.top.resource_ids();
        ids.push(self.layout.id());
        ids.push(self.bindings.id());
        ids
    }

    /// Install `next` and hand back the previous index.
    ///
    /// The caller must have idled the device first: the previous index is
    /// released when the returned value is dropped.
    pub fn replace(&mut self, next: SceneIndex) -> SceneIndex {
        if self.device.is_in_flight(self.bindings.id()) {
            log::error!("SceneIndex replaced while a submission still references it");
        }
        std::mem::replace(self, next)
    }
}

impl fmt::Debug for SceneIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneIndex")
            .field("instances", &self.instance_count())
            .field("geometries", &self.geometry_count())
            .field("bounds", &self.bounds())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{GeometryIndexBuilder, Primitive};
    use prism_core::Mesh;
    use prism_gpu::{CommandEncoder, DeviceDescriptor, DeviceLimits};

    fn device() -> Device {
        Device::new(DeviceDescriptor::default())
    }

    fn cube_handle(device: &Device, material: u32) -> GeometryHandle {
        let primitive =
            Primitive::upload(device, "cube", &Mesh::cuboid(Vec3::splat(0.5)), Mat4::IDENTITY, material)
                .unwrap();
        GeometryIndexBuilder::new(device).build(&primitive).unwrap()
    }

    fn record(geometry: usize, transform: Mat4, instance_id: u32) -> InstanceRecord {
        InstanceRecord {
            geometry: GeometryId(geometry),
            transform,
            instance_id,
        }
    }

    #[test]
    fn test_scene_index_instances() {
        let device = device();
        let instances: Vec<InstanceRecord> = (0..10)
            .map(|i| record(0, Mat4::from_translation(Vec3::new(i as f32 * 2.0, 0.0, 0.0)), i))
            .collect();
        let index = SceneIndex::build(&device, vec![cube_handle(&device, 3)], &instances).unwrap();

        assert_eq!(index.instance_count(), 10);
        assert_eq!(index.geometry_count(), 1);
        assert_eq!(index.geometry_materials(), vec![3]);
        assert!((index.bounds().x.max - 18.5).abs() < 1e-3);

        // Ray down onto instance 4
        let ray = Ray::new(Vec3::new(8.0, 5.0, 0.0), Vec3::NEG_Y);
        let hit = index.intersect(&ray, Interval::RAY).unwrap();
        assert_eq!(hit.instance_id, 4);
        assert_eq!(hit.geometry_index, 0);
        assert!((hit.t - 4.5).abs() < 1e-4);
        assert!(hit.front_face);
        assert!(hit.geometric_normal.y > 0.99);
    }

    #[test]
    fn test_scaled_instance_keeps_world_distance() {
        let device = device();
        let instances = [record(0, Mat4::from_scale(Vec3::splat(4.0)), 0)];
        let index = SceneIndex::build(&device, vec![cube_handle(&device, 0)], &instances).unwrap();

        // Scaled cube spans [-2, 2]; hit distance is in world units
        let ray = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
        let hit = index.intersect(&ray, Interval::RAY).unwrap();
        assert!((hit.t - 8.0).abs() < 1e-3);
        assert!((hit.position.z - 2.0).abs() < 1e-3);
    }

    #[test]
    fn test_closest_of_overlapping_instances() {
        let device = device();
        let instances = [
            record(0, Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0)), 1),
            record(1, Mat4::IDENTITY, 2),
        ];
        let geometries = vec![cube_handle(&device, 0), cube_handle(&device, 1)];
        let index = SceneIndex::build(&device, geometries, &instances).unwrap();

        let ray = Ray::new(Vec3::new(0.0, 0.0, 10.0), Vec3::NEG_Z);
        let hit = index.intersect(&ray, Interval::RAY).unwrap();
        assert_eq!(hit.instance_id, 2);
        assert_eq!(hit.geometry_index, 1);
    }

    #[test]
    fn test_unknown_geometry_rejected() {
        let device = device();
        let result = SceneIndex::build(&device, vec![cube_handle(&device, 0)], &[record(5, Mat4::IDENTITY, 0)]);
        assert!(matches!(
            result,
            Err(SceneIndexError::UnknownGeometry { instance: 0, geometry: 5, count: 1 })
        ));
    }

    #[test]
    fn test_singular_transform_rejected() {
        let device = device();
        let flat = Mat4::from_scale(Vec3::new(1.0, 0.0, 1.0));
        let result = SceneIndex::build(&device, vec![cube_handle(&device, 0)], &[record(0, flat, 0)]);
        assert!(matches!(result, Err(SceneIndexError::SingularTransform { instance: 0 })));
    }

    #[test]
    fn test_too_many_instances() {
        let device = Device::new(DeviceDescriptor {
            limits: DeviceLimits {
                max_instance_count: 2,
                ..Default::default()
            },
            ..Default::default()
        });
        let instances = vec![record(0, Mat4::IDENTITY, 0); 3];
        let result = SceneIndex::build(&device, vec![cube_handle(&device, 0)], &instances);
        assert!(matches!(result, Err(SceneIndexError::TooManyInstances { count: 3, limit: 2 })));
    }

    #[test]
    fn test_empty_index_misses() {
        let device = device();
        let index = SceneIndex::empty(&device).unwrap();
        assert_eq!(index.instance_count(), 0);
        assert!(index.bounds().is_empty());
        assert!(index
            .intersect(&Ray::new(Vec3::ZERO, Vec3::Z), Interval::RAY)
            .is_none());
    }

    #[test]
    fn test_bindings_expose_top_level() {
        let device = device();
        let index = SceneIndex::build(&device, vec![cube_handle(&device, 0)], &[record(0, Mat4::IDENTITY, 0)]).unwrap();

        let accel = index.bindings().acceleration_structure(SCENE_INDEX_BINDING).unwrap();
        let ray = Ray::new(Vec3::new(0.0, 0.0, 5.0), Vec3::NEG_Z);
        assert!(accel.trace(&ray, Interval::RAY).is_some());
        assert_eq!(index.bindings().layout().id(), index.binding_layout().id());
    }

    #[test]
    fn test_drop_releases_geometry() {
        let device = device();
        let handle = cube_handle(&device, 0);
        let blas_id = handle.id();
        let index = SceneIndex::build(&device, vec![handle], &[record(0, Mat4::IDENTITY, 0)]).unwrap();
        assert!(device.is_live(blas_id));

        drop(index);
        assert!(!device.is_live(blas_id));
    }

    #[test]
    fn test_replace_after_idle_is_clean() {
        let device = device();
        let mut active = SceneIndex::build(&device, vec![cube_handle(&device, 0)], &[record(0, Mat4::IDENTITY, 0)]).unwrap();

        let pipeline_layout = device
            .create_pipeline_layout("probe", vec![active.binding_layout().clone()], 0)
            .unwrap();
        let pipeline = device.create_pipeline("probe", &pipeline_layout).unwrap();
        let mut encoder = CommandEncoder::new(&device, "frame");
        encoder.bind_pipeline(&pipeline);
        encoder.bind_sets(&[active.bindings()]).unwrap();
        device.submit(encoder.finish()).unwrap();

        let next = SceneIndex::empty(&device).unwrap();
        device.wait_idle().unwrap();
        let previous = active.replace(next);
        drop(previous);

        assert_eq!(active.instance_count(), 0);
        assert!(device.validation_errors().is_empty());
    }

    #[test]
    fn test_release_while_in_flight_is_detected() {
        let device = device();
        let index = SceneIndex::build(&device, vec![cube_handle(&device, 0)], &[record(0, Mat4::IDENTITY, 0)]).unwrap();

        // A frame that binds the index, still in flight
        let pipeline_layout = device
            .create_pipeline_layout("probe", vec![index.binding_layout().clone()], 0)
            .unwrap();
        let pipeline = device.create_pipeline("probe", &pipeline_layout).unwrap();
        let mut encoder = CommandEncoder::new(&device, "frame");
        encoder.bind_pipeline(&pipeline);
        encoder.bind_sets(&[index.bindings()]).unwrap();
        device.submit(encoder.finish()).unwrap();

        drop(index);
        assert!(!device.validation_errors().is_empty());
    }
}
