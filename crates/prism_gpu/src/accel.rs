//! Ray-query capability of a bound top-level acceleration structure.

use crate::ResourceId;
use prism_math::{Aabb, Interval, Ray, Vec2, Vec3};

/// Closest-hit record returned by [`AccelerationStructure::trace`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayHit {
    /// Ray parameter of the hit, in the units of the ray that was traced.
    pub t: f32,
    pub position: Vec3,
    /// World-space face normal, facing against the ray.
    pub geometric_normal: Vec3,
    /// World-space interpolated vertex normal, facing against the ray.
    pub shading_normal: Vec3,
    pub uv: Vec2,
    pub barycentrics: Vec2,
    pub front_face: bool,
    /// User id attached to the instance.
    pub instance_id: u32,
    /// Position of the instance in the top-level structure.
    pub instance_index: u32,
    /// Index of the bottom-level geometry that was hit (scene-data lookup key).
    pub geometry_index: u32,
    /// Triangle index within that geometry.
    pub primitive_index: u32,
}

pub trait AccelerationStructure: Send + Sync {
    fn resource_id(&self) -> ResourceId;

    /// Every device resource the structure depends on, including itself.
    fn resource_ids(&self) -> Vec<ResourceId> {
        vec![self.resource_id()]
    }

    fn bounds(&self) -> Aabb;

    /// Closest hit within `ray_t`.
    fn trace(&self, ray: &Ray, ray_t: Interval) -> Option<RayHit>;

    /// Any hit within `ray_t`.
    fn occluded(&self, ray: &Ray, ray_t: Interval) -> bool {
        self.trace(ray, ray_t).is_some()
    }
}
