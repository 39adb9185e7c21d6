//! Bounding Volume Hierarchy over a list of boxes.
//!
//! The same structure serves both levels: triangles inside a bottom-level
//! geometry index, and instance boxes inside the top-level scene index. Nodes
//! are stored flat in one vector; leaves reference a range of `indices`.

use prism_math::{Aabb, Interval, Ray, Vec3};

/// Maximum primitives per leaf node before splitting.
const LEAF_MAX_SIZE: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq)]
enum NodeKind {
    Leaf { first: u32, count: u32 },
    Branch { left: u32, right: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct BvhNode {
    bounds: Aabb,
    kind: NodeKind,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bvh {
    nodes: Vec<BvhNode>,
    /// Primitive indices in leaf order.
    indices: Vec<u32>,
}

impl Bvh {
    /// Build over `bounds` (one box per primitive).
    ///
    /// Median split on the longest centroid axis. Ties are broken by primitive
    /// index, so identical input always yields an identical tree.
    pub fn build(bounds: &[Aabb]) -> Self {
        let mut bvh = Bvh {
            nodes: Vec::with_capacity(bounds.len().max(1) * 2 / LEAF_MAX_SIZE + 1),
            indices: (0..bounds.len() as u32).collect(),
        };
        if bounds.is_empty() {
            return bvh;
        }

        let centroids: Vec<Vec3> = bounds.iter().map(Aabb::centroid).collect();
        bvh.build_recursive(bounds, &centroids, 0, bounds.len());
        bvh
    }

    fn build_recursive(&mut self, bounds: &[Aabb], centroids: &[Vec3], start: usize, end: usize) -> u32 {
        let node_index = self.nodes.len() as u32;
        let node_bounds = self.indices[start..end]
            .iter()
            .fold(Aabb::EMPTY, |acc, &i| Aabb::surrounding(&acc, &bounds[i as usize]));

        let count = end - start;
        self.nodes.push(BvhNode {
            bounds: node_bounds,
            kind: NodeKind::Leaf {
                first: start as u32,
                count: count as u32,
            },
        });
        if count <= LEAF_MAX_SIZE {
            return node_index;
        }

        // Choose split axis based on centroid spread
        let centroid_bounds = Aabb::from_point_cloud(
            self.indices[start..end].iter().map(|&i| &centroids[i as usize]),
        );
        let axis = centroid_bounds.longest_axis();

        self.indices[start..end].sort_by(|&a, &b| {
            centroids[a as usize][axis]
                .total_cmp(&centroids[b as usize][axis])
                .then(a.cmp(&b))
        });

        let mid = start + count / 2;
        let left = self.build_recursive(bounds, centroids, start, mid);
        let right = self.build_recursive(bounds, centroids, mid, end);
        self.nodes[node_index as usize].kind = NodeKind::Branch { left, right };

        node_index
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn bounds(&self) -> Aabb {
        self.nodes.first().map(|n| n.bounds).unwrap_or(Aabb::EMPTY)
    }

    /// Closest-hit traversal.
    ///
    /// `test(primitive, interval)` intersects one primitive and returns its hit
    /// distance. The interval shrinks to the closest hit found so far, and
    /// children are visited nearest first.
    pub fn traverse<F>(&self, ray: &Ray, ray_t: Interval, mut test: F) -> Option<f32>
    where
        F: FnMut(u32, Interval) -> Option<f32>,
    {
        if self.nodes.is_empty() {
            return None;
        }

        let mut closest: Option<f32> = None;
        let mut stack: Vec<u32> = Vec::with_capacity(64);
        stack.push(0);

        while let Some(index) = stack.pop() {
            let current = ray_t.with_max(closest.unwrap_or(ray_t.max));
            let node = &self.nodes[index as usize];
            if node.bounds.hit_distance(ray, current).is_none() {
                continue;
            }

            match node.kind {
                NodeKind::Leaf { first, count } => {
                    for k in first..first + count {
                        let interval = ray_t.with_max(closest.unwrap_or(ray_t.max));
                        if let Some(t) = test(self.indices[k as usize], interval) {
                            closest = Some(t);
                        }
                    }
                }
                NodeKind::Branch { left, right } => {
                    let near_left = self.nodes[left as usize].bounds.hit_distance(ray, current);
                    let near_right = self.nodes[right as usize].bounds.hit_distance(ray, current);
                    match (near_left, near_right) {
                        (Some(l), Some(r)) => {
                            // Push the farther child first so the nearer one is popped next
                            if l <= r {
                                stack.push(right);
                                stack.push(left);
                            } else {
                                stack.push(left);
                                stack.push(right);
                            }
                        }
                        (Some(_), None) => stack.push(left),
                        (None, Some(_)) => stack.push(right),
                        (None, None) => {}
                    }
                }
            }
        }

        closest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_box_at(x: f32) -> Aabb {
        Aabb::from_points(Vec3::new(x - 0.5, -0.5, -0.5), Vec3::new(x + 0.5, 0.5, 0.5))
    }

    #[test]
    fn test_bvh_empty() {
        let bvh = Bvh::build(&[]);
        assert!(bvh.is_empty());
        assert!(bvh.bounds().is_empty());

        let ray = Ray::new(Vec3::ZERO, Vec3::Z);
        assert_eq!(bvh.traverse(&ray, Interval::RAY, |_, _| Some(1.0)), None);
    }

    #[test]
    fn test_bvh_single_leaf() {
        let bvh = Bvh::build(&[unit_box_at(0.0)]);
        assert_eq!(bvh.node_count(), 1);
    }

    #[test]
    fn test_bvh_finds_closest() {
        // Boxes along +X; ray from the far left travels +X and hits box 0 first
        let boxes: Vec<Aabb> = (0..20).map(|i| unit_box_at(i as f32 * 2.0)).collect();
        let bvh = Bvh::build(&boxes);
        assert!(bvh.node_count() > 1);

        let ray = Ray::new(Vec3::new(-10.0, 0.0, 0.0), Vec3::X);
        let mut tested = Vec::new();
        let t = bvh.traverse(&ray, Interval::RAY, |i, interval| {
            tested.push(i);
            let t = boxes[i as usize].hit_distance(&ray, interval)?;
            Some(t)
        });

        assert!((t.unwrap() - 9.5).abs() < 1e-4);
        // Nearest-first ordering culls most of the far leaves
        assert!(tested.len() < boxes.len());
    }

    #[test]
    fn test_bvh_miss() {
        let boxes: Vec<Aabb> = (0..10).map(|i| unit_box_at(i as f32 * 2.0)).collect();
        let bvh = Bvh::build(&boxes);

        let ray = Ray::new(Vec3::new(0.0, 10.0, 0.0), Vec3::Z);
        let mut calls = 0;
        assert_eq!(
            bvh.traverse(&ray, Interval::RAY, |_, _| {
                calls += 1;
                None
            }),
            None
        );
        assert_eq!(calls, 0);
    }

    #[test]
    fn test_bvh_deterministic() {
        // Coincident centroids exercise the tie-break
        let boxes: Vec<Aabb> = (0..37).map(|i| unit_box_at((i % 5) as f32)).collect();
        assert_eq!(Bvh::build(&boxes), Bvh::build(&boxes));
    }
}
