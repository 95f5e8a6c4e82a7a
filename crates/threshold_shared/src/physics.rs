use bitflags::bitflags;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::portal::PortalId;

const PARALLEL_EPSILON: f32 = 1.0e-6;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct LayerMask: u32 {
        const DEFAULT        = 0b0000_0001;
        const PORTAL_TRIGGER = 0b0000_0010;
        const TRIGGER        = 0b0000_0100;
        const TERRAIN        = 0b0000_1000;
    }
}

#[derive(Debug, Copy, Clone)]
pub struct AABB {
    pub min: Vec3,
    pub max: Vec3,
}

impl AABB {
    pub fn intersects(&self, other: &AABB) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }

    pub fn contains(&self, point: Vec3) -> bool {
        point.cmpge(self.min).all() && point.cmple(self.max).all()
    }

    /// Entry distance along `ray`, or zero when the origin is inside.
    fn ray_entry(&self, ray: &Ray, max_distance: f32) -> Option<f32> {
        if self.contains(ray.origin) {
            return Some(0.0);
        }

        let mut t_min = 0.0_f32;
        let mut t_max = max_distance;
        for axis in 0..3 {
            let origin = ray.origin[axis];
            let direction = ray.direction[axis];
            if direction.abs() < PARALLEL_EPSILON {
                if origin < self.min[axis] || origin > self.max[axis] {
                    return None;
                }
                continue;
            }
            let inv = 1.0 / direction;
            let mut t0 = (self.min[axis] - origin) * inv;
            let mut t1 = (self.max[axis] - origin) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
}

impl Ray {
    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ColliderId(pub u32);

/// What a ray hit, as far as movement is concerned.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ColliderClass {
    Solid,
    TeleportTrigger(PortalId),
    OtherTrigger,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    pub collider: ColliderId,
    pub class: ColliderClass,
    pub layer: LayerMask,
}

#[derive(Debug, Copy, Clone)]
pub struct QueryFilter<'a> {
    pub mask: LayerMask,
    pub exclude: &'a [ColliderId],
}

impl QueryFilter<'_> {
    pub fn accepts(&self, collider: ColliderId, layer: LayerMask) -> bool {
        self.mask.intersects(layer) && !self.exclude.contains(&collider)
    }
}

/// Nearest-hit ray queries against static geometry.
pub trait PhysicsQuery {
    fn cast(&self, ray: &Ray, max_distance: f32, filter: &QueryFilter<'_>) -> Option<RayHit>;
}

#[derive(Debug, Copy, Clone)]
pub enum ColliderShape {
    /// Double-sided rectangle spanned by `right` and `up` around `center`.
    Quad {
        center: Vec3,
        normal: Vec3,
        right: Vec3,
        up: Vec3,
        half_extents: Vec2,
    },
    Box(AABB),
}

impl ColliderShape {
    fn ray_distance(&self, ray: &Ray, max_distance: f32) -> Option<f32> {
        match *self {
            Self::Quad {
                center,
                normal,
                right,
                up,
                half_extents,
            } => {
                let denom = ray.direction.dot(normal);
                if denom.abs() < PARALLEL_EPSILON {
                    return None;
                }
                let distance = (center - ray.origin).dot(normal) / denom;
                if !(0.0..=max_distance).contains(&distance) {
                    return None;
                }
                let local = ray.at(distance) - center;
                if local.dot(right).abs() > half_extents.x || local.dot(up).abs() > half_extents.y {
                    return None;
                }
                Some(distance)
            }
            Self::Box(aabb) => aabb.ray_entry(ray, max_distance),
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct Collider {
    pub shape: ColliderShape,
    pub class: ColliderClass,
    pub layer: LayerMask,
}

/// Flat list of static colliders, good enough for rooms built from a few
/// dozen walls and portal faces.
#[derive(Debug, Default)]
pub struct StaticScene {
    colliders: Vec<Collider>,
}

impl StaticScene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, collider: Collider) -> ColliderId {
        let id = ColliderId(self.colliders.len() as u32);
        self.colliders.push(collider);
        id
    }

    pub fn add_solid_box(&mut self, min: Vec3, max: Vec3) -> ColliderId {
        self.add(Collider {
            shape: ColliderShape::Box(AABB { min, max }),
            class: ColliderClass::Solid,
            layer: LayerMask::DEFAULT,
        })
    }

    pub fn get(&self, id: ColliderId) -> Option<&Collider> {
        self.colliders.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.colliders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colliders.is_empty()
    }
}

impl PhysicsQuery for StaticScene {
    fn cast(&self, ray: &Ray, max_distance: f32, filter: &QueryFilter<'_>) -> Option<RayHit> {
        let mut nearest: Option<RayHit> = None;
        for (index, collider) in self.colliders.iter().enumerate() {
            let id = ColliderId(index as u32);
            if !filter.accepts(id, collider.layer) {
                continue;
            }
            let limit = nearest.map_or(max_distance, |hit| hit.distance);
            let Some(distance) = collider.shape.ray_distance(ray, limit) else {
                continue;
            };
            if nearest.is_some_and(|hit| hit.distance <= distance) {
                continue;
            }
            nearest = Some(RayHit {
                distance,
                collider: id,
                class: collider.class,
                layer: collider.layer,
            });
        }
        nearest
    }
}

#[cfg(test)]
mod tests {
    use glam::{Vec2, Vec3};

    use super::{
        ColliderClass, ColliderShape, Collider, LayerMask, PhysicsQuery, QueryFilter, Ray,
        StaticScene, AABB,
    };

    fn all_layers() -> QueryFilter<'static> {
        QueryFilter {
            mask: LayerMask::all(),
            exclude: &[],
        }
    }

    #[test]
    fn aabb_collision_detection() {
        let a = AABB {
            min: Vec3::new(0.0, 0.0, 0.0),
            max: Vec3::new(1.0, 1.0, 1.0),
        };
        let b = AABB {
            min: Vec3::new(0.5, 0.25, 0.5),
            max: Vec3::new(1.5, 1.25, 1.5),
        };
        let c = AABB {
            min: Vec3::new(1.0, 1.0, 1.0),
            max: Vec3::new(2.0, 2.0, 2.0),
        };

        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn cast_returns_nearest_accepted_hit() {
        let mut scene = StaticScene::new();
        let far_wall = scene.add_solid_box(Vec3::new(-1.0, -1.0, -10.0), Vec3::new(1.0, 1.0, -9.0));
        let trigger = scene.add(Collider {
            shape: ColliderShape::Quad {
                center: Vec3::new(0.0, 0.0, -4.0),
                normal: Vec3::Z,
                right: Vec3::X,
                up: Vec3::Y,
                half_extents: Vec2::new(1.0, 1.0),
            },
            class: ColliderClass::OtherTrigger,
            layer: LayerMask::TRIGGER,
        });
        let ray = Ray {
            origin: Vec3::ZERO,
            direction: Vec3::NEG_Z,
        };

        let hit = scene.cast(&ray, 20.0, &all_layers()).expect("hit trigger");
        assert_eq!(hit.collider, trigger);
        assert!((hit.distance - 4.0).abs() < 1e-5);

        let skip_trigger = QueryFilter {
            mask: LayerMask::all(),
            exclude: &[trigger],
        };
        let hit = scene.cast(&ray, 20.0, &skip_trigger).expect("hit wall");
        assert_eq!(hit.collider, far_wall);
        assert!((hit.distance - 9.0).abs() < 1e-5);

        let solids_only = QueryFilter {
            mask: LayerMask::DEFAULT,
            exclude: &[],
        };
        assert_eq!(scene.cast(&ray, 20.0, &solids_only).map(|hit| hit.collider), Some(far_wall));
        assert!(scene.cast(&ray, 8.0, &solids_only).is_none());
    }

    #[test]
    fn quad_misses_outside_its_extents_and_when_parallel() {
        let mut scene = StaticScene::new();
        scene.add(Collider {
            shape: ColliderShape::Quad {
                center: Vec3::new(0.0, 0.0, -2.0),
                normal: Vec3::Z,
                right: Vec3::X,
                up: Vec3::Y,
                half_extents: Vec2::new(0.5, 1.0),
            },
            class: ColliderClass::Solid,
            layer: LayerMask::DEFAULT,
        });

        let beside = Ray {
            origin: Vec3::new(0.6, 0.0, 0.0),
            direction: Vec3::NEG_Z,
        };
        assert!(scene.cast(&beside, 10.0, &all_layers()).is_none());

        let parallel = Ray {
            origin: Vec3::new(-5.0, 0.0, -2.0),
            direction: Vec3::X,
        };
        assert!(scene.cast(&parallel, 10.0, &all_layers()).is_none());
    }

    #[test]
    fn ray_starting_inside_a_box_hits_immediately() {
        let mut scene = StaticScene::new();
        scene.add_solid_box(Vec3::splat(-1.0), Vec3::splat(1.0));
        let ray = Ray {
            origin: Vec3::ZERO,
            direction: Vec3::X,
        };
        let hit = scene.cast(&ray, 5.0, &all_layers()).expect("inside");
        assert_eq!(hit.distance, 0.0);
    }
}
