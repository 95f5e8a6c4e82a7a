use glam::{Quat, Vec3};
use tracing::{debug, warn};

use crate::physics::{ColliderClass, ColliderId, LayerMask, PhysicsQuery, QueryFilter, Ray};
use crate::portal::{PortalId, PortalNetwork};
use crate::teleport::Pose;

const MIN_MOVE_DISTANCE: f32 = 1.0e-6;
const MAX_TRACE_STEPS: usize = 16;

#[derive(Debug, Clone, Copy)]
pub struct TraceOptions {
    pub detect_teleport: bool,
    pub detect_solids: bool,
    pub mask: LayerMask,
}

impl Default for TraceOptions {
    fn default() -> Self {
        Self {
            detect_teleport: true,
            detect_solids: true,
            mask: LayerMask::all(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceResult {
    pub pose: Pose,
    /// Travel direction at the end of the trace, after any teleports.
    pub direction: Vec3,
    /// Composition of every teleport rotation applied during the trace.
    /// Callers reapply it to cameras and held objects.
    pub rotation_delta: Quat,
    pub travelled: f32,
    pub teleports: u32,
    pub blocked: bool,
    /// The step cap ran out before the full distance was covered.
    pub truncated: bool,
}

impl TraceResult {
    fn unmoved(pose: Pose, direction: Vec3) -> Self {
        Self {
            pose,
            direction,
            rotation_delta: Quat::IDENTITY,
            travelled: 0.0,
            teleports: 0,
            blocked: false,
            truncated: false,
        }
    }
}

struct RayTraceState {
    position: Vec3,
    rotation: Quat,
    direction: Vec3,
    remaining: f32,
    accumulated_rotation: Quat,
}

/// Moves a pose along a straight line, stopping at solids and passing
/// through portal triggers.
pub struct RayTraceMover<'a, P: PhysicsQuery> {
    physics: &'a P,
    portals: &'a PortalNetwork,
}

impl<'a, P: PhysicsQuery> RayTraceMover<'a, P> {
    pub fn new(physics: &'a P, portals: &'a PortalNetwork) -> Self {
        Self { physics, portals }
    }

    /// Moves `distance` along the pose's forward direction.
    pub fn advance(&self, pose: Pose, distance: f32, options: TraceOptions) -> TraceResult {
        let forward = pose.forward();
        if distance < 0.0 {
            return self.trace(pose, -forward, -distance, options);
        }
        self.trace(pose, forward, distance, options)
    }

    /// Moves by `movement` without changing where the pose is looking, other
    /// than the corrections applied by teleports.
    pub fn advance_along(&self, pose: Pose, movement: Vec3, options: TraceOptions) -> TraceResult {
        let distance = movement.length();
        if distance < MIN_MOVE_DISTANCE || !distance.is_finite() {
            return TraceResult::unmoved(pose, Vec3::ZERO);
        }
        self.trace(pose, movement / distance, distance, options)
    }

    fn trace(&self, pose: Pose, direction: Vec3, distance: f32, options: TraceOptions) -> TraceResult {
        if distance < MIN_MOVE_DISTANCE || !distance.is_finite() {
            return TraceResult::unmoved(pose, direction);
        }

        let mut mask = options.mask;
        if !options.detect_teleport {
            mask.remove(LayerMask::PORTAL_TRIGGER);
        }
        let mut ignored: Vec<ColliderId> = Vec::new();
        let mut state = RayTraceState {
            position: pose.position,
            rotation: pose.rotation,
            direction,
            remaining: distance,
            accumulated_rotation: Quat::IDENTITY,
        };
        let mut travelled = 0.0;
        let mut teleports = 0;
        let mut blocked = false;

        for _ in 0..MAX_TRACE_STEPS {
            if state.remaining < MIN_MOVE_DISTANCE {
                break;
            }

            let ray = Ray {
                origin: state.position,
                direction: state.direction,
            };
            let filter = QueryFilter {
                mask,
                exclude: &ignored,
            };
            let Some(hit) = self.physics.cast(&ray, state.remaining, &filter) else {
                state.position = ray.at(state.remaining);
                travelled += state.remaining;
                state.remaining = 0.0;
                break;
            };

            match hit.class {
                ColliderClass::Solid if options.detect_solids => {
                    state.position = ray.at(hit.distance);
                    travelled += hit.distance;
                    state.remaining = 0.0;
                    blocked = true;
                    break;
                }
                ColliderClass::TeleportTrigger(portal) if options.detect_teleport => {
                    if !self.enters_front(portal, state.direction) {
                        ignored.push(hit.collider);
                        continue;
                    }
                    let teleport = match self.portals.teleport_from(portal) {
                        Ok(teleport) => teleport,
                        Err(err) => {
                            debug!("passing through inactive portal trigger: {err}");
                            ignored.push(hit.collider);
                            continue;
                        }
                    };
                    state.position = teleport.point(ray.at(hit.distance));
                    state.remaining -= hit.distance;
                    travelled += hit.distance;
                    state.direction = teleport.direction(state.direction).normalize_or_zero();
                    state.rotation = teleport.rotation(state.rotation);
                    state.accumulated_rotation =
                        (teleport.rotation_delta() * state.accumulated_rotation).normalize();
                    // The exit face sits exactly at the new origin.
                    mask.remove(hit.layer);
                    ignored.clear();
                    teleports += 1;
                }
                _ => ignored.push(hit.collider),
            }
        }

        let truncated = !blocked && state.remaining >= MIN_MOVE_DISTANCE;
        if truncated {
            warn!(
                "ray trace hit the {MAX_TRACE_STEPS} step cap with {:.3} left to move",
                state.remaining
            );
        }

        TraceResult {
            pose: Pose::new(state.position, state.rotation),
            direction: state.direction,
            rotation_delta: state.accumulated_rotation,
            travelled,
            teleports,
            blocked,
            truncated,
        }
    }

    /// Portals only capture motion into their front face. Anything leaving
    /// through the face, or arriving from behind, passes through.
    fn enters_front(&self, portal: PortalId, direction: Vec3) -> bool {
        self.portals
            .get(portal)
            .is_some_and(|endpoint| direction.dot(endpoint.transform.normal()) < 0.0)
    }
}
