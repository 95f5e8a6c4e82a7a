use std::f32::consts::PI;
use std::fmt;

use glam::{Quat, Vec3};

const SCALE_EPSILON: f32 = 1.0e-4;

/// Position and orientation of a rigid body or camera.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    /// Looking down local -Z, matching glam's right-handed view convention.
    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }
}

/// World transform of a portal face. The face's front normal is local +Z.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalTransform {
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

impl PortalTransform {
    pub fn new(position: Vec3, rotation: Quat) -> Self {
        Self {
            position,
            rotation,
            scale: Vec3::ONE,
        }
    }

    pub fn normal(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    /// Signed distance of `point` from the face plane, positive in front.
    pub fn signed_distance(&self, point: Vec3) -> f32 {
        (point - self.position).dot(self.normal())
    }

    fn check_scale(&self) -> Result<(), TeleportError> {
        let scale = self.scale;
        if !scale.is_finite() || scale.min_element() <= SCALE_EPSILON {
            return Err(TeleportError::DegenerateScale(scale));
        }
        if (scale.x - scale.y).abs() > SCALE_EPSILON || (scale.x - scale.z).abs() > SCALE_EPSILON {
            return Err(TeleportError::NonUniformScale(scale));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TeleportError {
    DegenerateScale(Vec3),
    NonUniformScale(Vec3),
}

impl fmt::Display for TeleportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DegenerateScale(scale) => {
                write!(f, "portal transform has zero or negative scale {scale}")
            }
            Self::NonUniformScale(scale) => {
                write!(f, "portal transform has non-uniform scale {scale}")
            }
        }
    }
}

impl std::error::Error for TeleportError {}

/// Rigid transform taking anything in front of the source face to the
/// matching place in front of the target face. The target is turned half a
/// revolution about its up axis so that walking into the source means
/// walking out of the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TeleportTransform {
    source_position: Vec3,
    target_position: Vec3,
    rotation_delta: Quat,
}

impl TeleportTransform {
    pub fn between(
        source: &PortalTransform,
        target: &PortalTransform,
    ) -> Result<Self, TeleportError> {
        source.check_scale()?;
        target.check_scale()?;

        let flipped_target = target.rotation * Quat::from_rotation_y(PI);
        let rotation_delta = (flipped_target * source.rotation.inverse()).normalize();
        Ok(Self {
            source_position: source.position,
            target_position: target.position,
            rotation_delta,
        })
    }

    pub fn rotation_delta(&self) -> Quat {
        self.rotation_delta
    }

    pub fn inverse(&self) -> Self {
        Self {
            source_position: self.target_position,
            target_position: self.source_position,
            rotation_delta: self.rotation_delta.inverse(),
        }
    }

    pub fn point(&self, point: Vec3) -> Vec3 {
        self.target_position + self.rotation_delta * (point - self.source_position)
    }

    pub fn direction(&self, direction: Vec3) -> Vec3 {
        self.rotation_delta * direction
    }

    pub fn rotation(&self, rotation: Quat) -> Quat {
        (self.rotation_delta * rotation).normalize()
    }

    pub fn pose(&self, pose: &Pose) -> Pose {
        Pose {
            position: self.point(pose.position),
            rotation: self.rotation(pose.rotation),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, PI};

    use glam::{Quat, Vec3};

    use super::{Pose, PortalTransform, TeleportError, TeleportTransform};

    fn portal_pair() -> (PortalTransform, PortalTransform) {
        let a = PortalTransform::new(Vec3::new(1.0, 2.0, 3.0), Quat::from_rotation_y(0.3));
        let b = PortalTransform::new(
            Vec3::new(-40.0, 7.5, 12.0),
            Quat::from_euler(glam::EulerRot::YXZ, 2.1, 0.2, -0.1),
        );
        (a, b)
    }

    #[test]
    fn walking_into_source_walks_out_of_target() {
        let a = PortalTransform::new(Vec3::ZERO, Quat::IDENTITY);
        let b = PortalTransform::new(Vec3::new(10.0, 0.0, 0.0), Quat::from_rotation_y(FRAC_PI_2));
        let teleport = TeleportTransform::between(&a, &b).expect("valid portals");

        let into_a = -a.normal();
        let out_of_b = teleport.direction(into_a);
        assert!(out_of_b.abs_diff_eq(b.normal(), 1e-5), "{out_of_b}");

        let in_front_of_a = a.position + a.normal() * 2.0;
        let mapped = teleport.point(in_front_of_a);
        assert!(b.signed_distance(mapped) < 0.0);
        assert!((b.signed_distance(mapped) + 2.0).abs() < 1e-5);
    }

    #[test]
    fn round_trip_through_partner_is_identity() {
        let (a, b) = portal_pair();
        let there = TeleportTransform::between(&a, &b).expect("a->b");
        let back = TeleportTransform::between(&b, &a).expect("b->a");

        for point in [
            Vec3::ZERO,
            Vec3::new(5.0, -3.0, 8.0),
            Vec3::new(-100.0, 40.0, 0.5),
        ] {
            let round_trip = back.point(there.point(point));
            assert!(round_trip.abs_diff_eq(point, 1e-3), "{point} -> {round_trip}");
        }

        let pose = Pose::new(Vec3::new(2.0, 1.0, -4.0), Quat::from_rotation_x(0.4));
        let round_trip = back.pose(&there.pose(&pose));
        assert!(round_trip.rotation.abs_diff_eq(pose.rotation, 1e-5)
            || round_trip.rotation.abs_diff_eq(-pose.rotation, 1e-5));
    }

    #[test]
    fn inverse_matches_reverse_direction() {
        let (a, b) = portal_pair();
        let there = TeleportTransform::between(&a, &b).expect("a->b");
        let back = TeleportTransform::between(&b, &a).expect("b->a");
        let inverse = there.inverse();
        let point = Vec3::new(3.0, 3.0, 3.0);
        assert!(inverse.point(point).abs_diff_eq(back.point(point), 1e-4));
    }

    #[test]
    fn composed_rotation_matches_formula() {
        let (a, b) = portal_pair();
        let teleport = TeleportTransform::between(&a, &b).expect("a->b");
        let expected = b.rotation * Quat::from_rotation_y(PI) * a.rotation.inverse();
        let delta = teleport.rotation_delta();
        assert!(delta.abs_diff_eq(expected, 1e-5) || delta.abs_diff_eq(-expected, 1e-5));
        assert!(teleport.point(a.position).abs_diff_eq(b.position, 1e-5));
    }

    #[test]
    fn bad_scale_fails_fast() {
        let (mut a, b) = portal_pair();
        a.scale = Vec3::new(1.0, 2.0, 1.0);
        assert!(matches!(
            TeleportTransform::between(&a, &b),
            Err(TeleportError::NonUniformScale(_))
        ));

        a.scale = Vec3::ZERO;
        assert!(matches!(
            TeleportTransform::between(&b, &a),
            Err(TeleportError::DegenerateScale(_))
        ));

        a.scale = Vec3::splat(2.0);
        assert!(TeleportTransform::between(&a, &b).is_ok());
    }
}
