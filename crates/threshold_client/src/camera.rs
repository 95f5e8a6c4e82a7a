use glam::{Mat4, Quat, Vec3};
use threshold_shared::teleport::Pose;

pub type FrustumPlanes = [[f32; 4]; 6];

#[derive(Debug, Clone)]
pub struct Camera {
    pub pose: Pose,
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            pose: Pose::new(Vec3::new(0.0, 1.7, 0.0), Quat::IDENTITY),
            fov: 70.0_f32.to_radians(),
            aspect: 16.0 / 9.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera {
    pub fn with_pose(&self, pose: Pose) -> Self {
        Self {
            pose,
            ..self.clone()
        }
    }

    /// Turns about the world up axis.
    pub fn turn(&mut self, yaw: f32) {
        self.pose.rotation = (Quat::from_rotation_y(yaw) * self.pose.rotation).normalize();
    }

    /// Applies the correction a teleport reported for the body carrying
    /// this camera.
    pub fn apply_rotation_delta(&mut self, delta: Quat) {
        self.pose.rotation = (delta * self.pose.rotation).normalize();
    }

    pub fn forward_direction(&self) -> Vec3 {
        self.pose.forward().normalize_or_zero()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.pose.position, self.pose.forward(), self.pose.up())
    }

    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh(
            self.fov,
            self.aspect.max(0.0001),
            self.near.max(0.0001),
            self.far.max(self.near + 0.0001),
        )
    }

    pub fn view_projection_matrix(&self) -> Mat4 {
        self.projection_matrix() * self.view_matrix()
    }
}

pub fn extract_frustum_planes(vp: Mat4) -> FrustumPlanes {
    let m = vp.to_cols_array_2d();
    let row0 = [m[0][0], m[1][0], m[2][0], m[3][0]];
    let row1 = [m[0][1], m[1][1], m[2][1], m[3][1]];
    let row2 = [m[0][2], m[1][2], m[2][2], m[3][2]];
    let row3 = [m[0][3], m[1][3], m[2][3], m[3][3]];

    let planes = [
        [row3[0] + row0[0], row3[1] + row0[1], row3[2] + row0[2], row3[3] + row0[3]],
        [row3[0] - row0[0], row3[1] - row0[1], row3[2] - row0[2], row3[3] - row0[3]],
        [row3[0] + row1[0], row3[1] + row1[1], row3[2] + row1[2], row3[3] + row1[3]],
        [row3[0] - row1[0], row3[1] - row1[1], row3[2] - row1[2], row3[3] - row1[3]],
        // Depth runs 0..1, so the near plane is the z row on its own.
        [row2[0], row2[1], row2[2], row2[3]],
        [row3[0] - row2[0], row3[1] - row2[1], row3[2] - row2[2], row3[3] - row2[3]],
    ];

    let mut result = [[0.0f32; 4]; 6];
    for (i, p) in planes.iter().enumerate() {
        let len = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
        if len > 0.0001 {
            result[i] = [p[0] / len, p[1] / len, p[2] / len, p[3] / len];
        }
    }
    result
}

pub fn sphere_in_frustum(planes: &FrustumPlanes, center: Vec3, radius: f32) -> bool {
    for plane in planes {
        let distance = plane[0] * center.x + plane[1] * center.y + plane[2] * center.z + plane[3];
        if distance < -radius {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use glam::{Quat, Vec3};
    use threshold_shared::teleport::Pose;

    use super::{extract_frustum_planes, sphere_in_frustum, Camera};

    #[test]
    fn default_camera_looks_down_negative_z() {
        let camera = Camera::default();
        assert!(camera.forward_direction().abs_diff_eq(Vec3::NEG_Z, 1e-6));
    }

    #[test]
    fn turning_a_quarter_left_faces_negative_x() {
        let mut camera = Camera::default();
        camera.turn(FRAC_PI_2);
        assert!(camera.forward_direction().abs_diff_eq(Vec3::NEG_X, 1e-5));
    }

    #[test]
    fn frustum_keeps_points_ahead_and_rejects_points_behind() {
        let camera = Camera {
            pose: Pose::new(Vec3::ZERO, Quat::IDENTITY),
            ..Camera::default()
        };
        let planes = extract_frustum_planes(camera.view_projection_matrix());
        assert!(sphere_in_frustum(&planes, Vec3::new(0.0, 0.0, -10.0), 0.5));
        assert!(!sphere_in_frustum(&planes, Vec3::new(0.0, 0.0, 10.0), 0.5));
        assert!(!sphere_in_frustum(&planes, Vec3::new(500.0, 0.0, -10.0), 0.5));
    }
}
