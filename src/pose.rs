use nalgebra::{Matrix4, Quaternion, UnitQuaternion, Vector4};

use crate::types::Point3D;

/// Rigid camera-to-world transform.
///
/// Stored as a 4x4 matrix; nalgebra's storage is column-major, so
/// [`CameraPose::to_column_major`] is the usual OpenGL 16-float layout with
/// translation at indices 12, 13, 14. Equality is exact, element by element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    matrix: Matrix4<f32>,
}

impl CameraPose {
    pub fn identity() -> Self {
        Self { matrix: Matrix4::identity() }
    }

    pub fn from_matrix(matrix: Matrix4<f32>) -> Self {
        Self { matrix }
    }

    pub fn from_column_major(m: &[f32; 16]) -> Self {
        Self { matrix: Matrix4::from_column_slice(m) }
    }

    pub fn matrix(&self) -> &Matrix4<f32> {
        &self.matrix
    }

    pub fn to_column_major(&self) -> [f32; 16] {
        let mut out = [0.0; 16];
        out.copy_from_slice(self.matrix.as_slice());
        out
    }

    pub fn tx(&self) -> f32 {
        self.matrix[(0, 3)]
    }

    pub fn ty(&self) -> f32 {
        self.matrix[(1, 3)]
    }

    pub fn tz(&self) -> f32 {
        self.matrix[(2, 3)]
    }

    pub fn translation(&self) -> [f32; 3] {
        [self.tx(), self.ty(), self.tz()]
    }

    /// `pose * [x, y, z, 1]ᵀ`; color is carried over untouched.
    pub fn transform_point(&self, point: &Point3D) -> Point3D {
        let p = self.matrix * Vector4::new(point.x, point.y, point.z, 1.0);
        point.moved_to(p.x, p.y, p.z)
    }
}

impl Default for CameraPose {
    fn default() -> Self {
        Self::identity()
    }
}

/// Build a pose from a TUM-style record (`tx ty tz qx qy qz qw`).
///
/// The quaternion is normalized first. A zero or non-finite quaternion has
/// no orientation to recover and falls back to the identity rotation.
pub fn pose_from_quaternion(
    tx: f32,
    ty: f32,
    tz: f32,
    qx: f32,
    qy: f32,
    qz: f32,
    qw: f32,
) -> CameraPose {
    let q = Quaternion::new(qw, qx, qy, qz);
    let norm = q.norm();
    let rotation = if norm.is_finite() && norm > f32::EPSILON {
        UnitQuaternion::from_quaternion(q)
    } else {
        tracing::warn!(qx, qy, qz, qw, "degenerate quaternion, using identity rotation");
        UnitQuaternion::identity()
    };

    let mut m = rotation.to_rotation_matrix().to_homogeneous();
    m[(0, 3)] = tx;
    m[(1, 3)] = ty;
    m[(2, 3)] = tz;
    CameraPose::from_matrix(m)
}

pub fn transform_point(point: &Point3D, pose: &CameraPose) -> Point3D {
    pose.transform_point(point)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f32::consts::FRAC_1_SQRT_2;

    #[test]
    fn identity_quaternion_is_identity_pose() {
        let pose = pose_from_quaternion(0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0);
        assert_eq!(pose, CameraPose::identity());
    }

    #[test]
    fn identity_transform_is_noop() {
        let p = Point3D::with_color(1.5, -2.25, 7.0, [10, 20, 30, 255]);
        assert_eq!(transform_point(&p, &CameraPose::identity()), p);
    }

    #[test]
    fn translation_lives_in_last_column() {
        let pose = pose_from_quaternion(1.0, 2.0, 3.0, 0.0, 0.0, 0.0, 1.0);
        let m = pose.to_column_major();
        assert_eq!(&m[12..15], &[1.0, 2.0, 3.0]);
        assert_eq!(m[15], 1.0);
        assert_eq!([m[3], m[7], m[11]], [0.0, 0.0, 0.0]);
        assert_eq!(pose.translation(), [1.0, 2.0, 3.0]);
    }

    #[test]
    fn quarter_turn_about_z() {
        // 90 degrees about +z maps +x onto +y.
        let pose = pose_from_quaternion(0.0, 0.0, 1.0, 0.0, 0.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2);
        let p = pose.transform_point(&Point3D::new(1.0, 0.0, 0.0));
        assert_relative_eq!(p.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(p.y, 1.0, epsilon = 1e-6);
        assert_relative_eq!(p.z, 1.0, epsilon = 1e-6);
        assert_eq!(p.color, crate::types::POINT_COLOR);
    }

    #[test]
    fn non_unit_quaternion_is_normalized() {
        let scaled = pose_from_quaternion(0.0, 0.0, 0.0, 0.0, 0.0, 2.0, 2.0);
        let unit = pose_from_quaternion(0.0, 0.0, 0.0, 0.0, 0.0, FRAC_1_SQRT_2, FRAC_1_SQRT_2);
        assert_relative_eq!(*scaled.matrix(), *unit.matrix(), epsilon = 1e-6);
    }

    #[test]
    fn zero_quaternion_falls_back_to_identity_rotation() {
        let pose = pose_from_quaternion(4.0, 5.0, 6.0, 0.0, 0.0, 0.0, 0.0);
        let p = pose.transform_point(&Point3D::new(1.0, 1.0, 1.0));
        assert_eq!(p.xyz(), [5.0, 6.0, 7.0]);
    }

    #[test]
    fn column_major_round_trip() {
        let pose = pose_from_quaternion(0.5, -1.0, 2.0, 0.1, 0.2, 0.3, 0.9);
        assert_eq!(CameraPose::from_column_major(&pose.to_column_major()), pose);
    }
}
