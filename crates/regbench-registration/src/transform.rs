use glam::{DMat3, DVec3};

/// A rigid body transformation mapping source coordinates into the target frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidTransform {
    /// Rotation matrix.
    pub rotation: DMat3,
    /// Translation vector.
    pub translation: DVec3,
}

impl Default for RigidTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl RigidTransform {
    /// The identity transformation.
    pub const IDENTITY: Self = Self {
        rotation: DMat3::IDENTITY,
        translation: DVec3::ZERO,
    };

    /// Create a transformation from a rotation matrix and a translation.
    pub fn new(rotation: DMat3, translation: DVec3) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build an increment from a twist `[wx, wy, wz, vx, vy, vz]`.
    ///
    /// The rotation is the exponential of the axis-angle vector `w`, the
    /// translation is `v` applied after it.
    pub fn from_twist(twist: &[f64; 6]) -> Self {
        let omega = DVec3::new(twist[0], twist[1], twist[2]);
        let angle = omega.length();
        let rotation = if angle > 1e-12 {
            DMat3::from_axis_angle(omega / angle, angle)
        } else {
            DMat3::IDENTITY
        };
        Self::new(rotation, DVec3::new(twist[3], twist[4], twist[5]))
    }

    /// Returns `self * other`, i.e. applies `other` first.
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        RigidTransform {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    /// The inverse transformation.
    pub fn inverse(&self) -> RigidTransform {
        let rotation = self.rotation.transpose();
        RigidTransform {
            rotation,
            translation: -(rotation * self.translation),
        }
    }

    /// Transform a single point.
    #[inline]
    pub fn transform_point(&self, point: DVec3) -> DVec3 {
        self.rotation * point + self.translation
    }

    /// Transform a set of points into a new vector.
    pub fn transform_points(&self, points: &[[f64; 3]]) -> Vec<[f64; 3]> {
        points
            .iter()
            .map(|p| self.transform_point(DVec3::from_array(*p)).to_array())
            .collect()
    }

    /// Rotation angle in radians.
    pub fn rotation_angle(&self) -> f64 {
        let cos = ((self.rotation.x_axis.x + self.rotation.y_axis.y + self.rotation.z_axis.z - 1.0)
            / 2.0)
            .clamp(-1.0, 1.0);
        cos.acos()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_twist_zero_is_identity() {
        assert_eq!(RigidTransform::from_twist(&[0.0; 6]), RigidTransform::IDENTITY);
    }

    #[test]
    fn test_compose_with_inverse() {
        let transform = RigidTransform::new(
            DMat3::from_axis_angle(DVec3::new(0.0, 0.6, 0.8), 0.3),
            DVec3::new(1.0, -2.0, 0.5),
        );
        let identity = transform.compose(&transform.inverse());
        let point = DVec3::new(0.3, 0.2, -0.7);
        let back = identity.transform_point(point);
        assert_relative_eq!(back.x, point.x, epsilon = 1e-12);
        assert_relative_eq!(back.y, point.y, epsilon = 1e-12);
        assert_relative_eq!(back.z, point.z, epsilon = 1e-12);
        assert_relative_eq!(transform.rotation_angle(), 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_transform_points() {
        let transform = RigidTransform::from_twist(&[0.0, 0.0, std::f64::consts::FRAC_PI_2, 1.0, 0.0, 0.0]);
        let points = transform.transform_points(&[[1.0, 0.0, 0.0]]);
        assert_relative_eq!(points[0][0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(points[0][1], 1.0, epsilon = 1e-12);
        assert_relative_eq!(points[0][2], 0.0, epsilon = 1e-12);
    }
}
