use glam::{DMat3, DVec3};
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::RigidTransform;

/// Three noisy orthogonal 2x2 m planes meeting at `(0.5, 0.5, 0.5)`.
pub(crate) fn box_corner(points_per_plane: usize, seed: u64) -> Vec<[f64; 3]> {
    let mut rng = StdRng::seed_from_u64(seed);
    let corner = 0.5;
    let mut points = Vec::with_capacity(3 * points_per_plane);
    for axis in 0..3 {
        for _ in 0..points_per_plane {
            let mut p = [0.0; 3];
            for (i, v) in p.iter_mut().enumerate() {
                *v = if i == axis {
                    corner + rng.random_range(-0.005..0.005)
                } else {
                    corner + rng.random_range(0.0..2.0)
                };
            }
            points.push(p);
        }
    }
    points
}

/// Three noise-free `n x n` grids with spacing `step` meeting at `(0.5, 0.5, 0.5)`.
///
/// Every point of a plane shares the plane coordinate exactly.
pub(crate) fn grid_corner(n: usize, step: f64) -> Vec<[f64; 3]> {
    let corner = 0.5;
    let mut points = Vec::with_capacity(3 * n * n);
    for axis in 0..3 {
        for i in 0..n {
            for j in 0..n {
                let mut p = [corner; 3];
                p[(axis + 1) % 3] += i as f64 * step;
                p[(axis + 2) % 3] += j as f64 * step;
                points.push(p);
            }
        }
    }
    points
}

/// The transformation used to displace the source in the alignment tests.
pub(crate) fn ground_truth() -> RigidTransform {
    RigidTransform::new(
        DMat3::from_axis_angle(DVec3::new(0.2, 0.1, 1.0).normalize(), 0.05),
        DVec3::new(0.1, -0.05, 0.08),
    )
}

/// `(target, source)` where `ground_truth` maps the source onto the target.
pub(crate) fn displaced_pair(points_per_plane: usize, seed: u64) -> (Vec<[f64; 3]>, Vec<[f64; 3]>) {
    let target = box_corner(points_per_plane, seed);
    let source = ground_truth().inverse().transform_points(&target);
    (target, source)
}

pub(crate) fn assert_transform_near(
    estimate: &RigidTransform,
    expected: &RigidTransform,
    max_angle: f64,
    max_translation: f64,
) {
    let error = estimate.inverse().compose(expected);
    assert!(
        error.rotation_angle() < max_angle,
        "rotation error {} >= {max_angle}",
        error.rotation_angle()
    );
    assert!(
        error.translation.length() < max_translation,
        "translation error {} >= {max_translation}",
        error.translation.length()
    );
}
