use faer::prelude::*;
use glam::{DMat3, DVec3};

/// Gauss-Newton normal equations `H * dx = -g` over a 6-dof pose increment.
#[derive(Debug, Clone, Copy)]
pub(crate) struct NormalEquations {
    hessian: [[f64; 6]; 6],
    gradient: [f64; 6],
    /// Accumulated cost of the linearization point.
    pub cost: f64,
    /// Number of residuals added.
    pub num_correspondences: usize,
}

impl Default for NormalEquations {
    fn default() -> Self {
        Self {
            hessian: [[0.0; 6]; 6],
            gradient: [0.0; 6],
            cost: 0.0,
            num_correspondences: 0,
        }
    }
}

impl NormalEquations {
    /// Add one residual `e` with jacobian columns `jacobian` and weight matrix `weight`.
    pub fn add(&mut self, jacobian: &[DVec3; 6], weight: &DMat3, residual: DVec3, cost: f64) {
        let weighted = jacobian.map(|column| *weight * column);
        let weighted_residual = *weight * residual;

        for (a, col_a) in jacobian.iter().enumerate() {
            for (b, weighted_b) in weighted.iter().enumerate().skip(a) {
                let value = col_a.dot(*weighted_b);
                self.hessian[a][b] += value;
                if a != b {
                    self.hessian[b][a] += value;
                }
            }
            self.gradient[a] += col_a.dot(weighted_residual);
        }

        self.cost += cost;
        self.num_correspondences += 1;
    }

    /// Merge two partial accumulations.
    pub fn merge(mut self, other: NormalEquations) -> NormalEquations {
        for (row, other_row) in self.hessian.iter_mut().zip(other.hessian.iter()) {
            for (h, o) in row.iter_mut().zip(other_row.iter()) {
                *h += o;
            }
        }
        for (g, o) in self.gradient.iter_mut().zip(other.gradient.iter()) {
            *g += o;
        }
        self.cost += other.cost;
        self.num_correspondences += other.num_correspondences;
        self
    }

    /// Solve for the increment with a Cholesky factorization.
    ///
    /// Returns `None` when the system is not positive definite or the solution
    /// is not finite.
    pub fn solve(&self) -> Option<[f64; 6]> {
        let hessian = Mat::<f64>::from_fn(6, 6, |i, j| self.hessian[i][j]);
        let rhs = Mat::<f64>::from_fn(6, 1, |i, _| -self.gradient[i]);

        let llt = hessian.cholesky(faer::Side::Lower).ok()?;
        let solution = llt.solve(&rhs);

        let delta: [f64; 6] = std::array::from_fn(|i| solution[(i, 0)]);
        delta.iter().all(|v| v.is_finite()).then_some(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_solve_pure_translation() {
        // residuals of points shifted by +0.5 in x against their matches
        let mut equations = NormalEquations::default();
        let points = [
            DVec3::new(1.0, 0.0, 0.0),
            DVec3::new(0.0, 1.0, 0.0),
            DVec3::new(0.0, 0.0, 1.0),
            DVec3::new(-1.0, 0.0, 0.0),
            DVec3::new(0.0, -1.0, 0.0),
            DVec3::new(0.0, 0.0, -1.0),
        ];
        for p in points {
            let q = p + DVec3::new(0.5, 0.0, 0.0);
            let residual = q - p;
            let jacobian = crate::linalg::point_jacobian(q);
            equations.add(&jacobian, &DMat3::IDENTITY, residual, residual.length_squared());
        }
        assert_eq!(equations.num_correspondences, 6);

        let delta = equations.solve().expect("system should be well conditioned");
        let step = crate::RigidTransform::from_twist(&delta);
        for p in points {
            let q = p + DVec3::new(0.5, 0.0, 0.0);
            let moved = step.transform_point(q);
            assert_relative_eq!(moved.x, p.x, epsilon = 1e-9);
            assert_relative_eq!(moved.y, p.y, epsilon = 1e-9);
            assert_relative_eq!(moved.z, p.z, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_singular_system() {
        let mut equations = NormalEquations::default();
        let q = DVec3::new(1.0, 0.0, 0.0);
        equations.add(&crate::linalg::point_jacobian(q), &DMat3::IDENTITY, DVec3::X, 1.0);
        assert!(equations.solve().is_none());
    }

    #[test]
    fn test_merge() {
        let mut a = NormalEquations::default();
        let mut b = NormalEquations::default();
        let q = DVec3::new(1.0, 2.0, 3.0);
        a.add(&crate::linalg::point_jacobian(q), &DMat3::IDENTITY, DVec3::X, 1.0);
        b.add(&crate::linalg::point_jacobian(q), &DMat3::IDENTITY, DVec3::Y, 2.0);
        let merged = a.merge(b);
        assert_eq!(merged.num_correspondences, 2);
        assert_relative_eq!(merged.cost, 3.0);
    }
}
