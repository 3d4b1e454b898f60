use glam::{DMat3, DVec3};

const MAX_SWEEPS: usize = 32;

/// Eigen decomposition of a symmetric 3x3 matrix with cyclic Jacobi rotations.
///
/// Returns the eigenvalues and a matrix whose columns are the matching unit
/// eigenvectors. The eigenvalues are not sorted.
pub(crate) fn symmetric_eigen3(mat: &DMat3) -> (DVec3, DMat3) {
    // row major copy, symmetric so rows and columns coincide
    let mut a = mat.transpose().to_cols_array_2d();
    let mut v = DMat3::IDENTITY.to_cols_array_2d();

    for _ in 0..MAX_SWEEPS {
        let off = a[0][1] * a[0][1] + a[0][2] * a[0][2] + a[1][2] * a[1][2];
        let scale = a.iter().flatten().map(|x| x * x).sum::<f64>();
        if off <= f64::EPSILON * f64::EPSILON * scale {
            break;
        }

        for (p, q) in [(0, 1), (0, 2), (1, 2)] {
            if a[p][q] == 0.0 {
                continue;
            }
            let theta = (a[q][q] - a[p][p]) / (2.0 * a[p][q]);
            let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
            let c = 1.0 / (t * t + 1.0).sqrt();
            let s = t * c;

            for row in a.iter_mut() {
                let (akp, akq) = (row[p], row[q]);
                row[p] = c * akp - s * akq;
                row[q] = s * akp + c * akq;
            }
            for k in 0..3 {
                let (apk, aqk) = (a[p][k], a[q][k]);
                a[p][k] = c * apk - s * aqk;
                a[q][k] = s * apk + c * aqk;
            }
            for row in v.iter_mut() {
                let (vkp, vkq) = (row[p], row[q]);
                row[p] = c * vkp - s * vkq;
                row[q] = s * vkp + c * vkq;
            }
        }
    }

    let eigenvalues = DVec3::new(a[0][0], a[1][1], a[2][2]);
    // v is row major, columns hold the eigenvectors
    let eigenvectors = DMat3::from_cols_array_2d(&v).transpose();
    (eigenvalues, eigenvectors)
}

/// Mean and covariance (normalized by `n`) of a set of points.
pub(crate) fn mean_and_covariance<I>(points: I) -> Option<(DVec3, DMat3)>
where
    I: Iterator<Item = DVec3> + Clone,
{
    let (sum, count) = points
        .clone()
        .fold((DVec3::ZERO, 0usize), |(sum, n), p| (sum + p, n + 1));
    if count == 0 {
        return None;
    }
    let mean = sum / count as f64;

    let mut cov = DMat3::ZERO;
    for p in points {
        let d = p - mean;
        cov += DMat3::from_cols(d * d.x, d * d.y, d * d.z);
    }

    Some((mean, cov * (1.0 / count as f64)))
}

/// Replace the eigenvalues of a covariance by `(1, 1, epsilon)`, keeping its
/// orientation. The smallest eigenvalue gets `epsilon`, modelling a local plane.
pub(crate) fn plane_regularized(cov: &DMat3, epsilon: f64) -> DMat3 {
    let (eigenvalues, u) = symmetric_eigen3(cov);
    let smallest = (0..3)
        .min_by(|&i, &j| eigenvalues[i].total_cmp(&eigenvalues[j]))
        .unwrap_or(2);
    let mut diag = DVec3::ONE;
    diag[smallest] = epsilon;
    u * DMat3::from_diagonal(diag) * u.transpose()
}

/// Inverse of a covariance whose small eigenvalues are lifted to
/// `min_ratio * max_eigenvalue`. Returns `None` for degenerate input.
pub(crate) fn regularized_inverse(cov: &DMat3, min_ratio: f64) -> Option<DMat3> {
    let (eigenvalues, u) = symmetric_eigen3(cov);
    let max = eigenvalues.max_element();
    if !max.is_finite() || max <= 0.0 {
        return None;
    }
    let floor = max * min_ratio;
    let inv_diag = eigenvalues.max(DVec3::splat(floor)).recip();
    Some(u * DMat3::from_diagonal(inv_diag) * u.transpose())
}

/// Cross product matrix columns of the point jacobian under a left
/// perturbation `[w, v]`: `d(exp(xi) * q) / d xi`.
#[inline]
pub(crate) fn point_jacobian(q: DVec3) -> [DVec3; 6] {
    [
        DVec3::X.cross(q),
        DVec3::Y.cross(q),
        DVec3::Z.cross(q),
        DVec3::X,
        DVec3::Y,
        DVec3::Z,
    ]
}
