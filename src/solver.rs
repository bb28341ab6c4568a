//! Dense linear solves for solution construction.
//!
//! Building a solution to target concentrations reduces to a small square
//! linear system over the unknown amounts of each component. The system is
//! solved by LU decomposition; a singular matrix means the constraints do not
//! pin down a unique composition and is reported as a domain error rather
//! than a panic.

use nalgebra::{DMatrix, DVector};

use crate::{DomainError, Result};

/// Solves `a * x = b` by LU decomposition.
pub fn solve_dense(a: DMatrix<f64>, b: DVector<f64>) -> Result<DVector<f64>> {
    let decomposition = a.lu();
    decomposition
        .solve(&b)
        .ok_or_else(|| DomainError::SingularSystem.into())
}

/// Checks that `x` satisfies `a * x = b` within `tol` in the max norm.
///
/// LU happily returns garbage for nearly singular systems; callers reject
/// those solutions here instead of handing users a container with impossible
/// contents.
pub fn verify_solution(a: &DMatrix<f64>, x: &DVector<f64>, b: &DVector<f64>, tol: f64) -> bool {
    let residual = a * x - b;
    residual.iter().all(|r| r.abs() <= tol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn test_solves_well_conditioned_system() {
        let a = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let b = DVector::from_row_slice(&[5.0, 10.0]);
        let x = solve_dense(a.clone(), b.clone()).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-10);
        assert!((x[1] - 3.0).abs() < 1e-10);
        assert!(verify_solution(&a, &x, &b, 1e-9));
    }

    #[test]
    fn test_singular_system_is_a_domain_error() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let b = DVector::from_row_slice(&[1.0, 3.0]);
        let result = solve_dense(a, b);
        assert!(matches!(
            result,
            Err(Error::Domain(DomainError::SingularSystem))
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_solution() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, 1.0]);
        let b = DVector::from_row_slice(&[1.0, 1.0]);
        let x = DVector::from_row_slice(&[1.0, 2.0]);
        assert!(!verify_solution(&a, &x, &b, 1e-6));
    }
}
