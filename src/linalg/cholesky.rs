use super::{ordering::reverse_cuthill_mckee, sparse_matrix::SparseMatrix, SolveError};
use nalgebra::DMatrix;
use nalgebra_sparse::factorization::CscCholesky;

/// Solve `A x = b` for a symmetric positive definite [SparseMatrix] `A`
///
/// The system is symmetrically scaled to a unit diagonal (Jacobi scaling) and reordered with
/// Reverse Cuthill-McKee before being factored with a sparse Cholesky decomposition.
pub fn solve_spd(a: &SparseMatrix, b: &[f64]) -> Result<Vec<f64>, SolveError> {
    let n = a.dimension;
    if b.len() != n {
        return Err(SolveError::DimensionMismatch {
            matrix: n,
            rhs: b.len(),
        });
    }
    if n == 0 {
        return Ok(Vec::new());
    }

    let diagonal = a.diagonal();
    if let Some(row) = diagonal.iter().position(|d| *d <= 0.0 || !d.is_finite()) {
        return Err(SolveError::NonPositivePivot(row));
    }
    let scaling: Vec<f64> = diagonal.iter().map(|d| 1.0 / d.sqrt()).collect();

    let permutation = reverse_cuthill_mckee(&a.adjacency());
    let csc = a.to_scaled_csc(&permutation, &scaling);

    let mut rhs = vec![0.0; n];
    for (old_idx, value) in b.iter().enumerate() {
        rhs[permutation[old_idx]] = value * scaling[old_idx];
    }

    let cholesky = CscCholesky::factor(&csc).map_err(|_| SolveError::NotPositiveDefinite)?;
    let y = cholesky.solve(&DMatrix::from_column_slice(n, 1, &rhs));

    let x: Vec<f64> = (0..n)
        .map(|old_idx| y[(permutation[old_idx], 0)] * scaling[old_idx])
        .collect();

    if x.iter().all(|v| v.is_finite()) {
        Ok(x)
    } else {
        Err(SolveError::NotPositiveDefinite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tridiagonal_system() {
        // 1D Laplacian (Dirichlet) with a known solution
        let n = 12;
        let mut a = SparseMatrix::new(n);
        for i in 0..n {
            a.insert([i, i], 2.0);
            if i + 1 < n {
                a.insert([i, i + 1], -1.0);
            }
        }

        let expected: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin() + 1.0).collect();
        let dense = DMatrix::from(a.clone());
        let b: Vec<f64> = (0..n)
            .map(|r| (0..n).map(|c| dense[(r, c)] * expected[c]).sum())
            .collect();

        let x = solve_spd(&a, &b).unwrap();
        for (xi, ei) in x.iter().zip(expected.iter()) {
            assert!((xi - ei).abs() < 1e-12);
        }
    }

    #[test]
    fn badly_scaled_diagonal() {
        let mut a = SparseMatrix::new(3);
        a.insert([0, 0], 1e8);
        a.insert([1, 1], 1e-6);
        a.insert([2, 2], 3.0);
        a.insert([0, 2], 1.0);

        let x = solve_spd(&a, &[1e8 + 2.0, 2e-6, 7.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 2.0).abs() < 1e-12);
        assert!((x[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn indefinite_systems_are_rejected() {
        let mut a = SparseMatrix::new(2);
        a.insert([0, 0], 1.0);
        a.insert([1, 1], 1.0);
        a.insert([0, 1], 2.0);
        assert_eq!(solve_spd(&a, &[1.0, 1.0]), Err(SolveError::NotPositiveDefinite));

        let mut b = SparseMatrix::new(2);
        b.insert([0, 0], 1.0);
        assert_eq!(solve_spd(&b, &[1.0, 1.0]), Err(SolveError::NonPositivePivot(1)));

        assert_eq!(
            solve_spd(&b, &[1.0]),
            Err(SolveError::DimensionMismatch { matrix: 2, rhs: 1 })
        );
    }
}
