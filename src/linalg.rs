/// Sparse Cholesky solver for symmetric positive definite systems
pub mod cholesky;
/// Elimination of linear constraints between local coefficients
pub mod constraints;
/// Bandwidth reducing orderings
pub mod ordering;
/// Sparsely Packed Matrix
pub mod sparse_matrix;

use sparse_matrix::{print_vec_to_petsc_binary_file, AIJMatrixBinary, SparseMatrix};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SolveError {
    #[error("Matrix has dimension {matrix}, but the right-hand-side has length {rhs}")]
    DimensionMismatch { matrix: usize, rhs: usize },
    #[error("Diagonal entry {0} is not positive; Matrix is not positive definite!")]
    NonPositivePivot(usize),
    #[error("Cholesky factorization failed; Matrix is not positive definite!")]
    NotPositiveDefinite,
}

/// Symmetric linear system
///
/// A x = b
#[derive(Clone, Debug)]
pub struct LinearSystem {
    /// A Matrix
    pub a: SparseMatrix,
    /// Right-hand-side
    pub b: Vec<f64>,
}

impl LinearSystem {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            a: SparseMatrix::new(num_dofs),
            b: vec![0.0; num_dofs],
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.a.dimension
    }

    pub fn solve(&self) -> Result<Vec<f64>, SolveError> {
        cholesky::solve_spd(&self.a, &self.b)
    }

    /// Write `{prefix}_a.dat` and `{prefix}_b.dat` into `dir` so the system can be handed to an external (Petsc based) solver
    pub fn print_to_petsc_binary_files(
        &self,
        dir: impl AsRef<Path>,
        prefix: impl AsRef<str>,
    ) -> std::io::Result<()> {
        let a: AIJMatrixBinary = self.a.clone().into();
        let a_path = dir.as_ref().join(format!("{}_a.dat", prefix.as_ref()));
        let b_path = dir.as_ref().join(format!("{}_b.dat", prefix.as_ref()));

        a.print_to_petsc_binary_file(a_path.to_string_lossy())?;
        print_vec_to_petsc_binary_file(&self.b, b_path.to_string_lossy())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solve_and_export() {
        let mut system = LinearSystem::new(2);
        system.a.insert([0, 0], 2.0);
        system.a.insert([1, 1], 2.0);
        system.a.insert([0, 1], 1.0);
        system.b = vec![3.0, 3.0];

        let x = system.solve().unwrap();
        assert!((x[0] - 1.0).abs() < 1e-14 && (x[1] - 1.0).abs() < 1e-14);

        let dir = std::env::temp_dir();
        system
            .print_to_petsc_binary_files(&dir, "hp_adapt_linear_system")
            .unwrap();

        // class id + length + 2 values
        let b_bytes = std::fs::read(dir.join("hp_adapt_linear_system_b.dat")).unwrap();
        assert_eq!(b_bytes.len(), 4 + 4 + 16);
    }
}
