use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};

use bytes::{BufMut, BytesMut};
use nalgebra::DMatrix;
use nalgebra_sparse::{CooMatrix, CscMatrix};

/// Wrapper around a BTreeMap to store square-symmetric matrices in a sparse data structure
///
/// Only the upper triangle is stored.
#[derive(Clone, Debug)]
pub struct SparseMatrix {
    /// Size of the square matrix
    pub dimension: usize,
    /// Matrix Entries
    entries: BTreeMap<[u32; 2], f64>,
}

impl SparseMatrix {
    pub fn new(dimension: usize) -> Self {
        assert!(
            dimension <= (u32::MAX as usize),
            "Matrix Dimension cannot exceed the size of a u32!"
        );

        Self {
            dimension,
            entries: BTreeMap::new(),
        }
    }

    pub fn num_entries(&self) -> usize {
        let num_diag = self.entries.keys().filter(|[i, j]| i == j).count();
        2 * self.entries.len() - num_diag
    }

    fn coordinates(&self, [row_idx, col_idx]: [usize; 2]) -> [u32; 2] {
        assert!(
            row_idx < self.dimension,
            "row_idx exceeded matrix dimension; cannot insert value!"
        );
        assert!(
            col_idx < self.dimension,
            "col_idx exceeded matrix dimension; cannot insert value!"
        );

        // dimension fits in a u32 (checked on construction)
        if row_idx <= col_idx {
            [row_idx as u32, col_idx as u32]
        } else {
            [col_idx as u32, row_idx as u32]
        }
    }

    /// Insert a value into the matrix. Assumes symmetry: row/col order does not matter.
    pub fn insert(&mut self, rc: [usize; 2], value: f64) {
        let coordinates = self.coordinates(rc);
        self.entries
            .entry(coordinates)
            .and_modify(|current_value| *current_value += value)
            .or_insert(value);
    }

    /// Insert a group of entries
    pub fn insert_group(&mut self, entry_group: Vec<([usize; 2], f64)>) {
        for (rc, value) in entry_group {
            self.insert(rc, value);
        }
    }

    /// Value stored at a position (zero if nothing was inserted there)
    pub fn get(&self, rc: [usize; 2]) -> f64 {
        self.entries
            .get(&self.coordinates(rc))
            .copied()
            .unwrap_or(0.0)
    }

    /// Iterate over the upper triangle of the matrix.
    pub fn iter_upper_tri(&self) -> impl Iterator<Item = ([usize; 2], f64)> + '_ {
        self.entries
            .iter()
            .map(|(coords, value)| ([coords[0] as usize, coords[1] as usize], *value))
    }

    /// The main diagonal of the matrix
    pub fn diagonal(&self) -> Vec<f64> {
        let mut diag = vec![0.0; self.dimension];
        for ([r, c], value) in self.iter_upper_tri() {
            if r == c {
                diag[r] = value;
            }
        }
        diag
    }

    /// Off-diagonal sparsity pattern as an adjacency list
    pub fn adjacency(&self) -> Vec<Vec<usize>> {
        let mut adjacency = vec![Vec::new(); self.dimension];
        for ([r, c], _) in self.iter_upper_tri() {
            if r != c {
                adjacency[r].push(c);
                adjacency[c].push(r);
            }
        }
        adjacency
    }

    /// Build the full (both triangles) compressed-column form of `P D A D Pᵀ`
    ///
    /// * `permutation[old_idx]` is the new index of row/col `old_idx`
    /// * `scaling` holds the entries of the diagonal matrix D
    pub fn to_scaled_csc(&self, permutation: &[usize], scaling: &[f64]) -> CscMatrix<f64> {
        let mut coo = CooMatrix::new(self.dimension, self.dimension);
        for ([r, c], value) in self.iter_upper_tri() {
            let scaled = value * scaling[r] * scaling[c];
            let [pr, pc] = [permutation[r], permutation[c]];
            coo.push(pr, pc, scaled);
            if pr != pc {
                coo.push(pc, pr, scaled);
            }
        }
        CscMatrix::from(&coo)
    }
}

impl From<SparseMatrix> for DMatrix<f64> {
    fn from(sm: SparseMatrix) -> Self {
        let mut dense = DMatrix::zeros(sm.dimension, sm.dimension);

        for ([r, c], v) in sm.iter_upper_tri() {
            dense[(r, c)] = v;
            dense[(c, r)] = v;
        }

        dense
    }
}

impl From<SparseMatrix> for AIJMatrixBinary {
    fn from(mut sm: SparseMatrix) -> Self {
        // number of entries in each row
        let mut row_counts = vec![0; sm.dimension];

        for [r, c] in sm.entries.keys() {
            if r == c {
                row_counts[*r as usize] += 1;
            } else {
                row_counts[*r as usize] += 1;
                row_counts[*c as usize] += 1;
            }
        }

        // upper and lower triangles of matrix; sorted by row then column
        let mut full_matrix: BTreeMap<[u32; 2], f64> = sm
            .entries
            .iter()
            .map(|([r, c], v)| ([*c, *r], *v))
            .collect();
        full_matrix.append(&mut sm.entries);

        // matrix entries and their associated columns
        let (j, a) = full_matrix
            .iter()
            .map(|([_, c], v)| (*c as i32, *v))
            .unzip();

        AIJMatrixBinary {
            a,
            i: row_counts,
            j,
            dim: sm.dimension,
        }
    }
}

const MAT_FILE_CLASSID: u32 = 1211216;
const VEC_FILE_CLASSID: u32 = 1211214;

/// Petsc Sparse Matrix Format
pub struct AIJMatrixBinary {
    pub a: Vec<f64>,
    pub i: Vec<i32>, // Number of entries on each row (compute a prefix sum to get canonical form)
    pub j: Vec<i32>,
    pub dim: usize,
}

impl AIJMatrixBinary {
    pub fn print_to_petsc_binary_file(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(file);

        // header
        let mut header_buf = BytesMut::with_capacity(32);
        header_buf.put_u32(MAT_FILE_CLASSID);
        header_buf.put_u32(self.dim as u32);
        header_buf.put_u32(self.dim as u32);
        header_buf.put_u32(self.a.len() as u32);
        writer.write_all(header_buf.as_ref())?;

        // num-non-zero entries on each row
        let mut rnnz_buf = BytesMut::with_capacity(self.i.len() * 4);
        for &rnz in self.i.iter() {
            rnnz_buf.put_u32(rnz as u32);
        }
        writer.write_all(rnnz_buf.as_ref())?;

        // column indices of non-zero entries
        let mut j_buf = BytesMut::with_capacity(self.j.len() * 4);
        for &j in self.j.iter() {
            j_buf.put_u32(j as u32);
        }
        writer.write_all(j_buf.as_ref())?;

        // non-zero entries
        let mut a_buf = BytesMut::with_capacity(self.a.len() * 8);
        for &a in self.a.iter() {
            a_buf.put_f64(a);
        }
        writer.write_all(a_buf.as_ref())?;

        writer.flush()
    }
}

/// Write a right-hand-side vector in Petsc binary format
pub fn print_vec_to_petsc_binary_file(values: &[f64], path: impl AsRef<str>) -> std::io::Result<()> {
    let file = File::create(path.as_ref())?;
    let mut writer = BufWriter::new(file);

    let mut buf = BytesMut::with_capacity(8 + values.len() * 8);
    buf.put_u32(VEC_FILE_CLASSID);
    buf.put_u32(values.len() as u32);
    for &v in values {
        buf.put_f64(v);
    }
    writer.write_all(buf.as_ref())?;

    writer.flush()
}
