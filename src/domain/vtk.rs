use super::mesh::Mesh;
use crate::basis::ShapeFn;
use crate::expression::{EvalError, Expr, Value};
use crate::integration::FieldEvaluator;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};

/// A collection of quantities sampled over the leaves of a [Mesh], which can be printed to legacy VTK files
///
/// Point quantities are sampled on a uniform grid of `densities[0]` x `densities[1]` points on every leaf.
/// Cell quantities hold a single value per leaf (such as an expansion order or an h-Refinement level).
pub struct UniformFieldSpace<'m> {
    mesh: &'m Mesh,
    leaf_ids: Vec<usize>,
    densities: [usize; 2],
    point_quantities: BTreeMap<String, FieldQuantity>,
    cell_quantities: BTreeMap<String, BTreeMap<usize, f64>>,
}

impl<'m> UniformFieldSpace<'m> {
    /// Generate a FieldSpace over the leaves of a Mesh (densities are clamped to at least 2 points per direction)
    pub fn new(mesh: &'m Mesh, densities: [usize; 2]) -> Self {
        Self {
            mesh,
            leaf_ids: mesh.leaf_ids(),
            densities: [densities[0].max(2), densities[1].max(2)],
            point_quantities: BTreeMap::new(),
            cell_quantities: BTreeMap::new(),
        }
    }

    /// Sample an expression on every leaf
    ///
    /// Vector expressions are stored as two quantities: `{name}_x` and `{name}_y`. The names of the new quantities are returned.
    pub fn sample_expression<SF: ShapeFn>(
        &mut self,
        name: impl AsRef<str>,
        evaluator: &FieldEvaluator<SF>,
        expr: &Expr,
    ) -> Result<Vec<String>, EvalError> {
        let mut scalar = FieldQuantity::new(name.as_ref());
        let mut x_quantity = FieldQuantity::new(&format!("{}_x", name.as_ref()));
        let mut y_quantity = FieldQuantity::new(&format!("{}_y", name.as_ref()));

        for leaf_id in self.leaf_ids.iter() {
            let [xs, ys] = self.leaf_points(*leaf_id);
            let values = evaluator.sample_leaf(expr, *leaf_id, &xs, &ys)?;

            let mut s = Vec::with_capacity(values.len());
            let mut x = Vec::with_capacity(values.len());
            let mut y = Vec::with_capacity(values.len());
            for value in values {
                match value {
                    Value::Scalar(v) => s.push(v),
                    Value::Vector(v) => {
                        x.push(v.x());
                        y.push(v.y());
                    }
                }
            }

            if !s.is_empty() {
                scalar.values.insert(*leaf_id, s);
            }
            if !x.is_empty() {
                x_quantity.values.insert(*leaf_id, x);
                y_quantity.values.insert(*leaf_id, y);
            }
        }

        let mut names = Vec::new();
        for quantity in [scalar, x_quantity, y_quantity] {
            if !quantity.values.is_empty() {
                names.push(quantity.name.clone());
                self.point_quantities.insert(quantity.name.clone(), quantity);
            }
        }

        Ok(names)
    }

    /// Store a value per leaf (leaves without a value are printed as -1)
    pub fn insert_cell_quantity(&mut self, name: impl AsRef<str>, values: impl IntoIterator<Item = (usize, f64)>) {
        self.cell_quantities
            .insert(name.as_ref().to_string(), values.into_iter().collect());
    }

    /// create a VTK file at the designated `path` including all quantities
    ///
    /// These files can be plotted using [Visit](https://wci.llnl.gov/simulation/computer-codes/visit) or Paraview
    pub fn print_all_to_vtk(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let names = self
            .point_quantities
            .keys()
            .chain(self.cell_quantities.keys())
            .cloned()
            .collect();
        self.print_quantities_to_vtk(path, names)
    }

    /// create a VTK file at the designated `path` including a list of quantities
    pub fn print_quantities_to_vtk(
        &self,
        path: impl AsRef<str>,
        quantity_names: Vec<String>,
    ) -> std::io::Result<()> {
        let output_file = File::create(path.as_ref())?;
        let mut writer = BufWriter::new(&output_file);

        let [nx, ny] = self.densities;
        let num_leaves = self.leaf_ids.len();

        // header
        writeln!(writer, "# vtk DataFile Version 3.0")?;
        writeln!(writer, "hp_adapt field space ({} leaves)", num_leaves)?;
        writeln!(writer, "ASCII")?;
        writeln!(writer, "DATASET UNSTRUCTURED_GRID")?;

        // points
        let num_points = nx * ny * num_leaves;
        writeln!(writer, "\nPOINTS {} double", num_points)?;
        for leaf_id in self.leaf_ids.iter() {
            let [xs, ys] = self.leaf_points(*leaf_id);
            for x in xs.iter() {
                for y in ys.iter() {
                    writeln!(writer, "{:.10} {:.10} 0.0", x, y)?;
                }
            }
        }

        // cells
        let cells_per_leaf = (nx - 1) * (ny - 1);
        let num_cells = cells_per_leaf * num_leaves;
        writeln!(writer, "\nCELLS {} {}", num_cells, 5 * num_cells)?;
        for k in 0..num_leaves {
            for i in 0..(nx - 1) {
                for j in 0..(ny - 1) {
                    let initial_pt = (nx * ny) * k + ny * i + j;

                    writeln!(
                        writer,
                        "4\t{}\t{}\t{}\t{}",
                        initial_pt,
                        initial_pt + ny,
                        initial_pt + ny + 1,
                        initial_pt + 1,
                    )?;
                }
            }
        }

        // cell types
        writeln!(writer, "\nCELL_TYPES {}", num_cells)?;
        for _ in 0..num_cells {
            write!(writer, " 9")?;
        }
        writeln!(writer)?;

        let (point_names, cell_names): (Vec<String>, Vec<String>) = quantity_names
            .into_iter()
            .filter(|name| {
                let known = self.point_quantities.contains_key(name) || self.cell_quantities.contains_key(name);
                if !known {
                    log::warn!("Field Space does not have Quantity '{}'; cannot write to VTK!", name);
                }
                known
            })
            .partition(|name| self.point_quantities.contains_key(name));

        if !point_names.is_empty() {
            writeln!(writer, "\nPOINT_DATA {}", num_points)?;
            for name in point_names {
                self.point_quantities[&name].write_vtk_quantity(&self.leaf_ids, nx * ny, &mut writer)?;
            }
        }

        if !cell_names.is_empty() {
            writeln!(writer, "\nCELL_DATA {}", num_cells)?;
            for name in cell_names {
                let values = &self.cell_quantities[&name];
                writeln!(writer, "SCALARS {} double 1\nLOOKUP_TABLE default", name)?;
                for leaf_id in self.leaf_ids.iter() {
                    let value = values.get(leaf_id).copied().unwrap_or(-1.0);
                    for _ in 0..cells_per_leaf {
                        write!(writer, "{} ", value)?;
                    }
                }
                writeln!(writer)?;
            }
        }

        Ok(())
    }

    fn leaf_points(&self, leaf_id: usize) -> [Vec<f64>; 2] {
        let [[x_min, x_max], [y_min, y_max]] = self.mesh.elems[leaf_id].bounds;
        [
            uniform_range(x_min, x_max, self.densities[0]),
            uniform_range(y_min, y_max, self.densities[1]),
        ]
    }
}

struct FieldQuantity {
    values: BTreeMap<usize, Vec<f64>>,
    name: String,
}

impl FieldQuantity {
    fn new(name: &str) -> Self {
        Self {
            values: BTreeMap::new(),
            name: name.to_string(),
        }
    }

    fn write_vtk_quantity(
        &self,
        leaf_ids: &[usize],
        points_per_leaf: usize,
        writer: &mut BufWriter<&File>,
    ) -> std::io::Result<()> {
        writeln!(writer, "SCALARS {} double 1\nLOOKUP_TABLE default", self.name)?;

        for leaf_id in leaf_ids {
            match self.values.get(leaf_id) {
                Some(values) => {
                    for value in values {
                        write!(writer, "{:.15} ", value)?;
                    }
                }
                None => {
                    for _ in 0..points_per_leaf {
                        write!(writer, "0.0 ")?;
                    }
                }
            }
        }
        writeln!(writer)?;

        Ok(())
    }
}

fn uniform_range(min: f64, max: f64, n: usize) -> Vec<f64> {
    let step = (max - min) / ((n - 1) as f64);
    (0..n).map(|i| (i as f64) * step + min).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::LobattoShapeFn;
    use crate::domain::mesh::element::RegionId;

    #[test]
    fn print_points_and_cells() {
        let mut mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 1]).unwrap();
        mesh.h_refine_elem(1).unwrap();
        let evaluator: FieldEvaluator<LobattoShapeFn> = FieldEvaluator::new(&mesh, &[]);

        let mut space = UniformFieldSpace::new(&mesh, [3, 2]);
        let names = space
            .sample_expression("e", &evaluator, &Expr::array(Expr::x(), Expr::y()))
            .unwrap();
        assert_eq!(names, vec![String::from("e_x"), String::from("e_y")]);
        space.insert_cell_quantity("level", mesh.leaves().map(|leaf| (leaf.id, leaf.level.0 as f64)));

        let path = std::env::temp_dir().join("hp_adapt_uniform_field_space.vtk");
        space.print_all_to_vtk(path.to_string_lossy()).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        // 5 leaves with 3 x 2 points and 2 cells each
        assert!(contents.contains("POINTS 30 double"));
        assert!(contents.contains("CELLS 10 50"));
        assert!(contents.contains("POINT_DATA 30"));
        assert!(contents.contains("SCALARS e_y double 1"));
        assert!(contents.contains("CELL_DATA 10"));
        assert!(contents.contains("SCALARS level double 1"));
    }
}
