use super::conforming::{ConformingSpace, ElemBlock};
use super::tables::{ElementOrderTable, TableError};
use crate::basis::{points_for_order, BasisFn, GaussRules, ShapeFn, SpaceKind};
use crate::domain::field::{Field, FieldData};
use crate::domain::mesh::{element::RegionId, intersection, Mesh};
use crate::expression::{EvalError, Expr, Value};
use crate::integration::FieldEvaluator;
use crate::linalg::{LinearSystem, SolveError};
use nalgebra::DMatrix;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::marker::PhantomData;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("Projection system could not be solved: {0}")]
    SingularProjectionSystem(SolveError),
    #[error("Failed to evaluate the projected expression: {0}")]
    Evaluation(#[from] EvalError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("Failed to export the projection system: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SolveError> for ProjectionError {
    fn from(err: SolveError) -> Self {
        Self::SingularProjectionSystem(err)
    }
}

/// A piece of a leaf on which a projection source is smooth
#[derive(Clone, Debug, PartialEq)]
pub struct SourcePiece {
    /// Real space bounds of the piece
    pub bounds: [[f64; 2]; 2],
    /// The leaf of the source's Mesh the piece lies within
    pub cell: usize,
    /// Polynomial degree of the Field data sampled on the piece (0 if no Field data is involved)
    pub degree: u8,
}

/// Something that can be projected onto a Field's space
pub trait ProjectionSource: Sync {
    /// Split a real-space rectangle into the pieces on which the source is smooth
    fn pieces(&self, bounds: [[f64; 2]; 2]) -> Vec<SourcePiece>;

    /// Values on a tensor grid of real-space points (`xs` x `ys`, `ys` varying fastest) inside a piece
    fn sample(&self, piece: &SourcePiece, xs: &[f64], ys: &[f64]) -> Result<Vec<Value>, EvalError>;
}

/// An expression over a Mesh and its Fields
///
/// The expression can be limited to a set of Regions. Elsewhere, the `fallback` expression is used instead.
pub struct ExprSource<'a, SF: ShapeFn> {
    evaluator: FieldEvaluator<'a, SF>,
    fields: &'a [Field],
    expr: Expr,
    regions: Option<BTreeSet<RegionId>>,
    fallback: Expr,
}

impl<'a, SF: ShapeFn> ExprSource<'a, SF> {
    pub fn new(mesh: &'a Mesh, fields: &'a [Field], expr: Expr) -> Self {
        Self {
            evaluator: FieldEvaluator::new(mesh, fields),
            fields,
            expr,
            regions: None,
            fallback: Expr::constant(0.0),
        }
    }

    /// Only use the expression on the given Regions
    pub fn restricted_to(mut self, regions: BTreeSet<RegionId>, fallback: Expr) -> Self {
        self.regions = Some(regions);
        self.fallback = fallback;
        self
    }

    fn expr_on(&self, cell: usize) -> &Expr {
        match (&self.regions, self.evaluator.mesh().elems.get(cell)) {
            (Some(regions), Some(elem)) if !regions.contains(&elem.region()) => &self.fallback,
            _ => &self.expr,
        }
    }

    fn degree_on(&self, cell: usize) -> u8 {
        self.expr_on(cell)
            .fields()
            .into_iter()
            .filter_map(|field_id| {
                let field = self.fields.get(field_id.0)?;
                if field.has_data() {
                    field.orders().get(cell).ok().map(|order| field.kind().degree(order))
                } else {
                    None
                }
            })
            .max()
            .unwrap_or(0)
    }
}

impl<'a, SF: ShapeFn> ProjectionSource for ExprSource<'a, SF> {
    fn pieces(&self, bounds: [[f64; 2]; 2]) -> Vec<SourcePiece> {
        let mesh = self.evaluator.mesh();
        mesh.overlapping_leaves(bounds)
            .into_iter()
            .filter_map(|cell| {
                intersection(&bounds, &mesh.elems[cell].bounds).map(|bounds| SourcePiece {
                    bounds,
                    cell,
                    degree: self.degree_on(cell),
                })
            })
            .collect()
    }

    fn sample(&self, piece: &SourcePiece, xs: &[f64], ys: &[f64]) -> Result<Vec<Value>, EvalError> {
        self.evaluator
            .sample_leaf(self.expr_on(piece.cell), piece.cell, xs, ys)
    }
}

/// Configuration of the L2 projection
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProjectorConfig {
    /// Quadrature order added to every projection (on top of each Field's update accuracy)
    pub default_extra_order: u8,
    /// If set, every projection system is also written to this directory in Petsc binary format
    pub export_dir: Option<PathBuf>,
}

/// Computes the data of a Field that best approximates a source on a (new) Mesh/order configuration
pub trait SolutionProjector: Send + Sync {
    fn project(
        &self,
        kind: SpaceKind,
        mesh: &Mesh,
        orders: &ElementOrderTable,
        source: &dyn ProjectionSource,
        extra_order: u8,
    ) -> Result<FieldData, ProjectionError>;
}

/// Galerkin (L2) projection onto a [`ConformingSpace`]
///
/// Solves `∫ v·tf = ∫ source·tf` for every test function `tf`. Local mass matrices are integrated
/// with order `2·degree + extra`; right-hand-sides are integrated over each [`SourcePiece`] with order
/// `2·max(degree, source degree) + extra`.
pub struct L2Projector<SF: ShapeFn> {
    config: ProjectorConfig,
    _phantom: PhantomData<fn() -> SF>,
}

impl<SF: ShapeFn> L2Projector<SF> {
    pub fn new(config: ProjectorConfig) -> Self {
        Self {
            config,
            _phantom: PhantomData,
        }
    }

    pub fn config(&self) -> &ProjectorConfig {
        &self.config
    }

    fn local_system(
        &self,
        kind: SpaceKind,
        mesh: &Mesh,
        block: &ElemBlock,
        pieces: &[SourcePiece],
        source: &dyn ProjectionSource,
        extra: usize,
        rules: &GaussRules,
    ) -> Result<(DMatrix<f64>, Vec<f64>), ProjectionError> {
        let leaf = &mesh.elems[block.leaf];
        let degree = kind.degree(block.order) as usize;
        let mapping = leaf.parametric_mapping();
        let n = block.len();

        // mass matrix
        let rule = rules.for_order(2 * degree + extra);
        let jacobian = leaf.area() / 4.0;
        let basis: BasisFn<SF> = BasisFn::with(degree, &rule.points, &rule.points, mapping);
        let q = rule.len();

        let values: Vec<Vec<Value>> = block
            .basis
            .iter()
            .map(|spec| {
                (0..q * q)
                    .map(|mn| basis.value(spec, [mn / q, mn % q]))
                    .collect()
            })
            .collect();

        let mut mass = DMatrix::zeros(n, n);
        for a in 0..n {
            for b in a..n {
                let mut sum = 0.0;
                for (mn, (va, vb)) in values[a].iter().zip(values[b].iter()).enumerate() {
                    sum += rule.weights[mn / q] * rule.weights[mn % q] * va.dot(vb)?;
                }
                mass[(a, b)] = sum * jacobian;
                mass[(b, a)] = sum * jacobian;
            }
        }

        // right-hand-side
        let mut rhs = vec![0.0; n];
        for piece in pieces {
            let rule = rules.for_order(2 * degree.max(piece.degree as usize) + extra);
            let [[x_min, x_max], [y_min, y_max]] = piece.bounds;
            let (x_scale, xs) = rule.scaled(x_min, x_max);
            let (y_scale, ys) = rule.scaled(y_min, y_max);
            let q = rule.len();

            let source_values = source.sample(piece, &xs, &ys)?;

            let us: Vec<f64> = xs.iter().map(|x| leaf.parametric_point([*x, 0.0])[0]).collect();
            let vs: Vec<f64> = ys.iter().map(|y| leaf.parametric_point([0.0, *y])[1]).collect();
            let basis: BasisFn<SF> = BasisFn::with(degree, &us, &vs, mapping);

            for (a, spec) in block.basis.iter().enumerate() {
                let mut sum = 0.0;
                for (mn, value) in source_values.iter().enumerate() {
                    let [m, n] = [mn / q, mn % q];
                    sum += rule.weights[m] * rule.weights[n] * basis.value(spec, [m, n]).dot(value)?;
                }
                rhs[a] += sum * x_scale * y_scale;
            }
        }

        Ok((mass, rhs))
    }
}

impl<SF: ShapeFn> SolutionProjector for L2Projector<SF> {
    fn project(
        &self,
        kind: SpaceKind,
        mesh: &Mesh,
        orders: &ElementOrderTable,
        source: &dyn ProjectionSource,
        extra_order: u8,
    ) -> Result<FieldData, ProjectionError> {
        let space = ConformingSpace::build::<SF>(kind, mesh, orders)?;
        let extra = self.config.default_extra_order.saturating_add(extra_order) as usize;

        let pieces: Vec<Vec<SourcePiece>> = space
            .blocks()
            .iter()
            .map(|block| source.pieces(mesh.elems[block.leaf].bounds))
            .collect();

        let max_degree = space
            .blocks()
            .iter()
            .map(|block| kind.degree(block.order))
            .chain(pieces.iter().flatten().map(|piece| piece.degree))
            .max()
            .unwrap_or(0) as usize;
        let rules = GaussRules::up_to(points_for_order(2 * max_degree + extra));

        let dof_map = space.dof_map();
        let local_systems: Vec<(Vec<([usize; 2], f64)>, Vec<(usize, f64)>)> = space
            .blocks()
            .par_iter()
            .zip(pieces.par_iter())
            .map(|(block, pieces)| {
                let (mass, rhs) =
                    self.local_system(kind, mesh, block, pieces, source, extra, &rules)?;

                // A = T^T M T (upper triangle only)
                let mut entries = Vec::new();
                for a in 0..block.len() {
                    for b in 0..block.len() {
                        let m_ab = mass[(a, b)];
                        if m_ab == 0.0 {
                            continue;
                        }
                        for (g_a, w_a) in dof_map.row(block.offset + a) {
                            for (g_b, w_b) in dof_map.row(block.offset + b) {
                                if g_a <= g_b {
                                    entries.push(([*g_a, *g_b], w_a * w_b * m_ab));
                                }
                            }
                        }
                    }
                }

                let b_entries = rhs
                    .iter()
                    .enumerate()
                    .flat_map(|(a, r)| {
                        dof_map
                            .row(block.offset + a)
                            .iter()
                            .map(move |(g, w)| (*g, w * r))
                    })
                    .collect();

                Ok((entries, b_entries))
            })
            .collect::<Result<_, ProjectionError>>()?;

        let mut system = LinearSystem::new(space.num_dofs());
        for (entries, b_entries) in local_systems {
            system.a.insert_group(entries);
            for (g, value) in b_entries {
                system.b[g] += value;
            }
        }

        log::debug!(
            "projecting onto {} {} dofs ({} leaves, {} matrix entries)",
            space.num_dofs(),
            kind,
            space.blocks().len(),
            system.a.num_entries()
        );

        if let Some(dir) = &self.config.export_dir {
            system.print_to_petsc_binary_files(dir, format!("projection_{}_{}", kind, space.num_dofs()))?;
        }

        let dofs = system.solve()?;

        Ok(FieldData {
            local: space.local_coefficients(&dofs),
            dofs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::LobattoShapeFn;
    use crate::expression::FieldId;

    fn refined_mesh() -> Mesh {
        let mut mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 2]).unwrap();
        mesh.h_refine_elem(3).unwrap();
        mesh
    }

    fn max_error(field: &Field, mesh: &Mesh, expected: &Expr) -> f64 {
        let samples = [0.05, 0.3, 0.55, 0.8, 0.95];
        let evaluator: FieldEvaluator<LobattoShapeFn> = FieldEvaluator::new(mesh, std::slice::from_ref(field));
        let difference = Expr::field(field.id()) - expected.clone();

        mesh.leaf_ids()
            .into_iter()
            .map(|leaf_id| {
                let [[x0, x1], [y0, y1]] = mesh.elems[leaf_id].bounds;
                let xs: Vec<f64> = samples.iter().map(|s| x0 + s * (x1 - x0)).collect();
                let ys: Vec<f64> = samples.iter().map(|s| y0 + s * (y1 - y0)).collect();
                evaluator
                    .sample_leaf(&difference, leaf_id, &xs, &ys)
                    .unwrap()
                    .iter()
                    .fold(0.0_f64, |acc, v| acc.max(v.magnitude()))
            })
            .fold(0.0, f64::max)
    }

    fn projected_field(kind: SpaceKind, mesh: &Mesh, orders: ElementOrderTable, expr: Expr) -> Field {
        let projector: L2Projector<LobattoShapeFn> = L2Projector::new(ProjectorConfig::default());
        let source: ExprSource<LobattoShapeFn> = ExprSource::new(mesh, &[], expr);
        let data = projector.project(kind, mesh, &orders, &source, 0).unwrap();

        let mut field = Field::new(FieldId(0), "f", kind, BTreeSet::from([RegionId(1)]), mesh, 1);
        field.set_orders(orders);
        field.set_field_data(Some(data));
        field
    }

    #[test]
    fn polynomials_are_reproduced() {
        let mesh = refined_mesh();
        let (x, y) = (Expr::x(), Expr::y());

        let mut orders = ElementOrderTable::uniform(mesh.leaf_ids(), 3);
        orders.set(0, 2).unwrap();
        let h1_expr = x.clone().powi(2) - 3.0 * x.clone() * y.clone() + y.clone().powi(2) + 1.0;
        let field = projected_field(SpaceKind::H1, &mesh, orders, h1_expr.clone());
        assert!(max_error(&field, &mesh, &h1_expr) < 1e-10);

        let hcurl_expr = Expr::array(y.clone().powi(2), x.clone() * y.clone() - 2.0);
        let orders = ElementOrderTable::uniform(mesh.leaf_ids(), 2);
        let field = projected_field(SpaceKind::HCurl, &mesh, orders, hcurl_expr.clone());
        assert!(max_error(&field, &mesh, &hcurl_expr) < 1e-10);
    }

    #[test]
    fn projection_is_idempotent() {
        let mesh = refined_mesh();
        let orders = ElementOrderTable::uniform(mesh.leaf_ids(), 2);
        let expr = (3.0 * Expr::x()).sin() * (2.0 * Expr::y()).cos();
        let field = projected_field(SpaceKind::H1, &mesh, orders.clone(), expr);

        let fields = vec![field];
        let projector: L2Projector<LobattoShapeFn> = L2Projector::new(ProjectorConfig::default());
        let source: ExprSource<LobattoShapeFn> = ExprSource::new(&mesh, &fields, Expr::field(FieldId(0)));
        let again = projector
            .project(SpaceKind::H1, &mesh, &orders, &source, 0)
            .unwrap();

        let first = &fields[0].data().unwrap().dofs;
        assert_eq!(first.len(), again.dofs.len());
        for (a, b) in first.iter().zip(again.dofs.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn transfer_between_meshes() {
        let coarse = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 2]).unwrap();
        let fine = refined_mesh();
        let expr = Expr::x().powi(2) * Expr::y();

        // degree 2 data on the coarse Mesh transferred onto the refined Mesh (with the same ids) and back
        let coarse_field = projected_field(SpaceKind::H1, &coarse, ElementOrderTable::uniform(coarse.leaf_ids(), 3), expr.clone());
        let fields = vec![coarse_field];
        let source: ExprSource<LobattoShapeFn> = ExprSource::new(&coarse, &fields, Expr::field(FieldId(0)));
        assert_eq!(source.pieces(fine.elems[5].bounds).len(), 1);
        assert_eq!(source.pieces(coarse.elems[3].bounds)[0].degree, 3);

        let projector: L2Projector<LobattoShapeFn> = L2Projector::new(ProjectorConfig::default());
        let fine_orders = ElementOrderTable::uniform(fine.leaf_ids(), 3);
        let data = projector
            .project(SpaceKind::H1, &fine, &fine_orders, &source, 0)
            .unwrap();

        let mut fine_field = Field::new(FieldId(0), "f", SpaceKind::H1, BTreeSet::from([RegionId(1)]), &fine, 3);
        fine_field.set_orders(fine_orders);
        fine_field.set_field_data(Some(data));
        assert!(max_error(&fine_field, &fine, &expr) < 1e-10);

        let fields = vec![fine_field];
        let source: ExprSource<LobattoShapeFn> = ExprSource::new(&fine, &fields, Expr::field(FieldId(0)));
        assert_eq!(source.pieces(coarse.elems[3].bounds).len(), 4);
    }

    #[test]
    fn restricted_sources_use_the_fallback() {
        let mut mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 1]).unwrap();
        let other = Mesh::rectangle(RegionId(2), [1.0, 2.0], [0.0, 1.0], [1, 1]).unwrap();
        mesh = Mesh::from_elements(
            mesh.elements
                .iter()
                .chain(other.elements.iter())
                .map(|element| (element.points, element.region)),
        )
        .unwrap();

        let source: ExprSource<LobattoShapeFn> = ExprSource::new(&mesh, &[], Expr::constant(2.0))
            .restricted_to(BTreeSet::from([RegionId(2)]), Expr::constant(-1.0));
        let pieces = source.pieces([[0.25, 1.5], [0.0, 1.0]]);
        assert_eq!(pieces.len(), 3);

        let values: Vec<f64> = pieces
            .iter()
            .map(|piece| source.sample(piece, &[piece.bounds[0][0]], &[0.5]).unwrap()[0].as_scalar().unwrap())
            .collect();
        assert_eq!(values, vec![-1.0, -1.0, 2.0]);
    }

    #[test]
    fn mismatched_source_kind() {
        let mesh = refined_mesh();
        let projector: L2Projector<LobattoShapeFn> = L2Projector::new(ProjectorConfig::default());
        let source: ExprSource<LobattoShapeFn> = ExprSource::new(&mesh, &[], Expr::array(Expr::x(), Expr::y()));

        let result = projector.project(
            SpaceKind::H1,
            &mesh,
            &ElementOrderTable::uniform(mesh.leaf_ids(), 1),
            &source,
            0,
        );
        assert!(matches!(
            result,
            Err(ProjectionError::Evaluation(EvalError::TypeMismatch(_)))
        ));
    }
}
