use crate::basis::{points_for_order, GaussRule, ShapeFn};
use crate::domain::field::Field;
use crate::domain::mesh::{space::Point, Mesh};
use crate::expression::{Axis, EvalContext, EvalError, Expr, FieldId, Value};
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::marker::PhantomData;

/// Evaluates expressions at single points inside the Mesh
pub trait PointSampler: Sync {
    /// Value of `expr` at a real-space `point` located inside the Elem `elem_id` (or one of its descendants)
    fn value_at(&self, expr: &Expr, elem_id: usize, point: [f64; 2]) -> Result<Value, EvalError>;
}

/// Evaluates and integrates expressions referencing the Fields of a Domain
pub struct FieldEvaluator<'a, SF: ShapeFn> {
    mesh: &'a Mesh,
    fields: &'a [Field],
    _phantom: PhantomData<fn() -> SF>,
}

impl<'a, SF: ShapeFn> FieldEvaluator<'a, SF> {
    pub fn new(mesh: &'a Mesh, fields: &'a [Field]) -> Self {
        Self {
            mesh,
            fields,
            _phantom: PhantomData,
        }
    }

    pub fn mesh(&self) -> &'a Mesh {
        self.mesh
    }

    /// Values of `expr` on a tensor grid of real-space points (`xs` x `ys`) inside a leaf (`ys` varying fastest)
    pub fn sample_leaf(
        &self,
        expr: &Expr,
        leaf_id: usize,
        xs: &[f64],
        ys: &[f64],
    ) -> Result<Vec<Value>, EvalError> {
        let mut field_values = BTreeMap::new();
        for field_id in expr.fields() {
            let field = self
                .fields
                .get(field_id.0)
                .ok_or(EvalError::UndefinedField(field_id))?;
            field_values.insert(field_id, field.sample_grid::<SF>(self.mesh, leaf_id, xs, ys)?);
        }

        let mut values = Vec::with_capacity(xs.len() * ys.len());
        for (m, x) in xs.iter().enumerate() {
            for (n, y) in ys.iter().enumerate() {
                let ctx = GridPoint {
                    coords: [*x, *y],
                    field_values: &field_values,
                    index: m * ys.len() + n,
                };
                values.push(expr.evaluate(&ctx)?);
            }
        }

        Ok(values)
    }

    /// Integrate a scalar expression over a leaf using a Gauss-Legendre rule exact for polynomials of degree `order`
    pub fn integrate_leaf(&self, expr: &Expr, leaf_id: usize, order: usize) -> Result<f64, EvalError> {
        let leaf = self
            .mesh
            .elems
            .get(leaf_id)
            .ok_or(EvalError::UnknownElem(leaf_id))?;
        let rule = GaussRule::new(points_for_order(order));
        let [[x_min, x_max], [y_min, y_max]] = leaf.bounds;
        let (x_scale, xs) = rule.scaled(x_min, x_max);
        let (y_scale, ys) = rule.scaled(y_min, y_max);

        let values = self.sample_leaf(expr, leaf_id, &xs, &ys)?;

        let mut sum = 0.0;
        for (m, w_m) in rule.weights.iter().enumerate() {
            for (n, w_n) in rule.weights.iter().enumerate() {
                sum += w_m * w_n * values[m * ys.len() + n].as_scalar()?;
            }
        }

        Ok(sum * x_scale * y_scale)
    }

    /// Integrate a scalar expression over a set of leaves
    pub fn integrate(&self, expr: &Expr, leaf_ids: &[usize], order: usize) -> Result<f64, EvalError> {
        leaf_ids
            .par_iter()
            .map(|leaf_id| self.integrate_leaf(expr, *leaf_id, order))
            .sum()
    }
}

impl<'a, SF: ShapeFn> PointSampler for FieldEvaluator<'a, SF> {
    fn value_at(&self, expr: &Expr, elem_id: usize, [x, y]: [f64; 2]) -> Result<Value, EvalError> {
        let leaf_id = self
            .mesh
            .leaf_below(elem_id, &Point::new(x, y))
            .ok_or(EvalError::OutsideMesh { x, y })?;

        self.sample_leaf(expr, leaf_id, &[x], &[y])?
            .pop()
            .ok_or(EvalError::OutsideMesh { x, y })
    }
}

/// A single point of a sampling grid
struct GridPoint<'v> {
    coords: [f64; 2],
    field_values: &'v BTreeMap<FieldId, Vec<Value>>,
    index: usize,
}

impl<'v> EvalContext for GridPoint<'v> {
    fn coordinate(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.coords[0],
            Axis::Y => self.coords[1],
        }
    }

    fn field(&self, field: FieldId) -> Result<Value, EvalError> {
        self.field_values
            .get(&field)
            .and_then(|values| values.get(self.index))
            .copied()
            .ok_or(EvalError::UndefinedField(field))
    }
}
