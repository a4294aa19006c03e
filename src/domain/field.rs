use super::mesh::{element::RegionId, Mesh};
use crate::adapt::{planner::AdaptivitySetting, tables::ElementOrderTable};
use crate::basis::{basis_for, BasisFn, ShapeFn, SpaceKind};
use crate::expression::{EvalError, FieldId, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Degrees of freedom of a Field along with the local expansion coefficients they produce on each leaf
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldData {
    /// Global (conforming) degrees of freedom
    pub dofs: Vec<f64>,
    /// Expansion coefficients on each leaf, in the order given by [`basis_for`]
    pub local: BTreeMap<usize, Vec<f64>>,
}

/// A named interpolation space over a set of Regions, optionally holding data
///
/// A Field tracks its own expansion order on each leaf of its Regions. Its data (if any) is
/// only meaningful for the Mesh and orders it was last computed with; every change to either
/// is followed by a re-projection.
#[derive(Clone, Debug)]
pub struct Field {
    id: FieldId,
    name: String,
    kind: SpaceKind,
    regions: BTreeSet<RegionId>,
    orders: ElementOrderTable,
    data: Option<FieldData>,
    update_accuracy: u8,
    p_adaptivity: Option<AdaptivitySetting>,
}

impl Field {
    pub(crate) fn new(
        id: FieldId,
        name: impl Into<String>,
        kind: SpaceKind,
        regions: BTreeSet<RegionId>,
        mesh: &Mesh,
        order: u8,
    ) -> Self {
        let leaf_ids = regions
            .iter()
            .flat_map(|region| mesh.leaf_ids_in(*region))
            .collect::<Vec<_>>();

        Self {
            id,
            name: name.into(),
            kind,
            regions,
            orders: ElementOrderTable::uniform(leaf_ids, order),
            data: None,
            update_accuracy: 0,
            p_adaptivity: None,
        }
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    pub fn regions(&self) -> &BTreeSet<RegionId> {
        &self.regions
    }

    pub fn orders(&self) -> &ElementOrderTable {
        &self.orders
    }

    pub fn data(&self) -> Option<&FieldData> {
        self.data.as_ref()
    }

    pub fn has_data(&self) -> bool {
        self.data.is_some()
    }

    /// Extra quadrature order used when this Field is re-projected
    pub fn update_accuracy(&self) -> u8 {
        self.update_accuracy
    }

    pub fn p_adaptivity(&self) -> Option<&AdaptivitySetting> {
        self.p_adaptivity.as_ref()
    }

    pub(crate) fn set_orders(&mut self, orders: ElementOrderTable) {
        self.orders = orders;
    }

    pub(crate) fn set_field_data(&mut self, data: Option<FieldData>) {
        self.data = data;
    }

    pub(crate) fn set_update_accuracy(&mut self, extra: u8) {
        self.update_accuracy = extra;
    }

    pub(crate) fn set_p_adaptivity(&mut self, setting: Option<AdaptivitySetting>) {
        self.p_adaptivity = setting;
    }

    /// Values of the Field on a tensor grid of real-space points (`xs` x `ys`) inside a leaf
    ///
    /// Values are ordered with `ys` varying fastest. The Field is zero where it has no data.
    pub fn sample_grid<SF: ShapeFn>(
        &self,
        mesh: &Mesh,
        leaf_id: usize,
        xs: &[f64],
        ys: &[f64],
    ) -> Result<Vec<Value>, EvalError> {
        let zeros = || vec![self.kind.zero(); xs.len() * ys.len()];

        let (coefficients, order) = match (
            self.data.as_ref().and_then(|data| data.local.get(&leaf_id)),
            self.orders.get(leaf_id),
        ) {
            (Some(coefficients), Ok(order)) => (coefficients, order),
            _ => return Ok(zeros()),
        };
        let leaf = match mesh.elems.get(leaf_id) {
            Some(leaf) => leaf,
            None => return Ok(zeros()),
        };

        let us: Vec<f64> = xs.iter().map(|x| leaf.parametric_point([*x, 0.0])[0]).collect();
        let vs: Vec<f64> = ys.iter().map(|y| leaf.parametric_point([0.0, *y])[1]).collect();
        let basis: BasisFn<SF> = BasisFn::with(
            self.kind.degree(order) as usize,
            &us,
            &vs,
            leaf.parametric_mapping(),
        );
        let specs = basis_for(self.kind, order);

        let mut values = Vec::with_capacity(xs.len() * ys.len());
        for m in 0..xs.len() {
            for n in 0..ys.len() {
                let mut value = self.kind.zero();
                for (spec, coefficient) in specs.iter().zip(coefficients.iter()) {
                    value = value.sum(&basis.value(spec, [m, n]).scaled(*coefficient))?;
                }
                values.push(value);
            }
        }

        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::LobattoShapeFn;

    #[test]
    fn sampling_local_coefficients() {
        let mesh = Mesh::rectangle(RegionId(1), [0.0, 2.0], [0.0, 1.0], [2, 1]).unwrap();
        let mut field = Field::new(
            FieldId(0),
            "u",
            SpaceKind::H1,
            BTreeSet::from([RegionId(1)]),
            &mesh,
            1,
        );
        assert_eq!(field.orders().len(), 2);

        // without data the Field is zero
        let values = field
            .sample_grid::<LobattoShapeFn>(&mesh, 1, &[1.5], &[0.5])
            .unwrap();
        assert_eq!(values, vec![Value::Scalar(0.0)]);

        // bilinear "x + y" on elem 1 (x in [1, 2]): corner values ordered [i][j] with i along x
        let mut local = BTreeMap::new();
        local.insert(1, vec![1.0, 2.0, 2.0, 3.0]);
        field.set_field_data(Some(FieldData { dofs: Vec::new(), local }));

        let values = field
            .sample_grid::<LobattoShapeFn>(&mesh, 1, &[1.0, 1.25, 2.0], &[0.0, 0.5])
            .unwrap();
        let expected = [1.0, 1.5, 1.25, 1.75, 2.0, 2.5];
        for (value, expected) in values.iter().zip(expected.iter()) {
            assert!((value.as_scalar().unwrap() - expected).abs() < 1e-14);
        }

        // elem 0 has no local coefficients
        let values = field
            .sample_grid::<LobattoShapeFn>(&mesh, 0, &[0.5], &[0.5])
            .unwrap();
        assert_eq!(values, vec![Value::Scalar(0.0)]);
    }
}
