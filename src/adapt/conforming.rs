use super::tables::{ElementOrderTable, TableError};
use crate::basis::{basis_for, BasisFn, BasisSpec, GaussRule, ShapeFn, SpaceKind};
use crate::domain::mesh::{elem::Elem, space::ParaDir, Interface, Mesh};
use crate::expression::Value;
use crate::linalg::constraints::{ConstraintEliminator, DofMap};
use std::collections::BTreeMap;

/// Trace samples below this fraction of the largest sample on a constraint row are dropped
const TRACE_TOLERANCE: f64 = 1e-13;

/// The local basis of a Field on a single leaf and the position of its coefficients in the global list
#[derive(Clone, Debug, PartialEq)]
pub struct ElemBlock {
    pub leaf: usize,
    pub order: u8,
    /// Index of the block's first local coefficient
    pub offset: usize,
    pub basis: Vec<BasisSpec>,
}

impl ElemBlock {
    pub fn len(&self) -> usize {
        self.basis.len()
    }

    pub fn is_empty(&self) -> bool {
        self.basis.is_empty()
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..(self.offset + self.basis.len())
    }
}

/// A conforming (continuous for `H1`, tangentially continuous for `HCurl`) space over a set of leaves with arbitrary orders
///
/// The space is built from a broken (leaf-local) hierarchical basis. Continuity across every
/// interface between two covered leaves is imposed by requiring the traces from both sides to
/// agree at Gauss points of the shared segment. This also handles hanging interfaces and
/// interfaces between leaves of different orders. The constraints are eliminated, leaving a
/// [`DofMap`] from global degrees of freedom to the local coefficients of every block.
#[derive(Clone, Debug)]
pub struct ConformingSpace {
    kind: SpaceKind,
    blocks: Vec<ElemBlock>,
    block_index: BTreeMap<usize, usize>,
    dof_map: DofMap,
}

impl ConformingSpace {
    pub fn build<SF: ShapeFn>(
        kind: SpaceKind,
        mesh: &Mesh,
        orders: &ElementOrderTable,
    ) -> Result<Self, TableError> {
        let mut blocks = Vec::with_capacity(orders.len());
        let mut block_index = BTreeMap::new();
        let mut offset = 0;

        for (leaf_id, order) in orders.iter() {
            match mesh.elems.get(leaf_id) {
                Some(elem) if elem.is_leaf() => (),
                _ => return Err(TableError::NotALeaf(leaf_id)),
            }

            let basis = basis_for(kind, order);
            block_index.insert(leaf_id, blocks.len());
            blocks.push(ElemBlock {
                leaf: leaf_id,
                order,
                offset,
                basis,
            });
            offset += blocks[blocks.len() - 1].len();
        }

        // H1 rows at the ends of every segment are added before any interior rows, so the cycles
        // of vertex constraints around shared corners reduce to (numerically) empty rows
        let mut vertex_rows = Vec::new();
        let mut interior_rows = Vec::new();
        let mut num_interfaces = 0;

        for interface in mesh.interfaces() {
            let (lo, hi) = match (block_index.get(&interface.lo), block_index.get(&interface.hi)) {
                (Some(lo), Some(hi)) => (&blocks[*lo], &blocks[*hi]),
                _ => continue,
            };
            num_interfaces += 1;

            let max_order = lo.order.max(hi.order) as usize;
            let (ends, interior) = match kind {
                SpaceKind::H1 => (
                    vec![-1.0, 1.0],
                    if max_order > 1 {
                        GaussRule::new(max_order - 1).points
                    } else {
                        Vec::new()
                    },
                ),
                SpaceKind::HCurl => (Vec::new(), GaussRule::new(max_order + 1).points),
            };

            let positions: Vec<f64> = ends.iter().chain(interior.iter()).copied().collect();
            let points: Vec<[f64; 2]> = positions.iter().map(|s| interface.point_at(*s)).collect();

            let lo_traces = traces::<SF>(kind, lo, &mesh.elems[lo.leaf], &interface, &points, 1.0);
            let hi_traces = traces::<SF>(kind, hi, &mesh.elems[hi.leaf], &interface, &points, -1.0);

            for (k, (lo_trace, hi_trace)) in lo_traces.iter().zip(hi_traces.iter()).enumerate() {
                let row = trace_difference(lo, lo_trace, hi, hi_trace);
                if k < ends.len() {
                    vertex_rows.push(row);
                } else {
                    interior_rows.push(row);
                }
            }
        }

        let mut eliminator = ConstraintEliminator::new(offset);
        for row in vertex_rows.iter().chain(interior_rows.iter()) {
            eliminator.add_constraint(row);
        }

        log::trace!(
            "{} space: {} blocks, {} local coefficients, {} interfaces, {} constraints eliminated ({} redundant)",
            kind,
            blocks.len(),
            offset,
            num_interfaces,
            eliminator.num_eliminated(),
            eliminator.num_redundant()
        );

        Ok(Self {
            kind,
            blocks,
            block_index,
            dof_map: eliminator.finish(),
        })
    }

    pub fn kind(&self) -> SpaceKind {
        self.kind
    }

    pub fn num_dofs(&self) -> usize {
        self.dof_map.num_dofs()
    }

    pub fn blocks(&self) -> &[ElemBlock] {
        &self.blocks
    }

    pub fn block(&self, leaf_id: usize) -> Option<&ElemBlock> {
        self.block_index.get(&leaf_id).map(|idx| &self.blocks[*idx])
    }

    pub fn dof_map(&self) -> &DofMap {
        &self.dof_map
    }

    /// Expand a vector of global degrees of freedom into the local coefficients of every leaf
    pub fn local_coefficients(&self, dofs: &[f64]) -> BTreeMap<usize, Vec<f64>> {
        let local = self.dof_map.expand(dofs);
        self.blocks
            .iter()
            .map(|block| (block.leaf, local[block.range()].to_vec()))
            .collect()
    }
}

/// Constraint row requiring the traces of two blocks to agree at a single point
fn trace_difference(lo: &ElemBlock, lo_trace: &[f64], hi: &ElemBlock, hi_trace: &[f64]) -> Vec<(usize, f64)> {
    let scale = lo_trace
        .iter()
        .chain(hi_trace.iter())
        .fold(0.0_f64, |acc, t| acc.max(t.abs()));

    lo.range()
        .zip(lo_trace.iter().copied())
        .chain(hi.range().zip(hi_trace.iter().map(|t| -t)))
        .filter(|(_, c)| c.abs() > TRACE_TOLERANCE * scale)
        .collect()
}

/// Trace of every basis function of a block at a set of points along an interface (`[point][basis function]`)
///
/// `side` is the fixed parametric coordinate of the interface on the leaf: +1 for the lo side and -1 for the hi side.
fn traces<SF: ShapeFn>(
    kind: SpaceKind,
    block: &ElemBlock,
    leaf: &Elem,
    interface: &Interface,
    points: &[[f64; 2]],
    side: f64,
) -> Vec<Vec<f64>> {
    let along: Vec<f64> = points
        .iter()
        .map(|p| match interface.dir {
            ParaDir::V => leaf.parametric_point(*p)[1].clamp(-1.0, 1.0),
            ParaDir::U => leaf.parametric_point(*p)[0].clamp(-1.0, 1.0),
        })
        .collect();

    let (us, vs) = match interface.dir {
        ParaDir::V => (vec![side], along),
        ParaDir::U => (along, vec![side]),
    };
    let basis: BasisFn<SF> = BasisFn::with(
        kind.degree(block.order) as usize,
        &us,
        &vs,
        leaf.parametric_mapping(),
    );

    (0..points.len())
        .map(|k| {
            let mn = match interface.dir {
                ParaDir::V => [0, k],
                ParaDir::U => [k, 0],
            };
            block
                .basis
                .iter()
                .map(|spec| match basis.value(spec, mn) {
                    Value::Scalar(s) => s,
                    Value::Vector(v) => match interface.dir {
                        ParaDir::V => v.y(),
                        ParaDir::U => v.x(),
                    },
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{KOLShapeFn, LobattoShapeFn};
    use crate::domain::field::{Field, FieldData};
    use crate::domain::mesh::element::RegionId;
    use crate::expression::FieldId;
    use std::collections::BTreeSet;

    #[test]
    fn dof_counts() {
        let mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 2]).unwrap();

        // one dof per vertex
        let h1 = ConformingSpace::build::<LobattoShapeFn>(
            SpaceKind::H1,
            &mesh,
            &ElementOrderTable::uniform(mesh.leaf_ids(), 1),
        )
        .unwrap();
        assert_eq!(h1.num_dofs(), 9);

        // vertices + 2 per edge + 4 per face
        let h1 = ConformingSpace::build::<LobattoShapeFn>(
            SpaceKind::H1,
            &mesh,
            &ElementOrderTable::uniform(mesh.leaf_ids(), 3),
        )
        .unwrap();
        assert_eq!(h1.num_dofs(), 9 + 2 * 12 + 4 * 4);

        // one dof per edge
        let hcurl = ConformingSpace::build::<LobattoShapeFn>(
            SpaceKind::HCurl,
            &mesh,
            &ElementOrderTable::uniform(mesh.leaf_ids(), 0),
        )
        .unwrap();
        assert_eq!(hcurl.num_dofs(), 12);

        // the hanging vertex is constrained; the other 4 new vertices are free
        let mut refined = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 1]).unwrap();
        refined.h_refine_elem(1).unwrap();
        let h1 = ConformingSpace::build::<LobattoShapeFn>(
            SpaceKind::H1,
            &refined,
            &ElementOrderTable::uniform(refined.leaf_ids(), 1),
        )
        .unwrap();
        assert_eq!(h1.num_dofs(), 6 + 4);
    }

    // vertices + (p - 1) per edge + (p - 1)^2 per leaf, counting only unconstrained vertices and edges
    fn h1_dofs(vertices: usize, edges: usize, leaves: usize, p: usize) -> usize {
        vertices + (p - 1) * edges + (p - 1) * (p - 1) * leaves
    }

    #[test]
    fn dof_counts_with_many_hanging_vertices() {
        // two neighboring refinements: 6 new free vertices, 12 new free edges
        let mut mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [8, 8]).unwrap();
        mesh.h_refine_elem(0).unwrap();
        mesh.h_refine_elem(1).unwrap();
        let space = ConformingSpace::build::<LobattoShapeFn>(
            SpaceKind::H1,
            &mesh,
            &ElementOrderTable::uniform(mesh.leaf_ids(), 3),
        )
        .unwrap();
        assert_eq!(space.num_dofs(), h1_dofs(81 + 6, 144 + 12, 70, 3));
        assert_eq!(space.num_dofs(), 679);

        // a checkerboard of refinements on a non-dyadic grid: only the centers and the boundary midpoints are free
        let mut mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [5, 5]).unwrap();
        for elem_id in (0..25).step_by(2) {
            mesh.h_refine_elem(elem_id).unwrap();
        }
        for p in [1, 3, 4] {
            let space = ConformingSpace::build::<LobattoShapeFn>(
                SpaceKind::H1,
                &mesh,
                &ElementOrderTable::uniform(mesh.leaf_ids(), p as u8),
            )
            .unwrap();
            assert_eq!(space.num_dofs(), h1_dofs(36 + 13 + 12, 60 + 52 + 12, 64, p));
        }
    }

    #[test]
    fn leaf_blocks() {
        let mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 1]).unwrap();
        let mut orders = ElementOrderTable::uniform(mesh.leaf_ids(), 1);
        orders.set(1, 2).unwrap();

        let space = ConformingSpace::build::<KOLShapeFn>(SpaceKind::H1, &mesh, &orders).unwrap();
        assert_eq!(space.block(1).map(|b| b.range()), Some(4..13));
        assert!(space.block(2).is_none());
        // 6 vertices, then 3 edge bubbles and a face bubble on elem 1 (the shared edge stays linear)
        assert_eq!(space.num_dofs(), 6 + 3 + 1);

        assert_eq!(
            ConformingSpace::build::<KOLShapeFn>(SpaceKind::H1, &mesh, &ElementOrderTable::uniform([0, 7], 1))
                .err(),
            Some(TableError::NotALeaf(7))
        );
    }

    #[test]
    fn traces_agree_on_hanging_interfaces() {
        let mut mesh = Mesh::rectangle(RegionId(1), [0.0, 2.0], [0.0, 1.0], [2, 1]).unwrap();
        let children = mesh.h_refine_elem(1).unwrap();

        for (kind, order) in [(SpaceKind::H1, 3), (SpaceKind::HCurl, 2)] {
            let mut orders = ElementOrderTable::uniform(mesh.leaf_ids(), order);
            orders.set(children[0], order - 1).unwrap();
            let space = ConformingSpace::build::<LobattoShapeFn>(kind, &mesh, &orders).unwrap();

            let dofs: Vec<f64> = (0..space.num_dofs())
                .map(|i| ((i * 7 + 3) % 11) as f64 / 11.0 - 0.4)
                .collect();

            let mut field = Field::new(FieldId(0), "f", kind, BTreeSet::from([RegionId(1)]), &mesh, order);
            field.set_orders(orders);
            field.set_field_data(Some(FieldData {
                local: space.local_coefficients(&dofs),
                dofs,
            }));

            // x = 1 separates elem 0 from the two western children of elem 1
            for y in [0.1, 0.3, 0.5, 0.65, 0.9] {
                let child = if y <= 0.5 { children[0] } else { children[2] };
                let west = field.sample_grid::<LobattoShapeFn>(&mesh, 0, &[1.0], &[y]).unwrap()[0];
                let east = field.sample_grid::<LobattoShapeFn>(&mesh, child, &[1.0], &[y]).unwrap()[0];

                let (w, e) = match (west, east) {
                    (Value::Scalar(w), Value::Scalar(e)) => (w, e),
                    (Value::Vector(w), Value::Vector(e)) => (w.y(), e.y()),
                    _ => panic!("mismatched values"),
                };
                assert!((w - e).abs() < 1e-10, "{}: {} != {} at y = {}", kind, w, e, y);
            }
        }
    }
}
