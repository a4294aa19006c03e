use crate::domain::mesh::{h_refinement::HLevel, p_refinement::merged_order, Mesh};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TableError {
    #[error("Elem {0} is not covered by this table")]
    UncoveredElem(usize),
    #[error("Leaf {0} has no ancestor or descendant in the previous Mesh; Cannot transfer its order")]
    Untransferable(usize),
    #[error("Elem {0} is not a leaf of the Mesh")]
    NotALeaf(usize),
}

/// The subdivision level of every leaf in (a part of) a [Mesh]
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RefinementTable {
    levels: BTreeMap<usize, HLevel>,
}

impl RefinementTable {
    /// Table covering every leaf of the Mesh
    pub fn from_mesh(mesh: &Mesh) -> Self {
        Self {
            levels: mesh.leaves().map(|leaf| (leaf.id, leaf.level)).collect(),
        }
    }

    /// Table covering a subset of the Mesh's leaves
    pub fn from_leaves(mesh: &Mesh, leaf_ids: impl IntoIterator<Item = usize>) -> Self {
        Self {
            levels: leaf_ids
                .into_iter()
                .filter_map(|id| mesh.elems.get(id).map(|elem| (id, elem.level)))
                .collect(),
        }
    }

    pub fn get(&self, elem_id: usize) -> Result<HLevel, TableError> {
        self.levels
            .get(&elem_id)
            .copied()
            .ok_or(TableError::UncoveredElem(elem_id))
    }

    pub fn set(&mut self, elem_id: usize, level: HLevel) -> Result<(), TableError> {
        match self.levels.get_mut(&elem_id) {
            Some(current) => {
                *current = level;
                Ok(())
            }
            None => Err(TableError::UncoveredElem(elem_id)),
        }
    }

    /// Elems whose level differs between the two tables (or which are only covered by one of them)
    pub fn diff(&self, other: &Self) -> BTreeSet<usize> {
        diff_maps(&self.levels, &other.levels)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, HLevel)> + '_ {
        self.levels.iter().map(|(id, level)| (*id, *level))
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

/// The polynomial expansion order of a Field on every leaf of its Regions
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ElementOrderTable {
    orders: BTreeMap<usize, u8>,
}

impl ElementOrderTable {
    /// The same order on every leaf in `leaf_ids`
    pub fn uniform(leaf_ids: impl IntoIterator<Item = usize>, order: u8) -> Self {
        Self {
            orders: leaf_ids.into_iter().map(|id| (id, order)).collect(),
        }
    }

    pub fn get(&self, elem_id: usize) -> Result<u8, TableError> {
        self.orders
            .get(&elem_id)
            .copied()
            .ok_or(TableError::UncoveredElem(elem_id))
    }

    pub fn set(&mut self, elem_id: usize, order: u8) -> Result<(), TableError> {
        match self.orders.get_mut(&elem_id) {
            Some(current) => {
                *current = order;
                Ok(())
            }
            None => Err(TableError::UncoveredElem(elem_id)),
        }
    }

    /// Extend the table to cover new leaves (existing entries are kept)
    pub fn cover(&mut self, leaf_ids: impl IntoIterator<Item = usize>, order: u8) {
        for id in leaf_ids {
            self.orders.entry(id).or_insert(order);
        }
    }

    /// Elems whose order differs between the two tables (or which are only covered by one of them)
    pub fn diff(&self, other: &Self) -> BTreeSet<usize> {
        diff_maps(&self.orders, &other.orders)
    }

    pub fn contains(&self, elem_id: usize) -> bool {
        self.orders.contains_key(&elem_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.orders.iter().map(|(id, order)| (*id, *order))
    }

    pub fn leaf_ids(&self) -> impl Iterator<Item = usize> + '_ {
        self.orders.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    pub fn max_order(&self) -> Option<u8> {
        self.orders.values().copied().max()
    }

    /// Carry the table over to the leaves of a rebuilt Mesh
    ///
    /// * leaves that still exist keep their order
    /// * new children inherit the order of their nearest covered ancestor
    /// * merged parents take the maximum order of their previous descendants
    pub fn transferred(
        &self,
        old_mesh: &Mesh,
        new_mesh: &Mesh,
        new_leaf_ids: impl IntoIterator<Item = usize>,
    ) -> Result<Self, TableError> {
        let mut orders = BTreeMap::new();

        for leaf_id in new_leaf_ids {
            let order = match self.orders.get(&leaf_id) {
                Some(order) => Some(*order),
                None => self
                    .inherited_order(new_mesh, leaf_id)
                    .or_else(|| self.merged_order(old_mesh, leaf_id)),
            };
            orders.insert(leaf_id, order.ok_or(TableError::Untransferable(leaf_id))?);
        }

        Ok(Self { orders })
    }

    fn inherited_order(&self, new_mesh: &Mesh, leaf_id: usize) -> Option<u8> {
        new_mesh
            .ancestor_elems(leaf_id, false)
            .ok()?
            .into_iter()
            .find_map(|ancestor_id| self.orders.get(&ancestor_id).copied())
    }

    fn merged_order(&self, old_mesh: &Mesh, leaf_id: usize) -> Option<u8> {
        let descendants = old_mesh.leaf_descendants(leaf_id).ok()?;
        merged_order(
            descendants
                .into_iter()
                .filter_map(|id| self.orders.get(&id).copied()),
        )
    }
}

fn diff_maps<V: PartialEq>(a: &BTreeMap<usize, V>, b: &BTreeMap<usize, V>) -> BTreeSet<usize> {
    a.iter()
        .filter(|(id, value)| b.get(id) != Some(value))
        .map(|(id, _)| *id)
        .chain(b.keys().filter(|id| !a.contains_key(id)).copied())
        .collect()
}
