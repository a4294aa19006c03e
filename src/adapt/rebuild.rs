use super::tables::RefinementTable;
use crate::domain::mesh::{h_refinement::HRefError, Mesh};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshRebuildError {
    #[error("Only some children of Elem {parent} asked to be merged; Cannot coarsen!")]
    InconsistentCoarsening { parent: usize },
    #[error("Leaf {elem} at level {level} was planned at level {target}; Leaves can only be coarsened by one level per pass!")]
    CoarseningTooDeep { elem: usize, level: u8, target: u8 },
    #[error("Elem {0} does not exist")]
    UnknownElem(usize),
    #[error("Elem {0} is not a leaf; Only leaves can be given a target level!")]
    NotALeaf(usize),
    #[error("h-Refinement failed: {0}")]
    HRef(#[from] HRefError),
}

/// Produces a new Mesh topology from a set of planned leaf levels
pub trait MeshRebuilder: Send + Sync {
    fn rebuild(&self, mesh: &Mesh, targets: &RefinementTable) -> Result<Mesh, MeshRebuildError>;
}

/// Rebuilds a quad-tree [`Mesh`]: merges complete sibling groups planned one level up, then splits leaves planned deeper
///
/// Elem ids are stable: new Elems are appended, and merged children are retired.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuadTreeRebuilder;

impl MeshRebuilder for QuadTreeRebuilder {
    fn rebuild(&self, mesh: &Mesh, targets: &RefinementTable) -> Result<Mesh, MeshRebuildError> {
        let mut merges = BTreeSet::new();
        let mut splits = Vec::new();

        for (elem_id, target) in targets.iter() {
            let elem = mesh
                .elems
                .get(elem_id)
                .ok_or(MeshRebuildError::UnknownElem(elem_id))?;
            if !elem.is_leaf() {
                return Err(MeshRebuildError::NotALeaf(elem_id));
            }

            if target > elem.level {
                splits.push((elem_id, target));
            } else if target < elem.level {
                match elem.parent_id() {
                    Some(parent_id) if target.0 + 1 == elem.level.0 => {
                        merges.insert(parent_id);
                    }
                    _ => {
                        return Err(MeshRebuildError::CoarseningTooDeep {
                            elem: elem_id,
                            level: elem.level.0,
                            target: target.0,
                        })
                    }
                }
            }
        }

        let mut rebuilt = mesh.clone();

        for parent_id in merges {
            let parent_level = mesh.elems[parent_id].level;
            let complete = mesh.elems[parent_id]
                .child_ids()
                .map(|children| {
                    children
                        .iter()
                        .all(|child| matches!(targets.get(*child), Ok(level) if level == parent_level))
                })
                .unwrap_or(false);

            if !complete {
                return Err(MeshRebuildError::InconsistentCoarsening { parent: parent_id });
            }

            rebuilt.coarsen_elem(parent_id)?;
            log::trace!("merged the children of elem {}", parent_id);
        }

        for (elem_id, target) in splits {
            let new_leaves = rebuilt.h_refine_to_level(elem_id, target)?;
            log::trace!(
                "split elem {} into {} leaves at level {}",
                elem_id,
                new_leaves.len(),
                target.0
            );
        }

        Ok(rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mesh::{element::RegionId, h_refinement::HLevel};

    #[test]
    fn split_and_merge() {
        let mut mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 1]).unwrap();
        let children = mesh.h_refine_elem(0).unwrap();

        let mut targets = RefinementTable::from_mesh(&mesh);
        targets.set(1, HLevel(2)).unwrap();
        for child in children {
            targets.set(child, HLevel(0)).unwrap();
        }

        let rebuilt = QuadTreeRebuilder.rebuild(&mesh, &targets).unwrap();

        assert!(rebuilt.elems[0].is_leaf());
        assert!(children.iter().all(|c| rebuilt.elems[*c].is_retired()));
        assert_eq!(rebuilt.leaves().filter(|l| l.level == HLevel(2)).count(), 16);
        assert_eq!(rebuilt.leaf_ids().len(), 17);

        // the input Mesh is untouched
        assert_eq!(mesh.leaf_ids().len(), 5);
    }

    #[test]
    fn unchanged_targets() {
        let mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 2]).unwrap();
        let rebuilt = QuadTreeRebuilder
            .rebuild(&mesh, &RefinementTable::from_mesh(&mesh))
            .unwrap();
        assert_eq!(rebuilt.leaf_ids(), mesh.leaf_ids());
        assert_eq!(rebuilt.elems.len(), mesh.elems.len());
    }

    #[test]
    fn rebuild_errors() {
        let mut mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [1, 1]).unwrap();
        let children = mesh.h_refine_elem(0).unwrap();
        let grandchildren = mesh.h_refine_elem(children[0]).unwrap();

        // a partial sibling group
        let mut targets = RefinementTable::from_mesh(&mesh);
        targets.set(grandchildren[0], HLevel(1)).unwrap();
        assert_eq!(
            QuadTreeRebuilder.rebuild(&mesh, &targets).err(),
            Some(MeshRebuildError::InconsistentCoarsening { parent: children[0] })
        );

        // two levels at once
        let mut targets = RefinementTable::from_mesh(&mesh);
        targets.set(grandchildren[1], HLevel(0)).unwrap();
        assert_eq!(
            QuadTreeRebuilder.rebuild(&mesh, &targets).err(),
            Some(MeshRebuildError::CoarseningTooDeep {
                elem: grandchildren[1],
                level: 2,
                target: 0
            })
        );

        // non-leaf and unknown Elems
        let mut non_leaf = RefinementTable::from_leaves(&mesh, [0]);
        non_leaf.set(0, HLevel(1)).unwrap();
        assert_eq!(
            QuadTreeRebuilder.rebuild(&mesh, &non_leaf).err(),
            Some(MeshRebuildError::NotALeaf(0))
        );
        let unknown = RefinementTable::from_leaves(&Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [5, 5]).unwrap(), [20]);
        assert_eq!(
            QuadTreeRebuilder.rebuild(&mesh, &unknown).err(),
            Some(MeshRebuildError::UnknownElem(20))
        );
    }
}
