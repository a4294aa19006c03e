use super::{
    element::{Element, RegionId},
    h_refinement::{HLevel, HRefError, Quadrant},
    space::{Point, M2D},
    EXPECTED_NUM_H_REFINEMENTS, MAX_H_LEVEL,
};
use json::{object, JsonValue};
use smallvec::SmallVec;
use std::sync::Arc;

/// `Elem`s are the basic geometric unit in the `Mesh` in Parametric Space
///
/// `Elem`s are responsible for keeping track of:
/// * Connections to their parent `Elem` (and their own h-refinement level)
/// * Connections to their child `Elem`s (if h-refined)
/// * Their bounds in real space
///
/// `Elem`s also maintain a connection to their associated [`Element`] for the Region tag and mappings to Real Space
///
/// ## h-Refinement
///
/// An h-Refinement splits an `Elem` into four children; one in each [`Quadrant`]:
/// ```text
///     2 ----------- 3
///     |  NW  |  NE  |
///     |------+------|
///     |  SW  |  SE  |
///     0 ----------- 1
/// ```
///
/// Coarsening removes the children again. The child `Elem`s are retired (never re-used) so that
/// `Elem` ids stay stable for the lifetime of the `Mesh`.
#[derive(Debug, Clone)]
pub struct Elem {
    pub id: usize,
    pub element: Arc<Element>,
    pub level: HLevel,
    /// real space bounds: [[x_min, x_max], [y_min, y_max]]
    pub bounds: [[f64; 2]; 2],
    children: Option<[usize; 4]>,
    ancestors: SmallVec<[(usize, Quadrant); EXPECTED_NUM_H_REFINEMENTS]>,
    retired: bool,
}

impl Elem {
    /// Construct a new (base layer) Elem covering an entire [Element]
    pub fn new(id: usize, element: Arc<Element>) -> Self {
        let bounds = element.real_range([[-1.0, 1.0], [-1.0, 1.0]]);
        Self {
            id,
            element,
            level: HLevel::default(),
            bounds,
            children: None,
            ancestors: SmallVec::new(),
            retired: false,
        }
    }

    /// Construct 4 children from an h-Refinement of this Elem
    ///
    /// Children are given sequential ids starting at `id_counter`
    pub(crate) fn h_refine(&mut self, id_counter: &mut usize) -> Result<[Elem; 4], HRefError> {
        if self.retired {
            return Err(HRefError::ElemRetired(self.id));
        }
        if self.children.is_some() {
            return Err(HRefError::ElemHasChildren(self.id));
        }
        if self.level.0 >= MAX_H_LEVEL {
            return Err(HRefError::MaxLevelExceeded(self.id));
        }

        let first_id = *id_counter;
        *id_counter += 4;

        let children = Quadrant::ALL.map(|quadrant| {
            let mut ancestors = self.ancestors.clone();
            ancestors.push((self.id, quadrant));
            let para_range = ancestors
                .iter()
                .fold([[-1.0, 1.0], [-1.0, 1.0]], |acc, (_, q)| q.sub_range(acc));

            Elem {
                id: first_id + quadrant.index(),
                element: self.element.clone(),
                level: self.level.refined(),
                bounds: self.element.real_range(para_range),
                children: None,
                ancestors,
                retired: false,
            }
        });

        self.children = Some([first_id, first_id + 1, first_id + 2, first_id + 3]);
        Ok(children)
    }

    /// Remove this Elem's children, making it a leaf again. Returns the ids of the removed children.
    pub(crate) fn coarsen(&mut self) -> Result<[usize; 4], HRefError> {
        self.children
            .take()
            .ok_or(HRefError::ElemHasNoChildren(self.id))
    }

    pub(crate) fn retire(&mut self) {
        self.retired = true;
    }

    /// Id of the Parent Elem if this Elem has a parent
    pub fn parent_id(&self) -> Option<usize> {
        self.ancestors.last().map(|(id, _)| *id)
    }

    /// Get the stack of [Quadrant]s and Elem-IDs back to this `Elem`s ancestor on the base layer of the mesh
    pub fn loc_stack(&self) -> &[(usize, Quadrant)] {
        &self.ancestors
    }

    /// Get the bounds of this `Elem` in parametric space relative to one of its ancestor `Elem`s
    pub fn relative_parametric_range(&self, from_ancestor: usize) -> Option<[[f64; 2]; 2]> {
        if from_ancestor == self.id {
            return Some([[-1.0, 1.0], [-1.0, 1.0]]);
        }

        self.ancestors
            .iter()
            .position(|(ancestor_id, _)| *ancestor_id == from_ancestor)
            .map(|starting_index| {
                self.ancestors
                    .iter()
                    .skip(starting_index)
                    .fold([[-1.0, 1.0], [-1.0, 1.0]], |acc, (_, quadrant)| {
                        quadrant.sub_range(acc)
                    })
            })
    }

    /// Get the bounds of this `Elem` in parametric space relative to its associated `Element`
    pub fn parametric_range(&self) -> [[f64; 2]; 2] {
        self.ancestors
            .iter()
            .fold([[-1.0, 1.0], [-1.0, 1.0]], |acc, (_, quadrant)| {
                quadrant.sub_range(acc)
            })
    }

    /// Gradients of the mapping from this Elem's parametric space ((-1, 1) in both directions) into real space
    pub fn parametric_mapping(&self) -> M2D {
        self.element.parametric_mapping(self.parametric_range())
    }

    /// Real space point associated with a parametric point on this Elem
    pub fn real_point(&self, [u, v]: [f64; 2]) -> [f64; 2] {
        let [[x_min, x_max], [y_min, y_max]] = self.bounds;
        [
            (u + 1.0) * (x_max - x_min) / 2.0 + x_min,
            (v + 1.0) * (y_max - y_min) / 2.0 + y_min,
        ]
    }

    /// Parametric point associated with a real space point on this Elem
    pub fn parametric_point(&self, [x, y]: [f64; 2]) -> [f64; 2] {
        let [[x_min, x_max], [y_min, y_max]] = self.bounds;
        [
            2.0 * (x - x_min) / (x_max - x_min) - 1.0,
            2.0 * (y - y_min) / (y_max - y_min) - 1.0,
        ]
    }

    /// Does this Elem contain (or touch) the point
    pub fn contains(&self, point: &Point) -> bool {
        let [[x_min, x_max], [y_min, y_max]] = self.bounds;
        let tol = 1e-12 * (x_max - x_min).max(y_max - y_min);
        point.x >= x_min - tol && point.x <= x_max + tol && point.y >= y_min - tol && point.y <= y_max + tol
    }

    /// Area of the Elem in real space
    pub fn area(&self) -> f64 {
        let [[x_min, x_max], [y_min, y_max]] = self.bounds;
        (x_max - x_min) * (y_max - y_min)
    }

    /// The region this Elem belongs to (inherited from its `Element`)
    pub fn region(&self) -> RegionId {
        self.element.region
    }

    /// Returns an array of ids for this Elem's children. Returns `None` if this Elem has no children.
    pub fn child_ids(&self) -> Option<[usize; 4]> {
        self.children
    }

    /// Has this `Elem` been h-Refined
    pub fn has_children(&self) -> bool {
        self.children.is_some()
    }

    /// Has this `Elem` been removed from the Mesh by a coarsening
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Is this `Elem` part of the active (finest) layer of the mesh
    pub fn is_leaf(&self) -> bool {
        !self.retired && self.children.is_none()
    }

    /// Produce a Json Object that describes this Elem
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "element_id": self.element.id,
            "parent": self.parent_id(),
            "active": self.is_leaf(),
            "level": self.level.0,
            "bounds": JsonValue::from(self.bounds.iter().map(|b| JsonValue::from(b.to_vec())).collect::<Vec<_>>()),
            "children": JsonValue::from(
                match &self.children {
                    Some(ids) => ids.to_vec(),
                    None => Vec::new(),
                }
            )
        }
    }
}
