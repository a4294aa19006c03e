/// A Finite Element in Parametric Space
pub mod elem;
/// A Finite Element in Real Space
pub mod element;
/// Structures and Functions to facilitate quad-tree h-refinement
pub mod h_refinement;
/// Structures and Functions to facilitate p-refinement
pub mod p_refinement;
/// Structures to describe the 2D real and parametric spaces defining a Mesh
pub mod space;

use elem::Elem;
use element::{Element, RegionId};
use h_refinement::{HLevel, HRefError};
use space::{FloatRep, ParaDir, Point};

use json::{object, JsonValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{read_to_string, File};
use std::io::BufWriter;
use std::sync::Arc;
use thiserror::Error;

/// The expected "h-Refinement" depth. This determines the stack allocation size of some `SmallVec`s related to h-Refinement
pub const EXPECTED_NUM_H_REFINEMENTS: usize = 8;

/// Maximum h-Refinement level. h-Refinements will fail for Elems at this level.
pub const MAX_H_LEVEL: u8 = 15;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Unable to read Mesh file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse Mesh file as JSON: {0}")]
    Json(#[from] json::Error),
    #[error("Mesh file is malformed: {0}")]
    Format(String),
    #[error("Element {0} is not an axis-aligned rectangle with positive area; Cannot construct Mesh!")]
    NonRectangularElement(usize),
    #[error("A Mesh must be constructed with at least one Element")]
    Empty,
}

/// Information used to Define the geometric structure and refinement state of a Domain.
///
/// The Mesh is a forest of quad-trees: one tree per [`Element`] rooted at the base-layer [`Elem`] with the same id.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub elements: Vec<Arc<Element>>,
    pub elems: Vec<Elem>,
}

impl Mesh {
    /// Construct a Mesh from a list of rectangles described by their corner points (south-west, south-east, north-west, north-east) and Region
    pub fn from_elements(
        element_descs: impl IntoIterator<Item = ([Point; 4], RegionId)>,
    ) -> Result<Self, MeshError> {
        let elements: Vec<Arc<Element>> = element_descs
            .into_iter()
            .enumerate()
            .map(|(element_id, (points, region))| {
                if is_axis_aligned_rectangle(&points) {
                    Ok(Arc::new(Element::new(element_id, points, region)))
                } else {
                    Err(MeshError::NonRectangularElement(element_id))
                }
            })
            .collect::<Result<_, _>>()?;

        if elements.is_empty() {
            return Err(MeshError::Empty);
        }

        let elems = elements
            .iter()
            .map(|element| Elem::new(element.id, element.clone()))
            .collect();

        Ok(Self { elements, elems })
    }

    /// Construct a Mesh from a JSON file with the following format
    ///
    /// The first "Element" and "Node" describe the meaning of each variable
    ///
    /// The following entries in each array describe this two element mesh:
    /// ```text
    ///     3               4               5
    /// 0.5 *---------------*---------------*
    ///     |               |               |
    ///     |   region 1    |   region 2    |
    ///     |               |               |
    /// 0.0 *---------------*---------------*
    ///  y  0               1               2
    ///  x 0.0             1.0             2.0
    /// ```
    ///
    /// mesh.json
    /// ```JSON
    /// {
    ///     "Elements": [
    ///         {
    ///             "region": region_tag,
    ///             "node_ids": [node_0_id, node_1_id, node_2_id, node_3_id],
    ///         },
    ///         {
    ///             "region": 1,
    ///             "node_ids": [1, 2, 4, 5],
    ///         },
    ///         {
    ///             "region": 2,
    ///             "node_ids": [2, 3, 5, 6],
    ///         }
    ///     ],
    ///     "Nodes": [
    ///         [x_coordinate, y_coordinate],
    ///         [0.0, 0.0],
    ///         [1.0, 0.0],
    ///         [2.0, 0.0],
    ///         [0.0, 0.5],
    ///         [1.0, 0.5],
    ///         [2.0, 0.5],
    ///     ]
    /// }
    /// ```
    pub fn from_file(path: impl AsRef<str>) -> Result<Self, MeshError> {
        let mesh_file_contents = read_to_string(path.as_ref())?;
        let mesh_file_json = json::parse(&mesh_file_contents)?;

        let points = parse_node_information(&mesh_file_json)?;
        let element_info = parse_element_information(&mesh_file_json)?;

        let element_descs = element_info
            .into_iter()
            .map(|(region, node_ids)| {
                let mut corners = [Point::default(); 4];
                for (corner, node_id) in corners.iter_mut().zip(node_ids) {
                    *corner = *points.get(node_id).ok_or_else(|| {
                        MeshError::Format(format!("Node {} does not exist", node_id))
                    })?;
                }
                Ok((corners, region))
            })
            .collect::<Result<Vec<_>, MeshError>>()?;

        let mesh = Self::from_elements(element_descs)?;
        log::debug!(
            "loaded mesh from '{}' with {} elements",
            path.as_ref(),
            mesh.elements.len()
        );

        Ok(mesh)
    }

    /// Construct a structured Mesh of `nx` by `ny` rectangles covering `[x_min, x_max] x [y_min, y_max]`, all in a single Region
    pub fn rectangle(
        region: RegionId,
        [x_min, x_max]: [f64; 2],
        [y_min, y_max]: [f64; 2],
        [nx, ny]: [usize; 2],
    ) -> Result<Self, MeshError> {
        if nx == 0 || ny == 0 {
            return Err(MeshError::Empty);
        }

        let xs: Vec<f64> = (0..=nx)
            .map(|i| x_min + (x_max - x_min) * (i as f64) / (nx as f64))
            .collect();
        let ys: Vec<f64> = (0..=ny)
            .map(|j| y_min + (y_max - y_min) * (j as f64) / (ny as f64))
            .collect();

        Self::from_elements((0..ny).flat_map(|j| {
            let xs = &xs;
            let ys = &ys;
            (0..nx).map(move |i| {
                (
                    [
                        Point::new(xs[i], ys[j]),
                        Point::new(xs[i + 1], ys[j]),
                        Point::new(xs[i], ys[j + 1]),
                        Point::new(xs[i + 1], ys[j + 1]),
                    ],
                    region,
                )
            })
        }))
    }

    /// Print the mesh to a JSON file specified by path.
    #[cfg(feature = "json_export")]
    pub fn export_to_json(&self, path: impl AsRef<str>) -> std::io::Result<()> {
        let f = File::create(path.as_ref())?;
        let mut w = BufWriter::new(&f);

        let mesh_object = object! {
            "Elements": JsonValue::from(self.elements.iter().map(|element| element.to_json()).collect::<Vec<_>>()),
            "Elems": JsonValue::from(self.elems.iter().filter(|elem| !elem.is_retired()).map(|elem| elem.to_json()).collect::<Vec<_>>()),
        };

        mesh_object.write_pretty(&mut w, 4)?;

        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // General Data Retrieval
    // ----------------------------------------------------------------------------------------------------

    /// Get an [`Elem`] by its id
    pub fn elem(&self, elem_id: usize) -> Result<&Elem, HRefError> {
        self.elems
            .get(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))
    }

    /// Iterate over the active (leaf) [`Elem`]s in order of their ids
    pub fn leaves(&self) -> impl Iterator<Item = &Elem> + '_ {
        self.elems.iter().filter(|elem| elem.is_leaf())
    }

    /// Ids of all active (leaf) [`Elem`]s
    pub fn leaf_ids(&self) -> Vec<usize> {
        self.leaves().map(|elem| elem.id).collect()
    }

    /// Ids of the active (leaf) [`Elem`]s in a Region
    pub fn leaf_ids_in(&self, region: RegionId) -> Vec<usize> {
        self.leaves()
            .filter(|elem| elem.region() == region)
            .map(|elem| elem.id)
            .collect()
    }

    /// All Region tags present in the Mesh
    pub fn regions(&self) -> BTreeSet<RegionId> {
        self.elements.iter().map(|element| element.region).collect()
    }

    /// Maximum h-Refinement level among the leaves of the Mesh
    pub fn max_level(&self) -> HLevel {
        self.leaves()
            .map(|elem| elem.level)
            .max()
            .unwrap_or_default()
    }

    /// Get a list of an [`Elem`]s descendant's IDs
    pub fn descendant_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, HRefError> {
        self.elem(elem_id)?;
        let mut descendants = Vec::new();
        self.rec_descendant_elems(elem_id, include_starting_elem, &mut descendants);
        Ok(descendants)
    }

    fn rec_descendant_elems(&self, elem_id: usize, include: bool, desc: &mut Vec<usize>) {
        if include {
            desc.push(elem_id);
        }
        if let Some(child_elem_ids) = self.elems[elem_id].child_ids() {
            for cei in child_elem_ids {
                self.rec_descendant_elems(cei, true, desc);
            }
        }
    }

    /// Get the IDs of the leaves below an [`Elem`] (the `Elem` itself if it is a leaf)
    pub fn leaf_descendants(&self, elem_id: usize) -> Result<Vec<usize>, HRefError> {
        Ok(self
            .descendant_elems(elem_id, true)?
            .into_iter()
            .filter(|id| self.elems[*id].is_leaf())
            .collect())
    }

    /// Get a list of an [`Elem`]s ancestors's IDs (nearest first)
    pub fn ancestor_elems(
        &self,
        elem_id: usize,
        include_starting_elem: bool,
    ) -> Result<Vec<usize>, HRefError> {
        let elem = self.elem(elem_id)?;
        let mut ancestors = Vec::with_capacity(elem.loc_stack().len() + 1);
        if include_starting_elem {
            ancestors.push(elem_id);
        }
        ancestors.extend(elem.loc_stack().iter().rev().map(|(id, _)| *id));
        Ok(ancestors)
    }

    /// Find the leaf containing a point (the first one in id order if the point is on a boundary between leaves)
    pub fn leaf_containing(&self, point: &Point) -> Option<usize> {
        let root = self
            .elements
            .iter()
            .find(|element| self.elems[element.id].contains(point))?
            .id;

        self.leaf_below(root, point)
    }

    /// Find the leaf below an [`Elem`] (or the `Elem` itself) which contains a point
    pub fn leaf_below(&self, elem_id: usize, point: &Point) -> Option<usize> {
        let mut current = elem_id;
        if !self.elems.get(current)?.contains(point) {
            return None;
        }

        while let Some(children) = self.elems[current].child_ids() {
            current = children
                .into_iter()
                .find(|child_id| self.elems[*child_id].contains(point))?;
        }

        Some(current)
    }

    /// Find the leaves that overlap a real-space rectangle with a positive area
    pub fn overlapping_leaves(&self, bounds: [[f64; 2]; 2]) -> Vec<usize> {
        let mut leaves = Vec::new();
        for element in self.elements.iter() {
            self.rec_overlapping_leaves(element.id, &bounds, &mut leaves);
        }
        leaves
    }

    fn rec_overlapping_leaves(&self, elem_id: usize, bounds: &[[f64; 2]; 2], leaves: &mut Vec<usize>) {
        let elem = &self.elems[elem_id];
        if intersection(&elem.bounds, bounds).is_none() {
            return;
        }

        match elem.child_ids() {
            Some(children) => {
                for child_id in children {
                    self.rec_overlapping_leaves(child_id, bounds, leaves);
                }
            }
            None => leaves.push(elem_id),
        }
    }

    /// Find all segments shared by two leaves (including segments between leaves of different sizes)
    pub fn interfaces(&self) -> Vec<Interface> {
        let mut east_sides: SideMap = BTreeMap::new();
        let mut west_sides: SideMap = BTreeMap::new();
        let mut north_sides: SideMap = BTreeMap::new();
        let mut south_sides: SideMap = BTreeMap::new();

        for leaf in self.leaves() {
            let [[x_min, x_max], [y_min, y_max]] = leaf.bounds;
            for (sides, coord, span) in [
                (&mut east_sides, x_max, [y_min, y_max]),
                (&mut west_sides, x_min, [y_min, y_max]),
                (&mut north_sides, y_max, [x_min, x_max]),
                (&mut south_sides, y_min, [x_min, x_max]),
            ] {
                sides
                    .entry(FloatRep::from(coord))
                    .or_insert_with(|| (coord, Vec::new()))
                    .1
                    .push((leaf.id, span));
            }
        }

        let mut interfaces = Vec::new();
        for (dir, lo_sides, hi_sides) in [
            (ParaDir::V, &mut east_sides, &mut west_sides),
            (ParaDir::U, &mut north_sides, &mut south_sides),
        ] {
            for (line, (coord, lo_list)) in lo_sides.iter_mut() {
                if let Some((_, hi_list)) = hi_sides.get_mut(line) {
                    lo_list.sort_by(|a, b| a.1[0].total_cmp(&b.1[0]));
                    hi_list.sort_by(|a, b| a.1[0].total_cmp(&b.1[0]));
                    sweep_overlaps(dir, *coord, lo_list, hi_list, &mut interfaces);
                }
            }
        }

        interfaces
    }

    // ----------------------------------------------------------------------------------------------------
    // h-refinement methods
    // ----------------------------------------------------------------------------------------------------

    /// Split a leaf [`Elem`] into four children. Returns the ids of the new children.
    pub fn h_refine_elem(&mut self, elem_id: usize) -> Result<[usize; 4], HRefError> {
        let mut id_counter = self.elems.len();
        let children = self
            .elems
            .get_mut(elem_id)
            .ok_or(HRefError::ElemDoesntExist(elem_id))?
            .h_refine(&mut id_counter)?;

        let ids = [children[0].id, children[1].id, children[2].id, children[3].id];
        self.elems.extend(children);
        Ok(ids)
    }

    /// Split a leaf [`Elem`] uniformly until its descendants reach `level`. Returns the new leaves.
    pub fn h_refine_to_level(&mut self, elem_id: usize, level: HLevel) -> Result<Vec<usize>, HRefError> {
        let mut frontier = vec![elem_id];
        while self.elem(frontier[0])?.level < level {
            let mut next = Vec::with_capacity(frontier.len() * 4);
            for id in frontier {
                next.extend(self.h_refine_elem(id)?);
            }
            frontier = next;
        }
        Ok(frontier)
    }

    /// Merge the (leaf) children of an [`Elem`] back into it. The children are retired.
    pub fn coarsen_elem(&mut self, elem_id: usize) -> Result<[usize; 4], HRefError> {
        let children = self
            .elem(elem_id)?
            .child_ids()
            .ok_or(HRefError::ElemHasNoChildren(elem_id))?;

        if let Some(child) = children.iter().find(|id| !self.elems[**id].is_leaf()) {
            return Err(HRefError::ChildNotLeaf {
                parent: elem_id,
                child: *child,
            });
        }

        let children = self.elems[elem_id].coarsen()?;
        for child_id in children {
            self.elems[child_id].retire();
        }
        Ok(children)
    }
}

/// A segment shared by two leaves of a [`Mesh`]
#[derive(Clone, Debug, PartialEq)]
pub struct Interface {
    /// Direction of the segment: `U` for horizontal segments and `V` for vertical segments
    pub dir: ParaDir,
    /// The leaf on the west (vertical segment) or south (horizontal segment) side
    pub lo: usize,
    /// The leaf on the east (vertical segment) or north (horizontal segment) side
    pub hi: usize,
    /// Fixed coordinate of the segment (x for vertical, y for horizontal)
    pub coord: f64,
    /// Extent of the segment along its direction
    pub span: [f64; 2],
}

impl Interface {
    /// Real space point at a position (-1, 1) along the segment
    pub fn point_at(&self, s: f64) -> [f64; 2] {
        let t = (s + 1.0) * (self.span[1] - self.span[0]) / 2.0 + self.span[0];
        match self.dir {
            ParaDir::V => [self.coord, t],
            ParaDir::U => [t, self.coord],
        }
    }
}

type SideMap = BTreeMap<FloatRep, (f64, Vec<(usize, [f64; 2])>)>;

// both lists are sorted by the start of their spans
fn sweep_overlaps(
    dir: ParaDir,
    coord: f64,
    lo_list: &[(usize, [f64; 2])],
    hi_list: &[(usize, [f64; 2])],
    interfaces: &mut Vec<Interface>,
) {
    let (mut a, mut b) = (0, 0);
    while a < lo_list.len() && b < hi_list.len() {
        let (lo_id, [lo_start, lo_end]) = lo_list[a];
        let (hi_id, [hi_start, hi_end]) = hi_list[b];

        let start = lo_start.max(hi_start);
        let end = lo_end.min(hi_end);
        let tol = 1e-12 * (lo_end - lo_start).max(hi_end - hi_start);

        if end - start > tol {
            interfaces.push(Interface {
                dir,
                lo: lo_id,
                hi: hi_id,
                coord,
                span: [start, end],
            });
        }

        if lo_end < hi_end {
            a += 1;
        } else {
            b += 1;
        }
    }
}

pub(crate) fn intersection(a: &[[f64; 2]; 2], b: &[[f64; 2]; 2]) -> Option<[[f64; 2]; 2]> {
    let x = [a[0][0].max(b[0][0]), a[0][1].min(b[0][1])];
    let y = [a[1][0].max(b[1][0]), a[1][1].min(b[1][1])];
    let tol = 1e-12 * (a[0][1] - a[0][0]).max(a[1][1] - a[1][0]);

    if x[1] - x[0] > tol && y[1] - y[0] > tol {
        Some([x, y])
    } else {
        None
    }
}

fn is_axis_aligned_rectangle([sw, se, nw, ne]: &[Point; 4]) -> bool {
    use std::cmp::Ordering::*;
    sw.y_order(se) == Equal
        && nw.y_order(ne) == Equal
        && sw.x_order(nw) == Equal
        && se.x_order(ne) == Equal
        && sw.x_order(se) == Less
        && sw.y_order(nw) == Less
}

fn parse_element_information(mesh_json: &JsonValue) -> Result<Vec<(RegionId, [usize; 4])>, MeshError> {
    if !mesh_json["Elements"].is_array() {
        return Err(MeshError::Format(String::from(
            "'Elements' array is missing",
        )));
    }

    mesh_json["Elements"]
        .members()
        .enumerate()
        .map(|(element_idx, element_obj)| {
            let region = element_obj["region"].as_u32().ok_or_else(|| {
                MeshError::Format(format!("Element {} has no valid 'region'", element_idx))
            })?;

            let node_ids: Vec<usize> = element_obj["node_ids"]
                .members()
                .map(|id| id.as_usize())
                .collect::<Option<_>>()
                .ok_or_else(|| {
                    MeshError::Format(format!("Element {} has invalid 'node_ids'", element_idx))
                })?;

            let node_ids: [usize; 4] = node_ids.try_into().map_err(|_| {
                MeshError::Format(format!(
                    "Element {} must reference exactly 4 nodes",
                    element_idx
                ))
            })?;

            Ok((RegionId(region), node_ids))
        })
        .collect()
}

fn parse_node_information(mesh_json: &JsonValue) -> Result<Vec<Point>, MeshError> {
    if !mesh_json["Nodes"].is_array() {
        return Err(MeshError::Format(String::from("'Nodes' array is missing")));
    }

    mesh_json["Nodes"]
        .members()
        .enumerate()
        .map(|(node_idx, node_arr)| match (node_arr[0].as_f64(), node_arr[1].as_f64()) {
            (Some(x), Some(y)) => Ok(Point::new(x, y)),
            _ => Err(MeshError::Format(format!(
                "Node {} must have an x and y coordinate",
                node_idx
            ))),
        })
        .collect()
}
