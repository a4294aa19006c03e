use super::space::{Point, M2D};
use json::{object, JsonValue};
use std::fmt;

/// Numeric tag identifying a group of `Element`s (a physical region of the Domain)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RegionId(pub u32);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "region {}", self.0)
    }
}

/// The `Element`s are the basic geometric unit of the Mesh in Real Space.
///
/// Elements are responsible for:
/// * Keeping a mapping between Real and Parametric Space in their portion of the Mesh
/// * Keeping track of the Region their portion of the Mesh belongs to
///
/// Elements are axis-aligned rectangles. JSON mesh files describe the `Element`s in the domain, not the `Elem`s.
/// Upon `Mesh` construction, each `Element` has one associated `Elem`, but more can be added through h-Refinements
#[derive(Debug)]
pub struct Element {
    pub id: usize,
    /// south-west, south-east, north-west, and north-east corners
    pub points: [Point; 4],
    pub region: RegionId,
}

impl Element {
    /// Create a new element defined by its coordinates in real space and its region
    pub fn new(id: usize, points: [Point; 4], region: RegionId) -> Self {
        Self { id, points, region }
    }

    /// Get the mapping between Real and Parametric Space over a portion of the Element
    pub fn parametric_mapping(&self, para_range: [[f64; 2]; 2]) -> M2D {
        let [[x_min, x_max], [y_min, y_max]] = self.real_range(para_range);

        let dx_du = (x_max - x_min) / 2.0;
        let dy_dv = (y_max - y_min) / 2.0;

        M2D::from([dx_du, 0.0], [0.0, dy_dv])
    }

    /// Real space bounds ([[x_min, x_max], [y_min, y_max]]) of a portion of the Element described in parametric space
    pub fn real_range(&self, [[u_min, u_max], [v_min, v_max]]: [[f64; 2]; 2]) -> [[f64; 2]; 2] {
        let [p_min, p_max] = [&self.points[0], &self.points[3]];
        [
            [
                map_range(u_min, -1.0, 1.0, p_min.x, p_max.x),
                map_range(u_max, -1.0, 1.0, p_min.x, p_max.x),
            ],
            [
                map_range(v_min, -1.0, 1.0, p_min.y, p_max.y),
                map_range(v_max, -1.0, 1.0, p_min.y, p_max.y),
            ],
        ]
    }

    /// Produce a Json Object that describes this Element
    #[cfg(feature = "json_export")]
    pub fn to_json(&self) -> JsonValue {
        object! {
            "id": self.id,
            "region": self.region.0,
            "points": JsonValue::from(self.points.iter().map(|p| JsonValue::from(*p)).collect::<Vec<_>>()),
        }
    }
}

pub(crate) fn map_range(val: f64, in_min: f64, in_max: f64, out_min: f64, out_max: f64) -> f64 {
    (val - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}
