mod glq;
mod kol;
mod lobatto;

use crate::domain::mesh::space::{M2D, V2D};
use crate::expression::Value;
use std::fmt;

pub use glq::{gauss_quadrature_points, points_for_order, scale_gauss_quad_points, GaussRule, GaussRules};
pub use kol::KOLShapeFn;
pub use lobatto::LobattoShapeFn;

/// Hierarchical Shape Function along a single direction (defined over (-1.0, +1.0)).
/// [LobattoShapeFn] and [KOLShapeFn] implement this trait.
/// Alternate Hierarchical Basis Functions can be used by implementing this trait.
///
/// * `poly(n)` must be continuous-trace friendly: `poly(0)` and `poly(1)` are the only functions which are non-zero at -1 and +1 respectively, and all higher orders vanish at both ends.
/// * `power(n)` spans the polynomials of degree n along with the lower orders.
pub trait ShapeFn: Sized + Send + Sync {
    /// Evaluate all shape functions up to `max_order` at a set of `points`
    fn with(max_order: usize, points: &[f64]) -> Self;

    fn power(&self, n: usize, p: usize) -> f64;

    fn poly(&self, n: usize, p: usize) -> f64;
}

/// The function-space kinds a Field can be interpolated with
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SpaceKind {
    /// Scalar, nodal-continuous
    H1,
    /// Vector, tangentially-continuous (curl-conforming)
    HCurl,
}

impl SpaceKind {
    /// Lowest usable expansion order
    pub fn min_order(&self) -> u8 {
        match self {
            Self::H1 => 1,
            Self::HCurl => 0,
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(self, Self::HCurl)
    }

    /// Maximum polynomial degree (in either variable) of an expansion of the given order
    pub fn degree(&self, order: u8) -> u8 {
        match self {
            Self::H1 => order,
            Self::HCurl => order + 1,
        }
    }

    /// The value of a Field of this kind where it has no data
    pub fn zero(&self) -> Value {
        match self {
            Self::H1 => Value::Scalar(0.0),
            Self::HCurl => Value::Vector(V2D::zero()),
        }
    }
}

impl fmt::Display for SpaceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::H1 => write!(f, "h1"),
            Self::HCurl => write!(f, "hcurl"),
        }
    }
}

/// Orientation of a Basis Function in Parametric Space
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BasisDir {
    /// u-directed vector function: power(i, u) * poly(j, v)
    U,
    /// v-directed vector function: poly(i, u) * power(j, v)
    V,
    /// scalar function: poly(i, u) * poly(j, v)
    W,
}

impl fmt::Display for BasisDir {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BasisDir::U => write!(f, "U"),
            BasisDir::V => write!(f, "V"),
            BasisDir::W => write!(f, "W"),
        }
    }
}

/// Description of a single local Basis Function on an Elem
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BasisSpec {
    pub i: u8,
    pub j: u8,
    pub dir: BasisDir,
}

impl fmt::Display for BasisSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}, {}] - {} dir", self.i, self.j, self.dir)
    }
}

/// The local basis of a Field of some [SpaceKind] on an Elem with the given expansion order
///
/// * H1 (order p >= 1): `W`-directed for i, j ∈ [0, p]
/// * HCurl (order p >= 0): `U`-directed for i ∈ [0, p] and j ∈ [0, p + 1]; `V`-directed for i ∈ [0, p + 1] and j ∈ [0, p]
pub fn basis_for(kind: SpaceKind, order: u8) -> Vec<BasisSpec> {
    match kind {
        SpaceKind::H1 => (0..=order)
            .flat_map(|i| (0..=order).map(move |j| BasisSpec { i, j, dir: BasisDir::W }))
            .collect(),
        SpaceKind::HCurl => (0..=order)
            .flat_map(|i| (0..=order + 1).map(move |j| BasisSpec { i, j, dir: BasisDir::U }))
            .chain(
                (0..=order + 1)
                    .flat_map(|i| (0..=order).map(move |j| BasisSpec { i, j, dir: BasisDir::V })),
            )
            .collect(),
    }
}

/// Structure used to evaluate Basis Functions at a tensor grid of parametric points on an Elem
pub struct BasisFn<SF: ShapeFn> {
    /// Inverse of the transformation from real to parametric space
    pub ti: M2D,
    u_shapes: SF,
    v_shapes: SF,
}

impl<SF: ShapeFn> BasisFn<SF> {
    /// Sample shape functions up to `max_order` at the `u_points` x `v_points` grid
    ///
    /// `mapping` is the Elem's parametric mapping (see [`crate::domain::mesh::elem::Elem::parametric_mapping`])
    pub fn with(max_order: usize, u_points: &[f64], v_points: &[f64], mapping: M2D) -> Self {
        Self {
            ti: mapping.inverse(),
            u_shapes: SF::with(max_order, u_points),
            v_shapes: SF::with(max_order, v_points),
        }
    }

    pub fn f_u(&self, [i, j]: [usize; 2], [m, n]: [usize; 2]) -> V2D {
        self.ti.u * (self.u_shapes.power(i, m) * self.v_shapes.poly(j, n))
    }

    pub fn f_v(&self, [i, j]: [usize; 2], [m, n]: [usize; 2]) -> V2D {
        self.ti.v * (self.u_shapes.poly(i, m) * self.v_shapes.power(j, n))
    }

    pub fn f_w(&self, [i, j]: [usize; 2], [m, n]: [usize; 2]) -> f64 {
        self.u_shapes.poly(i, m) * self.v_shapes.poly(j, n)
    }

    /// Value of a basis function at sample point [m, n]
    pub fn value(&self, spec: &BasisSpec, mn: [usize; 2]) -> Value {
        let ij = [spec.i as usize, spec.j as usize];
        match spec.dir {
            BasisDir::U => Value::Vector(self.f_u(ij, mn)),
            BasisDir::V => Value::Vector(self.f_v(ij, mn)),
            BasisDir::W => Value::Scalar(self.f_w(ij, mn)),
        }
    }
}
