//! hp-Adaptive Mesh and Field refinement for 2D Finite Element problems
//!
//! A [Domain] holds a quad-tree [Mesh] of rectangles and a set of [Field]s (H1 or H(curl)) whose
//! expansion orders can vary from leaf to leaf. Adaptivity settings map criterion expressions onto
//! target h-Refinement levels and expansion orders. Each call to [`Domain::adapt`] rebuilds the Mesh,
//! updates the Field orders, and transfers existing Field data onto the new configuration with an L2
//! projection.
//!
//! ```
//! use hp_adapt::{Domain, Expr, Mesh, RegionId, SpaceKind, Target};
//!
//! let mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [4, 4]).unwrap();
//! let mut domain = Domain::new(mesh);
//!
//! let v = domain.add_field("v", SpaceKind::H1, 2).unwrap();
//! domain.set_value(v, Target::All, Expr::x().powi(2), 0).unwrap();
//! domain.set_p_adaptivity(v, Expr::x(), 1, 3).unwrap();
//!
//! while domain.adapt(0).unwrap() {}
//!
//! let orders = domain.field_orders(v).unwrap();
//! assert!(orders.iter().all(|(_, order)| (1..=3).contains(&order)));
//! ```

/// Planning, Mesh rebuilding, and solution transfer
pub mod adapt;
/// Structures and Traits for Basis Function Evaluation
pub mod basis;
/// Structures to define the geometric characteristics and refinement state of an FEM Domain
pub mod domain;
/// Symbolic expressions over coordinates and Fields
pub mod expression;
/// Numerical integration and sampling of expressions over a Mesh
pub mod integration;
/// Sparse matrices and linear solvers
pub mod linalg;

pub use adapt::{
    orchestrator::{AdaptationState, AdaptationStatus},
    planner::{PlannerConfig, Quantization},
    projection::ProjectorConfig,
    tables::{ElementOrderTable, RefinementTable},
    AdaptError,
};
pub use basis::{BasisFn, KOLShapeFn, LobattoShapeFn, ShapeFn, SpaceKind};
pub use domain::{
    field::{Field, FieldData},
    mesh::{
        element::RegionId,
        h_refinement::HLevel,
        space::{Point, M2D, V2D},
        Mesh,
    },
    Domain, Target,
};
pub use expression::{Expr, FieldId, Value};
