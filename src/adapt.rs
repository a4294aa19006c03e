/// Conforming spaces built from broken local bases
pub mod conforming;
/// Reduction of criterion expressions over Elems
pub mod criterion;
/// The top-level adapt loop
pub mod orchestrator;
/// Mapping of criterion values onto target levels and orders
pub mod planner;
/// L2 projection of sources onto Field spaces
pub mod projection;
/// Application of planned levels to a Mesh
pub mod rebuild;
/// Per-leaf level and order storage
pub mod tables;

use crate::domain::mesh::{element::RegionId, p_refinement::PRefError};
use crate::expression::{EvalError, FieldId};
use crate::linalg::SolveError;
use planner::PlanError;
use projection::ProjectionError;
use rebuild::MeshRebuildError;
use tables::TableError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdaptError {
    #[error("Adaptivity bounds are inverted (min {min} > max {max})")]
    InvalidBounds { min: u8, max: u8 },
    #[error("Failed to evaluate an adaptivity criterion: {0}")]
    CriterionEvaluation(EvalError),
    #[error("Failed to evaluate an expression: {0}")]
    Evaluation(EvalError),
    #[error("Projection system could not be solved: {0}")]
    SingularProjectionSystem(SolveError),
    #[error("Failed to rebuild the Mesh: {0}")]
    MeshRebuild(#[from] MeshRebuildError),
    #[error("{0} does not exist")]
    UnknownField(FieldId),
    #[error("{0} does not exist in the Mesh")]
    UnknownRegion(RegionId),
    #[error("Invalid expansion order: {0}")]
    InvalidOrder(#[from] PRefError),
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("Expected {expected} degrees of freedom; found {found}")]
    DofLength { expected: usize, found: usize },
    #[error("h-Refinement level {0} exceeds the maximum level")]
    LevelOutOfRange(u8),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<PlanError> for AdaptError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::InvalidBounds { min, max } => Self::InvalidBounds { min, max },
            PlanError::CriterionEvaluation(err) => Self::CriterionEvaluation(err),
            PlanError::Table(err) => Self::Table(err),
        }
    }
}

impl From<ProjectionError> for AdaptError {
    fn from(err: ProjectionError) -> Self {
        match err {
            ProjectionError::SingularProjectionSystem(err) => Self::SingularProjectionSystem(err),
            ProjectionError::Evaluation(err) => Self::Evaluation(err),
            ProjectionError::Table(err) => Self::Table(err),
            ProjectionError::Io(err) => Self::Io(err),
        }
    }
}
