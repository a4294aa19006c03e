use crate::basis::SpaceKind;
use thiserror::Error;

/// Maximum Polynomial expansion. Orders above this value are rejected.
pub const MAX_POLYNOMIAL_ORDER: u8 = 12;

/// Check that `order` is a usable expansion order for a Field of the given [SpaceKind]
pub fn validate_order(kind: SpaceKind, order: u8) -> Result<u8, PRefError> {
    if order > MAX_POLYNOMIAL_ORDER {
        Err(PRefError::ExceededMaxExpansion(order))
    } else if order < kind.min_order() {
        Err(PRefError::BelowMinExpansion { kind, order })
    } else {
        Ok(order)
    }
}

/// Order assigned to a leaf formed by merging a group of siblings
pub fn merged_order(child_orders: impl IntoIterator<Item = u8>) -> Option<u8> {
    child_orders.into_iter().max()
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PRefError {
    #[error("Expansion order {0} exceeds the maximum ({MAX_POLYNOMIAL_ORDER}); Cannot p-Refine!")]
    ExceededMaxExpansion(u8),
    #[error("Expansion order {order} is below the minimum for {kind} spaces; Cannot p-Refine!")]
    BelowMinExpansion { kind: SpaceKind, order: u8 },
    #[error("Elem {0} does not exist; Cannot apply p-Refinement!")]
    ElemDoesntExist(usize),
}
