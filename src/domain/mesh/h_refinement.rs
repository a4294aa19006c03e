use thiserror::Error;

/// Quadrant of a child Elem following an h-Refinement (from the parent Elem's perspective)
///
/// ```text
///     +-----+-----+
///     | NW  | NE  |
///     +-----+-----+
///     | SW  | SE  |
///     +-----+-----+
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quadrant {
    /// south west
    SW,
    /// south east
    SE,
    /// north west
    NW,
    /// north east
    NE,
}

impl Quadrant {
    pub const ALL: [Self; 4] = [Self::SW, Self::SE, Self::NW, Self::NE];

    pub fn index(&self) -> usize {
        match self {
            Self::SW => 0,
            Self::SE => 1,
            Self::NW => 2,
            Self::NE => 3,
        }
    }

    /// The portion of a parametric range covered by this quadrant
    pub fn sub_range(&self, [[u_min, u_max], [v_min, v_max]]: [[f64; 2]; 2]) -> [[f64; 2]; 2] {
        let u_mid = (u_min + u_max) / 2.0;
        let v_mid = (v_min + v_max) / 2.0;

        match self {
            Self::SW => [[u_min, u_mid], [v_min, v_mid]],
            Self::SE => [[u_mid, u_max], [v_min, v_mid]],
            Self::NW => [[u_min, u_mid], [v_mid, v_max]],
            Self::NE => [[u_mid, u_max], [v_mid, v_max]],
        }
    }
}

/// Description of an Elem's h-Refinement level (number of quad splits separating it from its base `Element`)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HLevel(pub u8);

impl HLevel {
    pub fn refined(&self) -> Self {
        Self(self.0 + 1)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HRefError {
    #[error("Elem {0} does not exist; Cannot apply h-Refinement!")]
    ElemDoesntExist(usize),
    #[error("Elem {0} already has children; Cannot apply h-Refinement!")]
    ElemHasChildren(usize),
    #[error("Elem {0} has been retired by a coarsening; Cannot apply h-Refinement!")]
    ElemRetired(usize),
    #[error("Elem {0} is already at the maximum h-Refinement level; Cannot apply h-Refinement!")]
    MaxLevelExceeded(usize),
    #[error("Elem {0} has no children; Cannot coarsen!")]
    ElemHasNoChildren(usize),
    #[error("Child Elem {child} of Elem {parent} is not a leaf; Cannot coarsen!")]
    ChildNotLeaf { parent: usize, child: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_sub_ranges() {
        let full = [[-1.0, 1.0], [-1.0, 1.0]];
        let ne = Quadrant::NE.sub_range(full);
        assert_eq!(ne, [[0.0, 1.0], [0.0, 1.0]]);

        let ne_sw = Quadrant::SW.sub_range(ne);
        assert_eq!(ne_sw, [[0.0, 0.5], [0.0, 0.5]]);

        for (idx, quad) in Quadrant::ALL.iter().enumerate() {
            assert_eq!(quad.index(), idx);
        }
    }
}
