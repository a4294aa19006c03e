use crate::domain::mesh::elem::Elem;
use crate::expression::{EvalError, Expr};
use crate::integration::PointSampler;

/// Reduces a criterion expression over an [`Elem`] to a single (non-negative) number
pub trait CriterionEvaluator: Send + Sync {
    fn evaluate(&self, elem: &Elem, criterion: &Expr, sampler: &dyn PointSampler) -> Result<f64, EvalError>;
}

/// Maximum magnitude of the criterion over a uniform lattice of points spanning the Elem (corners included)
///
/// Vector valued criteria are reduced with their euclidean norm.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LatticeMax {
    pub density: usize,
}

impl Default for LatticeMax {
    fn default() -> Self {
        Self { density: 3 }
    }
}

impl LatticeMax {
    pub fn new(density: usize) -> Self {
        Self { density }
    }

    fn lattice(&self, [min, max]: [f64; 2]) -> Vec<f64> {
        match self.density {
            0 | 1 => vec![(min + max) / 2.0],
            n => (0..n)
                .map(|i| min + (max - min) * (i as f64) / ((n - 1) as f64))
                .collect(),
        }
    }
}

impl CriterionEvaluator for LatticeMax {
    fn evaluate(&self, elem: &Elem, criterion: &Expr, sampler: &dyn PointSampler) -> Result<f64, EvalError> {
        let xs = self.lattice(elem.bounds[0]);
        let ys = self.lattice(elem.bounds[1]);

        let mut max = 0.0_f64;
        for x in xs.iter() {
            for y in ys.iter() {
                let value = sampler.value_at(criterion, elem.id, [*x, *y])?;
                max = max.max(value.magnitude());
            }
        }

        log::trace!("criterion on elem {}: {}", elem.id, max);
        Ok(max)
    }
}
