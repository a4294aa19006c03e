use super::criterion::CriterionEvaluator;
use super::tables::{ElementOrderTable, RefinementTable, TableError};
use crate::domain::mesh::{element::RegionId, h_refinement::HLevel, Mesh};
use crate::expression::{EvalError, Expr};
use crate::integration::PointSampler;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlanError {
    #[error("Adaptivity bounds are inverted (min {min} > max {max})")]
    InvalidBounds { min: u8, max: u8 },
    #[error("Failed to evaluate the adaptivity criterion: {0}")]
    CriterionEvaluation(#[from] EvalError),
    #[error(transparent)]
    Table(#[from] TableError),
}

/// How a normalized criterion value is mapped onto the integer range of a setting
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Quantization {
    /// equally sized bins over the criterion range
    #[default]
    Linear,
    /// equally sized bins over the logarithm of the criterion range
    Logarithmic,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PlannerConfig {
    pub quantization: Quantization,
    /// Number of criterion samples along each direction of an Elem
    pub lattice_density: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            quantization: Quantization::Linear,
            lattice_density: 3,
        }
    }
}

/// Range of criterion values that is spread over the integer range of a setting
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CriterionScale {
    pub low: f64,
    pub high: f64,
}

impl CriterionScale {
    /// The scale spanning a set of criterion values (degenerate if the set is empty)
    pub fn spanning(values: impl IntoIterator<Item = f64>) -> Self {
        let (low, high) = values
            .into_iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(low, high), v| {
                (low.min(v), high.max(v))
            });

        if low.is_finite() && high.is_finite() {
            Self { low, high }
        } else {
            Self { low: 0.0, high: 0.0 }
        }
    }

    /// Position of `value` within the scale (clamped to [0, 1]). `None` if the scale is degenerate.
    fn normalized(&self, value: f64, quantization: Quantization) -> Option<f64> {
        let (value, low, high) = match quantization {
            Quantization::Linear => (value, self.low, self.high),
            Quantization::Logarithmic => {
                if self.low <= 0.0 || self.high <= 0.0 {
                    return None;
                }
                if value <= 0.0 {
                    return Some(0.0);
                }
                (value.ln(), self.low.ln(), self.high.ln())
            }
        };

        if high > low {
            Some(((value - low) / (high - low)).clamp(0.0, 1.0))
        } else {
            None
        }
    }
}

/// Identity of an [`AdaptivitySetting`]. Frozen criterion scales are tracked per setting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SettingId(pub u64);

/// A criterion expression and the range of levels/orders it is mapped onto
#[derive(Clone, Debug, PartialEq)]
pub struct AdaptivitySetting {
    pub id: SettingId,
    pub criterion: Expr,
    pub min: u8,
    pub max: u8,
}

impl AdaptivitySetting {
    pub fn new(id: SettingId, criterion: Expr, min: u8, max: u8) -> Result<Self, PlanError> {
        if min > max {
            Err(PlanError::InvalidBounds { min, max })
        } else {
            Ok(Self {
                id,
                criterion,
                min,
                max,
            })
        }
    }
}

/// An h-adaptivity setting and the Regions it applies to
#[derive(Clone, Debug, PartialEq)]
pub struct HAdaptivity {
    pub regions: BTreeSet<RegionId>,
    pub setting: AdaptivitySetting,
}

/// Map a criterion value onto `[min, max]`
///
/// `target = min + floor(s * (max - min + 1))` (capped at `max`) where `s` is the normalized position of `value` in `scale`.
/// A degenerate scale maps every value to `min`.
pub fn quantize(
    value: f64,
    min: u8,
    max: u8,
    scale: &CriterionScale,
    quantization: Quantization,
) -> Result<u8, PlanError> {
    if min > max {
        return Err(PlanError::InvalidBounds { min, max });
    }

    Ok(match scale.normalized(value, quantization) {
        Some(s) => {
            let span = (max - min) as f64 + 1.0;
            let offset = (s * span).floor() as u8;
            min.saturating_add(offset).min(max)
        }
        None => min,
    })
}

/// Computes target orders and levels from criterion settings
pub struct AdaptivityPlanner<'a> {
    config: &'a PlannerConfig,
    evaluator: &'a dyn CriterionEvaluator,
    sampler: &'a dyn PointSampler,
}

impl<'a> AdaptivityPlanner<'a> {
    pub fn new(
        config: &'a PlannerConfig,
        evaluator: &'a dyn CriterionEvaluator,
        sampler: &'a dyn PointSampler,
    ) -> Self {
        Self {
            config,
            evaluator,
            sampler,
        }
    }

    /// Evaluate a setting's criterion over a group of Elems
    pub fn criterion_values(
        &self,
        mesh: &Mesh,
        elem_ids: impl IntoIterator<Item = usize>,
        setting: &AdaptivitySetting,
    ) -> Result<BTreeMap<usize, f64>, PlanError> {
        elem_ids
            .into_iter()
            .map(|id| {
                let elem = mesh
                    .elems
                    .get(id)
                    .ok_or(TableError::UncoveredElem(id))?;
                let value = self
                    .evaluator
                    .evaluate(elem, &setting.criterion, self.sampler)?;
                Ok((id, value))
            })
            .collect()
    }

    /// Target for a single criterion value
    pub fn plan_target(
        &self,
        value: f64,
        setting: &AdaptivitySetting,
        scale: &CriterionScale,
    ) -> Result<u8, PlanError> {
        quantize(value, setting.min, setting.max, scale, self.config.quantization)
    }

    /// Plan the level of each leaf in `leaf_ids`
    ///
    /// * a leaf whose target exceeds its level is planned at its target (split down to that depth)
    /// * a complete group of leaf siblings is planned one level up (merged) when none of them is
    ///   being split and the target of their parent does not exceed the parent's level
    /// * every other leaf keeps its level
    ///
    /// The scale is computed from the leaf criterion values if `scale` is `None`. It is returned alongside the plan.
    pub fn plan_levels(
        &self,
        mesh: &Mesh,
        leaf_ids: &[usize],
        setting: &AdaptivitySetting,
        scale: Option<CriterionScale>,
    ) -> Result<(RefinementTable, CriterionScale), PlanError> {
        let values = self.criterion_values(mesh, leaf_ids.iter().copied(), setting)?;
        let scale = scale.unwrap_or_else(|| CriterionScale::spanning(values.values().copied()));

        let mut plan = RefinementTable::from_leaves(mesh, leaf_ids.iter().copied());
        let mut splitting = BTreeSet::new();
        for (leaf_id, value) in values.iter() {
            let target = HLevel(self.plan_target(*value, setting, &scale)?);
            if target > plan.get(*leaf_id)? {
                plan.set(*leaf_id, target)?;
                splitting.insert(*leaf_id);
            }
        }

        let covered: BTreeSet<usize> = leaf_ids.iter().copied().collect();
        let parents: BTreeSet<usize> = leaf_ids
            .iter()
            .filter_map(|id| mesh.elems[*id].parent_id())
            .collect();

        for parent_id in parents {
            let parent = &mesh.elems[parent_id];
            let siblings = match parent.child_ids() {
                Some(children) => children,
                None => continue,
            };

            let mergeable = siblings.iter().all(|id| {
                mesh.elems[*id].is_leaf() && covered.contains(id) && !splitting.contains(id)
            });
            if !mergeable {
                continue;
            }

            let parent_value = self
                .evaluator
                .evaluate(parent, &setting.criterion, self.sampler)?;
            let parent_target = HLevel(self.plan_target(parent_value, setting, &scale)?);

            if parent_target <= parent.level {
                for sibling in siblings {
                    plan.set(sibling, parent.level)?;
                }
            }
        }

        Ok((plan, scale))
    }

    /// Plan the order of each leaf covered by `current`
    ///
    /// The scale is computed from the leaf criterion values if `scale` is `None`. It is returned alongside the plan.
    pub fn plan_orders(
        &self,
        mesh: &Mesh,
        current: &ElementOrderTable,
        setting: &AdaptivitySetting,
        scale: Option<CriterionScale>,
    ) -> Result<(ElementOrderTable, CriterionScale), PlanError> {
        let values = self.criterion_values(mesh, current.leaf_ids(), setting)?;
        let scale = scale.unwrap_or_else(|| CriterionScale::spanning(values.values().copied()));

        let mut plan = current.clone();
        for (leaf_id, value) in values {
            plan.set(leaf_id, self.plan_target(value, setting, &scale)?)?;
        }

        Ok((plan, scale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::criterion::LatticeMax;
    use crate::expression::{CoordContext, Value};
    use proptest::prelude::*;

    struct CoordsOnly;

    impl PointSampler for CoordsOnly {
        fn value_at(&self, expr: &Expr, _: usize, point: [f64; 2]) -> Result<Value, EvalError> {
            expr.evaluate(&CoordContext(point))
        }
    }

    fn setting(criterion: Expr, min: u8, max: u8) -> AdaptivitySetting {
        AdaptivitySetting::new(SettingId(0), criterion, min, max).unwrap()
    }

    #[test]
    fn linear_quantization() {
        let scale = CriterionScale { low: 0.0, high: 1.0 };
        let q = |v| quantize(v, 3, 5, &scale, Quantization::Linear).unwrap();

        assert_eq!(q(0.0), 3);
        assert_eq!(q(0.3), 3);
        assert_eq!(q(0.34), 4);
        assert_eq!(q(0.66), 4);
        assert_eq!(q(0.67), 5);
        assert_eq!(q(1.0), 5);
        assert_eq!(q(7.0), 5);
        assert_eq!(q(-1.0), 3);

        let degenerate = CriterionScale::spanning([0.5, 0.5]);
        assert_eq!(quantize(0.9, 1, 4, &degenerate, Quantization::Linear), Ok(1));
        assert_eq!(
            quantize(0.9, 4, 1, &scale, Quantization::Linear),
            Err(PlanError::InvalidBounds { min: 4, max: 1 })
        );
    }

    #[test]
    fn logarithmic_quantization() {
        let scale = CriterionScale { low: 1e-4, high: 1.0 };
        let q = |v| quantize(v, 0, 3, &scale, Quantization::Logarithmic).unwrap();

        assert_eq!(q(1e-4), 0);
        assert_eq!(q(2e-3), 1);
        assert_eq!(q(0.02), 2);
        assert_eq!(q(0.5), 3);
        assert_eq!(q(0.0), 0);

        let with_zero = CriterionScale { low: 0.0, high: 1.0 };
        assert_eq!(quantize(0.5, 0, 3, &with_zero, Quantization::Logarithmic), Ok(0));
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        assert_eq!(
            AdaptivitySetting::new(SettingId(1), Expr::x(), 5, 3),
            Err(PlanError::InvalidBounds { min: 5, max: 3 })
        );
    }

    #[test]
    fn order_plan_follows_criterion() {
        let mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [3, 1]).unwrap();
        let config = PlannerConfig::default();
        let evaluator = LatticeMax::default();
        let planner = AdaptivityPlanner::new(&config, &evaluator, &CoordsOnly);

        let current = ElementOrderTable::uniform(mesh.leaf_ids(), 1);
        let (plan, scale) = planner
            .plan_orders(&mesh, &current, &setting(Expr::x(), 1, 3), None)
            .unwrap();

        // criterion maxima are 1/3, 2/3 and 1
        assert_eq!(scale, CriterionScale { low: 1.0 / 3.0, high: 1.0 });
        assert_eq!(plan.iter().collect::<Vec<_>>(), vec![(0, 1), (1, 2), (2, 3)]);
    }

    #[test]
    fn level_plan_splits_and_merges() {
        let mut mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 1]).unwrap();
        let children = mesh.h_refine_elem(0).unwrap();

        let config = PlannerConfig::default();
        let evaluator = LatticeMax::default();
        let planner = AdaptivityPlanner::new(&config, &evaluator, &CoordsOnly);

        // large on the right half, small on the (refined) left half
        let criterion = Expr::x().powi(4);
        let leaves = mesh.leaf_ids();
        let (plan, _) = planner
            .plan_levels(&mesh, &leaves, &setting(criterion, 0, 2), Some(CriterionScale { low: 0.0, high: 1.0 }))
            .unwrap();

        assert_eq!(plan.get(1), Ok(HLevel(2)));
        for child in children {
            assert_eq!(plan.get(child), Ok(HLevel(0)));
        }
    }

    #[test]
    fn no_merge_next_to_a_split_sibling() {
        let mut mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [1, 1]).unwrap();
        let children = mesh.h_refine_elem(0).unwrap();

        let config = PlannerConfig::default();
        let evaluator = LatticeMax::default();
        let planner = AdaptivityPlanner::new(&config, &evaluator, &CoordsOnly);

        // only the NE child (x, y >= 0.5) reaches the top bin; the parent's lattice reaches it too
        let criterion = (Expr::x() * Expr::y()).powi(8);
        let leaves = mesh.leaf_ids();
        let (plan, _) = planner
            .plan_levels(&mesh, &leaves, &setting(criterion, 0, 2), Some(CriterionScale { low: 0.0, high: 1.0 }))
            .unwrap();

        assert_eq!(plan.get(children[3]), Ok(HLevel(2)));
        for child in &children[0..3] {
            assert_eq!(plan.get(*child), Ok(HLevel(1)));
        }
    }

    proptest! {
        #[test]
        fn quantization_is_clamped_and_monotone(
            a in -10.0..10.0_f64,
            b in -10.0..10.0_f64,
            low in -5.0..5.0_f64,
            width in 0.0..5.0_f64,
            min in 0u8..6,
            extra in 0u8..6,
        ) {
            let max = min + extra;
            let scale = CriterionScale { low, high: low + width };
            for quantization in [Quantization::Linear, Quantization::Logarithmic] {
                let ta = quantize(a, min, max, &scale, quantization).unwrap();
                let tb = quantize(b, min, max, &scale, quantization).unwrap();

                prop_assert!(ta >= min && ta <= max);
                prop_assert_eq!(ta, quantize(a, min, max, &scale, quantization).unwrap());
                if a <= b {
                    prop_assert!(ta <= tb);
                }
            }
        }
    }
}
