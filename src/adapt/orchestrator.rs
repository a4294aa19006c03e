use super::criterion::CriterionEvaluator;
use super::planner::{AdaptivityPlanner, CriterionScale, HAdaptivity, PlannerConfig, SettingId};
use super::projection::{ExprSource, SolutionProjector};
use super::rebuild::MeshRebuilder;
use super::tables::{ElementOrderTable, RefinementTable};
use super::AdaptError;
use crate::basis::ShapeFn;
use crate::domain::field::Field;
use crate::domain::mesh::{h_refinement::HLevel, Mesh};
use crate::expression::{Expr, FieldId};
use crate::integration::FieldEvaluator;
use std::collections::BTreeMap;
use std::fmt;

/// Phase of the adapt loop
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AdaptationStatus {
    #[default]
    Stable,
    Planning,
    Rebuilding,
}

/// Record of the last applied configuration of a Domain
///
/// Only the [`AdaptationOrchestrator`] mutates this state. It is left untouched by a failed pass.
#[derive(Clone, Debug, Default)]
pub struct AdaptationState {
    status: AdaptationStatus,
    levels: RefinementTable,
    orders: BTreeMap<FieldId, ElementOrderTable>,
    scales: BTreeMap<SettingId, CriterionScale>,
    passes: usize,
}

impl AdaptationState {
    pub fn new(mesh: &Mesh) -> Self {
        Self {
            levels: RefinementTable::from_mesh(mesh),
            ..Default::default()
        }
    }

    pub fn status(&self) -> AdaptationStatus {
        self.status
    }

    pub fn levels(&self) -> &RefinementTable {
        &self.levels
    }

    pub fn orders(&self, field: FieldId) -> Option<&ElementOrderTable> {
        self.orders.get(&field)
    }

    /// The frozen criterion scale of a setting (if it has been planned with)
    pub fn scale(&self, setting: SettingId) -> Option<CriterionScale> {
        self.scales.get(&setting).copied()
    }

    /// Number of completed adapt passes
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Record a configuration that was changed outside of the adapt loop
    pub(crate) fn record(&mut self, mesh: &Mesh, fields: &[Field]) {
        self.levels = RefinementTable::from_mesh(mesh);
        self.orders = fields
            .iter()
            .map(|field| (field.id(), field.orders().clone()))
            .collect();
    }

    /// Drop the frozen scale of a setting that was replaced
    pub(crate) fn forget_scale(&mut self, setting: SettingId) {
        self.scales.remove(&setting);
    }
}

/// Drives a single pass of hp-adaptivity
///
/// ```text
///  Stable ──> Planning ──(no change)──> Stable        (returns false)
///                 └─────> Rebuilding ──> Stable       (returns true)
/// ```
///
/// All work is done on copies of the Mesh and Fields, which are only committed at the end of a successful pass.
pub struct AdaptationOrchestrator<'a> {
    pub planner_config: &'a PlannerConfig,
    pub evaluator: &'a dyn CriterionEvaluator,
    pub rebuilder: &'a dyn MeshRebuilder,
    pub projector: &'a dyn SolutionProjector,
}

struct Plan {
    levels: RefinementTable,
    orders: BTreeMap<FieldId, ElementOrderTable>,
    scales: BTreeMap<SettingId, CriterionScale>,
    level_changes: usize,
    order_changes: usize,
}

impl<'a> AdaptationOrchestrator<'a> {
    /// Plan and apply new levels and orders. Returns `true` if anything changed.
    pub fn adapt<SF: ShapeFn>(
        &self,
        mesh: &mut Mesh,
        fields: &mut Vec<Field>,
        h_settings: &[HAdaptivity],
        state: &mut AdaptationState,
        verbosity: u8,
    ) -> Result<bool, AdaptError> {
        state.status = AdaptationStatus::Planning;
        let result = self.run::<SF>(mesh, fields, h_settings, state, verbosity);
        state.status = AdaptationStatus::Stable;
        result
    }

    fn run<SF: ShapeFn>(
        &self,
        mesh: &mut Mesh,
        fields: &mut Vec<Field>,
        h_settings: &[HAdaptivity],
        state: &mut AdaptationState,
        verbosity: u8,
    ) -> Result<bool, AdaptError> {
        let plan = self.plan::<SF>(mesh, fields, h_settings, state)?;

        if plan.level_changes == 0 && plan.order_changes == 0 {
            state.scales = plan.scales;
            state.record(mesh, fields);
            state.passes += 1;
            report(
                verbosity,
                format_args!("adapt pass {}: no changes ({} leaves)", state.passes, mesh.leaf_ids().len()),
            );
            return Ok(false);
        }

        state.status = AdaptationStatus::Rebuilding;

        let new_mesh = if plan.level_changes > 0 {
            self.rebuilder.rebuild(mesh, &plan.levels)?
        } else {
            mesh.clone()
        };

        let mut new_fields = fields.clone();
        let mut num_projected = 0;
        for (field, old_field) in new_fields.iter_mut().zip(fields.iter()) {
            let planned = plan
                .orders
                .get(&field.id())
                .unwrap_or_else(|| old_field.orders());
            let new_leaves: Vec<usize> = field
                .regions()
                .iter()
                .flat_map(|region| new_mesh.leaf_ids_in(*region))
                .collect();
            let orders = planned.transferred(mesh, &new_mesh, new_leaves)?;

            if orders == *old_field.orders() {
                continue;
            }

            if old_field.has_data() {
                let source: ExprSource<SF> =
                    ExprSource::new(mesh, fields.as_slice(), Expr::field(field.id()));
                let data = self.projector.project(
                    field.kind(),
                    &new_mesh,
                    &orders,
                    &source,
                    field.update_accuracy(),
                )?;
                log::debug!(
                    "transferred '{}' onto {} dofs",
                    field.name(),
                    data.dofs.len()
                );
                field.set_field_data(Some(data));
                num_projected += 1;
            }
            field.set_orders(orders);
        }

        *mesh = new_mesh;
        *fields = new_fields;
        state.scales = plan.scales;
        state.record(mesh, fields);
        state.passes += 1;

        report(
            verbosity,
            format_args!(
                "adapt pass {}: {} level changes, {} order changes, {} fields projected ({} leaves, max level {})",
                state.passes,
                plan.level_changes,
                plan.order_changes,
                num_projected,
                mesh.leaf_ids().len(),
                mesh.max_level().0
            ),
        );

        Ok(true)
    }

    fn plan<SF: ShapeFn>(
        &self,
        mesh: &Mesh,
        fields: &[Field],
        h_settings: &[HAdaptivity],
        state: &AdaptationState,
    ) -> Result<Plan, AdaptError> {
        let sampler: FieldEvaluator<SF> = FieldEvaluator::new(mesh, fields);
        let planner = AdaptivityPlanner::new(self.planner_config, self.evaluator, &sampler);
        let mut scales = state.scales.clone();

        // levels: the deepest level planned by any setting
        let current_levels = RefinementTable::from_mesh(mesh);
        let mut planned_levels: BTreeMap<usize, HLevel> = BTreeMap::new();
        for h in h_settings {
            let leaves: Vec<usize> = h
                .regions
                .iter()
                .flat_map(|region| mesh.leaf_ids_in(*region))
                .collect();

            let (plan, scale) = planner.plan_levels(
                mesh,
                &leaves,
                &h.setting,
                scales.get(&h.setting.id).copied(),
            )?;
            scales.entry(h.setting.id).or_insert(scale);

            for (leaf_id, level) in plan.iter() {
                planned_levels
                    .entry(leaf_id)
                    .and_modify(|current| *current = (*current).max(level))
                    .or_insert(level);
            }
        }

        let mut levels = current_levels.clone();
        for (leaf_id, level) in planned_levels {
            levels.set(leaf_id, level)?;
        }
        let level_changes = current_levels.diff(&levels).len();

        // orders
        let mut orders = BTreeMap::new();
        let mut order_changes = 0;
        for field in fields.iter() {
            if let Some(setting) = field.p_adaptivity() {
                let (plan, scale) = planner.plan_orders(
                    mesh,
                    field.orders(),
                    setting,
                    scales.get(&setting.id).copied(),
                )?;
                scales.entry(setting.id).or_insert(scale);

                order_changes += field.orders().diff(&plan).len();
                orders.insert(field.id(), plan);
            }
        }

        log::trace!(
            "planned {} level changes and {} order changes",
            level_changes,
            order_changes
        );

        Ok(Plan {
            levels,
            orders,
            scales,
            level_changes,
            order_changes,
        })
    }
}

fn report(verbosity: u8, message: fmt::Arguments) {
    if verbosity > 0 {
        log::info!("{}", message);
    } else {
        log::debug!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapt::criterion::LatticeMax;
    use crate::adapt::planner::AdaptivitySetting;
    use crate::adapt::projection::{L2Projector, ProjectorConfig};
    use crate::adapt::rebuild::{MeshRebuildError, QuadTreeRebuilder};
    use crate::basis::{LobattoShapeFn, SpaceKind};
    use crate::domain::mesh::element::RegionId;
    use std::collections::BTreeSet;

    struct FailingRebuilder;

    impl MeshRebuilder for FailingRebuilder {
        fn rebuild(&self, _: &Mesh, _: &RefinementTable) -> Result<Mesh, MeshRebuildError> {
            Err(MeshRebuildError::InconsistentCoarsening { parent: 0 })
        }
    }

    fn setup() -> (Mesh, Vec<Field>, AdaptationState) {
        let mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 2]).unwrap();
        let field = Field::new(FieldId(0), "u", SpaceKind::H1, BTreeSet::from([RegionId(1)]), &mesh, 1);
        let state = AdaptationState::new(&mesh);
        (mesh, vec![field], state)
    }

    fn h_setting(max: u8) -> HAdaptivity {
        HAdaptivity {
            regions: BTreeSet::from([RegionId(1)]),
            setting: AdaptivitySetting::new(SettingId(7), Expr::x() * Expr::y(), 0, max).unwrap(),
        }
    }

    #[test]
    fn converges_to_a_fixed_point() {
        let (mut mesh, mut fields, mut state) = setup();
        let config = PlannerConfig::default();
        let projector: L2Projector<LobattoShapeFn> = L2Projector::new(ProjectorConfig::default());
        let orchestrator = AdaptationOrchestrator {
            planner_config: &config,
            evaluator: &LatticeMax::default(),
            rebuilder: &QuadTreeRebuilder,
            projector: &projector,
        };
        let settings = [h_setting(1)];

        let mut passes = 0;
        while orchestrator
            .adapt::<LobattoShapeFn>(&mut mesh, &mut fields, &settings, &mut state, 0)
            .unwrap()
        {
            passes += 1;
            assert!(passes < 10);
        }

        assert_eq!(state.status(), AdaptationStatus::Stable);
        assert_eq!(state.passes(), passes + 1);
        assert!(state.scale(SettingId(7)).is_some());
        assert!(mesh.leaves().all(|leaf| leaf.level <= HLevel(1)));
        // the north-east quarter reaches the top bin
        assert!(mesh.elems[3].has_children());
        assert_eq!(fields[0].orders().len(), mesh.leaf_ids().len());
        assert_eq!(state.orders(FieldId(0)), Some(fields[0].orders()));
    }

    #[test]
    fn failures_leave_everything_untouched() {
        let (mut mesh, mut fields, mut state) = setup();
        let config = PlannerConfig::default();
        let projector: L2Projector<LobattoShapeFn> = L2Projector::new(ProjectorConfig::default());
        let orchestrator = AdaptationOrchestrator {
            planner_config: &config,
            evaluator: &LatticeMax::default(),
            rebuilder: &FailingRebuilder,
            projector: &projector,
        };

        let result = orchestrator.adapt::<LobattoShapeFn>(&mut mesh, &mut fields, &[h_setting(1)], &mut state, 1);
        assert!(matches!(result, Err(AdaptError::MeshRebuild(_))));
        assert_eq!(state.status(), AdaptationStatus::Stable);
        assert_eq!(state.passes(), 0);
        assert!(state.scale(SettingId(7)).is_none());
        assert_eq!(mesh.leaf_ids(), vec![0, 1, 2, 3]);
    }
}
