/// Fields and their data
pub mod field;
/// The internal geometric structure of a Domain
pub mod mesh;
/// Export of sampled quantities to VTK files
pub mod vtk;

use crate::adapt::{
    conforming::ConformingSpace,
    criterion::{CriterionEvaluator, LatticeMax},
    orchestrator::{AdaptationOrchestrator, AdaptationState},
    planner::{AdaptivitySetting, HAdaptivity, PlannerConfig, SettingId},
    projection::{ExprSource, L2Projector, ProjectorConfig, SolutionProjector},
    rebuild::{MeshRebuilder, QuadTreeRebuilder},
    tables::{ElementOrderTable, RefinementTable},
    AdaptError,
};
use crate::basis::{LobattoShapeFn, ShapeFn, SpaceKind};
use crate::expression::{Expr, FieldId, Value};
use crate::integration::{FieldEvaluator, PointSampler};
use field::{Field, FieldData};
use mesh::{
    element::RegionId,
    p_refinement::validate_order,
    space::Point,
    Mesh, MAX_H_LEVEL,
};
use vtk::UniformFieldSpace;

use std::collections::BTreeSet;
use std::marker::PhantomData;

/// A selection of Regions
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Target {
    /// Every Region in the Mesh
    All,
    Region(RegionId),
}

/// High Level Description of an hp-adaptive FEM Domain
///
/// A Domain owns a [Mesh], a set of [Field]s defined over its Regions, and the adaptivity settings
/// attached to them. Calling [`Domain::adapt`] updates the Mesh and the Field orders according to
/// those settings and transfers existing Field data onto the new configuration:
///
/// ```
/// use hp_adapt::{Domain, Expr, Mesh, RegionId, SpaceKind, Target};
///
/// let mesh = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 2]).unwrap();
/// let mut domain = Domain::new(mesh);
/// let u = domain.add_field("u", SpaceKind::H1, 2).unwrap();
/// domain.set_value(u, Target::All, Expr::x() * Expr::y(), 0).unwrap();
/// domain.set_h_adaptivity(Target::All, Expr::x() * Expr::y(), 0, 1).unwrap();
///
/// while domain.adapt(0).unwrap() {}
///
/// let integral = domain.integrate(Target::All, &Expr::field(u), 4).unwrap();
/// assert!((integral - 0.25).abs() < 1e-12);
/// ```
pub struct Domain<SF: ShapeFn = LobattoShapeFn> {
    mesh: Mesh,
    fields: Vec<Field>,
    h_adaptivity: Vec<HAdaptivity>,
    state: AdaptationState,
    planner_config: PlannerConfig,
    evaluator: Box<dyn CriterionEvaluator>,
    rebuilder: Box<dyn MeshRebuilder>,
    projector: Box<dyn SolutionProjector>,
    next_setting: u64,
    _phantom: PhantomData<fn() -> SF>,
}

impl Domain<LobattoShapeFn> {
    pub fn new(mesh: Mesh) -> Self {
        Self::with_shape_fns(mesh)
    }
}

impl<SF: ShapeFn + 'static> Domain<SF> {
    /// Construct a Domain using an alternate set of [ShapeFn]s
    pub fn with_shape_fns(mesh: Mesh) -> Self {
        Self {
            state: AdaptationState::new(&mesh),
            mesh,
            fields: Vec::new(),
            h_adaptivity: Vec::new(),
            planner_config: PlannerConfig::default(),
            evaluator: Box::new(LatticeMax::default()),
            rebuilder: Box::new(QuadTreeRebuilder),
            projector: Box::new(L2Projector::<SF>::new(ProjectorConfig::default())),
            next_setting: 0,
            _phantom: PhantomData,
        }
    }

    // ----------------------------------------------------------------------------------------------------
    // Configuration
    // ----------------------------------------------------------------------------------------------------

    pub fn with_projector_config(mut self, config: ProjectorConfig) -> Self {
        self.projector = Box::new(L2Projector::<SF>::new(config));
        self
    }

    pub fn with_projector(mut self, projector: impl SolutionProjector + 'static) -> Self {
        self.projector = Box::new(projector);
        self
    }

    /// Criterion sampling density is forwarded to the default [`LatticeMax`] evaluator
    pub fn with_planner_config(mut self, config: PlannerConfig) -> Self {
        self.evaluator = Box::new(LatticeMax::new(config.lattice_density));
        self.planner_config = config;
        self
    }

    pub fn with_criterion_evaluator(mut self, evaluator: impl CriterionEvaluator + 'static) -> Self {
        self.evaluator = Box::new(evaluator);
        self
    }

    pub fn with_rebuilder(mut self, rebuilder: impl MeshRebuilder + 'static) -> Self {
        self.rebuilder = Box::new(rebuilder);
        self
    }

    // ----------------------------------------------------------------------------------------------------
    // Data Retrieval
    // ----------------------------------------------------------------------------------------------------

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, field: FieldId) -> Result<&Field, AdaptError> {
        self.fields.get(field.0).ok_or(AdaptError::UnknownField(field))
    }

    /// Expansion orders of a Field on each of its leaves
    pub fn field_orders(&self, field: FieldId) -> Result<&ElementOrderTable, AdaptError> {
        Ok(self.field(field)?.orders())
    }

    /// Degrees of freedom of a Field (`None` if it holds no data)
    pub fn dofs(&self, field: FieldId) -> Result<Option<&[f64]>, AdaptError> {
        Ok(self.field(field)?.data().map(|data| data.dofs.as_slice()))
    }

    /// h-Refinement level of every leaf
    pub fn levels(&self) -> RefinementTable {
        RefinementTable::from_mesh(&self.mesh)
    }

    pub fn adaptation_state(&self) -> &AdaptationState {
        &self.state
    }

    // ----------------------------------------------------------------------------------------------------
    // Fields
    // ----------------------------------------------------------------------------------------------------

    /// Add a Field over every Region of the Mesh
    pub fn add_field(&mut self, name: impl Into<String>, kind: SpaceKind, order: u8) -> Result<FieldId, AdaptError> {
        let regions = self.mesh.regions();
        self.add_field_on(name, kind, regions, order)
    }

    /// Add a Field over a set of Regions
    pub fn add_field_on(
        &mut self,
        name: impl Into<String>,
        kind: SpaceKind,
        regions: impl IntoIterator<Item = RegionId>,
        order: u8,
    ) -> Result<FieldId, AdaptError> {
        validate_order(kind, order)?;
        let regions = self.resolve_regions(regions)?;

        let id = FieldId(self.fields.len());
        let field = Field::new(id, name, kind, regions, &self.mesh, order);
        log::debug!(
            "added {} field '{}' ({}) on {} leaves",
            kind,
            field.name(),
            id,
            field.orders().len()
        );

        self.fields.push(field);
        self.state.record(&self.mesh, &self.fields);
        Ok(id)
    }

    /// Set the expansion order of a Field on a selection of its leaves. Existing data is projected onto the new orders.
    pub fn set_order(&mut self, field: FieldId, target: Target, order: u8) -> Result<(), AdaptError> {
        let regions = self.target_regions(target)?;
        let current = self.field(field)?;
        validate_order(current.kind(), order)?;

        let mut orders = current.orders().clone();
        for leaf_id in current.orders().leaf_ids() {
            if regions.contains(&self.mesh.elems[leaf_id].region()) {
                orders.set(leaf_id, order)?;
            }
        }

        if orders == *current.orders() {
            return Ok(());
        }

        let data = if current.has_data() {
            let source: ExprSource<SF> = ExprSource::new(&self.mesh, &self.fields, Expr::field(field));
            Some(self.projector.project(
                current.kind(),
                &self.mesh,
                &orders,
                &source,
                current.update_accuracy(),
            )?)
        } else {
            None
        };

        let target_field = &mut self.fields[field.0];
        target_field.set_orders(orders);
        if data.is_some() {
            target_field.set_field_data(data);
        }
        self.state.record(&self.mesh, &self.fields);
        Ok(())
    }

    /// Project an expression onto a Field on a selection of Regions (the Field keeps its value elsewhere)
    ///
    /// `extra_order` raises the quadrature order of the projection.
    pub fn set_value(&mut self, field: FieldId, target: Target, expr: Expr, extra_order: u8) -> Result<(), AdaptError> {
        let current = self.field(field)?;

        let mut source: ExprSource<SF> = ExprSource::new(&self.mesh, &self.fields, expr);
        if let Target::Region(region) = target {
            source = source.restricted_to(self.resolve_regions([region])?, Expr::field(field));
        }

        let data = self.projector.project(
            current.kind(),
            &self.mesh,
            current.orders(),
            &source,
            extra_order,
        )?;
        log::debug!("set the value of '{}' ({} dofs)", current.name(), data.dofs.len());

        self.fields[field.0].set_field_data(Some(data));
        Ok(())
    }

    /// Set the degrees of freedom of a Field directly
    pub fn set_data(&mut self, field: FieldId, dofs: Vec<f64>) -> Result<(), AdaptError> {
        let current = self.field(field)?;
        let space = ConformingSpace::build::<SF>(current.kind(), &self.mesh, current.orders())?;

        if dofs.len() != space.num_dofs() {
            return Err(AdaptError::DofLength {
                expected: space.num_dofs(),
                found: dofs.len(),
            });
        }

        let data = FieldData {
            local: space.local_coefficients(&dofs),
            dofs,
        };
        self.fields[field.0].set_field_data(Some(data));
        Ok(())
    }

    /// Set the extra quadrature order used when a Field is transferred onto a new configuration
    pub fn set_update_accuracy(&mut self, field: FieldId, extra_order: u8) -> Result<(), AdaptError> {
        self.field(field)?;
        self.fields[field.0].set_update_accuracy(extra_order);
        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // Adaptivity
    // ----------------------------------------------------------------------------------------------------

    /// Let a criterion expression select the order of a Field on each of its leaves (between `min` and `max`)
    ///
    /// Replaces any previous p-adaptivity setting of the Field.
    pub fn set_p_adaptivity(&mut self, field: FieldId, criterion: Expr, min: u8, max: u8) -> Result<(), AdaptError> {
        let kind = self.field(field)?.kind();
        let setting = AdaptivitySetting::new(self.next_setting_id(), criterion, min, max)?;
        validate_order(kind, min)?;
        validate_order(kind, max)?;

        if let Some(previous) = self.fields[field.0].p_adaptivity() {
            let previous_id = previous.id;
            self.state.forget_scale(previous_id);
        }
        self.fields[field.0].set_p_adaptivity(Some(setting));
        Ok(())
    }

    pub fn clear_p_adaptivity(&mut self, field: FieldId) -> Result<(), AdaptError> {
        self.field(field)?;
        if let Some(previous) = self.fields[field.0].p_adaptivity() {
            let previous_id = previous.id;
            self.state.forget_scale(previous_id);
        }
        self.fields[field.0].set_p_adaptivity(None);
        Ok(())
    }

    /// Let a criterion expression select the h-Refinement level of the leaves in a selection of Regions (between `min` and `max`)
    ///
    /// The setting applies to every Field defined on those Regions. It replaces any previous setting on the same selection.
    pub fn set_h_adaptivity(&mut self, target: Target, criterion: Expr, min: u8, max: u8) -> Result<(), AdaptError> {
        let regions = self.target_regions(target)?;
        if max > MAX_H_LEVEL {
            return Err(AdaptError::LevelOutOfRange(max));
        }
        let setting = AdaptivitySetting::new(self.next_setting_id(), criterion, min, max)?;

        if let Some(idx) = self.h_adaptivity.iter().position(|h| h.regions == regions) {
            let previous = self.h_adaptivity.remove(idx);
            self.state.forget_scale(previous.setting.id);
        }
        self.h_adaptivity.push(HAdaptivity { regions, setting });
        Ok(())
    }

    pub fn clear_h_adaptivity(&mut self) {
        for h in self.h_adaptivity.drain(..) {
            self.state.forget_scale(h.setting.id);
        }
    }

    /// Run a single pass of hp-adaptivity. Returns `true` if the Mesh or any Field's orders changed.
    ///
    /// Call in a loop (`while domain.adapt(0)? {}`) to reach a fixed point. Messages are logged at
    /// the `info` level if `verbosity > 0` (`debug` otherwise).
    pub fn adapt(&mut self, verbosity: u8) -> Result<bool, AdaptError> {
        let orchestrator = AdaptationOrchestrator {
            planner_config: &self.planner_config,
            evaluator: self.evaluator.as_ref(),
            rebuilder: self.rebuilder.as_ref(),
            projector: self.projector.as_ref(),
        };

        orchestrator.adapt::<SF>(
            &mut self.mesh,
            &mut self.fields,
            &self.h_adaptivity,
            &mut self.state,
            verbosity,
        )
    }

    // ----------------------------------------------------------------------------------------------------
    // Evaluation
    // ----------------------------------------------------------------------------------------------------

    /// Integrate a scalar expression over a selection of Regions using a quadrature rule exact for polynomials of degree `order`
    pub fn integrate(&self, target: Target, expr: &Expr, order: usize) -> Result<f64, AdaptError> {
        let regions = self.target_regions(target)?;
        let leaf_ids: Vec<usize> = regions
            .iter()
            .flat_map(|region| self.mesh.leaf_ids_in(*region))
            .collect();

        FieldEvaluator::<SF>::new(&self.mesh, &self.fields)
            .integrate(expr, &leaf_ids, order)
            .map_err(AdaptError::Evaluation)
    }

    /// Evaluate an expression at a point
    pub fn evaluate(&self, expr: &Expr, [x, y]: [f64; 2]) -> Result<Value, AdaptError> {
        let leaf_id = self
            .mesh
            .leaf_containing(&Point::new(x, y))
            .ok_or(AdaptError::Evaluation(crate::expression::EvalError::OutsideMesh { x, y }))?;

        FieldEvaluator::<SF>::new(&self.mesh, &self.fields)
            .value_at(expr, leaf_id, [x, y])
            .map_err(AdaptError::Evaluation)
    }

    // ----------------------------------------------------------------------------------------------------
    // Output
    // ----------------------------------------------------------------------------------------------------

    /// Write the expansion orders of a Field to a VTK file
    pub fn write_field_orders(&self, field: FieldId, path: impl AsRef<str>) -> Result<(), AdaptError> {
        let field = self.field(field)?;
        let mut space = UniformFieldSpace::new(&self.mesh, [2, 2]);
        space.insert_cell_quantity(
            format!("{}_order", field.name()),
            field.orders().iter().map(|(id, order)| (id, order as f64)),
        );
        space.print_all_to_vtk(path)?;
        Ok(())
    }

    /// Write the h-Refinement level of every leaf to a VTK file
    pub fn write_levels(&self, path: impl AsRef<str>) -> Result<(), AdaptError> {
        let mut space = UniformFieldSpace::new(&self.mesh, [2, 2]);
        space.insert_cell_quantity(
            "level",
            self.mesh.leaves().map(|leaf| (leaf.id, leaf.level.0 as f64)),
        );
        space.print_all_to_vtk(path)?;
        Ok(())
    }

    /// Sample a Field on a uniform grid of `density` x `density` points per leaf and write it to a VTK file
    pub fn write_field(&self, field: FieldId, path: impl AsRef<str>, density: usize) -> Result<(), AdaptError> {
        let name = self.field(field)?.name().to_string();
        let evaluator = FieldEvaluator::<SF>::new(&self.mesh, &self.fields);

        let mut space = UniformFieldSpace::new(&self.mesh, [density, density]);
        space
            .sample_expression(name, &evaluator, &Expr::field(field))
            .map_err(AdaptError::Evaluation)?;
        space.print_all_to_vtk(path)?;
        Ok(())
    }

    // ----------------------------------------------------------------------------------------------------
    // Helpers
    // ----------------------------------------------------------------------------------------------------

    fn next_setting_id(&mut self) -> SettingId {
        self.next_setting += 1;
        SettingId(self.next_setting)
    }

    fn resolve_regions(&self, regions: impl IntoIterator<Item = RegionId>) -> Result<BTreeSet<RegionId>, AdaptError> {
        let known = self.mesh.regions();
        regions
            .into_iter()
            .map(|region| {
                if known.contains(&region) {
                    Ok(region)
                } else {
                    Err(AdaptError::UnknownRegion(region))
                }
            })
            .collect()
    }

    fn target_regions(&self, target: Target) -> Result<BTreeSet<RegionId>, AdaptError> {
        match target {
            Target::All => Ok(self.mesh.regions()),
            Target::Region(region) => self.resolve_regions([region]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::KOLShapeFn;

    fn two_region_mesh() -> Mesh {
        let left = Mesh::rectangle(RegionId(1), [0.0, 1.0], [0.0, 1.0], [2, 2]).unwrap();
        let right = Mesh::rectangle(RegionId(2), [1.0, 2.0], [0.0, 1.0], [2, 2]).unwrap();
        Mesh::from_elements(
            left.elements
                .iter()
                .chain(right.elements.iter())
                .map(|element| (element.points, element.region)),
        )
        .unwrap()
    }

    #[test]
    fn field_setup() {
        let mut domain = Domain::new(two_region_mesh());
        let u = domain.add_field("u", SpaceKind::H1, 2).unwrap();
        let e = domain
            .add_field_on("e", SpaceKind::HCurl, [RegionId(2)], 0)
            .unwrap();

        assert_eq!(domain.field_orders(u).unwrap().len(), 8);
        assert_eq!(domain.field_orders(e).unwrap().len(), 4);
        assert_eq!(domain.dofs(u).unwrap(), None);

        assert!(matches!(
            domain.add_field("bad", SpaceKind::H1, 0),
            Err(AdaptError::InvalidOrder(_))
        ));
        assert!(matches!(
            domain.add_field_on("bad", SpaceKind::H1, [RegionId(3)], 1),
            Err(AdaptError::UnknownRegion(RegionId(3)))
        ));
        assert!(matches!(domain.field(FieldId(5)), Err(AdaptError::UnknownField(FieldId(5)))));

        // HCurl order 0 on a 2 x 2 grid: one dof per edge
        assert!(matches!(
            domain.set_data(e, vec![0.0; 3]),
            Err(AdaptError::DofLength { expected: 12, found: 3 })
        ));
        domain.set_data(e, vec![1.0; 12]).unwrap();
        assert_eq!(domain.dofs(e).unwrap().map(|d| d.len()), Some(12));
    }

    #[test]
    fn values_on_regions() {
        let mut domain = Domain::new(two_region_mesh());
        let u = domain.add_field("u", SpaceKind::H1, 1).unwrap();

        domain.set_value(u, Target::All, Expr::constant(1.0), 0).unwrap();
        // continuous across x = 1 and linear on every leaf
        domain
            .set_value(u, Target::Region(RegionId(2)), Expr::field(u) + (Expr::x() - 1.0), 0)
            .unwrap();

        let left = domain.integrate(Target::Region(RegionId(1)), &Expr::field(u), 2).unwrap();
        let right = domain.integrate(Target::Region(RegionId(2)), &Expr::field(u), 2).unwrap();
        assert!((left - 1.0).abs() < 1e-10);
        assert!((right - 1.5).abs() < 1e-10);

        let value = domain.evaluate(&Expr::field(u), [1.75, 0.25]).unwrap();
        assert!((value.as_scalar().unwrap() - 1.75).abs() < 1e-10);
        assert!(matches!(
            domain.evaluate(&Expr::x(), [3.0, 0.5]),
            Err(AdaptError::Evaluation(_))
        ));
    }

    #[test]
    fn changing_orders_keeps_data() {
        let mut domain: Domain<KOLShapeFn> = Domain::with_shape_fns(two_region_mesh());
        let u = domain.add_field("u", SpaceKind::H1, 2).unwrap();
        let expr = Expr::x().powi(2) - Expr::y();
        domain.set_value(u, Target::All, expr.clone(), 0).unwrap();

        domain.set_order(u, Target::Region(RegionId(1)), 3).unwrap();
        assert_eq!(domain.field_orders(u).unwrap().get(0), Ok(3));
        assert_eq!(domain.field_orders(u).unwrap().get(4), Ok(2));
        assert_eq!(domain.adaptation_state().orders(u), domain.field_orders(u).ok());

        let error = domain
            .integrate(Target::All, &(Expr::field(u) - expr).abs(), 6)
            .unwrap();
        assert!(error < 1e-10);
    }

    #[test]
    fn adaptivity_settings() {
        let mut domain = Domain::new(two_region_mesh());
        let u = domain.add_field("u", SpaceKind::H1, 1).unwrap();

        assert!(matches!(
            domain.set_p_adaptivity(u, Expr::x(), 3, 2),
            Err(AdaptError::InvalidBounds { min: 3, max: 2 })
        ));
        assert!(matches!(
            domain.set_p_adaptivity(u, Expr::x(), 0, 2),
            Err(AdaptError::InvalidOrder(_))
        ));
        assert!(matches!(
            domain.set_h_adaptivity(Target::All, Expr::x(), 0, MAX_H_LEVEL + 1),
            Err(AdaptError::LevelOutOfRange(_))
        ));

        domain.set_p_adaptivity(u, Expr::x(), 1, 2).unwrap();
        domain.set_h_adaptivity(Target::Region(RegionId(2)), Expr::x(), 0, 1).unwrap();

        while domain.adapt(1).unwrap() {}

        // x is largest on the right half
        let orders = domain.field_orders(u).unwrap();
        assert!(orders.iter().all(|(_, order)| (1..=2).contains(&order)));
        assert!(domain.mesh().leaves().all(|leaf| leaf.level.0 <= 1));
        assert!(domain.mesh().elems[7].has_children());
        assert!(!domain.mesh().elems[0].has_children());
        assert_eq!(orders.len(), domain.mesh().leaf_ids().len());

        domain.clear_h_adaptivity();
        domain.clear_p_adaptivity(u).unwrap();
        assert!(!domain.adapt(0).unwrap());
    }

    #[test]
    fn writers() {
        let mut domain = Domain::new(two_region_mesh());
        let u = domain.add_field("u", SpaceKind::H1, 2).unwrap();
        domain.set_value(u, Target::All, Expr::x(), 0).unwrap();

        let dir = std::env::temp_dir();
        let orders_path = dir.join("hp_adapt_domain_orders.vtk");
        let levels_path = dir.join("hp_adapt_domain_levels.vtk");
        let field_path = dir.join("hp_adapt_domain_field.vtk");

        domain.write_field_orders(u, orders_path.to_string_lossy()).unwrap();
        domain.write_levels(levels_path.to_string_lossy()).unwrap();
        domain.write_field(u, field_path.to_string_lossy(), 3).unwrap();

        assert!(std::fs::read_to_string(orders_path).unwrap().contains("SCALARS u_order"));
        assert!(std::fs::read_to_string(levels_path).unwrap().contains("CELL_DATA 8"));
        assert!(std::fs::read_to_string(field_path).unwrap().contains("POINTS 72 double"));
    }
}
