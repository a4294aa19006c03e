use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};

/// Constraint rows whose coefficients all fall below this fraction of their original magnitude (after substitution) are redundant
const REDUNDANCY_TOLERANCE: f64 = 1e-9;

/// Coefficients below this fraction of a row's magnitude are dropped
const DROP_TOLERANCE: f64 = 1e-14;

/// Eliminates homogeneous linear constraints (`Σ c_k x_k = 0`) from a set of unknowns
///
/// Each independent constraint removes one unknown (the one with the largest coefficient, or the
/// larger index on ties), which is expressed as a linear combination of the remaining unknowns.
/// Constraints that are linear combinations of earlier ones are detected and skipped.
#[derive(Debug, Clone)]
pub struct ConstraintEliminator {
    num_vars: usize,
    eliminated: BTreeMap<usize, BTreeMap<usize, f64>>,
    users: BTreeMap<usize, BTreeSet<usize>>,
    num_redundant: usize,
}

impl ConstraintEliminator {
    pub fn new(num_vars: usize) -> Self {
        Self {
            num_vars,
            eliminated: BTreeMap::new(),
            users: BTreeMap::new(),
            num_redundant: 0,
        }
    }

    pub fn num_eliminated(&self) -> usize {
        self.eliminated.len()
    }

    pub fn num_redundant(&self) -> usize {
        self.num_redundant
    }

    /// Add the constraint `Σ c_k x_k = 0`. Returns the eliminated unknown, or `None` if the constraint was redundant.
    pub fn add_constraint(&mut self, row: &[(usize, f64)]) -> Option<usize> {
        let scale = row.iter().fold(0.0_f64, |acc, (_, c)| acc.max(c.abs()));
        if scale == 0.0 {
            self.num_redundant += 1;
            return None;
        }

        // substitute unknowns that were already eliminated
        let mut reduced: BTreeMap<usize, f64> = BTreeMap::new();
        for &(var, coeff) in row {
            debug_assert!(var < self.num_vars, "constraint references unknown {}", var);
            match self.eliminated.get(&var) {
                Some(expression) => {
                    for (w, cw) in expression.iter() {
                        *reduced.entry(*w).or_insert(0.0) += coeff * cw;
                    }
                }
                None => *reduced.entry(var).or_insert(0.0) += coeff,
            }
        }
        reduced.retain(|_, c| c.abs() >= DROP_TOLERANCE * scale);

        // pivot on the largest coefficient (larger index on ties)
        let pivot = reduced
            .iter()
            .fold(None, |best: Option<(usize, f64)>, (var, c)| match best {
                Some((_, best_c)) if c.abs() < best_c => best,
                _ => Some((*var, c.abs())),
            });

        let (pivot, pivot_magnitude) = match pivot {
            Some(p) if p.1 >= REDUNDANCY_TOLERANCE * scale => p,
            _ => {
                self.num_redundant += 1;
                return None;
            }
        };

        let pivot_coeff = reduced[&pivot];
        let expression: BTreeMap<usize, f64> = reduced
            .iter()
            .filter(|(var, _)| **var != pivot)
            .map(|(var, c)| (*var, -c / pivot_coeff))
            .filter(|(_, c)| c.abs() >= DROP_TOLERANCE * scale / pivot_magnitude)
            .collect();

        // rewrite the expressions which depended on the new pivot
        if let Some(users) = self.users.remove(&pivot) {
            for user in users {
                if let Some(user_expression) = self.eliminated.get_mut(&user) {
                    if let Some(weight) = user_expression.remove(&pivot) {
                        for (var, c) in expression.iter() {
                            *user_expression.entry(*var).or_insert(0.0) += weight * c;
                            self.users.entry(*var).or_default().insert(user);
                        }
                        let magnitude = user_expression.values().fold(0.0_f64, |acc, c| acc.max(c.abs()));
                        user_expression.retain(|_, c| c.abs() >= DROP_TOLERANCE * magnitude);
                    }
                }
            }
        }

        for var in expression.keys() {
            self.users.entry(*var).or_default().insert(pivot);
        }
        self.eliminated.insert(pivot, expression);

        Some(pivot)
    }

    /// Number the remaining (free) unknowns in order and express every unknown in terms of them
    pub fn finish(self) -> DofMap {
        let mut global_ids = vec![None; self.num_vars];
        let mut num_dofs = 0;
        for (var, id) in global_ids.iter_mut().enumerate() {
            if !self.eliminated.contains_key(&var) {
                *id = Some(num_dofs);
                num_dofs += 1;
            }
        }

        let rows = (0..self.num_vars)
            .map(|var| match (global_ids[var], self.eliminated.get(&var)) {
                (Some(g), _) => SmallVec::from_slice(&[(g, 1.0)]),
                (None, Some(expression)) => expression
                    .iter()
                    .filter_map(|(w, c)| global_ids[*w].map(|g| (g, *c)))
                    .collect(),
                (None, None) => SmallVec::new(),
            })
            .collect();

        DofMap { rows, num_dofs }
    }
}

/// Sparse map from local (element-wise) coefficients to global degrees of freedom: `local = T · dofs`
#[derive(Debug, Clone, PartialEq)]
pub struct DofMap {
    rows: Vec<SmallVec<[(usize, f64); 4]>>,
    num_dofs: usize,
}

impl DofMap {
    /// A map without constraints: every local coefficient is its own degree of freedom
    pub fn identity(num_local: usize) -> Self {
        Self {
            rows: (0..num_local)
                .map(|i| SmallVec::from_slice(&[(i, 1.0)]))
                .collect(),
            num_dofs: num_local,
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn num_local(&self) -> usize {
        self.rows.len()
    }

    /// Global degrees of freedom (and their weights) contributing to a local coefficient
    pub fn row(&self, local_idx: usize) -> &[(usize, f64)] {
        &self.rows[local_idx]
    }

    /// Compute all local coefficients from a vector of global degrees of freedom
    pub fn expand(&self, dofs: &[f64]) -> Vec<f64> {
        self.rows
            .iter()
            .map(|row| row.iter().map(|(g, w)| dofs[*g] * w).sum())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chained_equalities() {
        let mut ce = ConstraintEliminator::new(4);

        assert_eq!(ce.add_constraint(&[(0, 1.0), (1, -1.0)]), Some(1));
        assert_eq!(ce.add_constraint(&[(1, 1.0), (2, -1.0)]), Some(2));
        assert_eq!(ce.add_constraint(&[(0, 1.0), (2, -1.0)]), None);

        assert_eq!(ce.num_eliminated(), 2);
        assert_eq!(ce.num_redundant(), 1);

        let dof_map = ce.finish();
        assert_eq!(dof_map.num_dofs(), 2);
        assert_eq!(dof_map.row(1), &[(0, 1.0)]);
        assert_eq!(dof_map.row(2), &[(0, 1.0)]);
        assert_eq!(dof_map.row(3), &[(1, 1.0)]);
        assert_eq!(dof_map.expand(&[2.0, 5.0]), vec![2.0, 2.0, 2.0, 5.0]);
    }

    #[test]
    fn hanging_value_constraint() {
        // x2 is the midpoint value of a linear trace between x0 and x1; x3 depends on x2
        let mut ce = ConstraintEliminator::new(4);

        assert_eq!(ce.add_constraint(&[(3, 0.5), (2, -1.0)]), Some(2));
        assert_eq!(ce.add_constraint(&[(2, 2.0), (0, -1.0), (1, -1.0)]), Some(3));

        let dof_map = ce.finish();
        assert_eq!(dof_map.num_dofs(), 2);

        let local = dof_map.expand(&[1.0, 3.0]);
        assert!((local[2] - 2.0).abs() < 1e-15);
        assert!((local[3] - 4.0).abs() < 1e-15);
    }

    #[test]
    fn substitution_updates_earlier_expressions() {
        let mut ce = ConstraintEliminator::new(3);

        // x1 = x0 / 2, then x0 = x2 / 3 (x0 has the larger coefficient)
        assert_eq!(ce.add_constraint(&[(1, 1.0), (0, -0.5)]), Some(1));
        assert_eq!(ce.add_constraint(&[(0, 3.0), (2, -1.0)]), Some(0));

        let dof_map = ce.finish();
        assert_eq!(dof_map.num_dofs(), 1);
        assert_eq!(dof_map.row(1).len(), 1);

        let local = dof_map.expand(&[6.0]);
        assert!((local[0] - 2.0).abs() < 1e-15);
        assert!((local[1] - 1.0).abs() < 1e-15);
        assert!((local[2] - 6.0).abs() < 1e-15);
    }

    #[test]
    fn identity_map() {
        let dof_map = DofMap::identity(3);
        assert_eq!(dof_map.num_local(), 3);
        assert_eq!(dof_map.expand(&[1.0, 2.0, 3.0]), vec![1.0, 2.0, 3.0]);
        assert_eq!(ConstraintEliminator::new(3).finish(), dof_map);
    }
}
