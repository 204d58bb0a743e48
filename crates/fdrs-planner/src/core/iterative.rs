//! Iterative re-planning until the cluster converges.

use std::cell::RefCell;
use std::rc::Rc;

use sugars::{rc, refcell};

use crate::core::common::{MigrationPlan, PlanError};
use crate::core::config::PlannerSettings;
use crate::core::constraint_manager::ConstraintManager;
use crate::core::load_evaluator::LoadEvaluator;
use crate::core::logger::Logger;
use crate::core::migration_planner::MigrationPlanner;
use crate::core::snapshot::ClusterSnapshot;

const COMPONENT: &str = "IterativeController";

/// Result of an iterative planning run.
#[derive(Debug)]
pub struct IterativeOutcome {
    pub plan: MigrationPlan,
    pub converged: bool,
    /// Number of planning passes executed.
    pub iterations: u32,
    pub remaining_violations: usize,
    pub balanced: bool,
}

/// Re-plans until the cluster converges (no violations and balanced) or the
/// iteration cap is reached. Between iterations the snapshot is advanced by
/// the simulated application of the accumulated moves, and thresholds are
/// relaxed to avoid oscillation.
pub struct IterativeController {
    snapshot: Rc<ClusterSnapshot>,
    settings: PlannerSettings,
    logger: Rc<RefCell<dyn Logger>>,
}

impl IterativeController {
    pub fn new(snapshot: Rc<ClusterSnapshot>, settings: PlannerSettings, logger: Rc<RefCell<dyn Logger>>) -> Self {
        Self {
            snapshot,
            settings,
            logger,
        }
    }

    fn components_for(
        &self,
        snapshot: &Rc<ClusterSnapshot>,
    ) -> (Rc<RefCell<ConstraintManager>>, Rc<RefCell<LoadEvaluator>>) {
        let constraints = rc!(refcell!(ConstraintManager::new(
            snapshot.clone(),
            self.logger.clone(),
            self.settings.enable_prefix_cache,
        )));
        let evaluator = rc!(refcell!(LoadEvaluator::new(
            snapshot.clone(),
            self.logger.clone(),
            self.settings.enable_percentage_cache,
        )));
        (constraints, evaluator)
    }

    /// Runs up to `max_iterations` planning passes. Returns the accumulated
    /// plan; when the run ends without convergence the outcome carries the
    /// remaining violation count and balance state, and a warning recites
    /// them.
    pub fn plan_iterative(&self, max_iterations: u32, anti_affinity_only: bool) -> Result<IterativeOutcome, PlanError> {
        self.logger.borrow_mut().log_info(
            COMPONENT,
            format!("starting iterative planning (max {} iterations)", max_iterations),
        );

        let mut snapshot = self.snapshot.clone();
        let mut accumulated = MigrationPlan::new();
        let mut passes = 0;

        for iteration in 1..=max_iterations {
            let (constraints, evaluator) = self.components_for(&snapshot);
            let violations = constraints.borrow_mut().calculate_violations();
            let balanced =
                evaluator
                    .borrow_mut()
                    .is_balanced(&self.settings.metrics, self.settings.aggressiveness, None);
            self.logger.borrow_mut().log_info(
                COMPONENT,
                format!(
                    "iteration {}/{}: anti-affinity violations = {}, balanced = {}",
                    iteration,
                    max_iterations,
                    violations.len(),
                    balanced
                ),
            );

            if violations.is_empty() && balanced {
                self.logger.borrow_mut().log_info(
                    COMPONENT,
                    format!(
                        "converged at iteration {}: no violations, cluster is balanced ({} migrations accumulated)",
                        iteration,
                        accumulated.len()
                    ),
                );
                return Ok(IterativeOutcome {
                    plan: accumulated,
                    converged: true,
                    iterations: passes,
                    remaining_violations: 0,
                    balanced: true,
                });
            }

            // Relax thresholds on later iterations to avoid oscillation.
            let mut settings = self.settings.clone();
            if iteration > 1 {
                let relaxed = (settings.aggressiveness as f64
                    / settings.threshold_multiplier.powi(iteration as i32 - 1))
                .floor() as u32;
                settings.aggressiveness = relaxed.max(1);
                self.logger.borrow_mut().log_info(
                    COMPONENT,
                    format!(
                        "iteration {}: adjusted aggressiveness from {} to {}",
                        iteration, self.settings.aggressiveness, settings.aggressiveness
                    ),
                );
            }

            let planner = MigrationPlanner::new(
                snapshot.clone(),
                constraints.clone(),
                evaluator.clone(),
                settings,
                self.logger.clone(),
            );
            let pass_plan = planner.plan(anti_affinity_only)?;
            evaluator.borrow_mut().invalidate_cache();
            passes = iteration;

            if pass_plan.is_empty() {
                self.logger.borrow_mut().log_info(
                    COMPONENT,
                    format!("no migrations produced at iteration {}, stopping", iteration),
                );
                break;
            }

            self.logger.borrow_mut().log_info(
                COMPONENT,
                format!("iteration {} produced {} migration(s)", iteration, pass_plan.len()),
            );
            snapshot = Rc::new(snapshot.apply(&pass_plan)?);
            for planned in pass_plan.moves() {
                accumulated.push(planned.clone());
            }
        }

        let (constraints, evaluator) = self.components_for(&snapshot);
        let remaining_violations = constraints.borrow_mut().calculate_violations().len();
        let balanced = evaluator
            .borrow_mut()
            .is_balanced(&self.settings.metrics, self.settings.aggressiveness, None);
        let converged = remaining_violations == 0 && balanced;
        if !converged {
            self.logger.borrow_mut().log_warn(
                COMPONENT,
                format!(
                    "iterative planning finished without convergence after {} pass(es): \
                     {} anti-affinity violations remain, balanced = {} ({} migrations accumulated)",
                    passes,
                    remaining_violations,
                    balanced,
                    accumulated.len()
                ),
            );
        }
        Ok(IterativeOutcome {
            plan: accumulated,
            converged,
            iterations: passes,
            remaining_violations,
            balanced,
        })
    }
}
