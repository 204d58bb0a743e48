//! Migration planning: anti-affinity repair followed by load balancing.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::core::common::{FitVerdict, MigrationPlan, MoveReason, PlanError, PlannedMove, Resource, ResourceVector};
use crate::core::config::PlannerSettings;
use crate::core::constraint_manager::ConstraintManager;
use crate::core::load_evaluator::{usage_percentage, LoadEvaluator, PercentageLists};
use crate::core::logger::Logger;
use crate::core::snapshot::{ClusterSnapshot, Host, Vm};

const COMPONENT: &str = "MigrationPlanner";

/// Soft-fit ceiling applied to anti-affinity moves in default mode. Higher
/// than the balancing watermarks so distribution can be repaired even on
/// moderately loaded hosts.
const SOFT_FIT_CPU_PERCENT: f64 = 95.;
const SOFT_FIT_MEMORY_PERCENT: f64 = 95.;

/// Absolute CPU and memory loads of the cluster under a hypothetical set of
/// moves. Disk and network percentages are carried through from the
/// snapshot; only CPU and memory are mutated by migration simulation.
struct SimulatedLoads {
    cpu: IndexMap<u32, f64>,
    memory: IndexMap<u32, f64>,
}

impl SimulatedLoads {
    fn from_snapshot(snapshot: &ClusterSnapshot) -> Self {
        let mut cpu = IndexMap::new();
        let mut memory = IndexMap::new();
        for host in snapshot.hosts() {
            cpu.insert(host.id, host.usage.cpu);
            memory.insert(host.id, host.usage.memory);
        }
        Self { cpu, memory }
    }

    /// Transfers the VM's CPU and memory contributions from source to
    /// target. Source loads are floored at zero.
    fn apply_move(&mut self, vm: &Vm, source_host: u32, target_host: u32) {
        if let Some(load) = self.cpu.get_mut(&source_host) {
            *load = (*load - vm.usage.cpu).max(0.);
        }
        if let Some(load) = self.memory.get_mut(&source_host) {
            *load = (*load - vm.usage.memory).max(0.);
        }
        if let Some(load) = self.cpu.get_mut(&target_host) {
            *load += vm.usage.cpu;
        }
        if let Some(load) = self.memory.get_mut(&target_host) {
            *load += vm.usage.memory;
        }
    }

    fn cpu_load(&self, host_id: u32) -> f64 {
        self.cpu.get(&host_id).copied().unwrap_or(0.)
    }

    fn memory_load(&self, host_id: u32) -> f64 {
        self.memory.get(&host_id).copied().unwrap_or(0.)
    }

    /// Simulated usage percentages of one host. `host_idx` is the host's
    /// position in snapshot order, used to pick up the carried-through disk
    /// and network percentages.
    fn host_percentages(&self, host: &Host, host_idx: usize, base: &PercentageLists) -> ResourceVector {
        ResourceVector::new(
            usage_percentage(self.cpu_load(host.id), host.capacity.cpu),
            usage_percentage(self.memory_load(host.id), host.capacity.memory),
            base.disk.get(host_idx).copied().unwrap_or(0.),
            base.network.get(host_idx).copied().unwrap_or(0.),
        )
    }

    /// The full simulated percentage quartet in snapshot order.
    fn percentage_lists(&self, snapshot: &ClusterSnapshot, base: &PercentageLists) -> PercentageLists {
        let mut lists = PercentageLists::default();
        for (idx, host) in snapshot.hosts().iter().enumerate() {
            let percentages = self.host_percentages(host, idx, base);
            lists.cpu.push(percentages.cpu);
            lists.memory.push(percentages.memory);
            lists.disk.push(percentages.disk);
            lists.network.push(percentages.network);
        }
        lists
    }
}

/// Plans a cycle of migrations over an immutable snapshot: an anti-affinity
/// pass, a simulation of its moves, a balancing pass on the simulated state
/// and a deterministic truncation to the migration budget.
///
/// Planning is pure with respect to the snapshot; only the parallel
/// simulated-load map is advanced.
pub struct MigrationPlanner {
    snapshot: Rc<ClusterSnapshot>,
    constraints: Rc<RefCell<ConstraintManager>>,
    evaluator: Rc<RefCell<LoadEvaluator>>,
    settings: PlannerSettings,
    logger: Rc<RefCell<dyn Logger>>,
}

impl MigrationPlanner {
    pub fn new(
        snapshot: Rc<ClusterSnapshot>,
        constraints: Rc<RefCell<ConstraintManager>>,
        evaluator: Rc<RefCell<LoadEvaluator>>,
        settings: PlannerSettings,
        logger: Rc<RefCell<dyn Logger>>,
    ) -> Self {
        Self {
            snapshot,
            constraints,
            evaluator,
            settings,
            logger,
        }
    }

    /// Runs one planning cycle. With `anti_affinity_only` the balancing pass
    /// is skipped and only distribution is repaired.
    pub fn plan(&self, anti_affinity_only: bool) -> Result<MigrationPlan, PlanError> {
        self.logger
            .borrow_mut()
            .log_info(COMPONENT, "starting migration planning cycle".to_string());
        self.evaluator.borrow_mut().invalidate_cache();

        let mut moves = self.plan_anti_affinity_moves();
        self.logger.borrow_mut().log_info(
            COMPONENT,
            format!("anti-affinity pass planned {} migration(s)", moves.len()),
        );

        if anti_affinity_only {
            self.logger.borrow_mut().log_info(
                COMPONENT,
                "anti-affinity only mode: skipping resource balancing phase".to_string(),
            );
        } else {
            let balancing = self.plan_balancing_moves(&moves);
            self.logger.borrow_mut().log_info(
                COMPONENT,
                format!("balancing pass planned {} migration(s)", balancing.len()),
            );
            moves.extend(balancing);
        }

        let moves = self.truncate(moves);
        for planned in &moves {
            if self.snapshot.host(planned.target_host).is_none() {
                return Err(PlanError::TargetHostMissing {
                    vm: planned.vm_name.clone(),
                    host_id: planned.target_host,
                });
            }
        }
        Ok(MigrationPlan::from_moves(moves))
    }

    /// Step 1: plans moves that repair anti-affinity violations, in
    /// detection order, each admitted by the soft fit unless distribution is
    /// prioritized over load.
    fn plan_anti_affinity_moves(&self) -> Vec<PlannedMove> {
        let violations = self.constraints.borrow_mut().calculate_violations();
        if violations.is_empty() {
            return Vec::new();
        }

        let mut moves: Vec<PlannedMove> = Vec::new();
        for vm_id in violations {
            let vm = match self.snapshot.vm(vm_id) {
                Some(vm) => vm,
                None => continue,
            };
            if moves.iter().any(|m| m.vm_id == vm.id) {
                continue;
            }

            let target = self.constraints.borrow_mut().preferred_host(vm, &moves);
            let target_host = match target {
                Some(host_id) => host_id,
                None => {
                    self.logger.borrow_mut().log_warn(
                        COMPONENT,
                        format!("no suitable preferred host found for anti-affinity violating VM '{}'", vm.name),
                    );
                    continue;
                }
            };

            if self.settings.anti_affinity_only {
                self.logger.borrow_mut().log_info(
                    COMPONENT,
                    format!("anti-affinity only mode: skipping resource fit check for VM '{}'", vm.name),
                );
            } else {
                let verdict = self.soft_fit(vm, target_host);
                if verdict != FitVerdict::Fits {
                    self.logger.borrow_mut().log_warn(
                        COMPONENT,
                        format!(
                            "target host {} for VM '{}' would exceed soft capacity thresholds ({:?}), dropping move",
                            target_host, vm.name, verdict
                        ),
                    );
                    continue;
                }
            }

            self.logger.borrow_mut().log_info(
                COMPONENT,
                format!(
                    "planned anti-affinity migration: VM '{}' from host {} to host {}",
                    vm.name, vm.host_id, target_host
                ),
            );
            moves.push(PlannedMove {
                vm_id: vm.id,
                vm_name: vm.name.clone(),
                source_host: vm.host_id,
                target_host,
                reason: MoveReason::AntiAffinity,
            });
        }
        moves
    }

    /// Soft admission check for anti-affinity moves, evaluated on the live
    /// snapshot (the anti-affinity pass precedes any simulation).
    fn soft_fit(&self, vm: &Vm, target_host: u32) -> FitVerdict {
        let host = match self.snapshot.host(target_host) {
            Some(host) => host,
            None => return FitVerdict::MissingStats,
        };
        Self::projected_fit(
            vm,
            host,
            host.usage.cpu,
            host.usage.memory,
            SOFT_FIT_CPU_PERCENT,
            SOFT_FIT_MEMORY_PERCENT,
        )
    }

    /// Projected post-move utilization check. Base loads are absolute and
    /// chosen by the caller (live for soft fit, simulated for hard fit).
    fn projected_fit(
        vm: &Vm,
        host: &Host,
        cpu_base: f64,
        memory_base: f64,
        cpu_limit: f64,
        memory_limit: f64,
    ) -> FitVerdict {
        if !vm.stats_available {
            return FitVerdict::MissingStats;
        }
        let projected_cpu = usage_percentage(cpu_base + vm.usage.cpu, host.capacity.cpu);
        let projected_memory = usage_percentage(memory_base + vm.usage.memory, host.capacity.memory);
        if projected_cpu > cpu_limit {
            FitVerdict::ExceedsCpu
        } else if projected_memory > memory_limit {
            FitVerdict::ExceedsMemory
        } else {
            FitVerdict::Fits
        }
    }

    /// Steps 2 and 3: simulates the anti-affinity moves and plans balancing
    /// moves on the simulated state. Accepted balancing moves are folded
    /// into the running simulated loads.
    fn plan_balancing_moves(&self, aa_moves: &[PlannedMove]) -> Vec<PlannedMove> {
        let mut sim = SimulatedLoads::from_snapshot(&self.snapshot);
        for planned in aa_moves {
            if let Some(vm) = self.snapshot.vm(planned.vm_id) {
                sim.apply_move(vm, planned.source_host, planned.target_host);
            }
        }

        let base = self.evaluator.borrow_mut().percentage_lists();
        let sim_lists = sim.percentage_lists(&self.snapshot, &base);
        let report = self.evaluator.borrow_mut().evaluate_imbalance(
            &self.settings.metrics,
            self.settings.aggressiveness,
            Some(&sim_lists),
        );

        let problematic: Vec<Resource> = report
            .iter()
            .filter(|(_, details)| details.is_imbalanced)
            .map(|(&resource, _)| resource)
            .collect();
        if problematic.is_empty() {
            self.logger.borrow_mut().log_info(
                COMPONENT,
                "cluster is balanced after anti-affinity simulation, no balancing moves needed".to_string(),
            );
            return Vec::new();
        }
        self.logger.borrow_mut().log_info(
            COMPONENT,
            format!(
                "problematic resources identified for balancing: {}",
                problematic.iter().map(|r| r.to_string()).collect::<Vec<_>>().join(", ")
            ),
        );

        let threshold = self.evaluator.borrow().threshold_for(self.settings.aggressiveness);
        let mut balancing: Vec<PlannedMove> = Vec::new();
        let mut cycle_moves: Vec<PlannedMove> = aa_moves.to_vec();

        for (source_idx, source) in self.snapshot.hosts().iter().enumerate() {
            let source_percentages = sim.host_percentages(source, source_idx, &base);

            // Source candidacy: clearly above average on some problematic
            // resource and among the most loaded hosts for it.
            let mut hint: Option<Resource> = None;
            for &resource in &problematic {
                let details = &report[&resource];
                let usage = source_percentages.get(resource);
                let above_average = usage > details.avg_usage + threshold / 2.;
                let near_max = usage >= details.max_usage * 0.95;
                if above_average && near_max && usage > 0. {
                    hint = Some(resource);
                    break;
                }
            }
            let hint = match hint {
                Some(resource) => resource,
                None => continue,
            };
            self.logger.borrow_mut().log_info(
                COMPONENT,
                format!(
                    "host '{}' is a balancing source candidate (high {} usage: {:.1}%)",
                    source.name,
                    hint,
                    source_percentages.get(hint)
                ),
            );

            let candidates = self.select_vms_to_move(source, hint, &cycle_moves);
            for vm in candidates {
                let target = self.find_better_host_for_balancing(
                    vm,
                    source,
                    hint,
                    &problematic,
                    &sim,
                    &base,
                    threshold,
                    &cycle_moves,
                );
                match target {
                    Some(target_host) => {
                        self.logger.borrow_mut().log_info(
                            COMPONENT,
                            format!(
                                "planned balancing migration: VM '{}' from host '{}' to host {}",
                                vm.name, source.name, target_host
                            ),
                        );
                        let planned = PlannedMove {
                            vm_id: vm.id,
                            vm_name: vm.name.clone(),
                            source_host: source.id,
                            target_host,
                            reason: MoveReason::Balancing,
                        };
                        sim.apply_move(vm, source.id, target_host);
                        cycle_moves.push(planned.clone());
                        balancing.push(planned);
                    }
                    None => {
                        self.logger.borrow_mut().log_info(
                            COMPONENT,
                            format!(
                                "no suitable balancing target found for VM '{}' on host '{}'",
                                vm.name, source.name
                            ),
                        );
                    }
                }
            }
        }
        balancing
    }

    /// Picks up to `aggressiveness` resident VMs not already planned this
    /// cycle, ranked by their contribution to the hinted resource.
    fn select_vms_to_move(&self, source: &Host, hint: Resource, cycle_moves: &[PlannedMove]) -> Vec<&Vm> {
        let mut candidates: Vec<&Vm> = self
            .snapshot
            .vms_on_host(source.id)
            .into_iter()
            .filter(|vm| !cycle_moves.iter().any(|m| m.vm_id == vm.id))
            .collect();

        let rank = |vm: &Vm| match hint {
            Resource::Cpu => vm.usage.cpu,
            Resource::Memory => vm.usage.memory,
            _ => vm.usage.cpu + vm.usage.memory,
        };
        // Stable sort keeps snapshot order among equally loaded VMs.
        candidates.sort_by(|a, b| rank(b).partial_cmp(&rank(a)).unwrap_or(std::cmp::Ordering::Equal));
        candidates.truncate(self.settings.aggressiveness as usize);
        self.logger.borrow_mut().log_debug(
            COMPONENT,
            format!(
                "selected {} candidate VM(s) to move from host '{}'",
                candidates.len(),
                source.name
            ),
        );
        candidates
    }

    /// Scores every other host for a balancing move and returns the best
    /// one, or `None` when no host passes the hard fit, the anti-affinity
    /// safety check and the ping-pong guard.
    #[allow(clippy::too_many_arguments)]
    fn find_better_host_for_balancing(
        &self,
        vm: &Vm,
        source: &Host,
        hint: Resource,
        problematic: &[Resource],
        sim: &SimulatedLoads,
        base: &PercentageLists,
        threshold: f64,
        cycle_moves: &[PlannedMove],
    ) -> Option<u32> {
        let source_idx = self.snapshot.hosts().iter().position(|h| h.id == source.id)?;
        let source_hint_usage = sim.host_percentages(source, source_idx, base).get(hint);

        let mut best: Option<(u32, f64)> = None;
        for (target_idx, target) in self.snapshot.hosts().iter().enumerate() {
            if target.id == source.id {
                continue;
            }

            let verdict = Self::projected_fit(
                vm,
                target,
                sim.cpu_load(target.id),
                sim.memory_load(target.id),
                self.settings.cpu_high_watermark,
                self.settings.memory_high_watermark,
            );
            if verdict != FitVerdict::Fits {
                self.logger.borrow_mut().log_debug(
                    COMPONENT,
                    format!("VM '{}' would not fit on host '{}': {:?}", vm.name, target.name, verdict),
                );
                continue;
            }

            if !self.settings.ignore_anti_affinity
                && !self.constraints.borrow_mut().is_move_safe(vm, target.id, cycle_moves)
            {
                self.logger.borrow_mut().log_debug(
                    COMPONENT,
                    format!("host '{}' skipped for VM '{}' due to anti-affinity rules", target.name, vm.name),
                );
                continue;
            }

            let target_percentages = sim.host_percentages(target, target_idx, base);

            // Ping-pong guard: the move must improve the hinted resource by
            // at least a third of its threshold.
            if target_percentages.get(hint) >= source_hint_usage - threshold / 3. {
                self.logger.borrow_mut().log_debug(
                    COMPONENT,
                    format!(
                        "host '{}' skipped for VM '{}': {} usage {:.1}% is not sufficiently below source's {:.1}%",
                        target.name,
                        vm.name,
                        hint,
                        target_percentages.get(hint),
                        source_hint_usage
                    ),
                );
                continue;
            }

            let score: f64 = problematic.iter().map(|&r| 100. - target_percentages.get(r)).sum();
            if score <= 0. {
                continue;
            }
            let better = match best {
                None => true,
                Some((_, best_score)) => score > best_score,
            };
            if better {
                best = Some((target.id, score));
            }
        }

        best.map(|(host_id, score)| {
            self.logger.borrow_mut().log_info(
                COMPONENT,
                format!(
                    "best balancing target for VM '{}' is host {} with score {:.2}",
                    vm.name, host_id, score
                ),
            );
            host_id
        })
    }

    /// Step 4: deterministic truncation to the migration budget,
    /// anti-affinity moves first in order, balancing moves filling the
    /// remaining slots in order.
    fn truncate(&self, moves: Vec<PlannedMove>) -> Vec<PlannedMove> {
        let limit = self.settings.max_total_migrations;
        if moves.len() <= limit {
            return moves;
        }
        self.logger.borrow_mut().log_warn(
            COMPONENT,
            format!(
                "planned migrations ({}) exceed max limit ({}), truncating with anti-affinity moves first",
                moves.len(),
                limit
            ),
        );
        let mut truncated: Vec<PlannedMove> = moves
            .iter()
            .filter(|m| m.reason == MoveReason::AntiAffinity)
            .take(limit)
            .cloned()
            .collect();
        let remaining = limit - truncated.len();
        truncated.extend(
            moves
                .iter()
                .filter(|m| m.reason == MoveReason::Balancing)
                .take(remaining)
                .cloned(),
        );
        truncated
    }
}
