//! Anti-affinity groups, violation detection and target selection.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::core::common::PlannedMove;
use crate::core::logger::Logger;
use crate::core::snapshot::{ClusterSnapshot, Vm};

const COMPONENT: &str = "ConstraintManager";

/// Groups VMs into anti-affinity sets by name prefix, detects distribution
/// violations and suggests move targets that repair them.
///
/// The enforced rule: for any group and any two active hosts, the group
/// member counts may differ by at most 1.
pub struct ConstraintManager {
    snapshot: Rc<ClusterSnapshot>,
    logger: Rc<RefCell<dyn Logger>>,
    enable_prefix_cache: bool,
    prefix_cache: HashMap<u32, String>,
    groups: IndexMap<String, Vec<u32>>,
}

impl ConstraintManager {
    pub fn new(snapshot: Rc<ClusterSnapshot>, logger: Rc<RefCell<dyn Logger>>, enable_prefix_cache: bool) -> Self {
        Self {
            snapshot,
            logger,
            enable_prefix_cache,
            prefix_cache: HashMap::new(),
            groups: IndexMap::new(),
        }
    }

    fn vm_prefix(&mut self, vm: &Vm) -> String {
        if !self.enable_prefix_cache {
            return vm.anti_affinity_key().to_string();
        }
        self.prefix_cache
            .entry(vm.id)
            .or_insert_with(|| vm.anti_affinity_key().to_string())
            .clone()
    }

    /// Partitions the active VM set into anti-affinity groups keyed by name
    /// prefix. Groups keep first-seen order.
    pub fn enforce_anti_affinity(&mut self) -> &IndexMap<String, Vec<u32>> {
        self.groups = IndexMap::new();
        let snapshot = self.snapshot.clone();
        for vm in snapshot.vms() {
            let prefix = self.vm_prefix(vm);
            self.groups.entry(prefix).or_insert_with(Vec::new).push(vm.id);
        }
        self.logger.borrow_mut().log_debug(
            COMPONENT,
            format!("grouped {} VMs into {} anti-affinity groups", snapshot.vms().len(), self.groups.len()),
        );
        &self.groups
    }

    fn ensure_groups(&mut self) {
        if self.groups.is_empty() {
            self.enforce_anti_affinity();
        }
    }

    /// Per-host member counts of one group over ALL active hosts, zero
    /// counts included, in snapshot host order.
    fn group_host_counts(&self, members: &[u32]) -> IndexMap<u32, i64> {
        let mut counts: IndexMap<u32, i64> = self.snapshot.hosts().iter().map(|h| (h.id, 0)).collect();
        for &vm_id in members {
            if let Some(vm) = self.snapshot.vm(vm_id) {
                if let Some(count) = counts.get_mut(&vm.host_id) {
                    *count += 1;
                }
            }
        }
        counts
    }

    /// Reports every VM placed on a host whose group member count equals the
    /// group maximum, for each group whose spread exceeds 1. Violators are
    /// deduplicated, in detection order. Fewer than two active hosts means
    /// no violations.
    pub fn calculate_violations(&mut self) -> Vec<u32> {
        self.ensure_groups();
        if self.snapshot.hosts().len() < 2 {
            self.logger.borrow_mut().log_info(
                COMPONENT,
                "not enough active hosts (<2) to apply anti-affinity distribution rules".to_string(),
            );
            return Vec::new();
        }

        let mut violations = Vec::new();
        let mut seen = HashSet::new();
        let groups = self.groups.clone();
        for (prefix, members) in &groups {
            let counts = self.group_host_counts(members);
            let max_count = counts.values().max().copied().unwrap_or(0);
            let min_count = counts.values().min().copied().unwrap_or(0);
            if max_count - min_count <= 1 {
                continue;
            }
            self.logger.borrow_mut().log_info(
                COMPONENT,
                format!(
                    "anti-affinity violation for group '{}': spread {} (max {} - min {})",
                    prefix,
                    max_count - min_count,
                    max_count,
                    min_count
                ),
            );
            for (&host_id, &count) in &counts {
                if count != max_count {
                    continue;
                }
                for &vm_id in members {
                    let on_host = self.snapshot.vm(vm_id).map_or(false, |vm| vm.host_id == host_id);
                    if on_host && seen.insert(vm_id) {
                        violations.push(vm_id);
                    }
                }
            }
        }
        self.logger.borrow_mut().log_info(
            COMPONENT,
            format!("total unique anti-affinity violations found: {}", violations.len()),
        );
        violations
    }

    /// Base group counts adjusted by the moves already planned this cycle:
    /// each prior plan for a VM of the same group decrements the count at
    /// its original host and increments the count at its planned target.
    fn adjusted_group_counts(&mut self, prefix: &str, members: &[u32], planned: &[PlannedMove]) -> IndexMap<u32, i64> {
        let mut counts = self.group_host_counts(members);
        for plan in planned {
            let planned_prefix = match self.snapshot.vm(plan.vm_id) {
                Some(vm) => vm.anti_affinity_key().to_string(),
                None => continue,
            };
            if planned_prefix != prefix {
                continue;
            }
            if let Some(count) = counts.get_mut(&plan.source_host) {
                *count -= 1;
                if *count < 0 {
                    self.logger.borrow_mut().log_warn(
                        COMPONENT,
                        format!(
                            "corrected negative group count for host {} to 0 after adjustment",
                            plan.source_host
                        ),
                    );
                    *count = 0;
                }
            }
            if let Some(count) = counts.get_mut(&plan.target_host) {
                *count += 1;
            }
        }
        counts
    }

    /// Chooses a move destination that resolves the VM's group violation,
    /// taking the moves already planned this cycle into account. Two-stage
    /// selection; `None` when neither stage finds a candidate.
    pub fn preferred_host(&mut self, vm: &Vm, planned: &[PlannedMove]) -> Option<u32> {
        self.ensure_groups();
        let prefix = self.vm_prefix(vm);
        let members = match self.groups.get(&prefix) {
            Some(members) => members.clone(),
            None => {
                self.logger.borrow_mut().log_warn(
                    COMPONENT,
                    format!("VM '{}' has no group in the distribution (prefix '{}')", vm.name, prefix),
                );
                return None;
            }
        };
        if self.snapshot.hosts().len() < 2 {
            self.logger
                .borrow_mut()
                .log_info(COMPONENT, "not enough active hosts to find a preferred host".to_string());
            return None;
        }

        let counts = self.adjusted_group_counts(&prefix, &members, planned);
        let source_host = vm.host_id;

        if let Some(target) = self.find_perfect_balance_host(&counts, source_host) {
            self.logger.borrow_mut().log_info(
                COMPONENT,
                format!("found perfect-balance host {} for VM '{}'", target, vm.name),
            );
            return Some(target);
        }

        let source_count = counts.get(&source_host).copied().unwrap_or(0);
        let target = self.find_better_than_source_host(&counts, source_host, source_count);
        match target {
            Some(host_id) => {
                self.logger.borrow_mut().log_info(
                    COMPONENT,
                    format!("found better-than-source host {} for VM '{}'", host_id, vm.name),
                );
            }
            None => {
                self.logger.borrow_mut().log_warn(
                    COMPONENT,
                    format!("no suitable host found for VM '{}' using either strategy", vm.name),
                );
            }
        }
        target
    }

    /// Stage 1: hosts whose simulated move yields group spread <= 1. The
    /// candidate with the lowest current group count wins; ties go to the
    /// lexicographically smallest host name.
    fn find_perfect_balance_host(&self, counts: &IndexMap<u32, i64>, source_host: u32) -> Option<u32> {
        let mut best: Option<(i64, &str, u32)> = None;
        for host in self.snapshot.hosts() {
            if host.id == source_host {
                continue;
            }
            let mut simulated = counts.clone();
            if let Some(count) = simulated.get_mut(&source_host) {
                *count = (*count - 1).max(0);
            }
            if let Some(count) = simulated.get_mut(&host.id) {
                *count += 1;
            }
            let max_count = simulated.values().max().copied().unwrap_or(0);
            let min_count = simulated.values().min().copied().unwrap_or(0);
            if max_count - min_count > 1 {
                continue;
            }
            let current_count = counts.get(&host.id).copied().unwrap_or(0);
            let better = match best {
                None => true,
                Some((best_count, best_name, _)) => {
                    current_count < best_count || (current_count == best_count && host.name.as_str() < best_name)
                }
            };
            if better {
                best = Some((current_count, host.name.as_str(), host.id));
            }
        }
        best.map(|(_, _, host_id)| host_id)
    }

    /// Stage 2: hosts with strictly fewer group members than the source.
    /// Same ordering rule as stage 1.
    fn find_better_than_source_host(
        &self,
        counts: &IndexMap<u32, i64>,
        source_host: u32,
        source_count: i64,
    ) -> Option<u32> {
        let mut best: Option<(i64, &str, u32)> = None;
        for host in self.snapshot.hosts() {
            if host.id == source_host {
                continue;
            }
            let current_count = counts.get(&host.id).copied().unwrap_or(0);
            if current_count >= source_count {
                continue;
            }
            let better = match best {
                None => true,
                Some((best_count, best_name, _)) => {
                    current_count < best_count || (current_count == best_count && host.name.as_str() < best_name)
                }
            };
            if better {
                best = Some((current_count, host.name.as_str(), host.id));
            }
        }
        best.map(|(_, _, host_id)| host_id)
    }

    /// Verifies that moving `vm` to `target_host`, on top of every move
    /// already planned this cycle, keeps the VM's group spread <= 1.
    pub fn is_move_safe(&mut self, vm: &Vm, target_host: u32, planned: &[PlannedMove]) -> bool {
        self.ensure_groups();
        let prefix = self.vm_prefix(vm);
        let members = match self.groups.get(&prefix) {
            Some(members) => members.clone(),
            None => return true,
        };
        if self.snapshot.hosts().len() < 2 {
            return true;
        }

        let planned_locations: HashMap<u32, u32> = planned.iter().map(|p| (p.vm_id, p.target_host)).collect();
        let mut counts: IndexMap<u32, i64> = self.snapshot.hosts().iter().map(|h| (h.id, 0)).collect();
        for &member_id in &members {
            let final_host = if member_id == vm.id {
                Some(target_host)
            } else if let Some(&planned_host) = planned_locations.get(&member_id) {
                Some(planned_host)
            } else {
                self.snapshot.vm(member_id).map(|m| m.host_id)
            };
            if let Some(host_id) = final_host {
                if let Some(count) = counts.get_mut(&host_id) {
                    *count += 1;
                }
            }
        }

        let max_count = counts.values().max().copied().unwrap_or(0);
        let min_count = counts.values().min().copied().unwrap_or(0);
        let safe = max_count - min_count <= 1;
        if !safe {
            self.logger.borrow_mut().log_debug(
                COMPONENT,
                format!(
                    "moving VM '{}' to host {} would break distribution of group '{}' (spread {})",
                    vm.name,
                    target_host,
                    prefix,
                    max_count - min_count
                ),
            );
        }
        safe
    }
}
