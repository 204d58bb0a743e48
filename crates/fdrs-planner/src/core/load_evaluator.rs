//! Per-host usage percentages and the cluster imbalance report.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::core::common::{Resource, ResourceVector};
use crate::core::logger::Logger;
use crate::core::snapshot::ClusterSnapshot;

const COMPONENT: &str = "LoadEvaluator";

/// Per-host usage percentages, one entry per host in snapshot order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PercentageLists {
    pub cpu: Vec<f64>,
    pub memory: Vec<f64>,
    pub disk: Vec<f64>,
    pub network: Vec<f64>,
}

impl PercentageLists {
    pub fn get(&self, resource: Resource) -> &[f64] {
        match resource {
            Resource::Cpu => &self.cpu,
            Resource::Memory => &self.memory,
            Resource::Disk => &self.disk,
            Resource::Network => &self.network,
        }
    }
}

/// Imbalance statistics for a single resource.
#[derive(Clone, Debug, Serialize)]
pub struct ResourceImbalance {
    pub is_imbalanced: bool,
    pub current_diff: f64,
    pub threshold: f64,
    pub min_usage: f64,
    pub max_usage: f64,
    pub avg_usage: f64,
}

/// Per-resource imbalance verdicts for one evaluation, in evaluation order.
pub type ImbalanceReport = IndexMap<Resource, ResourceImbalance>;

/// Converts absolute usage to a percentage of capacity. A non-positive
/// capacity yields 0 rather than a division error.
pub fn usage_percentage(usage: f64, capacity: f64) -> f64 {
    if capacity > 0. {
        usage / capacity * 100.
    } else {
        0.
    }
}

/// Computes per-host usage percentages and decides per-resource imbalance.
///
/// The percentage quartet is memoized; callers must invalidate the cache at
/// the start of every planning cycle and after each simulated application of
/// moves.
pub struct LoadEvaluator {
    snapshot: Rc<ClusterSnapshot>,
    logger: Rc<RefCell<dyn Logger>>,
    enable_cache: bool,
    cache: Option<PercentageLists>,
}

impl LoadEvaluator {
    pub fn new(snapshot: Rc<ClusterSnapshot>, logger: Rc<RefCell<dyn Logger>>, enable_cache: bool) -> Self {
        Self {
            snapshot,
            logger,
            enable_cache,
            cache: None,
        }
    }

    /// Maps an aggressiveness level to the max allowed spread in percent.
    /// The same threshold applies to all four resources.
    pub fn threshold_for(&self, aggressiveness: u32) -> f64 {
        match aggressiveness {
            1 => 25.,
            2 => 20.,
            3 => 15.,
            4 => 10.,
            5 => 5.,
            other => {
                self.logger.borrow_mut().log_warn(
                    COMPONENT,
                    format!("invalid aggressiveness level {}, defaulting to 15% threshold", other),
                );
                15.
            }
        }
    }

    pub fn invalidate_cache(&mut self) {
        self.cache = None;
    }

    /// The live percentage quartet, memoized when caching is enabled.
    pub fn percentage_lists(&mut self) -> PercentageLists {
        if self.enable_cache {
            if let Some(cached) = &self.cache {
                return cached.clone();
            }
        }
        let lists = self.compute_percentage_lists();
        if self.enable_cache {
            self.cache = Some(lists.clone());
        }
        lists
    }

    fn compute_percentage_lists(&self) -> PercentageLists {
        let mut lists = PercentageLists::default();
        for host in self.snapshot.hosts() {
            lists.cpu.push(usage_percentage(host.usage.cpu, host.capacity.cpu));
            lists
                .memory
                .push(usage_percentage(host.usage.memory, host.capacity.memory));
            lists.disk.push(usage_percentage(host.usage.disk, host.capacity.disk));
            lists
                .network
                .push(usage_percentage(host.usage.network, host.capacity.network));
        }
        lists
    }

    /// Host id to usage percentage vector, in snapshot order.
    pub fn percentage_map(&mut self) -> IndexMap<u32, ResourceVector> {
        let lists = self.percentage_lists();
        let mut map = IndexMap::new();
        for (idx, host) in self.snapshot.hosts().iter().enumerate() {
            map.insert(
                host.id,
                ResourceVector::new(
                    lists.cpu[idx],
                    lists.memory[idx],
                    lists.disk[idx],
                    lists.network[idx],
                ),
            );
        }
        map
    }

    /// Evaluates per-resource imbalance over the given metrics. When
    /// `overrides` are supplied (a simulated percentage quartet) they replace
    /// the live percentages. Fewer than two data points means balanced.
    pub fn evaluate_imbalance(
        &mut self,
        metrics: &[Resource],
        aggressiveness: u32,
        overrides: Option<&PercentageLists>,
    ) -> ImbalanceReport {
        let lists = match overrides {
            Some(lists) => lists.clone(),
            None => self.percentage_lists(),
        };
        let threshold = self.threshold_for(aggressiveness);

        let mut report = ImbalanceReport::new();
        for &resource in metrics {
            let percentages = lists.get(resource);
            if percentages.len() < 2 {
                report.insert(
                    resource,
                    ResourceImbalance {
                        is_imbalanced: false,
                        current_diff: 0.,
                        threshold,
                        min_usage: 0.,
                        max_usage: 0.,
                        avg_usage: 0.,
                    },
                );
                continue;
            }

            let min_usage = percentages.iter().cloned().fold(f64::INFINITY, f64::min);
            let max_usage = percentages.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
            let avg_usage = percentages.iter().sum::<f64>() / percentages.len() as f64;
            let current_diff = max_usage - min_usage;
            let is_imbalanced = current_diff > threshold;
            if is_imbalanced {
                self.logger.borrow_mut().log_warn(
                    COMPONENT,
                    format!(
                        "resource '{}' is imbalanced: difference {:.2}% > threshold {:.2}% (aggressiveness {})",
                        resource, current_diff, threshold, aggressiveness
                    ),
                );
            } else {
                self.logger.borrow_mut().log_debug(
                    COMPONENT,
                    format!(
                        "resource '{}' is balanced: difference {:.2}% <= threshold {:.2}%",
                        resource, current_diff, threshold
                    ),
                );
            }
            report.insert(
                resource,
                ResourceImbalance {
                    is_imbalanced,
                    current_diff,
                    threshold,
                    min_usage,
                    max_usage,
                    avg_usage,
                },
            );
        }
        report
    }

    /// True iff no evaluated resource is imbalanced.
    pub fn is_balanced(
        &mut self,
        metrics: &[Resource],
        aggressiveness: u32,
        overrides: Option<&PercentageLists>,
    ) -> bool {
        self.evaluate_imbalance(metrics, aggressiveness, overrides)
            .values()
            .all(|details| !details.is_imbalanced)
    }
}
