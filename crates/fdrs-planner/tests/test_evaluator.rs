use std::cell::RefCell;
use std::rc::Rc;

use sugars::{rc, refcell};

use fdrs_planner::core::common::{Resource, ResourceVector};
use fdrs_planner::core::load_evaluator::{LoadEvaluator, PercentageLists};
use fdrs_planner::core::logger::{FileLogger, Logger};
use fdrs_planner::core::snapshot::{ClusterSnapshot, HostDescription, Vm};

fn make_logger() -> (Rc<RefCell<FileLogger>>, Rc<RefCell<dyn Logger>>) {
    let file_logger = rc!(refcell!(FileLogger::new()));
    let logger: Rc<RefCell<dyn Logger>> = file_logger.clone();
    (file_logger, logger)
}

fn make_host(id: u32, name: &str, cpu_capacity: f64, memory_capacity: f64, memory_usage: f64) -> HostDescription {
    HostDescription {
        id,
        name: name.to_string(),
        cluster: "main".to_string(),
        capacity: ResourceVector::new(cpu_capacity, memory_capacity, 4000., 1250.),
        memory_usage,
    }
}

fn make_vm(id: u32, name: &str, host_id: u32, cpu: f64, memory: f64) -> Vm {
    Vm {
        id,
        name: name.to_string(),
        host_id,
        usage: ResourceVector::new(cpu, memory, 0., 0.),
        stats_available: true,
    }
}

// Three hosts with 80% / 20% / 50% CPU load.
fn make_skewed_snapshot(logger: &Rc<RefCell<dyn Logger>>) -> Rc<ClusterSnapshot> {
    Rc::new(ClusterSnapshot::build(
        vec![
            make_host(1, "h1", 1000., 1000., 10.),
            make_host(2, "h2", 1000., 1000., 10.),
            make_host(3, "h3", 1000., 1000., 10.),
        ],
        vec![
            make_vm(101, "pa01", 1, 800., 10.),
            make_vm(102, "qb01", 2, 200., 10.),
            make_vm(103, "rc01", 3, 500., 10.),
        ],
        logger,
    ))
}

#[test]
// Aggressiveness 1..5 maps to 25/20/15/10/5 percent; an unknown level falls
// back to 15 with a warning.
fn test_thresholds() {
    let (file_logger, logger) = make_logger();
    let snapshot = make_skewed_snapshot(&logger);
    let evaluator = LoadEvaluator::new(snapshot, logger, true);

    assert_eq!(evaluator.threshold_for(1), 25.);
    assert_eq!(evaluator.threshold_for(2), 20.);
    assert_eq!(evaluator.threshold_for(3), 15.);
    assert_eq!(evaluator.threshold_for(4), 10.);
    assert_eq!(evaluator.threshold_for(5), 5.);
    assert_eq!(evaluator.threshold_for(9), 15.);
    assert!(file_logger
        .borrow()
        .entries()
        .iter()
        .any(|e| e.level == "WARN" && e.message.contains("invalid aggressiveness level 9")));
}

#[test]
// A 60% CPU spread exceeds the aggressiveness-3 threshold of 15%.
fn test_imbalance_detection() {
    let (_, logger) = make_logger();
    let snapshot = make_skewed_snapshot(&logger);
    let mut evaluator = LoadEvaluator::new(snapshot, logger, true);

    let report = evaluator.evaluate_imbalance(&Resource::ALL, 3, None);
    let cpu = &report[&Resource::Cpu];
    assert!(cpu.is_imbalanced);
    assert_eq!(cpu.min_usage, 20.);
    assert_eq!(cpu.max_usage, 80.);
    assert_eq!(cpu.avg_usage, 50.);
    assert_eq!(cpu.current_diff, 60.);
    assert_eq!(cpu.threshold, 15.);
    // memory spread of 0% is balanced
    assert!(!report[&Resource::Memory].is_imbalanced);
    assert!(!evaluator.is_balanced(&Resource::ALL, 3, None));
    // the loosest level tolerates a 60% spread only at 25%, still imbalanced
    assert!(!evaluator.is_balanced(&Resource::ALL, 1, None));
}

#[test]
// A 10% spread stays within the aggressiveness-3 threshold.
fn test_small_spread_is_balanced() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1", 1000., 1000., 10.), make_host(2, "h2", 1000., 1000., 10.)],
        vec![make_vm(101, "pa01", 1, 550., 10.), make_vm(102, "qb01", 2, 450., 10.)],
        &logger,
    ));
    let mut evaluator = LoadEvaluator::new(snapshot, logger, true);

    assert!(evaluator.is_balanced(&Resource::ALL, 3, None));
    // the strictest level flags the same spread
    assert!(!evaluator.is_balanced(&Resource::ALL, 5, None));
}

#[test]
// Fewer than two hosts means balanced for every resource.
fn test_single_host_is_balanced() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1", 1000., 1000., 900.)],
        vec![make_vm(101, "pa01", 1, 990., 900.)],
        &logger,
    ));
    let mut evaluator = LoadEvaluator::new(snapshot, logger, true);

    let report = evaluator.evaluate_imbalance(&Resource::ALL, 3, None);
    assert!(report.values().all(|details| !details.is_imbalanced));
    assert!(evaluator.is_balanced(&Resource::ALL, 3, None));
}

#[test]
// Supplied overrides replace the live percentage lists.
fn test_overrides_replace_live_percentages() {
    let (_, logger) = make_logger();
    let snapshot = make_skewed_snapshot(&logger);
    let mut evaluator = LoadEvaluator::new(snapshot, logger, true);

    let overrides = PercentageLists {
        cpu: vec![50., 50., 50.],
        memory: vec![1., 1., 1.],
        disk: vec![0., 0., 0.],
        network: vec![0., 0., 0.],
    };
    assert!(evaluator.is_balanced(&Resource::ALL, 3, Some(&overrides)));
    assert!(!evaluator.is_balanced(&Resource::ALL, 3, None));
}

#[test]
// Only the requested metrics subset is evaluated.
fn test_metrics_subset() {
    let (_, logger) = make_logger();
    let snapshot = make_skewed_snapshot(&logger);
    let mut evaluator = LoadEvaluator::new(snapshot, logger, true);

    let report = evaluator.evaluate_imbalance(&[Resource::Memory, Resource::Disk], 3, None);
    assert_eq!(report.len(), 2);
    assert!(!report.contains_key(&Resource::Cpu));
    // with CPU excluded the skewed cluster counts as balanced
    assert!(evaluator.is_balanced(&[Resource::Memory, Resource::Disk], 3, None));
}

#[test]
// The percentage map carries one entry per host in snapshot order.
fn test_percentage_map() {
    let (_, logger) = make_logger();
    let snapshot = make_skewed_snapshot(&logger);
    let mut evaluator = LoadEvaluator::new(snapshot, logger, true);

    let map = evaluator.percentage_map();
    let ids: Vec<u32> = map.keys().cloned().collect();
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(map[&1].cpu, 80.);
    assert_eq!(map[&2].cpu, 20.);
    assert_eq!(map[&3].cpu, 50.);
    assert_eq!(map[&1].memory, 1.);
}

#[test]
// The memoized quartet is stable across calls and across invalidation when
// the snapshot has not changed.
fn test_percentage_cache() {
    let (_, logger) = make_logger();
    let snapshot = make_skewed_snapshot(&logger);
    let mut evaluator = LoadEvaluator::new(snapshot, logger, true);

    let first = evaluator.percentage_lists();
    let second = evaluator.percentage_lists();
    assert_eq!(first, second);
    evaluator.invalidate_cache();
    assert_eq!(evaluator.percentage_lists(), first);
}
