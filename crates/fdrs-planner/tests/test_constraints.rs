use std::cell::RefCell;
use std::rc::Rc;

use sugars::{rc, refcell};

use fdrs_planner::core::common::{MoveReason, PlannedMove, ResourceVector};
use fdrs_planner::core::constraint_manager::ConstraintManager;
use fdrs_planner::core::logger::{FileLogger, Logger};
use fdrs_planner::core::snapshot::{ClusterSnapshot, HostDescription, Vm};

fn make_logger() -> (Rc<RefCell<FileLogger>>, Rc<RefCell<dyn Logger>>) {
    let file_logger = rc!(refcell!(FileLogger::new()));
    let logger: Rc<RefCell<dyn Logger>> = file_logger.clone();
    (file_logger, logger)
}

fn make_host(id: u32, name: &str) -> HostDescription {
    HostDescription {
        id,
        name: name.to_string(),
        cluster: "main".to_string(),
        capacity: ResourceVector::new(1000., 1000., 4000., 1250.),
        memory_usage: 10.,
    }
}

fn make_vm(id: u32, name: &str, host_id: u32) -> Vm {
    Vm {
        id,
        name: name.to_string(),
        host_id,
        usage: ResourceVector::new(10., 10., 0., 0.),
        stats_available: true,
    }
}

fn planned(vm_id: u32, vm_name: &str, source_host: u32, target_host: u32) -> PlannedMove {
    PlannedMove {
        vm_id,
        vm_name: vm_name.to_string(),
        source_host,
        target_host,
        reason: MoveReason::AntiAffinity,
    }
}

#[test]
// VMs are partitioned by digit-stripped name prefix in snapshot order.
fn test_grouping_by_prefix() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1"), make_host(2, "h2")],
        vec![
            make_vm(101, "app01", 1),
            make_vm(102, "web01", 1),
            make_vm(103, "app02", 2),
            make_vm(104, "app03", 1),
        ],
        &logger,
    ));
    let mut constraints = ConstraintManager::new(snapshot, logger, true);

    let groups = constraints.enforce_anti_affinity();
    let keys: Vec<&String> = groups.keys().collect();
    assert_eq!(keys, vec!["app", "web"]);
    assert_eq!(groups["app"], vec![101, 103, 104]);
    assert_eq!(groups["web"], vec![102]);
}

#[test]
// Every VM on a host holding the group maximum is a violator when the
// spread exceeds 1.
fn test_violation_detection() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1"), make_host(2, "h2"), make_host(3, "h3")],
        vec![
            make_vm(101, "app01", 1),
            make_vm(102, "app02", 1),
            make_vm(103, "app03", 1),
            make_vm(104, "web01", 2),
        ],
        &logger,
    ));
    let mut constraints = ConstraintManager::new(snapshot, logger, true);

    let violations = constraints.calculate_violations();
    // all three stacked app VMs violate, the lone web VM does not
    assert_eq!(violations, vec![101, 102, 103]);
}

#[test]
// A spread of exactly 1 is not a violation.
fn test_spread_of_one_is_legal() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1"), make_host(2, "h2"), make_host(3, "h3")],
        vec![make_vm(101, "app01", 1), make_vm(102, "app02", 2)],
        &logger,
    ));
    let mut constraints = ConstraintManager::new(snapshot, logger, true);

    assert!(constraints.calculate_violations().is_empty());
}

#[test]
// With fewer than two active hosts no distribution rule applies.
fn test_single_host_no_violations() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1")],
        vec![make_vm(101, "app01", 1), make_vm(102, "app02", 1), make_vm(103, "app03", 1)],
        &logger,
    ));
    let mut constraints = ConstraintManager::new(snapshot, logger, true);

    assert!(constraints.calculate_violations().is_empty());
}

#[test]
// Stage 1 picks a host that restores a spread of at most 1, preferring the
// lowest group count and lexicographically smaller names on ties.
fn test_preferred_host_perfect_balance() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1"), make_host(2, "h2"), make_host(3, "h3")],
        vec![make_vm(101, "app01", 1), make_vm(102, "app02", 1)],
        &logger,
    ));
    let mut constraints = ConstraintManager::new(snapshot.clone(), logger, true);

    // both empty hosts restore balance; h2 wins the lexicographic tie
    let target = constraints.preferred_host(snapshot.vm(102).unwrap(), &[]);
    assert_eq!(target, Some(2));
}

#[test]
// Stage 2 falls back to any host with strictly fewer group members than the
// source when no single move can reach a spread of 1.
fn test_preferred_host_better_than_source() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1"), make_host(2, "h2"), make_host(3, "h3")],
        vec![
            make_vm(101, "app01", 1),
            make_vm(102, "app02", 1),
            make_vm(103, "app03", 1),
            make_vm(104, "app04", 1),
        ],
        &logger,
    ));
    let mut constraints = ConstraintManager::new(snapshot.clone(), logger, true);

    // counts (4,0,0): no single move reaches spread <= 1, but both empty
    // hosts are better than the source; h2 wins the tie
    let target = constraints.preferred_host(snapshot.vm(101).unwrap(), &[]);
    assert_eq!(target, Some(2));
}

#[test]
// Planned moves of the same group adjust the counts the selection reasons
// about.
fn test_preferred_host_honors_planned_moves() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1"), make_host(2, "h2"), make_host(3, "h3")],
        vec![make_vm(101, "app01", 1), make_vm(102, "app02", 1), make_vm(103, "app03", 1)],
        &logger,
    ));
    let mut constraints = ConstraintManager::new(snapshot.clone(), logger, true);

    // with app01 already planned onto h2, only h3 restores balance
    let plans = vec![planned(101, "app01", 1, 2)];
    let target = constraints.preferred_host(snapshot.vm(102).unwrap(), &plans);
    assert_eq!(target, Some(3));
}

#[test]
// No candidate at all: the group is already evenly spread elsewhere.
fn test_preferred_host_none() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1"), make_host(2, "h2")],
        vec![make_vm(101, "app01", 1), make_vm(102, "app02", 2)],
        &logger,
    ));
    let mut constraints = ConstraintManager::new(snapshot.clone(), logger, true);

    // moving app01 to h2 would just invert the imbalance
    let target = constraints.preferred_host(snapshot.vm(101).unwrap(), &[]);
    assert_eq!(target, None);
}

#[test]
// Counts pushed below zero by planned-move adjustment are clamped with a
// warning.
fn test_negative_count_clamped() {
    let (file_logger, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1"), make_host(2, "h2"), make_host(3, "h3")],
        vec![make_vm(101, "app01", 1), make_vm(102, "app02", 1)],
        &logger,
    ));
    let mut constraints = ConstraintManager::new(snapshot.clone(), logger, true);

    // a plan claiming app01 left h2, where the group has no members
    let plans = vec![planned(101, "app01", 2, 3)];
    constraints.preferred_host(snapshot.vm(102).unwrap(), &plans);
    assert!(file_logger
        .borrow()
        .entries()
        .iter()
        .any(|e| e.level == "WARN" && e.message.contains("negative group count")));
}

#[test]
// The safety check simulates the whole cycle's moves plus the probe move.
fn test_is_move_safe() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1"), make_host(2, "h2"), make_host(3, "h3")],
        vec![make_vm(101, "app01", 1), make_vm(102, "app02", 2), make_vm(103, "app03", 3)],
        &logger,
    ));
    let mut constraints = ConstraintManager::new(snapshot.clone(), logger, true);

    // stacking a second group member onto h2 breaks the distribution
    assert!(!constraints.is_move_safe(snapshot.vm(101).unwrap(), 2, &[]));
    // but it is fine if the current occupant is already planned away
    let plans = vec![planned(102, "app02", 2, 1)];
    assert!(constraints.is_move_safe(snapshot.vm(101).unwrap(), 2, &plans));
}

#[test]
// VMs outside any known group are always safe to move.
fn test_ungrouped_vm_is_safe() {
    let (_, logger) = make_logger();
    let snapshot = Rc::new(ClusterSnapshot::build(
        vec![make_host(1, "h1"), make_host(2, "h2")],
        vec![make_vm(101, "app01", 1)],
        &logger,
    ));
    let mut constraints = ConstraintManager::new(snapshot.clone(), logger, true);
    constraints.enforce_anti_affinity();

    let stranger = make_vm(999, "zz99", 1);
    assert!(constraints.is_move_safe(&stranger, 2, &[]));
}
