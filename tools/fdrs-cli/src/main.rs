use std::cell::RefCell;
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;

use clap::Parser;
use sugars::{rc, refcell};

use fdrs_planner::core::common::Resource;
use fdrs_planner::core::config::{PlannerConfig, PlannerSettings};
use fdrs_planner::core::constraint_manager::ConstraintManager;
use fdrs_planner::core::iterative::IterativeController;
use fdrs_planner::core::load_evaluator::{usage_percentage, LoadEvaluator};
use fdrs_planner::core::logger::{Logger, StdoutLogger};
use fdrs_planner::core::migration_planner::MigrationPlanner;
use fdrs_planner::core::snapshot::ClusterSnapshot;
use fdrs_planner::extensions::executor::{LogExecutor, MigrationExecutor};
use fdrs_planner::extensions::inventory::InventoryProvider;
use fdrs_planner::extensions::snapshot_reader::SnapshotFileReader;

#[derive(Parser, Debug)]
#[command(about, long_about = None)]
/// Distributed resource scheduler: plans anti-affinity and load-balancing
/// migrations over a cluster inventory snapshot
struct Args {
    /// Path to YAML or JSON file with the cluster inventory snapshot
    #[arg(short, long)]
    snapshot: PathBuf,

    /// Path to YAML file with planner configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Cluster name to balance (all clusters when omitted)
    #[arg(long)]
    cluster: Option<String>,

    /// Aggressiveness level (1-5)
    #[arg(short, long, default_value_t = 3, value_parser = clap::value_parser!(u32).range(1..=5))]
    aggressiveness: u32,

    /// Comma-separated metrics to balance: cpu,memory,disk,network
    #[arg(long, default_value = "cpu,memory,disk,network")]
    metrics: String,

    /// Maximum total migrations in a single run
    #[arg(long)]
    max_migrations: Option<usize>,

    /// Ignore anti-affinity rules during resource balancing
    #[arg(long)]
    ignore_anti_affinity: bool,

    /// Apply anti-affinity rules only, skipping resource checks
    #[arg(long)]
    apply_anti_affinity: bool,

    /// Re-plan iteratively until the cluster converges
    #[arg(long)]
    iterative: bool,

    /// Maximum planning iterations with --iterative
    #[arg(long, default_value_t = 3)]
    max_iterations: u32,

    /// Plan only, do not submit migrations
    #[arg(long)]
    dry_run: bool,

    /// Path to produced JSON file with the migration plan
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn log_host_summary(snapshot: &ClusterSnapshot) {
    log::info!(
        "{:<20} {:<20} {:>7} {:>7} {:>12} {:>12} {:>5}",
        "Cluster",
        "Host",
        "CPU %",
        "Mem %",
        "Disk MBps",
        "Net MBps",
        "VMs"
    );
    for host in snapshot.hosts() {
        log::info!(
            "{:<20} {:<20} {:>7.1} {:>7.1} {:>12.1} {:>12.1} {:>5}",
            host.cluster,
            host.name,
            usage_percentage(host.usage.cpu, host.capacity.cpu),
            usage_percentage(host.usage.memory, host.capacity.memory),
            host.usage.disk,
            host.usage.network,
            snapshot.vms_on_host(host.id).len()
        );
    }
    log::info!("total hosts: {}, total VMs: {}", snapshot.hosts().len(), snapshot.vms().len());
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let mut ignore_anti_affinity = args.ignore_anti_affinity;
    if args.apply_anti_affinity && ignore_anti_affinity {
        log::warn!("--apply-anti-affinity and --ignore-anti-affinity conflict; enforcing anti-affinity rules");
        ignore_anti_affinity = false;
    }

    let config = match &args.config {
        Some(path) => PlannerConfig::from_file(path.to_str().ok_or("invalid config path")?),
        None => PlannerConfig::new(),
    };

    let metrics = args
        .metrics
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(|part| part.parse::<Resource>())
        .collect::<Result<Vec<_>, _>>()?;

    let logger: Rc<RefCell<dyn Logger>> = rc!(refcell!(StdoutLogger::new()));

    let cluster_filter = args.cluster.as_deref().filter(|name| *name != "all");
    let mut reader = SnapshotFileReader::new(args.snapshot.to_str().ok_or("invalid snapshot path")?, config.clone());
    let inventory = reader.fetch(cluster_filter)?;
    let snapshot = Rc::new(ClusterSnapshot::build(inventory.hosts, inventory.vms, &logger));
    if snapshot.hosts().is_empty() {
        return Err(match cluster_filter {
            Some(name) => format!("no connected hosts found in cluster '{}'", name).into(),
            None => "no connected hosts found in the inventory".into(),
        });
    }

    log_host_summary(&snapshot);

    let mut settings = PlannerSettings::from_config(&config);
    settings.aggressiveness = args.aggressiveness;
    settings.metrics = metrics;
    settings.ignore_anti_affinity = ignore_anti_affinity;
    settings.anti_affinity_only = args.apply_anti_affinity;
    if let Some(max_migrations) = args.max_migrations {
        settings.max_total_migrations = max_migrations;
    }

    let plan = if args.iterative {
        log::info!("planning with iterative mode ({} max iterations)", args.max_iterations);
        let controller = IterativeController::new(snapshot.clone(), settings.clone(), logger.clone());
        let outcome = controller.plan_iterative(args.max_iterations, args.apply_anti_affinity)?;
        if !outcome.converged {
            log::warn!(
                "no convergence after {} pass(es): {} violation(s) remain, balanced = {}",
                outcome.iterations,
                outcome.remaining_violations,
                outcome.balanced
            );
        }
        outcome.plan
    } else {
        let constraints = rc!(refcell!(ConstraintManager::new(
            snapshot.clone(),
            logger.clone(),
            settings.enable_prefix_cache,
        )));
        let evaluator = rc!(refcell!(LoadEvaluator::new(
            snapshot.clone(),
            logger.clone(),
            settings.enable_percentage_cache,
        )));
        let planner = MigrationPlanner::new(
            snapshot.clone(),
            constraints,
            evaluator,
            settings.clone(),
            logger.clone(),
        );
        planner.plan(args.apply_anti_affinity)?
    };

    if plan.is_empty() {
        log::info!("no actionable migrations found or needed at this time");
    } else {
        log::info!("found {} migration(s) to perform", plan.len());
        let mut executor = LogExecutor::new(args.dry_run, logger.clone());
        executor.execute(&plan, &snapshot)?;
    }

    if let Some(output) = &args.output {
        std::fs::write(output, serde_json::to_string_pretty(plan.moves())?)?;
        log::info!("plan written to {}", output.display());
    }
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();
    let args = Args::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
