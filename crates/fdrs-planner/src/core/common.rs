//! Common data structures shared by the planner components.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// One of the four resource dimensions the scheduler balances.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Cpu,
    Memory,
    Disk,
    Network,
}

impl Resource {
    pub const ALL: [Resource; 4] = [Resource::Cpu, Resource::Memory, Resource::Disk, Resource::Network];
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            Resource::Cpu => write!(f, "cpu"),
            Resource::Memory => write!(f, "memory"),
            Resource::Disk => write!(f, "disk"),
            Resource::Network => write!(f, "network"),
        }
    }
}

impl FromStr for Resource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cpu" => Ok(Resource::Cpu),
            "memory" | "mem" => Ok(Resource::Memory),
            "disk" => Ok(Resource::Disk),
            "network" | "net" => Ok(Resource::Network),
            other => Err(format!("unknown resource: {}", other)),
        }
    }
}

/// Absolute usage or capacity along the four resource dimensions:
/// CPU in MHz, memory in MB, disk and network I/O in MBps.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceVector {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
    pub network: f64,
}

impl ResourceVector {
    pub fn new(cpu: f64, memory: f64, disk: f64, network: f64) -> Self {
        Self {
            cpu,
            memory,
            disk,
            network,
        }
    }

    pub fn get(&self, resource: Resource) -> f64 {
        match resource {
            Resource::Cpu => self.cpu,
            Resource::Memory => self.memory,
            Resource::Disk => self.disk,
            Resource::Network => self.network,
        }
    }

    pub fn set(&mut self, resource: Resource, value: f64) {
        match resource {
            Resource::Cpu => self.cpu = value,
            Resource::Memory => self.memory = value,
            Resource::Disk => self.disk = value,
            Resource::Network => self.network = value,
        }
    }

    /// Component-wise sum.
    pub fn add(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector::new(
            self.cpu + other.cpu,
            self.memory + other.memory,
            self.disk + other.disk,
            self.network + other.network,
        )
    }

    /// Component-wise difference, floored at zero.
    pub fn sub(&self, other: &ResourceVector) -> ResourceVector {
        ResourceVector::new(
            (self.cpu - other.cpu).max(0.),
            (self.memory - other.memory).max(0.),
            (self.disk - other.disk).max(0.),
            (self.network - other.network).max(0.),
        )
    }
}

/// Result of checking whether a VM move fits on a candidate host.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FitVerdict {
    Fits,
    ExceedsCpu,
    ExceedsMemory,
    /// Live stats were unavailable for the VM, so no projection can be made.
    /// Distinct from a VM with genuinely zero usage.
    MissingStats,
}

/// Why a move was planned.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveReason {
    AntiAffinity,
    Balancing,
}

impl Display for MoveReason {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        match self {
            MoveReason::AntiAffinity => write!(f, "anti-affinity"),
            MoveReason::Balancing => write!(f, "balancing"),
        }
    }
}

/// One entry of a migration plan.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PlannedMove {
    pub vm_id: u32,
    pub vm_name: String,
    pub source_host: u32,
    pub target_host: u32,
    pub reason: MoveReason,
}

/// Ordered list of planned moves.
///
/// Order is significant: the executor must submit moves in list order, since
/// the planner has already reasoned about each move's effect on the
/// feasibility of its successors.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MigrationPlan {
    moves: Vec<PlannedMove>,
}

impl MigrationPlan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_moves(moves: Vec<PlannedMove>) -> Self {
        Self { moves }
    }

    pub fn push(&mut self, planned: PlannedMove) {
        self.moves.push(planned);
    }

    pub fn len(&self) -> usize {
        self.moves.len()
    }

    pub fn is_empty(&self) -> bool {
        self.moves.is_empty()
    }

    pub fn moves(&self) -> &[PlannedMove] {
        &self.moves
    }

    pub fn contains_vm(&self, vm_id: u32) -> bool {
        self.moves.iter().any(|m| m.vm_id == vm_id)
    }
}

/// Internal invariant violations. Domain-level "no feasible move" situations
/// are not errors and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("planned target host {host_id} for VM '{vm}' is not part of the snapshot")]
    TargetHostMissing { vm: String, host_id: u32 },
    #[error("VM {vm_id} referenced by the plan is not part of the snapshot")]
    VmMissing { vm_id: u32 },
}
