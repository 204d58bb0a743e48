//! Inbound inventory interface: raw hypervisor records and the unit
//! conversions that turn them into a planning domain.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::common::ResourceVector;
use crate::core::config::PlannerConfig;
use crate::core::snapshot::{HostDescription, Vm};

pub const CONNECTED_STATE: &str = "connected";
pub const POWERED_ON_STATE: &str = "poweredOn";

/// Host record as reported by a hypervisor inventory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostRecord {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub cluster: String,
    /// Only hosts in `connected` state take part in planning.
    #[serde(default = "default_connection_state")]
    pub connection_state: String,
    pub cpu_cores: u32,
    pub core_mhz: f64,
    pub memory_bytes: u64,
    /// Per-NIC link speeds in Mb/s. Network capacity falls back to the
    /// configured default when absent or zero.
    #[serde(default)]
    pub nic_speeds_mb: Vec<u64>,
    /// Host-reported absolute memory usage in MB.
    #[serde(default)]
    pub memory_usage_mb: f64,
}

fn default_connection_state() -> String {
    CONNECTED_STATE.to_string()
}

fn default_power_state() -> String {
    POWERED_ON_STATE.to_string()
}

/// VM record as reported by a hypervisor inventory. Usage counters come
/// from live stats and 20-second rollups; `None` means retrieval failed.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: u32,
    pub name: String,
    pub host_id: u32,
    #[serde(default = "default_power_state")]
    pub power_state: String,
    #[serde(default)]
    pub template: bool,
    #[serde(default)]
    pub cpu_usage_mhz: Option<f64>,
    #[serde(default)]
    pub memory_usage_mb: Option<f64>,
    /// Disk I/O rollup counter in KBps.
    #[serde(default)]
    pub disk_io_kbps: Option<f64>,
    /// Network I/O rollup counter in KBps.
    #[serde(default)]
    pub network_io_kbps: Option<f64>,
}

/// One planning domain after filtering and unit conversion.
pub struct Inventory {
    pub hosts: Vec<HostDescription>,
    pub vms: Vec<Vm>,
}

#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("can't read snapshot file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("can't parse snapshot file {path}: {message}")]
    Parse { path: String, message: String },
}

/// Supplies the hosts and VMs of a chosen cluster. Implementations talk to
/// a hypervisor API or, for offline planning, read a snapshot file.
pub trait InventoryProvider {
    fn fetch(&mut self, cluster: Option<&str>) -> Result<Inventory, InventoryError>;
}

/// Applies the inventory filters and unit conversions:
/// CPU capacity = cores x core MHz, memory bytes -> MB, disk capacity from
/// config, network capacity = sum of NIC link speeds (Mb/s) / 8 or the
/// configured default, I/O counters KBps -> MBps. Templates, powered-off VMs
/// and disconnected hosts are dropped; with a cluster filter, hosts of other
/// clusters and their VMs are dropped too.
pub fn convert_records(
    host_records: Vec<HostRecord>,
    vm_records: Vec<VmRecord>,
    config: &PlannerConfig,
    cluster: Option<&str>,
) -> Inventory {
    let mut hosts = Vec::new();
    for record in host_records {
        if record.connection_state != CONNECTED_STATE {
            continue;
        }
        if let Some(filter) = cluster {
            if record.cluster != filter {
                continue;
            }
        }
        let link_speed_total: u64 = record.nic_speeds_mb.iter().sum();
        let network_capacity = if link_speed_total > 0 {
            link_speed_total as f64 / 8.
        } else {
            config.network_bandwidth_mbps
        };
        hosts.push(HostDescription {
            id: record.id,
            name: record.name,
            cluster: record.cluster,
            capacity: ResourceVector::new(
                record.cpu_cores as f64 * record.core_mhz,
                record.memory_bytes as f64 / (1024. * 1024.),
                config.disk_io_capacity_mbps,
                network_capacity,
            ),
            memory_usage: record.memory_usage_mb,
        });
    }

    let kept_hosts: HashSet<u32> = hosts.iter().map(|h| h.id).collect();
    let mut vms = Vec::new();
    for record in vm_records {
        if record.template || record.power_state != POWERED_ON_STATE {
            continue;
        }
        // With a cluster filter, VMs on out-of-cluster hosts are simply out
        // of the planning domain. Without one, dangling host references are
        // kept so snapshot construction can report them.
        if cluster.is_some() && !kept_hosts.contains(&record.host_id) {
            continue;
        }
        let stats_available = record.cpu_usage_mhz.is_some() && record.memory_usage_mb.is_some();
        vms.push(Vm {
            id: record.id,
            name: record.name,
            host_id: record.host_id,
            usage: ResourceVector::new(
                record.cpu_usage_mhz.unwrap_or(0.),
                record.memory_usage_mb.unwrap_or(0.),
                record.disk_io_kbps.unwrap_or(0.) / 1024.,
                record.network_io_kbps.unwrap_or(0.) / 1024.,
            ),
            stats_available,
        });
    }

    Inventory { hosts, vms }
}
