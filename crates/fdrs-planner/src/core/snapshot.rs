//! Cluster snapshot: hosts, virtual machines and derived load aggregates.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use serde::Serialize;

use crate::core::common::{MigrationPlan, PlanError, Resource, ResourceVector};
use crate::core::logger::Logger;

const COMPONENT: &str = "ClusterSnapshot";

/// Host description as supplied by the inventory layer, before derived
/// aggregates are computed.
#[derive(Clone, Debug)]
pub struct HostDescription {
    pub id: u32,
    pub name: String,
    pub cluster: String,
    pub capacity: ResourceVector,
    /// Host-reported absolute memory usage in MB. Guest-reported VM memory
    /// is not additive, so the host's own figure is authoritative.
    pub memory_usage: f64,
}

/// Physical host captured by an inventory snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct Host {
    pub id: u32,
    pub name: String,
    pub cluster: String,
    pub capacity: ResourceVector,
    /// Derived at snapshot construction: cpu/disk/network summed over the
    /// resident VMs, memory taken from the host's own report.
    pub usage: ResourceVector,
}

/// Powered-on virtual machine captured by an inventory snapshot.
#[derive(Clone, Debug, Serialize)]
pub struct Vm {
    pub id: u32,
    pub name: String,
    pub host_id: u32,
    pub usage: ResourceVector,
    /// False when live stats retrieval failed for this VM. Usage is zeroed
    /// in that case and fit checks refuse to reason about the VM.
    pub stats_available: bool,
}

impl Vm {
    /// Anti-affinity grouping key: the VM name with trailing decimal digits
    /// stripped, or the full name when nothing would remain.
    pub fn anti_affinity_key(&self) -> &str {
        let prefix = self.name.trim_end_matches(|c: char| c.is_ascii_digit());
        if prefix.is_empty() {
            &self.name
        } else {
            prefix
        }
    }
}

/// Immutable view of the planning domain. Hosts and VMs keep the inventory
/// (insertion) order, which every planning decision iterates in.
#[derive(Clone, Debug)]
pub struct ClusterSnapshot {
    hosts: Vec<Host>,
    vms: Vec<Vm>,
    host_index: IndexMap<u32, usize>,
    vm_index: IndexMap<u32, usize>,
}

impl ClusterSnapshot {
    /// Builds the snapshot, computing the derived per-host aggregates.
    ///
    /// Hosts with non-positive capacity components get those components
    /// floored to 1 with a warning; VMs referencing an unknown host are
    /// skipped with a warning.
    pub fn build(
        host_descriptions: Vec<HostDescription>,
        vms: Vec<Vm>,
        logger: &Rc<RefCell<dyn Logger>>,
    ) -> Self {
        let mut hosts = Vec::with_capacity(host_descriptions.len());
        let mut host_index = IndexMap::new();
        for description in host_descriptions {
            let mut capacity = description.capacity;
            for resource in Resource::ALL {
                if capacity.get(resource) <= 0. {
                    logger.borrow_mut().log_warn(
                        COMPONENT,
                        format!(
                            "host '{}' reports non-positive {} capacity, flooring to 1",
                            description.name, resource
                        ),
                    );
                    capacity.set(resource, 1.);
                }
            }
            host_index.insert(description.id, hosts.len());
            hosts.push(Host {
                id: description.id,
                name: description.name,
                cluster: description.cluster,
                capacity,
                usage: ResourceVector::new(0., description.memory_usage, 0., 0.),
            });
        }

        let mut kept_vms = Vec::with_capacity(vms.len());
        let mut vm_index = IndexMap::new();
        for vm in vms {
            match host_index.get(&vm.host_id) {
                Some(&idx) => {
                    let host = &mut hosts[idx];
                    host.usage.cpu += vm.usage.cpu;
                    host.usage.disk += vm.usage.disk;
                    host.usage.network += vm.usage.network;
                    vm_index.insert(vm.id, kept_vms.len());
                    kept_vms.push(vm);
                }
                None => {
                    logger.borrow_mut().log_warn(
                        COMPONENT,
                        format!(
                            "VM '{}' does not have a valid host reference (host id {}), skipping",
                            vm.name, vm.host_id
                        ),
                    );
                }
            }
        }

        Self {
            hosts,
            vms: kept_vms,
            host_index,
            vm_index,
        }
    }

    /// All hosts in snapshot order.
    pub fn hosts(&self) -> &[Host] {
        &self.hosts
    }

    /// All VMs in snapshot order.
    pub fn vms(&self) -> &[Vm] {
        &self.vms
    }

    pub fn host(&self, id: u32) -> Option<&Host> {
        self.host_index.get(&id).map(|&idx| &self.hosts[idx])
    }

    pub fn host_by_name(&self, name: &str) -> Option<&Host> {
        self.hosts.iter().find(|h| h.name == name)
    }

    pub fn vm(&self, id: u32) -> Option<&Vm> {
        self.vm_index.get(&id).map(|&idx| &self.vms[idx])
    }

    pub fn host_of_vm(&self, vm: &Vm) -> Option<&Host> {
        self.host(vm.host_id)
    }

    /// VMs resident on the given host, in snapshot order.
    pub fn vms_on_host(&self, host_id: u32) -> Vec<&Vm> {
        self.vms.iter().filter(|vm| vm.host_id == host_id).collect()
    }

    /// Applies a plan, producing the advanced snapshot. The receiver is not
    /// mutated. A move whose VM or target host is absent from the snapshot
    /// is an internal invariant violation.
    pub fn apply(&self, plan: &MigrationPlan) -> Result<ClusterSnapshot, PlanError> {
        let mut hosts = self.hosts.clone();
        let mut vms = self.vms.clone();
        for planned in plan.moves() {
            let vm_pos = *self
                .vm_index
                .get(&planned.vm_id)
                .ok_or(PlanError::VmMissing { vm_id: planned.vm_id })?;
            let target_pos = *self
                .host_index
                .get(&planned.target_host)
                .ok_or_else(|| PlanError::TargetHostMissing {
                    vm: vms[vm_pos].name.clone(),
                    host_id: planned.target_host,
                })?;
            let usage = vms[vm_pos].usage;
            if let Some(&source_pos) = self.host_index.get(&vms[vm_pos].host_id) {
                hosts[source_pos].usage = hosts[source_pos].usage.sub(&usage);
            }
            hosts[target_pos].usage = hosts[target_pos].usage.add(&usage);
            vms[vm_pos].host_id = planned.target_host;
        }
        Ok(Self {
            hosts,
            vms,
            host_index: self.host_index.clone(),
            vm_index: self.vm_index.clone(),
        })
    }
}
