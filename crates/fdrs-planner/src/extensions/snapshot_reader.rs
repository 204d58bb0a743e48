//! Inventory provider backed by snapshot files.

use serde::{Deserialize, Serialize};

use crate::core::config::PlannerConfig;
use crate::extensions::inventory::{convert_records, HostRecord, Inventory, InventoryError, InventoryProvider, VmRecord};

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotDocument {
    #[serde(default)]
    hosts: Vec<HostRecord>,
    #[serde(default)]
    vms: Vec<VmRecord>,
}

/// Reads a cluster inventory from a YAML or JSON document with `hosts` and
/// `vms` lists of raw records.
pub struct SnapshotFileReader {
    path: String,
    config: PlannerConfig,
}

impl SnapshotFileReader {
    pub fn new(path: &str, config: PlannerConfig) -> Self {
        Self {
            path: path.to_string(),
            config,
        }
    }
}

impl InventoryProvider for SnapshotFileReader {
    fn fetch(&mut self, cluster: Option<&str>) -> Result<Inventory, InventoryError> {
        let data = std::fs::read_to_string(&self.path).map_err(|e| InventoryError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        let document: SnapshotDocument = if self.path.ends_with(".json") {
            serde_json::from_str(&data).map_err(|e| InventoryError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })?
        } else {
            serde_yaml::from_str(&data).map_err(|e| InventoryError::Parse {
                path: self.path.clone(),
                message: e.to_string(),
            })?
        };
        Ok(convert_records(document.hosts, document.vms, &self.config, cluster))
    }
}
