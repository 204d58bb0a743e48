//! Planner configuration.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::common::Resource;

/// Auxiliary structure to parse PlannerConfig from file.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
pub struct PlannerConfigRaw {
    pub storage: Option<StorageConfigRaw>,
    pub network: Option<NetworkConfigRaw>,
    pub migration: Option<MigrationConfigRaw>,
    pub optimization: Option<OptimizationConfigRaw>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
pub struct StorageConfigRaw {
    /// assumed per-host disk I/O capacity
    pub disk_io_capacity_mbps: Option<f64>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
pub struct NetworkConfigRaw {
    /// per-host network bandwidth used when NIC link speeds are unavailable
    pub bandwidth_mbps: Option<f64>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
pub struct MigrationConfigRaw {
    /// cap on the total number of moves in a single plan
    pub default_max_migrations: Option<usize>,
    /// hard-fit ceiling for target host CPU during balancing
    pub host_cpu_high_watermark_percent: Option<f64>,
    /// hard-fit ceiling for target host memory during balancing
    pub host_memory_high_watermark_percent: Option<f64>,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
pub struct OptimizationConfigRaw {
    /// memoize per-host usage percentage lists between evaluations
    pub enable_percentage_cache: Option<bool>,
    /// memoize anti-affinity key extraction per VM
    pub enable_prefix_cache: Option<bool>,
}

/// Represents planner configuration.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct PlannerConfig {
    /// assumed per-host disk I/O capacity
    pub disk_io_capacity_mbps: f64,
    /// per-host network bandwidth used when NIC link speeds are unavailable
    pub network_bandwidth_mbps: f64,
    /// cap on the total number of moves in a single plan
    pub default_max_migrations: usize,
    /// hard-fit ceiling for target host CPU during balancing
    pub host_cpu_high_watermark_percent: f64,
    /// hard-fit ceiling for target host memory during balancing
    pub host_memory_high_watermark_percent: f64,
    /// memoize per-host usage percentage lists between evaluations
    pub enable_percentage_cache: bool,
    /// memoize anti-affinity key extraction per VM
    pub enable_prefix_cache: bool,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PlannerConfig {
    /// Creates planner config with default parameter values.
    pub fn new() -> Self {
        Self {
            disk_io_capacity_mbps: 4000.,
            network_bandwidth_mbps: 1250.,
            default_max_migrations: 20,
            host_cpu_high_watermark_percent: 90.,
            host_memory_high_watermark_percent: 90.,
            enable_percentage_cache: true,
            enable_prefix_cache: true,
        }
    }

    /// Creates planner config by reading parameter values from .yaml file
    /// (uses default values if some parameters are absent).
    /// A missing or unparsable file falls back to the defaults with a warning.
    pub fn from_file(file_name: &str) -> Self {
        let raw = match std::fs::read_to_string(file_name) {
            Ok(data) => match serde_yaml::from_str::<PlannerConfigRaw>(&data) {
                Ok(raw) => raw,
                Err(e) => {
                    warn!("can't parse YAML from file {}: {}, using default config", file_name, e);
                    PlannerConfigRaw::default()
                }
            },
            Err(_) => {
                warn!("config file {} not found, using default config", file_name);
                PlannerConfigRaw::default()
            }
        };
        Self::from_raw(raw)
    }

    fn from_raw(raw: PlannerConfigRaw) -> Self {
        let default = PlannerConfig::new();
        let storage = raw.storage.unwrap_or_default();
        let network = raw.network.unwrap_or_default();
        let migration = raw.migration.unwrap_or_default();
        let optimization = raw.optimization.unwrap_or_default();
        Self {
            disk_io_capacity_mbps: storage.disk_io_capacity_mbps.unwrap_or(default.disk_io_capacity_mbps),
            network_bandwidth_mbps: network.bandwidth_mbps.unwrap_or(default.network_bandwidth_mbps),
            default_max_migrations: migration
                .default_max_migrations
                .unwrap_or(default.default_max_migrations),
            host_cpu_high_watermark_percent: migration
                .host_cpu_high_watermark_percent
                .unwrap_or(default.host_cpu_high_watermark_percent),
            host_memory_high_watermark_percent: migration
                .host_memory_high_watermark_percent
                .unwrap_or(default.host_memory_high_watermark_percent),
            enable_percentage_cache: optimization
                .enable_percentage_cache
                .unwrap_or(default.enable_percentage_cache),
            enable_prefix_cache: optimization.enable_prefix_cache.unwrap_or(default.enable_prefix_cache),
        }
    }
}

/// Per-invocation planning knobs, derived from [`PlannerConfig`] and adjusted
/// by the caller.
#[derive(Debug, Clone)]
pub struct PlannerSettings {
    /// aggressiveness level 1-5, selects the allowed per-resource spread
    pub aggressiveness: u32,
    /// cap on the total number of moves in a single plan
    pub max_total_migrations: usize,
    /// skip the anti-affinity safety check during balancing
    pub ignore_anti_affinity: bool,
    /// skip resource admission for anti-affinity moves entirely
    pub anti_affinity_only: bool,
    /// resources considered by the balancing pass
    pub metrics: Vec<Resource>,
    /// hard-fit ceiling for target host CPU during balancing
    pub cpu_high_watermark: f64,
    /// hard-fit ceiling for target host memory during balancing
    pub memory_high_watermark: f64,
    pub enable_percentage_cache: bool,
    pub enable_prefix_cache: bool,
    /// per-iteration threshold relaxation factor in iterative mode
    pub threshold_multiplier: f64,
}

impl PlannerSettings {
    pub fn from_config(config: &PlannerConfig) -> Self {
        Self {
            aggressiveness: 3,
            max_total_migrations: config.default_max_migrations,
            ignore_anti_affinity: false,
            anti_affinity_only: false,
            metrics: Resource::ALL.to_vec(),
            cpu_high_watermark: config.host_cpu_high_watermark_percent,
            memory_high_watermark: config.host_memory_high_watermark_percent,
            enable_percentage_cache: config.enable_percentage_cache,
            enable_prefix_cache: config.enable_prefix_cache,
            threshold_multiplier: 1.05,
        }
    }
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self::from_config(&PlannerConfig::new())
    }
}
