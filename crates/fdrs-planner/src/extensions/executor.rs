//! Outbound migration execution interface.

use std::cell::RefCell;
use std::rc::Rc;

use thiserror::Error;

use crate::core::common::MigrationPlan;
use crate::core::logger::Logger;
use crate::core::snapshot::ClusterSnapshot;

const COMPONENT: &str = "MigrationExecutor";

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("migration of VM '{vm}' to host {host_id} failed: {message}")]
    MigrationFailed { vm: String, host_id: u32, message: String },
}

/// Consumes an ordered plan and submits the moves, in list order. The
/// planner has already reasoned about each move's effect on its successors,
/// so reordering is not allowed.
pub trait MigrationExecutor {
    fn execute(&mut self, plan: &MigrationPlan, snapshot: &ClusterSnapshot) -> Result<(), ExecError>;
}

/// Executor that only reports the submissions. Live-migration RPCs, retries
/// and timeouts belong to the hypervisor-facing integration.
pub struct LogExecutor {
    dry_run: bool,
    logger: Rc<RefCell<dyn Logger>>,
}

impl LogExecutor {
    pub fn new(dry_run: bool, logger: Rc<RefCell<dyn Logger>>) -> Self {
        Self { dry_run, logger }
    }
}

impl MigrationExecutor for LogExecutor {
    fn execute(&mut self, plan: &MigrationPlan, snapshot: &ClusterSnapshot) -> Result<(), ExecError> {
        if plan.is_empty() {
            self.logger
                .borrow_mut()
                .log_info(COMPONENT, "no migrations to execute".to_string());
            return Ok(());
        }
        self.logger
            .borrow_mut()
            .log_info(COMPONENT, format!("executing {} migration(s)", plan.len()));
        for planned in plan.moves() {
            let source = snapshot
                .host(planned.source_host)
                .map(|h| h.name.as_str())
                .unwrap_or("unknown");
            let target = snapshot
                .host(planned.target_host)
                .map(|h| h.name.as_str())
                .unwrap_or("unknown");
            let prefix = if self.dry_run { "[dry-run] " } else { "" };
            self.logger.borrow_mut().log_info(
                COMPONENT,
                format!(
                    "{}migrate VM '{}' from '{}' to '{}' ({})",
                    prefix, planned.vm_name, source, target, planned.reason
                ),
            );
        }
        Ok(())
    }
}
