/// Logging sink injected into the planner components, so that embedders can
/// redirect planner output and tests can assert on emitted warnings.
use std::fs::File;

use log::Level;
use serde::Serialize;

pub trait Logger {
    fn log_error(&mut self, component: &str, message: String);

    fn log_warn(&mut self, component: &str, message: String);

    fn log_info(&mut self, component: &str, message: String);

    fn log_debug(&mut self, component: &str, message: String);

    fn log_trace(&mut self, component: &str, message: String);

    fn save_log(&self, _path: &str) -> Result<(), std::io::Error>;
}

/// Forwards every record to the `log` crate facade with the component name
/// as the target.
#[derive(Default)]
pub struct StdoutLogger {}

impl StdoutLogger {
    pub fn new() -> Self {
        Self {}
    }
}

impl Logger for StdoutLogger {
    fn log_error(&mut self, component: &str, message: String) {
        log::error!(target: component, "{}", message);
    }

    fn log_warn(&mut self, component: &str, message: String) {
        log::warn!(target: component, "{}", message);
    }

    fn log_info(&mut self, component: &str, message: String) {
        log::info!(target: component, "{}", message);
    }

    fn log_debug(&mut self, component: &str, message: String) {
        log::debug!(target: component, "{}", message);
    }

    fn log_trace(&mut self, component: &str, message: String) {
        log::trace!(target: component, "{}", message);
    }

    fn save_log(&self, _path: &str) -> Result<(), std::io::Error> {
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    pub level: String,
    pub component: String,
    pub message: String,
}

/// Buffers records in memory, filtered by a maximum level; `save_log` writes
/// them out as CSV.
pub struct FileLogger {
    log: Vec<LogEntry>,
    level: Level,
}

impl Default for FileLogger {
    fn default() -> Self {
        Self {
            log: Vec::new(),
            level: Level::Info,
        }
    }
}

impl FileLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(level: Level) -> Self {
        Self { log: Vec::new(), level }
    }

    /// Buffered records, in emission order.
    pub fn entries(&self) -> &[LogEntry] {
        &self.log
    }

    fn log_internal(&mut self, component: &str, message: String, level: Level) {
        if self.level < level {
            return;
        }
        self.log.push(LogEntry {
            level: level.to_string(),
            component: component.to_string(),
            message,
        });
    }
}

impl Logger for FileLogger {
    fn log_error(&mut self, component: &str, message: String) {
        self.log_internal(component, message, Level::Error)
    }

    fn log_warn(&mut self, component: &str, message: String) {
        self.log_internal(component, message, Level::Warn)
    }

    fn log_info(&mut self, component: &str, message: String) {
        self.log_internal(component, message, Level::Info)
    }

    fn log_debug(&mut self, component: &str, message: String) {
        self.log_internal(component, message, Level::Debug)
    }

    fn log_trace(&mut self, component: &str, message: String) {
        self.log_internal(component, message, Level::Trace)
    }

    fn save_log(&self, path: &str) -> Result<(), std::io::Error> {
        let file = File::create(path)?;
        let mut wtr = csv::Writer::from_writer(file);
        for entry in &self.log {
            wtr.serialize(entry)?;
        }
        wtr.flush()?;
        Ok(())
    }
}
