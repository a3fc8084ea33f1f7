use crate::{config::EvalConfig, utillib::logging::LogLevel};

/// Everything the processing stages need besides their direct
/// inputs: passed down explicitly, there are no globals.
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    pub log_level: LogLevel,
    pub config: EvalConfig,
}

impl EvalContext {
    pub fn new(log_level: LogLevel, config: EvalConfig) -> Self {
        Self { log_level, config }
    }

    /// For the logging macros.
    #[inline]
    pub fn log_level(&self) -> LogLevel {
        self.log_level
    }
}
