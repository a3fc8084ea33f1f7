//! Leveled logging to stderr. The level is not global: it is carried
//! in the value passed as first argument to the `warn!`, `info!` and
//! `debug!` macros (anything with a `log_level()` method returning
//! `LogLevel`, usually an `EvalContext`).

use std::io::{stderr, StderrLock, Write};

use anyhow::{bail, Result};
use chrono::{Local, SecondsFormat};

pub fn write_time(file: &str, line: u32, column: u32) -> StderrLock<'static> {
    let t_str = Local::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut lock = stderr().lock();
    write!(&mut lock, "{t_str}\t{file}:{line}:{column}\t").expect("stderr must not fail");
    lock
}

#[macro_export]
macro_rules! log_at {
    { $level:ident, $ctx:expr, $($arg:tt)* } => {
        if $ctx.log_level() >= $crate::utillib::logging::LogLevel::$level {
            use std::io::Write;
            let mut lock = $crate::utillib::logging::write_time(file!(), line!(), column!());
            writeln!(&mut lock, $($arg)*).expect("stderr must not fail");
        }
    }
}

#[macro_export]
macro_rules! warn {
    { $ctx:expr, $($arg:tt)* } => {
        $crate::log_at!(Warn, $ctx, $($arg)*)
    }
}

#[macro_export]
macro_rules! info {
    { $ctx:expr, $($arg:tt)* } => {
        $crate::log_at!(Info, $ctx, $($arg)*)
    }
}

#[macro_export]
macro_rules! debug {
    { $ctx:expr, $($arg:tt)* } => {
        $crate::log_at!(Debug, $ctx, $($arg)*)
    }
}

// Private fields: the only way out is `LogLevel::try_from`.
#[derive(Debug, clap::Args)]
pub struct LogLevelOpt {
    /// Show what is being processed and written
    #[clap(short, long)]
    verbose: bool,

    /// Show information that helps debug the processing (implies
    /// `--verbose`)
    #[clap(short, long)]
    debug: bool,

    /// Disable warnings (including reports about excluded runs).
    /// Conflicts with `--verbose` and `--debug`.
    #[clap(short, long)]
    quiet: bool,
}

impl TryFrom<LogLevelOpt> for LogLevel {
    type Error = anyhow::Error;

    fn try_from(value: LogLevelOpt) -> Result<Self> {
        let LogLevelOpt {
            verbose,
            debug,
            quiet,
        } = value;
        match (verbose, debug, quiet) {
            (false, false, false) => Ok(LogLevel::Warn),
            (true, false, false) => Ok(LogLevel::Info),
            (_, true, false) => Ok(LogLevel::Debug),
            (false, false, true) => Ok(LogLevel::Quiet),
            (_, _, true) => {
                bail!("option `--quiet` conflicts with the options `--verbose` and `--debug`")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    /// Do not log anything
    Quiet,
    /// The default, only "warn!" statements are output
    Warn,
    /// Tell the user which directories and files are being processed
    Info,
    /// Highest amount of log statements, for debugging the processing
    Debug,
}

impl LogLevel {
    /// So that a bare `LogLevel` can be passed to the logging macros.
    #[inline]
    pub fn log_level(&self) -> LogLevel {
        *self
    }
}

impl Default for LogLevel {
    fn default() -> Self {
        LogLevel::Warn
    }
}
