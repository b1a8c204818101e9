use sloggers::file::FileLoggerBuilder;
use sloggers::terminal::{Destination, TerminalLoggerBuilder};
use sloggers::types::Severity;
use sloggers::Build;
use std::path::Path;

pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Logger};

/// Builds the process logger. Output goes to stderr so interactive runs and
/// redirected daemons behave the same.
pub fn init() -> Logger {
    let mut builder = TerminalLoggerBuilder::new();
    builder.level(Severity::Debug);
    builder.destination(Destination::Stderr);
    builder.build().expect("failed to build terminal logger")
}

/// File-backed logger for daemonized processes.
pub fn file<P: AsRef<Path>>(path: P) -> Logger {
    let mut builder = FileLoggerBuilder::new(path);
    builder.level(Severity::Debug);
    builder.build().expect("failed to build file logger")
}

/// Logger that swallows everything. Used where a component is constructed
/// without a parent logger.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
