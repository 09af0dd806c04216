//! Forwarding of the crate's diagnostics to a single callback, for targets without a terminal.

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

type SinkCallback = Box<dyn Fn(&str) + Send + Sync>;

/// A logger which formats each record as a line of text and passes it to a callback.
pub struct DebugSink {
    callback: SinkCallback,
    level: LevelFilter,
}

impl DebugSink {
    pub fn new(callback: impl Fn(&str) + Send + Sync + 'static, level: LevelFilter) -> Self {
        DebugSink {
            callback: Box::new(callback),
            level,
        }
    }
}

impl Log for DebugSink {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            (self.callback)(&format!(
                "{} {}: {}",
                record.level(),
                record.target(),
                record.args()
            ));
        }
    }

    fn flush(&self) {}
}

/// Install a `DebugSink` as the process-wide logger. This can only succeed once per process, and
/// fails if any other logger has already been installed.
pub fn install_debug_sink(
    callback: impl Fn(&str) + Send + Sync + 'static,
    level: LevelFilter,
) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(DebugSink::new(callback, level)))?;
    log::set_max_level(level);
    Ok(())
}
