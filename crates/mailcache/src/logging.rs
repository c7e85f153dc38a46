//! Logging backend that routes records to a host-supplied sink
//!
//! The library only uses the `log` facade. Hosts that want the records
//! (a UI log pane, a file, the system journal) install this backend and
//! hand it a [`LogSink`]. Without a sink, records are written to stderr.

use std::sync::{Arc, OnceLock, RwLock};

use log::{Level, Log, Metadata, Record, SetLoggerError};

/// Receiver for formatted log records
pub trait LogSink: Send + Sync {
    fn on_log(&self, level: Level, target: &str, message: &str);
}

static LOGGER: OnceLock<SinkLogger> = OnceLock::new();

struct SinkLogger {
    sink: RwLock<Option<Arc<dyn LogSink>>>,
    max_level: RwLock<Level>,
}

impl SinkLogger {
    fn new(max_level: Level) -> Self {
        Self {
            sink: RwLock::new(None),
            max_level: RwLock::new(max_level),
        }
    }

    fn set_sink(&self, sink: Option<Arc<dyn LogSink>>) {
        if let Ok(mut guard) = self.sink.write() {
            *guard = sink;
        }
    }

    fn set_max_level(&self, level: Level) {
        if let Ok(mut guard) = self.max_level.write() {
            *guard = level;
        }
    }

    fn max_level(&self) -> Level {
        self.max_level.read().map(|l| *l).unwrap_or(Level::Info)
    }
}

impl Log for SinkLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let message = record.args().to_string();
        match self.sink.read() {
            Ok(guard) => match guard.as_ref() {
                Some(sink) => sink.on_log(record.level(), record.target(), &message),
                None => eprintln!("{:<5} {}: {}", record.level(), record.target(), message),
            },
            Err(_) => eprintln!("{:<5} {}: {}", record.level(), record.target(), message),
        }
    }

    fn flush(&self) {}
}

/// Install the sink logger as the global `log` backend.
///
/// Only the first call installs the backend; later calls update the sink
/// and level. Returns an error if some other logger was installed first.
pub fn init_logging(
    max_level: Level,
    sink: Option<Arc<dyn LogSink>>,
) -> Result<(), SetLoggerError> {
    let mut fresh = false;
    let logger = LOGGER.get_or_init(|| {
        fresh = true;
        SinkLogger::new(max_level)
    });
    logger.set_sink(sink);
    set_log_level(max_level);

    if fresh {
        log::set_logger(logger)?;
    }
    log::set_max_level(max_level.to_level_filter());
    Ok(())
}

/// Replace the current sink. `None` routes records back to stderr.
pub fn set_log_sink(sink: Option<Arc<dyn LogSink>>) {
    if let Some(logger) = LOGGER.get() {
        logger.set_sink(sink);
    }
}

/// Update the maximum level passed to the sink.
pub fn set_log_level(level: Level) {
    if let Some(logger) = LOGGER.get() {
        logger.set_max_level(level);
        log::set_max_level(level.to_level_filter());
    }
}
