//! Test logger: forwards to `env_logger` and keeps every record so tests
//! can check what a component logged.

use std::sync::{Mutex, OnceLock};

use log::{LevelFilter, Log, Metadata, Record};

pub(crate) struct CaptureLogger {
    inner: env_logger::Logger,
    records: Mutex<Vec<(String, log::Level, String)>>,
}

impl Log for CaptureLogger {
    fn enabled(&self, _metadata: &Metadata<'_>) -> bool {
        true
    }

    fn log(&self, record: &Record<'_>) {
        self.records.lock().unwrap().push((
            record.target().to_string(),
            record.level(),
            record.args().to_string(),
        ));
        if self.inner.enabled(record.metadata()) {
            self.inner.log(record);
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

static LOGGER: OnceLock<CaptureLogger> = OnceLock::new();

/// Install the logger once for the whole test binary.
pub(crate) fn init() -> &'static CaptureLogger {
    let logger = LOGGER.get_or_init(|| CaptureLogger {
        inner: env_logger::Builder::from_default_env().is_test(true).build(),
        records: Mutex::new(Vec::new()),
    });
    if log::set_logger(logger).is_ok() {
        log::set_max_level(LevelFilter::Trace);
    }
    logger
}

impl CaptureLogger {
    /// Messages logged under `target`, with their level, in order.
    pub(crate) fn messages(&self, target: &str) -> Vec<(log::Level, String)> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _, _)| t == target)
            .map(|(_, level, message)| (*level, message.clone()))
            .collect()
    }
}
