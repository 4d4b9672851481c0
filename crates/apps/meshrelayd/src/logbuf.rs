//! Logger that tees to stderr (env_logger formatting) and an in-memory
//! ring buffer served by `GET /api/logs`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;

const MAX_LOG_LINES: usize = 100;

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub message: String,
    pub timestamp: String,
    pub level: String,
}

pub type LogBuffer = Arc<Mutex<VecDeque<LogEntry>>>;

struct TeeLogger {
    inner: env_logger::Logger,
    buffer: LogBuffer,
}

impl log::Log for TeeLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.matches(record) {
            let entry = LogEntry {
                message: format!("{} - {}", record.target(), record.args()),
                timestamp: chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string(),
                level: record.level().to_string(),
            };
            let mut buffer = self.buffer.lock().expect("log buffer");
            if buffer.len() >= MAX_LOG_LINES {
                buffer.pop_front();
            }
            buffer.push_back(entry);
        }
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Install the tee logger. `level` is the config/CLI level name
/// (DEBUG/INFO/WARNING/ERROR); `RUST_LOG` still wins when set.
pub fn init(level: &str) -> LogBuffer {
    let filter = match level.to_ascii_uppercase().as_str() {
        "DEBUG" => "debug",
        "WARNING" => "warn",
        "ERROR" => "error",
        _ => "info",
    };
    let env = env_logger::Env::default().default_filter_or(filter);
    let inner = env_logger::Builder::from_env(env).build();
    let max_level = inner.filter();
    let buffer: LogBuffer = Arc::new(Mutex::new(VecDeque::with_capacity(MAX_LOG_LINES)));
    let logger = TeeLogger {
        inner,
        buffer: buffer.clone(),
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(max_level);
    }
    buffer
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_is_bounded() {
        let buffer: LogBuffer = Arc::new(Mutex::new(VecDeque::new()));
        {
            let mut guard = buffer.lock().expect("buffer");
            for i in 0..150 {
                if guard.len() >= MAX_LOG_LINES {
                    guard.pop_front();
                }
                guard.push_back(LogEntry {
                    message: format!("line {i}"),
                    timestamp: String::new(),
                    level: "INFO".to_string(),
                });
            }
        }
        let guard = buffer.lock().expect("buffer");
        assert_eq!(guard.len(), MAX_LOG_LINES);
        assert_eq!(guard.front().expect("front").message, "line 50");
    }
}
