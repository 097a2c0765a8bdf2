// src/logging.rs
//
// =============================================================================
// WORKCELL CORE: LOGGING
// =============================================================================
//
// Two layers, same split the rest of the crate uses: `log`/`env_logger` for
// normal process-level logging, plus an in-memory ring buffer for embedders
// (a dashboard, a test harness) that want the last N lines without scraping
// stdout.

use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Installs `env_logger` as the global logger, reading `RUST_LOG` as usual.
/// Call once from `main`.
pub fn init_env_logger() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(LevelFilter::Info)
        .try_init();
}

#[derive(Clone)]
pub struct RunLogBuffer {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl RunLogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, msg: String) {
        let mut lines = self.lines.lock().unwrap();
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(msg);
    }

    pub fn get_lines(&self) -> Vec<String> {
        self.lines.lock().unwrap().iter().cloned().collect()
    }
}

pub struct RingBufferLogger {
    buffer: RunLogBuffer,
}

impl RingBufferLogger {
    /// Installs the ring-buffer logger as the global `log` sink. Mutually
    /// exclusive with `init_env_logger` — use this one for embedding
    /// contexts that need `RunLogBuffer::get_lines()` instead of stdout.
    pub fn init(buffer: RunLogBuffer) -> Result<(), SetLoggerError> {
        let logger = Box::new(RingBufferLogger { buffer });
        log::set_logger(Box::leak(logger)).map(|()| log::set_max_level(LevelFilter::Info))
    }
}

impl log::Log for RingBufferLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Info
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let timestamp = Local::now().format("%H:%M:%S");
            let target_full = record.target();
            let target = target_full.split("::").last().unwrap_or(target_full);
            self.buffer
                .push(format!("[{} {}] {}", timestamp, target, record.args()));
        }
    }

    fn flush(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_drops_oldest_past_capacity() {
        let buf = RunLogBuffer::new(2);
        buf.push("a".into());
        buf.push("b".into());
        buf.push("c".into());
        assert_eq!(buf.get_lines(), vec!["b".to_string(), "c".to_string()]);
    }
}
