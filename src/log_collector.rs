//! Decoupled logging pipeline for installation runs.
//!
//! Every `log` record is handed to a background thread over an unbounded
//! crossbeam channel. The thread appends timestamped lines to the session
//! log file and echoes records at or above the console level to stderr, so
//! the full trace is on disk even when the console is quiet.
//!
//! # Architecture
//!
//! ```text
//! log::info!() / log_parsed!()
//!     |
//! [LogCollector] (non-blocking send)
//!     | (crossbeam channel)
//! [writer thread]
//!     |-- logs/full/<ts>_full.log      every record
//!     |-- logs/parsed/<ts>_parsed.log  target = "parsed" only
//!     `-- stderr                       records >= console level
//! ```

use chrono::Local;
use crossbeam_channel::{unbounded, Sender};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Internal log line or special marker
enum LogMessage {
    /// Regular log line
    Line(LogLine),
    /// Flush marker with channel sender to signal completion
    Flush(std::sync::mpsc::Sender<()>),
}

/// Default log directory: `<data dir>/stagehand/logs`, or `./logs` when the
/// platform has no data directory.
pub fn default_logs_path() -> PathBuf {
    match dirs::data_dir() {
        Some(dir) => dir.join("stagehand").join("logs"),
        None => PathBuf::from("logs"),
    }
}

/// A log line with metadata
#[derive(Clone, Debug)]
pub struct LogLine {
    pub level: Level,
    pub message: String,
    /// High-level milestone (`target: "parsed"`)
    pub parsed: bool,
    pub timestamp: String,
}

impl LogLine {
    pub fn new(level: Level, message: String) -> Self {
        LogLine {
            level,
            message,
            parsed: false,
            timestamp: Local::now().format("%H:%M:%S%.3f").to_string(),
        }
    }

    pub fn parsed(level: Level, message: String) -> Self {
        LogLine {
            parsed: true,
            ..Self::new(level, message)
        }
    }

    fn format(&self) -> String {
        format!("[{}] [{}] {}\n", self.timestamp, self.level, self.message)
    }
}

/// Unified logger writing to the session files and stderr
#[derive(Clone)]
pub struct LogCollector {
    /// crossbeam unbounded: send never blocks the caller
    tx: Sender<LogMessage>,
    session_log: PathBuf,
    file_level: LevelFilter,
}

impl LogCollector {
    /// Create the log directories, open this session's files and start the
    /// writer thread.
    pub fn new(log_dir: &Path, console_level: LevelFilter) -> Result<Self, String> {
        let full_log_dir = log_dir.join("full");
        let parsed_log_dir = log_dir.join("parsed");
        std::fs::create_dir_all(&full_log_dir)
            .map_err(|e| format!("Failed to create full log dir: {}", e))?;
        std::fs::create_dir_all(&parsed_log_dir)
            .map_err(|e| format!("Failed to create parsed log dir: {}", e))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let session_log = full_log_dir.join(format!("{}_full.log", stamp));
        let parsed_log = parsed_log_dir.join(format!("{}_parsed.log", stamp));

        let mut full_file = open_append(&session_log)?;
        let mut parsed_file = open_append(&parsed_log)?;

        let (tx, rx) = unbounded::<LogMessage>();

        // Plain OS thread: independent of the tokio runtime, drains until every sender is gone
        std::thread::spawn(move || {
            while let Ok(msg) = rx.recv() {
                match msg {
                    LogMessage::Line(line) => {
                        let formatted = line.format();
                        let _ = full_file.write_all(formatted.as_bytes());
                        if line.parsed {
                            let _ = parsed_file.write_all(formatted.as_bytes());
                        }
                        if line.level <= console_level {
                            eprint!("{}", formatted);
                        }
                    }
                    LogMessage::Flush(done) => {
                        let _ = full_file.flush();
                        let _ = parsed_file.flush();
                        let _ = full_file.sync_data();
                        let _ = done.send(());
                    }
                }
            }
        });

        Ok(LogCollector {
            tx,
            session_log,
            file_level: LevelFilter::Debug.max(console_level),
        })
    }

    /// Install as the global `log` backend.
    pub fn install(self) -> Result<Self, String> {
        let level = self.file_level;
        log::set_boxed_logger(Box::new(self.clone()))
            .map_err(|e| format!("Failed to install logger: {}", e))?;
        log::set_max_level(level);
        Ok(self)
    }

    /// Path of the full log for this process.
    pub fn session_log_path(&self) -> &Path {
        &self.session_log
    }

    /// Send a log line (non-blocking)
    pub fn log_line(&self, line: LogLine) {
        let _ = self.tx.send(LogMessage::Line(line));
    }

    /// Block until everything sent so far is written out.
    pub fn wait_for_empty(&self) -> Result<(), String> {
        let (tx, rx) = std::sync::mpsc::channel::<()>();
        self.tx
            .send(LogMessage::Flush(tx))
            .map_err(|e| format!("Failed to send flush marker: {}", e))?;
        rx.recv()
            .map_err(|e| format!("Flush signal interrupted: {}", e))
    }
}

fn open_append(path: &Path) -> Result<File, String> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))
}

/// Wires all log::info!(), log::warn!(), log::error!() calls into LogCollector
impl Log for LogCollector {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.file_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = record.args().to_string();
        // Target-aware routing: "parsed" marks high-level milestones
        if record.target() == "parsed" {
            self.log_line(LogLine::parsed(record.level(), message));
        } else {
            self.log_line(LogLine::new(record.level(), message));
        }
    }

    fn flush(&self) {
        let _ = self.wait_for_empty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_log_collector_creates_directories() {
        let temp_dir = TempDir::new().unwrap();
        let collector = LogCollector::new(temp_dir.path(), LevelFilter::Off).unwrap();

        assert!(temp_dir.path().join("full").is_dir());
        assert!(temp_dir.path().join("parsed").is_dir());
        assert!(collector.session_log_path().exists());
    }

    #[test]
    fn test_lines_reach_disk_after_flush() {
        let temp_dir = TempDir::new().unwrap();
        let collector = LogCollector::new(temp_dir.path(), LevelFilter::Off).unwrap();

        for i in 0..500 {
            collector.log_line(LogLine::new(Level::Info, format!("Log message {}", i)));
        }
        collector.log_line(LogLine::parsed(Level::Info, "PHASE 1 COMPLETE".into()));
        collector.wait_for_empty().unwrap();

        let full = fs::read_to_string(collector.session_log_path()).unwrap();
        assert!(full.contains("Log message 0"));
        assert!(full.contains("Log message 499"));
        assert!(full.contains("[INFO] PHASE 1 COMPLETE"));

        let parsed_dir = temp_dir.path().join("parsed");
        let parsed_file = fs::read_dir(&parsed_dir).unwrap().next().unwrap().unwrap().path();
        let parsed = fs::read_to_string(parsed_file).unwrap();
        assert!(parsed.contains("PHASE 1 COMPLETE"));
        assert!(!parsed.contains("Log message 0"));
    }

    #[test]
    fn test_debug_enabled_for_file_even_when_console_quiet() {
        let temp_dir = TempDir::new().unwrap();
        let collector = LogCollector::new(temp_dir.path(), LevelFilter::Warn).unwrap();
        let meta = Metadata::builder().level(Level::Debug).build();
        assert!(collector.enabled(&meta));
        let meta = Metadata::builder().level(Level::Trace).build();
        assert!(!collector.enabled(&meta));
    }
}
