use log::{Level, LevelFilter, Log, Metadata, Record};
use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::io::Write;
use std::panic;
use std::path::{Path, PathBuf};

use crate::shared::constants;

/// `log` backend appending to a debug log, errors also to an error log.
/// The terminal belongs to the status line, so nothing is printed.
struct FileLogger {
    error_path: PathBuf,
    debug_path: PathBuf,
    level: LevelFilter,
}

fn append_line(path: &Path, line: &str) {
    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
        let _ = writeln!(file, "{}", line);
    }
}

fn start_file(path: &Path, banner: &str) {
    if let Ok(mut file) = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
    {
        let _ = writeln!(file, "=== {} Started: {} ===", banner, chrono::Local::now());
    }
}

impl Log for FileLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let timestamp = chrono::Local::now().format("%H:%M:%S%.3f");
        let thread = std::thread::current();
        let line = format!(
            "[{}][{}][{}] {}",
            timestamp,
            record.level(),
            thread.name().unwrap_or("-"),
            record.args()
        );
        append_line(&self.debug_path, &line);

        if record.level() == Level::Error {
            append_line(&self.error_path, &line);
        }
    }

    fn flush(&self) {}
}

/// Installs the file logger and a panic hook that records panics to both logs.
pub fn init(dir: &Path, level: LevelFilter) {
    let error_path = dir.join(constants::ERROR_LOG_FILE);
    let debug_path = dir.join(constants::DEBUG_LOG_FILE);
    start_file(&error_path, "Error Log");
    start_file(&debug_path, "Debug Log");

    let logger = FileLogger {
        error_path: error_path.clone(),
        debug_path: debug_path.clone(),
        level,
    };
    if log::set_boxed_logger(Box::new(logger)).is_ok() {
        log::set_max_level(level);
    }

    // Consumer panics are caught by the frame source, so the hook only records.
    panic::set_hook(Box::new(move |info| {
        let backtrace = Backtrace::capture();
        let msg = match info.payload().downcast_ref::<&str>() {
            Some(s) => *s,
            None => match info.payload().downcast_ref::<String>() {
                Some(s) => &s[..],
                None => "Box<Any>",
            },
        };

        let location = info
            .location()
            .map(|l| format!("{}:{}", l.file(), l.line()))
            .unwrap_or_else(|| "unknown".to_string());

        let thread = std::thread::current();
        let error_msg = format!(
            "\nPANIC in thread '{}' at {}:\nMessage: {}\nBacktrace:\n{:?}\n",
            thread.name().unwrap_or("-"),
            location,
            msg,
            backtrace
        );

        append_line(&error_path, &error_msg);
        append_line(&debug_path, &error_msg);
    }));
}
