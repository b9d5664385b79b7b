//! Timestamped, tagged logging.
//!
//! Every line goes through `logi!`, `logw!` or `loge!` and is shaped:
//!   <timestamp> [TAG][thread] message
//!
//! Info goes to stdout, warnings and errors to stderr. When a file sink is configured
//! every line is also appended there.

use std::any::Any;
use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use time::format_description::FormatItem;
use time::macros::format_description;

static LOG_FILE: OnceLock<Mutex<Option<std::fs::File>>> = OnceLock::new();
static RUN_ID: OnceLock<String> = OnceLock::new();
static PANICS_SEEN: OnceLock<Mutex<PanicLog>> = OnceLock::new();

/// Distinct panic reports kept before new ones are dropped silently.
const PANIC_LOG_CAP: usize = 256;

const TS_FORMAT: &[FormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond digits:3]");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
    Error,
}

/// Call once at startup. Returns the run id stamped on the first log line.
pub fn init(log_file: Option<PathBuf>) -> String {
    let rid = RUN_ID
        .get_or_init(|| {
            let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
            format!("{:08x}", (now.as_nanos() as u64) ^ (std::process::id() as u64))
        })
        .clone();

    let sink = LOG_FILE.get_or_init(|| Mutex::new(None));

    if let Some(path) = log_file {
        match OpenOptions::new().create(true).append(true).open(&path) {
            Ok(f) => {
                if let Ok(mut guard) = sink.lock() {
                    *guard = Some(f);
                }
            }
            Err(e) => {
                // the macros would recurse into the sink we failed to open
                eprintln!(
                    "{} [INIT][{}] failed to open log file {}: {e}",
                    log_timestamp(),
                    log_thread_name(),
                    path.display()
                );
            }
        }
    }

    rid
}

/// Local time when the offset is known, UTC otherwise.
pub fn log_timestamp() -> String {
    let now = time::OffsetDateTime::now_local().unwrap_or_else(|_| time::OffsetDateTime::now_utc());
    now.format(TS_FORMAT)
        .unwrap_or_else(|_| "<time-format-error>".to_string())
}

pub fn log_thread_name() -> String {
    std::thread::current().name().unwrap_or("main").to_string()
}

pub fn log_line(level: Level, tag: &str, msg: &str) {
    let line = format!("{} [{}][{}] {}", log_timestamp(), tag, log_thread_name(), msg);

    match level {
        Level::Info => println!("{line}"),
        Level::Warn | Level::Error => eprintln!("{line}"),
    }

    if let Some(m) = LOG_FILE.get() {
        if let Ok(mut guard) = m.lock() {
            if let Some(f) = guard.as_mut() {
                let _ = writeln!(f, "{line}");
                let _ = f.flush();
            }
        }
    }
}

/// Remembers which panic reports were already logged.
#[derive(Debug, Default)]
pub struct PanicLog {
    seen: HashSet<String>,
}

impl PanicLog {
    /// True the first time `report` is seen, while there is room to remember it.
    pub fn first_sighting(&mut self, report: &str) -> bool {
        if self.seen.contains(report) || self.seen.len() >= PANIC_LOG_CAP {
            return false;
        }
        self.seen.insert(report.to_string())
    }
}

pub fn panic_payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "<non-string panic payload>".to_string()
    }
}

/// Replace the default panic hook with one that logs through `loge!`.
///
/// Dynamic arguments that panic are caught and reported per frame, so the same panic
/// repeats at frame rate. Each distinct report is logged once.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let msg = panic_payload_message(info.payload());
        let report = match info.location() {
            Some(loc) => format!("{msg} ({}:{})", loc.file(), loc.line()),
            None => msg,
        };
        let log = PANICS_SEEN.get_or_init(|| Mutex::new(PanicLog::default()));
        let first = log.lock().map(|mut l| l.first_sighting(&report)).unwrap_or(false);
        if first {
            log_line(Level::Error, "PANIC", &format!("{report}; repeats are not logged"));
        }
    }));
}

/// Info log: stdout
#[macro_export]
macro_rules! logi {
    ($tag:expr, $($arg:tt)*) => {{
        $crate::logging::log_line($crate::logging::Level::Info, $tag, &format!($($arg)*));
    }};
}

/// Warning log: stderr
#[macro_export]
macro_rules! logw {
    ($tag:expr, $($arg:tt)*) => {{
        $crate::logging::log_line($crate::logging::Level::Warn, $tag, &format!($($arg)*));
    }};
}

/// Error log: stderr
#[macro_export]
macro_rules! loge {
    ($tag:expr, $($arg:tt)*) => {{
        $crate::logging::log_line($crate::logging::Level::Error, $tag, &format!($($arg)*));
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_panic_reports_are_logged_once() {
        let mut log = PanicLog::default();
        assert!(log.first_sighting("frame-source-boom (src/scene.rs:10)"));
        assert!(!log.first_sighting("frame-source-boom (src/scene.rs:10)"));
        assert!(log.first_sighting("other (src/scene.rs:12)"));
    }

    #[test]
    fn panic_log_stops_growing_at_cap() {
        let mut log = PanicLog::default();
        for i in 0..PANIC_LOG_CAP {
            assert!(log.first_sighting(&format!("p{i}")));
        }
        assert!(!log.first_sighting("one more"));
    }

    #[test]
    fn payload_message_handles_str_and_string() {
        let a: Box<dyn Any + Send> = Box::new("static");
        let b: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let c: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_payload_message(a.as_ref()), "static");
        assert_eq!(panic_payload_message(b.as_ref()), "owned");
        assert_eq!(panic_payload_message(c.as_ref()), "<non-string panic payload>");
    }
}
