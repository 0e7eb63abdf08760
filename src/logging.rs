// src/logging.rs
//
// `tlog!`: every service message goes to stderr with a local time prefix,
// and is copied into a log file while file logging is on.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Open log file, if any. Read by `tlog!`.
pub(crate) static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

/// Points at the newest log file in the log directory.
const LATEST_LOG: &str = "speedtrap.log";

fn stamp() -> chrono::format::DelayedFormat<chrono::format::StrftimeItems<'static>> {
    chrono::Local::now().format("%H:%M:%S%.3f")
}

/// New `<YYYYmmdd-HHMMSS>-speedtrap.log` in `log_dir`. Returns the file and its name.
fn create_session_log(log_dir: &Path) -> Result<(File, String), String> {
    std::fs::create_dir_all(log_dir)
        .map_err(|e| format!("Failed to create log dir {}: {}", log_dir.display(), e))?;

    let name = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-speedtrap.log")
        .to_string();
    let path = log_dir.join(&name);
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| format!("Failed to open log file {}: {}", path.display(), e))?;
    Ok((file, name))
}

#[cfg(unix)]
fn point_latest_at(log_dir: &Path, name: &str) {
    let link: PathBuf = log_dir.join(LATEST_LOG);
    let _ = std::fs::remove_file(&link);
    if let Err(e) = std::os::unix::fs::symlink(name, &link) {
        eprintln!("{} [logging] Could not update {}: {}", stamp(), LATEST_LOG, e);
    }
}

// Symlinks need elevated rights on Windows; the timestamped file is enough.
#[cfg(not(unix))]
fn point_latest_at(_log_dir: &Path, _name: &str) {}

/// Start copying `tlog!` output into a fresh file under `log_dir`.
/// Replaces any log file already open.
pub fn init_file_logging(log_dir: &Path) -> Result<(), String> {
    let (file, name) = create_session_log(log_dir)?;
    point_latest_at(log_dir, &name);

    if let Ok(mut current) = LOG_FILE.lock() {
        *current = Some(file);
    }
    // Announced on stderr only
    eprintln!(
        "{} [logging] Logging to {}",
        stamp(),
        log_dir.join(&name).display()
    );
    Ok(())
}

/// Close the log file. Later messages go to stderr only.
pub fn stop_file_logging() {
    let closed = LOG_FILE
        .lock()
        .map(|mut current| current.take().is_some())
        .unwrap_or(false);
    if closed {
        eprintln!("{} [logging] Log file closed", stamp());
    }
}

/// `eprintln!` with an `HH:MM:SS.mmm` prefix, also appended to the log file
/// when one is open. Messages start with a bracketed component tag.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let line = format!("{} {}", chrono::Local::now().format("%H:%M:%S%.3f"), format_args!($($arg)*));
        eprintln!("{}", line);
        if let Ok(mut current) = $crate::logging::LOG_FILE.lock() {
            if let Some(file) = current.as_mut() {
                let _ = writeln!(file, "{}", line);
            }
        }
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_logging_writes_and_stops() {
        let dir = tempfile::tempdir().unwrap();
        init_file_logging(dir.path()).unwrap();

        tlog!("[test] hello {}", 42);
        stop_file_logging();
        tlog!("[test] not in file");

        let logs: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n != LATEST_LOG)
                    .unwrap_or(false)
            })
            .collect();
        assert_eq!(logs.len(), 1);

        let content = std::fs::read_to_string(&logs[0]).unwrap();
        assert!(content.contains("[test] hello 42"));
        assert!(!content.contains("not in file"));
    }

    #[cfg(unix)]
    #[test]
    fn test_latest_link_points_at_session_log() {
        let dir = tempfile::tempdir().unwrap();
        let (_file, name) = create_session_log(dir.path()).unwrap();
        point_latest_at(dir.path(), &name);
        let target = std::fs::read_link(dir.path().join(LATEST_LOG)).unwrap();
        assert_eq!(target, PathBuf::from(name));
    }
}
