use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn audit_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/orchestrator.log")
}

/// Append one audit line. Lines are `ts=<epoch> run_id=<id> <message>` for
/// run-scoped decisions and `ts=<epoch> <message>` otherwise.
pub fn append_audit_line(state_root: &Path, line: &str) -> std::io::Result<()> {
    let path = audit_log_path(state_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{line}")
}

pub fn audit_line(now: i64, run_id: Option<&str>, message: &str) -> String {
    match run_id {
        Some(run_id) => format!("ts={now} run_id={run_id} {message}"),
        None => format!("ts={now} {message}"),
    }
}
