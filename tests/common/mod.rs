// Shared test helpers for integration tests
use std::fs;
use std::path::Path;
use tempfile::{TempDir, tempdir};

pub fn setup_test_environment() -> TempDir {
    tempdir().expect("Failed to create temporary directory")
}

/// Writes a `.litf.json` run configuration listing the given (tool, name)
/// pairs into `dir`.
pub fn write_config(dir: &Path, entries: &[(&str, &str)]) {
    let list: Vec<serde_json::Value> = entries
        .iter()
        .map(|(tool, name)| serde_json::json!({ "tool": tool, "name": name }))
        .collect();
    fs::write(
        dir.join(".litf.json"),
        serde_json::Value::Array(list).to_string(),
    )
    .expect("Failed to write run configuration");
}

/// Builds one LITF wire line with the fixed test timestamp and any extra
/// payload fields merged in.
pub fn litf(kind: &str, path: &[&str], extra: serde_json::Value) -> String {
    let mut obj = serde_json::json!({
        "v": 1,
        "kind": kind,
        "suite_path": path,
        "timestamp": "2026-01-05T12:00:00Z",
    });
    if let (Some(target), Some(source)) = (obj.as_object_mut(), extra.as_object()) {
        for (key, value) in source {
            target.insert(key.clone(), value.clone());
        }
    }
    obj.to_string()
}

/// Writes an event feed file and returns a tool command that replays it and
/// exits, which is all a well-behaved runner does.
pub fn write_feed(dir: &Path, file: &str, lines: &[String]) -> String {
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(dir.join(file), content).expect("Failed to write event feed");
    format!("cat {file}")
}

/// Writes a small shell script runner and returns the tool command that
/// launches it.
#[cfg(unix)]
pub fn write_script(dir: &Path, file: &str, body: &str) -> String {
    fs::write(dir.join(file), body).expect("Failed to write runner script");
    format!("sh {file}")
}
