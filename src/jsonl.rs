// JSONL file operations

use eyre::{Context, Result};
use fs2::FileExt;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, info, warn};

/// Append lines to a JSONL file under an exclusive lock
///
/// Returns the file length before the append, so a failed commit can
/// truncate the file back with [`truncate_to`].
pub fn append_lines(path: &Path, lines: &[String]) -> Result<u64> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open JSONL file for appending: {}", path.display()))?;

    // Acquire exclusive lock before writing
    file.lock_exclusive().context("Failed to acquire file lock")?;

    let offset = file.metadata()?.len();

    let mut buf = String::new();
    for line in lines {
        buf.push_str(line);
        buf.push('\n');
    }

    if let Err(e) = file.write_all(buf.as_bytes()).and_then(|_| file.sync_all()) {
        // Never leave a half-written line behind
        let _ = file.set_len(offset);
        return Err(e).context("Failed to write JSONL file");
    }

    // Lock is automatically released when file is dropped
    Ok(offset)
}

/// Cut a JSONL file back to `len` bytes, undoing an append
pub fn truncate_to(path: &Path, len: u64) -> Result<()> {
    let file = OpenOptions::new()
        .write(true)
        .open(path)
        .with_context(|| format!("Failed to open JSONL file for rollback: {}", path.display()))?;
    file.lock_exclusive().context("Failed to acquire file lock")?;
    file.set_len(len)?;
    file.sync_all()?;
    debug!(file = ?path, len, "Truncated JSONL file");
    Ok(())
}

/// Build a deletion marker for the log
pub fn tombstone(id: &str, updated_at: i64) -> Value {
    serde_json::json!({
        "id": id,
        "deleted": true,
        "updated_at": updated_at,
    })
}

pub fn is_tombstone(value: &Value) -> bool {
    value.get("deleted").and_then(|v| v.as_bool()).unwrap_or(false)
}

/// Read all records from a JSONL file, returning latest version per ID
///
/// Every line needs an "id" string and an "updated_at" integer. For
/// duplicate IDs the highest updated_at wins; on a tie the later line
/// wins, since lines are appended in commit order. Tombstones are kept so
/// callers can tell deleted records apart from unknown ones.
pub fn read_jsonl_latest(path: &Path) -> Result<HashMap<String, Value>> {
    if !path.exists() {
        // File doesn't exist yet, return empty map
        return Ok(HashMap::new());
    }

    let file = File::open(path).context("Failed to open JSONL file")?;
    let reader = BufReader::new(file);
    let mut records: HashMap<String, Value> = HashMap::new();

    for (line_num, line) in reader.lines().enumerate() {
        // An I/O error repeats on every following line, so it ends the read
        let line = line.with_context(|| format!("Failed to read line {} of {}", line_num + 1, path.display()))?;

        if line.trim().is_empty() {
            continue;
        }

        let record: Value = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!(
                    file = ?path,
                    line = line_num + 1,
                    error = ?e,
                    "Failed to parse JSON, skipping"
                );
                continue;
            }
        };

        let Some(id) = record.get("id").and_then(|v| v.as_str()).map(str::to_string) else {
            warn!(file = ?path, line = line_num + 1, "Record without id, skipping");
            continue;
        };
        let updated_at = updated_at_of(&record);

        match records.get(&id) {
            Some(existing) if updated_at < updated_at_of(existing) => {}
            _ => {
                records.insert(id, record);
            }
        }
    }

    info!(
        file = ?path,
        count = records.len(),
        "Loaded latest records from JSONL"
    );

    Ok(records)
}

fn updated_at_of(value: &Value) -> i64 {
    value.get("updated_at").and_then(|v| v.as_i64()).unwrap_or(0)
}
