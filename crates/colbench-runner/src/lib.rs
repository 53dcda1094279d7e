//! Round-trip correctness and throughput harness for an external columnar
//! converter.
//!
//! Each trial generates a CSV corpus, runs `to-columnar` then `to-csv`, and
//! requires the regenerated schema and data to match the originals byte for
//! byte.

pub mod corpus;
pub mod error;
pub mod process;
pub mod report;
pub mod trial;
pub mod verify;

use chrono::Utc;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::Path;

pub use error::{HarnessError, Result};
pub use process::{CommandExecutor, Converter, ProcessOutput, SystemExecutor};
pub use report::{ReportFormat, Reporter};
pub use trial::{run_harness, HarnessConfig, RunSummary, SizeRange, TrialRecord, TrialStage};

pub const MIB: u64 = 1024 * 1024;
pub const GIB: u64 = 1024 * MIB;

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| HarnessError::io_at("create directory", path, e))
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let write = || -> std::io::Result<()> {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp, path)
    };
    write().map_err(|e| HarnessError::io_at("write", path, e))
}

fn atomic_write_json_pretty(path: &Path, value: &Value) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|source| HarnessError::Serialize {
        what: "json document",
        source,
    })?;
    atomic_write_bytes(path, &bytes)
}
