//! Per-trial and run summary output.

use std::io::Write;
use std::time::Duration;

use serde_json::{json, Value};

use crate::error::{HarnessError, Result};
use crate::trial::{RunSummary, TrialRecord};
use crate::MIB;

/// Throughput in MiB/s. Zero elapsed time yields `f64::INFINITY`.
pub fn throughput_mib_s(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        mib(bytes) / secs
    } else {
        f64::INFINITY
    }
}

pub fn mib(bytes: u64) -> f64 {
    bytes as f64 / MIB as f64
}

pub fn format_trial_line(record: &TrialRecord, total_trials: u32) -> String {
    format!(
        "[{}/{}] CSV={:.1} MiB  COL={:.1} MiB  csv2col={:.3}s ({:.2} MiB/s)  col2csv={:.3}s ({:.2} MiB/s)",
        record.index,
        total_trials,
        mib(record.data_bytes),
        mib(record.columnar_bytes),
        record.forward.as_secs_f64(),
        record.forward_throughput(),
        record.reverse.as_secs_f64(),
        record.reverse_throughput(),
    )
}

pub fn format_summary_line(summary: &RunSummary) -> String {
    format!(
        "TOTAL: csv2col={:.3}s  col2csv={:.3}s  (n={})",
        summary.forward_total.as_secs_f64(),
        summary.reverse_total.as_secs_f64(),
        summary.trials_completed,
    )
}

pub fn trial_to_json(record: &TrialRecord, total_trials: u32) -> Value {
    json!({
        "trial": record.index,
        "of": total_trials,
        "dir": record.paths.dir.display().to_string(),
        "size_seed": record.size_seed,
        "corpus_seed": record.corpus_seed,
        "target_bytes": record.target_bytes,
        "data_bytes": record.data_bytes,
        "columnar_bytes": record.columnar_bytes,
        "csv2col_s": record.forward.as_secs_f64(),
        "col2csv_s": record.reverse.as_secs_f64(),
        "csv2col_mib_s": finite_or_null(record.forward_throughput()),
        "col2csv_mib_s": finite_or_null(record.reverse_throughput()),
    })
}

pub fn summary_to_json(summary: &RunSummary) -> Value {
    json!({
        "trials": summary.trials_completed,
        "csv2col_total_s": summary.forward_total.as_secs_f64(),
        "col2csv_total_s": summary.reverse_total.as_secs_f64(),
    })
}

// JSON has no infinity.
fn finite_or_null(v: f64) -> Value {
    if v.is_finite() {
        json!(v)
    } else {
        Value::Null
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Text,
    JsonLines,
}

/// Writes report lines to `out` (stdout in the binary).
pub struct Reporter<W: Write> {
    out: W,
    format: ReportFormat,
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W, format: ReportFormat) -> Self {
        Self { out, format }
    }

    pub fn trial(&mut self, record: &TrialRecord, total_trials: u32) -> Result<()> {
        match self.format {
            ReportFormat::Text => {
                let line = format_trial_line(record, total_trials);
                self.write_line(&line)
            }
            ReportFormat::JsonLines => {
                let value = json!({ "ok": true, "trial": trial_to_json(record, total_trials) });
                self.write_json(&value)
            }
        }
    }

    pub fn summary(&mut self, summary: &RunSummary) -> Result<()> {
        match self.format {
            ReportFormat::Text => {
                let line = format!("\n{}", format_summary_line(summary));
                self.write_line(&line)
            }
            ReportFormat::JsonLines => {
                let value = json!({ "ok": true, "summary": summary_to_json(summary) });
                self.write_json(&value)
            }
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_json(&mut self, value: &Value) -> Result<()> {
        let line = serde_json::to_string(value).map_err(|source| HarnessError::Serialize {
            what: "report line",
            source,
        })?;
        self.write_line(&line)
    }

    fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line)
            .and_then(|_| self.out.flush())
            .map_err(|e| HarnessError::io("failed to write report", e))
    }
}
