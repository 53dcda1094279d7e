//! Trial orchestration: prepare, convert forward, convert back, verify.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::json;
use tracing::{info, info_span};

use crate::corpus::{schema_columns, write_data_seeded, write_schema};
use crate::error::{HarnessError, Result};
use crate::process::{CommandExecutor, Converter};
use crate::report::{throughput_mib_s, Reporter};
use crate::verify::{assert_same_file, file_len};
use crate::{atomic_write_json_pretty, ensure_dir, GIB, MIB};

pub const DEFAULT_MIN_BYTES: u64 = 64 * MIB;
pub const DEFAULT_MAX_BYTES: u64 = GIB;
pub const DEFAULT_COLUMNS: usize = 10;
pub const DEFAULT_INT_COLUMNS: usize = 5;
pub const DEFAULT_SEED: u64 = 12345;

const CORPUS_SEED_STRIDE: u64 = 1_000_003;
const SIZE_SEED_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

/// Inclusive range of target corpus sizes in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeRange {
    pub min_bytes: u64,
    pub max_bytes: u64,
}

impl SizeRange {
    pub fn new(min_bytes: u64, max_bytes: u64) -> Self {
        Self {
            min_bytes,
            max_bytes,
        }
    }

    pub fn sample<R: Rng>(&self, rng: &mut R) -> u64 {
        rng.gen_range(self.min_bytes..=self.max_bytes)
    }
}

impl Default for SizeRange {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_BYTES, DEFAULT_MAX_BYTES)
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub converter: PathBuf,
    pub trials: u32,
    /// Parent of the per-trial `bench_NNN` directories.
    pub workdir: PathBuf,
    pub size_range: SizeRange,
    pub columns: usize,
    pub int_columns: usize,
    pub seed: u64,
}

impl HarnessConfig {
    pub fn new(converter: impl Into<PathBuf>, trials: u32) -> Self {
        Self {
            converter: converter.into(),
            trials,
            workdir: PathBuf::from("."),
            size_range: SizeRange::default(),
            columns: DEFAULT_COLUMNS,
            int_columns: DEFAULT_INT_COLUMNS,
            seed: DEFAULT_SEED,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.trials == 0 {
            problems.push("trial count must be > 0".to_string());
        }
        if self.columns == 0 {
            problems.push("column count must be > 0".to_string());
        }
        if self.int_columns > self.columns {
            problems.push(format!(
                "integer column count {} exceeds column count {}",
                self.int_columns, self.columns
            ));
        }
        if self.size_range.max_bytes == 0 {
            problems.push("maximum target size must be > 0".to_string());
        }
        if self.size_range.min_bytes > self.size_range.max_bytes {
            problems.push(format!(
                "minimum target size {} exceeds maximum {}",
                self.size_range.min_bytes, self.size_range.max_bytes
            ));
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(HarnessError::Usage(problems.join("; ")))
        }
    }
}

/// Seed for the target-size draw of trial `index` (1-based).
pub fn size_seed(outer_seed: u64, index: u32) -> u64 {
    outer_seed ^ u64::from(index).wrapping_mul(SIZE_SEED_MIX)
}

/// Seed for the corpus contents of trial `index` (1-based).
pub fn corpus_seed(outer_seed: u64, index: u32) -> u64 {
    u64::from(index).wrapping_mul(CORPUS_SEED_STRIDE) ^ outer_seed
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStage {
    Prepare,
    ConvertForward,
    ConvertReverse,
    Verify,
    Done,
}

impl TrialStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrialStage::Prepare => "prepare",
            TrialStage::ConvertForward => "convert_forward",
            TrialStage::ConvertReverse => "convert_reverse",
            TrialStage::Verify => "verify",
            TrialStage::Done => "done",
        }
    }
}

impl fmt::Display for TrialStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct TrialPaths {
    pub dir: PathBuf,
    pub schema: PathBuf,
    pub data: PathBuf,
    pub columnar: PathBuf,
    pub schema_back: PathBuf,
    pub data_back: PathBuf,
}

impl TrialPaths {
    pub fn new(workdir: &Path, index: u32) -> Self {
        let dir = workdir.join(format!("bench_{:03}", index));
        Self {
            schema: dir.join("schema.csv"),
            data: dir.join("data.csv"),
            columnar: dir.join("data.columnar"),
            schema_back: dir.join("schema_back.csv"),
            data_back: dir.join("data_back.csv"),
            dir,
        }
    }
}

/// Outcome of one successful trial.
#[derive(Debug, Clone)]
pub struct TrialRecord {
    pub index: u32,
    pub paths: TrialPaths,
    pub size_seed: u64,
    pub corpus_seed: u64,
    pub target_bytes: u64,
    pub data_bytes: u64,
    pub columnar_bytes: u64,
    pub forward: Duration,
    pub reverse: Duration,
}

impl TrialRecord {
    pub fn forward_throughput(&self) -> f64 {
        throughput_mib_s(self.data_bytes, self.forward)
    }

    pub fn reverse_throughput(&self) -> f64 {
        throughput_mib_s(self.columnar_bytes, self.reverse)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub trials_completed: u32,
    pub forward_total: Duration,
    pub reverse_total: Duration,
    pub trials: Vec<TrialRecord>,
}

/// Runs every trial in order and reports each one, stopping at the first
/// failure. The summary line is written only when all trials pass.
pub fn run_harness<E: CommandExecutor, W: Write>(
    config: &HarnessConfig,
    executor: E,
    reporter: &mut Reporter<W>,
) -> Result<RunSummary> {
    config.validate()?;
    ensure_dir(&config.workdir)?;
    let converter = Converter::new(config.converter.clone(), executor);
    info!(
        converter = %config.converter.display(),
        trials = config.trials,
        seed = config.seed,
        "starting round-trip run"
    );

    let mut summary = RunSummary::default();
    for index in 1..=config.trials {
        let record = run_trial(config, &converter, index)?;
        summary.forward_total += record.forward;
        summary.reverse_total += record.reverse;
        summary.trials_completed += 1;
        reporter
            .trial(&record, config.trials)
            .map_err(|e| in_stage(index, TrialStage::Done, e))?;
        summary.trials.push(record);
    }
    reporter.summary(&summary)?;
    Ok(summary)
}

pub fn run_trial<E: CommandExecutor>(
    config: &HarnessConfig,
    converter: &Converter<E>,
    index: u32,
) -> Result<TrialRecord> {
    config.validate()?;
    let span = info_span!("trial", index);
    let _entered = span.enter();

    let paths = TrialPaths::new(&config.workdir, index);
    ensure_dir(&paths.dir).map_err(|e| in_stage(index, TrialStage::Prepare, e))?;
    let mut state = TrialStateGuard::new(&paths.dir, index);

    state.advance(TrialStage::Prepare)?;
    let size_seed = size_seed(config.seed, index);
    let corpus_seed = corpus_seed(config.seed, index);
    let target_bytes = config
        .size_range
        .sample(&mut ChaCha8Rng::seed_from_u64(size_seed));
    write_schema(&paths.schema, config.columns, config.int_columns)
        .map_err(|e| in_stage(index, TrialStage::Prepare, e))?;
    let data_bytes = write_data_seeded(
        &paths.data,
        target_bytes,
        config.columns,
        config.int_columns,
        corpus_seed,
    )
    .map_err(|e| in_stage(index, TrialStage::Prepare, e))?;
    info!(target_bytes, data_bytes, "corpus ready");

    state.advance(TrialStage::ConvertForward)?;
    let forward = converter
        .to_columnar(&paths.schema, &paths.data, &paths.columnar)
        .map_err(|e| in_stage(index, TrialStage::ConvertForward, e))?;
    let columnar_bytes =
        file_len(&paths.columnar).map_err(|e| in_stage(index, TrialStage::ConvertForward, e))?;
    info!(elapsed_s = forward.as_secs_f64(), columnar_bytes, "to-columnar done");

    state.advance(TrialStage::ConvertReverse)?;
    let reverse = converter
        .to_csv(&paths.columnar, &paths.schema_back, &paths.data_back)
        .map_err(|e| in_stage(index, TrialStage::ConvertReverse, e))?;
    info!(elapsed_s = reverse.as_secs_f64(), "to-csv done");

    state.advance(TrialStage::Verify)?;
    assert_same_file(&paths.schema, &paths.schema_back)
        .map_err(|e| in_stage(index, TrialStage::Verify, e))?;
    assert_same_file(&paths.data, &paths.data_back)
        .map_err(|e| in_stage(index, TrialStage::Verify, e))?;

    let record = TrialRecord {
        index,
        paths,
        size_seed,
        corpus_seed,
        target_bytes,
        data_bytes,
        columnar_bytes,
        forward,
        reverse,
    };
    write_trial_manifest(config, &record).map_err(|e| in_stage(index, TrialStage::Done, e))?;
    state.complete()?;
    info!("round trip verified");
    Ok(record)
}

fn in_stage(trial: u32, stage: TrialStage, source: HarnessError) -> HarnessError {
    HarnessError::Trial {
        trial,
        stage,
        source: Box::new(source),
    }
}

fn write_trial_manifest(config: &HarnessConfig, record: &TrialRecord) -> Result<()> {
    let schema: Vec<_> = schema_columns(config.columns, config.int_columns)
        .into_iter()
        .map(|(name, ty)| json!({ "name": name, "type": ty }))
        .collect();
    let manifest = json!({
        "schema_version": "trial_manifest_v1",
        "trial": record.index,
        "size_seed": record.size_seed,
        "corpus_seed": record.corpus_seed,
        "schema": schema,
        "target_bytes": record.target_bytes,
        "data_bytes": record.data_bytes,
        "columnar_bytes": record.columnar_bytes,
        "csv2col_s": record.forward.as_secs_f64(),
        "col2csv_s": record.reverse.as_secs_f64(),
        "csv2col_mib_s": finite(record.forward_throughput()),
        "col2csv_mib_s": finite(record.reverse_throughput()),
        "completed_at": Utc::now().to_rfc3339(),
    });
    atomic_write_json_pretty(&record.paths.dir.join("trial.json"), &manifest)
}

fn finite(v: f64) -> Option<f64> {
    v.is_finite().then_some(v)
}

fn write_trial_state(
    trial_dir: &Path,
    trial: u32,
    status: &str,
    stage: TrialStage,
) -> Result<()> {
    let payload = json!({
        "schema_version": "trial_state_v1",
        "trial": trial,
        "status": status,
        "stage": stage.as_str(),
        "updated_at": Utc::now().to_rfc3339(),
    });
    atomic_write_json_pretty(&trial_dir.join("trial_state.json"), &payload)
}

/// Keeps `trial_state.json` current; marks the trial failed at its last
/// stage if dropped before `complete`.
struct TrialStateGuard {
    trial_dir: PathBuf,
    trial: u32,
    stage: TrialStage,
    done: bool,
}

impl TrialStateGuard {
    fn new(trial_dir: &Path, trial: u32) -> Self {
        Self {
            trial_dir: trial_dir.to_path_buf(),
            trial,
            stage: TrialStage::Prepare,
            done: false,
        }
    }

    fn advance(&mut self, stage: TrialStage) -> Result<()> {
        self.stage = stage;
        write_trial_state(&self.trial_dir, self.trial, "running", stage)
            .map_err(|e| in_stage(self.trial, stage, e))
    }

    fn complete(&mut self) -> Result<()> {
        self.stage = TrialStage::Done;
        write_trial_state(&self.trial_dir, self.trial, "completed", TrialStage::Done)
            .map_err(|e| in_stage(self.trial, TrialStage::Done, e))?;
        self.done = true;
        Ok(())
    }
}

impl Drop for TrialStateGuard {
    fn drop(&mut self) {
        if !self.done {
            let _ = write_trial_state(&self.trial_dir, self.trial, "failed", self.stage);
        }
    }
}
