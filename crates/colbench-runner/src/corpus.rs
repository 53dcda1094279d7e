//! Synthetic schema and data generation.
//!
//! Everything here is driven by an explicit random generator so a corpus can
//! be regenerated byte-for-byte from its seed.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::ops::RangeInclusive;
use std::path::Path;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::debug;

use crate::error::{HarnessError, Result};

/// Integer fields are drawn from `-INT_FIELD_BOUND..=INT_FIELD_BOUND`.
pub const INT_FIELD_BOUND: i64 = 1_000_000_000_000;

pub const TOKEN_POOL_SIZE: usize = 5000;
pub const TOKEN_LEN: RangeInclusive<usize> = 6..=18;
const TOKEN_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

const WRITE_BUFFER_BYTES: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Int64,
    String,
}

impl ColumnType {
    pub fn for_index(index: usize, int_columns: usize) -> Self {
        if index < int_columns {
            ColumnType::Int64
        } else {
            ColumnType::String
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Int64 => "int64",
            ColumnType::String => "string",
        }
    }
}

/// Schema as `(name, type)` pairs: `c0..c{int_columns-1}` are int64, the rest string.
pub fn schema_columns(columns: usize, int_columns: usize) -> Vec<(String, ColumnType)> {
    (0..columns)
        .map(|i| (format!("c{}", i), ColumnType::for_index(i, int_columns)))
        .collect()
}

pub fn write_schema(path: &Path, columns: usize, int_columns: usize) -> Result<()> {
    check_shape(columns, int_columns)?;
    let file = File::create(path).map_err(|e| HarnessError::io_at("create", path, e))?;
    let mut out = BufWriter::new(file);
    for (name, ty) in schema_columns(columns, int_columns) {
        writeln!(out, "{},{}", name, ty.as_str())
            .map_err(|e| HarnessError::io_at("write", path, e))?;
    }
    out.flush()
        .map_err(|e| HarnessError::io_at("flush", path, e))?;
    Ok(())
}

/// Writes complete rows until the next one would push the file past
/// `target_bytes`. Returns the number of bytes written, which never exceeds
/// the target.
pub fn write_data<R: Rng>(
    path: &Path,
    target_bytes: u64,
    columns: usize,
    int_columns: usize,
    rng: &mut R,
) -> Result<u64> {
    check_shape(columns, int_columns)?;
    let pool = TokenPool::generate(rng, TOKEN_POOL_SIZE);

    let file = File::create(path).map_err(|e| HarnessError::io_at("create", path, e))?;
    let mut out = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);

    let mut written: u64 = 0;
    let mut rows: u64 = 0;
    let mut line = String::with_capacity(columns * 20);
    loop {
        line.clear();
        for c in 0..columns {
            if c > 0 {
                line.push(',');
            }
            match ColumnType::for_index(c, int_columns) {
                ColumnType::Int64 => {
                    let v = rng.gen_range(-INT_FIELD_BOUND..=INT_FIELD_BOUND);
                    let _ = write!(line, "{}", v);
                }
                ColumnType::String => line.push_str(pool.pick(rng)),
            }
        }
        line.push('\n');

        if written + line.len() as u64 > target_bytes {
            break;
        }
        out.write_all(line.as_bytes())
            .map_err(|e| HarnessError::io_at("write", path, e))?;
        written += line.len() as u64;
        rows += 1;
    }
    out.flush()
        .map_err(|e| HarnessError::io_at("flush", path, e))?;

    debug!(path = %path.display(), rows, bytes = written, target_bytes, "corpus written");
    Ok(written)
}

/// [`write_data`] with a fresh generator seeded from `seed`.
pub fn write_data_seeded(
    path: &Path,
    target_bytes: u64,
    columns: usize,
    int_columns: usize,
    seed: u64,
) -> Result<u64> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    write_data(path, target_bytes, columns, int_columns, &mut rng)
}

fn check_shape(columns: usize, int_columns: usize) -> Result<()> {
    if columns == 0 {
        return Err(HarnessError::Usage("column count must be > 0".to_string()));
    }
    if int_columns > columns {
        return Err(HarnessError::Usage(format!(
            "integer column count {} exceeds column count {}",
            int_columns, columns
        )));
    }
    Ok(())
}

struct TokenPool {
    tokens: Vec<String>,
}

impl TokenPool {
    fn generate<R: Rng>(rng: &mut R, size: usize) -> Self {
        let tokens = (0..size)
            .map(|_| {
                let len = rng.gen_range(TOKEN_LEN);
                (0..len)
                    .map(|_| TOKEN_ALPHABET[rng.gen_range(0..TOKEN_ALPHABET.len())] as char)
                    .collect()
            })
            .collect();
        Self { tokens }
    }

    fn pick<R: Rng>(&self, rng: &mut R) -> &str {
        &self.tokens[rng.gen_range(0..self.tokens.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ensure_dir;
    use chrono::Utc;
    use std::fs;
    use std::path::PathBuf;

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "colbench_corpus_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("temp dir");
        root
    }

    #[test]
    fn schema_lists_int_columns_first() {
        let root = temp_root("schema");
        let path = root.join("schema.csv");
        write_schema(&path, 4, 2).expect("write schema");
        let text = fs::read_to_string(&path).expect("read schema");
        assert_eq!(text, "c0,int64\nc1,int64\nc2,string\nc3,string\n");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn schema_rejects_more_int_columns_than_columns() {
        let root = temp_root("schema_bad");
        let err = write_schema(&root.join("schema.csv"), 3, 4).expect_err("should fail");
        assert!(matches!(err, HarnessError::Usage(_)), "unexpected: {}", err);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn data_has_only_complete_well_formed_lines_within_target() {
        let root = temp_root("data");
        let path = root.join("data.csv");
        let target = 256 * 1024 + 17;
        let written = write_data_seeded(&path, target, 10, 5, 1_000_003).expect("write data");

        let bytes = fs::read(&path).expect("read data");
        assert_eq!(bytes.len() as u64, written);
        assert!(written <= target, "wrote {} > target {}", written, target);
        assert!(written > target - 512, "stopped too early: {}", written);
        assert_eq!(bytes.last(), Some(&b'\n'));

        let text = String::from_utf8(bytes).expect("utf8");
        for line in text.lines() {
            let fields: Vec<&str> = line.split(',').collect();
            assert_eq!(fields.len(), 10, "bad line: {}", line);
            for f in &fields[..5] {
                let v: i64 = f.parse().expect("int field");
                assert!((-INT_FIELD_BOUND..=INT_FIELD_BOUND).contains(&v));
            }
            for f in &fields[5..] {
                assert!(TOKEN_LEN.contains(&f.len()), "bad token length: {}", f);
                assert!(f.bytes().all(|b| TOKEN_ALPHABET.contains(&b)));
            }
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn same_seed_gives_identical_bytes() {
        let root = temp_root("determinism");
        let a = root.join("a.csv");
        let b = root.join("b.csv");
        let c = root.join("c.csv");
        write_data_seeded(&a, 64 * 1024, 10, 5, 42).expect("a");
        write_data_seeded(&b, 64 * 1024, 10, 5, 42).expect("b");
        write_data_seeded(&c, 64 * 1024, 10, 5, 43).expect("c");
        let bytes_a = fs::read(&a).expect("read a");
        assert_eq!(bytes_a, fs::read(&b).expect("read b"));
        assert_ne!(bytes_a, fs::read(&c).expect("read c"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn target_smaller_than_one_row_yields_empty_file() {
        let root = temp_root("tiny");
        let path = root.join("data.csv");
        let written = write_data_seeded(&path, 8, 10, 5, 7).expect("write");
        assert_eq!(written, 0);
        assert_eq!(fs::metadata(&path).expect("meta").len(), 0);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn all_string_and_all_int_shapes_are_supported() {
        let root = temp_root("shapes");
        let ints = root.join("ints.csv");
        let strings = root.join("strings.csv");
        write_data_seeded(&ints, 4096, 3, 3, 9).expect("ints");
        write_data_seeded(&strings, 4096, 3, 0, 9).expect("strings");
        let ints_text = fs::read_to_string(&ints).expect("read ints");
        assert!(ints_text
            .lines()
            .all(|l| l.split(',').all(|f| f.parse::<i64>().is_ok())));
        let strings_text = fs::read_to_string(&strings).expect("read strings");
        assert!(strings_text
            .lines()
            .all(|l| l.split(',').all(|f| f.bytes().all(|b| TOKEN_ALPHABET.contains(&b)))));
        let _ = fs::remove_dir_all(root);
    }
}
