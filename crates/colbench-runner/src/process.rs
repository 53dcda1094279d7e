//! Subprocess invocation of the external converter.

use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

/// What a finished child process left behind.
#[derive(Debug, Clone)]
pub struct ProcessOutput {
    /// `None` when the child was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub elapsed: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Runs a program to completion. Implementations block until the child exits.
pub trait CommandExecutor {
    fn execute(&self, program: &OsStr, args: &[OsString]) -> Result<ProcessOutput>;
}

impl<E: CommandExecutor + ?Sized> CommandExecutor for &E {
    fn execute(&self, program: &OsStr, args: &[OsString]) -> Result<ProcessOutput> {
        (**self).execute(program, args)
    }
}

/// Spawns real child processes with both output streams captured.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemExecutor;

impl CommandExecutor for SystemExecutor {
    fn execute(&self, program: &OsStr, args: &[OsString]) -> Result<ProcessOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let started = Instant::now();
        let output = cmd.output().map_err(|source| HarnessError::Spawn {
            command: command_line(program, args),
            source,
        })?;
        let elapsed = started.elapsed();

        Ok(ProcessOutput {
            code: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
            elapsed,
        })
    }
}

/// Runs `program args..` and returns its wall-clock time. Any exit other than
/// 0 becomes a [`HarnessError::Subprocess`] carrying both captured streams.
pub fn run_checked<E: CommandExecutor>(
    executor: &E,
    program: &OsStr,
    args: &[OsString],
) -> Result<Duration> {
    let command = command_line(program, args);
    debug!(%command, "running");
    let output = executor.execute(program, args)?;
    if !output.success() {
        let code = output
            .code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());
        warn!(%command, %code, "command failed");
        return Err(HarnessError::Subprocess {
            command,
            code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    debug!(%command, elapsed_s = output.elapsed.as_secs_f64(), "finished");
    Ok(output.elapsed)
}

/// The two subcommands of the converter under test.
pub struct Converter<E> {
    program: PathBuf,
    executor: E,
}

impl<E: CommandExecutor> Converter<E> {
    pub fn new(program: impl Into<PathBuf>, executor: E) -> Self {
        Self {
            program: program.into(),
            executor,
        }
    }

    pub fn to_columnar(&self, schema: &Path, data: &Path, out: &Path) -> Result<Duration> {
        self.run("to-columnar", &[schema, data, out])
    }

    pub fn to_csv(&self, columnar: &Path, schema_out: &Path, data_out: &Path) -> Result<Duration> {
        self.run("to-csv", &[columnar, schema_out, data_out])
    }

    fn run(&self, subcommand: &str, paths: &[&Path]) -> Result<Duration> {
        let mut args = Vec::with_capacity(paths.len() + 1);
        args.push(OsString::from(subcommand));
        args.extend(paths.iter().map(|p| p.as_os_str().to_os_string()));
        run_checked(&self.executor, self.program.as_os_str(), &args)
    }
}

pub fn command_line(program: &OsStr, args: &[OsString]) -> String {
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(program.to_string_lossy().into_owned());
    parts.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
    shell_join(&parts)
}

fn shell_join(parts: &[String]) -> String {
    parts
        .iter()
        .map(|p| shell_quote(p))
        .collect::<Vec<_>>()
        .join(" ")
}

fn shell_quote(s: &str) -> String {
    if s.is_empty() {
        "''".to_string()
    } else if s
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || "-_./:".contains(c))
    {
        s.to_string()
    } else {
        format!("'{}'", s.replace('\'', "'\"'\"'"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    fn os_args(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    struct Recording {
        calls: RefCell<Vec<Vec<String>>>,
        code: Option<i32>,
    }

    impl CommandExecutor for Recording {
        fn execute(&self, program: &OsStr, args: &[OsString]) -> Result<ProcessOutput> {
            let mut call = vec![program.to_string_lossy().into_owned()];
            call.extend(args.iter().map(|a| a.to_string_lossy().into_owned()));
            self.calls.borrow_mut().push(call);
            Ok(ProcessOutput {
                code: self.code,
                stdout: b"rows=10\n".to_vec(),
                stderr: b"bad row 3\n".to_vec(),
                elapsed: Duration::from_millis(250),
            })
        }
    }

    #[test]
    fn shell_join_quotes_only_when_needed() {
        let parts = vec![
            "./bin/conv".to_string(),
            "to-csv".to_string(),
            "my file.col".to_string(),
            "it's".to_string(),
            String::new(),
        ];
        assert_eq!(
            shell_join(&parts),
            "./bin/conv to-csv 'my file.col' 'it'\"'\"'s' ''"
        );
    }

    #[test]
    fn converter_passes_subcommand_and_paths_in_order() {
        let exec = Recording {
            calls: RefCell::new(Vec::new()),
            code: Some(0),
        };
        let conv = Converter::new("/opt/conv", &exec);
        let elapsed = conv
            .to_columnar(Path::new("s.csv"), Path::new("d.csv"), Path::new("d.columnar"))
            .expect("forward");
        assert_eq!(elapsed, Duration::from_millis(250));
        conv.to_csv(Path::new("d.columnar"), Path::new("s2.csv"), Path::new("d2.csv"))
            .expect("reverse");
        let calls = exec.calls.borrow();
        assert_eq!(
            calls[0],
            vec!["/opt/conv", "to-columnar", "s.csv", "d.csv", "d.columnar"]
        );
        assert_eq!(
            calls[1],
            vec!["/opt/conv", "to-csv", "d.columnar", "s2.csv", "d2.csv"]
        );
    }

    #[test]
    fn non_zero_exit_reports_command_code_and_streams() {
        let exec = Recording {
            calls: RefCell::new(Vec::new()),
            code: Some(3),
        };
        let err = run_checked(&exec, OsStr::new("conv"), &os_args(&["to-csv", "a b"]))
            .expect_err("exit 3 must fail");
        let msg = err.to_string();
        assert!(msg.contains("cmd: conv to-csv 'a b'"), "{}", msg);
        assert!(msg.contains("code: 3"), "{}", msg);
        assert!(msg.contains("rows=10"), "{}", msg);
        assert!(msg.contains("bad row 3"), "{}", msg);
    }

    #[test]
    fn signal_termination_is_a_failure() {
        let exec = Recording {
            calls: RefCell::new(Vec::new()),
            code: None,
        };
        let err = run_checked(&exec, OsStr::new("conv"), &[]).expect_err("signal must fail");
        match err {
            HarnessError::Subprocess { code, .. } => assert_eq!(code, "signal"),
            other => panic!("expected subprocess failure, got {}", other),
        }
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let err = run_checked(
            &SystemExecutor,
            OsStr::new("/nonexistent/colbench-converter"),
            &os_args(&["to-csv"]),
        )
        .expect_err("spawn must fail");
        assert!(matches!(err, HarnessError::Spawn { .. }), "{}", err);
    }

    #[cfg(unix)]
    #[test]
    fn system_executor_captures_streams_and_exit_code() {
        let ok = SystemExecutor
            .execute(OsStr::new("sh"), &os_args(&["-c", "printf out; printf err >&2"]))
            .expect("sh should run");
        assert!(ok.success());
        assert_eq!(ok.stdout, b"out");
        assert_eq!(ok.stderr, b"err");

        let err = run_checked(
            &SystemExecutor,
            OsStr::new("sh"),
            &os_args(&["-c", "echo partial; echo boom >&2; exit 7"]),
        )
        .expect_err("exit 7 must fail");
        match err {
            HarnessError::Subprocess {
                code,
                stdout,
                stderr,
                ..
            } => {
                assert_eq!(code, "7");
                assert_eq!(stdout, "partial\n");
                assert_eq!(stderr, "boom\n");
            }
            other => panic!("expected subprocess failure, got {}", other),
        }
    }
}
