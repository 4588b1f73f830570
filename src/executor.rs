use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{error, info, warn};

use crate::catalog::ExistenceCheck;
use crate::logging::RunLog;
use crate::model::ExecutionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Record the failure and move on to the next unit.
    Continue,
    /// Stop the batch at the first non-zero exit.
    AbortOnFirst,
}

#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    pub id: String,
    pub program: String,
    pub args: Vec<String>,
    /// Title looked up in the catalog when skip-existing is on.
    pub skip_key: Option<String>,
}

impl ExecutionUnit {
    /// A script run through `interpreter`, or directly when the interpreter is empty.
    pub fn for_script(path: &Path, interpreter: &str, skip_key: Option<String>) -> Self {
        let id = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        let script = path.display().to_string();

        let (program, args) = if interpreter.trim().is_empty() {
            (script, Vec::new())
        } else {
            (interpreter.trim().to_string(), vec![script])
        };

        Self {
            id,
            program,
            args,
            skip_key,
        }
    }
}

#[derive(Debug, Default)]
pub struct BatchSummary {
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub not_run: usize,
    pub aborted_at: Option<String>,
    pub results: Vec<ExecutionResult>,
}

impl BatchSummary {
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.not_run == 0
    }
}

pub struct BatchExecutor<'a> {
    policy: FailurePolicy,
    skip_existing: bool,
    existence: Option<&'a dyn ExistenceCheck>,
    run_log: Option<&'a RunLog>,
    echo: bool,
}

impl<'a> BatchExecutor<'a> {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            policy,
            skip_existing: false,
            existence: None,
            run_log: None,
            echo: true,
        }
    }

    pub fn skip_existing(mut self, existence: &'a dyn ExistenceCheck) -> Self {
        self.skip_existing = true;
        self.existence = Some(existence);
        self
    }

    pub fn run_log(mut self, run_log: Option<&'a RunLog>) -> Self {
        self.run_log = run_log;
        self
    }

    /// Keep child output off stdout; it is still captured and logged.
    pub fn quiet(mut self) -> Self {
        self.echo = false;
        self
    }

    /// Runs `units` one after another in the given order.
    pub fn run(&self, units: &[ExecutionUnit]) -> BatchSummary {
        let mut summary = BatchSummary::default();
        let total = units.len();

        for (index, unit) in units.iter().enumerate() {
            if self.should_skip(unit) {
                info!(unit = %unit.id, "skipping unit; output already exists");
                summary.skipped += 1;
                continue;
            }

            info!(unit = %unit.id, position = index + 1, total, "starting unit");
            let result = self.execute(unit);
            let succeeded = result.succeeded();
            if succeeded {
                info!(unit = %unit.id, duration_ms = result.duration_ms as u64, "unit succeeded");
                summary.succeeded += 1;
            } else {
                error!(
                    unit = %unit.id,
                    exit_code = ?result.exit_code,
                    duration_ms = result.duration_ms as u64,
                    "unit failed"
                );
                summary.failed += 1;
            }
            summary.results.push(result);

            if !succeeded && self.policy == FailurePolicy::AbortOnFirst {
                summary.not_run = total - index - 1;
                summary.aborted_at = Some(unit.id.clone());
                warn!(unit = %unit.id, not_run = summary.not_run, "aborting batch after failure");
                break;
            }
        }

        info!(
            skipped = summary.skipped,
            succeeded = summary.succeeded,
            failed = summary.failed,
            not_run = summary.not_run,
            "batch finished"
        );
        summary
    }

    fn should_skip(&self, unit: &ExecutionUnit) -> bool {
        if !self.skip_existing {
            return false;
        }
        let (Some(existence), Some(key)) = (self.existence, unit.skip_key.as_deref()) else {
            return false;
        };

        match existence.exists(key) {
            Ok(exists) => exists,
            Err(err) => {
                warn!(unit = %unit.id, error = %err, "existence check failed; running unit");
                false
            }
        }
    }

    fn execute(&self, unit: &ExecutionUnit) -> ExecutionResult {
        let started = Instant::now();
        let mut result = ExecutionResult {
            script_id: unit.id.clone(),
            exit_code: None,
            duration_ms: 0,
            captured_output: Vec::new(),
        };

        let spawned = Command::new(&unit.program)
            .args(&unit.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match spawned {
            Ok(child) => child,
            Err(err) => {
                error!(
                    unit = %unit.id,
                    program = %unit.program,
                    error = %err,
                    "failed to start unit"
                );
                self.emit(&unit.id, &format!("failed to start {}: {err}", unit.program));
                result.duration_ms = started.elapsed().as_millis();
                return result;
            }
        };

        let (sender, receiver) = mpsc::channel::<String>();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(forward_lines(stdout, sender.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(forward_lines(stderr, sender.clone()));
        }
        drop(sender);

        for line in receiver {
            self.emit(&unit.id, &line);
            result.captured_output.push(line);
        }
        for reader in readers {
            if reader.join().is_err() {
                warn!(unit = %unit.id, "output reader thread panicked");
            }
        }

        match child.wait() {
            Ok(status) => result.exit_code = status.code(),
            Err(err) => error!(unit = %unit.id, error = %err, "failed to wait for unit"),
        }
        result.duration_ms = started.elapsed().as_millis();
        result
    }

    fn emit(&self, unit_id: &str, line: &str) {
        let line = format!("[{unit_id}] {line}");
        if self.echo {
            println!("{line}");
        }
        if let Some(run_log) = self.run_log {
            if let Err(err) = run_log.write_line(&line) {
                warn!(
                    error = %err,
                    path = %run_log.path().display(),
                    "failed to append to run log"
                );
            }
        }
    }
}

fn forward_lines<R: Read + Send + 'static>(stream: R, sender: Sender<String>) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stream);
        for chunk in reader.split(b'\n') {
            let Ok(bytes) = chunk else {
                break;
            };
            let line = String::from_utf8_lossy(&bytes)
                .trim_end_matches('\r')
                .to_string();
            if sender.send(line).is_err() {
                break;
            }
        }
    })
}
