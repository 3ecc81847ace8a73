//! The sandbox boundary: running one package's test suite under a
//! wall-clock budget and classifying the result.
//!
//! [`SandboxRunner`] is the seam between the scheduler and whatever actually
//! executes a package's tests. Production code uses [`ProcessSandboxRunner`];
//! tests substitute [`StubSandboxRunner`] so scheduler behaviour can be
//! exercised without spawning real processes.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::package::Package;
use crate::types::RunOutcome;

/// The captured result of one sandboxed test invocation.
#[derive(Debug, Clone)]
pub struct SandboxOutput {
    pub outcome: RunOutcome,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration: Duration,
}

/// Runs a package's test suite in isolation. Implementors must respect
/// `timeout` by killing the underlying work rather than blocking past it —
/// the scheduler relies on this to bound one worker's occupancy.
pub trait SandboxRunner: Send + Sync {
    fn run(&self, package: &Package, runtime_version: &str, timeout: Option<Duration>) -> Result<SandboxOutput>;
}

/// Spawns `<runtime> test <package-path>` as a child process, the way a real
/// ecosystem test harness invokes a package's test entry point. Mirrors the
/// teacher's timeout-bounded polling loop: poll `try_wait` on a short
/// interval, kill on deadline, always drain both pipes before returning.
pub struct ProcessSandboxRunner {
    runtime_binary_dir: PathBuf,
}

impl ProcessSandboxRunner {
    pub fn new(runtime_binary_dir: impl Into<PathBuf>) -> Self {
        Self { runtime_binary_dir: runtime_binary_dir.into() }
    }

    fn runtime_binary(&self, runtime_version: &str) -> PathBuf {
        self.runtime_binary_dir.join(runtime_version).join("bin").join("runtime")
    }
}

impl SandboxRunner for ProcessSandboxRunner {
    fn run(&self, package: &Package, runtime_version: &str, timeout: Option<Duration>) -> Result<SandboxOutput> {
        run_command_with_timeout(
            &self.runtime_binary(runtime_version),
            &["test", package.name.as_str()],
            &package.metadata_path,
            timeout,
        )
    }
}

fn run_command_with_timeout(
    program: &Path,
    args: &[&str],
    working_dir: &Path,
    timeout: Option<Duration>,
) -> Result<SandboxOutput> {
    let start = Instant::now();
    let mut command = Command::new(program);
    command.args(args).current_dir(working_dir);

    let (exit_code, stdout, stderr, timed_out) = if let Some(budget) = timeout {
        let mut child = command
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn sandbox for {}", working_dir.display()))?;

        let deadline = Instant::now() + budget;
        loop {
            match child.try_wait().context("failed to poll sandbox process")? {
                Some(status) => {
                    let (stdout, stderr) = drain(&mut child);
                    break (status.code(), stdout, stderr, false);
                }
                None => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        let (stdout, mut stderr) = drain(&mut child);
                        stderr.push_str(&format!(
                            "\nsandbox timed out after {}",
                            humantime::format_duration(budget)
                        ));
                        break (None, stdout, stderr, true);
                    }
                    std::thread::sleep(Duration::from_millis(100));
                }
            }
        }
    } else {
        let output = command.output().context("failed to execute sandbox")?;
        (
            output.status.code(),
            String::from_utf8_lossy(&output.stdout).to_string(),
            String::from_utf8_lossy(&output.stderr).to_string(),
            false,
        )
    };

    let outcome = if timed_out {
        RunOutcome::TimedOut
    } else if exit_code == Some(0) {
        RunOutcome::Passed
    } else {
        RunOutcome::Failed
    };

    Ok(SandboxOutput {
        outcome,
        exit_code,
        stdout,
        stderr,
        duration: start.elapsed(),
    })
}

fn drain(child: &mut std::process::Child) -> (String, String) {
    let mut stdout_bytes = Vec::new();
    let mut stderr_bytes = Vec::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_end(&mut stdout_bytes);
    }
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_end(&mut stderr_bytes);
    }
    (
        String::from_utf8_lossy(&stdout_bytes).to_string(),
        String::from_utf8_lossy(&stderr_bytes).to_string(),
    )
}

/// A scripted runner for tests: maps package name to a fixed outcome, with a
/// default for anything unlisted.
pub struct StubSandboxRunner {
    outcomes: std::collections::HashMap<String, RunOutcome>,
    default: RunOutcome,
}

impl StubSandboxRunner {
    pub fn new(default: RunOutcome) -> Self {
        Self { outcomes: std::collections::HashMap::new(), default }
    }

    pub fn with(mut self, package_name: impl Into<String>, outcome: RunOutcome) -> Self {
        self.outcomes.insert(package_name.into(), outcome);
        self
    }
}

impl SandboxRunner for StubSandboxRunner {
    fn run(&self, package: &Package, _runtime_version: &str, _timeout: Option<Duration>) -> Result<SandboxOutput> {
        let outcome = self.outcomes.get(&package.name).copied().unwrap_or(self.default);
        Ok(SandboxOutput {
            outcome,
            exit_code: Some(if outcome == RunOutcome::Passed { 0 } else { 1 }),
            stdout: String::new(),
            stderr: String::new(),
            duration: Duration::from_millis(0),
        })
    }
}
