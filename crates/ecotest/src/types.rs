//! Domain types shared across the crate: run-wide options, the per-vertex
//! result state, and sandbox failure classification.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::package::PackageId;

/// The state of a single vertex's test run.
///
/// A vertex leaves `Untested` exactly once per run; after that, its value is
/// terminal. `TimedOut` is symmetric to `Failed` everywhere skip propagation
/// is concerned (see `SPEC_FULL.md` §3) but is reported separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TestResult {
    Untested,
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

impl TestResult {
    /// Out-neighbours in this state cause their dependent to be skipped.
    pub fn triggers_skip(&self) -> bool {
        matches!(self, TestResult::Failed | TestResult::TimedOut | TestResult::Skipped)
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestResult::Untested)
    }
}

impl std::fmt::Display for TestResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TestResult::Untested => "untested",
            TestResult::Passed => "passed",
            TestResult::Failed => "failed",
            TestResult::TimedOut => "timed out",
            TestResult::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Classification of a sandbox-runner failure, used only to pick a retry
/// policy for the *runtime installer* (never for a test failure — see
/// Non-goals). Mirrors the shape `ecotest_retry::ErrorClass` expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    #[default]
    Retryable,
    Ambiguous,
    Permanent,
}

/// All knobs governing one run, merged from `.ecotest.toml` and CLI flags
/// (see [`crate::config`]). Built once; never mutated after construction.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of worker slots (`N` in `SPEC_FULL.md` §4.3).
    pub worker_count: usize,
    /// Runtime version to install and test against.
    pub runtime_version: String,
    /// Directory that will hold `<pkgname>.log`, `events.jsonl`, and
    /// `report.json` for this run.
    pub log_dir: PathBuf,
    /// Per-package wall-clock budget; `None` disables the timeout and relies
    /// solely on the deny-list.
    pub per_package_timeout: Option<Duration>,
    /// Retry policy applied to the runtime installer's download/verify step.
    pub install_retry: ecotest_retry::RetryStrategyConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            worker_count: 4,
            runtime_version: String::new(),
            log_dir: PathBuf::from(".ecotest"),
            per_package_timeout: Some(Duration::from_secs(30 * 60)),
            install_retry: ecotest_retry::RetryPolicy::Default.to_config(),
        }
    }
}

/// The outcome of one sandbox invocation, as reported by a [`crate::runner::SandboxRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Passed,
    Failed,
    TimedOut,
}

impl From<RunOutcome> for TestResult {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Passed => TestResult::Passed,
            RunOutcome::Failed => TestResult::Failed,
            RunOutcome::TimedOut => TestResult::TimedOut,
        }
    }
}

/// A reverse-dependency impact ranking entry, produced by [`crate::analysis`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureImpact {
    pub package_id: PackageId,
    pub package_name: String,
    pub result: TestResultKind,
    pub transitive_dependents: usize,
    /// Of `transitive_dependents`, how many ended up `Skipped` as a direct
    /// consequence of this vertex — the size of its own skip-propagation
    /// subtree, as opposed to dependents that separately failed on their own.
    pub skipped_dependents: usize,
}

/// `TestResult` without the `Untested` case, for serializing final reports
/// (a well-formed completed run never reports an `Untested` vertex).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestResultKind {
    Passed,
    Failed,
    TimedOut,
    Skipped,
}

impl TryFrom<TestResult> for TestResultKind {
    type Error = ();

    fn try_from(value: TestResult) -> Result<Self, Self::Error> {
        match value {
            TestResult::Passed => Ok(TestResultKind::Passed),
            TestResult::Failed => Ok(TestResultKind::Failed),
            TestResult::TimedOut => Ok(TestResultKind::TimedOut),
            TestResult::Skipped => Ok(TestResultKind::Skipped),
            TestResult::Untested => Err(()),
        }
    }
}
