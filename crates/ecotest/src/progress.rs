//! Progress reporting with TTY detection, generalized from a one-at-a-time
//! publish progress bar into a multi-worker dashboard: several packages can
//! be in flight at once, so this renders a run-wide summary line (how many
//! passed, failed, skipped, how many are ready to start, how many remain)
//! above one status line per worker thread.

use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Instant;

use atty::Stream;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::types::TestResult;

pub fn is_tty() -> bool {
    atty::is(Stream::Stdout)
}

/// What a single worker thread is doing right now, for the per-worker status
/// line. `Running` keeps the start time rather than an elapsed duration so
/// the line can be redrawn with a fresh "running for Ns" on every tick.
enum WorkerStatus {
    Idle,
    Running { package_name: String, started: Instant },
}

impl WorkerStatus {
    fn render(&self, index: usize) -> String {
        match self {
            WorkerStatus::Idle => format!("Worker {index}: idle"),
            WorkerStatus::Running { package_name, started } => {
                format!("Worker {index}: {package_name} running for {:.1?}", started.elapsed())
            }
        }
    }
}

/// Running tallies of terminal results, redrawn into the summary line
/// alongside the caller-supplied frontier/remaining counts.
#[derive(Default)]
struct Counts {
    passed: usize,
    failed: usize,
    timed_out: usize,
    skipped: usize,
}

impl Counts {
    fn record(&mut self, result: TestResult) {
        match result {
            TestResult::Passed => self.passed += 1,
            TestResult::Failed => self.failed += 1,
            TestResult::TimedOut => self.timed_out += 1,
            TestResult::Skipped => self.skipped += 1,
            TestResult::Untested => {}
        }
    }

    fn render(&self, frontier: usize, remaining: usize) -> String {
        format!(
            "Success: {} Failed: {} Skipped: {} Frontier: {frontier} Remaining: {remaining}",
            self.passed, self.failed + self.timed_out, self.skipped
        )
    }
}

/// Thread-safe progress reporter shared by every worker. TTY mode drives an
/// `indicatif` `MultiProgress` dashboard (one summary bar plus one bar per
/// worker); non-TTY mode prints one line per event so output stays readable
/// when piped or captured in CI logs.
pub struct ProgressReporter {
    total: usize,
    is_tty: bool,
    multi: Option<MultiProgress>,
    summary_bar: Option<ProgressBar>,
    worker_bars: Vec<ProgressBar>,
    completed: Mutex<usize>,
    counts: Mutex<Counts>,
    workers: Mutex<Vec<WorkerStatus>>,
    start_time: Instant,
}

impl ProgressReporter {
    pub fn new(total: usize, worker_count: usize) -> Self {
        Self::build(total, worker_count, is_tty())
    }

    /// A reporter that never draws a bar, regardless of the real TTY state.
    pub fn silent(total: usize) -> Self {
        Self::build(total, 0, false)
    }

    fn build(total: usize, worker_count: usize, is_tty: bool) -> Self {
        let (multi, summary_bar, worker_bars) = if is_tty {
            let multi = MultiProgress::new();
            let line_style = ProgressStyle::default_bar()
                .template("{msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar());

            let summary = multi.add(ProgressBar::new_spinner());
            summary.set_style(line_style.clone());

            let workers = (0..worker_count)
                .map(|i| {
                    let bar = multi.add(ProgressBar::new_spinner());
                    bar.set_style(line_style.clone());
                    bar.set_message(WorkerStatus::Idle.render(i));
                    bar
                })
                .collect();

            (Some(multi), Some(summary), workers)
        } else {
            (None, None, Vec::new())
        };

        Self {
            total,
            is_tty,
            multi,
            summary_bar,
            worker_bars,
            completed: Mutex::new(0),
            counts: Mutex::new(Counts::default()),
            workers: Mutex::new((0..worker_count).map(|_| WorkerStatus::Idle).collect()),
            start_time: Instant::now(),
        }
    }

    pub fn report_started(&self, worker_index: usize, package_name: &str) {
        self.set_worker(worker_index, WorkerStatus::Running { package_name: package_name.to_string(), started: Instant::now() });
        if self.multi.is_none() {
            eprintln!("[start] worker {worker_index}: {package_name}");
        }
    }

    /// `frontier` and `remaining` are the caller's current ready-vertex and
    /// not-yet-terminal counts, taken under the scheduler's own lock right
    /// after the result lands — the reporter has no graph of its own.
    pub fn report_finished(&self, worker_index: usize, package_name: &str, result: TestResult, frontier: usize, remaining: usize) {
        self.set_worker(worker_index, WorkerStatus::Idle);

        let mut completed = self.completed.lock().unwrap();
        *completed += 1;
        let position = *completed;
        drop(completed);

        self.counts.lock().unwrap().record(result);
        self.redraw_summary(frontier, remaining);

        if self.multi.is_none() {
            let elapsed = self.start_time.elapsed();
            eprintln!(
                "[{position}/{}] worker {worker_index}: {package_name}: {result} ({elapsed:?}) {}",
                self.total,
                self.counts.lock().unwrap().render(frontier, remaining)
            );
        }
    }

    fn set_worker(&self, worker_index: usize, status: WorkerStatus) {
        if let Some(bar) = self.worker_bars.get(worker_index) {
            bar.set_message(status.render(worker_index));
        }
        let mut workers = self.workers.lock().unwrap();
        if let Some(slot) = workers.get_mut(worker_index) {
            *slot = status;
        }
    }

    fn redraw_summary(&self, frontier: usize, remaining: usize) {
        if let Some(bar) = &self.summary_bar {
            let counts = self.counts.lock().unwrap();
            bar.set_message(counts.render(frontier, remaining));
        }
    }

    /// A one-line plain-text rendering of the whole dashboard state, used by
    /// non-TTY callers that want the full picture in a single log line
    /// rather than `report_finished`'s shorter per-event line.
    pub fn render_plain(&self) -> String {
        let counts = self.counts.lock().unwrap();
        let mut out = counts.render(0, self.total.saturating_sub(*self.completed.lock().unwrap()));
        let workers = self.workers.lock().unwrap();
        for (i, status) in workers.iter().enumerate() {
            let _ = write!(out, " | {}", status.render(i));
        }
        out
    }

    pub fn finish(self) {
        let elapsed = self.start_time.elapsed();
        if let Some(multi) = &self.multi {
            if let Some(bar) = &self.summary_bar {
                bar.finish_with_message(format!("completed {} packages in {elapsed:?}", self.total));
            }
            for bar in &self.worker_bars {
                bar.finish_and_clear();
            }
            let _ = multi.clear();
        } else {
            eprintln!("completed {} packages in {elapsed:?}", self.total);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_tty_returns_a_bool() {
        let _ = is_tty();
    }

    #[test]
    fn silent_reporter_never_builds_a_bar() {
        let reporter = ProgressReporter::silent(5);
        assert!(reporter.summary_bar.is_none());
        assert!(!reporter.is_tty);
    }

    #[test]
    fn report_finished_increments_completed_count() {
        let reporter = ProgressReporter::silent(2);
        reporter.report_started(0, "leftpad");
        reporter.report_finished(0, "leftpad", TestResult::Passed, 0, 1);
        assert_eq!(*reporter.completed.lock().unwrap(), 1);
        reporter.report_finished(0, "rightpad", TestResult::Failed, 0, 0);
        assert_eq!(*reporter.completed.lock().unwrap(), 2);
    }

    #[test]
    fn counts_tally_by_result_kind() {
        let reporter = ProgressReporter::silent(3);
        reporter.report_finished(0, "a", TestResult::Passed, 2, 1);
        reporter.report_finished(0, "b", TestResult::Failed, 1, 1);
        reporter.report_finished(0, "c", TestResult::Skipped, 0, 0);
        let counts = reporter.counts.lock().unwrap();
        assert_eq!(counts.passed, 1);
        assert_eq!(counts.failed, 1);
        assert_eq!(counts.skipped, 1);
    }

    #[test]
    fn render_plain_includes_worker_lines() {
        let reporter = ProgressReporter::build(1, 2, false);
        reporter.report_started(1, "leftpad");
        let rendered = reporter.render_plain();
        assert!(rendered.contains("Worker 0: idle"));
        assert!(rendered.contains("Worker 1: leftpad running for"));
    }

    #[test]
    fn finish_completes_without_panic() {
        let reporter = ProgressReporter::silent(1);
        reporter.report_finished(0, "a", TestResult::Passed, 0, 0);
        reporter.finish();
    }
}
