//! The parallel scheduler: a bounded pool of worker threads draining the
//! dependency graph's ready frontier until every vertex is terminal.
//!
//! Unlike a level-by-level batch scheduler — which must wait for the
//! slowest package in a level before starting the next one — this scheduler
//! keeps every worker busy on whatever is ready *right now*: a vertex whose
//! dependencies finish early can start before a sibling from an earlier
//! "level" has finished, so long as its own dependencies already passed.
//! One mutex guards the graph and the in-flight set; one condition variable
//! wakes idle workers when new work becomes ready or the run ends.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::events::{EventKind, EventLog};
use crate::graph::DependencyGraph;
use crate::package::{Package, PackageId};
use crate::policy::Policy;
use crate::progress::ProgressReporter;
use crate::runner::SandboxRunner;
use crate::types::{RunOptions, TestResult, TestResultKind};

struct SharedState {
    graph: DependencyGraph,
    in_flight: HashSet<PackageId>,
}

impl SharedState {
    /// The untested, ready vertices not already claimed by another worker.
    fn claimable(&self) -> Vec<PackageId> {
        self.graph
            .ready_frontier()
            .into_iter()
            .filter(|id| !self.in_flight.contains(id))
            .collect()
    }

    /// No vertex is running and none can ever become ready — either the run
    /// finished, or (should never happen on an acyclic graph) every
    /// remaining vertex depends on one that will never complete.
    fn stalled(&self) -> bool {
        self.in_flight.is_empty() && self.claimable().is_empty()
    }
}

/// Final tallies for a completed run, used for the report and exit code.
#[derive(Debug, Clone, Copy, Default)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub skipped: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.timed_out + self.skipped
    }

    /// A run is successful only if nothing failed, timed out, or was
    /// skipped as a consequence — an all-`Passed` run is the only success.
    pub fn is_success(&self) -> bool {
        self.failed == 0 && self.timed_out == 0 && self.skipped == 0
    }
}

/// Run every vertex of `graph` to completion, applying `policy`'s allow and
/// deny lists before dispatching each package to `runner`.
///
/// Allow-listed packages are marked `Passed` without ever reaching the
/// runner; deny-listed packages are marked `Skipped` the same way (and so
/// propagate skips exactly like a real failure would). Both are applied as
/// vertices become ready rather than up front, so a deny-listed package
/// that would never have become ready anyway costs nothing extra.
///
/// `cancel` is the cooperative shutdown flag (a `stopwork!` signal raised
/// from outside, e.g. a Ctrl+C handler): once set, idle workers stop
/// claiming new work and exit the next time they poll, the same way a
/// natural stall drains the pool. In-flight sandbox runs are not
/// force-killed from here — `SandboxRunner` owns its own child process and
/// is responsible for interrupting it; the scheduler only stops handing out
/// new work once `cancel` is observed.
pub fn run(
    mut graph: DependencyGraph,
    runner: Arc<dyn SandboxRunner>,
    policy: &Policy,
    options: &RunOptions,
    event_log: &Arc<Mutex<EventLog>>,
    progress: Arc<ProgressReporter>,
    cancel: &Arc<AtomicBool>,
) -> (DependencyGraph, RunSummary) {
    pre_resolve_policy(&mut graph, policy, event_log);

    if let Err(err) = std::fs::create_dir_all(&options.log_dir) {
        eprintln!("failed to create log dir {}: {err}", options.log_dir.display());
    }

    let worker_count = options.worker_count.max(1);
    let vertex_count = graph.vertex_count();
    event_log
        .lock()
        .unwrap()
        .record("run", EventKind::RunStarted { vertex_count, worker_count });

    let state = Arc::new((Mutex::new(SharedState { graph, in_flight: HashSet::new() }), Condvar::new()));
    let mut handles = Vec::with_capacity(worker_count);

    for worker_index in 0..worker_count {
        let state = Arc::clone(&state);
        let runner = Arc::clone(&runner);
        let options = options.clone();
        let event_log = Arc::clone(event_log);
        let progress = Arc::clone(&progress);
        let cancel = Arc::clone(cancel);

        handles.push(thread::spawn(move || {
            worker_loop(worker_index, state, runner, options, event_log, progress, cancel)
        }));
    }
    for handle in handles {
        handle.join().expect("scheduler worker thread panicked");
    }

    let (lock, _cond) = Arc::try_unwrap(state)
        .unwrap_or_else(|_| unreachable!("every worker thread has joined; no other clone of `state` survives"));
    let SharedState { graph, .. } = lock.into_inner().unwrap();

    let summary = summarize(&graph);
    event_log.lock().unwrap().record(
        "run",
        EventKind::RunFinished {
            passed: summary.passed,
            failed: summary.failed,
            timed_out: summary.timed_out,
            skipped: summary.skipped,
        },
    );
    (graph, summary)
}

fn pre_resolve_policy(graph: &mut DependencyGraph, policy: &Policy, event_log: &Arc<Mutex<EventLog>>) {
    let ids: Vec<PackageId> = graph.vertices().map(|p| p.id).collect();
    for id in ids {
        if graph.result_of(id) != TestResult::Untested {
            continue;
        }
        let name = graph.package(id).map(|p| p.name.clone()).unwrap_or_default();
        if policy.is_denied(&name) {
            let newly_skipped = graph.set_result(id, TestResult::Skipped);
            log_finished(event_log, &name, TestResultKind::Skipped, 0);
            log_skip_propagation(event_log, graph, &name, &newly_skipped);
        } else if policy.is_allowed(&name) {
            graph.set_result(id, TestResult::Passed);
            log_finished(event_log, &name, TestResultKind::Passed, 0);
        }
    }
}

/// Emits one `PackageSkipped` event per dependent `set_result` just drove to
/// `Skipped`, naming `failed_dependency` as the vertex whose own result
/// triggered the cascade.
fn log_skip_propagation(event_log: &Arc<Mutex<EventLog>>, graph: &DependencyGraph, failed_dependency: &str, newly_skipped: &[PackageId]) {
    if newly_skipped.is_empty() {
        return;
    }
    let mut log = event_log.lock().unwrap();
    for id in newly_skipped {
        let name = graph.package(*id).map(|p| p.name.clone()).unwrap_or_default();
        log.record(name, EventKind::PackageSkipped { failed_dependency: failed_dependency.to_string() });
    }
}

fn log_finished(event_log: &Arc<Mutex<EventLog>>, name: &str, result: TestResultKind, duration_ms: u128) {
    event_log.lock().unwrap().record(name, EventKind::PackageFinished { result, duration_ms });
}

fn worker_loop(
    worker_index: usize,
    state: Arc<(Mutex<SharedState>, Condvar)>,
    runner: Arc<dyn SandboxRunner>,
    options: RunOptions,
    event_log: Arc<Mutex<EventLog>>,
    progress: Arc<ProgressReporter>,
    cancel: Arc<AtomicBool>,
) {
    let (lock, cond) = &*state;

    loop {
        let claimed = {
            let mut guard = lock.lock().unwrap();
            loop {
                if cancel.load(Ordering::SeqCst) {
                    break None;
                }
                if let Some(id) = guard.claimable().into_iter().next() {
                    guard.in_flight.insert(id);
                    break Some(id);
                }
                if guard.stalled() {
                    break None;
                }
                // Bounded rather than indefinite: a `stopwork!` signal sets
                // `cancel` without touching this condvar, so a worker
                // parked in `wait` still needs to wake up on its own to
                // notice it.
                guard = cond.wait_timeout(guard, Duration::from_millis(200)).unwrap().0;
            }
        };

        let Some(id) = claimed else {
            // Wake any sibling still waiting so it can observe the same
            // stalled/complete state and exit too.
            cond.notify_all();
            break;
        };

        let package: Package = {
            let guard = lock.lock().unwrap();
            guard.graph.package(id).cloned().expect("claimed id must be a vertex")
        };

        event_log.lock().unwrap().record(&package.name, EventKind::PackageScheduled);
        event_log.lock().unwrap().record(&package.name, EventKind::PackageStarted);
        progress.report_started(worker_index, &package.name);

        let started = Instant::now();
        let run_result = runner.run(&package, &options.runtime_version, options.per_package_timeout);

        let result = match &run_result {
            Ok(output) => {
                write_package_log(&options.log_dir, &package.name, &output.stdout, &output.stderr);
                output.outcome.into()
            }
            Err(err) => {
                // The sandbox itself failed to launch (e.g. the runtime
                // binary is missing) rather than the package's own tests
                // failing. There is no dedicated infra-error state, so the
                // vertex is recorded as failed — its dependents still skip
                // rather than waiting on a vertex that will never complete.
                eprintln!("sandbox error for {}: {err:#}", package.name);
                TestResult::Failed
            }
        };
        let kind = TestResultKind::try_from(result).expect("runner outcomes are never Untested");
        log_finished(&event_log, &package.name, kind, started.elapsed().as_millis());

        let mut guard = lock.lock().unwrap();
        let newly_skipped = guard.graph.set_result(id, result);
        log_skip_propagation(&event_log, &guard.graph, &package.name, &newly_skipped);
        guard.in_flight.remove(&id);
        let frontier = guard.claimable().len();
        let remaining = guard.graph.vertices().filter(|p| !guard.graph.result_of(p.id).is_terminal()).count();
        drop(guard);
        cond.notify_all();

        progress.report_finished(worker_index, &package.name, result, frontier, remaining);
    }
}

/// Write one `<pkgname>.log` per tested package under the run's log
/// directory, combining stdout then stderr — independent of `events.jsonl`,
/// which records state transitions rather than process output. The
/// directory itself is created once in `run`, before any worker starts.
fn write_package_log(log_dir: &std::path::Path, package_name: &str, stdout: &str, stderr: &str) {
    let path = log_dir.join(format!("{package_name}.log"));
    if let Err(err) = std::fs::write(&path, format!("{stdout}{stderr}")) {
        eprintln!("failed to write {}: {err}", path.display());
    }
}

fn summarize(graph: &DependencyGraph) -> RunSummary {
    let mut summary = RunSummary::default();
    for package in graph.vertices() {
        match graph.result_of(package.id) {
            TestResult::Passed => summary.passed += 1,
            TestResult::Failed => summary.failed += 1,
            TestResult::TimedOut => summary.timed_out += 1,
            TestResult::Skipped => summary.skipped += 1,
            TestResult::Untested => {}
        }
    }
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::Registry;
    use crate::runner::StubSandboxRunner;
    use crate::types::RunOutcome;
    use std::path::PathBuf;
    use uuid::Uuid;

    fn registry_of(packages: Vec<Package>) -> Registry {
        Registry { name: "test".to_string(), id: Uuid::new_v4(), path: PathBuf::from("."), packages }
    }

    fn leaf(name: &str) -> Package {
        Package {
            name: name.to_string(),
            id: Uuid::new_v4(),
            metadata_path: PathBuf::from(name),
            version: Some(semver::Version::new(1, 0, 0)),
            registry_name: Some("test".to_string()),
        }
    }

    fn opts(workers: usize) -> RunOptions {
        RunOptions { worker_count: workers, runtime_version: "1.0.0".to_string(), ..RunOptions::default() }
    }

    fn no_cancel() -> Arc<AtomicBool> {
        Arc::new(AtomicBool::new(false))
    }

    #[test]
    fn all_leaves_pass_with_a_passing_runner() {
        let graph = DependencyGraph::build(&registry_of(vec![leaf("a"), leaf("b"), leaf("c")])).unwrap();
        let runner: Arc<dyn SandboxRunner> = Arc::new(StubSandboxRunner::new(RunOutcome::Passed));
        let event_log = Arc::new(Mutex::new(EventLog::new()));
        let progress = Arc::new(ProgressReporter::silent(graph.vertex_count()));

        let (graph, summary) = run(graph, runner, &Policy::default(), &opts(2), &event_log, progress, &no_cancel());
        // core/alloc/std/test also pass, so the leaves aren't the whole count.
        assert!(summary.is_success());
        assert_eq!(summary.failed, 0);
        assert!(graph.is_complete());
    }

    #[test]
    fn deny_listed_leaf_skips_without_reaching_the_runner() {
        let graph = DependencyGraph::build(&registry_of(vec![leaf("bad")])).unwrap();
        let runner: Arc<dyn SandboxRunner> = Arc::new(StubSandboxRunner::new(RunOutcome::Passed));
        let event_log = Arc::new(Mutex::new(EventLog::new()));
        let progress = Arc::new(ProgressReporter::silent(graph.vertex_count()));
        let policy = Policy::new(std::iter::empty(), ["bad".to_string()]);

        let (_graph, summary) = run(graph, runner, &policy, &opts(1), &event_log, progress, &no_cancel());
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn allow_listed_leaf_passes_without_reaching_the_runner() {
        let graph = DependencyGraph::build(&registry_of(vec![leaf("trusted")])).unwrap();
        let runner: Arc<dyn SandboxRunner> = Arc::new(StubSandboxRunner::new(RunOutcome::Failed));
        let event_log = Arc::new(Mutex::new(EventLog::new()));
        let progress = Arc::new(ProgressReporter::silent(graph.vertex_count()));
        let policy = Policy::new(["trusted".to_string()], std::iter::empty());

        let (_graph, summary) = run(graph, runner, &policy, &opts(1), &event_log, progress, &no_cancel());
        assert_eq!(summary.passed, summary.total());
    }

    #[test]
    fn run_emits_start_and_finish_events_with_final_tallies() {
        let graph = DependencyGraph::build(&registry_of(vec![leaf("a")])).unwrap();
        let runner: Arc<dyn SandboxRunner> = Arc::new(StubSandboxRunner::new(RunOutcome::Passed));
        let event_log = Arc::new(Mutex::new(EventLog::new()));
        let progress = Arc::new(ProgressReporter::silent(graph.vertex_count()));

        let (_graph, summary) = run(graph, runner, &Policy::default(), &opts(1), &event_log, progress, &no_cancel());

        let log = event_log.lock().unwrap();
        let events = log.events_for_test();
        assert!(matches!(events.first().map(|e| &e.kind), Some(EventKind::RunStarted { .. })));
        let EventKind::RunFinished { passed, .. } = &events.last().unwrap().kind else {
            panic!("expected the last event to be RunFinished");
        };
        assert_eq!(*passed, summary.passed);
    }

    #[test]
    fn deny_listed_root_emits_package_skipped_for_its_dependent() {
        let graph = DependencyGraph::build(&registry_of(vec![])).unwrap();
        let runner: Arc<dyn SandboxRunner> = Arc::new(StubSandboxRunner::new(RunOutcome::Passed));
        let event_log = Arc::new(Mutex::new(EventLog::new()));
        let progress = Arc::new(ProgressReporter::silent(graph.vertex_count()));
        let policy = Policy::new(std::iter::empty(), ["std".to_string()]);

        let (_graph, summary) = run(graph, runner, &policy, &opts(1), &event_log, progress, &no_cancel());
        assert_eq!(summary.skipped, 2);

        let log = event_log.lock().unwrap();
        let skipped_test = log.events_for_test().iter().any(|e| {
            e.package == "test" && matches!(&e.kind, EventKind::PackageSkipped { failed_dependency } if failed_dependency == "std")
        });
        assert!(skipped_test, "expected a PackageSkipped event for `test` naming `std` as the failed dependency");
    }

    #[test]
    fn single_worker_serializes_without_deadlock() {
        let graph = DependencyGraph::build(&registry_of(vec![leaf("x"), leaf("y")])).unwrap();
        let runner: Arc<dyn SandboxRunner> = Arc::new(StubSandboxRunner::new(RunOutcome::Passed));
        let event_log = Arc::new(Mutex::new(EventLog::new()));
        let progress = Arc::new(ProgressReporter::silent(graph.vertex_count()));

        let (graph, _summary) = run(graph, runner, &Policy::default(), &opts(1), &event_log, progress, &no_cancel());
        assert!(graph.is_complete());
    }
}
