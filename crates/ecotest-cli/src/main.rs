use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};

use ecotest::analysis;
use ecotest::config::{CliOverrides, EcotestConfig};
use ecotest::events::{EventKind, EventLog, events_path};
use ecotest::graph::{DependencyGraph, GraphWarning};
use ecotest::package::Registry;
use ecotest::policy::Policy;
use ecotest::progress::ProgressReporter;
use ecotest::runner::{ProcessSandboxRunner, SandboxRunner};
use ecotest::runtime::{CatalogueDownloader, RuntimeCatalogue, RuntimeInstaller};
use ecotest::scheduler::{self, RunSummary};
use ecotest::types::FailureImpact;

#[derive(Parser, Debug)]
#[command(name = "ecotest", version)]
#[command(about = "Dependency-aware parallel test-suite evaluator for a package ecosystem")]
struct Cli {
    /// Path to the registry root (containing Registry.toml)
    #[arg(long, default_value = ".")]
    registry: PathBuf,

    /// Directory for logs, events, and the report (default: .ecotest)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the full test suite across the registry.
    Run {
        /// Directory holding installed runtime versions, `<version>/bin/runtime`.
        #[arg(long, default_value = ".ecotest/runtimes")]
        runtime_dir: PathBuf,

        /// Runtime version to test against.
        #[arg(long)]
        runtime_version: String,

        /// Path to the runtime-version catalogue TOML.
        #[arg(long, default_value = ".ecotest/runtime-catalogue.toml")]
        catalogue: PathBuf,

        /// Number of worker threads; defaults to the configured or detected value.
        #[arg(long)]
        workers: Option<usize>,

        /// Per-package wall-clock budget (e.g. 30s, 5m).
        #[arg(long)]
        timeout: Option<String>,

        /// Suppress the interactive progress bar even on a TTY.
        #[arg(long)]
        quiet: bool,
    },
    /// Print a previous run's ranked failure-impact report.
    Analyze {
        /// Only show packages that failed or timed out directly, not their
        /// skipped dependents.
        #[arg(long)]
        root_causes_only: bool,
    },
    /// Write a default `.ecotest.toml` to the current directory.
    Init,
}

/// The on-disk summary written after every run, read back by `analyze`.
#[derive(Debug, Serialize, Deserialize)]
struct Report {
    passed: usize,
    failed: usize,
    timed_out: usize,
    skipped: usize,
    failures: Vec<FailureImpact>,
}

impl From<(RunSummary, Vec<FailureImpact>)> for Report {
    fn from((summary, failures): (RunSummary, Vec<FailureImpact>)) -> Self {
        Report {
            passed: summary.passed,
            failed: summary.failed,
            timed_out: summary.timed_out,
            skipped: summary.skipped,
            failures,
        }
    }
}

const REPORT_FILE: &str = "report.json";

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = EcotestConfig::load_from_root(&cli.registry)?.unwrap_or_default();

    match cli.cmd {
        Commands::Run { runtime_dir, runtime_version, catalogue, workers, timeout, quiet } => {
            run_command(&cli.registry, cli.log_dir, config, runtime_dir, runtime_version, catalogue, workers, timeout, quiet)
        }
        Commands::Analyze { root_causes_only } => analyze_command(&cli.registry, cli.log_dir, config, root_causes_only),
        Commands::Init => init_command(&cli.registry),
    }
}

#[allow(clippy::too_many_arguments)]
fn run_command(
    registry_path: &PathBuf,
    log_dir_override: Option<PathBuf>,
    config: EcotestConfig,
    runtime_dir: PathBuf,
    runtime_version: String,
    catalogue_path: PathBuf,
    workers: Option<usize>,
    timeout: Option<String>,
    quiet: bool,
) -> Result<()> {
    let per_package_timeout = timeout
        .as_deref()
        .map(humantime::parse_duration)
        .transpose()
        .context("invalid --timeout value")?;

    let log_dir = resolve_log_dir(registry_path, log_dir_override, &config);
    let overrides = CliOverrides { workers, runtime_version: None, per_package_timeout, log_dir: Some(log_dir) };
    let options = config.build_run_options(overrides, runtime_version);

    let registry = Registry::load(registry_path).context("failed to load registry")?;
    let graph = DependencyGraph::build(&registry).context("failed to build dependency graph")?;
    let vertex_count = graph.vertex_count();

    install_runtime(&catalogue_path, &runtime_dir, &options.runtime_version, &options.install_retry)?;
    let runner: Arc<dyn SandboxRunner> = Arc::new(ProcessSandboxRunner::new(&runtime_dir));
    let policy = Policy::compiled();
    let event_log = Arc::new(Mutex::new(EventLog::new()));
    record_graph_warnings(&event_log, graph.warnings());
    let progress = Arc::new(if quiet {
        ProgressReporter::silent(vertex_count)
    } else {
        ProgressReporter::new(vertex_count, options.worker_count)
    });

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_for_handler = Arc::clone(&cancel);
    ctrlc::set_handler(move || {
        cancel_for_handler.store(true, std::sync::atomic::Ordering::SeqCst);
    })
    .context("failed to install Ctrl+C handler")?;

    let (graph, summary) = scheduler::run(graph, runner, &policy, &options, &event_log, progress, &cancel);

    event_log
        .lock()
        .unwrap()
        .flush_to_file(&events_path(&options.log_dir))
        .context("failed to flush event log")?;

    let failures = analysis::rank_failures(&graph);
    let report: Report = (summary, failures).into();
    write_report(&options.log_dir, &report)?;
    print_summary(&report);

    if summary.is_success() {
        Ok(())
    } else {
        std::process::exit(1);
    }
}

/// Installs the requested runtime version once, up front, before any worker
/// starts — the single shared read-only artifact every sandboxed test run
/// executes against.
fn install_runtime(catalogue_path: &Path, runtime_dir: &Path, version: &str, retry: &ecotest_retry::RetryStrategyConfig) -> Result<()> {
    let catalogue = RuntimeCatalogue::load(catalogue_path)
        .with_context(|| format!("failed to load runtime catalogue {}", catalogue_path.display()))?;
    let entry = catalogue.entry(version)?;
    let expected_sha256 = entry.sha256.clone();
    let installer = RuntimeInstaller::new(Box::new(CatalogueDownloader::new(catalogue)), runtime_dir, retry.clone());
    installer
        .ensure_installed(version, Some(&expected_sha256))
        .with_context(|| format!("failed to install runtime {version}"))?;
    Ok(())
}

/// Surface anomalies found while building the dependency graph (unloadable
/// `Deps.toml` metadata, broken cycles) into the same event log as the run
/// itself, so `events.jsonl` alone explains every edge the scheduler saw.
fn record_graph_warnings(event_log: &Arc<Mutex<EventLog>>, warnings: &[GraphWarning]) {
    let mut log = event_log.lock().unwrap();
    for warning in warnings {
        match warning {
            GraphWarning::UnloadableDependencyMetadata { package } => {
                log.record(package.clone(), EventKind::UnloadableDependencyMetadata { package: package.clone() });
            }
            GraphWarning::CycleBroken { from, to } => {
                log.record(from.clone(), EventKind::DependencyCycleBroken { from: from.clone(), to: to.clone() });
            }
        }
    }
}

fn analyze_command(registry_path: &PathBuf, log_dir_override: Option<PathBuf>, config: EcotestConfig, root_causes_only: bool) -> Result<()> {
    let log_dir = resolve_log_dir(registry_path, log_dir_override, &config);
    let report = read_report(&log_dir)?;

    let failures = if root_causes_only {
        report
            .failures
            .into_iter()
            .filter(|f| matches!(f.result, ecotest::types::TestResultKind::Failed | ecotest::types::TestResultKind::TimedOut))
            .collect()
    } else {
        report.failures
    };

    if failures.is_empty() {
        println!("no failures to report");
        return Ok(());
    }

    println!("{:<32} {:<10} {:>12} {:>12}", "package", "result", "dependents", "skipped");
    for failure in failures {
        println!(
            "{:<32} {:<10?} {:>12} {:>12}",
            failure.package_name, failure.result, failure.transitive_dependents, failure.skipped_dependents
        );
    }
    Ok(())
}

fn init_command(registry_path: &PathBuf) -> Result<()> {
    let path = registry_path.join(ecotest::config::CONFIG_FILE);
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    std::fs::write(&path, ecotest::config::default_toml_template())
        .with_context(|| format!("failed to write {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

/// An explicit `--log-dir` is used as-is; otherwise the configured log dir
/// is resolved relative to the registry root, not the process's CWD, so
/// `run` and `analyze` agree on where `report.json` lives regardless of
/// where `ecotest` is invoked from.
fn resolve_log_dir(registry_path: &Path, log_dir_override: Option<PathBuf>, config: &EcotestConfig) -> PathBuf {
    log_dir_override.unwrap_or_else(|| registry_path.join(&config.log.dir))
}

fn write_report(log_dir: &PathBuf, report: &Report) -> Result<()> {
    std::fs::create_dir_all(log_dir).with_context(|| format!("failed to create {}", log_dir.display()))?;
    let path = log_dir.join(REPORT_FILE);
    let json = serde_json::to_string_pretty(report).context("failed to serialize report")?;
    std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn read_report(log_dir: &PathBuf) -> Result<Report> {
    let path = log_dir.join(REPORT_FILE);
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("no report found at {} — run `ecotest run` first", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_summary(report: &Report) {
    println!(
        "passed={} failed={} timed_out={} skipped={}",
        report.passed, report.failed, report.timed_out, report.skipped
    );
}
