mod commands;
mod logging;
mod progress;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{split_patterns, Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use rosie_core::events::{CorrectionAdded, DomainEvent, PlanFinalized, PlanProposed};
use rosie_core::scanner::scan_and_emit;
use rosie_core::{
    replay, AppConfig, EventLog, IncrementalScheduler, Plan, PlanProjection, PlanStatus, RuleSet,
};
use tracing::{error, info};

fn main() -> Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match rosie_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    match args.command {
        Some(Commands::Scan {
            root,
            include,
            exclude,
        }) => run_scan(&config, &root, include.as_deref(), exclude.as_deref()),
        Some(Commands::Run) => run_pass(&config),
        Some(Commands::Watch) => run_watch(&config),
        Some(Commands::Plan { out, propose }) => run_plan(&config, out.as_deref(), propose),
        Some(Commands::Correct {
            plan_id,
            note,
            paths,
        }) => run_correct(&config, plan_id, note, paths),
        Some(Commands::Approve { plan_id }) => run_approve(&config, &plan_id),
        Some(Commands::Events { since }) => run_events(&config, since),
        Some(Commands::Audit) => run_audit(&config),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
            Ok(())
        }
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    }
}

fn open_log(config: &AppConfig) -> Result<EventLog> {
    EventLog::open(&config.db_path)
        .with_context(|| format!("opening event log at {}", config.db_path))
}

fn materialize_plan(config: &AppConfig, log: &EventLog) -> Result<Plan> {
    let mut view = PlanProjection::new(config.shape_limits());
    replay(&mut view, log, 0)?;
    Ok(view.current_plan())
}

fn build_scheduler(config: &AppConfig, log: Arc<EventLog>) -> Result<IncrementalScheduler> {
    let scheduler = IncrementalScheduler::resume(log, config.shape_limits())?;
    match &config.rules_path {
        Some(path) => {
            let rules = RuleSet::load(path).with_context(|| format!("loading rules from {}", path))?;
            info!("{} rules attached", rules.rules().len());
            Ok(scheduler.with_rules(Arc::new(rules)))
        }
        None => Ok(scheduler),
    }
}

fn run_scan(
    config: &AppConfig,
    root: &Path,
    include: Option<&str>,
    exclude: Option<&str>,
) -> Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("resolving scan root {}", root.display()))?;
    let include = include.map_or_else(|| config.include_patterns.clone(), split_patterns);
    let exclude = exclude.map_or_else(|| config.exclude_patterns.clone(), split_patterns);

    let log = open_log(config)?;
    let reporter = CliReporter::new();
    let total = scan_and_emit(
        &log,
        &root,
        &include,
        &exclude,
        config.scan_batch_size,
        &reporter,
    )?;
    info!(
        "{} entries recorded under {}",
        format!("{}", total).green(),
        root.display()
    );
    Ok(())
}

fn run_pass(config: &AppConfig) -> Result<()> {
    let log = Arc::new(open_log(config)?);
    let scheduler = build_scheduler(config, log)?;
    let outcome = scheduler.run_once()?;
    let stats = scheduler.run_stats()?;
    info!(
        "{} events processed, {} rule matches emitted (full invalidation: {})",
        format!("{}", outcome.events_processed).cyan(),
        format!("{}", outcome.rule_matches_emitted).cyan(),
        outcome.full_invalidation,
    );
    info!(
        "Stage runs: scanner {}, rules {} ({} paths), clusters {} ({} paths)",
        stats.scanner_runs,
        stats.rule_runs,
        stats.rule_paths_evaluated,
        stats.cluster_runs,
        stats.cluster_paths_evaluated,
    );
    if let Some(plan_id) = scheduler.current_plan_id() {
        info!("Current plan: {}", plan_id.yellow());
    }
    Ok(())
}

fn run_watch(config: &AppConfig) -> Result<()> {
    let log = Arc::new(open_log(config)?);
    let scheduler = Arc::new(build_scheduler(config, log)?);
    let poll_interval = config.poll_interval();

    let worker = {
        let scheduler = Arc::clone(&scheduler);
        thread::spawn(move || scheduler.run_forever(poll_interval))
    };

    eprintln!("Watching for new events. Press Enter to stop.");
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    scheduler.stop();
    if worker.join().is_err() {
        bail!("scheduler thread panicked");
    }

    let stats = scheduler.run_stats()?;
    info!(
        "Stopped after {} rule runs and {} cluster runs",
        stats.rule_runs, stats.cluster_runs
    );
    Ok(())
}

fn run_plan(config: &AppConfig, out: Option<&Path>, propose: bool) -> Result<()> {
    let log = open_log(config)?;
    let plan = materialize_plan(config, &log)?;
    let json = serde_json::to_string_pretty(&plan)?;

    match out {
        Some(path) => {
            fs::write(path, &json).with_context(|| format!("writing plan to {}", path.display()))?;
            info!(
                "Plan {} with {} items written to {}",
                plan.id.yellow(),
                plan.len(),
                path.display()
            );
        }
        None => println!("{}", json),
    }

    if propose {
        let id = log.append(&DomainEvent::PlanProposed(PlanProposed {
            plan_id: plan.id.clone(),
            item_ids: plan.item_ids(),
        }))?;
        info!("Plan proposed as event #{}", id);
    }
    Ok(())
}

fn run_correct(config: &AppConfig, plan_id: String, note: String, paths: Vec<PathBuf>) -> Result<()> {
    let log = open_log(config)?;
    let id = log.append(&DomainEvent::CorrectionAdded(CorrectionAdded {
        plan_id,
        note,
        paths,
    }))?;
    info!("Correction recorded as event #{}", id);
    Ok(())
}

fn run_approve(config: &AppConfig, plan_id: &str) -> Result<()> {
    let log = open_log(config)?;
    let plan = materialize_plan(config, &log)?;
    if plan.id != plan_id {
        bail!(
            "plan {} is not the current plan (current is {})",
            plan_id,
            plan.id
        );
    }

    let mut status = PlanStatus::new();
    replay(&mut status, &log, 0)?;
    if status.is_finalized(plan_id) {
        info!("Plan {} is already finalized", plan_id.yellow());
        return Ok(());
    }

    let id = log.append(&DomainEvent::PlanFinalized(PlanFinalized {
        plan_id: plan.id.clone(),
        approved_item_ids: plan.item_ids(),
    }))?;
    info!(
        "Plan {} finalized with {} items (event #{})",
        plan.id.yellow(),
        plan.len(),
        id
    );
    Ok(())
}

fn run_events(config: &AppConfig, since: i64) -> Result<()> {
    let log = open_log(config)?;
    for record in log.read_since(since)? {
        println!(
            "{:>6} {} {} {}",
            format!("#{}", record.id).dimmed(),
            record.ts,
            record.event_type.cyan(),
            record.data
        );
    }
    Ok(())
}

fn run_audit(config: &AppConfig) -> Result<()> {
    let log = open_log(config)?;
    let report = log.audit()?;
    for mismatch in &report.mismatches {
        println!(
            "{} event #{}: stored {}, computed {}",
            "MISMATCH".red(),
            mismatch.id,
            mismatch.expected,
            mismatch.actual
        );
    }
    let checked = report.into_result()?;
    println!("{} {} events verified", "OK".green(), checked);
    Ok(())
}
