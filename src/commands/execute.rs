use std::fs;

use anyhow::{Result, bail};
use chrono::Utc;
use tracing::{info, warn};

use crate::catalog::{ExistenceCheck, SqliteCatalog};
use crate::cli::ExecuteArgs;
use crate::config::{PipelineConfig, load_config};
use crate::executor::{BatchExecutor, BatchSummary, ExecutionUnit, FailurePolicy};
use crate::logging::RunLog;
use crate::model::{ExecuteCounts, ExecuteRunManifest};
use crate::specialize::read_title;
use crate::store::list_scripts;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

pub fn run(args: ExecuteArgs, run_log: Option<&RunLog>) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("execute-{}", utc_compact_string(started_ts));

    let config = load_config(&args.common.config)?;
    let locales = config.resolve_locales(&args.locale)?;
    let skip_existing = !args.include_existing;
    let policy = if args.fail_fast {
        FailurePolicy::AbortOnFirst
    } else {
        FailurePolicy::Continue
    };

    info!(
        run_id = %run_id,
        locales = %locales.join(","),
        skip_existing,
        fail_fast = args.fail_fast,
        "starting execution"
    );

    let summary = execute_locales(&config, &locales, skip_existing, policy, args.quiet, run_log)?;

    let counts = ExecuteCounts {
        scripts_total: summary.skipped + summary.succeeded + summary.failed + summary.not_run,
        executed_ok: summary.succeeded,
        executed_failed: summary.failed,
        skipped_existing: summary.skipped,
        not_run: summary.not_run,
    };
    let status = if summary.is_success() { "completed" } else { "failed" };
    let manifest = ExecuteRunManifest {
        manifest_version: 1,
        run_id,
        locales,
        status: status.to_string(),
        started_at,
        updated_at: now_utc_string(),
        skip_existing,
        log_path: run_log.map(|log| log.path().display().to_string()),
        counts,
        results: summary.results,
    };
    let manifest_path = args
        .common
        .manifest_dir()
        .join(format!("execute_{}.json", utc_compact_string(started_ts)));
    write_json_pretty(&manifest_path, &manifest)?;
    info!(path = %manifest_path.display(), "wrote execution manifest");

    if manifest.counts.executed_failed > 0 || manifest.counts.not_run > 0 {
        bail!(
            "{} of {} scripts failed ({} not run)",
            manifest.counts.executed_failed,
            manifest.counts.scripts_total,
            manifest.counts.not_run
        );
    }
    Ok(())
}

/// Runs every stored script of `locales`, locale by locale, in lexical
/// filename order.
pub fn execute_locales(
    config: &PipelineConfig,
    locales: &[String],
    skip_existing: bool,
    policy: FailurePolicy,
    quiet: bool,
    run_log: Option<&RunLog>,
) -> Result<BatchSummary> {
    let mut units = Vec::new();
    for locale in locales {
        let scripts = list_scripts(&config.output_dir, locale)?;
        info!(locale = %locale, scripts = scripts.len(), "collected scripts");
        for path in scripts {
            let skip_key = match fs::read_to_string(&path) {
                Ok(source) => read_title(&source, &config.template),
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to read script title");
                    None
                }
            };
            units.push(ExecutionUnit::for_script(
                &path,
                &config.execution.interpreter,
                skip_key,
            ));
        }
    }

    if units.is_empty() {
        warn!(output_dir = %config.output_dir.display(), "no scripts to execute");
        return Ok(BatchSummary::default());
    }

    let catalog = if skip_existing { open_catalog(config) } else { None };

    let mut executor = BatchExecutor::new(policy).run_log(run_log);
    if quiet {
        executor = executor.quiet();
    }
    if let Some(catalog) = catalog.as_ref() {
        executor = executor.skip_existing(catalog as &dyn ExistenceCheck);
    }
    Ok(executor.run(&units))
}

/// The lesson catalog, or `None` when none is configured, created or usable
/// yet. Without a catalog every script runs.
fn open_catalog(config: &PipelineConfig) -> Option<SqliteCatalog> {
    let Some(db_path) = config.execution.db_path.as_deref() else {
        info!("no catalog configured; every script will run");
        return None;
    };
    if !db_path.exists() {
        info!(path = %db_path.display(), "catalog not created yet; every script will run");
        return None;
    }

    match SqliteCatalog::open(
        db_path,
        &config.execution.lesson_table,
        &config.execution.title_column,
    ) {
        Ok(catalog) => Some(catalog),
        Err(err) => {
            warn!(
                path = %db_path.display(),
                error = %format!("{err:#}"),
                "catalog unusable; every script will run"
            );
            None
        }
    }
}
