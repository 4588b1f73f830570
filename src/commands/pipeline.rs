use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::cli::{CommonArgs, PipelineArgs};
use crate::commands::execute::execute_locales;
use crate::config::load_config;
use crate::executor::{BatchExecutor, BatchSummary, ExecutionUnit, FailurePolicy};
use crate::logging::RunLog;
use crate::model::{GenerateRunManifest, PipelineCounts, PipelineRunManifest};
use crate::util::{now_utc_string, read_json, utc_compact_string, write_json_pretty};

const EXECUTE_STAGE: &str = "execute";

pub fn run(args: PipelineArgs, run_log: Option<&RunLog>) -> Result<()> {
    let started_ts = Utc::now();
    let ts = utc_compact_string(started_ts);

    let config = load_config(&args.common.config)?;
    let locales = config.resolve_locales(&args.locale)?;

    let mut manifest = PipelineRunManifest {
        manifest_version: 1,
        run_id: format!("pipeline-{ts}"),
        status: "running".to_string(),
        started_at: now_utc_string(),
        updated_at: now_utc_string(),
        stages: planned_stages(&locales, args.skip_generation, args.skip_execution),
        completed_stages: Vec::new(),
        failed_stage: None,
        failure_reason: None,
        log_path: run_log.map(|log| log.path().display().to_string()),
        counts: PipelineCounts::default(),
    };
    let manifest_path = args.common.manifest_dir().join(format!("pipeline_{ts}.json"));

    info!(
        run_id = %manifest.run_id,
        locales = %locales.join(","),
        stages = %manifest.stages.join(","),
        "starting pipeline"
    );

    let generation = if args.skip_generation {
        info!("generation skipped by request");
        Vec::new()
    } else {
        let exe = env::current_exe().context("failed to locate the running executable")?;
        locales
            .iter()
            .map(|locale| {
                let child_manifest = args
                    .common
                    .manifest_dir()
                    .join(format!("generate_{locale}_{ts}.json"));
                let unit = generation_unit(&exe, &args.common, locale, &child_manifest);
                (unit, child_manifest)
            })
            .collect()
    };

    let execution = if args.skip_execution {
        info!("execution skipped by request");
        None
    } else {
        Some(|| {
            execute_locales(
                &config,
                &locales,
                !args.include_existing,
                FailurePolicy::Continue,
                args.quiet,
                run_log,
            )
        })
    };

    let mut executor = BatchExecutor::new(FailurePolicy::AbortOnFirst).run_log(run_log);
    if args.quiet {
        executor = executor.quiet();
    }

    let stages = Stages {
        generation: &generation,
        executor: &executor,
        manifest_path: &manifest_path,
    };
    stages.run(&mut manifest, execution)
}

/// The ordered stages of one pipeline run: generation children first, then
/// the execution stage.
struct Stages<'a> {
    /// One child per locale, paired with the manifest path it reports to.
    generation: &'a [(ExecutionUnit, PathBuf)],
    executor: &'a BatchExecutor<'a>,
    manifest_path: &'a Path,
}

impl Stages<'_> {
    /// Runs generation, then `execution` unless a generation child failed.
    /// The manifest is written on every path out of the run.
    fn run<E>(&self, manifest: &mut PipelineRunManifest, execution: Option<E>) -> Result<()>
    where
        E: FnOnce() -> Result<BatchSummary>,
    {
        if !self.generation.is_empty() {
            let batch: Vec<ExecutionUnit> =
                self.generation.iter().map(|(unit, _)| unit.clone()).collect();
            let summary = self.executor.run(&batch);

            for ((unit, child_manifest), result) in self.generation.iter().zip(&summary.results) {
                absorb_generation_manifest(&mut manifest.counts, child_manifest);
                if result.succeeded() {
                    manifest.completed_stages.push(unit.id.clone());
                }
            }

            if let Some(failed) = summary.aborted_at.as_ref() {
                let reason = match summary.results.last().and_then(|result| result.exit_code) {
                    Some(code) => format!("{failed} exited with status {code}"),
                    None => format!("{failed} did not run to completion"),
                };
                error!(
                    stage = %failed,
                    reason = %reason,
                    "generation stage failed; execution not started"
                );
                manifest.failed_stage = Some(failed.clone());
                manifest.failure_reason = Some(reason.clone());
                finish(manifest, self.manifest_path, "failed")?;
                bail!("pipeline stopped at {failed}: {reason}");
            }
        }

        if let Some(execute) = execution {
            match execute() {
                Ok(summary) => {
                    manifest.counts.executed_ok = summary.succeeded;
                    manifest.counts.executed_failed = summary.failed;
                    manifest.counts.skipped_existing = summary.skipped;
                    if summary.failed == 0 {
                        manifest.completed_stages.push(EXECUTE_STAGE.to_string());
                    } else {
                        manifest.failed_stage = Some(EXECUTE_STAGE.to_string());
                        manifest.failure_reason =
                            Some(format!("{} scripts failed", summary.failed));
                    }
                }
                Err(err) => {
                    let reason = format!("{err:#}");
                    error!(stage = EXECUTE_STAGE, reason = %reason, "execution stage failed");
                    manifest.failed_stage = Some(EXECUTE_STAGE.to_string());
                    manifest.failure_reason = Some(reason);
                    log_summary(&manifest.counts);
                    finish(manifest, self.manifest_path, "failed")?;
                    return Err(err.context("execution stage failed"));
                }
            }
        }

        log_summary(&manifest.counts);

        let executed_failed = manifest.counts.executed_failed;
        let status = if executed_failed > 0 { "failed" } else { "completed" };
        finish(manifest, self.manifest_path, status)?;

        if executed_failed > 0 {
            bail!("{executed_failed} scripts failed during execution");
        }
        Ok(())
    }
}

fn log_summary(counts: &PipelineCounts) {
    info!(
        generated = counts.generated,
        already_generated = counts.already_generated,
        generation_failed = counts.generation_failed,
        input_errors = counts.input_errors,
        backend_errors = counts.backend_errors,
        io_errors = counts.io_errors,
        executed_ok = counts.executed_ok,
        executed_failed = counts.executed_failed,
        skipped_existing = counts.skipped_existing,
        "pipeline summary"
    );
}

fn planned_stages(locales: &[String], skip_generation: bool, skip_execution: bool) -> Vec<String> {
    let mut stages = Vec::new();
    if !skip_generation {
        stages.extend(locales.iter().map(|locale| generation_stage_id(locale)));
    }
    if !skip_execution {
        stages.push(EXECUTE_STAGE.to_string());
    }
    stages
}

fn generation_stage_id(locale: &str) -> String {
    format!("generate:{locale}")
}

/// Child invocation of this binary that generates one locale. The child logs
/// to its stderr only; the executor relays those lines into this run's log.
fn generation_unit(
    exe: &Path,
    common: &CommonArgs,
    locale: &str,
    manifest_path: &Path,
) -> ExecutionUnit {
    ExecutionUnit {
        id: generation_stage_id(locale),
        program: exe.display().to_string(),
        args: vec![
            "generate".to_string(),
            "--locale".to_string(),
            locale.to_string(),
            "--config".to_string(),
            common.config.display().to_string(),
            "--work-root".to_string(),
            common.work_root.display().to_string(),
            "--no-log-file".to_string(),
            "--manifest-path".to_string(),
            manifest_path.display().to_string(),
        ],
        skip_key: None,
    }
}

fn absorb_generation_manifest(counts: &mut PipelineCounts, path: &Path) {
    if !path.exists() {
        warn!(path = %path.display(), "generation manifest missing; counts not aggregated");
        return;
    }
    match read_json::<GenerateRunManifest>(path) {
        Ok(child) => {
            let c = child.counts;
            counts.already_generated += c.already_generated;
            counts.generated += c.generated;
            counts.generation_failed += c.generation_failed;
            counts.input_errors += c.input_errors;
            counts.backend_errors += c.backend_errors;
            counts.io_errors += c.io_errors;
        }
        Err(err) => warn!(
            path = %path.display(),
            error = %format!("{err:#}"),
            "unreadable generation manifest"
        ),
    }
}

fn finish(manifest: &mut PipelineRunManifest, path: &Path, status: &str) -> Result<()> {
    manifest.status = status.to_string();
    manifest.updated_at = now_utc_string();
    write_json_pretty(path, manifest)?;
    info!(path = %path.display(), status, "wrote pipeline manifest");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::model::GenerateCounts;

    fn common(root: &Path) -> CommonArgs {
        CommonArgs {
            config: PathBuf::from("lessongen.toml"),
            work_root: root.to_path_buf(),
            log_file: None,
            no_log_file: false,
        }
    }

    fn child_manifest(locale: &str, counts: GenerateCounts) -> GenerateRunManifest {
        GenerateRunManifest {
            manifest_version: 1,
            run_id: format!("generate-{locale}"),
            locale: locale.to_string(),
            status: "completed".to_string(),
            started_at: String::new(),
            updated_at: String::new(),
            command: String::new(),
            topics_path: String::new(),
            template_path: String::new(),
            template_sha256: String::new(),
            output_dir: String::new(),
            counts,
            written_scripts: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn pipeline_manifest(stages: Vec<String>) -> PipelineRunManifest {
        PipelineRunManifest {
            manifest_version: 1,
            run_id: "pipeline-test".to_string(),
            status: "running".to_string(),
            started_at: String::new(),
            updated_at: String::new(),
            stages,
            completed_stages: Vec::new(),
            failed_stage: None,
            failure_reason: None,
            log_path: None,
            counts: PipelineCounts::default(),
        }
    }

    /// A generation child that exits with `code` after writing its manifest.
    fn shell_generation(dir: &Path, locale: &str, code: i32) -> (ExecutionUnit, PathBuf) {
        let child = dir.join(format!("generate_{locale}.json"));
        write_json_pretty(
            &child,
            &child_manifest(
                locale,
                GenerateCounts {
                    generated: 1,
                    ..GenerateCounts::default()
                },
            ),
        )
        .unwrap();
        let unit = ExecutionUnit {
            id: generation_stage_id(locale),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), format!("exit {code}")],
            skip_key: None,
        };
        (unit, child)
    }

    fn executed(succeeded: usize, failed: usize) -> Result<BatchSummary> {
        Ok(BatchSummary {
            succeeded,
            failed,
            ..BatchSummary::default()
        })
    }

    #[cfg(unix)]
    #[test]
    fn failed_generation_stops_before_execution() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let generation = vec![
            shell_generation(dir.path(), "en", 1),
            shell_generation(dir.path(), "vi", 0),
        ];
        let executor = BatchExecutor::new(FailurePolicy::AbortOnFirst).quiet();
        let stages = Stages {
            generation: &generation,
            executor: &executor,
            manifest_path: &path,
        };
        let locales = vec!["en".to_string(), "vi".to_string()];
        let mut manifest = pipeline_manifest(planned_stages(&locales, false, false));
        let execution_started = Cell::new(false);

        let err = stages
            .run(
                &mut manifest,
                Some(|| {
                    execution_started.set(true);
                    executed(1, 0)
                }),
            )
            .unwrap_err();

        assert!(format!("{err:#}").contains("generate:en"));
        assert!(!execution_started.get());
        assert_eq!(manifest.failed_stage.as_deref(), Some("generate:en"));
        assert_eq!(
            manifest.failure_reason.as_deref(),
            Some("generate:en exited with status 1")
        );
        assert!(manifest.completed_stages.is_empty());

        let written: PipelineRunManifest = read_json(&path).unwrap();
        assert_eq!(written.status, "failed");
        assert_eq!(written.failed_stage.as_deref(), Some("generate:en"));
        assert_eq!(written.counts.generated, 1);
    }

    #[cfg(unix)]
    #[test]
    fn successful_stages_complete_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let generation = vec![
            shell_generation(dir.path(), "en", 0),
            shell_generation(dir.path(), "vi", 0),
        ];
        let executor = BatchExecutor::new(FailurePolicy::AbortOnFirst).quiet();
        let stages = Stages {
            generation: &generation,
            executor: &executor,
            manifest_path: &path,
        };
        let locales = vec!["en".to_string(), "vi".to_string()];
        let mut manifest = pipeline_manifest(planned_stages(&locales, false, false));

        stages.run(&mut manifest, Some(|| executed(3, 0))).unwrap();

        assert_eq!(manifest.completed_stages, manifest.stages);
        assert_eq!(manifest.counts.generated, 2);
        assert_eq!(manifest.counts.executed_ok, 3);
        let written: PipelineRunManifest = read_json(&path).unwrap();
        assert_eq!(written.status, "completed");
        assert!(written.failed_stage.is_none());
    }

    #[test]
    fn execution_error_is_recorded_as_a_failed_stage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let executor = BatchExecutor::new(FailurePolicy::AbortOnFirst);
        let stages = Stages {
            generation: &[],
            executor: &executor,
            manifest_path: &path,
        };
        let mut manifest = pipeline_manifest(vec![EXECUTE_STAGE.to_string()]);

        let err = stages
            .run(
                &mut manifest,
                Some(|| -> Result<BatchSummary> { bail!("output directory unreadable") }),
            )
            .unwrap_err();

        assert!(format!("{err:#}").contains("output directory unreadable"));
        assert_eq!(manifest.failed_stage.as_deref(), Some(EXECUTE_STAGE));
        assert_eq!(
            manifest.failure_reason.as_deref(),
            Some("output directory unreadable")
        );
        let written: PipelineRunManifest = read_json(&path).unwrap();
        assert_eq!(written.status, "failed");
    }

    #[test]
    fn failed_scripts_fail_the_pipeline_after_the_manifest_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let executor = BatchExecutor::new(FailurePolicy::AbortOnFirst);
        let stages = Stages {
            generation: &[],
            executor: &executor,
            manifest_path: &path,
        };
        let mut manifest = pipeline_manifest(vec![EXECUTE_STAGE.to_string()]);

        assert!(stages.run(&mut manifest, Some(|| executed(2, 1))).is_err());

        let written: PipelineRunManifest = read_json(&path).unwrap();
        assert_eq!(written.status, "failed");
        assert_eq!(written.failed_stage.as_deref(), Some(EXECUTE_STAGE));
        assert_eq!(written.failure_reason.as_deref(), Some("1 scripts failed"));
        assert_eq!((written.counts.executed_ok, written.counts.executed_failed), (2, 1));
    }

    #[test]
    fn skipped_stages_run_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let executor = BatchExecutor::new(FailurePolicy::AbortOnFirst);
        let stages = Stages {
            generation: &[],
            executor: &executor,
            manifest_path: &path,
        };
        let locales = vec!["en".to_string()];
        let mut manifest = pipeline_manifest(planned_stages(&locales, true, true));

        stages
            .run(&mut manifest, None::<fn() -> Result<BatchSummary>>)
            .unwrap();

        assert!(manifest.stages.is_empty());
        assert!(manifest.completed_stages.is_empty());
        let written: PipelineRunManifest = read_json(&path).unwrap();
        assert_eq!(written.status, "completed");
        assert_eq!(written.counts.executed_ok, 0);
    }

    #[test]
    fn skipping_generation_still_executes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.json");
        let executor = BatchExecutor::new(FailurePolicy::AbortOnFirst).quiet();
        let stages = Stages {
            generation: &[],
            executor: &executor,
            manifest_path: &path,
        };
        let locales = vec!["en".to_string()];
        let mut manifest = pipeline_manifest(planned_stages(&locales, true, false));
        let execution_started = Cell::new(false);

        stages
            .run(
                &mut manifest,
                Some(|| {
                    execution_started.set(true);
                    executed(1, 0)
                }),
            )
            .unwrap();

        assert!(execution_started.get());
        assert_eq!(manifest.completed_stages, vec![EXECUTE_STAGE]);
    }

    #[test]
    fn stages_follow_skip_flags() {
        let locales = vec!["en".to_string(), "vi".to_string()];
        assert_eq!(
            planned_stages(&locales, false, false),
            vec!["generate:en", "generate:vi", "execute"]
        );
        assert_eq!(planned_stages(&locales, true, false), vec!["execute"]);
        assert!(planned_stages(&locales, true, true).is_empty());
    }

    #[test]
    fn child_generation_is_log_quiet_and_reports_its_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifests/generate_en_x.json");
        let exe = Path::new("/bin/lessongen");
        let unit = generation_unit(exe, &common(dir.path()), "en", &manifest);

        assert_eq!(unit.id, "generate:en");
        assert_eq!(unit.program, "/bin/lessongen");
        assert_eq!(unit.args[..3], ["generate", "--locale", "en"]);
        assert!(unit.args.contains(&"--no-log-file".to_string()));
        assert_eq!(unit.args.last().unwrap(), &manifest.display().to_string());
        assert!(unit.skip_key.is_none());
    }

    #[test]
    fn child_counts_are_summed_and_missing_manifests_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let en = dir.path().join("en.json");
        let vi = dir.path().join("vi.json");
        write_json_pretty(
            &en,
            &child_manifest(
                "en",
                GenerateCounts {
                    topics_total: 3,
                    generated: 2,
                    generation_failed: 1,
                    backend_errors: 1,
                    ..GenerateCounts::default()
                },
            ),
        )
        .unwrap();
        write_json_pretty(
            &vi,
            &child_manifest(
                "vi",
                GenerateCounts {
                    topics_total: 2,
                    already_generated: 1,
                    generated: 1,
                    ..GenerateCounts::default()
                },
            ),
        )
        .unwrap();

        let mut counts = PipelineCounts::default();
        absorb_generation_manifest(&mut counts, &en);
        absorb_generation_manifest(&mut counts, &vi);
        absorb_generation_manifest(&mut counts, &dir.path().join("missing.json"));

        assert_eq!(counts.generated, 3);
        assert_eq!(counts.already_generated, 1);
        assert_eq!(counts.generation_failed, 1);
        assert_eq!(counts.backend_errors, 1);
    }
}
