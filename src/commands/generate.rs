use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{error, info, warn};

use crate::backend::{ChatCompletionsBackend, RetryingBackend};
use crate::cli::GenerateArgs;
use crate::config::{BackendConfig, load_config};
use crate::model::{GenerateCounts, GenerateRunManifest, Topic};
use crate::specialize::Specializer;
use crate::store::{filename_for, save};
use crate::structure::StructureGenerator;
use crate::topics::load_topics;
use crate::util::{now_utc_string, sha256_hex, utc_compact_string, write_json_pretty};

pub fn run(args: GenerateArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("generate-{}-{}", args.locale, utc_compact_string(started_ts));

    let config = load_config(&args.common.config)?;
    let locale = config.locale(&args.locale)?;
    let manifest_path = args.manifest_path.clone().unwrap_or_else(|| {
        args.common.manifest_dir().join(format!(
            "generate_{}_{}.json",
            args.locale,
            utc_compact_string(started_ts)
        ))
    });

    info!(
        locale = %args.locale,
        run_id = %run_id,
        template = %locale.template_path.display(),
        topics = %locale.topics_path.display(),
        "starting generation"
    );

    let template = fs::read_to_string(&locale.template_path)
        .with_context(|| format!("failed to read template {}", locale.template_path.display()))?;

    let mut manifest = GenerateRunManifest {
        manifest_version: 1,
        run_id,
        locale: args.locale.clone(),
        status: "running".to_string(),
        started_at,
        updated_at: now_utc_string(),
        command: render_generate_command(&args),
        topics_path: locale.topics_path.display().to_string(),
        template_path: locale.template_path.display().to_string(),
        template_sha256: sha256_hex(template.as_bytes()),
        output_dir: config.output_dir.display().to_string(),
        counts: GenerateCounts::default(),
        written_scripts: Vec::new(),
        warnings: Vec::new(),
    };

    let specializer = match Specializer::new(&template, &config.template) {
        Ok(specializer) => specializer,
        Err(err) => {
            error!(
                template = %locale.template_path.display(),
                error = %err,
                "template cannot be specialized"
            );
            manifest.counts.input_errors += 1;
            manifest.warnings.push(format!("template: {err}"));
            manifest.status = "failed".to_string();
            manifest.updated_at = now_utc_string();
            write_json_pretty(&manifest_path, &manifest)?;
            return Err(err).with_context(|| {
                format!("template {} cannot be specialized", locale.template_path.display())
            });
        }
    };

    let mut topics = load_topics(&locale.topics_path, locale.template_topic_id);
    if topics.is_empty() {
        manifest.counts.input_errors += 1;
        manifest.warnings.push(format!(
            "no topics parsed from {}",
            locale.topics_path.display()
        ));
    }
    if !args.topic_ids.is_empty() {
        topics.retain(|topic| args.topic_ids.contains(&topic.id));
        info!(selected = topics.len(), "filtered topics by number");
    }

    if !topics.is_empty() {
        let backend = build_backend(&config.backend)?;
        let generator =
            StructureGenerator::new(&backend, &config.categories, config.expected_pages);
        let stage = GenerationStage {
            locale: &args.locale,
            output_dir: &config.output_dir,
            overwrite: args.overwrite,
            request_delay: Duration::from_millis(config.backend.request_delay_ms),
        };
        let written = stage.run(
            &topics,
            &generator,
            &specializer,
            &mut manifest.counts,
            &mut manifest.warnings,
        );
        manifest.written_scripts = written
            .iter()
            .map(|path| path.display().to_string())
            .collect();
    }

    manifest.status = "completed".to_string();
    manifest.updated_at = now_utc_string();
    write_json_pretty(&manifest_path, &manifest)?;

    info!(path = %manifest_path.display(), "wrote generation manifest");
    info!(
        locale = %args.locale,
        topics = manifest.counts.topics_total,
        generated = manifest.counts.generated,
        already_generated = manifest.counts.already_generated,
        failed = manifest.counts.generation_failed,
        "generation completed"
    );

    Ok(())
}

fn build_backend(config: &BackendConfig) -> Result<RetryingBackend<ChatCompletionsBackend>> {
    let client = ChatCompletionsBackend::from_env(config)?;
    Ok(RetryingBackend::new(
        client,
        config.max_attempts,
        Duration::from_millis(config.retry_delay_ms),
    ))
}

struct GenerationStage<'a> {
    locale: &'a str,
    output_dir: &'a Path,
    overwrite: bool,
    request_delay: Duration,
}

impl GenerationStage<'_> {
    /// Generates, specializes and stores one script per topic. Failures are
    /// counted per topic and never stop the loop.
    fn run(
        &self,
        topics: &[Topic],
        generator: &StructureGenerator<'_>,
        specializer: &Specializer,
        counts: &mut GenerateCounts,
        warnings: &mut Vec<String>,
    ) -> Vec<PathBuf> {
        let mut written = Vec::new();
        counts.topics_total += topics.len();

        for topic in topics {
            let filename = filename_for(&topic.title, self.locale);
            if !self.overwrite && self.output_dir.join(&filename).exists() {
                info!(topic_id = topic.id, file = %filename, "script already generated");
                counts.already_generated += 1;
                continue;
            }

            let generated = generator.generate(topic);
            thread::sleep(self.request_delay);

            let structure = match generated {
                Ok(structure) => structure,
                Err(err) => {
                    warn!(
                        topic_id = topic.id,
                        title = %topic.title,
                        error = %err,
                        "lesson structure generation failed"
                    );
                    counts.backend_errors += 1;
                    counts.generation_failed += 1;
                    warnings.push(format!("topic {} ({}): {}", topic.id, topic.title, err));
                    continue;
                }
            };

            let script = specializer.specialize(&structure);
            match save(&script.source, &filename, self.output_dir) {
                Ok(path) => {
                    info!(
                        topic_id = topic.id,
                        lesson = %script.title,
                        path = %path.display(),
                        "wrote lesson script"
                    );
                    counts.generated += 1;
                    written.push(path);
                }
                Err(err) => {
                    warn!(topic_id = topic.id, error = %err, "failed to store lesson script");
                    counts.io_errors += 1;
                    counts.generation_failed += 1;
                    warnings.push(format!("topic {} ({}): {:#}", topic.id, topic.title, err));
                }
            }
        }

        written
    }
}

fn render_generate_command(args: &GenerateArgs) -> String {
    let mut command = vec![
        "lessongen".to_string(),
        "generate".to_string(),
        "--locale".to_string(),
        args.locale.clone(),
        "--config".to_string(),
        args.common.config.display().to_string(),
    ];
    for id in &args.topic_ids {
        command.push("--topic".to_string());
        command.push(id.to_string());
    }
    if args.overwrite {
        command.push("--overwrite".to_string());
    }
    command.join(" ")
}
