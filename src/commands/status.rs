use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use tracing::{info, warn};

use crate::catalog::SqliteCatalog;
use crate::cli::StatusArgs;
use crate::config::{PipelineConfig, load_config};
use crate::level::code_to_label;
use crate::specialize::{Segment, Specializer, TemplateSchema};
use crate::store::list_scripts;
use crate::util::read_json;

pub fn run(args: StatusArgs) -> Result<()> {
    let config = load_config(&args.common.config)?;
    let manifest_dir = args.common.manifest_dir();

    let scale = config.template.proficiency_scale;
    info!(
        config = %args.common.config.display(),
        work_root = %args.common.work_root.display(),
        output_dir = %config.output_dir.display(),
        model = %config.backend.model,
        proficiency_scale = scale.as_str(),
        default_level = code_to_label(i64::from(scale.default_code()), scale),
        "status requested"
    );

    for (code, locale) in &config.locales {
        let scripts = list_scripts(&config.output_dir, code)?;
        info!(
            locale = %code,
            topics_present = locale.topics_path.exists(),
            template_present = locale.template_path.exists(),
            scripts = scripts.len(),
            "locale status"
        );
        if locale.template_path.exists() {
            report_template(code, &locale.template_path, &config.template);
        }
    }

    for prefix in ["pipeline_", "execute_", "generate_"] {
        match latest_manifest(&manifest_dir, prefix)? {
            Some(path) => report_manifest(&path),
            None => warn!(dir = %manifest_dir.display(), prefix, "no manifest found"),
        }
    }

    report_catalog(&config);
    Ok(())
}

/// Newest manifest with the given prefix. Compact UTC timestamps in the file
/// names sort lexically.
fn latest_manifest(dir: &Path, prefix: &str) -> Result<Option<PathBuf>> {
    if !dir.exists() {
        return Ok(None);
    }

    let mut latest: Option<PathBuf> = None;
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let path = entry
            .with_context(|| format!("failed to read entry in {}", dir.display()))?
            .path();
        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(prefix) && name.ends_with(".json"))
            .unwrap_or(false);
        if matches && latest.as_ref().is_none_or(|current| path > *current) {
            latest = Some(path);
        }
    }
    Ok(latest)
}

fn report_manifest(path: &Path) {
    let manifest: Value = match read_json(path) {
        Ok(value) => value,
        Err(err) => {
            warn!(path = %path.display(), error = %format!("{err:#}"), "unreadable manifest");
            return;
        }
    };

    let summary = ManifestSummary::from_value(&manifest);
    info!(
        path = %path.display(),
        run_id = %summary.run_id,
        status = %summary.status,
        updated_at = %summary.updated_at,
        counts = %summary.counts,
        "latest manifest"
    );
}

/// The fields every run manifest shares, read leniently so older or partial
/// manifests still report.
#[derive(Debug, PartialEq, Eq)]
struct ManifestSummary {
    run_id: String,
    status: String,
    updated_at: String,
    counts: String,
}

impl ManifestSummary {
    fn from_value(manifest: &Value) -> Self {
        let field = |name: &str| {
            manifest
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let counts = manifest.get("counts").cloned().unwrap_or(Value::Null);

        Self {
            run_id: field("run_id"),
            status: field("status"),
            updated_at: field("updated_at"),
            counts: counts.to_string(),
        }
    }
}

/// Parses the template the same way generation does and reports its slots.
fn report_template(locale: &str, path: &Path, schema: &TemplateSchema) {
    let parsed = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))
        .and_then(|source| Specializer::new(&source, schema).map_err(Into::into));
    match parsed {
        Ok(specializer) => {
            let slots = specializer
                .model()
                .segments()
                .iter()
                .filter(|segment| matches!(segment, Segment::Slot(_)))
                .count();
            info!(locale, path = %path.display(), slots, "template is specializable");
        }
        Err(err) => warn!(
            locale,
            path = %path.display(),
            error = %format!("{err:#}"),
            "template is not specializable"
        ),
    }
}

fn report_catalog(config: &PipelineConfig) {
    let Some(db_path) = config.execution.db_path.as_deref() else {
        info!("no catalog configured");
        return;
    };
    if !db_path.exists() {
        warn!(path = %db_path.display(), "catalog file missing");
        return;
    }

    let counted = SqliteCatalog::open(
        db_path,
        &config.execution.lesson_table,
        &config.execution.title_column,
    )
    .and_then(|catalog| catalog.count(&config.execution.lesson_table));
    match counted {
        Ok(lessons) => info!(path = %db_path.display(), lessons, "catalog status"),
        Err(err) => warn!(
            path = %db_path.display(),
            error = %format!("{err:#}"),
            "catalog unreachable"
        ),
    }
}
