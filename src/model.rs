use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::level::LevelInput;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Topic {
    pub id: u32,
    pub title: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub keywords: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content_focus: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub image_concept: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LessonStructure {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub description: String,
    #[serde(default, alias = "difficulty", alias = "level")]
    pub proficiency_label: LevelInput,
    #[serde(default, alias = "category", deserialize_with = "lenient_string")]
    pub category_name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub keywords: String,
    pub content_pages: Vec<Page>,
}

/// Text field of a generated structure. `null` reads as empty, a list of
/// strings is joined with ", ", and scalars use their JSON spelling.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let text = match Value::deserialize(deserializer)? {
        Value::Null => String::new(),
        Value::String(text) => text,
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    Ok(text)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedScript {
    pub title: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecutionResult {
    pub script_id: String,
    pub exit_code: Option<i32>,
    pub duration_ms: u128,
    #[serde(skip_serializing)]
    pub captured_output: Vec<String>,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenerateCounts {
    pub topics_total: usize,
    pub already_generated: usize,
    pub generated: usize,
    pub generation_failed: usize,
    pub input_errors: usize,
    pub backend_errors: usize,
    pub io_errors: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub locale: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub topics_path: String,
    pub template_path: String,
    pub template_sha256: String,
    pub output_dir: String,
    pub counts: GenerateCounts,
    pub written_scripts: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteCounts {
    pub scripts_total: usize,
    pub executed_ok: usize,
    pub executed_failed: usize,
    pub skipped_existing: usize,
    pub not_run: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExecuteRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub locales: Vec<String>,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub skip_existing: bool,
    pub log_path: Option<String>,
    pub counts: ExecuteCounts,
    pub results: Vec<ExecutionResult>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineCounts {
    pub already_generated: usize,
    pub generated: usize,
    pub generation_failed: usize,
    pub input_errors: usize,
    pub backend_errors: usize,
    pub io_errors: usize,
    pub executed_ok: usize,
    pub executed_failed: usize,
    pub skipped_existing: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunManifest {
    pub manifest_version: u32,
    pub run_id: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub stages: Vec<String>,
    pub completed_stages: Vec<String>,
    pub failed_stage: Option<String>,
    pub failure_reason: Option<String>,
    pub log_path: Option<String>,
    pub counts: PipelineCounts,
}
