use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tracing::{debug, info};

use crate::specialize::TemplateSchema;

pub const ALL_LOCALES: &str = "all";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub output_dir: PathBuf,
    pub expected_pages: usize,
    pub categories: Vec<String>,
    pub backend: BackendConfig,
    pub execution: ExecutionConfig,
    pub template: TemplateSchema,
    pub locales: BTreeMap<String, LocaleConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
    /// Pause after every backend call, successful or not.
    pub request_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Program used to run each generated script. Empty runs the script directly.
    pub interpreter: String,
    pub db_path: Option<PathBuf>,
    pub lesson_table: String,
    pub title_column: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocaleConfig {
    pub topics_path: PathBuf,
    pub template_path: PathBuf,
    #[serde(default)]
    pub template_topic_id: Option<u32>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let mut locales = BTreeMap::new();
        locales.insert(
            "en".to_string(),
            LocaleConfig {
                topics_path: PathBuf::from("topics/en.md"),
                template_path: PathBuf::from("scripts/create_lesson_template.py"),
                template_topic_id: None,
            },
        );

        Self {
            output_dir: PathBuf::from("scripts/generated"),
            expected_pages: 5,
            categories: vec![
                "Grammar".to_string(),
                "Vocabulary".to_string(),
                "Conversation".to_string(),
                "Culture".to_string(),
                "Reading".to_string(),
            ],
            backend: BackendConfig::default(),
            execution: ExecutionConfig::default(),
            template: TemplateSchema::default(),
            locales,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "LESSONGEN_API_KEY".to_string(),
            temperature: 0.7,
            max_tokens: 4096,
            timeout_secs: 120,
            max_attempts: 1,
            retry_delay_ms: 5_000,
            request_delay_ms: 2_000,
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            db_path: None,
            lesson_table: "lessons".to_string(),
            title_column: "title".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn locale(&self, code: &str) -> Result<&LocaleConfig> {
        self.locales.get(code).with_context(|| {
            format!(
                "unknown locale '{}' (configured: {})",
                code,
                self.locale_codes().join(", ")
            )
        })
    }

    pub fn locale_codes(&self) -> Vec<String> {
        self.locales.keys().cloned().collect()
    }

    /// Expands a locale filter into concrete locale codes in stable order.
    pub fn resolve_locales(&self, filter: &str) -> Result<Vec<String>> {
        if filter.eq_ignore_ascii_case(ALL_LOCALES) {
            return Ok(self.locale_codes());
        }
        self.locale(filter)?;
        Ok(vec![filter.to_string()])
    }

    fn validate(&self) -> Result<()> {
        if self.locales.is_empty() {
            bail!("no locales configured");
        }
        for code in self.locales.keys() {
            let valid = !code.is_empty()
                && code
                    .chars()
                    .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
            if !valid || code == ALL_LOCALES {
                bail!("invalid locale code '{code}': use lowercase letters, digits and '-'");
            }
        }
        if self.expected_pages == 0 {
            bail!("expected_pages must be at least 1");
        }
        self.template.validate()?;
        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if let Err(err) = dotenvy::dotenv() {
        debug!(error = %err, "no .env file loaded");
    }

    let config = if path.exists() {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: PipelineConfig = toml::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        info!(path = %path.display(), locales = config.locales.len(), "loaded config");
        config
    } else {
        info!(path = %path.display(), "config file missing; using defaults");
        PipelineConfig::default()
    };

    config.validate()?;
    Ok(config)
}
