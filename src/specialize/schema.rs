use serde::Deserialize;

use super::SpecializeError;
use crate::level::LevelScale;

/// Names the anchors a template exposes and how specialized values are
/// shaped when written back into it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemplateSchema {
    pub title_var: String,
    pub description_var: String,
    pub category_var: String,
    pub keywords_var: String,
    pub proficiency_var: String,
    pub pages_var: String,
    /// Module whose import is consolidated into a single top-level statement.
    pub import_module: String,
    /// Symbols the top-level import must request in every generated script.
    pub required_symbols: Vec<String>,
    pub root_path_prefix: String,
    pub root_path_segment: String,
    pub root_path_suffix: String,
    /// Number of parent segments a generated script needs to reach the project root.
    pub output_depth: usize,
    pub first_page_number: usize,
    pub indent: String,
    pub proficiency_scale: LevelScale,
    pub limits: FieldLimits,
}

/// Column widths of the records a generated script persists.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct FieldLimits {
    pub title: usize,
    pub description: usize,
    pub category: usize,
    pub keywords: usize,
    pub page_title: usize,
    pub page_keywords: usize,
    pub content_focus: usize,
    pub image_concept: usize,
}

impl Default for TemplateSchema {
    fn default() -> Self {
        Self {
            title_var: "LESSON_TITLE".to_string(),
            description_var: "LESSON_DESCRIPTION".to_string(),
            category_var: "CATEGORY_NAME".to_string(),
            keywords_var: "LESSON_KEYWORDS".to_string(),
            proficiency_var: "DIFFICULTY".to_string(),
            pages_var: "PAGES".to_string(),
            import_module: "app.models".to_string(),
            required_symbols: vec!["Category".to_string()],
            root_path_prefix: "os.path.join(os.path.dirname(__file__)".to_string(),
            root_path_segment: ", \"..\"".to_string(),
            root_path_suffix: ")".to_string(),
            output_depth: 2,
            first_page_number: 1,
            indent: "    ".to_string(),
            proficiency_scale: LevelScale::Standard,
            limits: FieldLimits::default(),
        }
    }
}

impl Default for FieldLimits {
    fn default() -> Self {
        Self {
            title: 200,
            description: 1000,
            category: 100,
            keywords: 255,
            page_title: 200,
            page_keywords: 255,
            content_focus: 500,
            image_concept: 500,
        }
    }
}

impl TemplateSchema {
    pub fn validate(&self) -> Result<(), SpecializeError> {
        let vars = [
            &self.title_var,
            &self.description_var,
            &self.category_var,
            &self.keywords_var,
            &self.proficiency_var,
            &self.pages_var,
        ];
        for var in vars {
            if !is_identifier(var) {
                return Err(SpecializeError::InvalidSchema(format!(
                    "'{var}' is not a plain identifier"
                )));
            }
        }
        for (index, var) in vars.iter().enumerate() {
            if vars[index + 1..].contains(var) {
                return Err(SpecializeError::InvalidSchema(format!(
                    "'{var}' names more than one slot"
                )));
            }
        }

        if self.import_module.trim().is_empty() {
            return Err(SpecializeError::InvalidSchema(
                "import_module must not be empty".to_string(),
            ));
        }
        if self.root_path_prefix.is_empty() || self.root_path_segment.is_empty() {
            return Err(SpecializeError::InvalidSchema(
                "root path prefix and segment must not be empty".to_string(),
            ));
        }
        if self.output_depth == 0 {
            return Err(SpecializeError::InvalidSchema(
                "output_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn is_identifier(value: &str) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
