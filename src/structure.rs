use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::GenerativeBackend;
use crate::model::{LessonStructure, Topic};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("backend request failed: {0}")]
    Backend(String),
    #[error("backend rate limit exceeded: {0}")]
    RateLimited(String),
    #[error("response contains no JSON object")]
    NoJson,
    #[error("response JSON does not describe a lesson: {0}")]
    InvalidShape(String),
    #[error("lesson has no content pages")]
    EmptyPages,
    #[error("lesson has {found} content pages, expected {expected}")]
    PageCountMismatch { expected: usize, found: usize },
}

impl GenerationError {
    /// Transport-level failures that may succeed when the call is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::RateLimited(_))
    }
}

pub struct StructureGenerator<'a> {
    backend: &'a dyn GenerativeBackend,
    categories: &'a [String],
    expected_pages: usize,
}

impl<'a> StructureGenerator<'a> {
    pub fn new(
        backend: &'a dyn GenerativeBackend,
        categories: &'a [String],
        expected_pages: usize,
    ) -> Self {
        Self {
            backend,
            categories,
            expected_pages,
        }
    }

    pub fn generate(&self, topic: &Topic) -> Result<LessonStructure, GenerationError> {
        let prompt = build_prompt(topic, self.categories, self.expected_pages);
        debug!(topic_id = topic.id, prompt_chars = prompt.len(), "requesting lesson structure");

        let raw = self.backend.generate(&prompt)?;
        let mut structure = parse_structure(&raw, self.expected_pages)?;

        match canonical_category(&structure.category_name, self.categories) {
            Some(category) => structure.category_name = category.to_string(),
            None => warn!(
                topic_id = topic.id,
                category = %structure.category_name,
                "category outside the configured set"
            ),
        }

        Ok(structure)
    }
}

fn canonical_category<'c>(name: &str, categories: &'c [String]) -> Option<&'c str> {
    categories
        .iter()
        .find(|candidate| candidate.eq_ignore_ascii_case(name.trim()))
        .map(String::as_str)
}

pub fn build_prompt(topic: &Topic, categories: &[String], expected_pages: usize) -> String {
    let category_list = categories
        .iter()
        .map(|name| format!("- {name}"))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Design a lesson for the topic below.\n\
         \n\
         Topic title: {title}\n\
         Topic description: {description}\n\
         \n\
         Choose category_name from exactly one of:\n\
         {category_list}\n\
         \n\
         proficiency_label must be one of Beginner, Elementary, Intermediate, Advanced, Expert.\n\
         content_pages must contain exactly {expected_pages} pages.\n\
         \n\
         Respond with a single JSON object and nothing else, shaped like:\n\
         {{\n\
           \"title\": \"...\",\n\
           \"description\": \"...\",\n\
           \"proficiency_label\": \"Intermediate\",\n\
           \"category_name\": \"...\",\n\
           \"keywords\": \"comma, separated, keywords\",\n\
           \"content_pages\": [\n\
             {{\"title\": \"...\", \"keywords\": \"...\", \
               \"content_focus\": \"...\", \"image_concept\": \"...\"}}\n\
           ]\n\
         }}\n",
        title = topic.title,
        description = topic.description,
    )
}

/// Finds the first balanced `{...}` span in `raw` that parses as a JSON object.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let bytes = raw.as_bytes();

    for (start, _) in raw.match_indices('{') {
        let Some(end) = balanced_end(bytes, start) else {
            continue;
        };
        let candidate = &raw[start..=end];
        if serde_json::from_str::<serde_json::Map<String, serde_json::Value>>(candidate).is_ok() {
            return Some(candidate);
        }
    }

    None
}

fn balanced_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, byte) in bytes[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}

pub fn parse_structure(
    raw: &str,
    expected_pages: usize,
) -> Result<LessonStructure, GenerationError> {
    let object = extract_json_object(raw).ok_or(GenerationError::NoJson)?;
    let structure: LessonStructure = serde_json::from_str(object)
        .map_err(|err| GenerationError::InvalidShape(err.to_string()))?;

    if structure.content_pages.is_empty() {
        return Err(GenerationError::EmptyPages);
    }
    if structure.content_pages.len() != expected_pages {
        return Err(GenerationError::PageCountMismatch {
            expected: expected_pages,
            found: structure.content_pages.len(),
        });
    }

    Ok(structure)
}
