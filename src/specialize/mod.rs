//! Template specialization.
//!
//! A template is parsed once into literal text and typed slots (scalar
//! assignments, the proficiency assignment, the page list, the project root
//! path and the models import). Specializing fills every slot from a
//! [`LessonStructure`] and serializes the template in a single pass, so text
//! outside the slots is never touched.

use thiserror::Error;

use crate::level::{label_to_code, truncate};
use crate::model::{GeneratedScript, LessonStructure, Page};

mod schema;
mod template;
#[cfg(test)]
mod tests;

pub use schema::TemplateSchema;
pub use template::{Segment, Slot, TemplateModel, TextField};

use template::{escape, read_assignment};

#[derive(Debug, Error)]
pub enum SpecializeError {
    #[error("template anchor not found: {anchor}")]
    MissingAnchor { anchor: String },
    #[error("template anchor occurs {count} times, expected once: {anchor}")]
    DuplicateAnchor { anchor: String, count: usize },
    #[error("template block is not closed: {anchor}")]
    UnbalancedBlock { anchor: String },
    #[error("template anchors overlap: {first} and {second}")]
    OverlappingAnchors { first: String, second: String },
    #[error("invalid template schema: {0}")]
    InvalidSchema(String),
}

pub struct Specializer {
    model: TemplateModel,
    schema: TemplateSchema,
}

impl Specializer {
    pub fn new(template: &str, schema: &TemplateSchema) -> Result<Self, SpecializeError> {
        Ok(Self {
            model: TemplateModel::parse(template, schema)?,
            schema: schema.clone(),
        })
    }

    pub fn model(&self) -> &TemplateModel {
        &self.model
    }

    pub fn specialize(&self, structure: &LessonStructure) -> GeneratedScript {
        let schema = &self.schema;
        let limits = &schema.limits;
        let title = truncate(structure.title.trim(), limits.title);
        let symbols = self.model.merged_symbols(&schema.required_symbols);

        let source = self.model.render(|slot| match slot {
            Slot::Text { field, quote } => {
                let value = match field {
                    TextField::Title => title.clone(),
                    TextField::Description => truncate(&structure.description, limits.description),
                    TextField::Category => truncate(&structure.category_name, limits.category),
                    TextField::Keywords => truncate(&structure.keywords, limits.keywords),
                };
                format!("{quote}{}{quote}", escape(&value, *quote))
            }
            Slot::Proficiency => {
                label_to_code(&structure.proficiency_label, schema.proficiency_scale).to_string()
            }
            Slot::Pages => render_pages(&structure.content_pages, schema),
            Slot::RootPath => format!(
                "{}{}{}",
                schema.root_path_prefix,
                schema.root_path_segment.repeat(schema.output_depth),
                schema.root_path_suffix
            ),
            Slot::Imports => symbols.join(", "),
            Slot::NestedImport => String::new(),
        });

        GeneratedScript { title, source }
    }
}

/// Parses `template` and specializes it for `structure` in one call.
#[cfg(test)]
pub fn specialize(
    template: &str,
    schema: &TemplateSchema,
    structure: &LessonStructure,
) -> Result<GeneratedScript, SpecializeError> {
    Ok(Specializer::new(template, schema)?.specialize(structure))
}

/// Recovers the lesson title a generated script will persist.
pub fn read_title(source: &str, schema: &TemplateSchema) -> Option<String> {
    read_assignment(source, &schema.title_var)
}

fn render_pages(pages: &[Page], schema: &TemplateSchema) -> String {
    let indent = &schema.indent;
    let limits = &schema.limits;
    let field = |name: &str, value: &str, limit: usize| {
        format!(
            "{indent}{indent}\"{name}\": \"{}\",\n",
            escape(&truncate(value, limit), '"')
        )
    };

    let mut out = String::from("[\n");
    for (index, page) in pages.iter().enumerate() {
        out.push_str(indent);
        out.push_str("{\n");
        out.push_str(&format!(
            "{indent}{indent}\"page_number\": {},\n",
            schema.first_page_number + index
        ));
        out.push_str(&field("title", &page.title, limits.page_title));
        out.push_str(&field("keywords", &page.keywords, limits.page_keywords));
        out.push_str(&field("content_focus", &page.content_focus, limits.content_focus));
        out.push_str(&field("image_concept", &page.image_concept, limits.image_concept));
        out.push_str(indent);
        out.push_str("},\n");
    }
    out.push(']');
    out
}
