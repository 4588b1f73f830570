use super::schema::FieldLimits;
use super::*;
use crate::level::LevelInput;

const TEMPLATE: &str = r#"import os
import sys

sys.path.append(os.path.join(os.path.dirname(__file__), ".."))

from app import create_app, db
from app.models import Lesson, LessonPage

LESSON_TITLE = "Template Lesson"
LESSON_DESCRIPTION = 'The hand-written reference'
CATEGORY_NAME = "Grammar"
LESSON_KEYWORDS = "template, reference"
DIFFICULTY = "Intermediate"
MAX_DIFFICULTY = "Expert"

PAGES = [
    {
        "page_number": 1,
        "title": "Intro [part 1]",
        "keywords": "hello",
        "content_focus": "greetings",
        "image_concept": "two people waving",
    },
]


def ensure_category(session):
    from app.models import Category
    return session.query(Category).filter_by(name=CATEGORY_NAME).first()


def main():
    app = create_app()
    with app.app_context():
        if Lesson.query.filter_by(title=LESSON_TITLE).first():
            print("lesson already exists")
            return 0
        category = ensure_category(db.session)
        lesson = Lesson(title=LESSON_TITLE, difficulty=DIFFICULTY, category=category)
        db.session.add(lesson)
        db.session.commit()
    return 0


if __name__ == "__main__":
    sys.exit(main())
"#;

fn structure(title: &str, label: &str, pages: usize) -> LessonStructure {
    LessonStructure {
        title: title.to_string(),
        description: "Ordering at a restaurant".to_string(),
        proficiency_label: LevelInput::Label(label.to_string()),
        category_name: "Conversation".to_string(),
        keywords: "food, menu".to_string(),
        content_pages: (1..=pages)
            .map(|n| Page {
                title: format!("Page {n}"),
                keywords: format!("kw{n}"),
                content_focus: format!("focus {n}"),
                image_concept: format!("image {n}"),
            })
            .collect(),
    }
}

fn schema() -> TemplateSchema {
    TemplateSchema::default()
}

#[test]
fn proficiency_is_written_as_its_code() {
    let script = specialize(TEMPLATE, &schema(), &structure("Food", "Advanced", 2)).unwrap();

    assert!(script.source.contains("\nDIFFICULTY = 4\n"));
    assert!(!script.source.contains("Advanced"));
    assert!(script.source.contains("MAX_DIFFICULTY = \"Expert\""));
}

#[test]
fn scalar_assignments_are_replaced_in_place() {
    let script = specialize(TEMPLATE, &schema(), &structure("Food", "N2", 2)).unwrap();

    assert_eq!(script.title, "Food");
    assert!(script.source.contains("LESSON_TITLE = \"Food\"\n"));
    assert!(script.source.contains("LESSON_DESCRIPTION = 'Ordering at a restaurant'\n"));
    assert!(script.source.contains("CATEGORY_NAME = \"Conversation\"\n"));
    assert!(script.source.contains("LESSON_KEYWORDS = \"food, menu\"\n"));
    assert!(script.source.contains("DIFFICULTY = 2\n"));
    assert!(!script.source.contains("Template Lesson"));
}

#[test]
fn pages_block_is_rebuilt_from_the_structure() {
    let script = specialize(TEMPLATE, &schema(), &structure("Food", "Advanced", 3)).unwrap();

    assert!(!script.source.contains("Intro [part 1]"));
    let expected = "PAGES = [\n    {\n        \"page_number\": 1,\n        \"title\": \"Page 1\",\n\
        \x20       \"keywords\": \"kw1\",\n        \"content_focus\": \"focus 1\",\n\
        \x20       \"image_concept\": \"image 1\",\n    },\n";
    assert!(script.source.contains(expected));
    assert!(script.source.contains("\"page_number\": 3,"));
    assert!(script.source.contains("    },\n]\n\n\ndef ensure_category"));
}

#[test]
fn page_numbers_start_at_the_configured_offset() {
    let schema = TemplateSchema {
        first_page_number: 2,
        ..schema()
    };
    let script = specialize(TEMPLATE, &schema, &structure("Food", "Advanced", 2)).unwrap();

    assert!(script.source.contains("\"page_number\": 2,"));
    assert!(script.source.contains("\"page_number\": 3,"));
    assert!(!script.source.contains("\"page_number\": 1,"));
}

#[test]
fn root_path_gains_one_level() {
    let script = specialize(TEMPLATE, &schema(), &structure("Food", "Advanced", 1)).unwrap();

    assert!(
        script
            .source
            .contains("sys.path.append(os.path.join(os.path.dirname(__file__), \"..\", \"..\"))")
    );
}

#[test]
fn nested_import_is_folded_into_the_top_level_import() {
    let script = specialize(TEMPLATE, &schema(), &structure("Food", "Advanced", 1)).unwrap();

    assert!(script.source.contains("\nfrom app.models import Lesson, LessonPage, Category\n"));
    assert_eq!(script.source.matches("from app.models import").count(), 1);
    assert!(script.source.contains(
        "def ensure_category(session):\n    return session.query(Category)"
    ));
    assert!(script.source.contains("from app import create_app, db\n"));
}

#[test]
fn required_symbols_are_requested_once() {
    let schema = TemplateSchema {
        required_symbols: vec!["Lesson".to_string(), "Tag".to_string()],
        ..schema()
    };
    let script = specialize(TEMPLATE, &schema, &structure("Food", "Advanced", 1)).unwrap();

    assert!(script.source.contains("from app.models import Lesson, LessonPage, Category, Tag\n"));
}

#[test]
fn quotes_are_escaped_for_their_context() {
    let mut lesson = structure("Say \"hi\"\nnow", "Advanced", 1);
    lesson.description = "It's a \"test\" \\ path".to_string();
    lesson.content_pages[0].title = "Page \"one\"".to_string();

    let script = specialize(TEMPLATE, &schema(), &lesson).unwrap();

    assert!(script.source.contains(r#"LESSON_TITLE = "Say \"hi\"\nnow""#));
    assert!(script.source.contains(r#"LESSON_DESCRIPTION = 'It\'s a "test" \\ path'"#));
    assert!(script.source.contains(r#""title": "Page \"one\"","#));
    assert_eq!(read_title(&script.source, &schema()).unwrap(), "Say \"hi\"\nnow");
}

#[test]
fn long_values_are_truncated_to_field_limits() {
    let schema = TemplateSchema {
        limits: FieldLimits {
            title: 10,
            page_title: 8,
            ..FieldLimits::default()
        },
        ..schema()
    };
    let mut lesson = structure("A very long lesson title", "Advanced", 1);
    lesson.content_pages[0].title = "An overly long page title".to_string();

    let script = specialize(TEMPLATE, &schema, &lesson).unwrap();

    assert_eq!(script.title, "A very ...");
    assert!(script.source.contains("LESSON_TITLE = \"A very ...\""));
    assert!(script.source.contains("\"title\": \"An ov...\","));
}

#[test]
fn specialization_is_deterministic_and_idempotent() {
    let lesson = structure("Food", "Advanced", 3);
    let first = specialize(TEMPLATE, &schema(), &lesson).unwrap();
    let again = specialize(TEMPLATE, &schema(), &lesson).unwrap();
    assert_eq!(first, again);

    let second_pass = specialize(&first.source, &schema(), &lesson).unwrap();
    assert_eq!(second_pass.source, first.source);
}

#[test]
fn distinct_structures_give_distinct_scripts() {
    let base = structure("Food", "Advanced", 2);
    let mut other_page = base.clone();
    other_page.content_pages[1].image_concept = "a different image".to_string();
    let mut other_level = base.clone();
    other_level.proficiency_label = LevelInput::Code(1);

    let specializer = Specializer::new(TEMPLATE, &schema()).unwrap();
    let a = specializer.specialize(&base);
    let b = specializer.specialize(&other_page);
    let c = specializer.specialize(&other_level);

    assert_ne!(a.source, b.source);
    assert_ne!(a.source, c.source);
    assert_ne!(b.source, c.source);
}

#[test]
fn missing_anchor_is_an_error() {
    let template = TEMPLATE.replace("DIFFICULTY = \"Intermediate\"\n", "");
    let err = specialize(&template, &schema(), &structure("Food", "Advanced", 1)).unwrap_err();
    assert!(matches!(
        err,
        SpecializeError::MissingAnchor { ref anchor } if anchor.starts_with("DIFFICULTY")
    ));

    let template = TEMPLATE.replace("from app.models import Lesson, LessonPage\n", "");
    let err = specialize(&template, &schema(), &structure("Food", "Advanced", 1)).unwrap_err();
    assert!(matches!(err, SpecializeError::MissingAnchor { .. }));
}

#[test]
fn indented_or_prefixed_names_are_not_anchors() {
    let template = TEMPLATE.replace(
        "LESSON_TITLE = \"Template Lesson\"",
        "    LESSON_TITLE = \"x\"\nMY_LESSON_TITLE = \"y\"",
    );
    let err = specialize(&template, &schema(), &structure("Food", "Advanced", 1)).unwrap_err();
    assert!(matches!(err, SpecializeError::MissingAnchor { .. }));
}

#[test]
fn repeated_anchor_is_an_error() {
    let template = format!("{TEMPLATE}\nCATEGORY_NAME = \"Again\"\n");
    let err = specialize(&template, &schema(), &structure("Food", "Advanced", 1)).unwrap_err();
    assert!(matches!(err, SpecializeError::DuplicateAnchor { count: 2, .. }));
}

#[test]
fn unclosed_pages_block_is_an_error() {
    let template = TEMPLATE.replace("    },\n]\n", "    },\n");
    let err = specialize(&template, &schema(), &structure("Food", "Advanced", 1)).unwrap_err();
    assert!(matches!(err, SpecializeError::UnbalancedBlock { .. }));
}

#[test]
fn model_keeps_text_between_slots() {
    let specializer = Specializer::new(TEMPLATE, &schema()).unwrap();
    let slots = specializer
        .model()
        .segments()
        .iter()
        .filter(|segment| matches!(segment, Segment::Slot(_)))
        .count();
    // Four scalars, proficiency, pages, root path, top import, one nested import.
    assert_eq!(slots, 9);

    let rendered = specializer.model().render(|_| String::new());
    assert!(rendered.contains("def main():"));
    assert!(rendered.contains("if __name__ == \"__main__\":"));
}
