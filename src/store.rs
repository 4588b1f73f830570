use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::util::ensure_directory;

pub const SCRIPT_PREFIX: &str = "create_lesson_";
pub const SCRIPT_EXTENSION: &str = ".py";

/// Filename for a generated script: `create_lesson_<locale>_<slug>.py`.
///
/// The slug is the lowercased title restricted to alphanumerics, spaces and
/// hyphens, with whitespace runs collapsed to `_`.
pub fn filename_for(title: &str, locale: &str) -> String {
    format!("{}{}{}", locale_prefix(locale), slugify(title), SCRIPT_EXTENSION)
}

fn locale_prefix(locale: &str) -> String {
    format!("{SCRIPT_PREFIX}{locale}_")
}

pub fn slugify(title: &str) -> String {
    let kept: String = title
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '-')
        .collect();
    let slug = kept.split_whitespace().collect::<Vec<_>>().join("_");

    if slug.is_empty() {
        "untitled".to_string()
    } else {
        slug
    }
}

pub fn save(content: &str, filename: &str, output_dir: &Path) -> Result<PathBuf> {
    ensure_directory(output_dir)?;
    let path = output_dir.join(filename);
    fs::write(&path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Scripts generated for `locale`, in lexical filename order.
pub fn list_scripts(output_dir: &Path, locale: &str) -> Result<Vec<PathBuf>> {
    if !output_dir.exists() {
        return Ok(Vec::new());
    }

    let prefix = locale_prefix(locale);
    let entries = fs::read_dir(output_dir)
        .with_context(|| format!("failed to read {}", output_dir.display()))?;

    let mut scripts = Vec::new();
    for entry in entries {
        let entry =
            entry.with_context(|| format!("failed to read entry in {}", output_dir.display()))?;
        let path = entry.path();
        if !entry
            .file_type()
            .with_context(|| format!("failed to inspect file type: {}", path.display()))?
            .is_file()
        {
            continue;
        }

        let matches = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| name.starts_with(&prefix) && name.ends_with(SCRIPT_EXTENSION))
            .unwrap_or(false);
        if matches {
            scripts.push(path);
        }
    }

    scripts.sort();
    Ok(scripts)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use proptest::prelude::*;

    use super::*;

    #[test]
    fn filename_is_normalized_and_wrapped() {
        assert_eq!(
            filename_for("Ordering Food: At the Café!", "en"),
            "create_lesson_en_ordering_food_at_the_café.py"
        );
        assert_eq!(
            filename_for("  Self-introduction   basics ", "vi"),
            "create_lesson_vi_self-introduction_basics.py"
        );
        assert_eq!(filename_for("?!", "en"), "create_lesson_en_untitled.py");
    }

    #[test]
    fn case_and_punctuation_variants_share_a_name() {
        assert_eq!(filename_for("Hello, World", "en"), filename_for("hello world!", "en"));
        assert_ne!(filename_for("Hello World", "en"), filename_for("Hello World", "vi"));
    }

    #[test]
    fn distinct_titles_get_distinct_names() {
        let titles = [
            "Greetings",
            "Greetings 2",
            "Numbers and counting",
            "Numbers and counting advanced",
            "Family members",
            "Family-members",
            "Time expressions",
        ];
        let names: HashSet<String> = titles.iter().map(|t| filename_for(t, "en")).collect();
        assert_eq!(names.len(), titles.len());
    }

    #[test]
    fn save_creates_directory_and_list_filters_by_locale() {
        let dir = tempfile::tempdir().unwrap();
        let output_dir = dir.path().join("generated");

        save("b", &filename_for("Beta", "en"), &output_dir).unwrap();
        save("a", &filename_for("Alpha", "en"), &output_dir).unwrap();
        save("x", &filename_for("Alpha", "vi"), &output_dir).unwrap();
        fs::write(output_dir.join("notes.txt"), "ignored").unwrap();

        let names: Vec<String> = list_scripts(&output_dir, "en")
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(
            names,
            vec!["create_lesson_en_alpha.py".to_string(), "create_lesson_en_beta.py".to_string()]
        );
        assert_eq!(fs::read_to_string(output_dir.join("create_lesson_vi_alpha.py")).unwrap(), "x");
    }

    #[test]
    fn save_reports_io_failure() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();

        assert!(save("content", "x.py", &blocker.join("nested")).is_err());
    }

    #[test]
    fn missing_output_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        assert!(list_scripts(&dir.path().join("absent"), "en").unwrap().is_empty());
    }

    proptest! {
        #[test]
        fn words_differing_beyond_case_never_collide(
            a in "[a-z]{1,8}( [a-z]{1,8}){0,3}",
            b in "[a-z]{1,8}( [a-z]{1,8}){0,3}",
        ) {
            prop_assume!(a != b);
            prop_assert_ne!(filename_for(&a, "en"), filename_for(&b, "en"));
        }
    }
}
