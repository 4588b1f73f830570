use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;
use tracing::{debug, warn};

use crate::model::Topic;

/// Parser for numbered topic lists of the form
///
/// ```text
/// 1. **Title**
/// * Description, possibly continued
///   on the next line
/// ```
pub struct TopicParser {
    heading_regex: Regex,
    bullet_regex: Regex,
}

impl TopicParser {
    pub fn new() -> Result<Self> {
        Ok(Self {
            heading_regex: Regex::new(r"^\s*(\d+)\.\s+\*\*(.+?)\*\*")
                .context("failed to compile topic heading regex")?,
            bullet_regex: Regex::new(r"^\s*[*\-•]\s+(.*)$")
                .context("failed to compile topic bullet regex")?,
        })
    }

    pub fn parse(&self, text: &str, template_topic_id: Option<u32>) -> Vec<Topic> {
        let mut topics = Vec::<Topic>::new();
        let mut current: Option<(u32, String, Vec<String>)> = None;

        for line in text.lines() {
            if let Some(captures) = self.heading_regex.captures(line) {
                if let Some(entry) = current.take() {
                    push_entry(&mut topics, entry, template_topic_id);
                }

                let raw_id = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
                let title = captures
                    .get(2)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default();
                match raw_id.parse::<u32>() {
                    Ok(id) => current = Some((id, title, Vec::new())),
                    Err(err) => {
                        warn!(line = %line, error = %err, "skipping topic with invalid number")
                    }
                }
                continue;
            }

            let trimmed = line.trim();
            if trimmed.is_empty() {
                if let Some(entry) = current.take() {
                    push_entry(&mut topics, entry, template_topic_id);
                }
                continue;
            }

            let Some((_, _, description)) = current.as_mut() else {
                continue;
            };

            let text = match self.bullet_regex.captures(line) {
                Some(captures) => captures
                    .get(1)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default(),
                None => trimmed.to_string(),
            };
            if !text.is_empty() {
                description.push(text);
            }
        }

        if let Some(entry) = current.take() {
            push_entry(&mut topics, entry, template_topic_id);
        }

        topics
    }
}

fn push_entry(
    topics: &mut Vec<Topic>,
    (id, title, description): (u32, String, Vec<String>),
    template_topic_id: Option<u32>,
) {
    if template_topic_id == Some(id) {
        debug!(id, title = %title, "excluding template topic");
        return;
    }
    if topics.iter().any(|topic| topic.id == id) {
        warn!(id, title = %title, "duplicate topic number");
    }
    if description.is_empty() {
        debug!(id, title = %title, "topic has no description");
    }

    topics.push(Topic {
        id,
        title,
        description: description.join(" "),
    });
}

pub fn parse_topics(text: &str, template_topic_id: Option<u32>) -> Vec<Topic> {
    match TopicParser::new() {
        Ok(parser) => parser.parse(text, template_topic_id),
        Err(err) => {
            warn!(error = %err, "topic parser unavailable");
            Vec::new()
        }
    }
}

/// Loads topics from a document. Unreadable or empty documents produce a
/// warning and no topics.
pub fn load_topics(path: &Path, template_topic_id: Option<u32>) -> Vec<Topic> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "failed to read topic document");
            return Vec::new();
        }
    };

    let topics = parse_topics(&text, template_topic_id);
    if topics.is_empty() {
        warn!(path = %path.display(), "no topics found in document");
    }
    topics
}
