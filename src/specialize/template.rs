use regex::Regex;

use super::SpecializeError;
use super::schema::TemplateSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextField {
    Title,
    Description,
    Category,
    Keywords,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Slot {
    /// A quoted string literal assigned to a configuration name.
    Text { field: TextField, quote: char },
    Proficiency,
    Pages,
    RootPath,
    /// Symbol list of the top-level models import.
    Imports,
    /// A nested models import line, dropped on render.
    NestedImport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Slot(Slot),
}

/// A template split once into literal text and typed slots.
#[derive(Debug, Clone)]
pub struct TemplateModel {
    segments: Vec<Segment>,
    template_symbols: Vec<String>,
    nested_symbols: Vec<String>,
}

struct SlotMatch {
    start: usize,
    end: usize,
    slot: Slot,
    anchor: String,
}

const STRING_LITERAL: &str = r#""(?:[^"\\\n]|\\.)*"|'(?:[^'\\\n]|\\.)*'"#;

impl TemplateModel {
    pub fn parse(source: &str, schema: &TemplateSchema) -> Result<Self, SpecializeError> {
        schema.validate()?;

        let mut matches = Vec::<SlotMatch>::new();

        let text_slots = [
            (&schema.title_var, TextField::Title),
            (&schema.description_var, TextField::Description),
            (&schema.category_var, TextField::Category),
            (&schema.keywords_var, TextField::Keywords),
        ];
        for (var, field) in text_slots {
            let regex = compile(&format!(r"(?m)^{var}[ \t]*=[ \t]*({STRING_LITERAL})"))?;
            let anchor = format!("{var} = \"...\"");
            let (start, end) = unique_capture(&regex, source, &anchor)?;
            let quote = source[start..].chars().next().unwrap_or('"');
            matches.push(SlotMatch {
                start,
                end,
                slot: Slot::Text { field, quote },
                anchor,
            });
        }

        let var = &schema.proficiency_var;
        let regex = compile(&format!(r"(?m)^{var}[ \t]*=[ \t]*({STRING_LITERAL}|-?\d+)"))?;
        let anchor = format!("{var} = <label or code>");
        let (start, end) = unique_capture(&regex, source, &anchor)?;
        matches.push(SlotMatch {
            start,
            end,
            slot: Slot::Proficiency,
            anchor,
        });

        let var = &schema.pages_var;
        let regex = compile(&format!(r"(?m)^{var}[ \t]*=[ \t]*(\[)"))?;
        let anchor = format!("{var} = [...]");
        let (start, _) = unique_capture(&regex, source, &anchor)?;
        let end = matching_close(source, start)
            .ok_or_else(|| SpecializeError::UnbalancedBlock { anchor: anchor.clone() })?;
        matches.push(SlotMatch {
            start,
            end,
            slot: Slot::Pages,
            anchor,
        });

        let regex = compile(&format!(
            "({}(?:{})+{})",
            regex::escape(&schema.root_path_prefix),
            regex::escape(&schema.root_path_segment),
            regex::escape(&schema.root_path_suffix),
        ))?;
        let anchor = format!("{}...{}", schema.root_path_prefix, schema.root_path_suffix);
        let (start, end) = unique_capture(&regex, source, &anchor)?;
        matches.push(SlotMatch {
            start,
            end,
            slot: Slot::RootPath,
            anchor,
        });

        let module = regex::escape(schema.import_module.trim());
        let regex = compile(&format!(
            r"(?m)^from[ \t]+{module}[ \t]+import[ \t]+([^\n(#]*[^\s(#,])"
        ))?;
        let anchor = format!("from {} import ...", schema.import_module.trim());
        let (start, end) = unique_capture(&regex, source, &anchor)?;
        let template_symbols = split_symbols(&source[start..end]);
        matches.push(SlotMatch {
            start,
            end,
            slot: Slot::Imports,
            anchor,
        });

        let regex = compile(&format!(
            r"(?m)^[ \t]+from[ \t]+{module}[ \t]+import[ \t]+([^\n(#]*[^\s(#,])[ \t]*(?:\n|$)"
        ))?;
        let mut nested_symbols = Vec::<String>::new();
        for captures in regex.captures_iter(source) {
            let (Some(line), Some(symbols)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            for symbol in split_symbols(symbols.as_str()) {
                push_unique(&mut nested_symbols, symbol);
            }
            matches.push(SlotMatch {
                start: line.start(),
                end: line.end(),
                slot: Slot::NestedImport,
                anchor: format!("nested from {} import ...", schema.import_module.trim()),
            });
        }

        matches.sort_by_key(|m| m.start);
        for pair in matches.windows(2) {
            if pair[1].start < pair[0].end {
                return Err(SpecializeError::OverlappingAnchors {
                    first: pair[0].anchor.clone(),
                    second: pair[1].anchor.clone(),
                });
            }
        }

        let mut segments = Vec::with_capacity(matches.len() * 2 + 1);
        let mut cursor = 0;
        for slot_match in matches {
            if slot_match.start > cursor {
                segments.push(Segment::Literal(source[cursor..slot_match.start].to_string()));
            }
            segments.push(Segment::Slot(slot_match.slot));
            cursor = slot_match.end;
        }
        if cursor < source.len() {
            segments.push(Segment::Literal(source[cursor..].to_string()));
        }

        Ok(Self {
            segments,
            template_symbols,
            nested_symbols,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Top-level symbols, then symbols pulled up from nested imports, then
    /// `required`, each requested once.
    pub fn merged_symbols(&self, required: &[String]) -> Vec<String> {
        let mut merged = Vec::<String>::new();
        for symbol in self
            .template_symbols
            .iter()
            .chain(&self.nested_symbols)
            .chain(required)
        {
            push_unique(&mut merged, symbol.trim().to_string());
        }
        merged
    }

    pub fn render<F>(&self, mut fill: F) -> String
    where
        F: FnMut(&Slot) -> String,
    {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Slot(slot) => out.push_str(&fill(slot)),
            }
        }
        out
    }
}

/// Reads the value of a quoted assignment such as `LESSON_TITLE = "..."`.
pub fn read_assignment(source: &str, var: &str) -> Option<String> {
    let pattern = format!(r"(?m)^{}[ \t]*=[ \t]*({STRING_LITERAL})", regex::escape(var));
    let regex = Regex::new(&pattern).ok()?;
    let literal = regex.captures(source)?.get(1)?.as_str();
    let inner = &literal[1..literal.len() - 1];
    Some(unescape(inner))
}

fn compile(pattern: &str) -> Result<Regex, SpecializeError> {
    Regex::new(pattern).map_err(|err| SpecializeError::InvalidSchema(err.to_string()))
}

fn unique_capture(
    regex: &Regex,
    source: &str,
    anchor: &str,
) -> Result<(usize, usize), SpecializeError> {
    let found: Vec<(usize, usize)> = regex
        .captures_iter(source)
        .filter_map(|captures| captures.get(1))
        .map(|m| (m.start(), m.end()))
        .collect();

    match found.as_slice() {
        [] => Err(SpecializeError::MissingAnchor {
            anchor: anchor.to_string(),
        }),
        [single] => Ok(*single),
        _ => Err(SpecializeError::DuplicateAnchor {
            anchor: anchor.to_string(),
            count: found.len(),
        }),
    }
}

/// Returns the byte index just past the bracket closing the one at `open`.
/// Brackets inside string literals and `#` comments are ignored.
fn matching_close(source: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut in_comment = false;

    for (offset, c) in source[open..].char_indices() {
        if in_comment {
            if c == '\n' {
                in_comment = false;
            }
            continue;
        }
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => quote = Some(c),
            '#' => in_comment = true,
            '[' | '{' | '(' => depth += 1,
            ']' | '}' | ')' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return if c == ']' { Some(open + offset + 1) } else { None };
                }
            }
            _ => {}
        }
    }

    None
}

fn split_symbols(list: &str) -> Vec<String> {
    let mut symbols = Vec::new();
    for symbol in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        push_unique(&mut symbols, symbol.to_string());
    }
    symbols
}

fn push_unique(symbols: &mut Vec<String>, symbol: String) {
    if !symbol.is_empty() && !symbols.contains(&symbol) {
        symbols.push(symbol);
    }
}

pub fn escape(value: &str, quote: char) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

pub fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some(other @ ('\\' | '"' | '\'')) => out.push(other),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}
