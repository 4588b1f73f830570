use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

pub const ELLIPSIS: &str = "...";

/// Proficiency vocabulary a label is interpreted in.
///
/// The two scales disagree on their fallback: the five-point scale falls back
/// to "Intermediate" (3) while the four-point scale falls back to its own
/// "Intermediate" (2). Callers pick the scale explicitly.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelScale {
    #[default]
    Standard,
    Compact,
}

impl LevelScale {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Compact => "compact",
        }
    }

    pub fn max_code(self) -> u8 {
        match self {
            Self::Standard => 5,
            Self::Compact => 4,
        }
    }

    pub fn default_code(self) -> u8 {
        match self {
            Self::Standard => 3,
            Self::Compact => 2,
        }
    }

    fn labels(self) -> &'static [&'static str] {
        match self {
            Self::Standard => &[
                "Beginner",
                "Pre-Intermediate",
                "Intermediate",
                "Advanced",
                "Expert",
            ],
            Self::Compact => &["Beginner", "Intermediate", "Advanced", "Expert"],
        }
    }

    fn lookup(self, label: &str) -> Option<u8> {
        let code = match self {
            Self::Standard => match label {
                "beginner" | "elementary" | "easy" | "basic" | "novice" => 1,
                "pre-intermediate" | "lower-intermediate" => 2,
                "intermediate" | "medium" => 3,
                "advanced" | "hard" | "difficult" => 4,
                "expert" | "master" | "proficient" => 5,
                _ => return None,
            },
            Self::Compact => match label {
                "beginner" | "elementary" | "easy" | "basic" | "novice" => 1,
                "intermediate" | "medium" | "pre-intermediate" | "lower-intermediate" => 2,
                "advanced" | "hard" | "difficult" => 3,
                "expert" | "master" | "proficient" => 4,
                _ => return None,
            },
        };
        Some(code)
    }

    fn in_range(self, value: i64) -> Option<u8> {
        if (1..=i64::from(self.max_code())).contains(&value) {
            Some(value as u8)
        } else {
            None
        }
    }
}

/// A proficiency value as it arrives from a generated structure: either a
/// numeric code or a free-form label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum LevelInput {
    Code(i64),
    Label(String),
}

/// Accepts any JSON value. Whole numbers become codes, strings become labels,
/// and everything else becomes an empty label that maps to the scale default.
impl<'de> Deserialize<'de> for LevelInput {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        let input = match value {
            Value::String(label) => Self::Label(label),
            Value::Number(number) => match number.as_i64() {
                Some(code) => Self::Code(code),
                None => number
                    .as_f64()
                    .filter(|float| float.fract() == 0.0 && float.abs() <= i64::MAX as f64)
                    .map(|float| Self::Code(float as i64))
                    .unwrap_or_default(),
            },
            _ => Self::default(),
        };
        Ok(input)
    }
}

impl Default for LevelInput {
    fn default() -> Self {
        Self::Label(String::new())
    }
}

impl From<&str> for LevelInput {
    fn from(value: &str) -> Self {
        Self::Label(value.to_string())
    }
}

impl From<i64> for LevelInput {
    fn from(value: i64) -> Self {
        Self::Code(value)
    }
}

impl std::fmt::Display for LevelInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code(code) => write!(f, "{code}"),
            Self::Label(label) => f.write_str(label),
        }
    }
}

/// Maps a label or code onto the scale. Never fails: anything unrecognized
/// yields the scale's default code.
pub fn label_to_code(input: &LevelInput, scale: LevelScale) -> u8 {
    match input {
        LevelInput::Code(value) => scale.in_range(*value).unwrap_or(scale.default_code()),
        LevelInput::Label(label) => label_str_to_code(label, scale),
    }
}

fn label_str_to_code(label: &str, scale: LevelScale) -> u8 {
    let normalized = normalize_label(label);
    if normalized.is_empty() {
        return scale.default_code();
    }

    if let Some(code) = scale.lookup(&normalized) {
        return code;
    }

    if let Ok(value) = normalized.parse::<i64>() {
        return scale.in_range(value).unwrap_or(scale.default_code());
    }

    // Rank letter followed by a digit, e.g. "N4" or "a2".
    let mut chars = normalized.chars();
    let rank_digit = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => chars.as_str().parse::<i64>().ok(),
        _ => None,
    };

    rank_digit
        .and_then(|value| scale.in_range(value))
        .unwrap_or(scale.default_code())
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '_' || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}

pub fn code_to_label(code: i64, scale: LevelScale) -> &'static str {
    let labels = scale.labels();
    let index = scale
        .in_range(code)
        .unwrap_or(scale.default_code())
        .saturating_sub(1) as usize;
    labels[index]
}

/// Cuts `text` to at most `max_len` characters, marking the cut with an
/// ellipsis when there is room for one.
pub fn truncate(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        return text.to_string();
    }

    let marker_len = ELLIPSIS.chars().count();
    if max_len < marker_len {
        return text.chars().take(max_len).collect();
    }

    let mut out: String = text.chars().take(max_len - marker_len).collect();
    out.push_str(ELLIPSIS);
    out
}
