//! Minimal JSON path selection for captures and assertions.
//!
//! Supported syntax: dotted identifiers (`data.user.name`), bracket indices
//! (`items[0]`), and combinations (`data.items[2].id`). A leading `$` or
//! `$.` is permitted and ignored. No wildcards, no filter expressions.

use serde_json::Value;

/// Outcome of a path lookup. `Miss` is distinct from a literal JSON `null`:
/// a document `{"a":null}` yields `Value(null)` for `a` but `Miss` for `b`.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Value(Value),
    Miss,
}

impl Extracted {
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    /// The found value, if any. A found `null` returns `Some(Value::Null)`.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Self::Value(v) => Some(v),
            Self::Miss => None,
        }
    }
}

#[derive(Debug, PartialEq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// Selects a value from `doc`. Unparseable paths and paths that walk off the
/// document both yield `Miss`.
pub fn extract(doc: &Value, path: &str) -> Extracted {
    let trimmed = path
        .strip_prefix("$.")
        .or_else(|| path.strip_prefix('$'))
        .unwrap_or(path);

    if trimmed.is_empty() {
        return Extracted::Value(doc.clone());
    }

    let segments = match split_segments(trimmed) {
        Some(segments) => segments,
        None => return Extracted::Miss,
    };

    let mut current = doc;
    for segment in &segments {
        current = match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => match map.get(key) {
                Some(next) => next,
                None => return Extracted::Miss,
            },
            (Segment::Index(i), Value::Array(items)) => match items.get(*i) {
                Some(next) => next,
                None => return Extracted::Miss,
            },
            _ => return Extracted::Miss,
        };
    }

    Extracted::Value(current.clone())
}

/// Splits `data.items[2].id` into `[Key(data), Key(items), Index(2), Key(id)]`.
/// Returns `None` on malformed bracket syntax.
fn split_segments(path: &str) -> Option<Vec<Segment>> {
    let mut segments = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '.' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
            }
            '[' => {
                if !current.is_empty() {
                    segments.push(Segment::Key(std::mem::take(&mut current)));
                }
                let mut index = String::new();
                loop {
                    match chars.next() {
                        Some(']') => break,
                        Some(d) => index.push(d),
                        None => return None,
                    }
                }
                segments.push(Segment::Index(index.parse().ok()?));
                // An index may be followed by `.key`, another `[`, or the end.
                if chars.peek() == Some(&'.') {
                    chars.next();
                }
            }
            _ => current.push(c),
        }
    }

    if !current.is_empty() {
        segments.push(Segment::Key(current));
    }
    Some(segments)
}
