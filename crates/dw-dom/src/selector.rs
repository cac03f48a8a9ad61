//! Selectors
//!
//! Compound selectors (`tag.class#id[attr=value]`, `*`) and comma-separated
//! selector lists. Combinators are not supported: delegation and containment
//! checks only ever test a single element.

use crate::{DomError, DomResult, ElementData};

/// Simple selector for matching
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimpleSelector {
    Tag(String),
    Class(String),
    Id(String),
    Attribute { name: String, value: Option<String> },
    Universal,
}

impl SimpleSelector {
    pub fn matches(&self, elem: &ElementData) -> bool {
        match self {
            Self::Universal => true,
            Self::Tag(tag) => elem.tag_name().eq_ignore_ascii_case(tag),
            Self::Id(id) => elem.id() == Some(id.as_str()),
            Self::Class(class) => elem.has_class(class),
            Self::Attribute { name, value } => match (elem.get_attr(name), value) {
                (Some(actual), Some(expected)) => actual == expected,
                (Some(_), None) => true,
                (None, _) => false,
            },
        }
    }
}

/// All simple selectors must match
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompoundSelector {
    parts: Vec<SimpleSelector>,
}

impl CompoundSelector {
    /// Parse one compound selector; `None` if malformed
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() || s.contains(char::is_whitespace) {
            return None;
        }

        let is_delim = |c: char| matches!(c, '.' | '#' | '[');
        let mut parts = Vec::new();

        let head_end = s.find(is_delim).unwrap_or(s.len());
        let head = &s[..head_end];
        if head == "*" {
            parts.push(SimpleSelector::Universal);
        } else if !head.is_empty() {
            if !is_ident(head) {
                return None;
            }
            parts.push(SimpleSelector::Tag(head.to_ascii_lowercase()));
        }

        let mut rest = &s[head_end..];
        while let Some(first) = rest.chars().next() {
            match first {
                '.' | '#' => {
                    let body = &rest[1..];
                    let end = body.find(is_delim).unwrap_or(body.len());
                    let name = &body[..end];
                    if !is_ident(name) {
                        return None;
                    }
                    parts.push(if first == '.' {
                        SimpleSelector::Class(name.to_string())
                    } else {
                        SimpleSelector::Id(name.to_string())
                    });
                    rest = &body[end..];
                }
                '[' => {
                    let close = rest.find(']')?;
                    let inner = &rest[1..close];
                    let (name, value) = match inner.split_once('=') {
                        Some((name, value)) => (name, Some(unquote(value)?)),
                        None => (inner, None),
                    };
                    if !is_ident(name) {
                        return None;
                    }
                    parts.push(SimpleSelector::Attribute {
                        name: name.to_string(),
                        value: value.map(str::to_string),
                    });
                    rest = &rest[close + 1..];
                }
                _ => return None,
            }
        }

        Some(Self { parts })
    }

    pub fn parts(&self) -> &[SimpleSelector] {
        &self.parts
    }

    pub fn matches(&self, elem: &ElementData) -> bool {
        self.parts.iter().all(|p| p.matches(elem))
    }
}

/// Selector list: matches if any alternative matches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<CompoundSelector>,
}

impl Selector {
    /// Parse a selector list such as `button.primary, a[href]`
    pub fn parse(source: &str) -> DomResult<Self> {
        let alternatives = source
            .split(',')
            .map(CompoundSelector::parse)
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| DomError::InvalidSelector(source.to_string()))?;

        Ok(Self {
            source: source.trim().to_string(),
            alternatives,
        })
    }

    /// Source text as given (trimmed)
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn alternatives(&self) -> &[CompoundSelector] {
        &self.alternatives
    }

    pub fn matches(&self, elem: &ElementData) -> bool {
        self.alternatives.iter().any(|c| c.matches(elem))
    }
}

fn is_ident(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}

fn unquote(value: &str) -> Option<&str> {
    let quoted = |q: char| value.len() >= 2 && value.starts_with(q) && value.ends_with(q);
    if quoted('"') || quoted('\'') {
        Some(&value[1..value.len() - 1])
    } else if value.contains(|c: char| c == '"' || c == '\'') {
        None
    } else {
        Some(value)
    }
}
