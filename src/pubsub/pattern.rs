//! Topic pattern matching.
//!
//! # Responsibilities
//! - Parse declared patterns such as `/items/{id}`, `/users/{id?}`, `/feed/{rest*}`
//! - Match concrete topic paths and extract parameters
//!
//! # Design Decisions
//! - Matching is case-sensitive
//! - Optional and tail parameters may only appear as the last segment
//! - No regex to guarantee O(n) matching

use std::collections::HashMap;

use crate::error::ProtocolError;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param { name: String, optional: bool },
    Tail(String),
}

/// A parsed topic pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPattern {
    raw: String,
    segments: Vec<Segment>,
}

/// Parameters captured by a successful match.
pub type TopicParams = HashMap<String, String>;

/// Reject topics that are not absolute paths.
pub fn validate_topic(topic: &str) -> Result<(), ProtocolError> {
    if !topic.starts_with('/') || topic.contains("//") {
        return Err(ProtocolError::InvalidTopic(topic.to_string()));
    }
    Ok(())
}

fn split(path: &str) -> Vec<&str> {
    match path.trim_start_matches('/') {
        "" => Vec::new(),
        rest => rest.split('/').collect(),
    }
}

impl TopicPattern {
    pub fn parse(pattern: &str) -> Result<Self, ProtocolError> {
        validate_topic(pattern)?;
        let invalid = || ProtocolError::InvalidTopic(pattern.to_string());

        let parts = split(pattern);
        let last = parts.len().saturating_sub(1);
        let mut segments = Vec::with_capacity(parts.len());

        for (i, part) in parts.into_iter().enumerate() {
            let segment = match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
                Some(inner) => {
                    let (name, kind) = match inner.as_bytes().last() {
                        Some(b'*') => (&inner[..inner.len() - 1], Some('*')),
                        Some(b'?') => (&inner[..inner.len() - 1], Some('?')),
                        _ => (inner, None),
                    };
                    if name.is_empty() || !name.chars().all(|c| c.is_alphanumeric() || c == '_') {
                        return Err(invalid());
                    }
                    match kind {
                        Some('*') if i == last => Segment::Tail(name.to_string()),
                        Some('?') if i == last => Segment::Param {
                            name: name.to_string(),
                            optional: true,
                        },
                        Some(_) => return Err(invalid()),
                        None => Segment::Param {
                            name: name.to_string(),
                            optional: false,
                        },
                    }
                }
                None if part.contains('{') || part.contains('}') => return Err(invalid()),
                None => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: pattern.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Match `topic`, returning captured parameters.
    pub fn matches(&self, topic: &str) -> Option<TopicParams> {
        if validate_topic(topic).is_err() {
            return None;
        }
        let parts = split(topic);
        let mut params = TopicParams::new();

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if parts.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Param { name, optional } => match parts.get(i) {
                    Some(value) if !value.is_empty() => {
                        params.insert(name.clone(), value.to_string());
                    }
                    None if *optional => {}
                    _ => return None,
                },
                Segment::Tail(name) => {
                    let rest = parts.get(i..).unwrap_or_default().join("/");
                    params.insert(name.clone(), rest);
                    return Some(params);
                }
            }
        }

        (parts.len() == self.segments.len()
            || (parts.len() + 1 == self.segments.len()
                && matches!(self.segments.last(), Some(Segment::Param { optional: true, .. }))))
        .then_some(params)
    }
}

impl std::fmt::Display for TopicPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_pattern() {
        let pattern = TopicPattern::parse("/news").unwrap();
        assert!(pattern.matches("/news").is_some());
        assert!(pattern.matches("/news/1").is_none());
        assert!(pattern.matches("/NEWS").is_none());
    }

    #[test]
    fn param_pattern_captures() {
        let pattern = TopicPattern::parse("/items/{id}").unwrap();
        let params = pattern.matches("/items/42").unwrap();
        assert_eq!(params["id"], "42");
        assert!(pattern.matches("/items").is_none());
        assert!(pattern.matches("/items/42/extra").is_none());
    }

    #[test]
    fn optional_param_may_be_missing() {
        let pattern = TopicPattern::parse("/users/{id?}").unwrap();
        assert!(pattern.matches("/users").unwrap().is_empty());
        assert_eq!(pattern.matches("/users/a").unwrap()["id"], "a");
    }

    #[test]
    fn tail_param_takes_the_rest() {
        let pattern = TopicPattern::parse("/feed/{rest*}").unwrap();
        assert_eq!(pattern.matches("/feed/a/b/c").unwrap()["rest"], "a/b/c");
        assert_eq!(pattern.matches("/feed").unwrap()["rest"], "");
        assert!(pattern.matches("/other/a").is_none());
    }

    #[test]
    fn rejects_bad_patterns() {
        assert!(TopicPattern::parse("items").is_err());
        assert!(TopicPattern::parse("/a/{rest*}/b").is_err());
        assert!(TopicPattern::parse("/a/{}").is_err());
        assert!(TopicPattern::parse("/a/x{id}").is_err());
    }

    #[test]
    fn root_pattern() {
        let pattern = TopicPattern::parse("/").unwrap();
        assert!(pattern.matches("/").is_some());
        assert!(pattern.matches("/a").is_none());
    }
}
