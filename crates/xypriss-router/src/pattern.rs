//! Pattern compilation and validation.

use crate::error::PatternError;
use std::fmt;

/// One compiled segment of a route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Matches the segment byte-exactly.
    Literal(String),
    /// `:name` - captures exactly one segment under `name`.
    Param(String),
    /// `*` - matches exactly one segment, captured as `*`.
    Wildcard,
    /// `**` - matches one or more trailing segments, captured as `**`.
    DeepWildcard,
}

/// A compiled, validated route pattern.
///
/// Compilation is deterministic: the same input string always yields the
/// same segment list, and invalid inputs are rejected up front so lookup
/// never sees a malformed pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    raw: String,
    segments: Vec<Segment>,
}

impl Pattern {
    /// Compiles `raw` into segments.
    ///
    /// Rules: the pattern must start with `/`; empty segments are invalid
    /// (except the root pattern `/` itself); `:` must be followed by a name;
    /// `**` must be the final segment.
    pub fn compile(raw: &str) -> Result<Self, PatternError> {
        let err = |reason: &'static str| PatternError {
            pattern: raw.to_string(),
            reason,
        };

        if !raw.starts_with('/') {
            return Err(err("pattern must start with `/`"));
        }

        let mut segments = Vec::new();
        if raw != "/" {
            let parts: Vec<&str> = raw[1..].split('/').collect();
            for (index, part) in parts.iter().enumerate() {
                let segment = match *part {
                    "" => return Err(err("empty segment")),
                    "*" => Segment::Wildcard,
                    "**" => {
                        if index + 1 != parts.len() {
                            return Err(err("`**` must be the final segment"));
                        }
                        Segment::DeepWildcard
                    }
                    p if p.starts_with(':') => {
                        let name = &p[1..];
                        if name.is_empty() {
                            return Err(err("`:` must be followed by a name"));
                        }
                        Segment::Param(name.to_string())
                    }
                    p => Segment::Literal(p.to_string()),
                };
                segments.push(segment);
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The pattern as registered.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// The capture name for each non-literal segment, in order.
    pub(crate) fn capture_names(&self) -> impl Iterator<Item = &str> {
        self.segments.iter().filter_map(|s| match s {
            Segment::Param(name) => Some(name.as_str()),
            Segment::Wildcard => Some("*"),
            Segment::DeepWildcard => Some("**"),
            Segment::Literal(_) => None,
        })
    }

    /// Joins `prefix` and `self` for sub-router mounting.
    pub(crate) fn prefixed(&self, prefix: &Pattern) -> Pattern {
        let mut segments = prefix.segments.clone();
        segments.extend(self.segments.iter().cloned());
        let raw = if prefix.raw == "/" {
            self.raw.clone()
        } else if self.raw == "/" {
            prefix.raw.clone()
        } else {
            format!("{}{}", prefix.raw, self.raw)
        };
        Pattern { raw, segments }
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Splits a request path into segments. The root path has no segments.
pub(crate) fn path_segments(path: &str) -> Vec<&str> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    if trimmed.is_empty() {
        Vec::new()
    } else {
        trimmed.split('/').collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_mixed() {
        let p = Pattern::compile("/api/:version/files/**").unwrap();
        assert_eq!(
            p.segments(),
            &[
                Segment::Literal("api".into()),
                Segment::Param("version".into()),
                Segment::Literal("files".into()),
                Segment::DeepWildcard,
            ]
        );
    }

    #[test]
    fn test_root_pattern() {
        let p = Pattern::compile("/").unwrap();
        assert!(p.segments().is_empty());
    }

    #[test]
    fn test_rejects_missing_leading_slash() {
        assert!(Pattern::compile("users").is_err());
    }

    #[test]
    fn test_rejects_empty_segment() {
        assert!(Pattern::compile("/users//x").is_err());
        assert!(Pattern::compile("/users/").is_err());
    }

    #[test]
    fn test_rejects_anonymous_param() {
        assert!(Pattern::compile("/users/:").is_err());
    }

    #[test]
    fn test_rejects_interior_deep_wildcard() {
        assert!(Pattern::compile("/a/**/b").is_err());
        assert!(Pattern::compile("/a/**").is_ok());
    }

    #[test]
    fn test_prefixed() {
        let prefix = Pattern::compile("/api").unwrap();
        let sub = Pattern::compile("/users/:id").unwrap();
        let joined = sub.prefixed(&prefix);
        assert_eq!(joined.as_str(), "/api/users/:id");
        assert_eq!(joined.segments().len(), 3);

        let root_sub = Pattern::compile("/").unwrap();
        assert_eq!(root_sub.prefixed(&prefix).as_str(), "/api");
    }

    #[test]
    fn test_path_segments() {
        assert_eq!(path_segments("/a/b"), vec!["a", "b"]);
        assert!(path_segments("/").is_empty());
    }

    #[test]
    fn test_compile_is_deterministic() {
        let a = Pattern::compile("/x/:y/*").unwrap();
        let b = Pattern::compile("/x/:y/*").unwrap();
        assert_eq!(a, b);
    }
}
