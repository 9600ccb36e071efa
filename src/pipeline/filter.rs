//! Tag name filters built from glob patterns.

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::Result;

/// Compiled set of tag patterns, matched against lower-cased tag names.
#[derive(Debug, Clone)]
pub struct TagPatterns {
    patterns: Vec<String>,
    set: GlobSet,
}

impl TagPatterns {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        let mut normalized = Vec::with_capacity(patterns.len());
        for pattern in patterns {
            let pattern = pattern.as_ref().trim().to_lowercase();
            if pattern.is_empty() {
                continue;
            }
            builder.add(Glob::new(&pattern)?);
            normalized.push(pattern);
        }
        Ok(Self {
            patterns: normalized,
            set: builder.build()?,
        })
    }

    pub fn is_match(
        &self,
        tag_key: &str,
    ) -> bool {
        self.set.is_match(tag_key)
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Union of two pattern sets.
    pub fn union(
        &self,
        other: &TagPatterns,
    ) -> Result<Self> {
        let all: Vec<&String> = self.patterns.iter().chain(other.patterns.iter()).collect();
        Self::new(&all)
    }
}

/// Allow/deny filter over child tags. An empty allow list admits everything.
#[derive(Debug, Clone)]
pub struct TagFilter {
    allow: TagPatterns,
    deny: TagPatterns,
}

impl TagFilter {
    pub fn new<S: AsRef<str>>(
        allow: &[S],
        deny: &[S],
    ) -> Result<Self> {
        Ok(Self {
            allow: TagPatterns::new(allow)?,
            deny: TagPatterns::new(deny)?,
        })
    }

    pub fn admits(
        &self,
        tag_key: &str,
    ) -> bool {
        (self.allow.is_empty() || self.allow.is_match(tag_key)) && !self.deny.is_match(tag_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_patterns_exact_and_glob() {
        let patterns = TagPatterns::new(&["W", "note*"]).unwrap();
        assert!(patterns.is_match("w"));
        assert!(patterns.is_match("notegrp"));
        assert!(!patterns.is_match("pc"));
        assert_eq!(patterns.patterns(), &["w".to_string(), "note*".to_string()]);
    }

    #[test]
    fn test_patterns_union() {
        let a = TagPatterns::new(&["w"]).unwrap();
        let b = TagPatterns::new(&["pc"]).unwrap();
        let u = a.union(&b).unwrap();
        assert!(u.is_match("w") && u.is_match("pc"));
    }

    #[test]
    fn test_filter_allow_deny() {
        let filter = TagFilter::new(&["w", "pc"], &["pc"]).unwrap();
        assert!(filter.admits("w"));
        assert!(!filter.admits("pc"));
        assert!(!filter.admits("note"));

        let deny_only = TagFilter::new(&[] as &[&str], &["note"]).unwrap();
        assert!(deny_only.admits("w"));
        assert!(!deny_only.admits("note"));
    }

    #[test]
    fn test_invalid_glob() {
        assert!(TagPatterns::new(&["[w"]).is_err());
    }
}
