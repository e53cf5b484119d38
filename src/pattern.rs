//! Policy table and glob pattern resolver.
//!
//! Patterns are compiled once when the policy is installed and kept in
//! specificity order: exact strings first, then fewer wildcards, then
//! longer literal prefix, then declaration order. Resolution scans key
//! patterns, then source patterns, then falls back to the default mode
//! — a key hit always beats a source hit.

use std::cmp::Reverse;

use globset::{GlobBuilder, GlobMatcher};
use serde::Deserialize;

use crate::Error;

/// Ordered `(glob, mode_name)` tables plus the default mode.
///
/// Key patterns match the entry key; source patterns match the source
/// file's basename. Globs understand `*` (any run of characters) and
/// `?` (one character); patterns without wildcards match exactly.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Policy {
    pub patterns: Vec<(String, String)>,
    pub sources: Vec<(String, String)>,
    pub default_mode: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            patterns: Vec::new(),
            sources: Vec::new(),
            default_mode: crate::mode::MODE_FULL.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
enum Matcher {
    Exact(String),
    Glob(GlobMatcher),
}

#[derive(Debug, Clone)]
struct CompiledPattern {
    matcher: Matcher,
    mode: String,
    wildcards: usize,
    literal_prefix: usize,
    index: usize,
}

impl CompiledPattern {
    fn compile(pattern: &str, mode: &str, index: usize) -> Result<Self, Error> {
        let wildcards = pattern
            .bytes()
            .filter(|b| matches!(b, b'*' | b'?' | b'[' | b'{'))
            .count();
        let literal_prefix = pattern
            .find(['*', '?', '[', '{'])
            .unwrap_or(pattern.len());
        let matcher = if wildcards == 0 {
            Matcher::Exact(pattern.to_string())
        } else {
            let glob = GlobBuilder::new(pattern)
                .literal_separator(false)
                .build()
                .map_err(|err| Error::InvalidPattern {
                    pattern: pattern.to_string(),
                    detail: err.to_string(),
                })?;
            Matcher::Glob(glob.compile_matcher())
        };
        Ok(Self {
            matcher,
            mode: mode.to_string(),
            wildcards,
            literal_prefix,
            index,
        })
    }

    fn matches(&self, text: &str) -> bool {
        match &self.matcher {
            Matcher::Exact(pattern) => pattern == text,
            Matcher::Glob(matcher) => matcher.is_match(text),
        }
    }

    fn specificity(&self) -> (usize, Reverse<usize>, usize) {
        (self.wildcards, Reverse(self.literal_prefix), self.index)
    }
}

/// Compiled form of a [`Policy`].
#[derive(Debug, Clone)]
pub(crate) struct PatternResolver {
    key_patterns: Vec<CompiledPattern>,
    source_patterns: Vec<CompiledPattern>,
    default_mode: String,
}

impl Default for PatternResolver {
    fn default() -> Self {
        Self {
            key_patterns: Vec::new(),
            source_patterns: Vec::new(),
            default_mode: crate::mode::MODE_FULL.to_string(),
        }
    }
}

impl PatternResolver {
    pub(crate) fn compile(policy: &Policy) -> Result<Self, Error> {
        Ok(Self {
            key_patterns: compile_table(&policy.patterns)?,
            source_patterns: compile_table(&policy.sources)?,
            default_mode: policy.default_mode.clone(),
        })
    }

    /// Mode name for `key`, consulting source patterns only when no
    /// key pattern matches.
    pub(crate) fn resolve(&self, key: &str, source_basename: Option<&str>) -> &str {
        for pattern in &self.key_patterns {
            if pattern.matches(key) {
                return &pattern.mode;
            }
        }
        if let Some(basename) = source_basename {
            for pattern in &self.source_patterns {
                if pattern.matches(basename) {
                    return &pattern.mode;
                }
            }
        }
        &self.default_mode
    }

    pub(crate) fn default_mode(&self) -> &str {
        &self.default_mode
    }
}

fn compile_table(table: &[(String, String)]) -> Result<Vec<CompiledPattern>, Error> {
    let mut compiled = table
        .iter()
        .enumerate()
        .map(|(index, (pattern, mode))| CompiledPattern::compile(pattern, mode, index))
        .collect::<Result<Vec<_>, _>>()?;
    compiled.sort_by_key(CompiledPattern::specificity);
    Ok(compiled)
}
