//! Invalidation patterns over `"{part_id}_{color_id}"` keys
//!
//! A pattern without wildcards names one key exactly. `*` matches any run of
//! characters and `?` a single character. The memory tier matches the full
//! glob; the persistent and remote tiers delete by the literal prefix before
//! the first wildcard, which can only over-delete.

use regex::Regex;

use super::CacheError;

#[derive(Debug, Clone)]
pub enum KeyPattern {
    Exact(String),
    Glob { pattern: String, regex: Regex, prefix: String },
}

impl KeyPattern {
    pub fn parse(pattern: &str) -> Result<Self, CacheError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Err(CacheError::InvalidPattern("empty pattern".to_string()));
        }

        let Some(first_wildcard) = pattern.find(['*', '?']) else {
            return Ok(Self::Exact(pattern.to_string()));
        };

        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for ch in pattern.chars() {
            match ch {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr)
            .map_err(|e| CacheError::InvalidPattern(format!("{}: {}", pattern, e)))?;

        Ok(Self::Glob {
            pattern: pattern.to_string(),
            regex,
            prefix: pattern[..first_wildcard].to_string(),
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            Self::Exact(k) => k == key,
            Self::Glob { regex, .. } => regex.is_match(key),
        }
    }

    /// Literal text every matching key starts with
    pub fn prefix(&self) -> &str {
        match self {
            Self::Exact(k) => k,
            Self::Glob { prefix, .. } => prefix,
        }
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Exact(k) => k,
            Self::Glob { pattern, .. } => pattern,
        }
    }
}
