//! Trigger key expressions - substring composition and user patterns.

use regex::{Regex, RegexBuilder};
use thiserror::Error;
use tracing::warn;

/// Errors from compiling a trigger key.
#[derive(Debug, Error)]
pub enum PatternError {
    #[error("empty key expression")]
    Empty,

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// A compiled trigger key.
///
/// Plain keys are boolean substring expressions: tokens joined by `&` must
/// all be present, tokens prefixed `!` must be absent. Regex keys match
/// the raw pattern as written. Matching is case-insensitive either way.
#[derive(Debug, Clone)]
pub enum KeyExpr {
    Substring {
        required: Vec<String>,
        forbidden: Vec<String>,
    },
    Pattern(Regex),
}

impl KeyExpr {
    pub fn compile(raw: &str, use_regex: bool) -> Result<Self, PatternError> {
        if use_regex {
            let pattern = RegexBuilder::new(raw).case_insensitive(true).build()?;
            return Ok(KeyExpr::Pattern(pattern));
        }

        let mut required = Vec::new();
        let mut forbidden = Vec::new();
        for token in raw.split('&') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            match token.strip_prefix('!') {
                Some(negated) => {
                    let negated = negated.trim();
                    if !negated.is_empty() {
                        forbidden.push(negated.to_lowercase());
                    }
                }
                None => required.push(token.to_lowercase()),
            }
        }

        if required.is_empty() && forbidden.is_empty() {
            return Err(PatternError::Empty);
        }
        Ok(KeyExpr::Substring {
            required,
            forbidden,
        })
    }

    /// Test against text the caller has already lowercased.
    pub fn matches(&self, text_lower: &str) -> bool {
        match self {
            KeyExpr::Substring {
                required,
                forbidden,
            } => {
                required.iter().all(|token| text_lower.contains(token.as_str()))
                    && forbidden.iter().all(|token| !text_lower.contains(token.as_str()))
            }
            KeyExpr::Pattern(pattern) => pattern.is_match(text_lower),
        }
    }
}

/// The compiled trigger keys of one entry.
///
/// Compilation happens once per scan, not once per matching pass; the scan
/// loop only ever calls [`KeySet::matches`]. A key that fails to compile
/// is dropped with a warning and treated as non-matching; a broken pattern
/// never takes the scan down with it.
#[derive(Debug, Clone, Default)]
pub struct KeySet {
    exprs: Vec<KeyExpr>,
}

impl KeySet {
    pub fn compile(keys: &[String], use_regex: bool) -> Self {
        let exprs = keys
            .iter()
            .filter_map(|raw| match KeyExpr::compile(raw, use_regex) {
                Ok(expr) => Some(expr),
                Err(error) => {
                    warn!(key = raw.as_str(), %error, "skipping unmatchable trigger key");
                    None
                }
            })
            .collect();
        Self { exprs }
    }

    pub fn is_empty(&self) -> bool {
        self.exprs.is_empty()
    }

    /// True if any compiled key matches text the caller has lowercased.
    pub fn matches(&self, text_lower: &str) -> bool {
        self.exprs.iter().any(|expr| expr.matches(text_lower))
    }
}
