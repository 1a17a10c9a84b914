//! Key Patterns
//!
//! Glob-style key patterns (`*`, `?`, `[...]`, `\` escapes) as understood by
//! Redis `SCAN ... MATCH`. The remote level matches them exactly; the local
//! level has no index to glob over, so it removes every key containing the
//! pattern's longest literal run instead.

use crate::error::{CacheError, Result};

/// A validated invalidation pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPattern {
    raw: String,
    literal: String,
    match_all: bool,
}

impl KeyPattern {
    /// Parse and validate a glob pattern
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidPattern`] when the pattern is empty, contains
    /// whitespace or control characters, has an unterminated `[` class or a
    /// dangling `\`, or has no literal component while not matching everything.
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(CacheError::invalid_pattern(pattern, "pattern is empty"));
        }
        if pattern.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CacheError::invalid_pattern(
                pattern,
                "pattern contains whitespace or control characters",
            ));
        }

        if pattern.chars().all(|c| c == '*') {
            return Ok(Self {
                raw: pattern.to_string(),
                literal: String::new(),
                match_all: true,
            });
        }

        let literal = longest_literal_run(pattern)?;
        if literal.is_empty() {
            return Err(CacheError::invalid_pattern(
                pattern,
                "pattern has no literal component",
            ));
        }

        Ok(Self {
            raw: pattern.to_string(),
            literal,
            match_all: false,
        })
    }

    /// The pattern as written
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// True for `*` (and `**`, ...), which clears a level entirely
    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.match_all
    }

    /// Longest run of non-wildcard characters, used for L1 substring matching
    #[must_use]
    pub fn literal(&self) -> &str {
        &self.literal
    }

    /// Approximate match used by the local level
    #[must_use]
    pub fn matches_local(&self, key: &str) -> bool {
        self.match_all || key.contains(self.literal.as_str())
    }

    /// Exact glob match
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        glob_match(self.raw.as_bytes(), key.as_bytes())
    }
}

fn longest_literal_run(pattern: &str) -> Result<String> {
    let mut best = String::new();
    let mut current = String::new();
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '*' | '?' => flush_run(&mut current, &mut best),
            '[' => {
                flush_run(&mut current, &mut best);
                let mut closed = false;
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => {
                            if chars.next().is_none() {
                                return Err(CacheError::invalid_pattern(
                                    pattern,
                                    "dangling escape character",
                                ));
                            }
                        }
                        ']' => {
                            closed = true;
                            break;
                        }
                        _ => {}
                    }
                }
                if !closed {
                    return Err(CacheError::invalid_pattern(
                        pattern,
                        "unterminated character class",
                    ));
                }
            }
            '\\' => match chars.next() {
                Some(escaped) => current.push(escaped),
                None => {
                    return Err(CacheError::invalid_pattern(
                        pattern,
                        "dangling escape character",
                    ));
                }
            },
            _ => current.push(c),
        }
    }
    flush_run(&mut current, &mut best);

    Ok(best)
}

fn flush_run(current: &mut String, best: &mut String) {
    if current.len() > best.len() {
        std::mem::swap(current, best);
    }
    current.clear();
}

/// Escape glob metacharacters so `text` matches only itself
#[must_use]
pub fn escape(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Redis-compatible glob matching over raw bytes
///
/// Iterative; on a mismatch only the most recent `*` is retried, so the
/// cost stays at O(pattern * text) whatever the number of stars.
#[must_use]
pub fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0, 0);
    // Pattern index after the last `*` and the text index it was tried at
    let mut retry: Option<(usize, usize)> = None;

    while let Some(&c) = text.get(t) {
        if pattern.get(p) == Some(&b'*') {
            p += 1;
            retry = Some((p, t));
            continue;
        }
        if let Some(next) = match_one(pattern, p, c) {
            p = next;
            t += 1;
            continue;
        }
        match retry {
            Some((star_p, star_t)) => {
                p = star_p;
                t = star_t + 1;
                retry = Some((star_p, t));
            }
            None => return false,
        }
    }

    pattern.get(p..).unwrap_or_default().iter().all(|&b| b == b'*')
}

/// Match a single text byte against the token at `pattern[p]`; returns the
/// index of the next token
fn match_one(pattern: &[u8], p: usize, c: u8) -> Option<usize> {
    match pattern.get(p..)? {
        [b'?', ..] => Some(p + 1),
        [b'[', class @ ..] => match match_class(class, c) {
            Some((true, after)) => Some(pattern.len() - after.len()),
            _ => None,
        },
        [b'\\', escaped, ..] => (*escaped == c).then_some(p + 2),
        [literal, ..] => (*literal == c).then_some(p + 1),
        [] => None,
    }
}

/// Match `c` against a class body (text after `[`); returns the verdict and
/// the pattern remaining after the closing `]`
fn match_class(class: &[u8], c: u8) -> Option<(bool, &[u8])> {
    let (negate, mut body) = match class.split_first() {
        Some((b'^', rest)) => (true, rest),
        _ => (false, class),
    };
    let mut matched = false;

    loop {
        match body {
            [] => return None,
            [b']', rest @ ..] => return Some((matched != negate, rest)),
            [b'\\', escaped, rest @ ..] => {
                matched |= *escaped == c;
                body = rest;
            }
            [start, b'-', end, rest @ ..] if *end != b']' => {
                let (lo, hi) = if start <= end { (*start, *end) } else { (*end, *start) };
                matched |= (lo..=hi).contains(&c);
                body = rest;
            }
            [single, rest @ ..] => {
                matched |= *single == c;
                body = rest;
            }
        }
    }
}
