use crate::core::{Result, StoreError};
use lru::LruCache;
use regex::Regex;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

const REGEX_CACHE_CAPACITY: usize = 200;

lazy_static::lazy_static! {
    static ref REGEX_LRU_CACHE: Mutex<LruCache<String, Arc<Regex>>> = Mutex::new(LruCache::new(
        NonZeroUsize::new(REGEX_CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN)
    ));
}

/// Translates a LIKE pattern (`%` any run, `_` one char, `\` escape) into an
/// anchored regex.
fn like_to_regex(pattern: &str) -> String {
    let mut regex = String::with_capacity(pattern.len() + 2);
    regex.push('^');

    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' => match chars.next() {
                Some(escaped) => regex.push_str(&regex::escape(&escaped.to_string())),
                None => regex.push_str(&regex::escape("\\")),
            },
            c => regex.push_str(&regex::escape(&c.to_string())),
        }
    }

    regex.push('$');
    regex
}

/// Prefix/suffix/substring/exact patterns never need a regex.
fn fast_path_like(text: &str, pattern: &str, case_sensitive: bool) -> Option<bool> {
    if pattern.contains('_') || pattern.contains('\\') {
        return None;
    }

    let (text, pattern) = if case_sensitive {
        (text.to_string(), pattern.to_string())
    } else {
        (text.to_lowercase(), pattern.to_lowercase())
    };

    let wildcards = pattern.matches('%').count();
    match wildcards {
        0 => Some(text == pattern),
        1 if pattern.ends_with('%') => Some(text.starts_with(&pattern[..pattern.len() - 1])),
        1 if pattern.starts_with('%') => Some(text.ends_with(&pattern[1..])),
        2 if pattern.len() >= 2 && pattern.starts_with('%') && pattern.ends_with('%') => {
            Some(text.contains(&pattern[1..pattern.len() - 1]))
        }
        _ => None,
    }
}

fn get_or_compile_regex(pattern: &str, case_sensitive: bool) -> Result<Arc<Regex>> {
    let cache_key = if case_sensitive {
        format!("s:{}", pattern)
    } else {
        format!("i:{}", pattern)
    };

    if let Some(regex) = REGEX_LRU_CACHE.lock()?.get(&cache_key) {
        return Ok(Arc::clone(regex));
    }

    let compiled = regex::RegexBuilder::new(&like_to_regex(pattern))
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| StoreError::InvalidQuery(format!("Invalid LIKE pattern '{}': {}", pattern, e)))?;
    let compiled = Arc::new(compiled);

    REGEX_LRU_CACHE.lock()?.put(cache_key, Arc::clone(&compiled));
    Ok(compiled)
}

/// Checks that a LIKE pattern compiles.
pub fn validate_like(pattern: &str, case_sensitive: bool) -> Result<()> {
    if fast_path_like("", pattern, case_sensitive).is_some() {
        return Ok(());
    }
    get_or_compile_regex(pattern, case_sensitive).map(|_| ())
}

pub fn eval_like(text: &str, pattern: &str, case_sensitive: bool) -> Result<bool> {
    if let Some(result) = fast_path_like(text, pattern, case_sensitive) {
        return Ok(result);
    }

    let regex = get_or_compile_regex(pattern, case_sensitive)?;
    Ok(regex.is_match(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_paths() {
        assert!(eval_like("Biology 101", "Biology%", true).unwrap());
        assert!(eval_like("Biology 101", "%101", true).unwrap());
        assert!(eval_like("Biology 101", "%logy%", true).unwrap());
        assert!(eval_like("biology", "BIOLOGY", false).unwrap());
        assert!(!eval_like("biology", "BIOLOGY", true).unwrap());
    }

    #[test]
    fn test_regex_paths() {
        assert!(eval_like("unit_1", "unit\\_1", true).unwrap());
        assert!(!eval_like("unitx1", "unit\\_1", true).unwrap());
        assert!(eval_like("a.b", "a_b", true).unwrap());
        assert!(eval_like("Week 3 (quiz)", "Week _ (%)", true).unwrap());
    }
}
