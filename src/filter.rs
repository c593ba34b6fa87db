//! Include/exclude filters deciding which calls are instrumented
//!
//! Module filters match when the pattern equals or is contained in the
//! call's module path. Function filters are regular expressions matched from
//! the start of the function name. Exclusions are checked first; a non-empty
//! include list then requires at least one match.

use crate::config::FilterConfig;
use regex::Regex;

/// Decides whether a `module::function` call should be timed
#[derive(Debug, Clone, Default)]
pub struct CallFilter {
    include_modules: Vec<String>,
    exclude_modules: Vec<String>,
    include_functions: Vec<Regex>,
    exclude_functions: Vec<Regex>,
}

impl CallFilter {
    /// Create a filter that tracks every call
    pub fn all() -> Self {
        Self::default()
    }

    /// Build from configuration; invalid patterns are skipped with a warning
    pub fn from_config(config: &FilterConfig) -> Self {
        Self {
            include_modules: config.include_modules.clone(),
            exclude_modules: config.exclude_modules.clone(),
            include_functions: compile_patterns(&config.include_functions),
            exclude_functions: compile_patterns(&config.exclude_functions),
        }
    }

    /// Check whether a call should be instrumented
    pub fn should_track(&self, module: &str, function: &str) -> bool {
        if self.exclude_modules.iter().any(|p| module_matches(module, p)) {
            return false;
        }
        if self.exclude_functions.iter().any(|re| re.is_match(function)) {
            return false;
        }
        if !self.include_modules.is_empty()
            && !self.include_modules.iter().any(|p| module_matches(module, p))
        {
            return false;
        }
        if !self.include_functions.is_empty()
            && !self.include_functions.iter().any(|re| re.is_match(function))
        {
            return false;
        }
        true
    }

    /// Check a qualified `module::function` name
    pub fn should_track_qualified(&self, qualified: &str) -> bool {
        let (module, function) = split_qualified(qualified);
        self.should_track(module, function)
    }

    pub fn is_unrestricted(&self) -> bool {
        self.include_modules.is_empty()
            && self.exclude_modules.is_empty()
            && self.include_functions.is_empty()
            && self.exclude_functions.is_empty()
    }
}

/// Split `a::b::func` into (`a::b`, `func`); a bare name has an empty module
pub fn split_qualified(qualified: &str) -> (&str, &str) {
    match qualified.rfind("::") {
        Some(idx) => (&qualified[..idx], &qualified[idx + 2..]),
        None => ("", qualified),
    }
}

// Substring containment also covers the exact match.
fn module_matches(module: &str, pattern: &str) -> bool {
    !pattern.is_empty() && module.contains(pattern)
}

fn compile_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(&format!("^(?:{p})")) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("skipping invalid function filter '{}': {}", p, e);
                None
            }
        })
        .collect()
}
