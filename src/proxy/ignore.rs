//! Commands whose output is not worth auditing

use regex::Regex;

use crate::config::DEFAULT_IGNORE_COMMANDS;
use crate::error::{ProxyError, Result};

/// Matches commands like `cat file` or `tail -f log` whose output would
/// flood the audit log. The command itself is still recorded.
#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    patterns: Vec<Regex>,
}

impl IgnoreFilter {
    /// Compile the given patterns
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    ProxyError::config(format!("Invalid ignore pattern '{}': {}", p.as_ref(), e))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// True if a pattern matches at the start of `command`
    pub fn matches(&self, command: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.find(command).is_some_and(|m| m.start() == 0))
    }
}

impl Default for IgnoreFilter {
    fn default() -> Self {
        Self::new(DEFAULT_IGNORE_COMMANDS).expect("default ignore patterns are valid")
    }
}
