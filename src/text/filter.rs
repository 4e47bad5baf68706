//! Boilerplate removal ahead of segmentation.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::voice::TextFilterRule;
use crate::{NarrateError, Result};

static COPYRIGHT: Lazy<Regex> = Lazy::new(|| {
    // Runs until the next paragraph that opens with a capital, or the end.
    Regex::new(r"(?s)Copyright\s*(?:©|\([cC]\))\s*\d{4}.*?(\n\n[A-Z]|\z)").expect("valid regex")
});

static ACKNOWLEDGMENTS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)(?:(?i:A C K N O W L E D G (?:E )?M E N T S)|(?m:^[ \t]*ACKNOWLEDG(?:E)?MENTS[ \t]*$)).*",
    )
    .expect("valid regex")
});

static PRODUCTION_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"INT_\d+\.indd.*?\d{1,2}/\d{1,2}/\d{2,4}.*?[AP]M").expect("valid regex")
});

static BOILERPLATE_SECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)FOR MY READERS[^\n]*\n?").expect("valid regex"));

static PAGE_NUMBER_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*\d{1,4}[ \t]*(?:\n|\z)").expect("valid regex"));

static BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t]*\n){2,}").expect("valid regex"));

/// One pattern-match-and-delete step.
#[derive(Debug, Clone)]
struct FilterRule {
    tag: String,
    pattern: Regex,
    replacement: &'static str,
}

/// Output of [`ContentFilter::filter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterOutcome {
    pub text: String,
    /// Tags of the rules that removed something, in application order.
    pub removed: Vec<String>,
}

/// Strips copyright blocks, back matter and production residue from raw text.
///
/// Filtering already-filtered text returns it unchanged.
#[derive(Debug, Clone)]
pub struct ContentFilter {
    rules: Vec<FilterRule>,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentFilter {
    /// The built-in rule set.
    pub fn new() -> Self {
        let builtin = |tag: &str, pattern: &Lazy<Regex>, replacement: &'static str| FilterRule {
            tag: tag.to_string(),
            pattern: Regex::clone(pattern),
            replacement,
        };
        Self {
            rules: vec![
                builtin("copyright", &COPYRIGHT, "${1}"),
                builtin("acknowledgments", &ACKNOWLEDGMENTS, ""),
                builtin("production_marker", &PRODUCTION_MARKER, ""),
                builtin("boilerplate_section", &BOILERPLATE_SECTION, ""),
                builtin("page_number", &PAGE_NUMBER_LINE, ""),
            ],
        }
    }

    /// Built-in rules followed by user-supplied removal patterns.
    pub fn with_rules(extra: &[TextFilterRule]) -> Result<Self> {
        let mut filter = Self::new();
        for rule in extra {
            let pattern = Regex::new(&rule.pattern).map_err(|e| {
                NarrateError::Config(format!("Invalid text filter {:?}: {e}", rule.pattern))
            })?;
            filter.rules.push(FilterRule {
                tag: format!("custom:{}", rule.pattern),
                pattern,
                replacement: "",
            });
        }
        Ok(filter)
    }

    pub fn filter(&self, text: &str) -> FilterOutcome {
        let mut current = text.to_string();
        let mut removed = Vec::new();

        for rule in &self.rules {
            if !rule.pattern.is_match(&current) {
                continue;
            }
            let replaced = rule.pattern.replace_all(&current, rule.replacement).into_owned();
            if replaced != current {
                log::debug!(
                    "Filter '{}' removed {} characters",
                    rule.tag,
                    current.len().saturating_sub(replaced.len())
                );
                removed.push(rule.tag.clone());
                current = replaced;
            }
        }

        let collapsed = BLANK_RUN.replace_all(&current, "\n\n");
        FilterOutcome {
            text: collapsed.trim().to_string(),
            removed,
        }
    }
}
