//! Offline rule validation and connectivity checks

use core_library::CollectionRule;
use serde::Serialize;
use std::collections::BTreeMap;

/// One finding about one rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleIssue {
    /// `library/collection`, or `scheduler` for service-wide settings
    pub rule: String,
    pub message: String,
}

impl RuleIssue {
    pub fn new(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    pub rules: usize,
    /// Rules that would fail every run
    pub errors: Vec<RuleIssue>,
    /// Suspicious but runnable
    pub warnings: Vec<RuleIssue>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Jellyfin names collections globally, so the same name in two libraries
/// ends up as one collection fought over by two rules
pub(crate) fn duplicate_names(rules: &[CollectionRule]) -> Vec<RuleIssue> {
    let mut by_name: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for rule in rules {
        by_name.entry(rule.name.as_str()).or_default().push(rule.library.as_str());
    }

    by_name
        .into_iter()
        .filter(|(_, libraries)| libraries.len() > 1)
        .map(|(name, libraries)| {
            RuleIssue::new(
                name,
                format!(
                    "collection name used by {} rules (libraries: {})",
                    libraries.len(),
                    libraries.join(", ")
                ),
            )
        })
        .collect()
}

/// Reachability of Jellyfin or one provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderHealth {
    pub name: String,
    pub healthy: bool,
    /// Server version on success, error message on failure
    pub detail: Option<String>,
}

impl ProviderHealth {
    pub fn healthy(name: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            name: name.into(),
            healthy: true,
            detail,
        }
    }

    pub fn unhealthy(name: impl Into<String>, error: impl ToString) -> Self {
        Self {
            name: name.into(),
            healthy: false,
            detail: Some(error.to_string()),
        }
    }
}
