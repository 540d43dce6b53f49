//! # Builder Evaluator
//!
//! Turns the builders of one rule into the ordered list of external
//! references the collection should contain.
//!
//! 1. every builder is checked against the registry up front; an unknown
//!    provider or mode fails the rule before any network call
//! 2. builders are queried concurrently, results are kept in declaration
//!    order
//! 3. the concatenation is deduplicated by identity key, first occurrence
//!    wins
//! 4. rule filters drop what they reject, then the rule `limit` truncates
//!
//! A failing builder contributes nothing and becomes a warning. When every
//! builder fails the rule fails, so an outage never empties a collection.

use crate::error::{Result, SyncError};
use core_library::{CollectionRule, ExternalItemRef, MediaType, RefKey};
use core_metadata::{ProviderQuery, ProviderRegistry};
use futures::future::join_all;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Outcome of evaluating one rule
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Deduplicated, filtered and truncated references
    pub items: Vec<ExternalItemRef>,
    /// Number of references the builders returned before dedup
    pub fetched: usize,
    /// One entry per failed builder
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct RuleEvaluator {
    providers: ProviderRegistry,
}

impl RuleEvaluator {
    pub fn new(providers: ProviderRegistry) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Check that every builder maps to a registered provider and mode
    pub fn validate(&self, rule: &CollectionRule) -> Result<()> {
        if rule.builders.is_empty() {
            return Err(SyncError::invalid_rule(rule.key(), "no builders"));
        }

        for builder in &rule.builders {
            let provider = self.providers.get(&builder.provider).ok_or_else(|| {
                SyncError::invalid_rule(
                    rule.key(),
                    format!(
                        "unknown or unconfigured provider '{}' in '{}'",
                        builder.provider,
                        builder.key()
                    ),
                )
            })?;
            if !provider.supports(&builder.mode) {
                return Err(SyncError::invalid_rule(
                    rule.key(),
                    format!(
                        "provider '{}' has no mode '{}'",
                        builder.provider, builder.mode
                    ),
                ));
            }
        }
        Ok(())
    }

    pub async fn evaluate(
        &self,
        rule: &CollectionRule,
        media_type: MediaType,
    ) -> Result<Evaluation> {
        self.validate(rule)?;

        let queries = rule.builders.iter().map(|builder| {
            let query = ProviderQuery::from_builder(builder, media_type);
            async move {
                let provider = self
                    .providers
                    .get(&builder.provider)
                    .ok_or_else(|| SyncError::invalid_rule(rule.key(), "provider vanished"))?;
                provider.query(&query).await.map_err(SyncError::from)
            }
        });
        let results = join_all(queries).await;

        let mut batches = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for (builder, result) in rule.builders.iter().zip(results) {
            match result {
                Ok(items) => {
                    debug!(builder = %builder.key(), count = items.len(), "Builder returned items");
                    batches.push(items);
                }
                Err(e) if e.is_config_error() => return Err(e),
                Err(e) => {
                    warn!(rule = %rule.key(), builder = %builder.key(), error = %e, "Builder failed");
                    errors.push(format!("{}: {}", builder.key(), e));
                }
            }
        }

        if batches.is_empty() {
            return Err(SyncError::AllBuildersFailed {
                rule: rule.key(),
                errors,
            });
        }

        let fetched = batches.iter().map(Vec::len).sum();
        let mut items = dedup(batches.into_iter().flatten());
        let before_filters = items.len();
        items.retain(|item| rule.filters.matches(item));
        if let Some(limit) = rule.limit {
            items.truncate(limit);
        }

        info!(
            rule = %rule.key(),
            fetched,
            unique = before_filters,
            kept = items.len(),
            "Rule evaluated"
        );

        Ok(Evaluation {
            items,
            fetched,
            warnings: errors,
        })
    }
}

/// Keep the first reference of every identity; a reference sharing any key
/// with an earlier one is a duplicate
pub fn dedup<I>(items: I) -> Vec<ExternalItemRef>
where
    I: IntoIterator<Item = ExternalItemRef>,
{
    let mut seen: HashSet<RefKey> = HashSet::new();
    let mut unique = Vec::new();

    for item in items {
        let keys = item.identity_keys();
        if keys.iter().any(|key| seen.contains(key)) {
            continue;
        }
        seen.extend(keys);
        unique.push(item);
    }
    unique
}
