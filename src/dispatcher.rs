//! Per-record stage dispatch.
//!
//! Each record walks an ordered chain of classifier stages, cheap first,
//! short-circuiting at the first non-escalating result. A rule stage
//! escalates by returning no match; a model stage escalates by returning
//! the sentinel while later stages remain. The last stage invoked supplies
//! the final label verbatim.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::rule_classifier::RuleClassifier;
use crate::traits::{MessageClassifier, UNCLASSIFIED};

/// One parsed row of the uploaded file. Consumed once per request.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub source: String,
    pub message: String,
}

/// A stage in the classification chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Rule,
    Embedding,
    Llm,
}

/// Explicit source-to-strategy routing.
///
/// Maps a `source` value to the ordered stage list to attempt for records
/// from that source; anything without an override walks the full default
/// chain. Loadable from a JSON file named by `ROUTING_CONFIG_FILE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingPolicy {
    #[serde(default = "RoutingPolicy::full_chain")]
    pub default_chain: Vec<Stage>,
    #[serde(default)]
    pub overrides: HashMap<String, Vec<Stage>>,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            default_chain: Self::full_chain(),
            overrides: HashMap::new(),
        }
    }
}

impl RoutingPolicy {
    fn full_chain() -> Vec<Stage> {
        vec![Stage::Rule, Stage::Embedding, Stage::Llm]
    }

    /// Load from the file named by `ROUTING_CONFIG_FILE`, falling back to
    /// the default full chain when unset or unreadable.
    pub fn from_env() -> Self {
        if let Ok(config_path) = std::env::var("ROUTING_CONFIG_FILE") {
            if let Ok(config_str) = std::fs::read_to_string(&config_path) {
                match serde_json::from_str::<RoutingPolicy>(&config_str) {
                    Ok(policy) => return policy,
                    Err(e) => {
                        tracing::warn!("Ignoring invalid routing config {}: {}", config_path, e)
                    }
                }
            }
        }
        Self::default()
    }

    /// Validate that no chain is empty.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            !self.default_chain.is_empty(),
            "routing policy default chain must not be empty"
        );
        for (source, chain) in &self.overrides {
            anyhow::ensure!(
                !chain.is_empty(),
                "routing override for source '{}' must not be empty",
                source
            );
        }
        Ok(())
    }

    pub fn with_override(mut self, source: &str, chain: Vec<Stage>) -> Self {
        self.overrides.insert(source.to_string(), chain);
        self
    }

    /// The stage chain to attempt for a given source.
    pub fn chain_for(&self, source: &str) -> &[Stage] {
        self.overrides
            .get(source)
            .map(Vec::as_slice)
            .unwrap_or(&self.default_chain)
    }
}

pub struct Dispatcher {
    rules: RuleClassifier,
    embedding: Arc<dyn MessageClassifier>,
    llm: Arc<dyn MessageClassifier>,
    policy: RoutingPolicy,
}

impl Dispatcher {
    pub fn new(
        rules: RuleClassifier,
        embedding: Arc<dyn MessageClassifier>,
        llm: Arc<dyn MessageClassifier>,
        policy: RoutingPolicy,
    ) -> Self {
        Self {
            rules,
            embedding,
            llm,
            policy,
        }
    }

    /// Classify one record.
    ///
    /// Total over any input: always returns a non-empty label, never an
    /// error. Exactly one stage supplies the returned label.
    pub async fn classify(&self, record: &LogRecord) -> String {
        let chain = self.policy.chain_for(&record.source);
        let mut label = UNCLASSIFIED.to_string();

        for stage in chain {
            match stage {
                Stage::Rule => {
                    if let Some(rule_label) = self.rules.classify(&record.source, &record.message)
                    {
                        tracing::debug!(source = %record.source, label = rule_label, "rule stage matched");
                        return rule_label.to_string();
                    }
                    label = UNCLASSIFIED.to_string();
                }
                Stage::Embedding => {
                    label = self.embedding.classify(&record.message).await;
                    if label != UNCLASSIFIED {
                        tracing::debug!(source = %record.source, label = %label, "embedding stage decided");
                        return label;
                    }
                }
                Stage::Llm => {
                    label = self.llm.classify(&record.message).await;
                    if label != UNCLASSIFIED {
                        tracing::debug!(source = %record.source, label = %label, "llm stage decided");
                        return label;
                    }
                }
            }
        }

        // Every stage escalated; the last one's result stands.
        label
    }
}
