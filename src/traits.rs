/// Dependency injection traits for the classification pipeline
///
/// The dispatcher only ever talks to the model-backed stages through
/// `MessageClassifier`, so tests (and future backends) can swap in
/// mock implementations without touching the dispatch logic.
use async_trait::async_trait;

/// The reserved label returned whenever no stage produces a confident
/// result. Every classifier degrades to this value instead of raising.
pub const UNCLASSIFIED: &str = "Unclassified";

/// Trait for classifiers that label a log message
///
/// Implementations can use:
/// - Embedding models with a supervised head
/// - LLM chat-completion APIs
/// - Mock/test classifiers
///
/// Implementations must be total: they never fail and never return an
/// empty string. Anything that goes wrong internally resolves to
/// [`UNCLASSIFIED`].
#[async_trait]
pub trait MessageClassifier: Send + Sync {
    /// Classify a log message into a category label.
    async fn classify(&self, message: &str) -> String;

    /// Get the name/identifier of this classifier (for reporting)
    fn name(&self) -> &str;
}
