/// Rule-based classification for well-known structured log formats
///
/// Cheapest stage of the pipeline: an ordered regex table mapped to fixed
/// labels. The first matching pattern wins, so broader patterns must come
/// after narrower ones. `None` means no rule fired and the record
/// escalates to the model-backed stages.
use once_cell::sync::Lazy;
use regex::Regex;

/// Ordered pattern table. Priority is the declaration order.
static RULES: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        // HTTP request/status lines
        (r"^(GET|POST|PUT|DELETE|PATCH|HEAD|OPTIONS)\s+\S+\s+HTTP/\d(\.\d)?", "HTTP Status"),
        (r"RCODE\s+\d{3}", "HTTP Status"),
        (r"API returned \d{3}", "HTTP Status"),
        // Deprecation / retirement notices
        (r"(?i)will be (retired|deprecated) in version", "Deprecation Warning"),
        (r"(?i)\bis deprecated\b", "Deprecation Warning"),
        // Routine account and session activity
        (r"User User\d+ logged (in|out)", "User Action"),
        (r"Account with ID \S+ created by \S+", "User Action"),
        // Routine operational notifications
        (r"Backup (started|ended) at \S+", "System Notification"),
        (r"Backup completed successfully", "System Notification"),
        (r"System updated to version \S+", "System Notification"),
        (r"Disk cleanup completed successfully", "System Notification"),
        (r"System reboot initiated by user \S+", "System Notification"),
    ]
    .into_iter()
    .map(|(pattern, label)| (Regex::new(pattern).expect("static rule pattern"), label))
    .collect()
});

pub struct RuleClassifier;

impl RuleClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Match the message against the rule table.
    ///
    /// Returns the label of the first matching pattern, or `None` when no
    /// rule fires. Pure and deterministic; the `source` tag is accepted for
    /// interface symmetry with the other stages but no rule keys on it.
    pub fn classify(&self, _source: &str, message: &str) -> Option<&'static str> {
        RULES
            .iter()
            .find(|(pattern, _)| pattern.is_match(message))
            .map(|&(_, label)| label)
    }

    /// Number of patterns in the rule table.
    pub fn rule_count(&self) -> usize {
        RULES.len()
    }
}

impl Default for RuleClassifier {
    fn default() -> Self {
        Self::new()
    }
}
