//! Classification of resolver diagnostics.
//!
//! The resolver reports failures only as text. A [`DiagnosticClassifier`]
//! decides whether a failure came from stale local state that can be pruned
//! and retried, or whether it is fatal. Matching rules are data, so they can
//! change without touching the pipeline.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Local state to discard before retrying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Prune {
    /// Nothing to remove; the failure clears by itself (e.g. the checksum
    /// database has not yet caught up with a fresh tag).
    Nothing,

    /// The workspace's `go.sum`.
    SumFile,

    /// One module version in the shared download cache.
    CacheEntry { module: String, version: String },
}

impl fmt::Display for Prune {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nothing => f.write_str("nothing"),
            Self::SumFile => f.write_str("go.sum"),
            Self::CacheEntry { module, version } => write!(f, "cached {module}@{version}"),
        }
    }
}

/// Verdict on a failed resolver run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Retry after pruning the given state.
    Transient(Prune),

    /// Retrying will not help.
    Fatal,
}

/// Maps resolver diagnostic text to a [`Classification`].
pub trait DiagnosticClassifier: Send + Sync {
    /// Classify the combined output of one failed run.
    fn classify(&self, diagnostic: &str) -> Classification;
}

/// What a matching rule concludes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    Fatal,
    Retry,
    PruneSumFile,
    /// Prune the cache entry named by the `module` and `version` captures.
    PruneCacheEntry,
}

/// A pattern and the action taken when it matches.
#[derive(Debug, Clone)]
pub struct Rule {
    pub pattern: Regex,
    pub action: RuleAction,
}

impl Rule {
    /// Create a rule from a compiled pattern.
    pub fn new(pattern: Regex, action: RuleAction) -> Self {
        Self { pattern, action }
    }
}

static DEFAULT_RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    let rule = |pattern: &str, action| {
        // Patterns are constants, covered by the tests below.
        Regex::new(pattern).map(|re| Rule::new(re, action)).ok()
    };

    [
        // Fatal: the module or version genuinely does not exist, or access is denied.
        rule(r"unknown revision", RuleAction::Fatal),
        rule(r"invalid version", RuleAction::Fatal),
        rule(r"no matching versions for query", RuleAction::Fatal),
        rule(r"cannot find module providing package", RuleAction::Fatal),
        rule(r"module declares its path as", RuleAction::Fatal),
        rule(r"terminal prompts disabled", RuleAction::Fatal),
        rule(r"401 Unauthorized|403 Forbidden", RuleAction::Fatal),
        // Fatal: read-only module mode forbids editing go.mod.
        rule(r"updates to go\.mod needed", RuleAction::Fatal),
        // Transient: a corrupt or stale entry in the shared download cache.
        rule(
            r"verifying (?P<module>[^\s@]+)@(?P<version>[^\s:/]+)(?:/go\.mod)?: checksum mismatch",
            RuleAction::PruneCacheEntry,
        ),
        rule(
            r"(?P<module>[^\s@:]+)@(?P<version>[^\s:/]+): zip: not a valid zip file",
            RuleAction::PruneCacheEntry,
        ),
        // Transient: the checksum database has no entry yet for a fresh tag.
        rule(
            r"sum\.golang\.org/lookup/\S+: (?:404 Not Found|410 Gone)",
            RuleAction::Retry,
        ),
        // Transient: the workspace sum file is inconsistent with the module graph.
        rule(r"missing go\.sum entry", RuleAction::PruneSumFile),
        rule(r"malformed go\.sum|go\.sum:\d+: ", RuleAction::PruneSumFile),
        // Transient: the network dropped mid-download.
        rule(
            r"unexpected EOF|connection reset by peer|TLS handshake timeout|i/o timeout",
            RuleAction::Retry,
        ),
    ]
    .into_iter()
    .flatten()
    .collect()
});

/// Rule-based classifier for Go resolver output.
///
/// The first matching rule wins; unmatched diagnostics are fatal so that
/// unknown failures are never retried blindly.
#[derive(Debug, Clone)]
pub struct GoDiagnosticClassifier {
    rules: Vec<Rule>,
}

impl GoDiagnosticClassifier {
    /// A classifier with the built-in rules.
    pub fn new() -> Self {
        Self {
            rules: DEFAULT_RULES.clone(),
        }
    }

    /// A classifier with exactly the given rules.
    pub fn with_rules(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// Add a rule that is consulted before the existing ones.
    #[must_use]
    pub fn with_rule_first(mut self, rule: Rule) -> Self {
        self.rules.insert(0, rule);
        self
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }
}

impl Default for GoDiagnosticClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DiagnosticClassifier for GoDiagnosticClassifier {
    fn classify(&self, diagnostic: &str) -> Classification {
        for rule in &self.rules {
            let Some(caps) = rule.pattern.captures(diagnostic) else {
                continue;
            };
            tracing::debug!("Diagnostic matched rule /{}/", rule.pattern.as_str());

            return match rule.action {
                RuleAction::Fatal => Classification::Fatal,
                RuleAction::Retry => Classification::Transient(Prune::Nothing),
                RuleAction::PruneSumFile => Classification::Transient(Prune::SumFile),
                RuleAction::PruneCacheEntry => match (caps.name("module"), caps.name("version")) {
                    (Some(module), Some(version)) => Classification::Transient(Prune::CacheEntry {
                        module: module.as_str().to_string(),
                        version: version.as_str().to_string(),
                    }),
                    _ => Classification::Transient(Prune::Nothing),
                },
            };
        }
        Classification::Fatal
    }
}
