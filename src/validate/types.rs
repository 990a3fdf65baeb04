//! Validation types.
//!
//! Severity levels, rule descriptors, findings and the report returned by
//! the [`Validator`](super::Validator).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Severity level for findings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Worth reviewing, the deployment still holds its guarantees.
    Warning,
    /// The platform would reject the deployment or encrypt the wrong way.
    Error,
    /// Disks could end up unencrypted or keys unrecoverable.
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A validation rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    /// Unique rule identifier (e.g., "ENC001").
    pub id: &'static str,
    /// Short kebab-case name.
    pub name: &'static str,
    /// Severity of a violation.
    pub severity: Severity,
    /// One-line description.
    pub description: &'static str,
}

/// A single rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Rule identifier.
    pub rule_id: String,
    /// Rule name.
    pub rule_name: String,
    /// Severity level.
    pub severity: Severity,
    /// Node the finding is about, if any.
    pub node: Option<String>,
    /// Description of the issue.
    pub message: String,
    /// Suggested fix.
    pub suggestion: Option<String>,
}

impl Finding {
    /// Create a finding for `rule` at the rule's own severity.
    pub fn new(rule: &Rule, node: Option<&str>, message: impl Into<String>) -> Self {
        Self {
            rule_id: rule.id.to_string(),
            rule_name: rule.name.to_string(),
            severity: rule.severity,
            node: node.map(String::from),
            message: message.into(),
            suggestion: None,
        }
    }

    /// Add a suggestion for fixing the issue.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    /// Override the rule's severity.
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Check if this is an error or critical finding.
    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }
}

impl std::fmt::Display for Finding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.rule_id, self.severity)?;
        if let Some(node) = &self.node {
            write!(f, " {}", node)?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(ref suggestion) = self.suggestion {
            write!(f, "\n  Suggestion: {}", suggestion)?;
        }
        Ok(())
    }
}

/// Result of validating a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Findings, in rule order.
    pub findings: Vec<Finding>,
    /// Number of resources checked.
    pub resources_checked: usize,
    /// Rules that ran.
    pub rules_checked: Vec<String>,
}

impl ValidationReport {
    /// True when there are no findings at error severity or above.
    pub fn is_clean(&self) -> bool {
        !self.has_errors()
    }

    /// Check if there are any errors or critical findings.
    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(Finding::is_error)
    }

    /// Number of findings at error severity or above.
    pub fn error_count(&self) -> usize {
        self.findings.iter().filter(|f| f.is_error()).count()
    }

    /// Findings for one rule.
    pub fn findings_for(&self, rule_id: &str) -> Vec<&Finding> {
        self.findings.iter().filter(|f| f.rule_id == rule_id).collect()
    }

    /// Get count of findings by severity.
    pub fn count_by_severity(&self) -> HashMap<Severity, usize> {
        let mut counts = HashMap::new();
        for finding in &self.findings {
            *counts.entry(finding.severity).or_insert(0) += 1;
        }
        counts
    }

    /// Get a summary string.
    pub fn summary(&self) -> String {
        let counts = self.count_by_severity();
        let count = |s: Severity| counts.get(&s).copied().unwrap_or(0);
        format!(
            "Checked {} resource(s) against {} rule(s): {} critical, {} error(s), {} warning(s)",
            self.resources_checked,
            self.rules_checked.len(),
            count(Severity::Critical),
            count(Severity::Error),
            count(Severity::Warning),
        )
    }

    /// Turn a report with errors into [`crate::Error::Validation`].
    pub fn into_result(self) -> crate::Result<Self> {
        match self.findings.iter().find(|f| f.is_error()) {
            Some(first) => Err(crate::Error::validation(
                self.error_count(),
                first.to_string(),
            )),
            None => Ok(self),
        }
    }
}
