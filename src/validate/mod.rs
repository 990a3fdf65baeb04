//! Encryption invariant validation.
//!
//! The flows enforce these invariants by construction. The validator
//! re-checks them on any graph, which catches hand-edited deployment
//! documents and custom graphs:
//!
//! - `ENC001`: vaults backing a disk encryption set have purge protection and soft delete
//! - `ENC002`: ADE VMs have encryption at host disabled
//! - `ENC003`: SSE VMs have encryption at host enabled
//! - `ENC004`: ADE settings reference a single vault and one of its keys
//! - `ENC005`: SSE VM disks all reference the same disk encryption set
//! - `ENC006`: the disk encryption set identity holds the crypto service encryption role
//! - `ENC007`: unique names, no cycles
//! - `ENC008`: every reference targets an existing node and a declared output
//!
//! # Example
//!
//! ```rust,ignore
//! use vmcrypt::validate::Validator;
//!
//! let report = Validator::new().check(&graph);
//! for finding in &report.findings {
//!     println!("{}", finding);
//! }
//! ```

mod rules;
mod types;

pub use rules::ALL_RULES;
pub use types::{Finding, Rule, Severity, ValidationReport};

use crate::graph::ResourceGraph;

/// Runs the rules against a graph
#[derive(Debug, Clone, Default)]
pub struct Validator {
    skip_rules: Vec<String>,
    warnings_as_errors: bool,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Do not run the rule with this id.
    pub fn skip(mut self, rule_id: impl Into<String>) -> Self {
        self.skip_rules.push(rule_id.into());
        self
    }

    /// Report warnings at error severity.
    pub fn warnings_as_errors(mut self, enabled: bool) -> Self {
        self.warnings_as_errors = enabled;
        self
    }

    pub fn check(&self, graph: &ResourceGraph) -> ValidationReport {
        let mut report = ValidationReport {
            resources_checked: graph.node_count(),
            ..ValidationReport::default()
        };

        for rule in ALL_RULES
            .iter()
            .filter(|r| !self.skip_rules.iter().any(|s| s.eq_ignore_ascii_case(r.id)))
        {
            let findings = rules::check(rule, graph);
            tracing::debug!(rule = rule.id, findings = findings.len(), "ran rule");
            report.rules_checked.push(rule.id.to_string());
            report.findings.extend(findings);
        }

        if self.warnings_as_errors {
            for finding in &mut report.findings {
                if finding.severity == Severity::Warning {
                    finding.severity = Severity::Error;
                }
            }
        }

        tracing::info!(
            errors = report.error_count(),
            findings = report.findings.len(),
            "validated resource graph"
        );
        report
    }

    /// Look up a rule by id.
    pub fn rule(id: &str) -> Option<&'static Rule> {
        ALL_RULES.iter().find(|r| r.id.eq_ignore_ascii_case(id))
    }
}

/// Validate with every rule enabled.
pub fn validate(graph: &ResourceGraph) -> ValidationReport {
    Validator::new().check(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flows::Template;
    use crate::params::DeploymentParameters;
    use crate::resources::AdeKeyMode;

    const SUBNET: &str = "/subscriptions/0000/resourceGroups/net/providers/Microsoft.Network/virtualNetworks/vnet/subnets/default";

    fn graph(mode: AdeKeyMode) -> ResourceGraph {
        let mut params = DeploymentParameters::new("westeurope", SUBNET);
        params.ade_key_mode = mode;
        Template::new(params).render().unwrap()
    }

    #[test]
    fn test_rendered_template_is_clean() {
        let report = validate(&graph(AdeKeyMode::Cmk));
        assert!(report.findings.is_empty(), "{:?}", report.findings);
        assert!(report.is_clean());
        assert_eq!(report.rules_checked.len(), 8);
        assert_eq!(report.resources_checked, 8);
    }

    #[test]
    fn test_pmk_mode_is_a_warning() {
        let report = validate(&graph(AdeKeyMode::Pmk));
        assert!(report.is_clean());
        let findings = report.findings_for("ENC004");
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Warning);

        let strict = Validator::new()
            .warnings_as_errors(true)
            .check(&graph(AdeKeyMode::Pmk));
        assert!(!strict.is_clean());
    }

    #[test]
    fn test_skip_rule() {
        let report = Validator::new().skip("enc004").check(&graph(AdeKeyMode::Pmk));
        assert!(report.findings.is_empty());
        assert_eq!(report.rules_checked.len(), 7);
    }

    #[test]
    fn test_rule_lookup() {
        let rule = Validator::rule("ENC006").unwrap();
        assert_eq!(rule.severity, Severity::Critical);
        assert!(Validator::rule("ENC999").is_none());
    }
}
