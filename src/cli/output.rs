//! Output formatting module for vmcrypt
//!
//! Provides colored output, the apply spinner and structured output.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::io::{self, Write};
use std::time::{Duration, Instant};

use vmcrypt::provision::{DeploymentReport, NodeReport, NodeStatus};
use vmcrypt::validate::{Finding, Severity, ValidationReport};

use super::OutputFormat;

fn colored_status(status: NodeStatus) -> String {
    match status {
        NodeStatus::Created => "created".green().to_string(),
        NodeStatus::Planned => "planned".cyan().to_string(),
        NodeStatus::Skipped => "skipped".yellow().to_string(),
        NodeStatus::Failed => "failed".red().bold().to_string(),
    }
}

fn colored_severity(severity: Severity) -> String {
    match severity {
        Severity::Warning => "warning".yellow().to_string(),
        Severity::Error => "error".red().to_string(),
        Severity::Critical => "critical".red().bold().to_string(),
    }
}

/// Output formatter for different output modes
pub struct OutputFormatter {
    /// Use colored output
    use_color: bool,
    format: OutputFormat,
    /// Verbosity level
    verbosity: u8,
    /// Start time for duration calculations
    start_time: Instant,
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(use_color: bool, format: OutputFormat, verbosity: u8) -> Self {
        Self {
            use_color,
            format,
            verbosity,
            start_time: Instant::now(),
        }
    }

    /// Whether output is JSON or YAML
    pub fn is_structured(&self) -> bool {
        self.format != OutputFormat::Human
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    /// Print a value in the structured format; JSON in human mode.
    pub fn emit<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Yaml => print!("{}", serde_yaml::to_string(value)?),
            OutputFormat::Json | OutputFormat::Human => {
                println!("{}", serde_json::to_string_pretty(value)?)
            }
        }
        Ok(())
    }

    /// Print a banner/header
    pub fn banner(&self, title: &str) {
        if self.is_structured() {
            return;
        }

        let line = "=".repeat(title.len() + 4);
        if self.use_color {
            println!("\n{}", line.bright_blue());
            println!("{}", format!("  {}  ", title).bright_blue().bold());
            println!("{}\n", line.bright_blue());
        } else {
            println!("\n{}", line);
            println!("  {}  ", title);
            println!("{}\n", line);
        }
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        if self.is_structured() {
            return;
        }

        if self.use_color {
            println!("\n{}", title.cyan().bold());
            println!("{}", "-".repeat(title.len()).cyan());
        } else {
            println!("\n{}", title);
            println!("{}", "-".repeat(title.len()));
        }
    }

    /// Print an error message
    pub fn error(&self, message: &str) {
        if self.is_structured() {
            let err = serde_json::json!({
                "type": "error",
                "message": message
            });
            eprintln!("{}", err);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "ERROR:".red().bold(), message);
        } else {
            eprintln!("ERROR: {}", message);
        }
    }

    /// Print a warning message
    pub fn warning(&self, message: &str) {
        if self.is_structured() {
            let warn = serde_json::json!({
                "type": "warning",
                "message": message
            });
            eprintln!("{}", warn);
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "WARNING:".yellow().bold(), message);
        } else {
            eprintln!("WARNING: {}", message);
        }
    }

    /// Print a hint message
    pub fn hint(&self, message: &str) {
        if self.is_structured() {
            return;
        }

        if self.use_color {
            eprintln!("{} {}", "HINT:".cyan().bold(), message);
        } else {
            eprintln!("HINT: {}", message);
        }
    }

    /// Print an info message (respects verbosity)
    pub fn info(&self, message: &str) {
        if self.verbosity < 1 || self.is_structured() {
            return;
        }

        if self.use_color {
            println!("{} {}", "INFO:".blue(), message);
        } else {
            println!("INFO: {}", message);
        }
    }

    /// Print a table
    pub fn table(&self, headers: &[&str], rows: &[Vec<String>]) {
        if self.is_structured() {
            return;
        }

        // Calculate column widths
        let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
        for row in rows {
            for (i, cell) in row.iter().enumerate() {
                if i < widths.len() {
                    widths[i] = widths[i].max(cell.len());
                }
            }
        }

        let join = |cells: &mut dyn Iterator<Item = String>| -> String {
            cells
                .enumerate()
                .map(|(i, cell)| format!("{:width$}", cell, width = widths[i]))
                .collect::<Vec<_>>()
                .join(" | ")
        };

        let header_line = join(&mut headers.iter().map(|h| h.to_string()));
        let sep: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
        if self.use_color {
            println!("{}", header_line.bright_white().bold());
            println!("{}", sep.join("-+-").bright_black());
        } else {
            println!("{}", header_line);
            println!("{}", sep.join("-+-"));
        }

        for row in rows {
            println!("{}", join(&mut row.iter().take(widths.len()).cloned()));
        }
    }

    /// Print one validation finding
    pub fn finding(&self, finding: &Finding) {
        if self.is_structured() {
            return;
        }

        let severity = if self.use_color {
            colored_severity(finding.severity)
        } else {
            finding.severity.to_string()
        };
        let location = finding
            .node
            .as_deref()
            .map(|n| format!(" {}", n))
            .unwrap_or_default();
        println!("[{}] {}{}: {}", finding.rule_id, severity, location, finding.message);
        if let Some(suggestion) = &finding.suggestion {
            if self.use_color {
                println!("  {} {}", "Suggestion:".bright_black(), suggestion);
            } else {
                println!("  Suggestion: {}", suggestion);
            }
        }
    }

    /// Print a validation report
    pub fn validation(&self, report: &ValidationReport) {
        if self.is_structured() {
            return;
        }

        for finding in &report.findings {
            self.finding(finding);
        }
        let summary = report.summary();
        if !self.use_color {
            println!("\n{}", summary);
        } else if report.is_clean() {
            println!("\n{}", summary.green());
        } else {
            println!("\n{}", summary.red().bold());
        }
    }

    /// Print the outcome of one node
    pub fn node_result(&self, node: &NodeReport) {
        if self.is_structured() {
            return;
        }

        let status = if self.use_color {
            colored_status(node.status)
        } else {
            node.status.to_string()
        };
        let name = if self.use_color {
            node.name.bright_white().bold().to_string()
        } else {
            node.name.clone()
        };
        print!("{}: [{}] {} ({})", status, node.id, name, node.kind);
        if node.status == NodeStatus::Created {
            print!(" {}ms", node.elapsed_ms);
        }
        println!();
        if let Some(error) = &node.error {
            println!("  {}", error);
        }
        if self.verbosity >= 2 {
            if let Some(outputs) = &node.outputs {
                for (field, value) in &outputs.0 {
                    println!("  {} = {}", field, value);
                }
            }
        }
    }

    /// Print the deployment recap
    pub fn recap(&self, report: &DeploymentReport) {
        if self.is_structured() {
            return;
        }

        let header = "DEPLOYMENT RECAP";
        let stars = "*".repeat(80 - header.len());
        if self.use_color {
            println!("\n{} {}", header.bright_white().bold(), stars.bright_black());
        } else {
            println!("\n{} {}", header, stars);
        }

        let line = [
            NodeStatus::Created,
            NodeStatus::Planned,
            NodeStatus::Failed,
            NodeStatus::Skipped,
        ]
        .into_iter()
        .map(|status| {
            let stat = format!("{}={:<4}", status, report.count(status));
            if self.use_color && report.count(status) == 0 {
                stat.dimmed().to_string()
            } else {
                stat
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
        println!("{}", line);

        let duration = format_duration(self.start_time.elapsed());
        if self.use_color {
            println!("\n{} {}", "Deployment took".bright_black(), duration.bright_white());
            if report.is_success() {
                println!("{}", "Deployment completed successfully.".green().bold());
            } else {
                println!("{}", "Deployment failed.".red().bold());
            }
        } else {
            println!("\nDeployment took {}", duration);
            if report.is_success() {
                println!("Deployment completed successfully.");
            } else {
                println!("Deployment failed.");
            }
        }
    }

    /// Create a spinner for indeterminate progress
    pub fn create_spinner(&self, message: &str) -> Option<ProgressBar> {
        if self.is_structured() {
            return None;
        }

        let sp = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
            sp.set_style(style);
        }
        sp.set_message(message.to_string());
        sp.enable_steady_tick(Duration::from_millis(100));

        Some(sp)
    }

    /// Flush stdout
    pub fn flush(&self) {
        let _ = io::stdout().flush();
    }
}

/// Format a duration for display
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let millis = duration.subsec_millis();

    if secs >= 60 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs > 0 {
        format!("{}.{:03}s", secs, millis)
    } else {
        format!("{}ms", millis)
    }
}
