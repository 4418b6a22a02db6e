//! Structured compiler diagnostics
//!
//! The compiler reports author-facing problems as structured [`Diagnostic`]
//! records rather than plain log lines. Each record carries a severity, a
//! message, and optionally the source span that produced it. Rules that were
//! expanded out of a RuleSet additionally carry the span of the entity the
//! rule was applied in, so both the definition site and the application site
//! show up in the output.
//!
//! Diagnostics are collected by a [`DiagnosticCollector`]. The compiler is
//! single-threaded (see the export pipeline), so the collector uses interior
//! mutability and is shared by `&` reference across the importer and the
//! exporters.

use std::cell::RefCell;
use std::fmt;
use std::path::PathBuf;

/// Severity of a diagnostic record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warn"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A location in FSH source: file plus a line/column span (1-based, inclusive)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Location {
    pub file: PathBuf,
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

impl Location {
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    pub fn with_span(
        file: impl Into<PathBuf>,
        start_line: u32,
        start_col: u32,
        end_line: u32,
        end_col: u32,
    ) -> Self {
        Self {
            file: file.into(),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.file.display(),
            self.start_line,
            self.start_col
        )
    }
}

/// One diagnostic record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Where the offending construct was written
    pub location: Option<Location>,
    /// Where the construct was applied, when it differs from where it was
    /// written (RuleSet insert and mixin expansion)
    pub applied_location: Option<Location>,
}

impl Diagnostic {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            message: message.into(),
            location: None,
            applied_location: None,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_applied_location(mut self, location: Location) -> Self {
        self.applied_location = Some(location);
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.severity, self.message)?;
        if let Some(ref loc) = self.location {
            write!(f, "\n  at {loc}")?;
        }
        if let Some(ref applied) = self.applied_location {
            write!(f, "\n  applied in {applied}")?;
        }
        Ok(())
    }
}

/// Collector for diagnostics produced over one compilation
///
/// Interior mutability lets the importer, the path resolver, and every
/// exporter share one collector without threading `&mut` through the
/// re-entrant export paths.
#[derive(Debug, Default)]
pub struct DiagnosticCollector {
    records: RefCell<Vec<Diagnostic>>,
}

impl DiagnosticCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, diagnostic: Diagnostic) {
        self.records.borrow_mut().push(diagnostic);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(Diagnostic::new(Severity::Info, message));
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(Diagnostic::new(Severity::Warning, message));
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(Diagnostic::new(Severity::Error, message));
    }

    pub fn warn_at(&self, message: impl Into<String>, location: Location) {
        self.push(Diagnostic::new(Severity::Warning, message).with_location(location));
    }

    pub fn error_at(&self, message: impl Into<String>, location: Location) {
        self.push(Diagnostic::new(Severity::Error, message).with_location(location));
    }

    /// All records, in emission order
    pub fn records(&self) -> Vec<Diagnostic> {
        self.records.borrow().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.records
            .borrow()
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Error)
    }

    pub fn warning_count(&self) -> usize {
        self.count(Severity::Warning)
    }

    pub fn has_errors(&self) -> bool {
        self.error_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_counts_by_severity() {
        let collector = DiagnosticCollector::new();
        collector.info("generated ig.ini");
        collector.warn("unsupported rule");
        collector.error("parent not defined");
        collector.error("duplicate instance id");

        assert_eq!(collector.count(Severity::Info), 1);
        assert_eq!(collector.warning_count(), 1);
        assert_eq!(collector.error_count(), 2);
        assert!(collector.has_errors());
    }

    #[test]
    fn diagnostic_display_includes_applied_site() {
        let d = Diagnostic::new(Severity::Error, "bad rule")
            .with_location(Location::with_span("rules.fsh", 3, 1, 3, 20))
            .with_applied_location(Location::with_span("profile.fsh", 10, 1, 10, 18));

        let text = d.to_string();
        assert!(text.contains("rules.fsh:3:1"));
        assert!(text.contains("applied in profile.fsh:10:1"));
    }
}
