// SPDX-License-Identifier: MIT

//! Validation findings
//!
//! Validation never stops at the first problem: every check appends to a
//! [`ValidationReport`] and the caller decides what blocks.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Category of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum ViolationKind {
    SchemaViolation,
    DuplicateStepId,
    UnreachableStep,
    CycleDetected,
    BranchMergeViolation,
    InvalidReference,
    UnresolvedArtifact,
    MissingFinalStep,
    NoMatchingBranch,
    AmbiguousWiring,
    DanglingTransition,
    TerminalMismatch,
    UnknownTool,
    MissingParameter,
    UnexpectedParameter,
    DuplicateCondition,
    InvalidDependency,
    UnconsumedArtifact,
    EmptyPrompt,
}

impl ViolationKind {
    /// Severity a finding of this kind carries
    pub fn severity(self) -> Severity {
        match self {
            ViolationKind::UnexpectedParameter
            | ViolationKind::UnconsumedArtifact
            | ViolationKind::EmptyPrompt => Severity::Minor,
            _ => Severity::Critical,
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Minor,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Minor => write!(f, "minor"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

/// A single finding, naming every step it concerns
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Error)]
#[error("[{severity}] {kind} ({ids}): {message}", ids = .steps.join(", "))]
pub struct Violation {
    pub kind: ViolationKind,
    pub severity: Severity,
    pub steps: Vec<String>,
    pub message: String,
}

impl Violation {
    pub fn new<S: Into<String>>(
        kind: ViolationKind,
        steps: impl IntoIterator<Item = S>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            steps: steps.into_iter().map(Into::into).collect(),
            message: message.into(),
        }
    }
}

/// Ordered list of findings
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, Error)]
#[error("{}", summarize(.violations))]
pub struct ValidationReport {
    pub violations: Vec<Violation>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, violation: Violation) {
        log::debug!("Validation finding: {}", violation);
        self.violations.push(violation);
    }

    pub fn add<S: Into<String>>(
        &mut self,
        kind: ViolationKind,
        steps: impl IntoIterator<Item = S>,
        message: impl Into<String>,
    ) {
        self.push(Violation::new(kind, steps, message));
    }

    pub fn extend(&mut self, other: ValidationReport) {
        self.violations.extend(other.violations);
    }

    pub fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn len(&self) -> usize {
        self.violations.len()
    }

    /// True when no Critical finding is present
    pub fn is_accepted(&self) -> bool {
        !self.has_critical()
    }

    /// Acceptance under a strictness setting: strict also refuses Minor findings
    pub fn is_accepted_with(&self, strict: bool) -> bool {
        if strict {
            self.is_empty()
        } else {
            self.is_accepted()
        }
    }

    pub fn has_critical(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == Severity::Critical)
    }

    pub fn critical(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Critical)
    }

    pub fn minor(&self) -> impl Iterator<Item = &Violation> {
        self.violations
            .iter()
            .filter(|v| v.severity == Severity::Minor)
    }

    pub fn of_kind(&self, kind: ViolationKind) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(move |v| v.kind == kind)
    }

    pub fn contains(&self, kind: ViolationKind) -> bool {
        self.of_kind(kind).next().is_some()
    }
}

fn summarize(violations: &[Violation]) -> String {
    if violations.is_empty() {
        return "no findings".to_string();
    }
    let critical = violations
        .iter()
        .filter(|v| v.severity == Severity::Critical)
        .count();
    let mut text = format!("{} finding(s), {} critical", violations.len(), critical);
    for v in violations {
        text.push_str(&format!("\n  {}", v));
    }
    text
}

impl From<Violation> for ValidationReport {
    fn from(violation: Violation) -> Self {
        Self {
            violations: vec![violation],
        }
    }
}
