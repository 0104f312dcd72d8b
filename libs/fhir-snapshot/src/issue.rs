//! Issues reported while generating a snapshot

use serde::Serialize;
use serde_json::Value;
use std::fmt;
use strata_models::StructureDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IssueSeverity {
    Error,
    Warning,
    Information,
}

impl fmt::Display for IssueSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "Error"),
            Self::Warning => write!(f, "Warning"),
            Self::Information => write!(f, "Information"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueCode {
    CircularDependency,
    BaseNotFound,
    BaseMissingSnapshot,
    DifferentialNotConsumed,
    CardinalityViolation,
    TypeIncompatible,
    BindingViolation,
    SlicingError,
    PathNotFound,
    InvalidConstraint,
    InternalError,
}

impl IssueCode {
    /// Closest FHIR `issue-type` code, used when rendering an OperationOutcome
    pub fn fhir_issue_type(&self) -> &'static str {
        match self {
            Self::CircularDependency => "structure",
            Self::BaseNotFound | Self::PathNotFound => "not-found",
            Self::BaseMissingSnapshot => "incomplete",
            Self::DifferentialNotConsumed => "informational",
            Self::CardinalityViolation | Self::BindingViolation | Self::InvalidConstraint => {
                "business-rule"
            }
            Self::TypeIncompatible | Self::SlicingError => "structure",
            Self::InternalError => "exception",
        }
    }
}

impl fmt::Display for IssueCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::CircularDependency => "CIRCULAR_DEPENDENCY",
            Self::BaseNotFound => "BASE_NOT_FOUND",
            Self::BaseMissingSnapshot => "BASE_MISSING_SNAPSHOT",
            Self::DifferentialNotConsumed => "DIFFERENTIAL_NOT_CONSUMED",
            Self::CardinalityViolation => "CARDINALITY_VIOLATION",
            Self::TypeIncompatible => "TYPE_INCOMPATIBLE",
            Self::BindingViolation => "BINDING_VIOLATION",
            Self::SlicingError => "SLICING_ERROR",
            Self::PathNotFound => "PATH_NOT_FOUND",
            Self::InvalidConstraint => "INVALID_CONSTRAINT",
            Self::InternalError => "INTERNAL_ERROR",
        };
        write!(f, "{}", s)
    }
}

/// Individual snapshot issue
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotIssue {
    pub severity: IssueSeverity,
    pub code: IssueCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl SnapshotIssue {
    pub fn error(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Error,
            code,
            message: message.into(),
            path: None,
            details: None,
        }
    }

    pub fn warning(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Warning,
            code,
            message: message.into(),
            path: None,
            details: None,
        }
    }

    pub fn information(code: IssueCode, message: impl Into<String>) -> Self {
        Self {
            severity: IssueSeverity::Information,
            code,
            message: message.into(),
            path: None,
            details: None,
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == IssueSeverity::Error
    }

    fn to_json(&self) -> Value {
        let mut diagnostics = format!("{}: {}", self.code, self.message);
        if let Some(ref details) = self.details {
            diagnostics.push_str(" (");
            diagnostics.push_str(details);
            diagnostics.push(')');
        }

        let mut issue = serde_json::json!({
            "severity": self.severity.to_string().to_lowercase(),
            "code": self.code.fhir_issue_type(),
            "diagnostics": diagnostics,
        });

        if let Some(ref path) = self.path {
            issue["expression"] = serde_json::json!([path]);
        }

        issue
    }
}

impl fmt::Display for SnapshotIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.severity, self.code, self.message)?;
        if let Some(ref path) = self.path {
            write!(f, " at {}", path)?;
        }
        Ok(())
    }
}

/// Outcome of one `generate` call
#[derive(Debug, Clone)]
pub struct SnapshotResult {
    /// The input definition, with `snapshot` populated on success
    pub structure_definition: StructureDefinition,
    pub issues: Vec<SnapshotIssue>,
    /// True iff no issue has error severity
    pub success: bool,
}

impl SnapshotResult {
    pub fn new(structure_definition: StructureDefinition, issues: Vec<SnapshotIssue>) -> Self {
        let success = !issues.iter().any(SnapshotIssue::is_error);
        Self {
            structure_definition,
            issues,
            success,
        }
    }

    pub fn error_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_error()).count()
    }

    pub fn warning_count(&self) -> usize {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .count()
    }

    pub fn issues_with_code(&self, code: IssueCode) -> impl Iterator<Item = &SnapshotIssue> {
        self.issues.iter().filter(move |i| i.code == code)
    }

    pub fn to_operation_outcome(&self) -> Value {
        serde_json::json!({
            "resourceType": "OperationOutcome",
            "issue": self.issues.iter().map(|i| i.to_json()).collect::<Vec<_>>()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_models::StructureDefinitionKind;

    fn result_with(issues: Vec<SnapshotIssue>) -> SnapshotResult {
        let sd = StructureDefinition::new(
            "http://example.org/StructureDefinition/P",
            "P",
            StructureDefinitionKind::Resource,
            "Patient",
        );
        SnapshotResult::new(sd, issues)
    }

    #[test]
    fn success_tracks_error_severity() {
        let ok = result_with(vec![SnapshotIssue::warning(
            IssueCode::DifferentialNotConsumed,
            "unused",
        )]);
        assert!(ok.success);
        assert_eq!(ok.warning_count(), 1);

        let failed = result_with(vec![
            SnapshotIssue::error(IssueCode::CardinalityViolation, "min too small")
                .with_path("Patient.name"),
            SnapshotIssue::information(IssueCode::SlicingError, "note"),
        ]);
        assert!(!failed.success);
        assert_eq!(failed.error_count(), 1);
        assert_eq!(
            failed.issues_with_code(IssueCode::CardinalityViolation).count(),
            1
        );
    }

    #[test]
    fn codes_render_screaming_snake_case() {
        assert_eq!(IssueCode::DifferentialNotConsumed.to_string(), "DIFFERENTIAL_NOT_CONSUMED");
        assert_eq!(
            serde_json::to_value(IssueCode::BaseMissingSnapshot).unwrap(),
            "BASE_MISSING_SNAPSHOT"
        );
    }

    #[test]
    fn operation_outcome_shape() {
        let result = result_with(vec![SnapshotIssue::error(
            IssueCode::TypeIncompatible,
            "string is not allowed",
        )
        .with_path("Observation.value[x]")
        .with_details("base allows Quantity")]);

        let outcome = result.to_operation_outcome();
        assert_eq!(outcome["resourceType"], "OperationOutcome");
        let issue = &outcome["issue"][0];
        assert_eq!(issue["severity"], "error");
        assert_eq!(issue["code"], "structure");
        assert_eq!(issue["expression"][0], "Observation.value[x]");
        assert!(issue["diagnostics"]
            .as_str()
            .unwrap()
            .starts_with("TYPE_INCOMPATIBLE"));
    }

    #[test]
    fn display_includes_path() {
        let issue = SnapshotIssue::warning(IssueCode::PathNotFound, "no such element")
            .with_path("Patient.foo");
        assert_eq!(
            issue.to_string(),
            "[Warning] PATH_NOT_FOUND: no such element at Patient.foo"
        );
    }
}
