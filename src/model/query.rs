//! CandidateQuery: generated Cypher plus its validation status.

use serde::{Deserialize, Serialize};

/// Why the validator refused a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RejectReason {
    #[error("query is empty")]
    Empty,
    #[error("query exceeds {0} characters")]
    TooLong(usize),
    #[error("query could not be tokenized: {0}")]
    Malformed(String),
    #[error("query must begin with a MATCH read pattern")]
    MissingReadPattern,
    #[error("query must end in a RETURN clause")]
    MissingReturn,
    #[error("denied keyword '{0}'")]
    DeniedKeyword(String),
    #[error("multiple statements are not allowed")]
    MultipleStatements,
    #[error("comments are not allowed in generated queries")]
    Comment,
    #[error("query is outside the read-only grammar: {0}")]
    Grammar(String),
}

impl RejectReason {
    /// Stable code for logs and structured failures.
    pub fn code(&self) -> &'static str {
        match self {
            RejectReason::Empty => "empty",
            RejectReason::TooLong(_) => "too_long",
            RejectReason::Malformed(_) => "malformed",
            RejectReason::MissingReadPattern => "missing_read_pattern",
            RejectReason::MissingReturn => "missing_return",
            RejectReason::DeniedKeyword(_) => "denied_keyword",
            RejectReason::MultipleStatements => "multiple_statements",
            RejectReason::Comment => "comment",
            RejectReason::Grammar(_) => "grammar",
        }
    }
}

/// Validation state of a candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationStatus {
    Unvalidated,
    Valid,
    Rejected(RejectReason),
}

/// A generated query. Only the validator can move it to `Valid`; the
/// executor refuses anything else.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateQuery {
    text: String,
    description: Option<String>,
    status: ValidationStatus,
}

impl CandidateQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), description: None, status: ValidationStatus::Unvalidated }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        let description = description.into();
        self.description = (!description.trim().is_empty()).then_some(description);
        self
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn status(&self) -> &ValidationStatus {
        &self.status
    }

    pub fn is_valid(&self) -> bool {
        self.status == ValidationStatus::Valid
    }

    pub fn rejection(&self) -> Option<&RejectReason> {
        match &self.status {
            ValidationStatus::Rejected(reason) => Some(reason),
            _ => None,
        }
    }

    pub(crate) fn accept(mut self) -> Self {
        self.status = ValidationStatus::Valid;
        self
    }

    pub(crate) fn reject(mut self, reason: RejectReason) -> Self {
        self.status = ValidationStatus::Rejected(reason);
        self
    }
}
