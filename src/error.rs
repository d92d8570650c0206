//! Error types for registration operations.

use std::fmt;

use thiserror::Error;

use crate::validate::ValidationIssue;

/// Every issue found while validating a submission, tagged with the
/// participant's position in the batch (0 is the primary participant).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors {
    pub issues: Vec<(usize, ValidationIssue)>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn len(&self) -> usize {
        self.issues.len()
    }

    /// True when any participant tripped the given issue.
    pub fn contains(&self, issue: &ValidationIssue) -> bool {
        self.issues.iter().any(|(_, found)| found == issue)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .issues
            .iter()
            .map(|(index, issue)| format!("participant {}: {issue}", index + 1))
            .collect();
        write!(f, "{}", rendered.join("; "))
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// The submission was rejected before anything was written.
    #[error("registration is incomplete: {0}")]
    Validation(ValidationErrors),

    /// Another record already holds this identifier.
    #[error("student id {student_id} is already taken")]
    DuplicateId { student_id: String },

    #[error("student id numbering for {prefix} has run out of sequence numbers")]
    SequenceExhausted { prefix: String },

    #[error("no participant record with handle {doc_id}")]
    RecordNotFound { doc_id: String },

    #[error("database query failed: {0}")]
    Database(#[from] sqlx::Error),

    #[error("database migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    #[error("invalid configuration: {message}")]
    ConfigValidation { message: String },

    #[error("invalid date '{value}', expected YYYY-MM-DD")]
    InvalidDate { value: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl From<ValidationErrors> for Error {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

impl Error {
    /// Validation errors are shown inline; everything else is a blocking alert.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    pub fn is_duplicate_id(&self) -> bool {
        matches!(self, Self::DuplicateId { .. })
    }
}
