//! Error types for the reference count audit.

use thiserror::Error;

use crate::core::IdRange;

/// Main error type for audit operations.
#[derive(Error, Debug)]
pub enum AuditError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A configured check could not be split into `table.idColumn`.
    #[error("Malformed check '{spec}' for database {database}: expected \"table.idColumn\"")]
    MalformedCheckSpec { database: String, spec: String },

    /// Connection or query error with context
    #[error("Database error: {message}\n  Context: {context}")]
    Database { message: String, context: String },

    /// Boundary sampling failed or produced unusable boundaries
    #[error("Range sampling failed: {0}")]
    Sampling(String),

    /// Stored counters could not be read for a range
    #[error("Stored count fetch failed for range {range}")]
    Fetch {
        range: IdRange,
        #[source]
        source: Box<AuditError>,
    },

    /// A referencing table could not be recounted for a range
    #[error("Recount of {check} failed for range {range}")]
    Recount {
        range: IdRange,
        check: String,
        #[source]
        source: Box<AuditError>,
    },

    /// A range worker task died before reporting an outcome
    #[error("Range worker failed: {0}")]
    Worker(String),

    /// Mismatches were found and the caller asked to treat them as failure
    #[error("{0} reference count mismatches found")]
    MismatchesFound(usize),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Audit was cancelled (SIGINT, etc.)
    #[error("Audit cancelled")]
    Cancelled,
}

impl AuditError {
    /// Create a Database error with context about where it occurred
    pub fn database(message: impl ToString, context: impl Into<String>) -> Self {
        AuditError::Database {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Wrap a failure while reading stored counters for `range`.
    pub fn fetch(range: IdRange, source: AuditError) -> Self {
        AuditError::Fetch {
            range,
            source: Box::new(source),
        }
    }

    /// Wrap a failure while recounting `check` for `range`.
    pub fn recount(range: IdRange, check: impl ToString, source: AuditError) -> Self {
        AuditError::Recount {
            range,
            check: check.to_string(),
            source: Box::new(source),
        }
    }

    /// The range this error is attributed to, if any.
    pub fn range(&self) -> Option<IdRange> {
        match self {
            AuditError::Fetch { range, .. } | AuditError::Recount { range, .. } => Some(*range),
            _ => None,
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            AuditError::Config(_)
            | AuditError::MalformedCheckSpec { .. }
            | AuditError::Yaml(_)
            | AuditError::Json(_) => 1,
            AuditError::Sampling(_) => 2,
            AuditError::Fetch { .. } | AuditError::Recount { .. } | AuditError::Worker(_) => 3,
            AuditError::Database { .. } => 4,
            AuditError::MismatchesFound(_) => 5,
            AuditError::Cancelled => 6,
            AuditError::Io(_) => 7,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for audit operations.
pub type Result<T> = std::result::Result<T, AuditError>;
