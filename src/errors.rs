//! # Operator Errors
//!
//! Classified errors carried from the point of failure to the outcome classifier.
//!
//! Every failure the reconciler can observe is wrapped exactly once into an
//! [`OperatorError`] carrying:
//! - an [`ErrorKind`] deciding whether the attempt is retried
//! - a human readable message and, when available, the underlying cause
//! - structured context (namespace, name, key, resource, ...) for diagnostics
//!
//! The classifier only ever inspects the kind.

use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Boxed error used for causes coming from collaborators
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Retry classification of an [`OperatorError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Infrastructure hiccup (API server, network). Always retried.
    Transient,
    /// Missing or misconfigured precondition that can be repaired externally.
    /// Retried, subject to escalation.
    Config,
    /// Irrecoverable or unclassified. Never retried.
    Permanent,
}

impl ErrorKind {
    /// Get human-readable string representation
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Config => "config",
            Self::Permanent => "permanent",
        }
    }

    /// Whether an error of this kind may be retried
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(self, Self::Transient | Self::Config)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("{message}{}", format_context(.context))]
pub struct OperatorError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
    context: BTreeMap<String, String>,
}

impl OperatorError {
    fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
            context: BTreeMap::new(),
        }
    }

    /// Error expected to clear on its own
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    /// Error caused by missing or invalid configuration
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    /// Error that retrying cannot fix
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    /// Attach the underlying cause
    #[must_use]
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach a diagnostic key/value pair. Later values overwrite earlier ones.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }

    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub const fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Whether the classifier should schedule a retry for this error
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Re-tag this error as permanent, remembering the kind it had before
    #[must_use]
    pub fn escalate(mut self) -> Self {
        if self.kind != ErrorKind::Permanent {
            self.context
                .insert("escalated_from".to_string(), self.kind.to_string());
            self.kind = ErrorKind::Permanent;
        }
        self
    }
}

fn format_context(context: &BTreeMap<String, String>) -> String {
    if context.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = context.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!(" [{}]", pairs.join(", "))
}
