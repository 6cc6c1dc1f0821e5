use crate::{condition, metadata::error::RegexError};

/// Represents an error that occurred while evaluating a metadata condition.
#[derive(Debug)]
pub struct ConditionEvaluationError(Box<condition::Error>);

impl std::fmt::Display for ConditionEvaluationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to evaluate condition")
    }
}

impl std::error::Error for ConditionEvaluationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl From<condition::Error> for ConditionEvaluationError {
    fn from(value: condition::Error) -> Self {
        ConditionEvaluationError(Box::new(value))
    }
}

/// Represents an error that occurred while retrieving metadata for a plugin.
#[derive(Debug)]
pub enum MetadataRetrievalError {
    ConditionEvaluationError(ConditionEvaluationError),
    RegexError(RegexError),
}

impl std::fmt::Display for MetadataRetrievalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "failed to retrieve metadata")
    }
}

impl std::error::Error for MetadataRetrievalError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ConditionEvaluationError(e) => Some(e),
            Self::RegexError(e) => Some(e),
        }
    }
}

impl From<condition::Error> for MetadataRetrievalError {
    fn from(value: condition::Error) -> Self {
        MetadataRetrievalError::ConditionEvaluationError(value.into())
    }
}

impl From<RegexError> for MetadataRetrievalError {
    fn from(value: RegexError) -> Self {
        MetadataRetrievalError::RegexError(value)
    }
}

/// Represents an error returned by a [`crate::database::MasterlistUpdater`]
/// implementation.
#[derive(Debug)]
pub struct MasterlistUpdateError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl MasterlistUpdateError {
    pub fn new(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self(Box::new(source))
    }
}

impl std::fmt::Display for MasterlistUpdateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "the masterlist updater encountered an error")
    }
}

impl std::error::Error for MasterlistUpdateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.0.as_ref())
    }
}
