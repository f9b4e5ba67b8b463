//! Failure taxonomy shared by the query compiler and the mutation engine.
//!
//! Client-input failures (`IncompleteEntity`, `NoSuchEntity`,
//! `IllegalArgument`, `ReadOnly`) are recoverable by the caller resupplying
//! data. Everything else is internal: the enclosing transaction is rolled
//! back and nothing is retried at this layer.

use thiserror::Error;

/// Typed failure returned by every core operation.
#[derive(Debug, Error)]
pub enum StaError {
    // ---
    /// A required field is absent or explicitly null.
    #[error("incomplete entity: {0}")]
    IncompleteEntity(String),

    /// A referenced entity does not exist and can not be created.
    #[error("no such entity: {0}")]
    NoSuchEntity(String),

    /// A structural invariant would be violated by the request.
    #[error("illegal argument: {0}")]
    IllegalArgument(String),

    /// The store reported something that can only happen when key
    /// uniqueness is broken (multi-row update, duplicate existence count).
    #[error("consistency violation: {0}")]
    ConsistencyViolation(String),

    /// The path resolver and the compiler disagree (unknown adjacency,
    /// identifier of the wrong representation kind).
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Mutations are disabled for this deployment.
    #[error("service is read-only")]
    ReadOnly,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

pub type StaResult<T> = Result<T, StaError>;

impl StaError {
    // ---
    pub fn incomplete(message: impl Into<String>) -> Self {
        Self::IncompleteEntity(message.into())
    }

    pub fn no_such_entity(message: impl Into<String>) -> Self {
        Self::NoSuchEntity(message.into())
    }

    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::IllegalArgument(message.into())
    }

    pub fn consistency(message: impl Into<String>) -> Self {
        Self::ConsistencyViolation(message.into())
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True for failures the caller caused and can fix by changing the request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::IncompleteEntity(_)
                | Self::NoSuchEntity(_)
                | Self::IllegalArgument(_)
                | Self::ReadOnly
        )
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::StaError;

    #[test]
    fn client_errors_are_classified() {
        // ---
        assert!(StaError::incomplete("name").is_client_error());
        assert!(StaError::no_such_entity("Thing 4").is_client_error());
        assert!(StaError::illegal_argument("both streams").is_client_error());
        assert!(StaError::ReadOnly.is_client_error());

        assert!(!StaError::consistency("two rows").is_client_error());
        assert!(!StaError::configuration("no join").is_client_error());
        assert!(!StaError::Store(sqlx::Error::RowNotFound).is_client_error());
    }

    #[test]
    fn messages_carry_context() {
        // ---
        let err = StaError::incomplete("name can not be null.");
        assert_eq!(err.to_string(), "incomplete entity: name can not be null.");
    }
}
