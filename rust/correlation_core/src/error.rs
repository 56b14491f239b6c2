use thiserror::Error;

/// Failures raised by an [`ObjectStore`](crate::store::ObjectStore).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum CorrelationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    #[error("role '{0}' has no id and cannot be added to the correlation model")]
    UnsavedRole(String),

    #[error("correlation model build aborted after {loaded} of {total} roles")]
    Aborted { loaded: usize, total: usize },

    #[error("correlation cache is inactive and no model has been built")]
    Inactive,
}

pub type Result<T> = std::result::Result<T, CorrelationError>;
