use thiserror::Error;

/// Errors that can occur during replica store operations.
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// Error from the MongoDB driver (connectivity, server-side failure).
    #[error("MongoDB error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    /// A document could not be decoded into the expected shape.
    #[error("Decode error: {0}")]
    Decode(#[from] mongodb::bson::de::Error),

    /// The store refused the operation.
    #[error("Operation rejected on {collection}: {message}")]
    Rejected { collection: String, message: String },
}

impl ReplicaError {
    /// Create a Rejected error for a collection.
    pub fn rejected(collection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Rejected {
            collection: collection.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for replica operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;
