use thiserror::Error;
use uuid::Uuid;

/// Custom Result type for this crate.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Failures while turning a delivery body into a typed message.
///
/// These are never fatal for a consume loop: the message is logged,
/// acknowledged and dropped.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessageError {
    #[error("Invalid message body: {0}")]
    Decode(String),

    #[error("Message does not match schema '{schema}': {reason}. Expected fields: {expected:?}")]
    Schema {
        schema: &'static str,
        reason: String,
        expected: Vec<&'static str>,
    },
}

/// Errors raised by the persistence collaborator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RepositoryError {
    #[error("Unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("No row matched: {0}")]
    EmptyResult(String),

    #[error("Prompt '{id}' cannot move from '{from}' to '{to}'")]
    InvalidStatusTransition {
        id: Uuid,
        from: String,
        to: String,
    },
}

/// The Error type for relay operations.
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Configuration validation error: {0}")]
    ConfigValidationError(String),

    #[error("I/O error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },

    /// Broker unreachable, channel or connection closed. Always propagated.
    #[error("Broker transport error: {0}")]
    TransportError(String),

    #[error("Serialization/Deserialization error: {source}")]
    SerializationError {
        #[from]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("Object storage error: {0}")]
    ObjectStore(String),

    #[error("Handler '{handler}' failed: {reason}")]
    HandlerError { handler: &'static str, reason: String },

    /// One push connection could not be written to.
    #[error("Delivery to connection failed: {0}")]
    DeliveryFailure(String),

    #[error("Invalid prompt path")]
    InvalidPromptPath,

    #[error("Raw prompt not found. Try to upload again")]
    RawPromptNotFound,

    #[error("Raw prompt already exists. Maybe, you need to get the new presigned link and upload image")]
    RawPromptAlreadyExists,

    #[error("Sorry. Now we can't process your request. Try again later")]
    CannotProcessPrompt,

    #[error("Prompt '{0}' not found")]
    PromptNotFound(Uuid),
}

impl RelayError {
    /// True for errors that mean the broker link itself is gone.
    pub fn is_transport(&self) -> bool {
        matches!(self, RelayError::TransportError(_))
    }
}

// lapin errors are flattened to strings; callers only need to know the
// broker link failed, not which frame did it.
impl From<lapin::Error> for RelayError {
    fn from(err: lapin::Error) -> Self {
        RelayError::TransportError(err.to_string())
    }
}
