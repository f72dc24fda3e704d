use thiserror::Error;

/// Errors raised while configuring the bridge, dispatching work to Lambda,
/// or writing results back to a record.
///
/// Callback authentication failures are not errors: `CallbackAuthenticator::authorize`
/// returns `None` for an unauthentic callback.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("No Lambda function specified")]
    NoFunctionSpecified,

    #[error("Function {0} not available on Lambda")]
    FunctionUnavailable(String),

    #[error("Invalid invocation params: {0}")]
    InvalidParams(String),

    #[error("{code}: {body}")]
    RemoteInvocation { code: String, body: String },

    #[error("Lambda request failed: {0}")]
    Remote(String),

    #[error("No file attached to '{0}'")]
    MissingAttachment(String),

    #[error("Attachment changed while it was being processed")]
    AttachmentChanged,

    #[error("Record not found: {record_type} {id}")]
    RecordNotFound { record_type: String, id: String },

    #[error("No record adapter registered for type '{0}'")]
    UnknownRecordType(String),

    #[error("Invalid Lambda result: {0}")]
    InvalidResult(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

pub type Result<T, E = BridgeError> = std::result::Result<T, E>;
