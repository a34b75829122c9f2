use thiserror::Error;

#[derive(Debug, Error)]
pub enum OdmError {
    #[error("Cannot resolve field \"{segment}\" on {document}")]
    UnresolvedField { document: String, segment: String },

    #[error("Invalid value for operator {op}: {reason}")]
    InvalidOperatorValue { op: String, reason: String },

    #[error("Unknown update modifier: {0}")]
    UnknownModifier(String),

    #[error("{document} matching query does not exist")]
    DoesNotExist { document: String },

    #[error("Multiple {document} documents matched query")]
    MultipleResults { document: String },

    #[error("Cursor index {index} out of range")]
    IndexOutOfRange { index: usize },

    #[error("Database client error: {0}")]
    Client(String),

    #[error("Script is not supported by this client: {0}")]
    ScriptUnsupported(String),

    #[error("Unexpected result from database client: {0}")]
    UnexpectedResult(String),

    #[error("BSON: {0}")]
    Bson(#[from] bson::error::Error),

    #[error("Serde JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OdmError {
    pub(crate) fn invalid_value(op: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOperatorValue { op: op.to_owned(), reason: reason.into() }
    }
}
