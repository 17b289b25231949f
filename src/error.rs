use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AutobindError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Schema error: {0}")]
    Schema(String),
    #[error("Invocation of '{member}' failed: {message}")]
    Invocation { member: String, message: String },
    #[error("Task cancelled")]
    Cancelled,
    #[error("Task timed out after {0} ms")]
    Timeout(u64),
    #[error("Store error: {0}")]
    Store(String),
    #[error("Value of {length} characters exceeds the store limit of {limit}")]
    ValueTooLarge { length: usize, limit: usize },
    #[error("JSON error: {0}")]
    Json(String),
    #[error("Conversion error: {0}")]
    Conversion(String),
    #[error("Key '{0}' is already used by the other namespace of this node")]
    Namespace(String),
    #[error("Context '{0}' has no representation")]
    Unbound(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, AutobindError>;

impl AutobindError {
    pub fn invocation(member: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invocation {
            member: member.into(),
            message: message.into(),
        }
    }
    /// Store and lock failures mean the backend is gone; callers must not
    /// route around them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_) | Self::Lock(_))
    }
}

// Helper conversions
impl From<rusqlite::Error> for AutobindError {
    fn from(e: rusqlite::Error) -> Self { Self::Store(e.to_string()) }
}
impl From<serde_json::Error> for AutobindError {
    fn from(e: serde_json::Error) -> Self { Self::Json(e.to_string()) }
}
impl From<config::ConfigError> for AutobindError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl<T> From<std::sync::PoisonError<T>> for AutobindError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}
