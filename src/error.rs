use std::fmt;

#[derive(Debug)]
pub enum EngineError {
    /// Any failure surfaced by the SQL collaborator. Aborts the current call.
    Sql(String),
    /// A model slug or id that the registry cannot resolve.
    MissingModel(String),
    /// A row that a CRUD call expected to exist.
    NotFound(String),
    /// A `collection`/`part` setup whose peer cannot be resolved.
    ReciprocalSetup(String),
    /// A lifecycle interceptor failed; the CRUD call is aborted.
    Hook(String),
    /// A field descriptor row that cannot be interpreted.
    BadDescriptor(String),
    Config(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::Sql(msg) => write!(f, "SQL error: {}", msg),
            EngineError::MissingModel(key) => write!(f, "unknown model: {}", key),
            EngineError::NotFound(msg) => write!(f, "not found: {}", msg),
            EngineError::ReciprocalSetup(msg) => write!(f, "reciprocal setup failed: {}", msg),
            EngineError::Hook(msg) => write!(f, "hook failed: {}", msg),
            EngineError::BadDescriptor(msg) => write!(f, "bad field descriptor: {}", msg),
            EngineError::Config(msg) => write!(f, "configuration error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Sql(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
