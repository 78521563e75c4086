use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum LudoraError {
    #[error("I/O error: {0}")]
    #[diagnostic(code(ludora::io))]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    #[diagnostic(code(ludora::config))]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(ludora::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(ludora::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("JOSE error: {0}")]
    #[diagnostic(code(ludora::jose))]
    Jose(String),

    #[error("Bad request: {0}")]
    #[diagnostic(code(ludora::bad_request))]
    BadRequest(String),

    #[error("Not found: {0}")]
    #[diagnostic(code(ludora::not_found))]
    NotFound(String),

    #[error("{0}")]
    #[diagnostic(code(ludora::other))]
    Other(String),
}

impl From<josekit::JoseError> for LudoraError {
    fn from(value: josekit::JoseError) -> Self {
        LudoraError::Jose(value.to_string())
    }
}
