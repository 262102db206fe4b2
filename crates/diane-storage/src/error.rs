use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("server `{0}` is not defined")]
    UnknownServer(String),

    #[error("context `{0}` is not defined")]
    UnknownContext(String),

    #[error("cannot delete the default context `{0}`")]
    CannotDeleteDefault(String),

    #[error("malformed transport definition for `{server}`: {message}")]
    InvalidTransport { server: String, message: String },

    #[error("failed to read legacy import file {path}: {source}")]
    LegacyImportRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse legacy import file {path}: {source}")]
    LegacyImportParse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;
