use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("configuration error for server `{server}`: {message}")]
    Configuration { server: String, message: String },

    #[error("upstream `{server}` is unavailable: {message}")]
    Unavailable { server: String, message: String },

    #[error("upstream `{server}` returned error {code}: {message}")]
    Call {
        server: String,
        code: i64,
        message: String,
    },

    #[error("deadline exceeded waiting on `{server}`")]
    DeadlineExceeded { server: String },

    #[error("transport error on `{server}`: {message}")]
    Transport { server: String, message: String },

    #[error("server `{0}` is not managed by this hub")]
    UnknownServer(String),

    #[error("tool `{0}` is not registered")]
    ToolNotFound(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, UpstreamError>;
