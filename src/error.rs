use thiserror::Error;

/// Crate-wide result type.
pub type AppResult<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    // =========
    // Config / startup
    // =========
    #[error("Configuration file IO error: {0}")]
    ConfigIo(#[from] std::io::Error),

    #[error("Failed to parse JSON config: {0}")]
    ConfigJson(#[from] serde_json::Error),

    #[error("Missing configuration field: {0}")]
    MissingConfig(&'static str),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // =========
    // Connectivity
    // =========
    #[error("MySQL error: {0}")]
    MySql(#[from] mysql_async::Error),

    #[error("Connection '{0}' not found in pool")]
    ConnectionNotFound(String),

    // =========
    // Schema / mapping
    // =========
    #[error("Schema mismatch on {table}.{column}: {detail}")]
    SchemaMismatch {
        table: String,
        column: String,
        detail: String,
    },

    #[error("Unknown mapping reference: {0}")]
    UnknownMappingRef(String),

    // =========
    // Transform / filter runtime
    // =========
    #[error("Transform '{module}.{function}' failed: {detail}")]
    TransformFailed {
        module: String,
        function: String,
        detail: String,
    },

    #[error("Failed to load transform module '{0}': {1}")]
    TransformLoad(String, String),

    #[error("Filter evaluation error: {0}")]
    FilterError(String),

    // =========
    // Bus
    // =========
    #[error("Message bus overflow for target '{0}'")]
    BusOverflow(String),

    // =========
    // Metrics / Prometheus
    // =========
    #[error("Prometheus registry error: {0}")]
    Prometheus(#[from] prometheus::Error),

    // =========
    // Application-domain errors
    // =========
    #[error("Failed to spawn task: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Shutdown in progress")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}
