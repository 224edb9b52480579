use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] tickwatch_core::AppConfigError),

    #[error("invalid rule document: {0}")]
    Rule(#[from] tickwatch_core::ConfigError),

    #[error(transparent)]
    Engine(#[from] tickwatch_core::EngineError),

    #[error(transparent)]
    Warehouse(#[from] tickwatch_core::WarehouseError),

    #[error("notification failed: {0}")]
    Send(#[from] tickwatch_core::SendError),

    #[error("logging setup failed: {0}")]
    Logging(String),

    #[error("failed to read {path}: {source}")]
    ReadFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Rule(_) => 2,
            Self::ReadFile { .. } => 2,
            Self::Engine(_) => 3,
            Self::Warehouse(_) => 3,
            Self::Serialization(_) => 4,
            Self::Send(_) => 6,
            Self::Logging(_) => 1,
            Self::Io(_) => 10,
        }
    }
}
