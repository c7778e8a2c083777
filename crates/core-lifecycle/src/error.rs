use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("failed to spawn service: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("service is not running")]
    NotRunning,

    #[error("state query failed: {0}")]
    Query(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("service task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
