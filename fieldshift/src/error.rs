use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("job `{0}` not found")]
    JobNotFound(Uuid),

    #[error("job `{0}` is not in a failed state")]
    NotRetryable(Uuid),

    #[error("engine `{0}`")]
    Engine(#[from] fieldshift_engine::EngineError),

    #[cfg(feature = "pg")]
    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("serde_json `{0}`")]
    SerdeJson(#[from] serde_json::Error),

    #[error("{0}`")]
    Any(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, QueueError>;
