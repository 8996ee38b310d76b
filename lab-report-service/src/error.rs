use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("file is empty or could not be parsed")]
    EmptyFile,

    #[error("unsupported file type: {0}")]
    UnsupportedFile(String),

    #[error("LLM extraction failed: {0}")]
    Llm(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}
