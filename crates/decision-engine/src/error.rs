use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("completion failed: {0}")]
    Completion(#[from] ai_client::AiError),

    #[error("failed to parse model response: {0}")]
    Parse(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
