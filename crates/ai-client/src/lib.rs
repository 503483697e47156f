pub mod client;
pub mod error;
pub mod retry;

pub use client::{shared_http_client, CompletionClient, HttpCompletionClient, ModelProvider};
pub use error::{AiError, AiResult};
