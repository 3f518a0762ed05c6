pub mod client;

pub use client::LlmClient;

use thiserror::Error;

/// Failures surfaced by the generation dispatcher. The mention pipeline maps
/// all of these to a single user-facing apology; the variants exist for logs.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("model request timed out")]
    Timeout,
    #[error("model API error: {0}")]
    Api(String),
    #[error("model returned no usable content")]
    MalformedResponse,
}
