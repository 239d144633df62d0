//! # erniebot
//!
//! Client SDK for the ERNIE Bot family of large-language-model APIs.
//!
//! ## Key Features
//!
//! - **Multiple Backends**: Qianfan (OAuth token or IAM signing), Yinian, AI Studio
//!   and custom endpoints behind one resource API
//! - **Token Management**: Process-wide token cache with per-credential locking
//!   and refresh-once recovery from expired tokens
//! - **Streaming**: Server-Sent Events exposed as async streams or blocking
//!   iterators that release the connection when dropped
//! - **Resilience**: Retry with exponential backoff for transient provider errors,
//!   long-polling for asynchronous jobs
//! - **Async and Blocking**: Every operation has an async form and a `*_blocking` twin
//!
//! ## Example
//!
//! ```rust,no_run
//! use erniebot::{ChatCompletionParams, ErnieClient, Message};
//!
//! # async fn example() -> erniebot::ErnieResult<()> {
//! let client = ErnieClient::from_env()?;
//! let chat = client.chat_completion()?;
//!
//! let params = ChatCompletionParams::new("ernie-bot", vec![Message::user("Hello!")]);
//! let response = chat.create(params).await?.into_response()?;
//! println!("{}", response.result());
//! # Ok(())
//! # }
//! ```

#![allow(clippy::missing_errors_doc)]

// Logging utilities (re-exports tracing with log_* naming) - internal only
pub(crate) mod logging;

pub mod auth;
pub mod backends;
pub mod client;
pub mod config;
pub mod error;
pub mod http_client;
pub(crate) mod internals;
pub mod request;
pub mod resource;
pub mod resources;
pub mod response;

pub use internals::retry;

#[cfg(test)]
pub mod tests;

pub use auth::{AuthManager, CacheKey, CachedToken, TokenCache, TokenSource};
pub use backends::{build_backend, Backend};
pub use client::ErnieClient;
pub use config::{ApiType, Config, ConfigItemNotFound, ConfigOverride};
pub use error::{ApiErrorDetails, ErnieError, ErnieResult, ErrorCategory, ErrorSeverity};
pub use http_client::{BlockingTransmission, EnvelopeIter, HttpClient, Transmission};
pub use request::Request;
pub use resource::{PollPolicy, Resource};
pub use resources::chat_completion::{
    ChatCompletion, ChatCompletionParams, ChatCompletionResponse, ChatCompletionResult, ChatResult,
    Function, FunctionCall, Message, Role,
};
pub use resources::embedding::{Embedding, EmbeddingParams, EmbeddingResponse};
pub use resources::fine_tuning::{
    CreateJobParams, CreateTaskParams, FineTuningJob, FineTuningResponse, FineTuningTask, JobParams,
};
pub use resources::image::{Image, ImageParams, ImageResponse};
pub use resources::CallOptions;
pub use response::Envelope;
pub use retry::RetryPolicy;
