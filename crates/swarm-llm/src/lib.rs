//! # swarm-llm
//!
//! Model access for the Swarm engine: an OpenAI-compatible client, the
//! role-based router with retry and fallback, alias/allow/deny selection
//! and cost estimation.

pub mod mock;
pub mod openai;
pub mod pricing;
pub mod provider;
pub mod router;
pub mod selection;

pub use mock::{MockProvider, MockResponse};
pub use openai::OpenAiProvider;
pub use provider::{LlmProvider, LlmRequest, LlmResponse, StopReason, StreamChunk, Usage};
pub use router::{
    BackendMode, ChatOptions, ChatResponse, CredentialResolver, EnvCredentials, ModelRouter,
};
