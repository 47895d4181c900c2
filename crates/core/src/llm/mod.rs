//! LLM integration module

pub mod backend;
pub mod provider;

pub use backend::{
    ContextMessage, GenerationBackend, GenerationOutput, GenerationRequest, GenerationSettings,
    ProviderBackend, SamplingParams,
};
pub use provider::*;
