//! # Forgent Core
//!
//! Everything the agent needs before the first prompt is typed.
//!
//! ## Core Concepts
//! - **Provider**: Trait-based LLM communication (OpenAI-compatible, Anthropic)
//! - **Config**: Model settings, prompt templates and the terminal theme
//! - **Netif**: Network interface discovery, selection and the raw-socket probe

pub mod config;
pub mod error;
pub mod netif;
pub mod provider;

pub use config::{
    load_prompt_templates, render_template, AgentSettings, ExecutorSettings, ModelSettings,
    PromptTemplates, PromptVars, Settings, Spacing, Theme, INTERFACE_PLACEHOLDER,
};
pub use error::{Error, ErrorKind, ErrorStatus, Result};
pub use netif::{
    list_interfaces, parse_selection, probe_raw_socket, prompt_for_interface,
    render_interface_table, NetworkInterface,
};
pub use provider::{
    build_provider, AnthropicProvider, ChatMessage, CompletionRequest, FinishReason, LlmProvider,
    OpenAIProvider, Provider, ProviderConfig, ProviderError, ProviderType, Role, StreamChunk,
    StreamReceiver, Usage, UsageTracker,
};
