//! Model provider adapters for agentd.
//!
//! Each adapter converts internal `Message` and `ToolDescriptor`
//! records to one upstream wire format and converts the provider's
//! stream chunks back into uniform [`ProviderEvent`]s. The iteration
//! engine only ever sees the uniform stream.
//!
//! [`ProviderEvent`]: agentd_core::provider::ProviderEvent

pub mod anthropic;
pub mod local;
pub mod openai_compat;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use local::LocalHttpProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::build_provider;
