//! OpenAI chat completions integration.
//!
//! Vendor-specific configuration lives here so the generation contract can
//! remain provider-agnostic.
mod adapter;
mod config;
pub(crate) mod transport;

pub use adapter::OpenAiGenerator;
pub use config::{DEFAULT_MODEL, DEFAULT_TEMPERATURE, OpenAiClientConfig};

pub(crate) const OPENAI_PROVIDER: &str = "openai";
