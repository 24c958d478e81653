use std::sync::Arc;

use chatline_protocol::Generator;
use chatline_protocol::vendors::EchoGenerator;
use chatline_protocol::vendors::openai::OpenAiGenerator;
use tracing::{info, warn};

use crate::config::{GeneratorKind, ServerConfig};

/// Shared state for all handlers.
pub struct AppState {
    pub config: ServerConfig,
    /// `None` when the configured generator could not be created; chat
    /// requests then get an in-band error.
    pub generator: Option<Arc<dyn Generator>>,
}

impl AppState {
    pub fn new(config: ServerConfig, generator: Option<Arc<dyn Generator>>) -> Self {
        Self { config, generator }
    }

    /// Builds state with the generator named in `config`.
    pub fn from_config(config: ServerConfig) -> Self {
        let generator = build_generator(config.generator);
        Self::new(config, generator)
    }
}

/// Creates the generator for `kind`, logging instead of failing so the
/// service can still start (and report the problem per request).
pub fn build_generator(kind: GeneratorKind) -> Option<Arc<dyn Generator>> {
    match kind {
        GeneratorKind::Echo => {
            info!(generator = "echo", "chat generator ready");
            Some(Arc::new(EchoGenerator::new()))
        }
        GeneratorKind::OpenAi => match OpenAiGenerator::from_env() {
            Ok(generator) => {
                info!(generator = "openai", model = %generator.config().model, "chat generator ready");
                Some(Arc::new(generator))
            }
            Err(e) => {
                warn!(error = %e, "OpenAI generator unavailable; chat requests will fail until configured");
                None
            }
        },
    }
}
