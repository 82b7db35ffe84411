//! Provider subsystem for model inference backends.
//!
//! Each backend implements the [`Provider`] trait defined in [`traits`]. The
//! relay currently ships a single backend, [`GeminiProvider`], built by
//! [`create_provider`] from loaded configuration.

pub mod gemini;
pub mod traits;

pub use gemini::{build_payload, extract_text, GeminiProvider};
pub use traits::{GenerationError, GenerationResult, Provider};

use crate::config::Config;
use std::sync::Arc;

/// Build the configured generation backend.
pub fn create_provider(config: &Config) -> anyhow::Result<Arc<dyn Provider>> {
    let provider = GeminiProvider::from_config(config)?;
    tracing::info!(
        provider = provider.name(),
        model = %provider.generation().model,
        "Provider initialized"
    );
    Ok(Arc::new(provider))
}
