//! Generative backend capability set consumed by the studio.

use anyhow::Result;
use tracing::warn;
use vignette_contracts::images::ImageRef;
use vignette_contracts::models::{
    ModelSelector, CAPABILITY_EDIT, CAPABILITY_IMAGE, CAPABILITY_TEXT,
};
use vignette_contracts::providers::{NamedProvider, ProviderRegistry};

mod dryrun;
mod gemini;

pub use dryrun::DryrunBackend;
pub use gemini::GeminiBackend;

/// One constituent of a backend reply, in the order the backend sent it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyPart {
    Text(String),
    Image(ImageRef),
}

impl ReplyPart {
    pub fn as_image(&self) -> Option<&ImageRef> {
        match self {
            Self::Image(image) => Some(image),
            Self::Text(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRequestOptions {
    pub count: u32,
    pub aspect_ratio: String,
}

impl Default for ImageRequestOptions {
    fn default() -> Self {
        Self {
            count: 1,
            aspect_ratio: "1:1".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    #[default]
    ImageOnly,
    ImageWithText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EditOptions {
    pub output: OutputKind,
}

pub trait GenerativeBackend: NamedProvider + Send + Sync {
    /// Single text-in, text-out call.
    fn compose_text(&self, prompt: &str) -> Result<String>;

    fn generate_image(&self, prompt: &str, options: &ImageRequestOptions)
        -> Result<Vec<ImageRef>>;

    /// Image-conditioned call used both for plain edits and for animation
    /// requests. Parts come back in reply order.
    fn edit_image(
        &self,
        image: &ImageRef,
        instruction: &str,
        options: &EditOptions,
    ) -> Result<Vec<ReplyPart>>;
}

/// Model names a backend uses for its three capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendModels {
    pub text: String,
    pub image: String,
    pub edit: String,
}

#[derive(Debug, Clone, Default)]
pub struct ModelOverrides {
    pub text: Option<String>,
    pub image: Option<String>,
    pub edit: Option<String>,
}

impl BackendModels {
    pub fn resolve(
        provider: &str,
        selector: &ModelSelector,
        overrides: &ModelOverrides,
    ) -> Result<Self> {
        let pick = |requested: Option<&str>, capability: &str| -> Result<String> {
            let selection = selector
                .select(provider, requested, capability)
                .map_err(anyhow::Error::msg)?;
            if requested.is_some() {
                if let Some(reason) = selection.fallback_reason.as_deref() {
                    warn!(provider, capability, model = %selection.model.name, "{reason}");
                }
            }
            Ok(selection.model.name)
        };
        Ok(Self {
            text: pick(overrides.text.as_deref(), CAPABILITY_TEXT)?,
            image: pick(overrides.image.as_deref(), CAPABILITY_IMAGE)?,
            edit: pick(overrides.edit.as_deref(), CAPABILITY_EDIT)?,
        })
    }
}

pub type BackendRegistry = ProviderRegistry<Box<dyn GenerativeBackend>>;

pub fn default_backend_registry(overrides: &ModelOverrides) -> Result<BackendRegistry> {
    let selector = ModelSelector::new(None);
    let mut backends: BackendRegistry = ProviderRegistry::default();
    backends.register(Box::new(DryrunBackend::new(BackendModels::resolve(
        "dryrun", &selector, overrides,
    )?)));
    backends.register(Box::new(GeminiBackend::new(BackendModels::resolve(
        "gemini", &selector, overrides,
    )?)));
    Ok(backends)
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
