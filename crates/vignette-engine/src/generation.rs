use tracing::debug;
use vignette_contracts::context::SessionContext;
use vignette_contracts::images::ImageRef;
use vignette_contracts::prompts::portrait_prompt_request;

use crate::backend::{GenerativeBackend, ImageRequestOptions};
use crate::error::{PortraitError, PortraitResult};

/// Text call for a descriptive prompt, then one square image from it.
pub fn run_generation(
    backend: &dyn GenerativeBackend,
    context: &SessionContext,
) -> PortraitResult<ImageRef> {
    let request = portrait_prompt_request(context);
    let prompt = backend
        .compose_text(&request)
        .map_err(PortraitError::Backend)?;
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(PortraitError::generation(
            "text backend returned an empty portrait description",
        ));
    }
    debug!(backend = backend.name(), prompt_chars = prompt.len(), "portrait prompt composed");

    let images = backend
        .generate_image(prompt, &ImageRequestOptions::default())
        .map_err(PortraitError::Backend)?;
    images
        .into_iter()
        .find(|image| !image.is_empty())
        .ok_or_else(|| PortraitError::generation("image backend returned no images"))
}
