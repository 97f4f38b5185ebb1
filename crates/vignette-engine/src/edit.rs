use tracing::debug;
use vignette_contracts::images::ImageRef;
use vignette_contracts::prompts::edit_instruction;

use crate::backend::{EditOptions, GenerativeBackend, OutputKind};
use crate::error::{PortraitError, PortraitResult};

/// Splits a `data:<mime>;base64,<payload>` reference into mime type and
/// bytes.
pub fn decompose(reference: &str) -> PortraitResult<(String, Vec<u8>)> {
    let image = ImageRef::from_data_uri(reference)?;
    Ok((image.mime_type().to_string(), image.bytes().to_vec()))
}

pub fn run_edit(
    backend: &dyn GenerativeBackend,
    image: &ImageRef,
    instruction: &str,
) -> PortraitResult<ImageRef> {
    let instruction = instruction.trim();
    if instruction.is_empty() {
        return Err(PortraitError::invalid_input("edit instruction is empty"));
    }
    let (mime_type, bytes) = decompose(&image.to_data_uri())?;
    let source = ImageRef::new(mime_type, bytes);

    let parts = backend
        .edit_image(
            &source,
            &edit_instruction(instruction),
            &EditOptions {
                output: OutputKind::ImageOnly,
            },
        )
        .map_err(PortraitError::Backend)?;
    debug!(backend = backend.name(), parts = parts.len(), "edit reply received");

    parts
        .iter()
        .rev()
        .find_map(|part| part.as_image())
        .filter(|image| !image.is_empty())
        .cloned()
        .ok_or_else(|| PortraitError::edit("reply contained no image"))
}
