use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use sha2::{Digest, Sha256};
use vignette_contracts::grid::{GridSpec, STANDARD_GRID};
use vignette_contracts::images::ImageRef;
use vignette_contracts::providers::NamedProvider;

use crate::sprites::encode_png;

use super::{
    BackendModels, EditOptions, GenerativeBackend, ImageRequestOptions, OutputKind, ReplyPart,
};

pub const DRYRUN_FRAME_DURATION_MS: u64 = 120;

/// Offline backend producing deterministic solid-colour images. Requests that
/// allow text output are answered like an animation request: a fenced
/// duration followed by a sprite sheet.
pub struct DryrunBackend {
    models: BackendModels,
    still_px: u32,
    grid: GridSpec,
}

impl DryrunBackend {
    pub fn new(models: BackendModels) -> Self {
        Self {
            models,
            still_px: 512,
            grid: STANDARD_GRID,
        }
    }

    pub fn with_sizes(mut self, still_px: u32, sheet_px: u32) -> Self {
        self.still_px = still_px.max(1);
        self.grid = GridSpec {
            dimension: self.grid.dimension,
            sheet_px,
        };
        self
    }

    pub fn models(&self) -> &BackendModels {
        &self.models
    }

    fn sprite_sheet(&self, base: (u8, u8, u8)) -> Result<ImageRef> {
        let tile = self.grid.tile_px();
        let mut sheet = RgbaImage::new(self.grid.sheet_px, self.grid.sheet_px);
        for frame in 0..self.grid.frame_count() {
            let rect = self.grid.pixel_rect(frame, tile);
            let shade = (frame * 8) as u8;
            let pixel = Rgba([
                base.0.wrapping_add(shade),
                base.1,
                base.2.wrapping_sub(shade),
                255,
            ]);
            for y in rect.y..rect.y + rect.height {
                for x in rect.x..rect.x + rect.width {
                    sheet.put_pixel(x, y, pixel);
                }
            }
        }
        encode_png(&sheet)
    }
}

impl NamedProvider for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }
}

impl GenerativeBackend for DryrunBackend {
    fn compose_text(&self, prompt: &str) -> Result<String> {
        Ok(format!(
            "A photorealistic square head-and-shoulders portrait, soft window light, plain background (dryrun {}).",
            short_digest(prompt)
        ))
    }

    fn generate_image(
        &self,
        prompt: &str,
        options: &ImageRequestOptions,
    ) -> Result<Vec<ImageRef>> {
        let mut images = Vec::new();
        for idx in 0..options.count.max(1) {
            let color = color_from_prompt(prompt, u64::from(idx));
            images.push(solid_image(self.still_px, color)?);
        }
        Ok(images)
    }

    fn edit_image(
        &self,
        image: &ImageRef,
        instruction: &str,
        options: &EditOptions,
    ) -> Result<Vec<ReplyPart>> {
        let source = image::load_from_memory(image.bytes())
            .context("dryrun edit could not decode the input image")?;
        let color = color_from_prompt(instruction, 0);
        match options.output {
            OutputKind::ImageOnly => {
                let mut tinted = source.to_rgba8();
                for pixel in tinted.pixels_mut() {
                    pixel[0] = pixel[0] / 2 + color.0 / 2;
                    pixel[1] = pixel[1] / 2 + color.1 / 2;
                    pixel[2] = pixel[2] / 2 + color.2 / 2;
                }
                Ok(vec![ReplyPart::Image(encode_png(&tinted)?)])
            }
            OutputKind::ImageWithText => Ok(vec![
                ReplyPart::Text(format!("```\n{DRYRUN_FRAME_DURATION_MS}\n```")),
                ReplyPart::Image(self.sprite_sheet(color)?),
            ]),
        }
    }
}

fn solid_image(size: u32, (r, g, b): (u8, u8, u8)) -> Result<ImageRef> {
    let image = RgbaImage::from_pixel(size, size, Rgba([r, g, b, 255]));
    encode_png(&image)
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

fn short_digest(prompt: &str) -> String {
    let digest = Sha256::digest(prompt.as_bytes());
    hex::encode(&digest[..4])
}
