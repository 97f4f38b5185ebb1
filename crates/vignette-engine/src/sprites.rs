use std::io::Cursor;

use anyhow::Context as _;
use image::{ImageFormat, RgbaImage};
use tracing::warn;
use vignette_contracts::grid::GridSpec;
use vignette_contracts::images::ImageRef;

use crate::error::{PortraitError, PortraitResult};

pub const DEFAULT_FRAME_DURATION_MS: u64 = 150;
pub const MIN_FRAME_DURATION_MS: u64 = 50;
pub const MAX_FRAME_DURATION_MS: u64 = 1000;
/// GIF delays are stored in centiseconds.
pub const FRAME_DURATION_STEP_MS: u64 = 10;

/// A grid image that has been decoded and checked against a [`GridSpec`],
/// together with its negotiated frame duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpriteSheet {
    image: ImageRef,
    grid: GridSpec,
    sheet_px: u32,
    tile_px: u32,
    frame_duration_ms: u64,
}

impl SpriteSheet {
    /// Accepts any square sheet that divides into the grid. A size other
    /// than `grid.sheet_px` is logged, not rejected.
    pub fn new(image: ImageRef, grid: GridSpec, frame_duration_ms: u64) -> PortraitResult<Self> {
        let decoded = decode(&image)
            .map_err(|err| PortraitError::invalid_input(format!("sprite sheet: {err}")))?;
        let sheet = Self::from_decoded(image, &decoded, grid, frame_duration_ms)?;
        if sheet.sheet_px != grid.sheet_px {
            warn!(
                width = sheet.sheet_px,
                expected = grid.sheet_px,
                "sprite sheet size differs from the grid size"
            );
        }
        Ok(sheet)
    }

    pub(crate) fn from_decoded(
        image: ImageRef,
        decoded: &RgbaImage,
        grid: GridSpec,
        frame_duration_ms: u64,
    ) -> PortraitResult<Self> {
        let (width, height) = decoded.dimensions();
        let tile_px = grid
            .tile_size_for(width, height)
            .map_err(|err| PortraitError::invalid_input(err.to_string()))?;
        if frame_duration_ms == 0 {
            return Err(PortraitError::invalid_input("frame duration must be positive"));
        }
        Ok(Self {
            image,
            grid,
            sheet_px: width,
            tile_px,
            frame_duration_ms: round_to_step(frame_duration_ms).max(FRAME_DURATION_STEP_MS),
        })
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn sheet_px(&self) -> u32 {
        self.sheet_px
    }

    pub fn tile_px(&self) -> u32 {
        self.tile_px
    }

    pub fn frame_count(&self) -> u32 {
        self.grid.frame_count()
    }

    pub fn frame_duration_ms(&self) -> u64 {
        self.frame_duration_ms
    }

    pub fn loop_duration_ms(&self) -> u64 {
        self.frame_duration_ms * u64::from(self.frame_count())
    }
}

pub(crate) fn decode(image: &ImageRef) -> Result<RgbaImage, image::ImageError> {
    Ok(image::load_from_memory(image.bytes())?.to_rgba8())
}

pub(crate) fn encode_png(image: &RgbaImage) -> anyhow::Result<ImageRef> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .context("failed to encode PNG")?;
    Ok(ImageRef::new("image/png", bytes))
}

/// Clamps into the playable range, rounded to the nearest GIF delay step.
pub fn clamp_frame_duration(ms: u64) -> u64 {
    round_to_step(ms.clamp(MIN_FRAME_DURATION_MS, MAX_FRAME_DURATION_MS))
}

fn round_to_step(ms: u64) -> u64 {
    ms.saturating_add(FRAME_DURATION_STEP_MS / 2) / FRAME_DURATION_STEP_MS * FRAME_DURATION_STEP_MS
}

#[cfg(test)]
mod tests {
    use image::{Rgba, RgbaImage};
    use vignette_contracts::grid::STANDARD_GRID;
    use vignette_contracts::images::ImageRef;

    use super::{clamp_frame_duration, encode_png, SpriteSheet};
    use crate::error::PortraitError;

    fn png(width: u32, height: u32) -> ImageRef {
        encode_png(&RgbaImage::from_pixel(width, height, Rgba([10, 20, 30, 255])))
            .unwrap_or_else(|_| ImageRef::new("image/png", Vec::new()))
    }

    #[test]
    fn accepts_square_sheet_divisible_by_grid() -> anyhow::Result<()> {
        let sheet = SpriteSheet::new(png(64, 64), STANDARD_GRID, 120)?;
        assert_eq!(sheet.tile_px(), 16);
        assert_eq!(sheet.frame_count(), 16);
        assert_eq!(sheet.loop_duration_ms(), 16 * 120);
        Ok(())
    }

    #[test]
    fn rejects_wrong_shapes_and_garbage() {
        assert!(matches!(
            SpriteSheet::new(png(64, 32), STANDARD_GRID, 120),
            Err(PortraitError::InvalidInput(_))
        ));
        assert!(matches!(
            SpriteSheet::new(png(62, 62), STANDARD_GRID, 120),
            Err(PortraitError::InvalidInput(_))
        ));
        assert!(matches!(
            SpriteSheet::new(ImageRef::new("image/png", vec![1, 2, 3]), STANDARD_GRID, 120),
            Err(PortraitError::InvalidInput(_))
        ));
        assert!(matches!(
            SpriteSheet::new(png(64, 64), STANDARD_GRID, 0),
            Err(PortraitError::InvalidInput(_))
        ));
    }

    #[test]
    fn durations_are_clamped_into_playable_range() {
        assert_eq!(clamp_frame_duration(5), 50);
        assert_eq!(clamp_frame_duration(120), 120);
        assert_eq!(clamp_frame_duration(60_000), 1000);
    }

    #[test]
    fn durations_snap_to_gif_delay_steps() -> anyhow::Result<()> {
        assert_eq!(clamp_frame_duration(125), 130);
        assert_eq!(clamp_frame_duration(95), 100);
        assert_eq!(clamp_frame_duration(124), 120);
        assert_eq!(clamp_frame_duration(996), 1000);

        let sheet = SpriteSheet::new(png(64, 64), STANDARD_GRID, 125)?;
        assert_eq!(sheet.frame_duration_ms(), 130);
        let sheet = SpriteSheet::new(png(64, 64), STANDARD_GRID, 3)?;
        assert_eq!(sheet.frame_duration_ms(), 10);
        Ok(())
    }
}
