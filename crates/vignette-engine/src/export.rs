use std::io::Write as _;
use std::path::{Path, PathBuf};

use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops;
use image::{Delay, Frame, RgbaImage};
use tracing::info;

use crate::error::{PortraitError, PortraitResult};
use crate::sprites::{decode, SpriteSheet};

pub const DEFAULT_EXPORT_FILENAME: &str = "portrait-animation.gif";

/// Crops the sheet into its frames, row-major, frame 0 at the top-left.
pub fn extract_frames(sheet: &SpriteSheet) -> PortraitResult<Vec<RgbaImage>> {
    let decoded = decode(sheet.image())
        .map_err(|err| PortraitError::export(format!("sprite sheet decode failed: {err}")))?;
    let grid = sheet.grid();
    let tile = sheet.tile_px();
    Ok((0..sheet.frame_count())
        .map(|frame| {
            let rect = grid.pixel_rect(frame, tile);
            imageops::crop_imm(&decoded, rect.x, rect.y, rect.width, rect.height).to_image()
        })
        .collect())
}

/// Encodes the sheet as an infinitely looping GIF with one uniform delay.
pub fn encode_gif(sheet: &SpriteSheet) -> PortraitResult<Vec<u8>> {
    let delay_ms = u32::try_from(sheet.frame_duration_ms())
        .map_err(|_| PortraitError::export("frame duration does not fit a GIF delay"))?;
    let frames = extract_frames(sheet)?;

    let mut bytes = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut bytes);
        encoder
            .set_repeat(Repeat::Infinite)
            .map_err(|err| PortraitError::export(format!("GIF header: {err}")))?;
        encoder
            .encode_frames(frames.into_iter().map(|buffer| {
                Frame::from_parts(buffer, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1))
            }))
            .map_err(|err| PortraitError::export(format!("GIF encoding failed: {err}")))?;
    }
    Ok(bytes)
}

/// Writes the GIF into `dir` under the fixed export filename.
pub fn export_to_dir(sheet: &SpriteSheet, dir: &Path) -> PortraitResult<PathBuf> {
    let path = dir.join(DEFAULT_EXPORT_FILENAME);
    export_to_path(sheet, &path)?;
    Ok(path)
}

/// Encodes first, then writes through a temp file in the destination
/// directory and renames it into place.
pub fn export_to_path(sheet: &SpriteSheet, path: &Path) -> PortraitResult<()> {
    let bytes = encode_gif(sheet)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|err| PortraitError::export(format!("{}: {err}", dir.display())))?;

    let mut temp = tempfile::NamedTempFile::new_in(&dir)
        .map_err(|err| PortraitError::export(format!("temp file in {}: {err}", dir.display())))?;
    temp.write_all(&bytes)
        .and_then(|_| temp.flush())
        .map_err(|err| PortraitError::export(format!("write failed: {err}")))?;
    temp.persist(path)
        .map_err(|err| PortraitError::export(format!("{}: {}", path.display(), err.error)))?;

    info!(path = %path.display(), bytes = bytes.len(), "animation exported");
    Ok(())
}
