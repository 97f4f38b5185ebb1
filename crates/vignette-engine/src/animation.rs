use serde_json::Value;
use tracing::{debug, warn};
use vignette_contracts::context::SessionContext;
use vignette_contracts::grid::GridSpec;
use vignette_contracts::images::ImageRef;
use vignette_contracts::prompts::animation_direction;

use crate::backend::{EditOptions, GenerativeBackend, OutputKind, ReplyPart};
use crate::error::{PortraitError, PortraitResult};
use crate::sprites::{
    clamp_frame_duration, decode, SpriteSheet, DEFAULT_FRAME_DURATION_MS,
};

const DURATION_KEYS: &[&str] = &[
    "frame_duration_ms",
    "frameDurationMs",
    "duration_ms",
    "durationMs",
    "frame_duration",
    "duration",
    "ms",
];

/// Parsed two-part animation reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnimationResponse {
    pub frame_duration_ms: u64,
    /// False when the reply carried no usable duration and the default was
    /// used.
    pub duration_from_reply: bool,
    pub grid_image: ImageRef,
}

pub fn run_animation(
    backend: &dyn GenerativeBackend,
    image: &ImageRef,
    instruction: &str,
    context: &SessionContext,
    grid: &GridSpec,
) -> PortraitResult<SpriteSheet> {
    let instruction = instruction.trim();
    if instruction.is_empty() {
        return Err(PortraitError::invalid_input("animation instruction is empty"));
    }
    if image.is_empty() {
        return Err(PortraitError::invalid_input("current image is empty"));
    }
    let direction = animation_direction(instruction, context, grid);
    let parts = backend
        .edit_image(
            image,
            &direction,
            &EditOptions {
                output: OutputKind::ImageWithText,
            },
        )
        .map_err(PortraitError::Backend)?;
    debug!(backend = backend.name(), parts = parts.len(), "animation reply received");

    let response = parse_animation_reply(&parts)?;
    let decoded = decode(&response.grid_image)
        .map_err(|err| PortraitError::animation(format!("grid image decode failed: {err}")))?;
    let (width, height) = decoded.dimensions();
    if (width, height) != (grid.sheet_px, grid.sheet_px) {
        return Err(PortraitError::animation(format!(
            "sprite sheet is {width}x{height}, expected {0}x{0}",
            grid.sheet_px
        )));
    }
    SpriteSheet::from_decoded(
        response.grid_image,
        &decoded,
        *grid,
        response.frame_duration_ms,
    )
    .map_err(|err| match err {
        PortraitError::InvalidInput(msg) => PortraitError::animation(msg),
        other => other,
    })
}

/// Scans reply parts in order. Text parts may carry the duration; the last
/// image part is the grid.
pub fn parse_animation_reply(parts: &[ReplyPart]) -> PortraitResult<AnimationResponse> {
    let mut duration: Option<u64> = None;
    let mut grid_image: Option<&ImageRef> = None;
    for part in parts {
        match part {
            ReplyPart::Text(text) => match parse_duration(text) {
                Some(ms) => duration = Some(ms),
                None => warn!(text = %preview(text), "ignoring unparseable duration text"),
            },
            ReplyPart::Image(image) if !image.is_empty() => grid_image = Some(image),
            ReplyPart::Image(_) => warn!("ignoring empty image part"),
        }
    }

    let Some(grid_image) = grid_image else {
        return Err(PortraitError::animation("reply contained no sprite sheet image"));
    };
    let (frame_duration_ms, duration_from_reply) = match duration {
        Some(ms) => {
            let clamped = clamp_frame_duration(ms);
            if clamped != ms {
                warn!(requested = ms, clamped, "frame duration adjusted to a playable value");
            }
            (clamped, true)
        }
        None => {
            debug!(
                default_ms = DEFAULT_FRAME_DURATION_MS,
                "no duration in reply, using default"
            );
            (DEFAULT_FRAME_DURATION_MS, false)
        }
    };
    Ok(AnimationResponse {
        frame_duration_ms,
        duration_from_reply,
        grid_image: grid_image.clone(),
    })
}

/// Reads a positive millisecond value from loosely formatted text: a bare
/// number, `120ms`, `duration: 120`, or a JSON object with a duration key.
/// Fences and backticks are ignored.
pub fn parse_duration(text: &str) -> Option<u64> {
    let cleaned = strip_fences(text);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    if cleaned.starts_with('{') {
        let value: Value = serde_json::from_str(cleaned).ok()?;
        return duration_from_json(&value);
    }
    if let Some(ms) = parse_number_with_unit(cleaned) {
        return Some(ms);
    }
    let (key, value) = cleaned.split_once(':').or_else(|| cleaned.split_once('='))?;
    let key = key.trim().trim_matches('"').to_ascii_lowercase();
    if !key.contains("duration") && key != "ms" {
        return None;
    }
    parse_number_with_unit(value.trim().trim_matches('"'))
}

fn strip_fences(text: &str) -> String {
    let mut lines: Vec<&str> = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            continue;
        }
        lines.push(trimmed);
    }
    lines.join("\n").replace('`', "")
}

fn parse_number_with_unit(raw: &str) -> Option<u64> {
    let lowered = raw.trim().trim_end_matches('.').to_ascii_lowercase();
    let number = ["milliseconds", "millisecond", "msec", "ms"]
        .iter()
        .find_map(|unit| lowered.strip_suffix(unit))
        .unwrap_or(&lowered)
        .trim();
    positive_ms(number.parse::<f64>().ok()?)
}

fn duration_from_json(value: &Value) -> Option<u64> {
    let object = value.as_object()?;
    DURATION_KEYS.iter().find_map(|key| match object.get(*key)? {
        Value::Number(number) => positive_ms(number.as_f64()?),
        Value::String(text) => parse_number_with_unit(text),
        _ => None,
    })
}

fn positive_ms(value: f64) -> Option<u64> {
    if !value.is_finite() || value < 1.0 {
        return None;
    }
    Some(value.round() as u64)
}

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= 80 {
        return flat;
    }
    let cut: String = flat.chars().take(80).collect();
    format!("{cut}…")
}
