//! Instruction builders for the three backend calls.
//!
//! Every builder is a pure function of its inputs. Empty inputs are replaced
//! with explicit placeholder text so the backend always sees every section.

use crate::context::SessionContext;
use crate::grid::GridSpec;

pub const NO_RULES_PLACEHOLDER: &str = "No character rules provided.";
pub const NO_SCENES_PLACEHOLDER: &str = "No scenes have been described yet.";
pub const NO_SUMMARY_PLACEHOLDER: &str = "No continuity summary yet.";
pub const NO_ANIMATION_PLACEHOLDER: &str = "A gentle idle breathing motion.";

pub const AGE_TRANSFORMATION_RULE: &str = "If the instruction implies a significant change in age, you may alter facial structure, skin texture, wrinkle depth, and hair color and density as needed to make the new age believable. Outside that case, preserve the subject's identity, pose, framing, and lighting exactly.";

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        placeholder
    } else {
        trimmed
    }
}

fn format_scenes(scenes: &[String]) -> String {
    let rows = scenes
        .iter()
        .map(|scene| scene.trim())
        .filter(|scene| !scene.is_empty())
        .enumerate()
        .map(|(idx, scene)| format!("Scene {}: {}", idx + 1, scene))
        .collect::<Vec<String>>();
    if rows.is_empty() {
        return NO_SCENES_PLACEHOLDER.to_string();
    }
    rows.join("\n")
}

fn context_block(context: &SessionContext) -> String {
    format!(
        "CHARACTER RULES:\n{}\n\nSCENES SO FAR:\n{}\n\nCONTINUITY SUMMARY:\n{}",
        or_placeholder(&context.character_rules, NO_RULES_PLACEHOLDER),
        format_scenes(context.scenes_so_far()),
        or_placeholder(&context.continuity_summary, NO_SUMMARY_PLACEHOLDER),
    )
}

/// Meta-prompt asking the text backend to write the visual description that
/// the image backend will render.
pub fn portrait_prompt_request(context: &SessionContext) -> String {
    format!(
        "You write prompts for a photorealistic portrait generator.\n\
         Using the story context below, describe the main character as they look right now.\n\
         Return a single paragraph and nothing else: a square, head-and-shoulders, \
         photorealistic portrait with natural lighting, a plain softly blurred background, \
         and concrete details about age, face, hair, clothing and expression.\n\n{}",
        context_block(context)
    )
}

pub fn edit_instruction(instruction: &str) -> String {
    format!(
        "Edit this portrait photo according to the following instruction: \"{}\".\n{}",
        instruction.trim(),
        AGE_TRANSFORMATION_RULE
    )
}

/// Direction for the animation request: the user's motion request, the
/// story context and the rigid sprite sheet constraints.
pub fn animation_direction(
    animation_request: &str,
    context: &SessionContext,
    grid: &GridSpec,
) -> String {
    let dimension = grid.dimension;
    let frames = grid.frame_count();
    let sheet = grid.sheet_px;
    let tile = grid.tile_px();
    format!(
        "Animate the person in this portrait.\n\
         ANIMATION REQUEST:\n{request}\n\n\
         {context}\n\n\
         TECHNICAL REQUIREMENTS:\n\
         - Produce ONE square image of exactly {sheet}x{sheet} pixels.\n\
         - The image is a {dimension}x{dimension} grid of {frames} frames, each exactly {tile}x{tile} pixels.\n\
         - Frames are read left-to-right, top-to-bottom; frame 1 is the top-left tile.\n\
         - No borders, gaps, numbers or labels between tiles.\n\
         - The motion must be subtle: small, slow and seamlessly looping, so the last frame flows back into the first.\n\
         - Keep the framing, camera, lighting and background stable in every frame.\n\
         - Preserve the person's identity in every frame.\n\n\
         RESPONSE FORMAT:\n\
         1. First, a single integer: the display duration of each frame in milliseconds. No other text.\n\
         2. Then the sprite sheet image.",
        request = or_placeholder(animation_request, NO_ANIMATION_PLACEHOLDER),
        context = context_block(context),
    )
}
