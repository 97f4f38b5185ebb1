pub mod animation;
pub mod backend;
pub mod camera;
pub mod edit;
pub mod error;
pub mod export;
pub mod generation;
pub mod player;
pub mod sprites;
pub mod studio;

#[cfg(test)]
mod testing;

pub use backend::{
    default_backend_registry, BackendModels, BackendRegistry, DryrunBackend, GeminiBackend,
    GenerativeBackend, ModelOverrides,
};
pub use camera::{CameraDevice, CameraGuard, CameraStream, StillFileCamera};
pub use error::{PortraitError, PortraitResult};
pub use export::DEFAULT_EXPORT_FILENAME;
pub use sprites::SpriteSheet;
pub use studio::{JobKind, JobOutcome, PendingJob, PortraitState, PortraitStudio, StudioMode};
