//! Owner of the portrait state machine.
//!
//! Backend work is split in three steps so a UI can keep its own thread
//! responsive: `begin_*` hands out a [`PendingJob`], the job runs anywhere,
//! and [`PortraitStudio::complete`] applies the outcome if it is still
//! current. The `generate`/`edit`/`animate` helpers run all three inline.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;
use vignette_contracts::context::SessionContext;
use vignette_contracts::events::{CostKind, EventPayload, EventWriter};
use vignette_contracts::grid::{GridSpec, NormalizedRect, STANDARD_GRID};
use vignette_contracts::history::HistoryStack;
use vignette_contracts::images::ImageRef;

use crate::animation::run_animation;
use crate::backend::GenerativeBackend;
use crate::camera::{CameraDevice, CameraGuard};
use crate::edit::{decompose, run_edit};
use crate::error::{PortraitError, PortraitResult};
use crate::export::export_to_dir;
use crate::generation::run_generation;
use crate::player::PlaybackTask;
use crate::sprites::SpriteSheet;

/// The portrait as the user sees it. A sprite sheet always carries its frame
/// duration, so the two appear and disappear together.
#[derive(Debug, Clone, Default)]
pub struct PortraitState {
    current_image: Option<ImageRef>,
    sprite_sheet: Option<SpriteSheet>,
    history: HistoryStack,
}

impl PortraitState {
    pub fn current_image(&self) -> Option<&ImageRef> {
        self.current_image.as_ref()
    }

    pub fn sprite_sheet(&self) -> Option<&SpriteSheet> {
        self.sprite_sheet.as_ref()
    }

    pub fn frame_duration_ms(&self) -> Option<u64> {
        self.sprite_sheet.as_ref().map(SpriteSheet::frame_duration_ms)
    }

    pub fn history(&self) -> &HistoryStack {
        &self.history
    }
}

/// What the studio is doing right now.
///
/// `Idle`, `Capturing` and `Playing` are resting modes: `Capturing` while a
/// camera is open, `Playing` while a sprite sheet is animating. The working
/// modes last until the matching job completes or is dismissed, then fall
/// back to the resting mode. A failure parks the studio in `Error` until the
/// next successful operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StudioMode {
    Idle,
    Capturing,
    Generating,
    Editing,
    Animating,
    Playing,
    Exporting,
    Error(String),
}

impl StudioMode {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Capturing => "capturing",
            Self::Generating => "generating",
            Self::Editing => "editing",
            Self::Animating => "animating",
            Self::Playing => "playing",
            Self::Exporting => "exporting",
            Self::Error(_) => "error",
        }
    }
}

impl fmt::Display for StudioMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(message) => write!(f, "error: {message}"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Generate,
    Edit,
    Animate,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Edit => "edit",
            Self::Animate => "animate",
        }
    }

    fn cost(&self) -> CostKind {
        match self {
            Self::Generate => CostKind::Generation,
            Self::Edit => CostKind::Edit,
            Self::Animate => CostKind::Animation,
        }
    }

    fn working_mode(&self) -> StudioMode {
        match self {
            Self::Generate => StudioMode::Generating,
            Self::Edit => StudioMode::Editing,
            Self::Animate => StudioMode::Animating,
        }
    }
}

/// Identifies one outstanding job and the state version it was cut from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobTicket {
    id: u64,
    version: u64,
}

#[derive(Debug, Clone)]
enum JobRequest {
    Generate,
    Edit {
        image: ImageRef,
        instruction: String,
    },
    Animate {
        image: ImageRef,
        instruction: String,
        grid: GridSpec,
    },
}

/// A backend job detached from the studio. Owns copies of everything it
/// needs, so it can be moved to a worker thread.
#[derive(Debug, Clone)]
pub struct PendingJob {
    ticket: JobTicket,
    job_id: String,
    request: JobRequest,
}

impl PendingJob {
    pub fn ticket(&self) -> JobTicket {
        self.ticket
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn kind(&self) -> JobKind {
        match self.request {
            JobRequest::Generate => JobKind::Generate,
            JobRequest::Edit { .. } => JobKind::Edit,
            JobRequest::Animate { .. } => JobKind::Animate,
        }
    }

    pub fn run(self, backend: &dyn GenerativeBackend, context: &SessionContext) -> JobOutcome {
        let kind = self.kind();
        let result = match &self.request {
            JobRequest::Generate => run_generation(backend, context).map(JobOutput::Portrait),
            JobRequest::Edit { image, instruction } => {
                run_edit(backend, image, instruction).map(JobOutput::Portrait)
            }
            JobRequest::Animate {
                image,
                instruction,
                grid,
            } => run_animation(backend, image, instruction, context, grid)
                .map(JobOutput::Animation),
        };
        JobOutcome {
            ticket: self.ticket,
            job_id: self.job_id,
            kind,
            result,
        }
    }
}

#[derive(Debug)]
enum JobOutput {
    Portrait(ImageRef),
    Animation(SpriteSheet),
}

/// Result of [`PendingJob::run`], to be handed back to
/// [`PortraitStudio::complete`].
#[derive(Debug)]
pub struct JobOutcome {
    ticket: JobTicket,
    job_id: String,
    kind: JobKind,
    result: PortraitResult<JobOutput>,
}

impl JobOutcome {
    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub fn ticket(&self) -> JobTicket {
        self.ticket
    }
}

pub struct PortraitStudio {
    state: PortraitState,
    mode: StudioMode,
    grid: GridSpec,
    version: u64,
    next_job: u64,
    in_flight: Option<JobTicket>,
    events: Option<EventWriter>,
    playback: Option<PlaybackTask>,
    camera: Option<CameraGuard>,
}

impl Default for PortraitStudio {
    fn default() -> Self {
        Self::new(STANDARD_GRID)
    }
}

impl PortraitStudio {
    pub fn new(grid: GridSpec) -> Self {
        Self {
            state: PortraitState::default(),
            mode: StudioMode::Idle,
            grid,
            version: 0,
            next_job: 0,
            in_flight: None,
            events: None,
            playback: None,
            camera: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self.emit(
            "session_started",
            map_object(json!({
                "grid_dimension": self.grid.dimension,
                "frame_count": self.grid.frame_count(),
                "sheet_px": self.grid.sheet_px,
            })),
        );
        self
    }

    pub fn state(&self) -> &PortraitState {
        &self.state
    }

    pub fn mode(&self) -> &StudioMode {
        &self.mode
    }

    pub fn grid(&self) -> &GridSpec {
        &self.grid
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn camera_open(&self) -> bool {
        self.camera.as_ref().is_some_and(CameraGuard::is_open)
    }

    pub fn current_frame(&self) -> Option<u32> {
        self.playback.as_ref().map(PlaybackTask::current_frame)
    }

    pub fn current_tile(&self) -> Option<NormalizedRect> {
        self.playback.as_ref().map(PlaybackTask::tile_rect)
    }

    pub fn begin_generate(&mut self) -> PortraitResult<PendingJob> {
        self.ensure_not_busy()?;
        Ok(self.issue(JobRequest::Generate))
    }

    /// `Ok(None)` when there is nothing to edit or the instruction is blank.
    pub fn begin_edit(&mut self, instruction: &str) -> PortraitResult<Option<PendingJob>> {
        self.ensure_not_busy()?;
        let instruction = instruction.trim();
        let Some(image) = self.state.current_image.clone() else {
            return Ok(None);
        };
        if instruction.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.issue(JobRequest::Edit {
            image,
            instruction: instruction.to_string(),
        })))
    }

    /// `Ok(None)` when there is no still to animate or the instruction is
    /// blank.
    pub fn begin_animate(&mut self, instruction: &str) -> PortraitResult<Option<PendingJob>> {
        self.ensure_not_busy()?;
        let instruction = instruction.trim();
        let Some(image) = self.state.current_image.clone() else {
            return Ok(None);
        };
        if instruction.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.issue(JobRequest::Animate {
            image,
            instruction: instruction.to_string(),
            grid: self.grid,
        })))
    }

    /// Applies a finished job. Outcomes for a dismissed or superseded job are
    /// rejected with `Stale` and change nothing.
    pub fn complete(&mut self, outcome: JobOutcome) -> PortraitResult<()> {
        if self.in_flight != Some(outcome.ticket) {
            warn!(
                job_id = %outcome.job_id,
                kind = outcome.kind.as_str(),
                "discarding result of a dismissed job"
            );
            return Err(PortraitError::Stale);
        }
        self.in_flight = None;
        if outcome.ticket.version != self.version {
            self.mode = self.resting_mode();
            return Err(PortraitError::Stale);
        }

        let output = match outcome.result {
            Ok(output) => output,
            Err(err) => {
                self.fail(outcome.kind.as_str(), &err);
                return Err(err);
            }
        };
        match output {
            JobOutput::Portrait(image) => {
                self.replace_portrait(image);
                self.emit_cost(outcome.kind.cost());
                self.emit_portrait_updated(outcome.kind.as_str(), Some(&outcome.job_id));
            }
            JobOutput::Animation(sheet) => {
                let task = match PlaybackTask::start(&sheet) {
                    Ok(task) => task,
                    Err(err) => {
                        self.fail(outcome.kind.as_str(), &err);
                        return Err(err);
                    }
                };
                self.stop_playback();
                self.playback = Some(task);
                self.emit_cost(CostKind::Animation);
                self.emit(
                    "animation_ready",
                    map_object(json!({
                        "job_id": outcome.job_id,
                        "frame_duration_ms": sheet.frame_duration_ms(),
                        "frame_count": sheet.frame_count(),
                        "tile_px": sheet.tile_px(),
                        "image_sha256": image_digest(sheet.image()),
                    })),
                );
                info!(
                    frame_duration_ms = sheet.frame_duration_ms(),
                    tile_px = sheet.tile_px(),
                    "animation ready"
                );
                self.state.sprite_sheet = Some(sheet);
                self.version += 1;
            }
        }
        self.mode = self.resting_mode();
        Ok(())
    }

    /// Stops waiting for the outstanding job. Its outcome will be `Stale`.
    pub fn dismiss_pending(&mut self) -> bool {
        let Some(ticket) = self.in_flight.take() else {
            return false;
        };
        self.version += 1;
        self.mode = self.resting_mode();
        info!(job = ticket.id, "pending job dismissed");
        true
    }

    pub fn generate(
        &mut self,
        backend: &dyn GenerativeBackend,
        context: &SessionContext,
    ) -> PortraitResult<()> {
        let job = self.begin_generate()?;
        let outcome = job.run(backend, context);
        self.complete(outcome)
    }

    /// Returns `false` when the edit was a no-op.
    pub fn edit(
        &mut self,
        backend: &dyn GenerativeBackend,
        instruction: &str,
    ) -> PortraitResult<bool> {
        let Some(job) = self.begin_edit(instruction)? else {
            return Ok(false);
        };
        let outcome = job.run(backend, &SessionContext::default());
        self.complete(outcome).map(|_| true)
    }

    /// Returns `false` when the animation request was a no-op.
    pub fn animate(
        &mut self,
        backend: &dyn GenerativeBackend,
        instruction: &str,
        context: &SessionContext,
    ) -> PortraitResult<bool> {
        let Some(job) = self.begin_animate(instruction)? else {
            return Ok(false);
        };
        let outcome = job.run(backend, context);
        self.complete(outcome).map(|_| true)
    }

    /// Restores the previous still. Returns `false` when there is nothing to
    /// undo.
    pub fn undo(&mut self) -> PortraitResult<bool> {
        self.ensure_not_busy()?;
        let Ok(previous) = self.state.history.pop() else {
            return Ok(false);
        };
        self.stop_playback();
        self.state.sprite_sheet = None;
        self.emit(
            "history_undo",
            map_object(json!({
                "image_sha256": image_digest(&previous),
                "history_len": self.state.history.len(),
            })),
        );
        self.state.current_image = Some(previous);
        self.version += 1;
        self.mode = self.resting_mode();
        Ok(true)
    }

    /// Replaces the portrait with a still given as a data URI, as if it had
    /// just been captured.
    pub fn load_still(&mut self, reference: &str) -> PortraitResult<()> {
        self.ensure_not_busy()?;
        let (mime_type, bytes) = match decompose(reference) {
            Ok(parts) => parts,
            Err(err) => {
                self.fail("load", &err);
                return Err(err);
            }
        };
        self.replace_with_fresh_still(ImageRef::new(mime_type, bytes), "load");
        Ok(())
    }

    pub fn open_camera(&mut self, device: &mut dyn CameraDevice) -> PortraitResult<()> {
        self.ensure_not_busy()?;
        if let Some(mut previous) = self.camera.take() {
            previous.release();
        }
        match CameraGuard::acquire(device) {
            Ok(guard) => {
                self.camera = Some(guard);
                self.mode = StudioMode::Capturing;
                Ok(())
            }
            Err(err) => {
                self.fail("open_camera", &err);
                Err(err)
            }
        }
    }

    /// Takes one still and releases the camera whether or not it worked.
    /// A captured still starts a fresh history.
    pub fn capture(&mut self) -> PortraitResult<()> {
        self.ensure_not_busy()?;
        let Some(mut guard) = self.camera.take() else {
            let err = PortraitError::camera("camera is not open");
            self.fail("capture", &err);
            return Err(err);
        };
        let captured = guard.capture_still();
        guard.release();
        match captured {
            Ok(image) => {
                self.replace_with_fresh_still(image, "capture");
                Ok(())
            }
            Err(err) => {
                self.fail("capture", &err);
                Err(err)
            }
        }
    }

    pub fn close_camera(&mut self) -> bool {
        let Some(mut guard) = self.camera.take() else {
            return false;
        };
        guard.release();
        if self.in_flight.is_none() {
            self.mode = self.resting_mode();
        }
        true
    }

    /// Writes the current animation as a GIF into `dir`.
    pub fn export(&mut self, dir: &Path) -> PortraitResult<PathBuf> {
        self.ensure_not_busy()?;
        let Some(sheet) = self.state.sprite_sheet.clone() else {
            let err = PortraitError::export("there is no animation to export");
            self.fail("export", &err);
            return Err(err);
        };
        self.mode = StudioMode::Exporting;
        match export_to_dir(&sheet, dir) {
            Ok(path) => {
                self.emit(
                    "export_written",
                    map_object(json!({
                        "path": path.to_string_lossy(),
                        "frame_count": sheet.frame_count(),
                        "frame_duration_ms": sheet.frame_duration_ms(),
                    })),
                );
                self.mode = self.resting_mode();
                Ok(path)
            }
            Err(err) => {
                self.fail("export", &err);
                Err(err)
            }
        }
    }

    fn ensure_not_busy(&self) -> PortraitResult<()> {
        if self.in_flight.is_some() {
            return Err(PortraitError::Busy);
        }
        Ok(())
    }

    fn issue(&mut self, request: JobRequest) -> PendingJob {
        self.next_job += 1;
        let ticket = JobTicket {
            id: self.next_job,
            version: self.version,
        };
        self.in_flight = Some(ticket);
        let job = PendingJob {
            ticket,
            job_id: Uuid::new_v4().to_string(),
            request,
        };
        self.mode = job.kind().working_mode();
        job
    }

    fn resting_mode(&self) -> StudioMode {
        if self.camera_open() {
            StudioMode::Capturing
        } else if self.playback.is_some() {
            StudioMode::Playing
        } else {
            StudioMode::Idle
        }
    }

    fn replace_portrait(&mut self, image: ImageRef) {
        self.stop_playback();
        self.state.sprite_sheet = None;
        if let Some(previous) = self.state.current_image.take() {
            self.state.history.push(previous);
        }
        self.state.current_image = Some(image);
        self.version += 1;
    }

    fn replace_with_fresh_still(&mut self, image: ImageRef, source: &str) {
        self.stop_playback();
        self.state.sprite_sheet = None;
        self.state.history.clear();
        self.state.current_image = Some(image);
        self.version += 1;
        self.emit_portrait_updated(source, None);
        self.mode = self.resting_mode();
    }

    fn stop_playback(&mut self) {
        if let Some(mut task) = self.playback.take() {
            task.stop();
        }
    }

    fn fail(&mut self, operation: &str, err: &PortraitError) {
        warn!(operation, error = %err, "portrait operation failed");
        self.emit(
            "operation_failed",
            map_object(json!({
                "operation": operation,
                "error": err.to_string(),
                "retryable": err.is_retryable(),
            })),
        );
        self.mode = StudioMode::Error(err.to_string());
    }

    fn emit_portrait_updated(&self, source: &str, job_id: Option<&str>) {
        let Some(image) = self.state.current_image.as_ref() else {
            return;
        };
        info!(source, history_len = self.state.history.len(), "portrait updated");
        self.emit(
            "portrait_updated",
            map_object(json!({
                "source": source,
                "job_id": job_id,
                "mime_type": image.mime_type(),
                "bytes": image.len(),
                "image_sha256": image_digest(image),
                "history_len": self.state.history.len(),
            })),
        );
    }

    fn emit_cost(&self, kind: CostKind) {
        if let Some(events) = self.events.as_ref() {
            if let Err(err) = events.emit_cost(kind) {
                warn!(kind = kind.as_str(), "failed to record cost event: {err:#}");
            }
        }
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        if let Some(events) = self.events.as_ref() {
            if let Err(err) = events.emit(event_type, payload) {
                warn!(event_type, "failed to write event: {err:#}");
            }
        }
    }
}

impl Drop for PortraitStudio {
    fn drop(&mut self) {
        self.stop_playback();
        if let Some(mut guard) = self.camera.take() {
            guard.release();
        }
    }
}

fn image_digest(image: &ImageRef) -> String {
    hex::encode(Sha256::digest(image.bytes()))
}

fn map_object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::thread;

    use serde_json::Value;
    use vignette_contracts::context::SessionContext;
    use vignette_contracts::events::EventWriter;
    use vignette_contracts::grid::GridSpec;
    use vignette_contracts::images::ImageRef;

    use super::{PendingJob, PortraitStudio, StudioMode};
    use crate::backend::{BackendModels, DryrunBackend, ReplyPart};
    use crate::camera::tests::CountingCamera;
    use crate::error::PortraitError;
    use crate::export::extract_frames;
    use crate::sprites::DEFAULT_FRAME_DURATION_MS;
    use crate::testing::{png, sheet_png, ScriptedBackend};

    fn dryrun() -> DryrunBackend {
        DryrunBackend::new(BackendModels {
            text: "dryrun-text-1".to_string(),
            image: "dryrun-image-1".to_string(),
            edit: "dryrun-image-1".to_string(),
        })
        .with_sizes(32, 128)
    }

    fn small_grid() -> GridSpec {
        GridSpec {
            dimension: 4,
            sheet_px: 128,
        }
    }

    /// Matches `sheet_png(64)` replies from scripted backends.
    fn scripted_grid() -> GridSpec {
        GridSpec {
            dimension: 4,
            sheet_px: 64,
        }
    }

    fn story() -> SessionContext {
        SessionContext {
            character_rules: "Mara, a ferry captain.".to_string(),
            scene_descriptions: vec!["A storm over the harbor.".to_string()],
            current_scene_index: 0,
            continuity_summary: "Mara kept the ferry afloat.".to_string(),
        }
    }

    fn read_events(path: &std::path::Path) -> anyhow::Result<Vec<Value>> {
        let raw = std::fs::read_to_string(path)?;
        raw.lines()
            .map(|line| serde_json::from_str::<Value>(line).map_err(anyhow::Error::from))
            .collect()
    }

    #[test]
    fn end_to_end_generate_edit_animate_export() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events_path = temp.path().join("events.jsonl");
        let backend = dryrun();
        let mut studio = PortraitStudio::new(small_grid())
            .with_events(EventWriter::new(&events_path, "run-test"));

        studio.generate(&backend, &story())?;
        let first = studio.state().current_image().cloned();
        assert!(first.is_some());
        assert!(studio.state().history().is_empty());

        assert!(studio.edit(&backend, "make them look older")?);
        assert_eq!(studio.state().history().len(), 1);
        assert_eq!(studio.state().history().peek(), first.as_ref());
        let edited = studio.state().current_image().cloned();
        assert_ne!(edited, first);

        assert!(studio.animate(&backend, "slow blink", &story())?);
        assert_eq!(studio.state().current_image().cloned(), edited);
        assert_eq!(studio.state().history().len(), 1);
        assert_eq!(*studio.mode(), StudioMode::Playing);
        assert!(studio.current_frame().is_some());

        let Some(sheet) = studio.state().sprite_sheet().cloned() else {
            panic!("animation should leave a sprite sheet");
        };
        let frames = extract_frames(&sheet)?;
        assert_eq!(frames.len(), 16);
        assert!(frames.iter().all(|frame| frame.dimensions() == (32, 32)));

        let path = studio.export(temp.path())?;
        assert!(path.ends_with("portrait-animation.gif"));
        let gif = image::codecs::gif::GifDecoder::new(std::io::Cursor::new(std::fs::read(&path)?))?;
        let decoded = image::AnimationDecoder::into_frames(gif).collect_frames()?;
        assert_eq!(decoded.len(), 16);
        let total_ms: u32 = decoded
            .iter()
            .map(|frame| {
                let (numer, denom) = frame.delay().numer_denom_ms();
                numer / denom
            })
            .sum();
        assert_eq!(u64::from(total_ms), 16 * sheet.frame_duration_ms());

        let events = read_events(&events_path)?;
        let types: Vec<&str> = events
            .iter()
            .filter_map(|event| event.get("type").and_then(Value::as_str))
            .collect();
        assert_eq!(types.first(), Some(&"session_started"));
        assert!(types.contains(&"animation_ready"));
        assert!(types.contains(&"export_written"));
        let costs: Vec<(String, u64)> = events
            .iter()
            .filter(|event| event.get("type").and_then(Value::as_str) == Some("cost_event"))
            .map(|event| {
                (
                    event["kind"].as_str().unwrap_or_default().to_string(),
                    event["tokens"].as_u64().unwrap_or_default(),
                )
            })
            .collect();
        assert_eq!(
            costs,
            vec![
                ("generation".to_string(), 1290),
                ("edit".to_string(), 1548),
                ("animation".to_string(), 1548),
            ]
        );
        Ok(())
    }

    #[test]
    fn blank_edit_is_a_no_op_without_backend_call() -> anyhow::Result<()> {
        let backend = ScriptedBackend::default();
        let mut studio = PortraitStudio::default();
        assert!(!studio.edit(&backend, "make them older")?);
        assert!(backend.calls().is_empty());

        studio.generate(&backend, &SessionContext::default())?;
        let before = studio.state().current_image().cloned();
        let calls_before = backend.calls().len();

        assert!(!studio.edit(&backend, "   ")?);
        assert!(!studio.animate(&backend, "", &SessionContext::default())?);
        assert_eq!(backend.calls().len(), calls_before);
        assert_eq!(studio.state().current_image().cloned(), before);
        assert!(studio.state().history().is_empty());
        assert!(!studio.is_busy());
        Ok(())
    }

    #[test]
    fn undo_restores_previous_still_and_stops_animation() -> anyhow::Result<()> {
        let a = png(8, [1, 1, 1]);
        let b = png(8, [2, 2, 2]);
        let mut studio = PortraitStudio::new(scripted_grid());
        assert!(!studio.undo()?);

        studio.generate(
            &ScriptedBackend::default().with_edit_reply(vec![ReplyPart::Image(b.clone())]),
            &SessionContext::default(),
        )?;
        let generated = studio.state().current_image().cloned();
        studio.load_still(&a.to_data_uri())?;
        assert!(studio.state().history().is_empty());
        assert_ne!(studio.state().current_image().cloned(), generated);

        let backend = ScriptedBackend::default().with_edit_reply(vec![ReplyPart::Image(b.clone())]);
        assert!(studio.edit(&backend, "add a scarf")?);
        assert_eq!(studio.state().current_image(), Some(&b));

        let animator = ScriptedBackend::default().with_edit_reply(vec![
            ReplyPart::Text("120".to_string()),
            ReplyPart::Image(sheet_png(64)),
        ]);
        assert!(studio.animate(&animator, "slow blink", &SessionContext::default())?);
        assert_eq!(studio.state().frame_duration_ms(), Some(120));

        assert!(studio.undo()?);
        assert_eq!(studio.state().current_image(), Some(&a));
        assert!(studio.state().history().is_empty());
        assert!(studio.state().sprite_sheet().is_none());
        assert!(studio.state().frame_duration_ms().is_none());
        assert!(studio.current_frame().is_none());
        assert_eq!(*studio.mode(), StudioMode::Idle);

        assert!(!studio.undo()?);
        assert_eq!(studio.state().current_image(), Some(&a));
        Ok(())
    }

    #[test]
    fn malformed_reference_leaves_state_unchanged() -> anyhow::Result<()> {
        let mut studio = PortraitStudio::default();
        studio.generate(&ScriptedBackend::default(), &SessionContext::default())?;
        let before = studio.state().current_image().cloned();

        let result = studio.load_still("not-a-data-uri");
        assert!(matches!(result, Err(PortraitError::InvalidInput(_))));
        assert_eq!(studio.state().current_image().cloned(), before);
        assert!(matches!(studio.mode(), StudioMode::Error(_)));
        Ok(())
    }

    #[test]
    fn animation_without_duration_uses_default() -> anyhow::Result<()> {
        let mut studio = PortraitStudio::new(scripted_grid());
        studio.load_still(&png(8, [5, 5, 5]).to_data_uri())?;
        let backend = ScriptedBackend::default().with_edit_reply(vec![
            ReplyPart::Text("Here is a lovely loop.".to_string()),
            ReplyPart::Image(sheet_png(64)),
        ]);
        assert!(studio.animate(&backend, "gentle breathing", &SessionContext::default())?);
        assert_eq!(
            studio.state().frame_duration_ms(),
            Some(DEFAULT_FRAME_DURATION_MS)
        );
        Ok(())
    }

    #[test]
    fn failures_keep_state_and_record_error_mode() -> anyhow::Result<()> {
        let mut studio = PortraitStudio::default();
        studio.generate(&ScriptedBackend::default(), &SessionContext::default())?;
        let before = studio.state().current_image().cloned();

        let text_only = ScriptedBackend::default()
            .with_edit_reply(vec![ReplyPart::Text("no".to_string())]);
        assert!(matches!(
            studio.edit(&text_only, "add a hat"),
            Err(PortraitError::EditFailed(_))
        ));
        assert!(matches!(
            studio.animate(&text_only, "wave", &SessionContext::default()),
            Err(PortraitError::AnimationFailed(_))
        ));
        assert!(matches!(
            studio.generate(&ScriptedBackend::default().failing("offline"), &SessionContext::default()),
            Err(PortraitError::Backend(_))
        ));
        assert_eq!(studio.state().current_image().cloned(), before);
        assert!(studio.state().history().is_empty());
        assert!(studio.state().sprite_sheet().is_none());
        assert!(matches!(studio.mode(), StudioMode::Error(_)));
        assert!(!studio.is_busy());

        let temp = tempfile::tempdir()?;
        assert!(matches!(
            studio.export(temp.path()),
            Err(PortraitError::ExportFailed(_))
        ));
        Ok(())
    }

    #[test]
    fn second_job_is_rejected_while_one_is_outstanding() -> anyhow::Result<()> {
        let backend = ScriptedBackend::default();
        let mut studio = PortraitStudio::default();
        let job = studio.begin_generate()?;
        assert_eq!(*studio.mode(), StudioMode::Generating);

        assert!(matches!(studio.begin_generate(), Err(PortraitError::Busy)));
        assert!(matches!(studio.begin_edit("hat"), Err(PortraitError::Busy)));
        assert!(matches!(studio.begin_animate("blink"), Err(PortraitError::Busy)));
        assert!(matches!(studio.undo(), Err(PortraitError::Busy)));
        assert!(matches!(studio.capture(), Err(PortraitError::Busy)));
        assert!(matches!(
            studio.load_still(&png(4, [0, 0, 0]).to_data_uri()),
            Err(PortraitError::Busy)
        ));

        let outcome = job.run(&backend, &SessionContext::default());
        studio.complete(outcome)?;
        assert!(studio.state().current_image().is_some());
        assert_eq!(*studio.mode(), StudioMode::Idle);
        assert!(studio.begin_generate().is_ok());
        Ok(())
    }

    #[test]
    fn dismissed_job_result_is_discarded() -> anyhow::Result<()> {
        let backend = ScriptedBackend::default();
        let mut studio = PortraitStudio::default();
        let stale = studio.begin_generate()?;
        assert!(studio.dismiss_pending());
        assert!(!studio.dismiss_pending());

        let fresh = studio.begin_generate()?;
        let stale_outcome = stale.run(&backend, &SessionContext::default());
        assert!(matches!(
            studio.complete(stale_outcome),
            Err(PortraitError::Stale)
        ));
        assert!(studio.state().current_image().is_none());
        assert!(studio.is_busy());

        studio.complete(fresh.run(&backend, &SessionContext::default()))?;
        assert!(studio.state().current_image().is_some());
        assert!(studio.state().history().is_empty());
        Ok(())
    }

    #[test]
    fn jobs_can_run_on_a_worker_thread() -> anyhow::Result<()> {
        fn assert_send<T: Send>() {}
        assert_send::<PendingJob>();

        let backend = Arc::new(dryrun());
        let mut studio = PortraitStudio::new(small_grid());
        let job = studio.begin_generate()?;
        let worker_backend = Arc::clone(&backend);
        let outcome = thread::spawn(move || job.run(worker_backend.as_ref(), &story()))
            .join()
            .map_err(|_| anyhow::anyhow!("worker panicked"))?;
        studio.complete(outcome)?;
        assert!(studio.state().current_image().is_some());
        Ok(())
    }

    #[test]
    fn capture_clears_history_and_always_releases_camera() -> anyhow::Result<()> {
        let mut studio = PortraitStudio::default();
        let backend = ScriptedBackend::default();
        studio.generate(&backend, &SessionContext::default())?;
        assert!(studio.edit(&backend, "add freckles")?);
        assert_eq!(studio.state().history().len(), 1);

        let mut camera = CountingCamera::new();
        let stops = Arc::clone(&camera.stops);
        studio.open_camera(&mut camera)?;
        assert_eq!(*studio.mode(), StudioMode::Capturing);
        studio.capture()?;
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert!(!studio.camera_open());
        assert!(studio.state().history().is_empty());
        assert_eq!(
            studio.state().current_image().map(ImageRef::mime_type),
            Some("image/jpeg")
        );

        let mut broken = CountingCamera::new();
        broken.fail_capture = true;
        let broken_stops = Arc::clone(&broken.stops);
        studio.open_camera(&mut broken)?;
        assert!(matches!(studio.capture(), Err(PortraitError::Camera(_))));
        assert_eq!(broken_stops.load(Ordering::SeqCst), 1);
        assert_eq!(
            studio.state().current_image().map(ImageRef::mime_type),
            Some("image/jpeg")
        );

        let mut abandoned = CountingCamera::new();
        let abandoned_stops = Arc::clone(&abandoned.stops);
        studio.open_camera(&mut abandoned)?;
        drop(studio);
        assert_eq!(abandoned_stops.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn replacing_the_still_stops_playback() -> anyhow::Result<()> {
        let mut studio = PortraitStudio::new(scripted_grid());
        studio.load_still(&png(8, [3, 3, 3]).to_data_uri())?;
        let animator = ScriptedBackend::default().with_edit_reply(vec![
            ReplyPart::Text("```\n60\n```".to_string()),
            ReplyPart::Image(sheet_png(64)),
        ]);
        assert!(studio.animate(&animator, "blink", &SessionContext::default())?);
        assert!(studio.current_frame().is_some());

        studio.generate(&ScriptedBackend::default(), &SessionContext::default())?;
        assert!(studio.current_frame().is_none());
        assert!(studio.state().sprite_sheet().is_none());
        assert_eq!(studio.state().history().len(), 1);
        assert_eq!(*studio.mode(), StudioMode::Idle);
        Ok(())
    }
}
