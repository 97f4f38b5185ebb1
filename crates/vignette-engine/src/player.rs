use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use tracing::debug;
use vignette_contracts::grid::{GridSpec, NormalizedRect, PixelRect};

use crate::error::{PortraitError, PortraitResult};
use crate::sprites::SpriteSheet;

/// Frame cursor over a validated sprite sheet. Holds no timer; see
/// [`PlaybackTask`] for the scheduled variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpriteSheetPlayer {
    grid: GridSpec,
    tile_px: u32,
    current: u32,
}

impl SpriteSheetPlayer {
    pub fn new(sheet: &SpriteSheet) -> Self {
        Self {
            grid: *sheet.grid(),
            tile_px: sheet.tile_px(),
            current: 0,
        }
    }

    pub fn current_frame(&self) -> u32 {
        self.current
    }

    pub fn advance(&mut self) -> u32 {
        self.current = self.grid.next_frame(self.current);
        self.current
    }

    pub fn reset(&mut self) {
        self.current = 0;
    }

    pub fn tile_rect(&self) -> NormalizedRect {
        self.grid.normalized_rect(self.current)
    }

    pub fn pixel_rect(&self) -> PixelRect {
        self.grid.pixel_rect(self.current, self.tile_px)
    }
}

enum PlaybackCommand {
    Stop,
}

/// Background ticker advancing a shared [`SpriteSheetPlayer`] once per frame
/// duration until stopped. Dropping the task stops it.
pub struct PlaybackTask {
    player: Arc<Mutex<SpriteSheetPlayer>>,
    stop_flag: Arc<AtomicBool>,
    sender: Option<mpsc::Sender<PlaybackCommand>>,
    handle: Option<thread::JoinHandle<()>>,
    frame_duration_ms: u64,
}

impl PlaybackTask {
    pub fn start(sheet: &SpriteSheet) -> PortraitResult<Self> {
        let frame_duration = Duration::from_millis(sheet.frame_duration_ms());
        let player = Arc::new(Mutex::new(SpriteSheetPlayer::new(sheet)));
        let stop_flag = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();

        let worker_player = Arc::clone(&player);
        let worker_stop = Arc::clone(&stop_flag);
        let handle = thread::Builder::new()
            .name("vignette-playback".to_string())
            .spawn(move || {
                while !worker_stop.load(Ordering::SeqCst) {
                    match rx.recv_timeout(frame_duration) {
                        Err(mpsc::RecvTimeoutError::Timeout) => {}
                        Ok(PlaybackCommand::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                            break
                        }
                    }
                    if worker_stop.load(Ordering::SeqCst) {
                        break;
                    }
                    lock_player(&worker_player).advance();
                }
            })
            .map_err(|err| PortraitError::animation(format!("playback thread spawn failed: {err}")))?;

        debug!(
            frame_duration_ms = sheet.frame_duration_ms(),
            "playback started"
        );
        Ok(Self {
            player,
            stop_flag,
            sender: Some(tx),
            handle: Some(handle),
            frame_duration_ms: sheet.frame_duration_ms(),
        })
    }

    pub fn current_frame(&self) -> u32 {
        lock_player(&self.player).current_frame()
    }

    pub fn tile_rect(&self) -> NormalizedRect {
        lock_player(&self.player).tile_rect()
    }

    pub fn pixel_rect(&self) -> PixelRect {
        lock_player(&self.player).pixel_rect()
    }

    pub fn frame_duration_ms(&self) -> u64 {
        self.frame_duration_ms
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Stops the ticker and waits for the thread. Safe to call repeatedly.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(PlaybackCommand::Stop);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!("playback stopped");
        }
    }
}

fn lock_player(player: &Mutex<SpriteSheetPlayer>) -> MutexGuard<'_, SpriteSheetPlayer> {
    player.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Drop for PlaybackTask {
    fn drop(&mut self) {
        self.stop();
    }
}
