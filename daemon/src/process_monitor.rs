use std::io;
use std::process::{Child, Command};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::EmulatorConfig;
use crate::registry::Game;

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("unknown game id {0:?}")]
    UnknownGame(String),
    #[error("{0:?} is already running")]
    AlreadyRunning(String),
    #[error("failed to start emulator {path:?}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// An emulator process whose exit can be polled without blocking.
pub trait GameProcess: Send {
    /// Returns `true` once the process has exited.
    fn has_exited(&mut self) -> io::Result<bool>;
}

impl GameProcess for Child {
    fn has_exited(&mut self) -> io::Result<bool> {
        Ok(self.try_wait()?.is_some())
    }
}

/// Start/end instants of one play session.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionTimer {
    start: Option<Instant>,
    end: Option<Instant>,
}

impl SessionTimer {
    pub fn start_at(&mut self, now: Instant) {
        self.start = Some(now);
        self.end = None;
    }

    pub fn stop_at(&mut self, now: Instant) {
        self.end = Some(now);
    }

    pub fn elapsed(&self) -> Duration {
        match (self.start, self.end) {
            (Some(start), Some(end)) => end.saturating_duration_since(start),
            _ => Duration::ZERO,
        }
    }

    /// Session length rounded to the nearest whole minute.
    pub fn duration_minutes(&self) -> u64 {
        (self.elapsed().as_secs_f64() / 60.0).round() as u64
    }
}

/// A session that just ended; its minutes still need to be added to the playtime store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinishedSession {
    pub game_id: String,
    pub name: String,
    pub minutes: u64,
}

struct ActiveSession {
    game_id: String,
    name: String,
    process: Box<dyn GameProcess>,
    timer: SessionTimer,
}

/// Tracks the single emulator process launched on behalf of the host.
///
/// Idle until [`launch`](Self::launch) succeeds, Running until
/// [`check_exit_at`](Self::check_exit_at) sees the process gone. Launching while a
/// session is open is refused.
#[derive(Default)]
pub struct ProcessMonitor {
    active: Option<ActiveSession>,
}

impl ProcessMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn running_game_id(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.game_id.as_str())
    }

    /// Spawns the emulator for `game` and starts timing the session.
    pub fn launch(&mut self, game: &Game, emulator: &EmulatorConfig) -> Result<(), LaunchError> {
        if let Some(active) = &self.active {
            return Err(LaunchError::AlreadyRunning(active.game_id.clone()));
        }

        let args = emulator.launch_args(&game.path);
        let child = Command::new(&emulator.path)
            .args(&args)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                path: emulator.path.clone(),
                source,
            })?;

        info!(id = %game.id, pid = child.id(), ?args, "Emulator launched");
        self.track(game, Box::new(child), Instant::now())
    }

    /// Starts tracking an already-running `process` for `game`.
    pub fn track(
        &mut self,
        game: &Game,
        process: Box<dyn GameProcess>,
        started: Instant,
    ) -> Result<(), LaunchError> {
        if let Some(active) = &self.active {
            return Err(LaunchError::AlreadyRunning(active.game_id.clone()));
        }
        let mut timer = SessionTimer::default();
        timer.start_at(started);
        self.active = Some(ActiveSession {
            game_id: game.id.clone(),
            name: game.name.clone(),
            process,
            timer,
        });
        Ok(())
    }

    /// Polls the tracked process. Once it has exited, the session is closed
    /// at `now` and returned, and the monitor is Idle again. Otherwise (or
    /// when already idle) does nothing.
    pub fn check_exit_at(&mut self, now: Instant) -> Option<FinishedSession> {
        let active = self.active.as_mut()?;
        match active.process.has_exited() {
            Ok(false) => return None,
            Ok(true) => {}
            // The handle is unusable; close the session rather than poll it forever.
            Err(e) => warn!(id = %active.game_id, "Failed to query emulator status: {e}"),
        }

        let mut session = self.active.take()?;
        session.timer.stop_at(now);
        let minutes = session.timer.duration_minutes();
        info!(
            id = %session.game_id,
            secs = session.timer.elapsed().as_secs(),
            minutes,
            "Emulator exited"
        );
        Some(FinishedSession {
            game_id: session.game_id,
            name: session.name,
            minutes,
        })
    }
}
