//! The tick-driven scheduler.
//!
//! [`PollLoop`] lives on the event loop and is only ever touched from there.
//! Anything that may block (catalog scan, metadata requests, playtime file
//! I/O) is pushed to tokio's blocking pool, so a tick never waits on disk or
//! network. At most one library rebuild and one local-game refresh are in
//! flight at a time; a tick that finds one still running skips it.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::event::DaemonEvent;
use crate::host::{notify, HostEvent, HostRequest, HostSender};
use crate::metadata::{MetadataLookup, MetadataResolver};
use crate::playtime::{GameTime, PlaytimeStore};
use crate::process_monitor::{FinishedSession, LaunchError, ProcessMonitor};
use crate::reconcile::{diff, local_snapshot, LocalGame};
use crate::registry::{self, rebuild_registry, Game, GameRegistry};
use crate::scanner;
use crate::status::{DaemonState, StatusFile};

/// The last local-game snapshot reported to the host. `None` until the
/// catalog has been built or the host asked for local games.
type LocalGamesCache = Arc<Mutex<Option<Vec<LocalGame>>>>;

/// Sends [`DaemonEvent::Tick`] every `period` until the receiver is gone.
pub async fn run_ticker(period: Duration, tx: mpsc::Sender<DaemonEvent>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if tx.send(DaemonEvent::Tick).await.is_err() {
            break;
        }
    }
}

pub struct PollLoop<L> {
    config: Config,
    registry: GameRegistry,
    resolver: Arc<Mutex<MetadataResolver<L>>>,
    /// Installed into the resolver by the next library rebuild.
    pending_lookup: Option<L>,
    playtime: Arc<PlaytimeStore>,
    status: Arc<StatusFile>,
    host: HostSender,
    monitor: ProcessMonitor,
    local_games: LocalGamesCache,
    tick_count: u64,
    rebuild_requested: bool,
    library_task: Option<JoinHandle<()>>,
    local_task: Option<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
}

impl<L> PollLoop<L>
where
    L: MetadataLookup + Send + 'static,
{
    pub fn new(
        config: Config,
        resolver: MetadataResolver<L>,
        playtime: PlaytimeStore,
        status: StatusFile,
        host: HostSender,
    ) -> Self {
        Self {
            config,
            registry: GameRegistry::new(),
            resolver: Arc::new(Mutex::new(resolver)),
            pending_lookup: None,
            playtime: Arc::new(playtime),
            status: Arc::new(status),
            host,
            monitor: ProcessMonitor::new(),
            local_games: Arc::new(Mutex::new(None)),
            tick_count: 0,
            rebuild_requested: false,
            library_task: None,
            local_task: None,
            background: Vec::new(),
        }
    }

    /// One scheduler step: emulator exit check, local-game refresh, and every
    /// Nth tick a playtime refresh.
    pub fn tick(&mut self) {
        self.tick_at(Instant::now());
    }

    /// [`tick`](Self::tick) with `now` as the time a session ends, if one does.
    pub fn tick_at(&mut self, now: Instant) {
        self.check_emulator(now);

        if self.rebuild_requested {
            self.start_library_rebuild();
        }
        self.schedule_local_refresh();

        self.tick_count += 1;
        if self.tick_count % self.config.poll.effective_game_time_period() == 0 {
            self.refresh_game_times(false);
        }

        self.background.retain(|h| !h.is_finished());
    }

    pub fn handle_request(&mut self, request: HostRequest) {
        match request {
            HostRequest::Launch { game_id } => self.launch(&game_id),
            HostRequest::GetOwnedGames => self.refresh_library(),
            HostRequest::GetLocalGames => self.report_local_games(),
            HostRequest::GetLocalSizes => self.report_local_sizes(),
            HostRequest::GetGameTimes => self.refresh_game_times(true),
            // The event loop stops before this is reached.
            HostRequest::Shutdown => {}
        }
    }

    /// Applies a reloaded config. The new `lookup` replaces the resolver's
    /// client, and the library is rebuilt if anything it depends on changed.
    pub fn reconfigure(&mut self, config: Config, lookup: L) {
        let rebuild = config.library != self.config.library
            || config.metadata != self.config.metadata;
        self.config = config;
        self.pending_lookup = Some(lookup);
        if rebuild {
            info!("Library settings changed");
            self.refresh_library();
        }
    }

    /// Requests a catalog rebuild. If one is already running, the request is
    /// kept and served on a later tick.
    pub fn refresh_library(&mut self) {
        self.rebuild_requested = true;
        self.start_library_rebuild();
    }

    /// Waits for every in-flight task and marks the daemon idle.
    pub async fn shutdown(mut self) {
        self.settle().await;
        self.status.update(|s| {
            s.state = DaemonState::Idle;
            s.running_game = None;
            s.error = None;
        });
        if let Some(session) = self.monitor.running_game_id() {
            info!(id = session, "Emulator left running; session not recorded");
        }
        let last = self.status.snapshot();
        info!(
            games = last.game_count,
            last_session_minutes = ?last.last_session_minutes,
            "Poll loop stopped"
        );

        // The lookup may own a blocking HTTP client, which must not be dropped on the runtime.
        let resolver = self.resolver;
        let pending = self.pending_lookup;
        if let Err(e) = tokio::task::spawn_blocking(move || drop((resolver, pending))).await {
            error!("Failed to release metadata client: {e}");
        }
    }

    async fn settle(&mut self) {
        let handles = self
            .library_task
            .take()
            .into_iter()
            .chain(self.local_task.take())
            .chain(self.background.drain(..))
            .collect::<Vec<_>>();
        for handle in handles {
            if let Err(e) = handle.await {
                error!("Background task failed: {e}");
            }
        }
    }

    // ── Process monitor ──────────────────────────────────────────────────────

    fn launch(&mut self, game_id: &str) {
        let result = match self.registry.find(game_id) {
            Some(game) => self.monitor.launch(&game, &self.config.emulator),
            None => Err(LaunchError::UnknownGame(game_id.to_string())),
        };

        match result {
            Ok(()) => self.status.update(|s| {
                s.state = DaemonState::Playing;
                s.running_game = Some(game_id.to_string());
                s.error = None;
            }),
            Err(e) => {
                warn!(id = game_id, "Launch failed: {e}");
                self.status.update(|s| s.error = Some(format!("Launch failed: {e}")));
                notify(
                    &self.host,
                    HostEvent::LaunchFailed {
                        game_id: game_id.to_string(),
                        reason: e.to_string(),
                    },
                );
            }
        }
    }

    fn check_emulator(&mut self, now: Instant) {
        let Some(session) = self.monitor.check_exit_at(now) else {
            return;
        };
        self.status.update(|s| {
            s.state = DaemonState::Idle;
            s.running_game = None;
            s.last_session_minutes = Some(session.minutes);
        });
        self.record_session(session);
    }

    fn record_session(&mut self, session: FinishedSession) {
        let store = Arc::clone(&self.playtime);
        let status = Arc::clone(&self.status);
        let host = self.host.clone();
        let last_played = chrono::Utc::now().timestamp();

        self.background.push(tokio::spawn(async move {
            let game_id = session.game_id.clone();
            let result = tokio::task::spawn_blocking(move || {
                store.update(&session.game_id, &session.name, session.minutes, last_played)
            })
            .await;
            match result {
                Ok(Ok(game_time)) => notify(&host, HostEvent::GameTimeUpdated(game_time)),
                Ok(Err(e)) => {
                    error!(id = %game_id, "Failed to record playtime: {e:#}");
                    status.update(|s| s.error = Some(format!("Failed to record playtime: {e}")));
                }
                Err(e) => error!(id = %game_id, "Playtime task failed: {e}"),
            }
        }));
    }

    // ── Library / registry ───────────────────────────────────────────────────

    fn start_library_rebuild(&mut self) {
        if self.library_task.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Library rebuild already in flight");
            return;
        }
        self.rebuild_requested = false;

        let root = PathBuf::from(&self.config.library.roms_path);
        let extensions = self.config.library.extensions.clone();
        let new_lookup = self.pending_lookup.take();
        let resolver = Arc::clone(&self.resolver);
        let registry = self.registry.clone();
        let local_games = Arc::clone(&self.local_games);
        let status = Arc::clone(&self.status);
        let host = self.host.clone();

        self.library_task = Some(tokio::spawn(async move {
            let rebuilt = tokio::task::spawn_blocking(move || {
                let roms = scanner::scan(&root, &extensions);
                let mut resolver = resolver.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(lookup) = new_lookup {
                    resolver.replace_lookup(lookup);
                }
                let games = rebuild_registry(&roms, &mut resolver);
                debug!(cached = resolver.cached_entries(), "Metadata cache size");
                games
            })
            .await;

            let games = match rebuilt {
                Ok(games) => games,
                Err(e) => {
                    error!("Library rebuild failed: {e}");
                    return;
                }
            };

            registry.replace(games.clone());
            {
                let mut cached = local_games.lock().unwrap_or_else(|e| e.into_inner());
                if cached.is_none() {
                    *cached = Some(Vec::new());
                }
            }
            status.update(|s| s.game_count = games.len());
            notify(&host, HostEvent::OwnedGames { games });
        }));
    }

    fn report_local_sizes(&mut self) {
        let games = self.registry.snapshot();
        let host = self.host.clone();
        self.background.push(tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || registry::local_sizes(&games)).await {
                Ok(sizes) => notify(&host, HostEvent::LocalSizes { sizes }),
                Err(e) => error!("Local size task failed: {e}"),
            }
        }));
    }

    // ── Local state reconciliation ───────────────────────────────────────────

    fn schedule_local_refresh(&mut self) {
        if self.local_games.lock().unwrap_or_else(|e| e.into_inner()).is_none() {
            return;
        }
        if self.local_task.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Local game refresh still in flight; skipping tick");
            return;
        }

        let games = self.registry.snapshot();
        let running = self.monitor.running_game_id().map(str::to_owned);
        let cache = Arc::clone(&self.local_games);
        let host = self.host.clone();

        self.local_task = Some(tokio::spawn(async move {
            refresh_local_games(&games, running.as_deref(), &cache, &host);
        }));
    }

    fn report_local_games(&mut self) {
        let snapshot = local_snapshot(&self.registry.snapshot(), self.monitor.running_game_id());
        *self.local_games.lock().unwrap_or_else(|e| e.into_inner()) = Some(snapshot.clone());
        notify(&self.host, HostEvent::LocalGames { local_games: snapshot });
    }

    // ── Playtime ─────────────────────────────────────────────────────────────

    /// Reads (and seeds) playtime for the whole catalog. With `as_reply` the
    /// result goes out as one `game_times` event, otherwise one
    /// `game_time_updated` per game.
    fn refresh_game_times(&mut self, as_reply: bool) {
        let games = self.registry.snapshot();
        if games.is_empty() && !as_reply {
            return;
        }
        let store = Arc::clone(&self.playtime);
        let host = self.host.clone();

        self.background.push(tokio::spawn(async move {
            let result = tokio::task::spawn_blocking(move || store.get_all(&games)).await;
            let times: BTreeMap<String, GameTime> = match result {
                Ok(Ok(times)) => times,
                Ok(Err(e)) => {
                    error!("Failed to read playtime: {e:#}");
                    return;
                }
                Err(e) => {
                    error!("Playtime task failed: {e}");
                    return;
                }
            };
            if as_reply {
                notify(&host, HostEvent::GameTimes { game_times: times.into_values().collect() });
            } else {
                for game_time in times.into_values() {
                    notify(&host, HostEvent::GameTimeUpdated(game_time));
                }
            }
        }));
    }
}

/// Rebuilds the local snapshot, reports what changed since the cached one,
/// and replaces the cache.
fn refresh_local_games(
    games: &[Game],
    running_game_id: Option<&str>,
    cache: &LocalGamesCache,
    host: &HostSender,
) {
    let snapshot = local_snapshot(games, running_game_id);
    let changes = {
        let mut cached = cache.lock().unwrap_or_else(|e| e.into_inner());
        let changes = diff(cached.as_deref().unwrap_or_default(), &snapshot);
        *cached = Some(snapshot);
        changes
    };
    if !changes.is_empty() {
        debug!(count = changes.len(), "Local game state changed");
    }
    for change in changes {
        notify(host, HostEvent::LocalGameStatusChanged(change));
    }
}
