//! Host Session
//!
//! The single writer. Owns the authoritative [`GameState`], the session RNG
//! and the clock; applies joins and actions as they arrive, ticks once per
//! interval, and after every change broadcasts the whole state.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::core::clock::Clock;
use crate::core::rng::DeterministicRng;
use crate::game::action::{admit, apply, Action, StepContext};
use crate::game::config::GameConfig;
use crate::game::events::GameEvent;
use crate::game::state::{GameState, Player, PlayerId};
use crate::game::tick::tick;
use crate::network::protocol::{snapshot_tag, NetworkMessage};
use crate::network::transport::{ConnectionId, Transport, TransportError, TransportEvent};
use crate::network::websocket::WebSocketTransport;

/// Inbound event queue depth.
pub const EVENT_BUFFER: usize = 256;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Host process configuration.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// WebSocket bind address.
    pub bind_addr: SocketAddr,
    /// Scheduler period.
    pub tick_interval: Duration,
    /// Session label (logs, seed derivation).
    pub host_name: String,
    /// Game tuning.
    pub game: GameConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            tick_interval: Duration::from_secs(1),
            host_name: "dice-dungeon".to_string(),
            game: GameConfig::default(),
        }
    }
}

impl HostConfig {
    /// Load from environment variables, falling back to defaults.
    ///
    /// - `DICE_DUNGEON_BIND`: socket address (`0.0.0.0:8080`)
    /// - `DICE_DUNGEON_TICK_MS`: scheduler period in ms (`1000`)
    /// - `DICE_DUNGEON_HOST_NAME`: session label
    /// - `DICE_DUNGEON_DRAFT`: `true`/`1` to run the PREGAME draft
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: env_parsed("DICE_DUNGEON_BIND").unwrap_or(defaults.bind_addr),
            tick_interval: env_parsed::<u64>("DICE_DUNGEON_TICK_MS")
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
            host_name: std::env::var("DICE_DUNGEON_HOST_NAME")
                .ok()
                .filter(|name| !name.is_empty())
                .unwrap_or(defaults.host_name),
            game: GameConfig {
                draft_enabled: std::env::var("DICE_DUNGEON_DRAFT")
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(defaults.game.draft_enabled),
                ..defaults.game
            },
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparseable {}={:?}", key, raw);
            None
        }
    }
}

/// Host errors.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(std::io::Error),

    /// Transport failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

// =============================================================================
// SESSION
// =============================================================================

/// The authoritative session.
pub struct HostSession {
    state: GameState,
    rng: DeterministicRng,
    config: GameConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    /// Who joined over which connection.
    peers: BTreeMap<ConnectionId, PlayerId>,
    name: String,
    shutdown_tx: broadcast::Sender<()>,
}

impl HostSession {
    /// Open a lobby.
    ///
    /// With `host` the lobby is seated with that local player; without one
    /// the first peer to join becomes the host.
    pub fn new(
        config: &HostConfig,
        host: Option<Player>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let started_at = clock.now_ms();
        let state = match host {
            Some(player) => GameState::with_host(&config.game, player),
            None => GameState::new(&config.game),
        };
        let (shutdown_tx, _) = broadcast::channel(1);
        info!("Session {} opened at {}", config.host_name, started_at);

        Self {
            state,
            rng: DeterministicRng::for_session(&config.host_name, started_at),
            config: config.game.clone(),
            transport,
            clock,
            peers: BTreeMap::new(),
            name: config.host_name.clone(),
            shutdown_tx,
        }
    }

    /// Current authoritative state.
    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// Handle for stopping [`run`](Self::run).
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    /// Send the full state to every open connection.
    pub fn broadcast_state(&self) -> usize {
        self.transport.broadcast(&NetworkMessage::SyncState(self.state.clone()))
    }

    /// Apply an action (from a peer or from the host's own player) and
    /// broadcast. Returns whether the state changed.
    pub fn submit(&mut self, action: &Action) -> bool {
        let kind = action.kind();
        let changed = self.step(kind, |state, ctx| apply(state, action, ctx));
        if changed {
            self.broadcast_state();
        }
        changed
    }

    /// Seat (or refresh) a player and broadcast.
    pub fn join(&mut self, player: &Player) -> bool {
        let changed = self.step("JOIN_REQUEST", |state, ctx| admit(state, player, ctx));
        if changed {
            self.broadcast_state();
        }
        changed
    }

    /// Run the scheduler once and broadcast. Returns whether the game has
    /// ended.
    pub fn tick(&mut self) -> bool {
        let now = self.clock.now_ms();
        let mut ctx = StepContext::new(now, &mut self.rng, &self.config);
        let result = tick(&self.state, &mut ctx);
        let was_over = self.state.status.is_terminal();

        self.log_events(&result.events);
        if result.state != self.state {
            self.state = result.state;
            self.broadcast_state();
        }
        if result.game_ended && !was_over {
            info!("Game over: {:?} ({})", self.state.status, snapshot_tag(&self.state));
        }
        result.game_ended
    }

    /// React to one transport event.
    pub fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Opened(connection) => {
                debug!("Peer {} connected, sending snapshot", connection);
                let sync = NetworkMessage::SyncState(self.state.clone());
                if let Err(e) = self.transport.send(connection, &sync) {
                    warn!("Initial sync to {} failed: {}", connection, e);
                }
            }
            TransportEvent::Message(connection, NetworkMessage::JoinRequest(mut player)) => {
                if player.id.as_str().is_empty() {
                    player.id = PlayerId::random();
                    info!("Assigned id {} to {}", player.id, connection);
                }
                self.peers.insert(connection, player.id.clone());
                self.join(&player);
            }
            TransportEvent::Message(connection, NetworkMessage::Action(action)) => {
                if let (Some(actor), Some(known)) = (action.actor(), self.peers.get(&connection)) {
                    if actor != known {
                        debug!("{} acting as {} from {}", known, actor, connection);
                    }
                }
                self.submit(&action);
            }
            TransportEvent::Message(connection, NetworkMessage::SyncState(_)) => {
                debug!("Ignoring SYNC_STATE from peer {}", connection);
            }
            TransportEvent::Closed(connection) => match self.peers.remove(&connection) {
                Some(player) => info!("Player {} left ({})", player, connection),
                None => debug!("Peer {} closed", connection),
            },
        }
    }

    /// Drive the session until shutdown or until the event stream ends.
    /// Returns the final state.
    #[instrument(skip(self, events), fields(session = %self.name))]
    pub async fn run(mut self, mut events: mpsc::Receiver<TransportEvent>, tick_every: Duration) -> GameState {
        let mut tick_interval = interval(tick_every);
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick of an interval fires immediately
        tick_interval.tick().await;

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.tick();
                }
                event = events.recv() => {
                    match event {
                        Some(event) => self.handle_event(event),
                        None => {
                            info!("Transport closed");
                            break;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        self.state
    }

    fn step<F>(&mut self, kind: &str, f: F) -> bool
    where
        F: FnOnce(&GameState, &mut StepContext<'_>) -> GameState,
    {
        let now = self.clock.now_ms();
        let mut ctx = StepContext::new(now, &mut self.rng, &self.config);
        let next = f(&self.state, &mut ctx);
        let events = ctx.take_events();

        if let Some(reason) = ctx.rejection {
            debug!("Rejected {}: {}", kind, reason);
            return false;
        }
        self.log_events(&events);
        if next == self.state {
            return false;
        }
        self.state = next;
        #[cfg(feature = "debug-tracing")]
        debug!("After {}: {}", kind, snapshot_tag(&self.state));
        true
    }

    fn log_events(&self, events: &[GameEvent]) {
        for event in events {
            match event {
                GameEvent::StatusChanged { from, to } => {
                    info!("Status {:?} -> {:?} ({})", from, to, snapshot_tag(&self.state));
                }
                GameEvent::PlayerJoined { player_id, late } => {
                    info!("Player {} joined{}", player_id, if *late { " late" } else { "" });
                }
                GameEvent::ObstacleDefeated { room_id, name, .. } => {
                    info!("{} defeated in {}", name, room_id);
                }
                other => debug!("Event: {}", other.kind()),
            }
        }
    }
}

impl std::fmt::Debug for HostSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostSession")
            .field("name", &self.name)
            .field("status", &self.state.status)
            .field("players", &self.state.players.len())
            .field("peers", &self.peers.len())
            .finish()
    }
}

/// Serve a headless host over WebSocket until `shutdown` fires.
#[instrument(skip(config, clock, shutdown), fields(bind = %config.bind_addr))]
pub async fn run_websocket_host(
    config: HostConfig,
    clock: Arc<dyn Clock>,
    shutdown: broadcast::Sender<()>,
) -> Result<GameState, HostError> {
    let listener = TcpListener::bind(config.bind_addr).await.map_err(HostError::Bind)?;
    let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
    let transport = WebSocketTransport::new(events_tx);
    let server = tokio::spawn(Arc::clone(&transport).serve(listener));

    let session = HostSession::new(&config, None, transport.clone(), clock);
    let session_shutdown = session.shutdown_handle();
    let mut outer = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = outer.recv().await;
        let _ = session_shutdown.send(());
    });

    let final_state = session.run(events_rx, config.tick_interval).await;
    info!("Final state {} ({:?})", snapshot_tag(&final_state), final_state.status);

    transport.shutdown();
    match server.await {
        Ok(result) => result?,
        Err(e) => warn!("Transport task ended abnormally: {}", e),
    }
    Ok(final_state)
}

// =============================================================================
// TESTS
// =============================================================================
