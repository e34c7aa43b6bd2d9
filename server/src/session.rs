//! The single-writer session loop.
//!
//! Everything that can mutate session state arrives as a
//! [`SessionMessage`] on one unbounded channel: parsed client commands,
//! connect/disconnect events and timer firings. The loop applies them one
//! at a time, so no two mutations are ever concurrent and no locks are
//! needed around game state.

use log::{debug, info, warn};
use shared::command::ClientCommand;
use shared::notice::{ServerNotice, StateSnapshot};
use tokio::sync::mpsc;

use crate::registry::ConnectionRegistry;
use crate::timer::{TimerKind, TimerScheduler};
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Inbound events serialized by the session loop.
#[derive(Debug)]
pub enum SessionMessage {
    Connected {
        conn_id: u64,
        outbox: mpsc::UnboundedSender<String>,
    },
    Command {
        conn_id: u64,
        command: ClientCommand,
    },
    Malformed {
        conn_id: u64,
        detail: String,
    },
    Disconnected {
        conn_id: u64,
    },
    Timer {
        kind: TimerKind,
        generation: u64,
    },
}

/// Shared machinery handed to the active mode on every event.
pub struct Engine {
    pub registry: ConnectionRegistry,
    pub timers: TimerScheduler,
    pub rng: StdRng,
}

impl Engine {
    pub fn new(tx: mpsc::UnboundedSender<SessionMessage>, seed: Option<u64>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            timers: TimerScheduler::new(tx),
            rng: match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            },
        }
    }
}

/// One phase graph. Modes own their state and react to the serialized
/// event stream; the session owns the shared engine.
pub trait GameMode: Send {
    /// Full snapshot with server-only payloads redacted.
    fn snapshot(&self) -> StateSnapshot;
    fn on_command(&mut self, engine: &mut Engine, conn_id: u64, command: ClientCommand);
    /// Called only for fires the scheduler accepted as current.
    fn on_timer(&mut self, engine: &mut Engine, kind: TimerKind);
    fn on_disconnect(&mut self, engine: &mut Engine, player_id: Option<String>, privileged: bool);
}

pub struct Session {
    engine: Engine,
    mode: Box<dyn GameMode>,
    rx: mpsc::UnboundedReceiver<SessionMessage>,
}

impl Session {
    pub fn new(
        mode: Box<dyn GameMode>,
        seed: Option<u64>,
    ) -> (Self, mpsc::UnboundedSender<SessionMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Session {
            engine: Engine::new(tx.clone(), seed),
            mode,
            rx,
        };
        (session, tx)
    }

    pub async fn run(mut self) {
        info!("Session loop started");
        while let Some(message) = self.rx.recv().await {
            self.handle(message);
        }
        info!("Session loop stopped");
    }

    /// Awaits the next queued event without applying it. Used by tests to
    /// interleave timer fires with assertions.
    pub async fn recv(&mut self) -> Option<SessionMessage> {
        self.rx.recv().await
    }

    /// Applies every already-queued event.
    pub fn drain(&mut self) {
        while let Ok(message) = self.rx.try_recv() {
            self.handle(message);
        }
    }

    pub fn handle(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Connected { conn_id, outbox } => {
                debug!("Connection {} opened", conn_id);
                self.engine.registry.register(conn_id, outbox);
                // Fresh snapshot on every new connection, so a reconnect
                // needs no history.
                let state = self.mode.snapshot();
                self.engine
                    .registry
                    .send(conn_id, &ServerNotice::State { state });
            }
            SessionMessage::Command { conn_id, command } => {
                self.mode.on_command(&mut self.engine, conn_id, command);
            }
            SessionMessage::Malformed { conn_id, detail } => {
                warn!("Malformed message on connection {}: {}", conn_id, detail);
                self.engine.registry.error_to(conn_id, "malformed message");
            }
            SessionMessage::Disconnected { conn_id } => {
                debug!("Connection {} closed", conn_id);
                if let Some(conn) = self.engine.registry.deregister(conn_id) {
                    self.mode
                        .on_disconnect(&mut self.engine, conn.player_id, conn.privileged);
                }
            }
            SessionMessage::Timer { kind, generation } => {
                if self.engine.timers.accept(kind, generation) {
                    self.mode.on_timer(&mut self.engine, kind);
                } else {
                    debug!("Ignored stale timer fire: {:?}", kind);
                }
            }
        }
    }
}
