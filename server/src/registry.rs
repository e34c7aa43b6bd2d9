//! Connection registry: every open socket, its assigned participant (if
//! joined) and whether it holds the privileged controller slot.
//!
//! Outbound delivery is fire-and-forget: each connection owns an unbounded
//! outbox of serialized frames drained by its writer task, so the session
//! loop never blocks on network I/O. A send to a closed connection is
//! swallowed.

use log::{debug, error};
use shared::notice::ServerNotice;
use std::collections::HashMap;
use tokio::sync::mpsc;

pub struct Connection {
    outbox: mpsc::UnboundedSender<String>,
    pub player_id: Option<String>,
    pub privileged: bool,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<u64, Connection>,
}

fn encode(notice: &ServerNotice) -> Option<String> {
    match serde_json::to_string(notice) {
        Ok(json) => Some(json),
        Err(e) => {
            error!("Failed to serialize notice: {}", e);
            None
        }
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, conn_id: u64, outbox: mpsc::UnboundedSender<String>) {
        self.connections.insert(
            conn_id,
            Connection {
                outbox,
                player_id: None,
                privileged: false,
            },
        );
    }

    pub fn deregister(&mut self, conn_id: u64) -> Option<Connection> {
        self.connections.remove(&conn_id)
    }

    pub fn attach_player(&mut self, conn_id: u64, player_id: &str) {
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.player_id = Some(player_id.to_string());
        }
    }

    /// Claims the single controller slot; a previous holder is demoted.
    pub fn mark_privileged(&mut self, conn_id: u64) {
        for (id, conn) in self.connections.iter_mut() {
            conn.privileged = *id == conn_id;
        }
    }

    pub fn is_privileged(&self, conn_id: u64) -> bool {
        self.connections
            .get(&conn_id)
            .map(|c| c.privileged)
            .unwrap_or(false)
    }

    pub fn has_privileged(&self) -> bool {
        self.connections.values().any(|c| c.privileged)
    }

    pub fn player_id(&self, conn_id: u64) -> Option<String> {
        self.connections
            .get(&conn_id)
            .and_then(|c| c.player_id.clone())
    }

    pub fn connection_of(&self, player_id: &str) -> Option<u64> {
        self.connections
            .iter()
            .find(|(_, c)| c.player_id.as_deref() == Some(player_id))
            .map(|(id, _)| *id)
    }

    /// Drops a player's connection entry; its writer task ends when the
    /// outbox sender is dropped, which closes the socket.
    pub fn close_player(&mut self, player_id: &str) {
        if let Some(conn_id) = self.connection_of(player_id) {
            self.connections.remove(&conn_id);
        }
    }

    pub fn send(&self, conn_id: u64, notice: &ServerNotice) {
        if let Some(json) = encode(notice) {
            self.send_raw(conn_id, json);
        }
    }

    fn send_raw(&self, conn_id: u64, json: String) {
        if let Some(conn) = self.connections.get(&conn_id) {
            if conn.outbox.send(json).is_err() {
                debug!("Dropped frame for closed connection {}", conn_id);
            }
        }
    }

    pub fn send_to_player(&self, player_id: &str, notice: &ServerNotice) {
        if let Some(conn_id) = self.connection_of(player_id) {
            self.send(conn_id, notice);
        }
    }

    pub fn broadcast(&self, notice: &ServerNotice) {
        if let Some(json) = encode(notice) {
            for (conn_id, conn) in self.connections.iter() {
                if conn.outbox.send(json.clone()).is_err() {
                    debug!("Dropped frame for closed connection {}", conn_id);
                }
            }
        }
    }

    pub fn error_to(&self, conn_id: u64, message: impl Into<String>) {
        self.send(
            conn_id,
            &ServerNotice::Error {
                message: message.into(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
