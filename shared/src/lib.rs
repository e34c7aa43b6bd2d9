//! Wire protocol shared between the session server and its clients.
//!
//! Every message travelling over a connection is one JSON object tagged by a
//! `type` discriminator ([`command::ClientCommand`] inbound,
//! [`notice::ServerNotice`] outbound). The full-state snapshot inside a
//! `state` notice is the single source of truth for clients; all other
//! notices are advisory animation hints.

use serde::{Deserialize, Serialize};

pub mod betting;
pub mod command;
pub mod contracts;
pub mod hiddenrole;
pub mod notice;
pub mod trivia;

/// One drink debt assigned to a participant, with a human-readable reason.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DrinkAssignment {
    pub player_id: String,
    pub sips: u32,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}
