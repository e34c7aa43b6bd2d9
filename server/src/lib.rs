//! # Party Session Server Library
//!
//! This library provides the authoritative server implementation for a
//! table-side party game night. One session runs one game at a time;
//! phones join over WebSockets, a shared display shows the same state,
//! and every rule decision is made here.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Session State
//! The server owns the canonical game state. Clients send intents
//! (sign this contract, place this bet, vote for this player) and
//! receive full state snapshots; they never compute outcomes locally.
//!
//! ### Phase Orchestration
//! Each game is a timer-driven phase machine. Deadlines are scheduled
//! centrally, survive pauses with their remaining time intact, and a
//! stale deadline can never fire into a later phase.
//!
//! ### State Broadcasting
//! After every accepted mutation the full snapshot goes to every
//! connection, so a reconnecting phone needs no history to catch up.
//! Per-player secrets are redacted before broadcast and delivered on
//! the owning connection only.
//!
//! ## Architecture Design
//!
//! ### Single-Writer Event Loop
//! All mutation flows through one channel into one loop (see
//! [`session`]). Network reads, timer fires and disconnects are just
//! messages; nothing else touches game state, so there are no locks
//! and no interleaving to reason about.
//!
//! ### Logical Timer Cancellation
//! Sleeping tasks are never force-killed. Every scheduled deadline
//! carries a generation number and the scheduler rejects fires whose
//! generation is no longer current (see [`timer`]).
//!
//! ## Module Organization
//!
//! - [`network`]: WebSocket accept loop and the address endpoint.
//! - [`session`]: the event loop, the [`session::GameMode`] seam and
//!   the shared engine handed to modes.
//! - [`registry`]: connection bookkeeping and outbound fan-out.
//! - [`roster`]: participant identity, reconnects and kicks.
//! - [`timer`]: deadline scheduling, pause and resume.
//! - [`content`]: contract, challenge, mission and house-rule pools.
//! - [`modes`]: the four phase machines built on the seam above.

pub mod content;
pub mod modes;
pub mod network;
pub mod registry;
pub mod roster;
pub mod session;
pub mod timer;
pub mod utils;
