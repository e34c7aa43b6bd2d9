//! Join/leave/kick bookkeeping shared by every mode.
//!
//! Participants are never deleted on disconnect, only marked offline, so
//! stats and in-flight obligations stay attributable. Identifiers are
//! random and never reused within a session, even after a kick.

use rand::rngs::StdRng;
use shared::betting::BettingPlayer;
use shared::contracts::ContractsPlayer;
use shared::hiddenrole::HiddenRolePlayer;
use shared::trivia::TriviaPlayer;
use std::collections::HashSet;

use crate::utils::random_id;

pub trait RosterEntry {
    fn id(&self) -> &str;
    fn name(&self) -> &str;
    fn connected(&self) -> bool;
    fn set_connected(&mut self, connected: bool);
}

macro_rules! impl_roster_entry {
    ($ty:ty) => {
        impl RosterEntry for $ty {
            fn id(&self) -> &str {
                &self.id
            }
            fn name(&self) -> &str {
                &self.name
            }
            fn connected(&self) -> bool {
                self.connected
            }
            fn set_connected(&mut self, connected: bool) {
                self.connected = connected;
            }
        }
    };
}

impl_roster_entry!(ContractsPlayer);
impl_roster_entry!(TriviaPlayer);
impl_roster_entry!(HiddenRolePlayer);
impl_roster_entry!(BettingPlayer);

pub struct Roster<P> {
    players: Vec<P>,
    used_ids: HashSet<String>,
}

impl<P> Default for Roster<P> {
    fn default() -> Self {
        Self {
            players: Vec::new(),
            used_ids: HashSet::new(),
        }
    }
}

impl<P: RosterEntry> Roster<P> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh identifier, recorded so it can never be handed out again.
    pub fn allocate_id(&mut self, rng: &mut StdRng) -> String {
        loop {
            let id = random_id(rng);
            if self.used_ids.insert(id.clone()) {
                return id;
            }
        }
    }

    pub fn add(&mut self, player: P) {
        self.players.push(player);
    }

    pub fn get(&self, id: &str) -> Option<&P> {
        self.players.iter().find(|p| p.id() == id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut P> {
        self.players.iter_mut().find(|p| p.id() == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn remove(&mut self, id: &str) -> Option<P> {
        let index = self.players.iter().position(|p| p.id() == id)?;
        Some(self.players.remove(index))
    }

    pub fn mark_connected(&mut self, id: &str, connected: bool) -> bool {
        match self.get_mut(id) {
            Some(player) => {
                player.set_connected(connected);
                true
            }
            None => false,
        }
    }

    /// A rejoin under the name of an offline participant reclaims that
    /// entry instead of creating a duplicate.
    pub fn reclaim_by_name(&mut self, name: &str) -> Option<String> {
        let player = self
            .players
            .iter_mut()
            .find(|p| !p.connected() && p.name() == name)?;
        player.set_connected(true);
        Some(player.id().to_string())
    }

    pub fn connected_count(&self) -> usize {
        self.players.iter().filter(|p| p.connected()).count()
    }

    pub fn connected_ids(&self) -> Vec<String> {
        self.players
            .iter()
            .filter(|p| p.connected())
            .map(|p| p.id().to_string())
            .collect()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, P> {
        self.players.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, P> {
        self.players.iter_mut()
    }

    pub fn players(&self) -> &[P] {
        &self.players
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
