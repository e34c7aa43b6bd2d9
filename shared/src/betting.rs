//! Types for the betting mode: players stake drinks on racers, a server
//! tick drives the race, losers drink their stake and winners hand out a
//! distribution budget.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::SettingsPatch;

/// Sips one shot converts to when stakes are tallied.
pub const SIPS_PER_SHOT: u32 = 3;

pub const RACER_COLORS: [&str; 8] = [
    "#e74c3c", "#3498db", "#f1c40f", "#2ecc71", "#9b59b6", "#e67e22", "#1abc9c", "#e91e63",
];

pub const RACER_NAMES: [&str; 8] = [
    "Red Rocket",
    "Blue Blitz",
    "Gold Rush",
    "Green Machine",
    "Purple Haze",
    "Orange Crush",
    "Teal Thunder",
    "Pink Panther",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BettingPhase {
    Lobby,
    Betting,
    Racing,
    Distribution,
    Results,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrinkKind {
    Sip,
    Shot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bet {
    pub racer_id: usize,
    pub amount: u32,
    #[serde(rename = "type")]
    pub kind: DrinkKind,
}

impl Bet {
    /// Stake expressed in sips.
    pub fn stake_sips(&self) -> u32 {
        match self.kind {
            DrinkKind::Sip => self.amount,
            DrinkKind::Shot => self.amount * SIPS_PER_SHOT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Racer {
    pub id: usize,
    /// Track progress, 0 to 100.
    pub position: f32,
    pub color: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BettingSettings {
    pub num_racers: usize,
    pub bet_timer_seconds: u64,
    pub distribution_timer_seconds: u64,
}

impl Default for BettingSettings {
    fn default() -> Self {
        Self {
            num_racers: 4,
            bet_timer_seconds: 30,
            distribution_timer_seconds: 30,
        }
    }
}

impl BettingSettings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.num_racers {
            // A race needs at least two lanes to ever finish.
            self.num_racers = v.clamp(2, RACER_NAMES.len());
        }
        if let Some(v) = patch.bet_timer_seconds {
            self.bet_timer_seconds = v;
        }
        if let Some(v) = patch.distribution_timer_seconds {
            self.distribution_timer_seconds = v;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BettingPlayer {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub connected: bool,
    /// Sips owed but not yet drunk.
    pub pending_drinks: u32,
    /// Lifetime sips assigned.
    pub total_drinks: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DrinkTransfer {
    pub from_player_id: String,
    pub to_player_id: String,
    pub amount: u32,
    #[serde(rename = "type")]
    pub kind: DrinkKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BettingState {
    pub phase: BettingPhase,
    pub players: Vec<BettingPlayer>,
    pub settings: BettingSettings,
    pub racers: Vec<Racer>,
    /// Player id -> bets placed this round.
    pub bets: BTreeMap<String, Vec<Bet>>,
    pub winning_racer: Option<usize>,
    pub round_number: u32,
    pub phase_end_time: Option<u64>,
    /// Winner id -> sips still available to hand out.
    pub winner_budgets: BTreeMap<String, u32>,
    pub drink_assignments: Vec<DrinkTransfer>,
    pub paused: bool,
    pub host_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bet_wire_shape_keeps_type_field() {
        let bet = Bet {
            racer_id: 2,
            amount: 1,
            kind: DrinkKind::Shot,
        };
        let json = serde_json::to_string(&bet).unwrap();
        assert_eq!(json, "{\"racerId\":2,\"amount\":1,\"type\":\"shot\"}");

        let back: Bet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, bet);
    }

    #[test]
    fn shot_stake_converts_to_sips() {
        let bet = Bet {
            racer_id: 0,
            amount: 2,
            kind: DrinkKind::Shot,
        };
        assert_eq!(bet.stake_sips(), 6);
    }

    #[test]
    fn num_racers_clamped_to_available_names() {
        let mut settings = BettingSettings::default();
        let patch = SettingsPatch {
            num_racers: Some(20),
            ..SettingsPatch::default()
        };
        settings.apply(&patch);
        assert_eq!(settings.num_racers, RACER_NAMES.len());
    }

    #[test]
    fn num_racers_keeps_at_least_two_lanes() {
        let mut settings = BettingSettings::default();
        for empty in [0, 1] {
            let patch = SettingsPatch {
                num_racers: Some(empty),
                ..SettingsPatch::default()
            };
            settings.apply(&patch);
            assert_eq!(settings.num_racers, 2);
        }
    }
}
