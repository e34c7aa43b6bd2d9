//! Inbound wire messages. Every client frame is one JSON object tagged by
//! `type`; unknown or phase-inappropriate commands are rejected by the
//! session, never by the parser.

use serde::{Deserialize, Serialize};

use crate::betting::{Bet, DrinkKind};
use crate::contracts::{Difficulty, TokenKind};
use crate::trivia::ChallengeKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ClientCommand {
    /// Claims the single privileged controller slot.
    HostConnect,
    Join {
        name: String,
        avatar: String,
    },
    StartGame {
        #[serde(default)]
        settings: Option<SettingsPatch>,
    },
    EndGame,
    PauseGame,
    ResumeGame,
    KickPlayer {
        player_id: String,
    },
    UpdateSettings {
        settings: SettingsPatch,
    },
    SignContract {
        contract_id: String,
    },
    WitnessContract {
        contract_id: String,
    },
    UseToken {
        token: TokenKind,
        #[serde(default)]
        target_contract_id: Option<String>,
        #[serde(default)]
        target_player_id: Option<String>,
    },
    ProposeBuyout {
        contract_id: String,
    },
    VoteBuyout {
        approve: bool,
    },
    /// Generic vote: buyout-free ballots, pass/fail rulings, accusations,
    /// and the offered-contract redraw all travel through here.
    Vote {
        id: String,
        value: String,
    },
    Answer {
        id: String,
        value: String,
    },
    PlaceBet {
        bet: Bet,
    },
    LockBets,
    GiveDrink {
        to_player_id: String,
        amount: u32,
        drink_type: DrinkKind,
    },
    NextRound,
    Haunt,
}

/// Partial settings update. Every field is optional so one patch type
/// serves every mode; fields for other modes are simply ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub difficulty: Option<Difficulty>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_timer_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contracts_per_round: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mature_per_round: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_sips_per_settlement: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_events_per_round: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hedge_before_cap: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buyout_ties_pass: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_timer_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_timer_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled_kinds: Option<Vec<ChallengeKind>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wrong_answer_sips: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub haunt_cooldown_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voting_duration_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub num_racers: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bet_timer_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distribution_timer_seconds: Option<u64>,
}
