//! Outbound wire messages. The `state` notice carries the full snapshot
//! and is the only message clients need for correctness; everything else
//! is an advisory animation hint.

use serde::{Deserialize, Serialize};

use crate::betting::{BettingPlayer, BettingState, DrinkTransfer, Racer};
use crate::contracts::{
    BuyoutProposal, ContractEvent, ContractsAwards, ContractsPlayer, ContractsState, Milestone,
    RoundResult,
};
use crate::hiddenrole::{HiddenRolePlayer, HiddenRoleState, Mission, PrivateRole, VotingOutcome};
use crate::trivia::{Challenge, ChallengeOutcome, TriviaPlayer, TriviaState};

/// Full snapshot of whichever mode is running. Untagged on the wire: the
/// mode-specific field sets are disjoint enough that the variant is
/// recoverable from shape alone, richest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateSnapshot {
    Contracts(ContractsState),
    Trivia(TriviaState),
    Betting(BettingState),
    HiddenRole(HiddenRoleState),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PlayerCard {
    Contracts(ContractsPlayer),
    Trivia(TriviaPlayer),
    Betting(BettingPlayer),
    HiddenRole(HiddenRolePlayer),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ServerNotice {
    State {
        state: StateSnapshot,
    },
    AssignedId {
        player_id: String,
    },
    PlayerJoined {
        player: PlayerCard,
    },
    PlayerLeft {
        player_id: String,
    },
    Error {
        message: String,
    },
    Paused,
    Resumed,

    // Contracts mode.
    Event {
        event: ContractEvent,
    },
    BuyoutProposed {
        proposal: BuyoutProposal,
    },
    BuyoutResult {
        proposal_id: String,
        contract_id: String,
        approved: bool,
    },
    RoundResult {
        result: RoundResult,
    },
    MilestoneTriggered {
        milestone: Milestone,
    },
    GameEnd {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        awards: Option<ContractsAwards>,
    },

    // Trivia mode.
    CountdownStart {
        target_time: u64,
    },
    ChallengeStart {
        challenge: Challenge,
    },
    ChallengeResult {
        result: ChallengeOutcome,
    },

    // Hidden-role mode.
    PrivateState {
        private_state: PrivateRole,
    },
    HauntTriggered,
    NewMission {
        mission: Mission,
    },
    VotingStarted,
    VotingResult {
        result: VotingOutcome,
    },

    // Betting mode.
    BettingStarted {
        end_time: u64,
    },
    BetPlaced {
        player_id: String,
        racer_id: usize,
    },
    RaceStarted,
    RaceUpdate {
        racers: Vec<Racer>,
    },
    RaceFinished {
        winning_racer: usize,
    },
    DistributionStarted {
        end_time: u64,
    },
    DrinkGiven {
        drink: DrinkTransfer,
    },
    RoundResults {
        drink_assignments: Vec<DrinkTransfer>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::{ContractsPhase, ContractsSettings};

    fn empty_contracts_state() -> ContractsState {
        ContractsState {
            phase: ContractsPhase::Lobby,
            players: vec![],
            settings: ContractsSettings::default(),
            current_round: 0,
            tab: 0,
            milestones: vec![],
            offered_contracts: vec![],
            active_contracts: vec![],
            settled_contracts: vec![],
            offer_timer_end: None,
            round_timer_end: None,
            current_buyout: None,
            buyout_timer_end: None,
            round_result: None,
            game_result: None,
            paused: false,
            host_connected: false,
        }
    }

    #[test]
    fn state_notice_round_trips_through_untagged_snapshot() {
        let notice = ServerNotice::State {
            state: StateSnapshot::Contracts(empty_contracts_state()),
        };
        let json = serde_json::to_string(&notice).unwrap();
        assert!(json.contains("\"type\":\"state\""));
        assert!(json.contains("\"phase\":\"lobby\""));

        let back: ServerNotice = serde_json::from_str(&json).unwrap();
        match back {
            ServerNotice::State {
                state: StateSnapshot::Contracts(state),
            } => assert_eq!(state.phase, ContractsPhase::Lobby),
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn advisory_notice_tags_are_kebab_case() {
        let json = serde_json::to_string(&ServerNotice::AssignedId {
            player_id: "p1".into(),
        })
        .unwrap();
        assert_eq!(json, "{\"type\":\"assigned-id\",\"playerId\":\"p1\"}");

        let json = serde_json::to_string(&ServerNotice::GameEnd { awards: None }).unwrap();
        assert_eq!(json, "{\"type\":\"game-end\"}");
    }
}
