//! Types for the Contracts mode: a token economy with hidden clauses,
//! buyout votes, random mid-round events and tab milestones layered on the
//! shared phase machine.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::SettingsPatch;
use crate::DrinkAssignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Difficulty {
    Chill,
    Unhinged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractsSettings {
    pub difficulty: Difficulty,
    pub round_count: u32,
    pub round_timer_seconds: u64,
    pub contracts_per_round: usize,
    pub mature_per_round: usize,
    pub max_sips_per_settlement: u32,
    /// Upper bound on random events per action phase; 0 disables them.
    pub max_events_per_round: u8,
    /// Policy switch: apply an armed hedge before the settlement cap
    /// instead of after it.
    pub hedge_before_cap: bool,
    /// Policy switch: a buyout vote that ties passes instead of failing.
    pub buyout_ties_pass: bool,
}

impl Default for ContractsSettings {
    fn default() -> Self {
        Self {
            difficulty: Difficulty::Chill,
            round_count: 10,
            round_timer_seconds: 90,
            contracts_per_round: 3,
            mature_per_round: 2,
            max_sips_per_settlement: 3,
            max_events_per_round: 3,
            hedge_before_cap: false,
            buyout_ties_pass: false,
        }
    }
}

impl ContractsSettings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.difficulty {
            self.difficulty = v;
        }
        if let Some(v) = patch.round_count {
            self.round_count = v;
        }
        if let Some(v) = patch.round_timer_seconds {
            self.round_timer_seconds = v;
        }
        if let Some(v) = patch.contracts_per_round {
            self.contracts_per_round = v;
        }
        if let Some(v) = patch.mature_per_round {
            self.mature_per_round = v;
        }
        if let Some(v) = patch.max_sips_per_settlement {
            self.max_sips_per_settlement = v;
        }
        if let Some(v) = patch.max_events_per_round {
            self.max_events_per_round = v;
        }
        if let Some(v) = patch.hedge_before_cap {
            self.hedge_before_cap = v;
        }
        if let Some(v) = patch.buyout_ties_pass {
            self.buyout_ties_pass = v;
        }
    }

    /// Cost in sips of proposing a buyout.
    pub fn buyout_cost(&self) -> u32 {
        match self.difficulty {
            Difficulty::Chill => 1,
            Difficulty::Unhinged => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TokenKind {
    /// Cancel one hidden clause outright.
    Lawyer,
    /// Arm a one-sip reduction of the holder's own next settlement.
    Hedge,
    /// Redirect who pays a contract to a random other participant.
    Sabotage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenWallet {
    pub lawyer: u32,
    pub hedge: u32,
    pub sabotage: u32,
}

impl Default for TokenWallet {
    fn default() -> Self {
        Self {
            lawyer: 2,
            hedge: 1,
            sabotage: 1,
        }
    }
}

impl TokenWallet {
    pub fn balance(&self, kind: TokenKind) -> u32 {
        match kind {
            TokenKind::Lawyer => self.lawyer,
            TokenKind::Hedge => self.hedge,
            TokenKind::Sabotage => self.sabotage,
        }
    }

    pub fn spend(&mut self, kind: TokenKind) -> bool {
        let slot = match kind {
            TokenKind::Lawyer => &mut self.lawyer,
            TokenKind::Hedge => &mut self.hedge,
            TokenKind::Sabotage => &mut self.sabotage,
        };
        if *slot == 0 {
            return false;
        }
        *slot -= 1;
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractsPlayer {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub sips: u32,
    pub tokens: TokenWallet,
    /// A spent hedge token waiting to reduce this player's next settlement.
    pub hedge_armed: bool,
    pub tab_contribution: u32,
    pub contracts_signed: u32,
    pub buyouts: u32,
    pub audits_triggered: u32,
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractsPhase {
    Lobby,
    Offer,
    Action,
    Settlement,
    Result,
    Endgame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ContractCategory {
    BehaviorTrap,
    Prediction,
    Duel,
    Social,
    Market,
    WildCard,
    Endgame,
}

/// One round-scoped contract instance. The hidden clause and its sips are
/// server-only until `hidden_revealed` flips; [`Contract::public_view`]
/// produces the redacted form that goes out in snapshots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contract {
    pub id: String,
    pub template_id: String,
    pub category: ContractCategory,
    pub visible_text: String,
    pub hidden_clause: String,
    pub hidden_revealed: bool,
    pub signed_by: Option<String>,
    pub witnessed_by: Vec<String>,
    pub round_created: u32,
    pub base_sips: u32,
    pub growth_sips: u32,
    pub hidden_sips: u32,
    pub mature: bool,
    pub settled: bool,
    /// Set by a sabotage token: who pays instead of the signer.
    pub target_player_id: Option<String>,
}

impl Contract {
    /// Copy with the hidden payload withheld while unrevealed.
    pub fn public_view(&self) -> Contract {
        let mut view = self.clone();
        if !view.hidden_revealed {
            view.hidden_clause = String::new();
            view.hidden_sips = 0;
        }
        view
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum ContractEvent {
    /// Hidden clause force-revealed mid-round.
    Audit { contract_id: String },
    /// Flavor twist with no numeric effect.
    FinePrint { contract_id: String, twist: String },
    /// Growth contribution doubled.
    MarketShift { contract_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MilestoneEffect {
    Toast,
    Silence,
    Merger,
    Takeover,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub threshold: u32,
    pub name: String,
    pub description: String,
    pub effect: MilestoneEffect,
    pub triggered: bool,
}

fn milestone(threshold: u32, name: &str, description: &str, effect: MilestoneEffect) -> Milestone {
    Milestone {
        threshold,
        name: name.to_string(),
        description: description.to_string(),
        effect,
        triggered: false,
    }
}

/// Ascending tab thresholds for the given difficulty.
pub fn milestones_for(difficulty: Difficulty) -> Vec<Milestone> {
    match difficulty {
        Difficulty::Chill => vec![
            milestone(10, "Toast Round", "Everyone sips together", MilestoneEffect::Toast),
            milestone(20, "Silent Minute", "First to speak drinks 2", MilestoneEffect::Silence),
            milestone(30, "The Merger", "Two players become a team", MilestoneEffect::Merger),
        ],
        Difficulty::Unhinged => vec![
            milestone(7, "Toast Round", "Everyone sips together", MilestoneEffect::Toast),
            milestone(14, "Silent Minute", "First to speak drinks 2", MilestoneEffect::Silence),
            milestone(21, "The Merger", "Two players become a team", MilestoneEffect::Merger),
            milestone(
                28,
                "Hostile Takeover",
                "Lowest tab contributor assigns 2 sips",
                MilestoneEffect::Takeover,
            ),
        ],
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuyoutProposal {
    pub id: String,
    pub contract_id: String,
    pub proposer_id: String,
    pub sips_cost: u32,
    /// Voter id -> approve; a re-vote overwrites the previous ballot.
    pub votes: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundResult {
    pub round: u32,
    pub matured_contracts: Vec<Contract>,
    pub drinks: Vec<DrinkAssignment>,
    pub tab_change: u32,
    pub milestones_triggered: Vec<Milestone>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractsAwards {
    /// Paid the least into the tab.
    pub top_investor: String,
    /// Most approved buyouts.
    pub bailout_king: String,
    /// Most audits triggered against their contracts.
    pub chaos_auditor: String,
    pub final_tab: u32,
    pub rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractsState {
    pub phase: ContractsPhase,
    pub players: Vec<ContractsPlayer>,
    pub settings: ContractsSettings,
    pub current_round: u32,
    pub tab: u32,
    pub milestones: Vec<Milestone>,
    pub offered_contracts: Vec<Contract>,
    pub active_contracts: Vec<Contract>,
    pub settled_contracts: Vec<Contract>,
    pub offer_timer_end: Option<u64>,
    pub round_timer_end: Option<u64>,
    pub current_buyout: Option<BuyoutProposal>,
    pub buyout_timer_end: Option<u64>,
    pub round_result: Option<RoundResult>,
    pub game_result: Option<ContractsAwards>,
    pub paused: bool,
    pub host_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_contract() -> Contract {
        Contract {
            id: "c1".into(),
            template_id: "t1".into(),
            category: ContractCategory::Prediction,
            visible_text: "I bet someone laughs".into(),
            hidden_clause: "Smirk counts".into(),
            hidden_revealed: false,
            signed_by: None,
            witnessed_by: vec![],
            round_created: 1,
            base_sips: 2,
            growth_sips: 0,
            hidden_sips: 1,
            mature: false,
            settled: false,
            target_player_id: None,
        }
    }

    #[test]
    fn public_view_withholds_unrevealed_clause() {
        let contract = sample_contract();
        let view = contract.public_view();
        assert!(view.hidden_clause.is_empty());
        assert_eq!(view.hidden_sips, 0);

        let mut revealed = contract;
        revealed.hidden_revealed = true;
        let view = revealed.public_view();
        assert_eq!(view.hidden_clause, "Smirk counts");
        assert_eq!(view.hidden_sips, 1);
    }

    #[test]
    fn token_wallet_rejects_overspend() {
        let mut wallet = TokenWallet::default();
        assert!(wallet.spend(TokenKind::Sabotage));
        assert!(!wallet.spend(TokenKind::Sabotage));
        assert_eq!(wallet.balance(TokenKind::Sabotage), 0);
        assert_eq!(wallet.balance(TokenKind::Lawyer), 2);
    }

    #[test]
    fn milestone_tables_are_ascending() {
        for difficulty in [Difficulty::Chill, Difficulty::Unhinged] {
            let table = milestones_for(difficulty);
            for pair in table.windows(2) {
                assert!(pair[0].threshold < pair[1].threshold);
            }
            assert!(table.iter().all(|m| !m.triggered));
        }
    }

    #[test]
    fn settings_patch_applies_selected_fields() {
        let mut settings = ContractsSettings::default();
        let patch = SettingsPatch {
            round_count: Some(1),
            max_events_per_round: Some(0),
            difficulty: Some(Difficulty::Unhinged),
            ..SettingsPatch::default()
        };
        settings.apply(&patch);
        assert_eq!(settings.round_count, 1);
        assert_eq!(settings.max_events_per_round, 0);
        assert_eq!(settings.buyout_cost(), 2);
        // Untouched fields keep their defaults.
        assert_eq!(settings.round_timer_seconds, 90);
    }

    #[test]
    fn contract_event_wire_shape() {
        let event = ContractEvent::FinePrint {
            contract_id: "c1".into(),
            twist: "...but only if said while standing".into(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"fine-print\""));
        assert!(json.contains("\"contractId\":\"c1\""));
    }
}
