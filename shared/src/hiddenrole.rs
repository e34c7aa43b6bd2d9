//! Types for the hidden-role mode: one secretly chosen ghost completes
//! private missions while everyone else tries to identify them in a final
//! vote.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::SettingsPatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HiddenRolePhase {
    Lobby,
    Playing,
    Voting,
    Result,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenRoleSettings {
    pub game_duration_seconds: u64,
    pub haunt_cooldown_seconds: u64,
    pub voting_duration_seconds: u64,
}

impl Default for HiddenRoleSettings {
    fn default() -> Self {
        Self {
            game_duration_seconds: 600,
            haunt_cooldown_seconds: 30,
            voting_duration_seconds: 60,
        }
    }
}

impl HiddenRoleSettings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.game_duration_seconds {
            self.game_duration_seconds = v;
        }
        if let Some(v) = patch.haunt_cooldown_seconds {
            self.haunt_cooldown_seconds = v;
        }
        if let Some(v) = patch.voting_duration_seconds {
            self.voting_duration_seconds = v;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenRolePlayer {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissionCategory {
    Physical,
    Conversation,
    Reaction,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mission {
    pub id: String,
    pub category: MissionCategory,
    pub text: String,
}

/// Per-participant secret, sent only to the owning connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum PrivateRole {
    Ghost {
        current_mission: Mission,
        completed_mission_ids: Vec<String>,
    },
    Mortal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingOutcome {
    pub ghost_id: String,
    pub ghost_name: String,
    pub ghost_avatar: String,
    pub correct_guess: bool,
    pub vote_counts: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HiddenRoleState {
    pub phase: HiddenRolePhase,
    pub players: Vec<HiddenRolePlayer>,
    pub settings: HiddenRoleSettings,
    pub game_timer_end: Option<u64>,
    pub voting_timer_end: Option<u64>,
    pub house_rules: Vec<String>,
    pub haunt_count: u32,
    /// Voter id -> accused id; a re-vote overwrites.
    pub votes: BTreeMap<String, String>,
    pub voting_result: Option<VotingOutcome>,
    pub paused: bool,
    pub host_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_role_tagged_by_role() {
        let mortal = serde_json::to_string(&PrivateRole::Mortal).unwrap();
        assert_eq!(mortal, "{\"role\":\"mortal\"}");

        let ghost = PrivateRole::Ghost {
            current_mission: Mission {
                id: "m1".into(),
                category: MissionCategory::Physical,
                text: "Touch the ceiling".into(),
            },
            completed_mission_ids: vec![],
        };
        let json = serde_json::to_string(&ghost).unwrap();
        assert!(json.contains("\"role\":\"ghost\""));
        assert!(json.contains("\"currentMission\""));
        assert!(json.contains("\"completedMissionIds\""));
    }
}
