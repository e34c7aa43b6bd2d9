//! Types for the trivia mode: a rotating challenge loop where a random
//! countdown picks the next challenge and a wrong answer or a failed task
//! costs a fixed penalty.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::command::SettingsPatch;
use crate::DrinkAssignment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TriviaPhase {
    Lobby,
    Countdown,
    Challenge,
    Result,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChallengeKind {
    PopQuiz,
    SocialStudies,
    PhysicalEducation,
    DramaClass,
    Detention,
    Recess,
}

pub const ALL_CHALLENGE_KINDS: [ChallengeKind; 6] = [
    ChallengeKind::PopQuiz,
    ChallengeKind::SocialStudies,
    ChallengeKind::PhysicalEducation,
    ChallengeKind::DramaClass,
    ChallengeKind::Detention,
    ChallengeKind::Recess,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriviaSettings {
    pub min_timer_seconds: u64,
    pub max_timer_seconds: u64,
    pub enabled_kinds: Vec<ChallengeKind>,
    pub wrong_answer_sips: u32,
}

impl Default for TriviaSettings {
    fn default() -> Self {
        Self {
            min_timer_seconds: 30,
            max_timer_seconds: 90,
            enabled_kinds: ALL_CHALLENGE_KINDS.to_vec(),
            wrong_answer_sips: 2,
        }
    }
}

impl TriviaSettings {
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.min_timer_seconds {
            self.min_timer_seconds = v;
        }
        if let Some(v) = patch.max_timer_seconds {
            self.max_timer_seconds = v;
        }
        if let Some(v) = &patch.enabled_kinds {
            self.enabled_kinds = v.clone();
        }
        if let Some(v) = patch.wrong_answer_sips {
            self.wrong_answer_sips = v;
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriviaPlayer {
    pub id: String,
    pub name: String,
    pub avatar: String,
    pub sips: u32,
    pub connected: bool,
}

/// One drawn challenge. `correct_answer` is server-only until the challenge
/// resolves; [`Challenge::public_view`] strips it for broadcast.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub id: String,
    pub kind: ChallengeKind,
    pub title: String,
    pub description: String,
    pub target_player_ids: Vec<String>,
    pub voting_player_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
}

impl Challenge {
    pub fn public_view(&self) -> Challenge {
        let mut view = self.clone();
        view.correct_answer = None;
        view
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeOutcome {
    pub challenge_id: String,
    pub drinks: Vec<DrinkAssignment>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub votes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriviaState {
    pub phase: TriviaPhase,
    pub players: Vec<TriviaPlayer>,
    pub settings: TriviaSettings,
    pub current_challenge: Option<Challenge>,
    pub last_result: Option<ChallengeOutcome>,
    pub countdown_target: Option<u64>,
    pub paused: bool,
    pub host_connected: bool,
}
