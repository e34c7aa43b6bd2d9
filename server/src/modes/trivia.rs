//! Trivia mode: a randomized countdown draws the next challenge, quiz
//! questions are answered by their target and everything else is ruled
//! pass or fail from the host screen.

use log::info;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::command::{ClientCommand, SettingsPatch};
use shared::notice::{PlayerCard, ServerNotice, StateSnapshot};
use shared::trivia::{
    Challenge, ChallengeKind, ChallengeOutcome, TriviaPhase, TriviaPlayer, TriviaSettings,
    TriviaState,
};
use shared::DrinkAssignment;
use std::collections::HashSet;
use std::time::Duration;

use crate::content;
use crate::roster::Roster;
use crate::session::{Engine, GameMode};
use crate::timer::TimerKind;

const RESULT_SECONDS: u64 = 5;
const QUIZ_SECONDS: u64 = 30;
const TASK_SECONDS: u64 = 60;

pub struct TriviaMode {
    phase: TriviaPhase,
    settings: TriviaSettings,
    roster: Roster<TriviaPlayer>,
    current_challenge: Option<Challenge>,
    last_result: Option<ChallengeOutcome>,
    used_content: HashSet<String>,
    countdown_target: Option<u64>,
    next_seq: u64,
    paused: bool,
    host_connected: bool,
}

impl Default for TriviaMode {
    fn default() -> Self {
        Self::new()
    }
}

impl TriviaMode {
    pub fn new() -> Self {
        Self {
            phase: TriviaPhase::Lobby,
            settings: TriviaSettings::default(),
            roster: Roster::new(),
            current_challenge: None,
            last_result: None,
            used_content: HashSet::new(),
            countdown_target: None,
            next_seq: 0,
            paused: false,
            host_connected: false,
        }
    }

    fn state(&self) -> TriviaState {
        TriviaState {
            phase: self.phase,
            players: self.roster.players().to_vec(),
            settings: self.settings.clone(),
            current_challenge: self
                .current_challenge
                .as_ref()
                .map(Challenge::public_view),
            last_result: self.last_result.clone(),
            countdown_target: self.countdown_target,
            paused: self.paused,
            host_connected: self.host_connected,
        }
    }

    fn broadcast_state(&self, engine: &Engine) {
        engine.registry.broadcast(&ServerNotice::State {
            state: StateSnapshot::Trivia(self.state()),
        });
    }

    fn require_privileged(&self, engine: &Engine, conn_id: u64) -> bool {
        if engine.registry.is_privileged(conn_id) {
            true
        } else {
            engine.registry.error_to(conn_id, "host only");
            false
        }
    }

    fn handle_join(&mut self, engine: &mut Engine, conn_id: u64, name: String, avatar: String) {
        if name.trim().is_empty() {
            engine.registry.error_to(conn_id, "name required");
            return;
        }
        if let Some(player_id) = self.roster.reclaim_by_name(&name) {
            engine.registry.attach_player(conn_id, &player_id);
            engine
                .registry
                .send(conn_id, &ServerNotice::AssignedId { player_id });
            self.broadcast_state(engine);
            return;
        }
        if self.phase != TriviaPhase::Lobby {
            engine.registry.error_to(conn_id, "game already in progress");
            return;
        }
        let player_id = self.roster.allocate_id(&mut engine.rng);
        let player = TriviaPlayer {
            id: player_id.clone(),
            name,
            avatar,
            sips: 0,
            connected: true,
        };
        engine.registry.attach_player(conn_id, &player_id);
        engine
            .registry
            .send(conn_id, &ServerNotice::AssignedId { player_id });
        engine.registry.broadcast(&ServerNotice::PlayerJoined {
            player: PlayerCard::Trivia(player.clone()),
        });
        self.roster.add(player);
        self.broadcast_state(engine);
    }

    fn handle_start(&mut self, engine: &mut Engine, conn_id: u64, patch: Option<SettingsPatch>) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.phase != TriviaPhase::Lobby {
            engine.registry.error_to(conn_id, "game already running");
            return;
        }
        if let Some(patch) = patch {
            self.settings.apply(&patch);
        }
        if self.roster.connected_count() < 2 {
            engine
                .registry
                .error_to(conn_id, "need at least 2 connected players");
            return;
        }
        for player in self.roster.iter_mut() {
            player.sips = 0;
        }
        self.used_content.clear();
        self.last_result = None;
        info!("Starting trivia rotation");
        self.start_countdown(engine);
    }

    fn start_countdown(&mut self, engine: &mut Engine) {
        self.phase = TriviaPhase::Countdown;
        self.current_challenge = None;
        let min = self.settings.min_timer_seconds;
        let max = self.settings.max_timer_seconds.max(min);
        let delay = engine.rng.gen_range(min..=max);
        engine
            .timers
            .schedule(TimerKind::Countdown, Duration::from_secs(delay));
        self.countdown_target = engine.timers.deadline_unix_ms(TimerKind::Countdown);
        if let Some(target_time) = self.countdown_target {
            engine
                .registry
                .broadcast(&ServerNotice::CountdownStart { target_time });
        }
        self.broadcast_state(engine);
    }

    fn start_challenge(&mut self, engine: &mut Engine) {
        self.countdown_target = None;
        let kinds = if self.settings.enabled_kinds.is_empty() {
            shared::trivia::ALL_CHALLENGE_KINDS.to_vec()
        } else {
            self.settings.enabled_kinds.clone()
        };
        let kind = match kinds.as_slice().choose(&mut engine.rng) {
            Some(kind) => *kind,
            None => return,
        };
        let target = match self
            .roster
            .connected_ids()
            .as_slice()
            .choose(&mut engine.rng)
        {
            Some(id) => id.clone(),
            None => {
                // Everyone left mid-game; idle until someone returns.
                self.start_countdown(engine);
                return;
            }
        };
        self.next_seq += 1;
        let id = format!("ch{}", self.next_seq);
        let challenge = match kind {
            ChallengeKind::PopQuiz => {
                let question = content::draw_quiz(&mut engine.rng, &self.used_content);
                self.used_content.insert(question.id.to_string());
                Challenge {
                    id,
                    kind,
                    title: "Pop Quiz".to_string(),
                    description: question.question.to_string(),
                    target_player_ids: vec![target],
                    voting_player_ids: Vec::new(),
                    time_limit: Some(QUIZ_SECONDS),
                    options: Some(question.options.iter().map(|o| o.to_string()).collect()),
                    correct_answer: Some(question.answer.to_string()),
                }
            }
            other => {
                let prompt = match content::draw_prompt(&mut engine.rng, other, &self.used_content)
                {
                    Some(prompt) => prompt,
                    None => return,
                };
                self.used_content.insert(prompt.id.to_string());
                Challenge {
                    id,
                    kind,
                    title: prompt.title.to_string(),
                    description: prompt.description.to_string(),
                    target_player_ids: vec![target],
                    voting_player_ids: Vec::new(),
                    time_limit: Some(TASK_SECONDS),
                    options: None,
                    correct_answer: None,
                }
            }
        };
        if let Some(limit) = challenge.time_limit {
            engine
                .timers
                .schedule(TimerKind::Challenge, Duration::from_secs(limit));
        }
        self.phase = TriviaPhase::Challenge;
        engine.registry.broadcast(&ServerNotice::ChallengeStart {
            challenge: challenge.public_view(),
        });
        self.current_challenge = Some(challenge);
        self.broadcast_state(engine);
    }

    fn penalize_targets(&mut self, reason: &str) -> Vec<DrinkAssignment> {
        let sips = self.settings.wrong_answer_sips;
        let targets = match &self.current_challenge {
            Some(challenge) => challenge.target_player_ids.clone(),
            None => return Vec::new(),
        };
        let mut drinks = Vec::new();
        for target in targets {
            if let Some(player) = self.roster.get_mut(&target) {
                player.sips += sips;
                drinks.push(DrinkAssignment {
                    player_id: target,
                    sips,
                    reason: reason.to_string(),
                    source_id: None,
                });
            }
        }
        drinks
    }

    fn finish_challenge(&mut self, engine: &mut Engine, drinks: Vec<DrinkAssignment>) {
        engine.timers.cancel(TimerKind::Challenge);
        let challenge_id = self
            .current_challenge
            .as_ref()
            .map(|c| c.id.clone())
            .unwrap_or_default();
        let result = ChallengeOutcome {
            challenge_id,
            drinks,
            votes: Default::default(),
        };
        engine.registry.broadcast(&ServerNotice::ChallengeResult {
            result: result.clone(),
        });
        self.last_result = Some(result);
        self.current_challenge = None;
        self.phase = TriviaPhase::Result;
        engine
            .timers
            .schedule(TimerKind::Result, Duration::from_secs(RESULT_SECONDS));
        self.broadcast_state(engine);
    }

    fn handle_answer(&mut self, engine: &mut Engine, conn_id: u64, id: String, value: String) {
        let player_id = match engine.registry.player_id(conn_id) {
            Some(id) => id,
            None => {
                engine.registry.error_to(conn_id, "join first");
                return;
            }
        };
        if self.paused {
            engine.registry.error_to(conn_id, "game is paused");
            return;
        }
        if self.phase != TriviaPhase::Challenge {
            engine.registry.error_to(conn_id, "no challenge running");
            return;
        }
        let (matches_challenge, is_target, correct) = match &self.current_challenge {
            Some(challenge) => (
                challenge.id == id,
                challenge.target_player_ids.contains(&player_id),
                challenge.correct_answer.as_ref().map(|answer| {
                    answer.trim().eq_ignore_ascii_case(value.trim())
                }),
            ),
            None => (false, false, None),
        };
        if !matches_challenge {
            engine.registry.error_to(conn_id, "that challenge is over");
            return;
        }
        if !is_target {
            engine.registry.error_to(conn_id, "this one is not for you");
            return;
        }
        let correct = match correct {
            Some(correct) => correct,
            None => {
                engine
                    .registry
                    .error_to(conn_id, "this challenge is ruled by the host");
                return;
            }
        };
        let drinks = if correct {
            Vec::new()
        } else {
            self.penalize_targets("wrong answer")
        };
        self.finish_challenge(engine, drinks);
    }

    /// Privileged pass/fail ruling for challenges without a correct answer.
    fn handle_ruling(&mut self, engine: &mut Engine, conn_id: u64, id: String, value: String) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.paused {
            engine.registry.error_to(conn_id, "game is paused");
            return;
        }
        if self.phase != TriviaPhase::Challenge {
            engine.registry.error_to(conn_id, "no challenge running");
            return;
        }
        let matches_challenge = self
            .current_challenge
            .as_ref()
            .map(|c| c.id == id)
            .unwrap_or(false);
        if !matches_challenge {
            engine.registry.error_to(conn_id, "that challenge is over");
            return;
        }
        let drinks = match value.as_str() {
            "pass" => Vec::new(),
            "fail" => self.penalize_targets("failed the challenge"),
            _ => {
                engine.registry.error_to(conn_id, "vote pass or fail");
                return;
            }
        };
        self.finish_challenge(engine, drinks);
    }

    fn handle_end_game(&mut self, engine: &mut Engine, conn_id: u64) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.phase == TriviaPhase::Lobby {
            engine.registry.error_to(conn_id, "no game in progress");
            return;
        }
        engine.timers.cancel_all();
        self.phase = TriviaPhase::Lobby;
        self.current_challenge = None;
        self.countdown_target = None;
        self.paused = false;
        engine
            .registry
            .broadcast(&ServerNotice::GameEnd { awards: None });
        self.broadcast_state(engine);
    }

    fn handle_kick(&mut self, engine: &mut Engine, conn_id: u64, player_id: String) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.roster.remove(&player_id).is_none() {
            engine.registry.error_to(conn_id, "no such player");
            return;
        }
        engine.registry.close_player(&player_id);
        if let Some(challenge) = &self.current_challenge {
            if challenge.target_player_ids.contains(&player_id) {
                // Their challenge leaves with them.
                self.finish_challenge(engine, Vec::new());
                engine
                    .registry
                    .broadcast(&ServerNotice::PlayerLeft { player_id });
                return;
            }
        }
        engine
            .registry
            .broadcast(&ServerNotice::PlayerLeft { player_id });
        self.broadcast_state(engine);
    }

    fn handle_pause(&mut self, engine: &mut Engine, conn_id: u64) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.paused || self.phase == TriviaPhase::Lobby {
            engine.registry.error_to(conn_id, "nothing to pause");
            return;
        }
        engine.timers.pause();
        self.paused = true;
        engine.registry.broadcast(&ServerNotice::Paused);
        self.broadcast_state(engine);
    }

    fn handle_resume(&mut self, engine: &mut Engine, conn_id: u64) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if !self.paused {
            engine.registry.error_to(conn_id, "not paused");
            return;
        }
        engine.timers.resume();
        self.paused = false;
        self.countdown_target = engine.timers.deadline_unix_ms(TimerKind::Countdown);
        engine.registry.broadcast(&ServerNotice::Resumed);
        self.broadcast_state(engine);
    }
}

impl GameMode for TriviaMode {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::Trivia(self.state())
    }

    fn on_command(&mut self, engine: &mut Engine, conn_id: u64, command: ClientCommand) {
        match command {
            ClientCommand::HostConnect => {
                engine.registry.mark_privileged(conn_id);
                self.host_connected = true;
                self.broadcast_state(engine);
            }
            ClientCommand::Join { name, avatar } => self.handle_join(engine, conn_id, name, avatar),
            ClientCommand::StartGame { settings } => self.handle_start(engine, conn_id, settings),
            ClientCommand::EndGame => self.handle_end_game(engine, conn_id),
            ClientCommand::PauseGame => self.handle_pause(engine, conn_id),
            ClientCommand::ResumeGame => self.handle_resume(engine, conn_id),
            ClientCommand::KickPlayer { player_id } => self.handle_kick(engine, conn_id, player_id),
            ClientCommand::UpdateSettings { settings } => {
                if !self.require_privileged(engine, conn_id) {
                    return;
                }
                if self.phase != TriviaPhase::Lobby {
                    engine
                        .registry
                        .error_to(conn_id, "settings can only change in the lobby");
                    return;
                }
                self.settings.apply(&settings);
                self.broadcast_state(engine);
            }
            ClientCommand::Answer { id, value } => self.handle_answer(engine, conn_id, id, value),
            ClientCommand::Vote { id, value } => self.handle_ruling(engine, conn_id, id, value),
            _ => engine
                .registry
                .error_to(conn_id, "not available in this game"),
        }
    }

    fn on_timer(&mut self, engine: &mut Engine, kind: TimerKind) {
        match kind {
            TimerKind::Countdown if self.phase == TriviaPhase::Countdown => {
                self.start_challenge(engine)
            }
            TimerKind::Challenge if self.phase == TriviaPhase::Challenge => {
                let drinks = self.penalize_targets("ran out of time");
                self.finish_challenge(engine, drinks);
            }
            TimerKind::Result if self.phase == TriviaPhase::Result => self.start_countdown(engine),
            _ => {}
        }
    }

    fn on_disconnect(&mut self, engine: &mut Engine, player_id: Option<String>, privileged: bool) {
        if privileged {
            self.host_connected = false;
        }
        if let Some(player_id) = player_id {
            self.roster.mark_connected(&player_id, false);
            engine
                .registry
                .broadcast(&ServerNotice::PlayerLeft { player_id });
        }
        self.broadcast_state(engine);
    }
}
