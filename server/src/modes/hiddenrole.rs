//! Hidden-role mode: one secretly chosen ghost works through private
//! missions and haunts the table with house rules; everyone else tries to
//! name them in the final vote.

use log::info;
use rand::seq::SliceRandom;
use shared::command::{ClientCommand, SettingsPatch};
use shared::hiddenrole::{
    HiddenRolePhase, HiddenRolePlayer, HiddenRoleSettings, HiddenRoleState, Mission, PrivateRole,
    VotingOutcome,
};
use shared::notice::{PlayerCard, ServerNotice, StateSnapshot};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use crate::content;
use crate::roster::Roster;
use crate::session::{Engine, GameMode};
use crate::timer::TimerKind;
use crate::utils::unix_ms;

const MIN_PLAYERS: usize = 3;

pub struct HiddenRoleMode {
    phase: HiddenRolePhase,
    settings: HiddenRoleSettings,
    roster: Roster<HiddenRolePlayer>,
    ghost_id: Option<String>,
    current_mission: Option<Mission>,
    completed_missions: Vec<String>,
    used_missions: HashSet<String>,
    used_rules: HashSet<String>,
    house_rules: Vec<String>,
    haunt_count: u32,
    last_haunt_ms: Option<u64>,
    votes: BTreeMap<String, String>,
    voting_result: Option<VotingOutcome>,
    game_timer_end: Option<u64>,
    voting_timer_end: Option<u64>,
    paused: bool,
    host_connected: bool,
}

impl Default for HiddenRoleMode {
    fn default() -> Self {
        Self::new()
    }
}

impl HiddenRoleMode {
    pub fn new() -> Self {
        Self {
            phase: HiddenRolePhase::Lobby,
            settings: HiddenRoleSettings::default(),
            roster: Roster::new(),
            ghost_id: None,
            current_mission: None,
            completed_missions: Vec::new(),
            used_missions: HashSet::new(),
            used_rules: HashSet::new(),
            house_rules: Vec::new(),
            haunt_count: 0,
            last_haunt_ms: None,
            votes: BTreeMap::new(),
            voting_result: None,
            game_timer_end: None,
            voting_timer_end: None,
            paused: false,
            host_connected: false,
        }
    }

    fn state(&self) -> HiddenRoleState {
        HiddenRoleState {
            phase: self.phase,
            players: self.roster.players().to_vec(),
            settings: self.settings,
            game_timer_end: self.game_timer_end,
            voting_timer_end: self.voting_timer_end,
            house_rules: self.house_rules.clone(),
            haunt_count: self.haunt_count,
            votes: self.votes.clone(),
            voting_result: self.voting_result.clone(),
            paused: self.paused,
            host_connected: self.host_connected,
        }
    }

    fn broadcast_state(&self, engine: &Engine) {
        engine.registry.broadcast(&ServerNotice::State {
            state: StateSnapshot::HiddenRole(self.state()),
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

    fn private_role_for(&self, player_id: &str) -> PrivateRole {
        match (&self.ghost_id, &self.current_mission) {
            (Some(ghost), Some(mission)) if ghost == player_id => PrivateRole::Ghost {
                current_mission: mission.clone(),
                completed_mission_ids: self.completed_missions.clone(),
            },
            _ => PrivateRole::Mortal,
        }
    }

    fn send_private_state(&self, engine: &Engine, player_id: &str) {
        engine.registry.send_to_player(
            player_id,
            &ServerNotice::PrivateState {
                private_state: self.private_role_for(player_id),
            },
        );
    }

    fn handle_join(&mut self, engine: &mut Engine, conn_id: u64, name: String, avatar: String) {
        if name.trim().is_empty() {
            engine.registry.error_to(conn_id, "name required");
            return;
        }
        if let Some(player_id) = self.roster.reclaim_by_name(&name) {
            engine.registry.attach_player(conn_id, &player_id);
            engine.registry.send(
                conn_id,
                &ServerNotice::AssignedId {
                    player_id: player_id.clone(),
                },
            );
            if self.phase != HiddenRolePhase::Lobby {
                // A reconnecting ghost gets their mission back.
                self.send_private_state(engine, &player_id);
            }
            self.broadcast_state(engine);
            return;
        }
        if self.phase != HiddenRolePhase::Lobby {
            engine.registry.error_to(conn_id, "game already in progress");
            return;
        }
        let player_id = self.roster.allocate_id(&mut engine.rng);
        let player = HiddenRolePlayer {
            id: player_id.clone(),
            name,
            avatar,
            connected: true,
        };
        engine.registry.attach_player(conn_id, &player_id);
        engine
            .registry
            .send(conn_id, &ServerNotice::AssignedId { player_id });
        engine.registry.broadcast(&ServerNotice::PlayerJoined {
            player: PlayerCard::HiddenRole(player.clone()),
        });
        self.roster.add(player);
        self.broadcast_state(engine);
    }

    fn handle_start(&mut self, engine: &mut Engine, conn_id: u64, patch: Option<SettingsPatch>) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.phase != HiddenRolePhase::Lobby {
            engine.registry.error_to(conn_id, "game already running");
            return;
        }
        if let Some(patch) = patch {
            self.settings.apply(&patch);
        }
        // The ghost must be outnumbered for the vote to mean anything.
        if self.roster.connected_count() < MIN_PLAYERS {
            engine
                .registry
                .error_to(conn_id, "need at least 3 connected players");
            return;
        }
        let ghost = match self
            .roster
            .connected_ids()
            .as_slice()
            .choose(&mut engine.rng)
        {
            Some(id) => id.clone(),
            None => return,
        };
        self.ghost_id = Some(ghost);
        self.completed_missions.clear();
        self.used_missions.clear();
        self.used_rules.clear();
        self.house_rules.clear();
        self.haunt_count = 0;
        self.last_haunt_ms = None;
        self.votes.clear();
        self.voting_result = None;
        let mission = content::draw_mission(&mut engine.rng, &self.used_missions);
        self.used_missions.insert(mission.id.clone());
        self.current_mission = Some(mission);
        self.phase = HiddenRolePhase::Playing;
        engine.timers.schedule(
            TimerKind::Game,
            Duration::from_secs(self.settings.game_duration_seconds),
        );
        self.game_timer_end = engine.timers.deadline_unix_ms(TimerKind::Game);
        info!("Hidden-role game started with {} players", self.roster.len());
        for player_id in self.roster.connected_ids() {
            self.send_private_state(engine, &player_id);
        }
        self.broadcast_state(engine);
    }

    fn handle_haunt(&mut self, engine: &mut Engine, conn_id: u64) {
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
        if self.phase != HiddenRolePhase::Playing {
            engine.registry.error_to(conn_id, "nothing to haunt yet");
            return;
        }
        if self.ghost_id.as_deref() != Some(player_id.as_str()) {
            engine.registry.error_to(conn_id, "you are no ghost");
            return;
        }
        let now = unix_ms();
        let cooldown_ms = self.settings.haunt_cooldown_seconds * 1000;
        if let Some(last) = self.last_haunt_ms {
            if now.saturating_sub(last) < cooldown_ms {
                engine
                    .registry
                    .error_to(conn_id, "the spirits need a moment");
                return;
            }
        }
        self.last_haunt_ms = Some(now);
        self.haunt_count += 1;
        let rule = content::draw_house_rule(&mut engine.rng, &self.used_rules);
        self.used_rules.insert(rule.to_string());
        self.house_rules.push(rule.to_string());
        if let Some(mission) = self.current_mission.take() {
            self.completed_missions.push(mission.id);
        }
        let mission = content::draw_mission(&mut engine.rng, &self.used_missions);
        self.used_missions.insert(mission.id.clone());
        engine.registry.send_to_player(
            &player_id,
            &ServerNotice::NewMission {
                mission: mission.clone(),
            },
        );
        self.current_mission = Some(mission);
        engine.registry.broadcast(&ServerNotice::HauntTriggered);
        self.send_private_state(engine, &player_id);
        self.broadcast_state(engine);
    }

    fn start_voting(&mut self, engine: &mut Engine) {
        self.phase = HiddenRolePhase::Voting;
        self.game_timer_end = None;
        self.votes.clear();
        engine.timers.schedule(
            TimerKind::Voting,
            Duration::from_secs(self.settings.voting_duration_seconds),
        );
        self.voting_timer_end = engine.timers.deadline_unix_ms(TimerKind::Voting);
        engine.registry.broadcast(&ServerNotice::VotingStarted);
        self.broadcast_state(engine);
    }

    fn handle_vote(&mut self, engine: &mut Engine, conn_id: u64, target: String) {
        let voter = match engine.registry.player_id(conn_id) {
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
        if self.phase != HiddenRolePhase::Voting {
            engine.registry.error_to(conn_id, "voting has not started");
            return;
        }
        if self.ghost_id.as_deref() == Some(voter.as_str()) {
            engine
                .registry
                .error_to(conn_id, "the accused does not get a ballot");
            return;
        }
        if !self.roster.contains(&target) {
            engine.registry.error_to(conn_id, "no such player");
            return;
        }
        // Re-votes overwrite.
        self.votes.insert(voter, target);
        if self.mortal_quorum_met() {
            self.resolve_voting(engine);
        } else {
            self.broadcast_state(engine);
        }
    }

    fn mortal_quorum_met(&self) -> bool {
        self.roster
            .connected_ids()
            .iter()
            .filter(|id| self.ghost_id.as_deref() != Some(id.as_str()))
            .all(|id| self.votes.contains_key(id))
    }

    fn resolve_voting(&mut self, engine: &mut Engine) {
        engine.timers.cancel(TimerKind::Voting);
        self.voting_timer_end = None;
        let ghost_id = match self.ghost_id.clone() {
            Some(id) => id,
            None => return,
        };
        let mut vote_counts: BTreeMap<String, u32> = BTreeMap::new();
        for target in self.votes.values() {
            *vote_counts.entry(target.clone()).or_insert(0) += 1;
        }
        // Roster order breaks ties deterministically.
        let mut accused: Option<(&str, u32)> = None;
        for player in self.roster.iter() {
            let count = vote_counts.get(&player.id).copied().unwrap_or(0);
            if accused.map(|(_, best)| count > best).unwrap_or(count > 0) {
                accused = Some((&player.id, count));
            }
        }
        let correct_guess = accused.map(|(id, _)| id == ghost_id).unwrap_or(false);
        let (ghost_name, ghost_avatar) = self
            .roster
            .get(&ghost_id)
            .map(|p| (p.name.clone(), p.avatar.clone()))
            .unwrap_or_default();
        let result = VotingOutcome {
            ghost_id,
            ghost_name,
            ghost_avatar,
            correct_guess,
            vote_counts,
        };
        engine.registry.broadcast(&ServerNotice::VotingResult {
            result: result.clone(),
        });
        self.voting_result = Some(result);
        self.phase = HiddenRolePhase::Result;
        self.broadcast_state(engine);
    }

    fn handle_end_game(&mut self, engine: &mut Engine, conn_id: u64) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.phase == HiddenRolePhase::Lobby {
            engine.registry.error_to(conn_id, "no game in progress");
            return;
        }
        engine.timers.cancel_all();
        self.phase = HiddenRolePhase::Lobby;
        self.ghost_id = None;
        self.current_mission = None;
        self.completed_missions.clear();
        self.house_rules.clear();
        self.haunt_count = 0;
        self.last_haunt_ms = None;
        self.votes.clear();
        self.voting_result = None;
        self.game_timer_end = None;
        self.voting_timer_end = None;
        self.paused = false;
        engine
            .registry
            .broadcast(&ServerNotice::GameEnd { awards: None });
        self.broadcast_state(engine);
    }

    fn handle_pause(&mut self, engine: &mut Engine, conn_id: u64) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.paused || self.phase == HiddenRolePhase::Lobby {
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
        self.game_timer_end = engine.timers.deadline_unix_ms(TimerKind::Game);
        self.voting_timer_end = engine.timers.deadline_unix_ms(TimerKind::Voting);
        engine.registry.broadcast(&ServerNotice::Resumed);
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
        self.votes.remove(&player_id);
        engine.registry.broadcast(&ServerNotice::PlayerLeft {
            player_id: player_id.clone(),
        });
        if self.ghost_id.as_deref() == Some(player_id.as_str())
            && self.phase != HiddenRolePhase::Lobby
        {
            // No ghost, no game.
            engine.timers.cancel_all();
            self.phase = HiddenRolePhase::Lobby;
            self.ghost_id = None;
            self.current_mission = None;
            self.game_timer_end = None;
            self.voting_timer_end = None;
            engine
                .registry
                .broadcast(&ServerNotice::GameEnd { awards: None });
        } else if self.phase == HiddenRolePhase::Voting && self.mortal_quorum_met() {
            self.resolve_voting(engine);
            return;
        }
        self.broadcast_state(engine);
    }
}

impl GameMode for HiddenRoleMode {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::HiddenRole(self.state())
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
                if self.phase != HiddenRolePhase::Lobby {
                    engine
                        .registry
                        .error_to(conn_id, "settings can only change in the lobby");
                    return;
                }
                self.settings.apply(&settings);
                self.broadcast_state(engine);
            }
            ClientCommand::Haunt => self.handle_haunt(engine, conn_id),
            ClientCommand::Vote { value, .. } => self.handle_vote(engine, conn_id, value),
            _ => engine
                .registry
                .error_to(conn_id, "not available in this game"),
        }
    }

    fn on_timer(&mut self, engine: &mut Engine, kind: TimerKind) {
        match kind {
            TimerKind::Game if self.phase == HiddenRolePhase::Playing => self.start_voting(engine),
            TimerKind::Voting if self.phase == HiddenRolePhase::Voting => {
                self.resolve_voting(engine)
            }
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
            if self.phase == HiddenRolePhase::Voting && self.mortal_quorum_met() {
                self.resolve_voting(engine);
                return;
            }
        }
        self.broadcast_state(engine);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionMessage;
    use tokio::sync::mpsc;

    struct Rig {
        mode: HiddenRoleMode,
        engine: Engine,
        _timer_rx: mpsc::UnboundedReceiver<SessionMessage>,
        outboxes: Vec<(u64, mpsc::UnboundedReceiver<String>)>,
    }

    fn rig(seed: u64) -> Rig {
        let (tx, timer_rx) = mpsc::unbounded_channel();
        Rig {
            mode: HiddenRoleMode::new(),
            engine: Engine::new(tx, Some(seed)),
            _timer_rx: timer_rx,
            outboxes: Vec::new(),
        }
    }

    impl Rig {
        fn connect(&mut self, conn_id: u64) {
            let (tx, rx) = mpsc::unbounded_channel();
            self.engine.registry.register(conn_id, tx);
            self.outboxes.push((conn_id, rx));
        }

        fn host(&mut self, conn_id: u64) {
            self.connect(conn_id);
            self.mode
                .on_command(&mut self.engine, conn_id, ClientCommand::HostConnect);
        }

        fn join(&mut self, conn_id: u64, name: &str) -> String {
            self.connect(conn_id);
            self.mode.on_command(
                &mut self.engine,
                conn_id,
                ClientCommand::Join {
                    name: name.to_string(),
                    avatar: String::new(),
                },
            );
            self.engine.registry.player_id(conn_id).unwrap()
        }

        fn start(&mut self, host_conn: u64) {
            self.mode.on_command(
                &mut self.engine,
                host_conn,
                ClientCommand::StartGame { settings: None },
            );
        }

        fn frames_for(&mut self, conn_id: u64) -> Vec<String> {
            let mut frames = Vec::new();
            for (id, rx) in self.outboxes.iter_mut() {
                if *id == conn_id {
                    while let Ok(frame) = rx.try_recv() {
                        frames.push(frame);
                    }
                }
            }
            frames
        }

        fn ghost_conn(&self) -> u64 {
            let ghost = self.mode.ghost_id.clone().unwrap();
            self.engine.registry.connection_of(&ghost).unwrap()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn start_needs_three_players() {
        let mut rig = rig(1);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0);
        assert_eq!(rig.mode.phase, HiddenRolePhase::Lobby);

        rig.join(3, "Cy");
        rig.start(0);
        assert_eq!(rig.mode.phase, HiddenRolePhase::Playing);
        assert!(rig.mode.ghost_id.is_some());
        assert!(rig.mode.game_timer_end.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn private_state_reveals_role_only_to_the_ghost() {
        let mut rig = rig(2);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.join(3, "Cy");
        rig.start(0);

        let ghost_conn = rig.ghost_conn();
        for conn in [1u64, 2, 3] {
            let frames = rig.frames_for(conn);
            let private = frames
                .iter()
                .filter(|f| f.contains("\"type\":\"private-state\""))
                .last()
                .cloned()
                .unwrap();
            if conn == ghost_conn {
                assert!(private.contains("\"role\":\"ghost\""));
                assert!(private.contains("currentMission"));
            } else {
                assert!(private.contains("\"role\":\"mortal\""));
            }
        }
        // The broadcast snapshot never names the ghost.
        let ghost_id = rig.mode.ghost_id.clone().unwrap();
        let state_json = serde_json::to_string(&rig.mode.state()).unwrap();
        assert!(!state_json.contains(&format!("\"ghostId\":\"{}\"", ghost_id)));
    }

    #[tokio::test(start_paused = true)]
    async fn haunt_is_ghost_only_with_cooldown() {
        let mut rig = rig(3);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.join(3, "Cy");
        rig.start(0);

        let ghost_conn = rig.ghost_conn();
        let mortal_conn = [1u64, 2, 3]
            .into_iter()
            .find(|c| *c != ghost_conn)
            .unwrap();

        rig.mode.on_command(&mut rig.engine, mortal_conn, ClientCommand::Haunt);
        assert_eq!(rig.mode.haunt_count, 0);

        rig.mode.on_command(&mut rig.engine, ghost_conn, ClientCommand::Haunt);
        assert_eq!(rig.mode.haunt_count, 1);
        assert_eq!(rig.mode.house_rules.len(), 1);
        assert_eq!(rig.mode.completed_missions.len(), 1);

        // Immediately haunting again hits the cooldown.
        rig.mode.on_command(&mut rig.engine, ghost_conn, ClientCommand::Haunt);
        assert_eq!(rig.mode.haunt_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn ghost_ballot_is_rejected_and_mortal_quorum_resolves_early() {
        let mut rig = rig(4);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.join(3, "Cy");
        rig.start(0);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Game);
        assert_eq!(rig.mode.phase, HiddenRolePhase::Voting);

        let ghost_conn = rig.ghost_conn();
        let ghost_id = rig.mode.ghost_id.clone().unwrap();
        rig.mode.on_command(
            &mut rig.engine,
            ghost_conn,
            ClientCommand::Vote {
                id: "ghost".to_string(),
                value: ghost_id.clone(),
            },
        );
        assert!(rig.mode.votes.is_empty());

        // Both mortals accuse the actual ghost: quorum, early resolution.
        for conn in [1u64, 2, 3] {
            if conn == ghost_conn {
                continue;
            }
            rig.mode.on_command(
                &mut rig.engine,
                conn,
                ClientCommand::Vote {
                    id: "ghost".to_string(),
                    value: ghost_id.clone(),
                },
            );
        }
        assert_eq!(rig.mode.phase, HiddenRolePhase::Result);
        let result = rig.mode.voting_result.as_ref().unwrap();
        assert!(result.correct_guess);
        assert_eq!(result.ghost_id, ghost_id);
    }

    #[tokio::test(start_paused = true)]
    async fn voting_timeout_resolves_with_cast_votes() {
        let mut rig = rig(5);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.join(3, "Cy");
        rig.start(0);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Game);

        let ghost_conn = rig.ghost_conn();
        let ghost_id = rig.mode.ghost_id.clone().unwrap();
        let a_mortal = [1u64, 2, 3]
            .into_iter()
            .find(|c| *c != ghost_conn)
            .unwrap();
        rig.mode.on_command(
            &mut rig.engine,
            a_mortal,
            ClientCommand::Vote {
                id: "ghost".to_string(),
                value: ghost_id.clone(),
            },
        );
        assert_eq!(rig.mode.phase, HiddenRolePhase::Voting);

        rig.mode.on_timer(&mut rig.engine, TimerKind::Voting);
        assert_eq!(rig.mode.phase, HiddenRolePhase::Result);
        assert!(rig.mode.voting_result.as_ref().unwrap().correct_guess);
    }
}
