//! Betting mode: stake drinks on a racer, watch the server-driven race,
//! drink your losses. Winners get a distribution budget to hand out.

use log::info;
use rand::Rng;
use shared::betting::{
    Bet, BettingPhase, BettingPlayer, BettingSettings, BettingState, DrinkKind, DrinkTransfer,
    Racer, RACER_COLORS, RACER_NAMES, SIPS_PER_SHOT,
};
use shared::command::{ClientCommand, SettingsPatch};
use shared::notice::{PlayerCard, ServerNotice, StateSnapshot};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::roster::Roster;
use crate::session::{Engine, GameMode};
use crate::timer::TimerKind;

/// Most sips a player can stake in one betting window.
const MAX_STAKE_SIPS: u32 = 6;
/// Winners hand out twice what they staked on the winning racer.
const PAYOUT_FACTOR: u32 = 2;
const RACE_TICK_MS: u64 = 100;
const FINISH_LINE: f32 = 100.0;

pub struct BettingMode {
    phase: BettingPhase,
    settings: BettingSettings,
    roster: Roster<BettingPlayer>,
    racers: Vec<Racer>,
    bets: BTreeMap<String, Vec<Bet>>,
    winning_racer: Option<usize>,
    round_number: u32,
    phase_end_time: Option<u64>,
    winner_budgets: BTreeMap<String, u32>,
    drink_assignments: Vec<DrinkTransfer>,
    paused: bool,
    host_connected: bool,
}

impl Default for BettingMode {
    fn default() -> Self {
        Self::new()
    }
}

impl BettingMode {
    pub fn new() -> Self {
        Self {
            phase: BettingPhase::Lobby,
            settings: BettingSettings::default(),
            roster: Roster::new(),
            racers: Vec::new(),
            bets: BTreeMap::new(),
            winning_racer: None,
            round_number: 0,
            phase_end_time: None,
            winner_budgets: BTreeMap::new(),
            drink_assignments: Vec::new(),
            paused: false,
            host_connected: false,
        }
    }

    fn state(&self) -> BettingState {
        BettingState {
            phase: self.phase,
            players: self.roster.players().to_vec(),
            settings: self.settings,
            racers: self.racers.clone(),
            bets: self.bets.clone(),
            winning_racer: self.winning_racer,
            round_number: self.round_number,
            phase_end_time: self.phase_end_time,
            winner_budgets: self.winner_budgets.clone(),
            drink_assignments: self.drink_assignments.clone(),
            paused: self.paused,
            host_connected: self.host_connected,
        }
    }

    fn broadcast_state(&self, engine: &Engine) {
        engine.registry.broadcast(&ServerNotice::State {
            state: StateSnapshot::Betting(self.state()),
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
        if self.phase != BettingPhase::Lobby {
            engine.registry.error_to(conn_id, "game already in progress");
            return;
        }
        let player_id = self.roster.allocate_id(&mut engine.rng);
        let player = BettingPlayer {
            id: player_id.clone(),
            name,
            avatar,
            connected: true,
            pending_drinks: 0,
            total_drinks: 0,
        };
        engine.registry.attach_player(conn_id, &player_id);
        engine
            .registry
            .send(conn_id, &ServerNotice::AssignedId { player_id });
        engine.registry.broadcast(&ServerNotice::PlayerJoined {
            player: PlayerCard::Betting(player.clone()),
        });
        self.roster.add(player);
        self.broadcast_state(engine);
    }

    fn build_racers(&mut self) {
        self.racers = (0..self.settings.num_racers)
            .map(|id| Racer {
                id,
                position: 0.0,
                color: RACER_COLORS[id].to_string(),
                name: RACER_NAMES[id].to_string(),
            })
            .collect();
    }

    fn begin_betting(&mut self, engine: &mut Engine) {
        self.round_number += 1;
        self.build_racers();
        self.bets.clear();
        self.winning_racer = None;
        self.winner_budgets.clear();
        self.drink_assignments.clear();
        self.phase = BettingPhase::Betting;
        engine.timers.schedule(
            TimerKind::Bet,
            Duration::from_secs(self.settings.bet_timer_seconds),
        );
        self.phase_end_time = engine.timers.deadline_unix_ms(TimerKind::Bet);
        if let Some(end_time) = self.phase_end_time {
            engine
                .registry
                .broadcast(&ServerNotice::BettingStarted { end_time });
        }
        info!("Betting round {} open", self.round_number);
        self.broadcast_state(engine);
    }

    fn handle_start(&mut self, engine: &mut Engine, conn_id: u64, patch: Option<SettingsPatch>) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.phase != BettingPhase::Lobby {
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
        self.round_number = 0;
        for player in self.roster.iter_mut() {
            player.pending_drinks = 0;
            player.total_drinks = 0;
        }
        self.begin_betting(engine);
    }

    fn handle_place_bet(&mut self, engine: &mut Engine, conn_id: u64, bet: Bet) {
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
        if self.phase != BettingPhase::Betting {
            engine.registry.error_to(conn_id, "betting is closed");
            return;
        }
        if bet.racer_id >= self.racers.len() {
            engine.registry.error_to(conn_id, "no such racer");
            return;
        }
        if bet.amount == 0 {
            engine.registry.error_to(conn_id, "stake something");
            return;
        }
        // A re-bet on the same racer replaces the earlier stake, so the
        // replaced amount does not count against the cap.
        let staked: u32 = self
            .bets
            .get(&player_id)
            .map(|bets| {
                bets.iter()
                    .filter(|b| b.racer_id != bet.racer_id)
                    .map(Bet::stake_sips)
                    .sum()
            })
            .unwrap_or(0);
        if staked + bet.stake_sips() > MAX_STAKE_SIPS {
            engine
                .registry
                .error_to(conn_id, "stake limit reached for this round");
            return;
        }
        let entry = self.bets.entry(player_id.clone()).or_default();
        match entry.iter_mut().find(|b| b.racer_id == bet.racer_id) {
            Some(slot) => *slot = bet,
            None => entry.push(bet),
        }
        engine.registry.broadcast(&ServerNotice::BetPlaced {
            player_id,
            racer_id: bet.racer_id,
        });
        self.broadcast_state(engine);
    }

    fn start_race(&mut self, engine: &mut Engine) {
        engine.timers.cancel(TimerKind::Bet);
        self.phase = BettingPhase::Racing;
        self.phase_end_time = None;
        engine
            .timers
            .schedule_repeating(TimerKind::RaceTick, Duration::from_millis(RACE_TICK_MS));
        engine.registry.broadcast(&ServerNotice::RaceStarted);
        self.broadcast_state(engine);
    }

    fn race_tick(&mut self, engine: &mut Engine) {
        for racer in &mut self.racers {
            racer.position += engine.rng.gen_range(0.0..8.0);
        }
        engine.registry.broadcast(&ServerNotice::RaceUpdate {
            racers: self.racers.clone(),
        });
        let finished = self
            .racers
            .iter()
            .any(|racer| racer.position >= FINISH_LINE);
        if finished {
            self.finish_race(engine);
        }
    }

    /// Furthest past the line wins when several cross on the same tick.
    fn pick_winner(&self) -> Option<usize> {
        self.racers
            .iter()
            .max_by(|a, b| a.position.total_cmp(&b.position))
            .map(|racer| racer.id)
    }

    fn finish_race(&mut self, engine: &mut Engine) {
        engine.timers.cancel(TimerKind::RaceTick);
        let winning_racer = match self.pick_winner() {
            Some(id) => id,
            None => return,
        };
        self.winning_racer = Some(winning_racer);
        engine
            .registry
            .broadcast(&ServerNotice::RaceFinished { winning_racer });

        for (player_id, bets) in &self.bets {
            let mut lost_sips = 0;
            let mut won_sips = 0;
            for bet in bets {
                if bet.racer_id == winning_racer {
                    won_sips += bet.stake_sips();
                } else {
                    lost_sips += bet.stake_sips();
                }
            }
            if lost_sips > 0 {
                // A lost stake is a drink you owe yourself.
                if let Some(player) = self.roster.get_mut(player_id) {
                    player.pending_drinks += lost_sips;
                    player.total_drinks += lost_sips;
                }
                self.drink_assignments.push(DrinkTransfer {
                    from_player_id: player_id.clone(),
                    to_player_id: player_id.clone(),
                    amount: lost_sips,
                    kind: DrinkKind::Sip,
                });
            }
            if won_sips > 0 {
                self.winner_budgets
                    .insert(player_id.clone(), won_sips * PAYOUT_FACTOR);
            }
        }

        if self.winner_budgets.is_empty() {
            self.finish_distribution(engine);
        } else {
            self.phase = BettingPhase::Distribution;
            engine.timers.schedule(
                TimerKind::Distribution,
                Duration::from_secs(self.settings.distribution_timer_seconds),
            );
            self.phase_end_time = engine.timers.deadline_unix_ms(TimerKind::Distribution);
            if let Some(end_time) = self.phase_end_time {
                engine
                    .registry
                    .broadcast(&ServerNotice::DistributionStarted { end_time });
            }
            self.broadcast_state(engine);
        }
    }

    fn handle_give_drink(
        &mut self,
        engine: &mut Engine,
        conn_id: u64,
        to_player_id: String,
        amount: u32,
        kind: DrinkKind,
    ) {
        let giver = match engine.registry.player_id(conn_id) {
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
        if self.phase != BettingPhase::Distribution {
            engine.registry.error_to(conn_id, "nothing to hand out");
            return;
        }
        let sips = match kind {
            DrinkKind::Sip => amount,
            DrinkKind::Shot => amount * SIPS_PER_SHOT,
        };
        if sips == 0 {
            engine.registry.error_to(conn_id, "give something");
            return;
        }
        if giver == to_player_id {
            engine.registry.error_to(conn_id, "pick someone else");
            return;
        }
        if !self.roster.contains(&to_player_id) {
            engine.registry.error_to(conn_id, "no such player");
            return;
        }
        let budget = match self.winner_budgets.get_mut(&giver) {
            Some(budget) if *budget >= sips => budget,
            Some(_) => {
                engine.registry.error_to(conn_id, "not enough budget left");
                return;
            }
            None => {
                engine.registry.error_to(conn_id, "winners only");
                return;
            }
        };
        *budget -= sips;
        if let Some(target) = self.roster.get_mut(&to_player_id) {
            target.pending_drinks += sips;
            target.total_drinks += sips;
        }
        let drink = DrinkTransfer {
            from_player_id: giver.clone(),
            to_player_id,
            amount,
            kind,
        };
        self.drink_assignments.push(drink.clone());
        engine.registry.broadcast(&ServerNotice::DrinkGiven { drink });
        let exhausted = self.winner_budgets.values().all(|budget| *budget == 0);
        if exhausted {
            // Everyone spent up, no point waiting out the clock.
            engine.timers.cancel(TimerKind::Distribution);
            self.finish_distribution(engine);
        } else {
            self.broadcast_state(engine);
        }
    }

    fn finish_distribution(&mut self, engine: &mut Engine) {
        // Unspent budget is forfeited.
        self.winner_budgets.clear();
        self.phase = BettingPhase::Results;
        self.phase_end_time = None;
        engine.registry.broadcast(&ServerNotice::RoundResults {
            drink_assignments: self.drink_assignments.clone(),
        });
        self.broadcast_state(engine);
    }

    fn handle_next_round(&mut self, engine: &mut Engine, conn_id: u64) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.phase != BettingPhase::Results {
            engine.registry.error_to(conn_id, "round still running");
            return;
        }
        self.begin_betting(engine);
    }

    fn handle_end_game(&mut self, engine: &mut Engine, conn_id: u64) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.phase == BettingPhase::Lobby {
            engine.registry.error_to(conn_id, "no game in progress");
            return;
        }
        engine.timers.cancel_all();
        self.phase = BettingPhase::Lobby;
        self.racers.clear();
        self.bets.clear();
        self.winning_racer = None;
        self.winner_budgets.clear();
        self.drink_assignments.clear();
        self.phase_end_time = None;
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
        if self.paused || self.phase == BettingPhase::Lobby {
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
        self.phase_end_time = match self.phase {
            BettingPhase::Betting => engine.timers.deadline_unix_ms(TimerKind::Bet),
            BettingPhase::Distribution => engine.timers.deadline_unix_ms(TimerKind::Distribution),
            _ => None,
        };
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
        self.bets.remove(&player_id);
        self.winner_budgets.remove(&player_id);
        engine.registry.broadcast(&ServerNotice::PlayerLeft {
            player_id: player_id.clone(),
        });
        if self.phase == BettingPhase::Distribution
            && self.winner_budgets.values().all(|budget| *budget == 0)
        {
            engine.timers.cancel(TimerKind::Distribution);
            self.finish_distribution(engine);
            return;
        }
        self.broadcast_state(engine);
    }
}

impl GameMode for BettingMode {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::Betting(self.state())
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
                if self.phase != BettingPhase::Lobby {
                    engine
                        .registry
                        .error_to(conn_id, "settings can only change in the lobby");
                    return;
                }
                self.settings.apply(&settings);
                self.broadcast_state(engine);
            }
            ClientCommand::PlaceBet { bet } => self.handle_place_bet(engine, conn_id, bet),
            ClientCommand::LockBets => {
                if !self.require_privileged(engine, conn_id) {
                    return;
                }
                if self.phase != BettingPhase::Betting {
                    engine.registry.error_to(conn_id, "no bets to lock");
                    return;
                }
                self.start_race(engine);
            }
            ClientCommand::GiveDrink {
                to_player_id,
                amount,
                drink_type,
            } => self.handle_give_drink(engine, conn_id, to_player_id, amount, drink_type),
            ClientCommand::NextRound => self.handle_next_round(engine, conn_id),
            _ => engine
                .registry
                .error_to(conn_id, "not available in this game"),
        }
    }

    fn on_timer(&mut self, engine: &mut Engine, kind: TimerKind) {
        match kind {
            TimerKind::Bet if self.phase == BettingPhase::Betting => self.start_race(engine),
            TimerKind::RaceTick if self.phase == BettingPhase::Racing => self.race_tick(engine),
            TimerKind::Distribution if self.phase == BettingPhase::Distribution => {
                self.finish_distribution(engine)
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
        }
        self.broadcast_state(engine);
    }
}
