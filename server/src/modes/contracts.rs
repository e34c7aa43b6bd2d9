//! Contracts mode: rounds of offer, action, settlement and result with a
//! token economy, hidden clauses, buyout votes, random mid-round events
//! and tab milestones.
//!
//! Hidden clauses live server-side until revealed; snapshots carry the
//! redacted public views. The hidden amount is charged at settlement only
//! if the clause was revealed before settlement; the force-reveal that
//! settlement itself performs is display-only.

use log::info;
use rand::seq::SliceRandom;
use rand::Rng;
use shared::command::{ClientCommand, SettingsPatch};
use shared::contracts::{
    milestones_for, BuyoutProposal, Contract, ContractEvent, ContractsAwards, ContractsPhase,
    ContractsPlayer, ContractsSettings, ContractsState, Milestone, MilestoneEffect, RoundResult,
    TokenKind, TokenWallet,
};
use shared::notice::{PlayerCard, ServerNotice, StateSnapshot};
use shared::DrinkAssignment;
use std::collections::HashSet;
use std::time::Duration;

use crate::content;
use crate::roster::Roster;
use crate::session::{Engine, GameMode};
use crate::timer::TimerKind;
use crate::utils::random_id;

const OFFER_SECONDS: u64 = 30;
const SETTLEMENT_SECONDS: u64 = 20;
const RESULT_SECONDS: u64 = 8;
const BUYOUT_SECONDS: u64 = 15;
const LAWYER_STRIKE: &str = "Clause stricken by counsel";

pub struct ContractsMode {
    phase: ContractsPhase,
    settings: ContractsSettings,
    roster: Roster<ContractsPlayer>,
    milestones: Vec<Milestone>,
    current_round: u32,
    tab: u32,
    offered: Vec<Contract>,
    active: Vec<Contract>,
    settled: Vec<Contract>,
    used_templates: HashSet<String>,
    signed_this_round: HashSet<String>,
    buyout: Option<BuyoutProposal>,
    round_result: Option<RoundResult>,
    game_result: Option<ContractsAwards>,
    next_seq: u64,
    offer_deadline: Option<u64>,
    round_deadline: Option<u64>,
    buyout_deadline: Option<u64>,
    paused: bool,
    host_connected: bool,
}

impl Default for ContractsMode {
    fn default() -> Self {
        Self::new()
    }
}

impl ContractsMode {
    pub fn new() -> Self {
        let settings = ContractsSettings::default();
        Self {
            phase: ContractsPhase::Lobby,
            milestones: milestones_for(settings.difficulty),
            settings,
            roster: Roster::new(),
            current_round: 0,
            tab: 0,
            offered: Vec::new(),
            active: Vec::new(),
            settled: Vec::new(),
            used_templates: HashSet::new(),
            signed_this_round: HashSet::new(),
            buyout: None,
            round_result: None,
            game_result: None,
            next_seq: 0,
            offer_deadline: None,
            round_deadline: None,
            buyout_deadline: None,
            paused: false,
            host_connected: false,
        }
    }

    fn state(&self) -> ContractsState {
        ContractsState {
            phase: self.phase,
            players: self.roster.players().to_vec(),
            settings: self.settings,
            current_round: self.current_round,
            tab: self.tab,
            milestones: self.milestones.clone(),
            offered_contracts: self.offered.iter().map(Contract::public_view).collect(),
            active_contracts: self.active.iter().map(Contract::public_view).collect(),
            settled_contracts: self.settled.clone(),
            offer_timer_end: self.offer_deadline,
            round_timer_end: self.round_deadline,
            current_buyout: self.buyout.clone(),
            buyout_timer_end: self.buyout_deadline,
            round_result: self.round_result.clone(),
            game_result: self.game_result.clone(),
            paused: self.paused,
            host_connected: self.host_connected,
        }
    }

    fn broadcast_state(&self, engine: &Engine) {
        engine.registry.broadcast(&ServerNotice::State {
            state: StateSnapshot::Contracts(self.state()),
        });
    }

    fn sender_participant(&self, engine: &Engine, conn_id: u64) -> Option<String> {
        let player_id = engine.registry.player_id(conn_id)?;
        self.roster.contains(&player_id).then_some(player_id)
    }

    fn require_privileged(&self, engine: &Engine, conn_id: u64) -> bool {
        if engine.registry.is_privileged(conn_id) {
            true
        } else {
            engine.registry.error_to(conn_id, "host only");
            false
        }
    }

    fn next_id(&mut self, prefix: &str) -> String {
        self.next_seq += 1;
        format!("{}{}", prefix, self.next_seq)
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
        if self.phase != ContractsPhase::Lobby {
            engine.registry.error_to(conn_id, "game already in progress");
            return;
        }
        let player_id = self.roster.allocate_id(&mut engine.rng);
        let player = ContractsPlayer {
            id: player_id.clone(),
            name,
            avatar,
            sips: 0,
            tokens: TokenWallet::default(),
            hedge_armed: false,
            tab_contribution: 0,
            contracts_signed: 0,
            buyouts: 0,
            audits_triggered: 0,
            connected: true,
        };
        engine.registry.attach_player(conn_id, &player_id);
        engine
            .registry
            .send(conn_id, &ServerNotice::AssignedId { player_id });
        engine.registry.broadcast(&ServerNotice::PlayerJoined {
            player: PlayerCard::Contracts(player.clone()),
        });
        info!("Player {} joined", player.name);
        self.roster.add(player);
        self.broadcast_state(engine);
    }

    fn handle_start(&mut self, engine: &mut Engine, conn_id: u64, patch: Option<SettingsPatch>) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.phase != ContractsPhase::Lobby {
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
        self.tab = 0;
        self.current_round = 0;
        self.milestones = milestones_for(self.settings.difficulty);
        self.offered.clear();
        self.active.clear();
        self.settled.clear();
        self.used_templates.clear();
        self.buyout = None;
        self.round_result = None;
        self.game_result = None;
        for player in self.roster.iter_mut() {
            player.sips = 0;
            player.tokens = TokenWallet::default();
            player.hedge_armed = false;
            player.tab_contribution = 0;
            player.contracts_signed = 0;
            player.buyouts = 0;
            player.audits_triggered = 0;
        }
        info!(
            "Starting contracts game: {} rounds, {:?}",
            self.settings.round_count, self.settings.difficulty
        );
        self.begin_round(engine);
    }

    fn begin_round(&mut self, engine: &mut Engine) {
        self.current_round += 1;
        self.signed_this_round.clear();
        self.round_result = None;
        // Growth accrues on everything that survived earlier rounds.
        for contract in self.active.iter_mut() {
            contract.growth_sips += 1;
        }
        let category = if self.current_round >= self.settings.round_count {
            Some(shared::contracts::ContractCategory::Endgame)
        } else {
            None
        };
        let templates = content::draw_contracts(
            &mut engine.rng,
            self.settings.contracts_per_round,
            &self.used_templates,
            category,
        );
        self.offered = templates
            .into_iter()
            .map(|t| {
                self.used_templates.insert(t.id.to_string());
                let id = {
                    self.next_seq += 1;
                    format!("c{}", self.next_seq)
                };
                Contract {
                    id,
                    template_id: t.id.to_string(),
                    category: t.category,
                    visible_text: t.visible.to_string(),
                    hidden_clause: t.hidden.to_string(),
                    hidden_revealed: false,
                    signed_by: None,
                    witnessed_by: Vec::new(),
                    round_created: self.current_round,
                    base_sips: t.base_sips,
                    growth_sips: 0,
                    hidden_sips: t.hidden_sips,
                    mature: false,
                    settled: false,
                    target_player_id: None,
                }
            })
            .collect();
        self.phase = ContractsPhase::Offer;
        engine
            .timers
            .schedule(TimerKind::Offer, Duration::from_secs(OFFER_SECONDS));
        self.offer_deadline = engine.timers.deadline_unix_ms(TimerKind::Offer);
        info!("Round {} offer open", self.current_round);
        self.broadcast_state(engine);
    }

    fn handle_offer_expiry(&mut self, engine: &mut Engine) {
        // Unsigned offers are discarded, never carried forward.
        let signed: Vec<Contract> = self
            .offered
            .drain(..)
            .filter(|c| c.signed_by.is_some())
            .collect();
        self.active.extend(signed);
        self.offer_deadline = None;
        self.phase = ContractsPhase::Action;
        engine.timers.schedule(
            TimerKind::Round,
            Duration::from_secs(self.settings.round_timer_seconds),
        );
        self.round_deadline = engine.timers.deadline_unix_ms(TimerKind::Round);
        self.schedule_round_events(engine);
        self.broadcast_state(engine);
    }

    fn schedule_round_events(&mut self, engine: &mut Engine) {
        if self.settings.max_events_per_round == 0 || self.active.is_empty() {
            return;
        }
        let count = engine
            .rng
            .gen_range(1..=3u8)
            .min(self.settings.max_events_per_round);
        let window = self.settings.round_timer_seconds as f64;
        for index in 0..count {
            // Strictly inside the action window.
            let offset = engine.rng.gen_range(0.15..0.85) * window;
            engine
                .timers
                .schedule(TimerKind::Event(index), Duration::from_secs_f64(offset));
        }
    }

    fn handle_event(&mut self, engine: &mut Engine) {
        // Phase membership, not cancellation, is what makes stale event
        // firings safe.
        if self.phase != ContractsPhase::Action {
            return;
        }
        let roll = engine.rng.gen_range(0..3u8);
        let event = match roll {
            0 => {
                let candidates: Vec<usize> = self
                    .active
                    .iter()
                    .enumerate()
                    .filter(|(_, c)| !c.hidden_revealed && !c.settled)
                    .map(|(i, _)| i)
                    .collect();
                candidates.as_slice().choose(&mut engine.rng).map(|&i| {
                    self.active[i].hidden_revealed = true;
                    let signer = self.active[i].signed_by.clone();
                    let contract_id = self.active[i].id.clone();
                    if let Some(signer) = signer {
                        if let Some(player) = self.roster.get_mut(&signer) {
                            player.audits_triggered += 1;
                        }
                    }
                    ContractEvent::Audit { contract_id }
                })
            }
            1 => {
                let candidates: Vec<usize> = (0..self.active.len()).collect();
                candidates.as_slice().choose(&mut engine.rng).map(|&i| {
                    let twist = content::random_twist(&mut engine.rng).to_string();
                    let contract = &mut self.active[i];
                    contract.visible_text.push(' ');
                    contract.visible_text.push_str(&twist);
                    ContractEvent::FinePrint {
                        contract_id: contract.id.clone(),
                        twist,
                    }
                })
            }
            _ => {
                let candidates: Vec<usize> = (0..self.active.len()).collect();
                candidates.as_slice().choose(&mut engine.rng).map(|&i| {
                    let contract = &mut self.active[i];
                    contract.growth_sips += contract.base_sips;
                    ContractEvent::MarketShift {
                        contract_id: contract.id.clone(),
                    }
                })
            }
        };
        if let Some(event) = event {
            engine.registry.broadcast(&ServerNotice::Event { event });
            self.broadcast_state(engine);
        }
    }

    fn handle_round_expiry(&mut self, engine: &mut Engine) {
        self.round_deadline = None;
        let mut indices: Vec<usize> = (0..self.active.len()).collect();
        indices.shuffle(&mut engine.rng);
        for &i in indices.iter().take(self.settings.mature_per_round) {
            self.active[i].mature = true;
        }
        self.phase = ContractsPhase::Settlement;
        engine
            .timers
            .schedule(TimerKind::Settlement, Duration::from_secs(SETTLEMENT_SECONDS));
        self.broadcast_state(engine);
    }

    fn handle_propose_buyout(&mut self, engine: &mut Engine, conn_id: u64, contract_id: String) {
        let proposer = match self.sender_participant(engine, conn_id) {
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
        if self.phase != ContractsPhase::Settlement {
            engine
                .registry
                .error_to(conn_id, "buyouts are only possible during settlement");
            return;
        }
        if self.buyout.is_some() {
            engine.registry.error_to(conn_id, "a buyout is already open");
            return;
        }
        let valid_target = self
            .active
            .iter()
            .any(|c| c.id == contract_id && c.mature && !c.settled);
        if !valid_target {
            engine.registry.error_to(conn_id, "no such mature contract");
            return;
        }
        let mut proposal = BuyoutProposal {
            id: format!("b-{}", random_id(&mut engine.rng)),
            contract_id,
            proposer_id: proposer.clone(),
            sips_cost: self.settings.buyout_cost(),
            votes: Default::default(),
        };
        // Proposing implies approving.
        proposal.votes.insert(proposer, true);
        engine
            .timers
            .schedule(TimerKind::Buyout, Duration::from_secs(BUYOUT_SECONDS));
        self.buyout_deadline = engine.timers.deadline_unix_ms(TimerKind::Buyout);
        engine.registry.broadcast(&ServerNotice::BuyoutProposed {
            proposal: proposal.clone(),
        });
        self.buyout = Some(proposal);
        if self.buyout_quorum_met() {
            self.resolve_buyout(engine);
        } else {
            self.broadcast_state(engine);
        }
    }

    fn handle_vote_buyout(&mut self, engine: &mut Engine, conn_id: u64, approve: bool) {
        let voter = match self.sender_participant(engine, conn_id) {
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
        match self.buyout.as_mut() {
            Some(proposal) => {
                // A re-vote overwrites, tolerating client retries.
                proposal.votes.insert(voter, approve);
            }
            None => {
                engine.registry.error_to(conn_id, "no buyout is open");
                return;
            }
        }
        if self.buyout_quorum_met() {
            self.resolve_buyout(engine);
        } else {
            self.broadcast_state(engine);
        }
    }

    fn buyout_quorum_met(&self) -> bool {
        match &self.buyout {
            Some(proposal) => self
                .roster
                .connected_ids()
                .iter()
                .all(|id| proposal.votes.contains_key(id)),
            None => false,
        }
    }

    fn resolve_buyout(&mut self, engine: &mut Engine) {
        let proposal = match self.buyout.take() {
            Some(proposal) => proposal,
            None => return,
        };
        engine.timers.cancel(TimerKind::Buyout);
        self.buyout_deadline = None;
        let approvals = proposal.votes.values().filter(|v| **v).count();
        let rejections = proposal.votes.len() - approvals;
        let approved = approvals > rejections
            || (approvals == rejections && self.settings.buyout_ties_pass);
        if approved {
            // Bought-out contracts are discarded outright, never settled.
            if let Some(pos) = self.active.iter().position(|c| c.id == proposal.contract_id) {
                self.active.remove(pos);
            }
            if let Some(player) = self.roster.get_mut(&proposal.proposer_id) {
                player.sips += proposal.sips_cost;
                player.buyouts += 1;
            }
        }
        engine.registry.broadcast(&ServerNotice::BuyoutResult {
            proposal_id: proposal.id,
            contract_id: proposal.contract_id,
            approved,
        });
        self.broadcast_state(engine);
    }

    fn handle_settlement_expiry(&mut self, engine: &mut Engine) {
        if self.buyout.is_some() {
            self.resolve_buyout(engine);
        }
        let result = self.settle_matured();
        for milestone in &result.milestones_triggered {
            engine.registry.broadcast(&ServerNotice::MilestoneTriggered {
                milestone: milestone.clone(),
            });
        }
        engine.registry.broadcast(&ServerNotice::RoundResult {
            result: result.clone(),
        });
        self.round_result = Some(result);
        self.phase = ContractsPhase::Result;
        engine
            .timers
            .schedule(TimerKind::Result, Duration::from_secs(RESULT_SECONDS));
        self.broadcast_state(engine);
    }

    fn settle_matured(&mut self) -> RoundResult {
        let cap = self.settings.max_sips_per_settlement;
        let hedge_before_cap = self.settings.hedge_before_cap;
        let mut drinks: Vec<DrinkAssignment> = Vec::new();
        let mut matured: Vec<Contract> = Vec::new();
        let mut tab_change = 0u32;

        let mut i = 0;
        while i < self.active.len() {
            if !self.active[i].mature {
                i += 1;
                continue;
            }
            let mut contract = self.active.remove(i);
            // Whether the hidden amount counts was decided before this
            // display-only force-reveal.
            let include_hidden = contract.hidden_revealed;
            contract.hidden_revealed = true;
            let payout = contract.base_sips
                + contract.growth_sips
                + if include_hidden { contract.hidden_sips } else { 0 };
            let payer_id = contract
                .target_player_id
                .clone()
                .or_else(|| contract.signed_by.clone());
            if let Some(payer_id) = payer_id {
                let mut applied = payout.min(cap);
                if let Some(player) = self.roster.get_mut(&payer_id) {
                    if player.hedge_armed {
                        player.hedge_armed = false;
                        applied = if hedge_before_cap {
                            payout.saturating_sub(1).min(cap)
                        } else {
                            payout.min(cap).saturating_sub(1)
                        };
                    }
                    player.sips += applied;
                    player.tab_contribution += applied;
                }
                tab_change += applied;
                self.tab += applied;
                drinks.push(DrinkAssignment {
                    player_id: payer_id,
                    sips: applied,
                    reason: contract.visible_text.clone(),
                    source_id: Some(contract.id.clone()),
                });
            }
            contract.settled = true;
            matured.push(contract.clone());
            self.settled.push(contract);
        }

        let milestones_triggered = self.check_milestones(&mut drinks);
        RoundResult {
            round: self.current_round,
            matured_contracts: matured,
            drinks,
            tab_change,
            milestones_triggered,
        }
    }

    /// Each threshold fires at most once per session.
    fn check_milestones(&mut self, drinks: &mut Vec<DrinkAssignment>) -> Vec<Milestone> {
        let mut fired = Vec::new();
        for milestone in self.milestones.iter_mut() {
            if milestone.triggered || self.tab < milestone.threshold {
                continue;
            }
            milestone.triggered = true;
            if milestone.effect == MilestoneEffect::Toast {
                for player in self.roster.iter_mut() {
                    if player.connected {
                        player.sips += 1;
                        drinks.push(DrinkAssignment {
                            player_id: player.id.clone(),
                            sips: 1,
                            reason: milestone.name.clone(),
                            source_id: None,
                        });
                    }
                }
            }
            // The remaining effects are host-screen cues.
            fired.push(milestone.clone());
        }
        fired
    }

    fn handle_result_expiry(&mut self, engine: &mut Engine) {
        if self.current_round >= self.settings.round_count {
            self.finish_game(engine);
        } else {
            self.begin_round(engine);
        }
    }

    fn finish_game(&mut self, engine: &mut Engine) {
        engine.timers.cancel_all();
        self.offer_deadline = None;
        self.round_deadline = None;
        self.buyout_deadline = None;
        self.buyout = None;
        let awards = self.compute_awards();
        self.phase = ContractsPhase::Endgame;
        self.game_result = awards.clone();
        engine
            .registry
            .broadcast(&ServerNotice::GameEnd { awards });
        self.broadcast_state(engine);
    }

    fn compute_awards(&self) -> Option<ContractsAwards> {
        let players = self.roster.players();
        if players.is_empty() {
            return None;
        }
        let top_investor = players
            .iter()
            .min_by_key(|p| p.tab_contribution)
            .map(|p| p.name.clone())?;
        let bailout_king = players
            .iter()
            .max_by_key(|p| p.buyouts)
            .map(|p| p.name.clone())?;
        let chaos_auditor = players
            .iter()
            .max_by_key(|p| p.audits_triggered)
            .map(|p| p.name.clone())?;
        Some(ContractsAwards {
            top_investor,
            bailout_king,
            chaos_auditor,
            final_tab: self.tab,
            rounds: self.current_round,
        })
    }

    fn reset_to_lobby(&mut self, engine: &mut Engine) {
        engine.timers.cancel_all();
        self.phase = ContractsPhase::Lobby;
        self.offered.clear();
        self.active.clear();
        self.settled.clear();
        self.signed_this_round.clear();
        self.buyout = None;
        self.round_result = None;
        self.game_result = None;
        self.offer_deadline = None;
        self.round_deadline = None;
        self.buyout_deadline = None;
        self.paused = false;
        self.broadcast_state(engine);
    }

    fn handle_end_game(&mut self, engine: &mut Engine, conn_id: u64) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        match self.phase {
            ContractsPhase::Lobby => {
                engine.registry.error_to(conn_id, "no game in progress");
            }
            ContractsPhase::Result | ContractsPhase::Endgame => self.reset_to_lobby(engine),
            _ => self.finish_game(engine),
        }
    }

    fn handle_sign(&mut self, engine: &mut Engine, conn_id: u64, contract_id: String) {
        let signer = match self.sender_participant(engine, conn_id) {
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
        if self.phase != ContractsPhase::Offer {
            engine
                .registry
                .error_to(conn_id, "contracts can only be signed during the offer");
            return;
        }
        if self.signed_this_round.contains(&signer) {
            engine
                .registry
                .error_to(conn_id, "you already signed a contract this round");
            return;
        }
        let contract = match self.offered.iter_mut().find(|c| c.id == contract_id) {
            Some(contract) => contract,
            None => {
                engine.registry.error_to(conn_id, "no such offered contract");
                return;
            }
        };
        if contract.signed_by.is_some() {
            engine.registry.error_to(conn_id, "contract already signed");
            return;
        }
        contract.signed_by = Some(signer.clone());
        self.signed_this_round.insert(signer.clone());
        if let Some(player) = self.roster.get_mut(&signer) {
            player.contracts_signed += 1;
        }
        self.broadcast_state(engine);
    }

    fn handle_witness(&mut self, engine: &mut Engine, conn_id: u64, contract_id: String) {
        let witness = match self.sender_participant(engine, conn_id) {
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
        if self.phase != ContractsPhase::Offer {
            engine
                .registry
                .error_to(conn_id, "witnessing happens during the offer");
            return;
        }
        let contract = match self.offered.iter_mut().find(|c| c.id == contract_id) {
            Some(contract) => contract,
            None => {
                engine.registry.error_to(conn_id, "no such offered contract");
                return;
            }
        };
        if contract.signed_by.is_none() {
            engine
                .registry
                .error_to(conn_id, "only signed contracts can be witnessed");
            return;
        }
        if contract.signed_by.as_deref() == Some(witness.as_str()) {
            engine
                .registry
                .error_to(conn_id, "you cannot witness your own contract");
            return;
        }
        if contract.witnessed_by.contains(&witness) {
            engine.registry.error_to(conn_id, "already witnessed");
            return;
        }
        contract.witnessed_by.push(witness);
        self.broadcast_state(engine);
    }

    fn handle_use_token(
        &mut self,
        engine: &mut Engine,
        conn_id: u64,
        token: TokenKind,
        target_contract_id: Option<String>,
        target_player_id: Option<String>,
    ) {
        let _ = target_player_id;
        let player_id = match self.sender_participant(engine, conn_id) {
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
        let mid_game = matches!(
            self.phase,
            ContractsPhase::Offer | ContractsPhase::Action | ContractsPhase::Settlement
        );
        if !mid_game {
            engine.registry.error_to(conn_id, "no round in progress");
            return;
        }
        let balance = match self.roster.get(&player_id) {
            Some(player) => player.tokens.balance(token),
            None => 0,
        };
        if balance == 0 {
            engine.registry.error_to(conn_id, "no tokens of that kind left");
            return;
        }
        match token {
            TokenKind::Hedge => {
                let player = match self.roster.get_mut(&player_id) {
                    Some(player) => player,
                    None => return,
                };
                if player.hedge_armed {
                    engine.registry.error_to(conn_id, "hedge already armed");
                    return;
                }
                player.tokens.spend(TokenKind::Hedge);
                player.hedge_armed = true;
            }
            TokenKind::Lawyer => {
                let contract_id = match target_contract_id {
                    Some(id) => id,
                    None => {
                        engine
                            .registry
                            .error_to(conn_id, "lawyer token needs a target contract");
                        return;
                    }
                };
                let contract = self
                    .offered
                    .iter_mut()
                    .chain(self.active.iter_mut())
                    .find(|c| c.id == contract_id);
                let contract = match contract {
                    Some(contract) => contract,
                    None => {
                        engine.registry.error_to(conn_id, "no such contract");
                        return;
                    }
                };
                if contract.hidden_revealed {
                    engine
                        .registry
                        .error_to(conn_id, "that clause is already on the table");
                    return;
                }
                contract.hidden_clause = LAWYER_STRIKE.to_string();
                contract.hidden_sips = 0;
                contract.hidden_revealed = true;
                if let Some(player) = self.roster.get_mut(&player_id) {
                    player.tokens.spend(TokenKind::Lawyer);
                }
            }
            TokenKind::Sabotage => {
                let contract_id = match target_contract_id {
                    Some(id) => id,
                    None => {
                        engine
                            .registry
                            .error_to(conn_id, "sabotage token needs a target contract");
                        return;
                    }
                };
                let current_payer = match self.active.iter().find(|c| c.id == contract_id) {
                    Some(contract) if !contract.settled => contract
                        .target_player_id
                        .clone()
                        .or_else(|| contract.signed_by.clone()),
                    _ => {
                        engine.registry.error_to(conn_id, "no such active contract");
                        return;
                    }
                };
                let candidates: Vec<String> = self
                    .roster
                    .connected_ids()
                    .into_iter()
                    .filter(|id| Some(id.as_str()) != current_payer.as_deref())
                    .collect();
                let new_payer = match candidates.as_slice().choose(&mut engine.rng) {
                    Some(id) => id.clone(),
                    None => {
                        engine
                            .registry
                            .error_to(conn_id, "nobody else to pin this on");
                        return;
                    }
                };
                if let Some(contract) = self.active.iter_mut().find(|c| c.id == contract_id) {
                    contract.target_player_id = Some(new_payer);
                }
                if let Some(player) = self.roster.get_mut(&player_id) {
                    player.tokens.spend(TokenKind::Sabotage);
                }
            }
        }
        self.broadcast_state(engine);
    }

    /// The only generic vote contracts understands is the "nope" redraw of
    /// an unsigned offer.
    fn handle_vote(&mut self, engine: &mut Engine, conn_id: u64, id: String, value: String) {
        if self.sender_participant(engine, conn_id).is_none() {
            engine.registry.error_to(conn_id, "join first");
            return;
        }
        if value != "nope" {
            engine.registry.error_to(conn_id, "nothing to vote on");
            return;
        }
        if self.paused {
            engine.registry.error_to(conn_id, "game is paused");
            return;
        }
        if self.phase != ContractsPhase::Offer {
            engine
                .registry
                .error_to(conn_id, "offers can only be redrawn during the offer");
            return;
        }
        let index = match self
            .offered
            .iter()
            .position(|c| c.id == id && c.signed_by.is_none())
        {
            Some(index) => index,
            None => {
                engine
                    .registry
                    .error_to(conn_id, "only unsigned offers can be redrawn");
                return;
            }
        };
        let category = if self.current_round >= self.settings.round_count {
            Some(shared::contracts::ContractCategory::Endgame)
        } else {
            None
        };
        let replacement =
            content::draw_contracts(&mut engine.rng, 1, &self.used_templates, category);
        if let Some(template) = replacement.first() {
            self.used_templates.insert(template.id.to_string());
            let contract_id = self.next_id("c");
            self.offered[index] = Contract {
                id: contract_id,
                template_id: template.id.to_string(),
                category: template.category,
                visible_text: template.visible.to_string(),
                hidden_clause: template.hidden.to_string(),
                hidden_revealed: false,
                signed_by: None,
                witnessed_by: Vec::new(),
                round_created: self.current_round,
                base_sips: template.base_sips,
                growth_sips: 0,
                hidden_sips: template.hidden_sips,
                mature: false,
                settled: false,
                target_player_id: None,
            };
        }
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
        // Keep the invariant that every referenced participant is on the
        // roster: their in-flight contracts go with them.
        self.offered
            .retain(|c| c.signed_by.as_deref() != Some(player_id.as_str()));
        self.active
            .retain(|c| c.signed_by.as_deref() != Some(player_id.as_str()));
        for contract in self.offered.iter_mut().chain(self.active.iter_mut()) {
            contract.witnessed_by.retain(|w| w != &player_id);
            if contract.target_player_id.as_deref() == Some(player_id.as_str()) {
                contract.target_player_id = None;
            }
        }
        let mut resolve = false;
        if let Some(proposal) = self.buyout.as_mut() {
            let target_gone = !self
                .active
                .iter()
                .any(|c| c.id == proposal.contract_id);
            if proposal.proposer_id == player_id || target_gone {
                // An open proposal dies with its proposer or its target.
                self.buyout = None;
                engine.timers.cancel(TimerKind::Buyout);
                self.buyout_deadline = None;
            } else {
                proposal.votes.remove(&player_id);
                resolve = self
                    .roster
                    .connected_ids()
                    .iter()
                    .all(|id| proposal.votes.contains_key(id));
            }
        }
        engine
            .registry
            .broadcast(&ServerNotice::PlayerLeft { player_id });
        if resolve {
            self.resolve_buyout(engine);
        } else {
            self.broadcast_state(engine);
        }
    }

    fn handle_update_settings(&mut self, engine: &mut Engine, conn_id: u64, patch: SettingsPatch) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.phase != ContractsPhase::Lobby {
            engine
                .registry
                .error_to(conn_id, "settings can only change in the lobby");
            return;
        }
        self.settings.apply(&patch);
        self.milestones = milestones_for(self.settings.difficulty);
        self.broadcast_state(engine);
    }

    fn handle_pause(&mut self, engine: &mut Engine, conn_id: u64) {
        if !self.require_privileged(engine, conn_id) {
            return;
        }
        if self.paused
            || matches!(self.phase, ContractsPhase::Lobby | ContractsPhase::Endgame)
        {
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
        self.offer_deadline = engine.timers.deadline_unix_ms(TimerKind::Offer);
        self.round_deadline = engine.timers.deadline_unix_ms(TimerKind::Round);
        self.buyout_deadline = engine.timers.deadline_unix_ms(TimerKind::Buyout);
        engine.registry.broadcast(&ServerNotice::Resumed);
        self.broadcast_state(engine);
    }
}

impl GameMode for ContractsMode {
    fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::Contracts(self.state())
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
                self.handle_update_settings(engine, conn_id, settings)
            }
            ClientCommand::SignContract { contract_id } => {
                self.handle_sign(engine, conn_id, contract_id)
            }
            ClientCommand::WitnessContract { contract_id } => {
                self.handle_witness(engine, conn_id, contract_id)
            }
            ClientCommand::UseToken {
                token,
                target_contract_id,
                target_player_id,
            } => self.handle_use_token(engine, conn_id, token, target_contract_id, target_player_id),
            ClientCommand::ProposeBuyout { contract_id } => {
                self.handle_propose_buyout(engine, conn_id, contract_id)
            }
            ClientCommand::VoteBuyout { approve } => {
                self.handle_vote_buyout(engine, conn_id, approve)
            }
            ClientCommand::Vote { id, value } => self.handle_vote(engine, conn_id, id, value),
            _ => engine
                .registry
                .error_to(conn_id, "not available in this game"),
        }
    }

    fn on_timer(&mut self, engine: &mut Engine, kind: TimerKind) {
        match kind {
            TimerKind::Offer if self.phase == ContractsPhase::Offer => {
                self.handle_offer_expiry(engine)
            }
            TimerKind::Round if self.phase == ContractsPhase::Action => {
                self.handle_round_expiry(engine)
            }
            TimerKind::Settlement if self.phase == ContractsPhase::Settlement => {
                self.handle_settlement_expiry(engine)
            }
            TimerKind::Result if self.phase == ContractsPhase::Result => {
                self.handle_result_expiry(engine)
            }
            TimerKind::Buyout if self.phase == ContractsPhase::Settlement => {
                self.resolve_buyout(engine)
            }
            TimerKind::Event(_) => self.handle_event(engine),
            _ => {}
        }
    }

    fn on_disconnect(&mut self, engine: &mut Engine, player_id: Option<String>, privileged: bool) {
        if privileged {
            // Controller offline never ends the session.
            self.host_connected = false;
        }
        if let Some(player_id) = player_id {
            self.roster.mark_connected(&player_id, false);
            engine
                .registry
                .broadcast(&ServerNotice::PlayerLeft { player_id });
            if self.buyout_quorum_met() {
                self.resolve_buyout(engine);
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
        mode: ContractsMode,
        engine: Engine,
        _timer_rx: mpsc::UnboundedReceiver<SessionMessage>,
        outboxes: Vec<mpsc::UnboundedReceiver<String>>,
    }

    fn rig(seed: u64) -> Rig {
        let (tx, timer_rx) = mpsc::unbounded_channel();
        Rig {
            mode: ContractsMode::new(),
            engine: Engine::new(tx, Some(seed)),
            _timer_rx: timer_rx,
            outboxes: Vec::new(),
        }
    }

    impl Rig {
        fn connect(&mut self, conn_id: u64) {
            let (tx, rx) = mpsc::unbounded_channel();
            self.engine.registry.register(conn_id, tx);
            self.outboxes.push(rx);
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

        fn start(&mut self, host_conn: u64, patch: SettingsPatch) {
            self.mode.on_command(
                &mut self.engine,
                host_conn,
                ClientCommand::StartGame {
                    settings: Some(patch),
                },
            );
        }
    }

    fn quiet_patch() -> SettingsPatch {
        // No random events keeps settlement arithmetic deterministic.
        SettingsPatch {
            max_events_per_round: Some(0),
            ..SettingsPatch::default()
        }
    }

    fn sign_first_offer(rig: &mut Rig, conn_id: u64) -> String {
        let contract_id = rig.mode.offered[0].id.clone();
        rig.mode.on_command(
            &mut rig.engine,
            conn_id,
            ClientCommand::SignContract {
                contract_id: contract_id.clone(),
            },
        );
        contract_id
    }

    #[tokio::test(start_paused = true)]
    async fn start_requires_two_connected_players() {
        let mut rig = rig(1);
        rig.host(0);
        rig.join(1, "Ana");
        rig.start(0, quiet_patch());
        assert_eq!(rig.mode.phase, ContractsPhase::Lobby);

        rig.join(2, "Bo");
        rig.start(0, quiet_patch());
        assert_eq!(rig.mode.phase, ContractsPhase::Offer);
        assert_eq!(rig.mode.current_round, 1);
        assert_eq!(
            rig.mode.offered.len(),
            rig.mode.settings.contracts_per_round
        );
    }

    #[tokio::test(start_paused = true)]
    async fn start_is_privileged_only() {
        let mut rig = rig(1);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.mode
            .on_command(&mut rig.engine, 1, ClientCommand::StartGame { settings: None });
        assert_eq!(rig.mode.phase, ContractsPhase::Lobby);
    }

    #[tokio::test(start_paused = true)]
    async fn one_signature_per_player_per_round() {
        let mut rig = rig(2);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0, quiet_patch());

        sign_first_offer(&mut rig, 1);
        let second = rig.mode.offered[1].id.clone();
        rig.mode.on_command(
            &mut rig.engine,
            1,
            ClientCommand::SignContract {
                contract_id: second.clone(),
            },
        );
        // Second sign rejected, state unchanged.
        assert!(rig.mode.offered[1].signed_by.is_none());
        assert_eq!(rig.mode.roster.get(&rig.engine.registry.player_id(1).unwrap()).unwrap().contracts_signed, 1);

        // Another player may still sign it.
        rig.mode.on_command(
            &mut rig.engine,
            2,
            ClientCommand::SignContract {
                contract_id: second.clone(),
            },
        );
        assert!(rig.mode.offered[1].signed_by.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn unsigned_offers_are_discarded_at_offer_expiry() {
        let mut rig = rig(3);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0, quiet_patch());
        sign_first_offer(&mut rig, 1);

        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);
        assert_eq!(rig.mode.phase, ContractsPhase::Action);
        assert_eq!(rig.mode.active.len(), 1);
        assert!(rig.mode.offered.is_empty());
        assert!(rig.mode.round_deadline.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_sips_charged_only_if_revealed_before_settlement() {
        let mut rig = rig(4);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0, quiet_patch());
        let signer = rig.engine.registry.player_id(1).unwrap();
        sign_first_offer(&mut rig, 1);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);

        let base = rig.mode.active[0].base_sips;
        let hidden = rig.mode.active[0].hidden_sips;
        assert!(hidden > 0);

        rig.mode.on_timer(&mut rig.engine, TimerKind::Round);
        assert!(rig.mode.active[0].mature);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Settlement);

        let cap = rig.mode.settings.max_sips_per_settlement;
        let expected = base.min(cap);
        let player = rig.mode.roster.get(&signer).unwrap();
        assert_eq!(player.sips, expected);
        assert_eq!(rig.mode.tab, expected);
        // The clause text is force-revealed for display regardless.
        assert!(rig.mode.settled[0].hidden_revealed);
        assert_eq!(rig.mode.phase, ContractsPhase::Result);
    }

    #[tokio::test(start_paused = true)]
    async fn revealed_clause_adds_hidden_sips_capped() {
        let mut rig = rig(5);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0, quiet_patch());
        let signer = rig.engine.registry.player_id(1).unwrap();
        sign_first_offer(&mut rig, 1);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);

        // Reveal ahead of settlement, as an audit event would.
        rig.mode.active[0].hidden_revealed = true;
        let base = rig.mode.active[0].base_sips;
        let hidden = rig.mode.active[0].hidden_sips;
        let cap = rig.mode.settings.max_sips_per_settlement;

        rig.mode.on_timer(&mut rig.engine, TimerKind::Round);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Settlement);

        let expected = (base + hidden).min(cap);
        assert_eq!(rig.mode.roster.get(&signer).unwrap().sips, expected);
        assert!(expected <= cap);
    }

    #[tokio::test(start_paused = true)]
    async fn hedge_subtracts_one_after_capping() {
        let mut rig = rig(6);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0, quiet_patch());
        let signer = rig.engine.registry.player_id(1).unwrap();
        sign_first_offer(&mut rig, 1);
        rig.mode.on_command(
            &mut rig.engine,
            1,
            ClientCommand::UseToken {
                token: TokenKind::Hedge,
                target_contract_id: None,
                target_player_id: None,
            },
        );
        assert!(rig.mode.roster.get(&signer).unwrap().hedge_armed);

        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);
        rig.mode.active[0].hidden_revealed = true;
        // Force a payout well above the cap.
        rig.mode.active[0].growth_sips = 10;
        let cap = rig.mode.settings.max_sips_per_settlement;

        rig.mode.on_timer(&mut rig.engine, TimerKind::Round);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Settlement);

        let player = rig.mode.roster.get(&signer).unwrap();
        assert_eq!(player.sips, cap - 1);
        assert!(!player.hedge_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn sabotage_redirects_the_payer() {
        let mut rig = rig(7);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0, quiet_patch());
        let signer = rig.engine.registry.player_id(1).unwrap();
        let other = rig.engine.registry.player_id(2).unwrap();
        sign_first_offer(&mut rig, 1);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);

        let contract_id = rig.mode.active[0].id.clone();
        rig.mode.on_command(
            &mut rig.engine,
            2,
            ClientCommand::UseToken {
                token: TokenKind::Sabotage,
                target_contract_id: Some(contract_id),
                target_player_id: None,
            },
        );
        // Only one other connected participant exists, so the redirect is
        // deterministic.
        assert_eq!(
            rig.mode.active[0].target_player_id.as_deref(),
            Some(other.as_str())
        );

        rig.mode.on_timer(&mut rig.engine, TimerKind::Round);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Settlement);
        assert_eq!(rig.mode.roster.get(&signer).unwrap().sips, 0);
        assert!(rig.mode.roster.get(&other).unwrap().sips > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lawyer_zeroes_hidden_sips() {
        let mut rig = rig(8);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0, quiet_patch());
        let signer = rig.engine.registry.player_id(1).unwrap();
        sign_first_offer(&mut rig, 1);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);

        let base = rig.mode.active[0].base_sips;
        let contract_id = rig.mode.active[0].id.clone();
        rig.mode.on_command(
            &mut rig.engine,
            1,
            ClientCommand::UseToken {
                token: TokenKind::Lawyer,
                target_contract_id: Some(contract_id),
                target_player_id: None,
            },
        );
        assert!(rig.mode.active[0].hidden_revealed);
        assert_eq!(rig.mode.active[0].hidden_sips, 0);
        assert_eq!(rig.mode.active[0].hidden_clause, LAWYER_STRIKE);

        rig.mode.on_timer(&mut rig.engine, TimerKind::Round);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Settlement);
        // Revealed, but the stricken clause adds nothing.
        let cap = rig.mode.settings.max_sips_per_settlement;
        assert_eq!(rig.mode.roster.get(&signer).unwrap().sips, base.min(cap));
    }

    #[tokio::test(start_paused = true)]
    async fn token_spend_rejected_at_zero_balance() {
        let mut rig = rig(9);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0, quiet_patch());
        let player_id = rig.engine.registry.player_id(1).unwrap();
        // Drain the single hedge token, then try again.
        rig.mode.on_command(
            &mut rig.engine,
            1,
            ClientCommand::UseToken {
                token: TokenKind::Hedge,
                target_contract_id: None,
                target_player_id: None,
            },
        );
        rig.mode.roster.get_mut(&player_id).unwrap().hedge_armed = false;
        rig.mode.on_command(
            &mut rig.engine,
            1,
            ClientCommand::UseToken {
                token: TokenKind::Hedge,
                target_contract_id: None,
                target_player_id: None,
            },
        );
        let player = rig.mode.roster.get(&player_id).unwrap();
        assert_eq!(player.tokens.balance(TokenKind::Hedge), 0);
        assert!(!player.hedge_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn buyout_majority_discards_contract_and_charges_proposer() {
        let mut rig = rig(10);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.join(3, "Cy");
        rig.start(0, quiet_patch());
        let proposer = rig.engine.registry.player_id(2).unwrap();
        sign_first_offer(&mut rig, 1);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Round);

        let contract_id = rig.mode.active[0].id.clone();
        rig.mode.on_command(
            &mut rig.engine,
            2,
            ClientCommand::ProposeBuyout {
                contract_id: contract_id.clone(),
            },
        );
        assert!(rig.mode.buyout.is_some());
        rig.mode
            .on_command(&mut rig.engine, 1, ClientCommand::VoteBuyout { approve: true });
        // Quorum (3 of 3 voted) resolves early without the timer.
        rig.mode
            .on_command(&mut rig.engine, 3, ClientCommand::VoteBuyout { approve: false });

        assert!(rig.mode.buyout.is_none());
        assert!(!rig.mode.active.iter().any(|c| c.id == contract_id));
        assert!(!rig.mode.settled.iter().any(|c| c.id == contract_id));
        let player = rig.mode.roster.get(&proposer).unwrap();
        assert_eq!(player.sips, rig.mode.settings.buyout_cost());
        assert_eq!(player.buyouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn buyout_tie_fails_by_default() {
        let mut rig = rig(11);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.join(3, "Cy");
        rig.join(4, "Di");
        rig.start(0, quiet_patch());
        sign_first_offer(&mut rig, 1);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Round);

        let contract_id = rig.mode.active[0].id.clone();
        rig.mode.on_command(
            &mut rig.engine,
            2,
            ClientCommand::ProposeBuyout {
                contract_id: contract_id.clone(),
            },
        );
        rig.mode
            .on_command(&mut rig.engine, 1, ClientCommand::VoteBuyout { approve: true });
        rig.mode
            .on_command(&mut rig.engine, 3, ClientCommand::VoteBuyout { approve: false });
        rig.mode
            .on_command(&mut rig.engine, 4, ClientCommand::VoteBuyout { approve: false });

        // 2-2 tie: proposal fails, contract stays mature.
        assert!(rig.mode.buyout.is_none());
        assert!(rig.mode.active.iter().any(|c| c.id == contract_id));
        let proposer = rig.engine.registry.player_id(2).unwrap();
        assert_eq!(rig.mode.roster.get(&proposer).unwrap().sips, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn buyouts_are_rejected_while_paused() {
        let mut rig = rig(22);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0, quiet_patch());
        sign_first_offer(&mut rig, 1);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Round);

        let contract_id = rig.mode.active[0].id.clone();
        rig.mode.on_command(&mut rig.engine, 0, ClientCommand::PauseGame);

        rig.mode.on_command(
            &mut rig.engine,
            2,
            ClientCommand::ProposeBuyout {
                contract_id: contract_id.clone(),
            },
        );
        assert!(rig.mode.buyout.is_none());
        assert!(rig.mode.active.iter().any(|c| c.id == contract_id));

        // A proposal opened before the pause cannot be resolved mid-pause.
        rig.mode.on_command(&mut rig.engine, 0, ClientCommand::ResumeGame);
        rig.mode.on_command(
            &mut rig.engine,
            2,
            ClientCommand::ProposeBuyout {
                contract_id: contract_id.clone(),
            },
        );
        assert!(rig.mode.buyout.is_some());
        rig.mode.on_command(&mut rig.engine, 0, ClientCommand::PauseGame);
        rig.mode
            .on_command(&mut rig.engine, 1, ClientCommand::VoteBuyout { approve: true });
        assert!(rig.mode.buyout.is_some());
        assert!(rig.mode.active.iter().any(|c| c.id == contract_id));
        let proposer = rig.engine.registry.player_id(2).unwrap();
        assert_eq!(rig.mode.roster.get(&proposer).unwrap().sips, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn kicking_the_signer_closes_the_buyout_on_their_contract() {
        let mut rig = rig(23);
        rig.host(0);
        let ana = rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.join(3, "Cy");
        rig.start(0, quiet_patch());
        sign_first_offer(&mut rig, 1);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Round);

        let contract_id = rig.mode.active[0].id.clone();
        rig.mode.on_command(
            &mut rig.engine,
            2,
            ClientCommand::ProposeBuyout { contract_id },
        );
        assert!(rig.mode.buyout.is_some());

        rig.mode
            .on_command(&mut rig.engine, 0, ClientCommand::KickPlayer { player_id: ana });

        // The target contract left with its signer, so the proposal closes
        // instead of later charging the proposer for removing nothing.
        assert!(rig.mode.buyout.is_none());
        let proposer = rig.engine.registry.player_id(2).unwrap();
        let player = rig.mode.roster.get(&proposer).unwrap();
        assert_eq!(player.sips, 0);
        assert_eq!(player.buyouts, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn milestones_fire_once() {
        let mut rig = rig(12);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0, quiet_patch());

        rig.mode.tab = 9;
        rig.mode.tab += 1; // crosses the first chill threshold at 10
        let mut drinks = Vec::new();
        let fired = rig.mode.check_milestones(&mut drinks);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].effect, MilestoneEffect::Toast);
        // Toast assigned one sip to each connected participant.
        assert_eq!(drinks.len(), 2);

        let mut drinks = Vec::new();
        let fired = rig.mode.check_milestones(&mut drinks);
        assert!(fired.is_empty());
        assert!(drinks.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn final_round_draws_endgame_contracts() {
        let mut rig = rig(13);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        let patch = SettingsPatch {
            round_count: Some(1),
            ..quiet_patch()
        };
        rig.start(0, patch);
        assert!(rig
            .mode
            .offered
            .iter()
            .all(|c| c.category == shared::contracts::ContractCategory::Endgame));
    }

    #[tokio::test(start_paused = true)]
    async fn one_round_game_reaches_endgame_with_awards() {
        let mut rig = rig(14);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        let patch = SettingsPatch {
            round_count: Some(1),
            ..quiet_patch()
        };
        rig.start(0, patch);
        sign_first_offer(&mut rig, 1);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Round);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Settlement);
        assert_eq!(rig.mode.phase, ContractsPhase::Result);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Result);
        assert_eq!(rig.mode.phase, ContractsPhase::Endgame);
        let awards = rig.mode.game_result.as_ref().unwrap();
        assert_eq!(awards.rounds, 1);
        assert_eq!(awards.final_tab, rig.mode.tab);
    }

    #[tokio::test(start_paused = true)]
    async fn end_game_from_endgame_returns_to_lobby_keeping_roster() {
        let mut rig = rig(15);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        let patch = SettingsPatch {
            round_count: Some(1),
            ..quiet_patch()
        };
        rig.start(0, patch);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Offer);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Round);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Settlement);
        rig.mode.on_timer(&mut rig.engine, TimerKind::Result);
        rig.mode.on_command(&mut rig.engine, 0, ClientCommand::EndGame);
        assert_eq!(rig.mode.phase, ContractsPhase::Lobby);
        assert_eq!(rig.mode.roster.len(), 2);
        assert!(rig.mode.active.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshot_redacts_unrevealed_clauses() {
        let mut rig = rig(16);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        rig.start(0, quiet_patch());
        let state = rig.mode.state();
        for contract in &state.offered_contracts {
            assert!(contract.hidden_clause.is_empty());
            assert_eq!(contract.hidden_sips, 0);
        }
        // Server-side copies keep the payload.
        assert!(rig.mode.offered.iter().all(|c| !c.hidden_clause.is_empty()));
    }

    #[tokio::test(start_paused = true)]
    async fn phase_gated_fields_are_empty_outside_their_phase() {
        let mut rig = rig(17);
        rig.host(0);
        rig.join(1, "Ana");
        rig.join(2, "Bo");
        let state = rig.mode.state();
        assert!(state.current_buyout.is_none());
        assert!(state.offer_timer_end.is_none());
        assert!(state.round_timer_end.is_none());
        assert!(state.round_result.is_none());
        assert!(state.game_result.is_none());

        rig.start(0, quiet_patch());
        let state = rig.mode.state();
        assert!(state.offer_timer_end.is_some());
        assert!(state.round_timer_end.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_marks_offline_and_reclaim_restores() {
        let mut rig = rig(18);
        rig.host(0);
        rig.join(1, "Ana");
        let player_id = rig.engine.registry.player_id(1).unwrap();
        let conn = rig.engine.registry.deregister(1).unwrap();
        rig.mode
            .on_disconnect(&mut rig.engine, conn.player_id, conn.privileged);
        assert!(!rig.mode.roster.get(&player_id).unwrap().connected);

        rig.join(5, "Ana");
        assert_eq!(rig.engine.registry.player_id(5).unwrap(), player_id);
        assert!(rig.mode.roster.get(&player_id).unwrap().connected);
        assert_eq!(rig.mode.roster.len(), 1);
    }
}
