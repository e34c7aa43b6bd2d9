//! Timer scheduler driving every phase transition.
//!
//! Timers never mutate state: a fired timer sends a
//! [`SessionMessage::Timer`] into the single session channel, and the
//! session accepts the fire only if the kind is still scheduled under the
//! same generation. Cancellation is therefore logical: a stale task that
//! races a phase change delivers a generation that no longer matches and
//! is ignored.

use crate::session::SessionMessage;
use crate::utils::unix_ms;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Which transition a timer triggers. One scheduler serves every mode;
/// each mode only schedules the kinds it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    Offer,
    Round,
    Settlement,
    Result,
    Buyout,
    /// Randomized mid-round event; the index keeps firings independent.
    Event(u8),
    Countdown,
    Challenge,
    Game,
    Voting,
    Bet,
    RaceTick,
    Distribution,
}

struct Entry {
    generation: u64,
    deadline: Instant,
    wall_deadline_ms: u64,
    /// Tick period for repeating timers, `None` for one-shots.
    period: Option<Duration>,
    frozen_remaining: Option<Duration>,
    alive: Arc<AtomicBool>,
}

pub struct TimerScheduler {
    tx: mpsc::UnboundedSender<SessionMessage>,
    entries: HashMap<TimerKind, Entry>,
    next_generation: u64,
    paused: bool,
}

impl TimerScheduler {
    pub fn new(tx: mpsc::UnboundedSender<SessionMessage>) -> Self {
        Self {
            tx,
            entries: HashMap::new(),
            next_generation: 0,
            paused: false,
        }
    }

    fn bump(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    pub fn schedule(&mut self, kind: TimerKind, delay: Duration) {
        self.cancel(kind);
        let generation = self.bump();
        let alive = Arc::new(AtomicBool::new(true));
        self.entries.insert(
            kind,
            Entry {
                generation,
                deadline: Instant::now() + delay,
                wall_deadline_ms: unix_ms() + delay.as_millis() as u64,
                period: None,
                frozen_remaining: None,
                alive: Arc::clone(&alive),
            },
        );
        self.spawn_oneshot(kind, generation, delay, alive);
    }

    pub fn schedule_repeating(&mut self, kind: TimerKind, period: Duration) {
        self.cancel(kind);
        let generation = self.bump();
        let alive = Arc::new(AtomicBool::new(true));
        self.entries.insert(
            kind,
            Entry {
                generation,
                deadline: Instant::now() + period,
                wall_deadline_ms: unix_ms() + period.as_millis() as u64,
                period: Some(period),
                frozen_remaining: None,
                alive: Arc::clone(&alive),
            },
        );
        self.spawn_repeating(kind, generation, period, period, alive);
    }

    fn spawn_oneshot(&self, kind: TimerKind, generation: u64, delay: Duration, alive: Arc<AtomicBool>) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if alive.load(Ordering::Relaxed) {
                let _ = tx.send(SessionMessage::Timer { kind, generation });
            }
        });
    }

    fn spawn_repeating(
        &self,
        kind: TimerKind,
        generation: u64,
        first: Duration,
        period: Duration,
        alive: Arc<AtomicBool>,
    ) {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + first, period);
            loop {
                ticks.tick().await;
                if !alive.load(Ordering::Relaxed) {
                    break;
                }
                if tx.send(SessionMessage::Timer { kind, generation }).is_err() {
                    break;
                }
            }
        });
    }

    /// Validates a fired timer. A one-shot that is accepted is consumed;
    /// a repeating timer stays scheduled with its deadline advanced one
    /// period. Fires are rejected while paused or when the generation is
    /// stale.
    pub fn accept(&mut self, kind: TimerKind, generation: u64) -> bool {
        if self.paused {
            return false;
        }
        let consume = match self.entries.get_mut(&kind) {
            Some(entry) if entry.generation == generation => match entry.period {
                Some(period) => {
                    entry.deadline += period;
                    entry.wall_deadline_ms += period.as_millis() as u64;
                    false
                }
                None => true,
            },
            _ => return false,
        };
        if consume {
            self.cancel(kind);
        }
        true
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        if let Some(entry) = self.entries.remove(&kind) {
            entry.alive.store(false, Ordering::Relaxed);
        }
    }

    pub fn cancel_all(&mut self) {
        for entry in self.entries.values() {
            entry.alive.store(false, Ordering::Relaxed);
        }
        self.entries.clear();
    }

    /// Freezes the remaining time of every live timer and invalidates
    /// their in-flight fires.
    pub fn pause(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        let now = Instant::now();
        for entry in self.entries.values_mut() {
            entry.alive.store(false, Ordering::Relaxed);
            self.next_generation += 1;
            entry.generation = self.next_generation;
            entry.frozen_remaining = Some(entry.deadline.saturating_duration_since(now));
        }
    }

    /// Reschedules every frozen timer with its preserved remaining time
    /// and recomputes wall-clock deadlines.
    pub fn resume(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        let kinds: Vec<TimerKind> = self.entries.keys().copied().collect();
        for kind in kinds {
            self.next_generation += 1;
            let generation = self.next_generation;
            let alive = Arc::new(AtomicBool::new(true));
            let (remaining, period) = {
                let entry = match self.entries.get_mut(&kind) {
                    Some(entry) => entry,
                    None => continue,
                };
                let remaining = entry
                    .frozen_remaining
                    .take()
                    .unwrap_or_else(|| entry.deadline.saturating_duration_since(Instant::now()));
                entry.generation = generation;
                entry.deadline = Instant::now() + remaining;
                entry.wall_deadline_ms = unix_ms() + remaining.as_millis() as u64;
                entry.alive = Arc::clone(&alive);
                (remaining, entry.period)
            };
            match period {
                Some(period) => self.spawn_repeating(kind, generation, remaining, period, alive),
                None => self.spawn_oneshot(kind, generation, remaining, alive),
            }
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn is_scheduled(&self, kind: TimerKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Absolute wall-clock deadline clients use for local countdowns.
    pub fn deadline_unix_ms(&self, kind: TimerKind) -> Option<u64> {
        self.entries.get(&kind).map(|e| e.wall_deadline_ms)
    }

    /// Logical remaining time; frozen value while paused.
    pub fn remaining(&self, kind: TimerKind) -> Option<Duration> {
        self.entries.get(&kind).map(|entry| {
            entry
                .frozen_remaining
                .unwrap_or_else(|| entry.deadline.saturating_duration_since(Instant::now()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::advance;

    fn scheduler() -> (TimerScheduler, mpsc::UnboundedReceiver<SessionMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (TimerScheduler::new(tx), rx)
    }

    fn expect_fire(rx: &mut mpsc::UnboundedReceiver<SessionMessage>) -> (TimerKind, u64) {
        match rx.try_recv() {
            Ok(SessionMessage::Timer { kind, generation }) => (kind, generation),
            other => panic!("expected timer fire, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn oneshot_fires_once_and_is_consumed() {
        let (mut timers, mut rx) = scheduler();
        timers.schedule(TimerKind::Offer, Duration::from_secs(30));
        assert!(timers.is_scheduled(TimerKind::Offer));

        advance(Duration::from_secs(30)).await;
        let (kind, generation) = expect_fire(&mut rx);
        assert_eq!(kind, TimerKind::Offer);
        assert!(timers.accept(kind, generation));
        assert!(!timers.is_scheduled(TimerKind::Offer));
        // Same fire delivered twice is rejected.
        assert!(!timers.accept(kind, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_timer_never_fires() {
        let (mut timers, mut rx) = scheduler();
        timers.schedule(TimerKind::Round, Duration::from_secs(10));
        timers.cancel(TimerKind::Round);

        advance(Duration::from_secs(11)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn reschedule_invalidates_earlier_generation() {
        let (mut timers, mut rx) = scheduler();
        timers.schedule(TimerKind::Round, Duration::from_secs(5));
        timers.schedule(TimerKind::Round, Duration::from_secs(20));

        advance(Duration::from_secs(6)).await;
        // The replaced timer's task was stopped before firing.
        assert!(rx.try_recv().is_err());

        advance(Duration::from_secs(14)).await;
        let (kind, generation) = expect_fire(&mut rx);
        assert!(timers.accept(kind, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_preserves_remaining_and_resume_extends_deadline() {
        let (mut timers, _rx) = scheduler();
        timers.schedule(TimerKind::Round, Duration::from_secs(90));

        advance(Duration::from_secs(30)).await;
        timers.pause();
        let frozen = timers.remaining(TimerKind::Round).unwrap();
        assert_eq!(frozen, Duration::from_secs(60));

        // Wall clock moves while paused; logical remaining does not.
        advance(Duration::from_secs(40)).await;
        assert_eq!(timers.remaining(TimerKind::Round).unwrap(), frozen);

        timers.resume();
        assert_eq!(timers.remaining(TimerKind::Round).unwrap(), frozen);
    }

    #[tokio::test(start_paused = true)]
    async fn fire_racing_a_pause_is_rejected() {
        let (mut timers, mut rx) = scheduler();
        timers.schedule(TimerKind::Settlement, Duration::from_secs(20));

        advance(Duration::from_secs(19)).await;
        timers.pause();
        advance(Duration::from_secs(5)).await;

        // Even if a task had fired around the pause, its generation is stale.
        while let Ok(SessionMessage::Timer { kind, generation }) = rx.try_recv() {
            assert!(!timers.accept(kind, generation));
        }
        assert!(timers.is_scheduled(TimerKind::Settlement));

        timers.resume();
        advance(Duration::from_secs(1)).await;
        let (kind, generation) = expect_fire(&mut rx);
        assert_eq!(kind, TimerKind::Settlement);
        assert!(timers.accept(kind, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_a_partial_repeating_tick() {
        let (mut timers, mut rx) = scheduler();
        timers.schedule_repeating(TimerKind::RaceTick, Duration::from_millis(100));

        advance(Duration::from_millis(100)).await;
        let (kind, generation) = expect_fire(&mut rx);
        assert!(timers.accept(kind, generation));

        // 60ms into the next tick; the pause must keep the 40ms left, not
        // reset to a full period.
        advance(Duration::from_millis(60)).await;
        timers.pause();
        assert_eq!(
            timers.remaining(TimerKind::RaceTick),
            Some(Duration::from_millis(40))
        );

        timers.resume();
        advance(Duration::from_millis(40)).await;
        let (kind, generation) = expect_fire(&mut rx);
        assert_eq!(kind, TimerKind::RaceTick);
        assert!(timers.accept(kind, generation));
    }

    #[tokio::test(start_paused = true)]
    async fn repeating_timer_stays_scheduled_across_fires() {
        let (mut timers, mut rx) = scheduler();
        timers.schedule_repeating(TimerKind::RaceTick, Duration::from_millis(100));

        advance(Duration::from_millis(100)).await;
        let (kind, generation) = expect_fire(&mut rx);
        assert!(timers.accept(kind, generation));
        assert!(timers.is_scheduled(TimerKind::RaceTick));

        advance(Duration::from_millis(100)).await;
        let (kind, generation) = expect_fire(&mut rx);
        assert!(timers.accept(kind, generation));

        timers.cancel(TimerKind::RaceTick);
        advance(Duration::from_millis(300)).await;
        while let Ok(SessionMessage::Timer { kind, generation }) = rx.try_recv() {
            assert!(!timers.accept(kind, generation));
        }
    }
}
