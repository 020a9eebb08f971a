//! Cancellable delayed and repeating events.
//!
//! A `TimerSlot` holds at most one live timer.  Starting a timer cancels the
//! previous one in the same slot.  Each start gets a fresh generation which
//! is stamped on every event it emits; the owner checks
//! [`TimerSlot::is_current`] (or [`TimerSlot::fire`] for one-shots) before
//! acting, so an event that was already queued when the slot was restarted
//! or cancelled is dropped.

use tokio::sync::mpsc;
use tokio::time::{self, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Floor for repeating periods; `interval_at` rejects zero.
const MIN_PERIOD: Duration = Duration::from_millis(1);

#[derive(Debug, Default)]
pub struct TimerSlot {
    generation: u64,
    token: Option<CancellationToken>,
}

impl TimerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send `make_event(generation)` once after `delay`.
    pub fn start_once<E, F>(&mut self, delay: Duration, tx: &mpsc::Sender<E>, make_event: F) -> u64
    where
        E: Send + 'static,
        F: FnOnce(u64) -> E + Send + 'static,
    {
        let (generation, token) = self.rearm();
        let tx = tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = time::sleep(delay) => {
                    let _ = tx.send(make_event(generation)).await;
                }
            }
        });
        generation
    }

    /// Send `make_event(generation)` every `period`, first one period from now.
    /// A zero period is raised to one millisecond.
    pub fn start_every<E, F>(&mut self, period: Duration, tx: &mpsc::Sender<E>, make_event: F) -> u64
    where
        E: Send + 'static,
        F: Fn(u64) -> E + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let (generation, token) = self.rearm();
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if tx.send(make_event(generation)).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        generation
    }

    /// Idempotent; safe with nothing running.
    pub fn cancel(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
        self.generation += 1;
    }

    pub fn is_active(&self) -> bool {
        self.token.is_some()
    }

    /// True if `generation` belongs to the timer currently in this slot.
    pub fn is_current(&self, generation: u64) -> bool {
        self.token.is_some() && self.generation == generation
    }

    /// Consume a one-shot event.  Returns false for stale generations.
    pub fn fire(&mut self, generation: u64) -> bool {
        if self.is_current(generation) {
            self.token = None;
            true
        } else {
            false
        }
    }

    fn rearm(&mut self) -> (u64, CancellationToken) {
        self.cancel();
        let token = CancellationToken::new();
        self.token = Some(token.clone());
        (self.generation, token)
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut slot = TimerSlot::new();
        let start = Instant::now();

        let generation = slot.start_once(Duration::from_secs(2), &tx, |g| g);
        let got = rx.recv().await.unwrap();

        assert_eq!(got, generation);
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert!(slot.fire(got));
        assert!(!slot.is_active());
        assert!(!slot.fire(got));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_replaces_previous_timer() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut slot = TimerSlot::new();
        let start = Instant::now();

        let first = slot.start_once(Duration::from_secs(2), &tx, |g| g);
        time::sleep(Duration::from_secs(1)).await;
        let second = slot.start_once(Duration::from_secs(2), &tx, |g| g);
        assert_ne!(first, second);
        assert!(!slot.is_current(first));

        let got = rx.recv().await.unwrap();
        assert_eq!(got, second);
        assert!(start.elapsed() >= Duration::from_secs(3));

        let nothing = time::timeout(Duration::from_secs(10), rx.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_silences_timer() {
        let (tx, mut rx) = mpsc::channel::<u64>(8);
        let mut slot = TimerSlot::new();
        slot.cancel();

        let generation = slot.start_once(Duration::from_millis(500), &tx, |g| g);
        slot.cancel();
        slot.cancel();
        assert!(!slot.is_current(generation));

        let nothing = time::timeout(Duration::from_secs(5), rx.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_timer_ticks_until_cancelled() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut slot = TimerSlot::new();
        let start = Instant::now();
        let period = Duration::from_secs(300);

        let generation = slot.start_every(period, &tx, |g| g);
        for _ in 0..3 {
            let got = rx.recv().await.unwrap();
            assert!(slot.is_current(got));
        }
        assert!(start.elapsed() >= period * 3);
        assert!(slot.is_current(generation));

        slot.cancel();
        let nothing = time::timeout(period * 2, rx.recv()).await;
        assert!(nothing.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_clamped() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut slot = TimerSlot::new();

        let generation = slot.start_every(Duration::ZERO, &tx, |g| g);
        for _ in 0..3 {
            let got = time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(got, generation);
        }
        assert!(slot.is_current(generation));
        slot.cancel();
    }
}
