//! Cancellable one-shot timers for the session loop
//!
//! Every armed timer is a small tokio task that sleeps until its deadline and
//! then reports back through a channel owned by the scheduler. At most one
//! timer exists per [`TimerKind`]; arming a kind again cancels the previous
//! timer. Because an expiry can already sit in the channel when its timer is
//! replaced, every expiry carries the generation it was armed with and
//! [`Scheduler::accept`] drops anything that is not the current generation.

use crate::device::LampId;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Quiet interval before a threshold edit is published
    Debounce,
    /// Deadline of the pending threshold confirmation
    Confirmation,
    /// Deferred switch-off of one lamp
    DelayOff(LampId),
    NoticeDismiss,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerFired {
    pub kind: TimerKind,
    generation: u64,
}

struct ArmedTimer {
    generation: u64,
    deadline: Instant,
    cancel: CancellationToken,
}

pub struct Scheduler {
    timers: HashMap<TimerKind, ArmedTimer>,
    next_generation: u64,
    fired_tx: mpsc::UnboundedSender<TimerFired>,
    fired_rx: mpsc::UnboundedReceiver<TimerFired>,
}

impl Scheduler {
    pub fn new() -> Self {
        let (fired_tx, fired_rx) = mpsc::unbounded_channel();
        Self {
            timers: HashMap::new(),
            next_generation: 0,
            fired_tx,
            fired_rx,
        }
    }

    /// Arms `kind` to fire after `delay`, replacing any timer of the same kind.
    /// Returns the deadline.
    pub fn arm(&mut self, kind: TimerKind, delay: Duration) -> Instant {
        self.cancel(kind);

        self.next_generation += 1;
        let generation = self.next_generation;
        let deadline = Instant::now() + delay;
        let cancel = CancellationToken::new();

        let token = cancel.clone();
        let fired_tx = self.fired_tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep_until(deadline) => {
                    // The receiver only goes away with the scheduler itself.
                    let _ = fired_tx.send(TimerFired { kind, generation });
                }
            }
        });

        debug!("Armed {:?} timer (generation {}) for {:?}", kind, generation, delay);
        self.timers.insert(
            kind,
            ArmedTimer {
                generation,
                deadline,
                cancel,
            },
        );
        deadline
    }

    /// Cancels the timer of `kind`. Returns whether one was armed; cancelling
    /// twice is a no-op.
    pub fn cancel(&mut self, kind: TimerKind) -> bool {
        match self.timers.remove(&kind) {
            Some(timer) => {
                timer.cancel.cancel();
                debug!("Cancelled {:?} timer (generation {})", kind, timer.generation);
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (kind, timer) in self.timers.drain() {
            timer.cancel.cancel();
            debug!("Cancelled {:?} timer on shutdown", kind);
        }
    }

    /// Checks an expiry against the current generation of its kind and
    /// disarms the kind when it matches
    pub fn accept(&mut self, fired: TimerFired) -> bool {
        match self.timers.get(&fired.kind) {
            Some(timer) if timer.generation == fired.generation => {
                self.timers.remove(&fired.kind);
                true
            }
            _ => {
                debug!(
                    "Dropping superseded {:?} expiry (generation {})",
                    fired.kind, fired.generation
                );
                false
            }
        }
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.timers.contains_key(&kind)
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.timers.get(&kind).map(|timer| timer.deadline)
    }

    /// Armed delay-off timers by lamp
    pub fn delay_timers(&self) -> Vec<(LampId, Instant)> {
        let mut timers: Vec<(LampId, Instant)> = self
            .timers
            .iter()
            .filter_map(|(kind, timer)| match kind {
                TimerKind::DelayOff(lamp) => Some((*lamp, timer.deadline)),
                _ => None,
            })
            .collect();
        timers.sort();
        timers
    }

    /// Waits for the next expiry, current or superseded
    pub async fn next_fired(&mut self) -> Option<TimerFired> {
        self.fired_rx.recv().await
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let mut scheduler = Scheduler::new();
        let start = Instant::now();
        let deadline = scheduler.arm(TimerKind::Debounce, Duration::from_millis(400));
        assert_eq!(scheduler.deadline(TimerKind::Debounce), Some(deadline));

        let fired = scheduler.next_fired().await.unwrap();
        assert_eq!(fired.kind, TimerKind::Debounce);
        assert!(Instant::now() >= start + Duration::from_millis(400));
        assert!(scheduler.accept(fired));
        assert!(!scheduler.is_armed(TimerKind::Debounce));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_silences_the_timer() {
        let mut scheduler = Scheduler::new();
        scheduler.arm(TimerKind::Debounce, Duration::from_millis(100));
        assert!(scheduler.cancel(TimerKind::Debounce));
        assert!(!scheduler.cancel(TimerKind::Debounce));

        scheduler.arm(TimerKind::NoticeDismiss, Duration::from_millis(500));
        let fired = scheduler.next_fired().await.unwrap();
        assert_eq!(fired.kind, TimerKind::NoticeDismiss);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_expiry_already_queued_is_rejected() {
        let mut scheduler = Scheduler::new();
        scheduler.arm(TimerKind::Confirmation, Duration::from_millis(100));
        tokio::time::sleep(Duration::from_millis(150)).await;

        scheduler.arm(TimerKind::Confirmation, Duration::from_millis(100));
        let stale = scheduler.next_fired().await.unwrap();
        assert!(!scheduler.accept(stale));
        assert!(scheduler.is_armed(TimerKind::Confirmation));

        let current = scheduler.next_fired().await.unwrap();
        assert!(scheduler.accept(current));
    }

    #[tokio::test(start_paused = true)]
    async fn timers_of_different_lamps_are_independent() {
        let mut scheduler = Scheduler::new();
        scheduler.arm(TimerKind::DelayOff(LampId::Room1), Duration::from_secs(60));
        scheduler.arm(TimerKind::DelayOff(LampId::Room2), Duration::from_secs(120));
        scheduler.cancel(TimerKind::DelayOff(LampId::Room2));

        assert_eq!(scheduler.delay_timers().len(), 1);
        let fired = scheduler.next_fired().await.unwrap();
        assert_eq!(fired.kind, TimerKind::DelayOff(LampId::Room1));
        assert!(scheduler.accept(fired));
    }
}
