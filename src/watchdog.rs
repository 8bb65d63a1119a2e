//! Debounced idle detection across all pipeline stages.
//!
//! No stage knows the global completion state: discovery, download,
//! and analysis overlap at different paces with asynchronous
//! completions. The only reliable termination signal is a sustained
//! absence of activity across the whole pipeline, so the watchdog
//! polls every registered stage on a fixed cadence and counts down
//! while nothing is alive. The countdown window guards against false
//! termination in the gap between one stage finishing and the next
//! stage's work becoming observable (e.g. between "download finished"
//! and "analyzer reports busy").

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

/// Number of consecutive all-idle polls before the pipeline quits.
pub const COUNTDOWN_INIT: u32 = 6;

/// Default watchdog polling cadence.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Capability to report whether a stage currently has outstanding
/// asynchronous work.
///
/// Implementations must derive the answer from their own
/// outstanding-work state (in-flight counters, non-empty queues,
/// running timers) on every call; the result is never cached by the
/// watchdog.
pub trait Liveness: Send + Sync {
    /// Returns `true` while the stage is still active.
    fn is_alive(&self) -> bool;
}

/// Signals emitted as the countdown descends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogSignal {
    /// Two thirds of the countdown remain: stages should emit their
    /// aggregate final reports now, while the log is still open.
    FirstWarning,
    /// One third remains: the log collector should close the document.
    LastWarning,
    /// Countdown exhausted: stop the pipeline.
    Quit,
}

/// Polls the liveness of all registered stages and drives the
/// two-phase shutdown sequence.
pub struct Watchdog {
    stages: Vec<Arc<dyn Liveness>>,
    countdown: u32,
    countdown_init: u32,
    terminal: bool,
}

impl Watchdog {
    /// Creates a watchdog with the default countdown window.
    #[must_use]
    pub fn new() -> Self {
        Self::with_countdown(COUNTDOWN_INIT)
    }

    /// Creates a watchdog with an explicit countdown window (tests use
    /// small windows to keep scenarios short).
    #[must_use]
    pub fn with_countdown(countdown_init: u32) -> Self {
        Self {
            stages: Vec::new(),
            countdown: countdown_init,
            countdown_init,
            terminal: false,
        }
    }

    /// Registers a stage to be polled. The watchdog holds only the
    /// narrow liveness capability, never a concrete stage reference.
    pub fn add_stage(&mut self, stage: Arc<dyn Liveness>) {
        self.stages.push(stage);
    }

    /// Returns the number of registered stages.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Evaluates one polling cycle.
    ///
    /// Any alive stage (short-circuited on the first) resets the
    /// countdown to its initial value; otherwise the countdown is
    /// decremented. Threshold crossings yield signals: first warning
    /// at two thirds, last warning at one third, quit at zero. Each
    /// fires at most once per descent; a reset re-arms all three.
    pub fn poll(&mut self) -> Option<WatchdogSignal> {
        if self.terminal {
            return None;
        }

        let any_alive = self.stages.iter().any(|stage| stage.is_alive());
        if any_alive {
            self.countdown = self.countdown_init;
            return None;
        }

        self.countdown = self.countdown.saturating_sub(1);
        if self.countdown == 0 {
            debug!("watchdog says quit now");
            self.terminal = true;
            Some(WatchdogSignal::Quit)
        } else if self.countdown == self.countdown_init * 2 / 3 {
            debug!("watchdog gives first warning");
            Some(WatchdogSignal::FirstWarning)
        } else if self.countdown == self.countdown_init / 3 {
            debug!("watchdog gives last warning");
            Some(WatchdogSignal::LastWarning)
        } else {
            None
        }
    }

    /// Drives [`poll`](Self::poll) on a fixed interval, forwarding
    /// signals until `Quit` is sent or the receiver goes away.
    pub async fn run(mut self, interval: Duration, signals: mpsc::UnboundedSender<WatchdogSignal>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick of a tokio interval fires immediately; skip it
        // so the first real poll happens one interval after startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Some(signal) = self.poll() {
                let quit = signal == WatchdogSignal::Quit;
                if signals.send(signal).is_err() || quit {
                    break;
                }
            }
        }
    }
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}
