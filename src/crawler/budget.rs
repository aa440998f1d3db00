//! Adaptive request budget driven by provider rate-limit headers
//!
//! This module handles:
//! - The token gate: never spend more requests than the provider last reported
//!   as remaining before its reset deadline
//! - The pacer: spread the remaining requests across the reset window instead
//!   of bursting them
//! - The shared cooldown: an HTTP 429 pauses every caller, not just the one
//!   that saw it
//!
//! The latest response headers always win over local predictions, since other
//! processes and provider-side resets move the real quota.

use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{sleep_until, Instant};

/// Pacer spacing before the first response arrives
const PERMISSIVE_SPACING: Duration = Duration::from_millis(1);

/// Shortest reset window accepted from a header
const MIN_RESET: Duration = Duration::from_millis(1);

/// Mutable budget state, only touched under the lock
#[derive(Debug)]
struct BudgetState {
    /// Locally reserved remaining tokens; `None` means unknown, do not gate
    tokens: Option<u32>,

    /// When the provider refills the quota
    reset_at: Instant,

    /// Minimum spacing between consecutive requests
    spacing: Duration,

    /// Earliest instant the next request may start
    next_slot: Instant,

    /// Shared cooldown after HTTP 429
    paused_until: Option<Instant>,
}

/// What a caller must do after inspecting the state
enum Gate {
    Proceed,
    WaitUntil(Instant),
}

/// Request budget shared by every worker of one harvest
///
/// Only reachable through [`acquire`](RateBudget::acquire),
/// [`update`](RateBudget::update) and [`pause_for`](RateBudget::pause_for).
#[derive(Debug)]
pub struct RateBudget {
    state: Mutex<BudgetState>,
    notify: Notify,
    safety_margin: u32,
    min_spacing: Duration,
    max_spacing: Duration,
}

impl RateBudget {
    /// Creates a budget with unknown quota
    ///
    /// # Arguments
    ///
    /// * `safety_margin` - Tokens held back from every reported remaining count
    /// * `min_spacing` - Floor for the pacer spacing (the configured request interval)
    /// * `max_spacing` - Ceiling for the pacer spacing
    pub fn new(safety_margin: u32, min_spacing: Duration, max_spacing: Duration) -> Self {
        let now = Instant::now();
        Self {
            state: Mutex::new(BudgetState {
                tokens: None,
                reset_at: now,
                spacing: PERMISSIVE_SPACING.max(min_spacing),
                next_slot: now,
                paused_until: None,
            }),
            notify: Notify::new(),
            safety_margin,
            min_spacing,
            max_spacing: max_spacing.max(min_spacing),
        }
    }

    /// Waits until a request may be issued
    ///
    /// Passes the token gate when the quota is unknown, when a token can be
    /// reserved, or once the reset deadline has passed. Then waits for the
    /// caller's pacer slot.
    pub async fn acquire(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before inspecting state so an update cannot slip past
            notified.as_mut().enable();

            match self.try_pass_gate() {
                Gate::Proceed => break,
                Gate::WaitUntil(deadline) => {
                    tracing::trace!(
                        "Budget exhausted, waiting {:?} for reset",
                        deadline.saturating_duration_since(Instant::now())
                    );
                    tokio::select! {
                        _ = &mut notified => {}
                        _ = sleep_until(deadline) => {}
                    }
                }
            }
        }

        let slot = self.reserve_slot();
        sleep_until(slot).await;
    }

    /// Records the provider's latest rate-limit headers
    ///
    /// # Arguments
    ///
    /// * `remaining` - `X-RateLimit-Remaining`
    /// * `reset_secs` - `X-RateLimit-Reset`, seconds until the quota refills
    pub fn update(&self, remaining: u32, reset_secs: f64) {
        let reset = if reset_secs.is_finite() && reset_secs > 0.0 {
            Duration::from_secs_f64(reset_secs).max(MIN_RESET)
        } else {
            MIN_RESET
        };
        let effective = remaining.saturating_sub(self.safety_margin);

        let spacing = if effective == 0 {
            reset.max(Duration::from_secs(1))
        } else {
            reset / effective
        };
        let spacing = spacing.clamp(self.min_spacing, self.max_spacing);

        {
            let mut state = self.lock();
            let now = Instant::now();
            state.tokens = Some(effective);
            state.reset_at = now + reset;
            state.spacing = spacing;
            // a longer spacing applies from now on, a shorter one frees queued slots
            state.next_slot = state.next_slot.min(now + spacing);
        }

        tracing::debug!(
            "Budget updated: {} tokens until reset in {:?}, spacing {:?}",
            effective,
            reset,
            spacing
        );
        self.notify.notify_waiters();
    }

    /// Pauses every caller for `duration` and waits it out
    ///
    /// Used when the provider answers HTTP 429.
    pub async fn pause_for(&self, duration: Duration) {
        let until = self.pause(duration);
        sleep_until(until).await;
    }

    /// Starts or extends the shared cooldown without waiting, returning its end
    pub fn pause(&self, duration: Duration) -> Instant {
        let until = Instant::now() + duration;
        let extended = {
            let mut state = self.lock();
            let extended = match state.paused_until {
                Some(existing) if existing > until => existing,
                _ => until,
            };
            state.paused_until = Some(extended);
            extended
        };
        tracing::debug!("Budget paused for {:?}", duration);
        self.notify.notify_waiters();
        extended
    }

    /// Locally reserved tokens, `None` when unknown
    pub fn tokens_remaining(&self) -> Option<u32> {
        let mut state = self.lock();
        Self::expire(&mut state, Instant::now());
        state.tokens
    }

    /// Current pacer spacing
    pub fn spacing(&self) -> Duration {
        self.lock().spacing
    }

    fn try_pass_gate(&self) -> Gate {
        let mut state = self.lock();
        let now = Instant::now();

        if let Some(until) = state.paused_until {
            if now < until {
                return Gate::WaitUntil(until);
            }
            state.paused_until = None;
        }

        Self::expire(&mut state, now);

        match state.tokens {
            None => Gate::Proceed,
            Some(0) => Gate::WaitUntil(state.reset_at),
            Some(n) => {
                state.tokens = Some(n - 1);
                Gate::Proceed
            }
        }
    }

    /// Forgets the token count once the reset deadline has passed
    fn expire(state: &mut BudgetState, now: Instant) {
        if state.tokens.is_some() && now >= state.reset_at {
            state.tokens = None;
        }
    }

    fn reserve_slot(&self) -> Instant {
        let mut state = self.lock();
        let slot = state.next_slot.max(Instant::now());
        state.next_slot = slot + state.spacing;
        slot
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BudgetState> {
        // the state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for RateBudget {
    fn default() -> Self {
        Self::new(1, Duration::ZERO, Duration::from_secs(60))
    }
}
