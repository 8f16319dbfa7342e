//! Heartbeat and reconnection scheduling.
//!
//! The scheduler owns every connection timer as a deadline. It never sleeps
//! and never touches the socket: the driver asks for [`Scheduler::next_deadline`],
//! sleeps until then and calls [`Scheduler::tick`], which reports what is due
//! as [`SchedulerAction`]s.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> Reconnecting -> Connecting -> ...
//!                                        \-> Disconnected (normal close)
//!                     Reconnecting (attempts exhausted) -> Failed
//! ```

use std::time::{Duration, Instant};

use crate::config::RealtimeConfig;

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Nothing scheduled
    Disconnected,
    /// A connection attempt is in flight
    Connecting,
    /// Socket open; heartbeat and liveness timers armed
    Connected,
    /// Waiting for the reconnect deadline
    Reconnecting,
    /// Attempts exhausted
    Failed,
}

/// Work that came due during a [`Scheduler::tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerAction {
    /// Send a `ping` heartbeat.
    SendHeartbeat,
    /// Open a new socket; `attempt` is 1-based.
    Reconnect {
        /// Attempt number since the last successful open
        attempt: u32,
    },
    /// Nothing was received for the liveness timeout; drop the socket.
    LivenessTimeout,
}

/// Result of reporting an unexpected close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// A reconnect is scheduled after `delay`.
    Reconnecting {
        /// Attempt number of the scheduled reconnect
        attempt: u32,
        /// Delay before it fires
        delay: Duration,
    },
    /// The attempt cap was reached.
    Failed {
        /// Attempts made before giving up
        attempts: u32,
    },
    /// No credential to reconnect with.
    Stopped,
}

/// Owns the heartbeat, reconnect and liveness deadlines.
#[derive(Debug, Clone)]
pub struct Scheduler {
    config: RealtimeConfig,
    state: SchedulerState,
    attempt: u32,
    next_heartbeat: Option<Instant>,
    reconnect_at: Option<Instant>,
    liveness_deadline: Option<Instant>,
}

impl Scheduler {
    /// Create an idle scheduler using the timings in `config`.
    pub fn new(config: &RealtimeConfig) -> Self {
        Self {
            config: config.clone(),
            state: SchedulerState::Disconnected,
            attempt: 0,
            next_heartbeat: None,
            reconnect_at: None,
            liveness_deadline: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        self.state
    }

    /// Reconnection attempts since the last successful open.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// A connection attempt has started.
    ///
    /// An explicit open while a reconnect is pending cancels the pending
    /// deadline. After `Failed` the attempt counter starts over.
    pub fn on_connecting(&mut self) {
        if self.state == SchedulerState::Failed {
            self.attempt = 0;
        }
        self.reconnect_at = None;
        self.state = SchedulerState::Connecting;
    }

    /// The socket opened: reset attempts and arm heartbeat and liveness.
    pub fn on_open(&mut self, now: Instant) {
        log::debug!(
            "[Scheduler] Connected after {} reconnect attempt(s)",
            self.attempt
        );
        self.state = SchedulerState::Connected;
        self.attempt = 0;
        self.reconnect_at = None;
        self.next_heartbeat = self.config.heartbeat_interval().map(|i| now + i);
        self.liveness_deadline = self.config.liveness_timeout().map(|t| now + t);
    }

    /// Any inbound frame proves the socket is alive.
    pub fn on_inbound(&mut self, now: Instant) {
        if self.state == SchedulerState::Connected
            && let Some(timeout) = self.config.liveness_timeout()
        {
            self.liveness_deadline = Some(now + timeout);
        }
    }

    /// The socket closed without being asked to.
    ///
    /// `can_reconnect` is false when no credential is stored.
    pub fn on_unexpected_close(&mut self, now: Instant, can_reconnect: bool) -> CloseOutcome {
        self.next_heartbeat = None;
        self.liveness_deadline = None;
        self.reconnect_at = None;

        if !can_reconnect {
            log::info!("[Scheduler] No credential, not reconnecting");
            self.state = SchedulerState::Disconnected;
            self.attempt = 0;
            return CloseOutcome::Stopped;
        }

        if self.attempt >= self.config.max_reconnect_attempts {
            log::error!(
                "[Scheduler] Max reconnect attempts reached ({})",
                self.attempt
            );
            self.state = SchedulerState::Failed;
            return CloseOutcome::Failed {
                attempts: self.attempt,
            };
        }

        self.attempt += 1;
        let delay = self.config.reconnect_delay(self.attempt);
        log::info!(
            "[Scheduler] Reconnecting in {}ms (attempt {}/{})",
            delay.as_millis(),
            self.attempt,
            self.config.max_reconnect_attempts
        );
        self.state = SchedulerState::Reconnecting;
        self.reconnect_at = Some(now + delay);
        CloseOutcome::Reconnecting {
            attempt: self.attempt,
            delay,
        }
    }

    /// Cancel every timer and forget the attempt count.
    pub fn stop(&mut self) {
        self.state = SchedulerState::Disconnected;
        self.attempt = 0;
        self.next_heartbeat = None;
        self.reconnect_at = None;
        self.liveness_deadline = None;
    }

    /// Earliest pending deadline.
    pub fn next_deadline(&self) -> Option<Instant> {
        [self.next_heartbeat, self.reconnect_at, self.liveness_deadline]
            .into_iter()
            .flatten()
            .min()
    }

    /// Collect everything due at `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<SchedulerAction> {
        let mut actions = Vec::new();

        match self.state {
            SchedulerState::Reconnecting => {
                if let Some(at) = self.reconnect_at
                    && at <= now
                {
                    self.reconnect_at = None;
                    self.state = SchedulerState::Connecting;
                    actions.push(SchedulerAction::Reconnect {
                        attempt: self.attempt,
                    });
                }
            }
            SchedulerState::Connected => {
                if let Some(deadline) = self.liveness_deadline
                    && deadline <= now
                {
                    log::warn!("[Scheduler] No inbound traffic, liveness timeout");
                    self.next_heartbeat = None;
                    self.liveness_deadline = None;
                    actions.push(SchedulerAction::LivenessTimeout);
                    return actions;
                }
                if let Some(at) = self.next_heartbeat
                    && at <= now
                {
                    self.next_heartbeat = self.config.heartbeat_interval().map(|i| now + i);
                    actions.push(SchedulerAction::SendHeartbeat);
                }
            }
            SchedulerState::Disconnected | SchedulerState::Connecting | SchedulerState::Failed => {}
        }

        actions
    }
}
