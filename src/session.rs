//! Session state machine (C6): mirrors the main application's real session
//! states and derives a synthetic overlay session lifecycle from them.
//! Transition table grounded on the `OverlayAppSession` state enum and
//! `DoMainSessionStateChange`/`DoOverlaySessionCommand` skeleton in the
//! reference implementation, filled in per the transition table.

use log::info;
use thiserror::Error;

use crate::utils::clock::Clock;
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MainState {
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
    Lost,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayState {
    Unknown,
    Idle,
    Ready,
    Synchronized,
    Visible,
    Focused,
    Stopping,
    LossPending,
    Exiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayCommand {
    Begin,
    End,
    RequestExit,
}

#[derive(Error, Debug, Clone, Copy)]
pub enum StateMachineError {
    #[error("session is lost")]
    SessionLost,
    #[error("command {0} invalid in the current state")]
    InvalidCommand(&'static str),
}

/// Main-side tracker: mirrors real state-change events from the runtime's
/// `PollEvent` one-for-one.
#[derive(Debug, Clone, Copy)]
pub struct MainTracker {
    pub state: MainState,
    pub running: bool,
    pub has_ever_waited_frame: bool,
}

impl Default for MainTracker {
    fn default() -> Self {
        MainTracker {
            state: MainState::Unknown,
            running: false,
            has_ever_waited_frame: false,
        }
    }
}

impl MainTracker {
    pub fn observe(&mut self, state: MainState) {
        self.state = state;
        self.running = matches!(
            state,
            MainState::Synchronized | MainState::Visible | MainState::Focused
        );
    }

    pub fn observe_wait_frame(&mut self) {
        self.has_ever_waited_frame = true;
    }

    fn is_lost_or_loss_pending(&self) -> bool {
        matches!(self.state, MainState::Lost | MainState::LossPending)
    }
}

/// One synthesized state-change event, timestamped by the injected clock
/// rather than the hardcoded placeholder the source used (see DESIGN.md
/// open-question resolution 1).
#[derive(Debug, Clone, Copy)]
pub struct SyntheticStateChange {
    pub to: OverlayState,
    pub timestamp: i64,
}

/// Overlay-side tracker: derives synthetic states from the main tracker
/// plus overlay-originated commands, per the transition table in §4.6.
pub struct OverlayTracker {
    state: OverlayState,
    exit_requested: bool,
    clock: Arc<dyn Clock>,
    epoch: Instant,
}

impl OverlayTracker {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let epoch = clock.now();
        OverlayTracker {
            state: OverlayState::Unknown,
            exit_requested: false,
            clock,
            epoch,
        }
    }

    pub fn state(&self) -> OverlayState {
        self.state
    }

    /// Re-evaluates the transition table against the current main tracker
    /// state. Returns the synthetic event if a transition fired, `None`
    /// otherwise. Called from the main tracker's `observe` path; `begin`/
    /// `end` commands are applied directly since the table alone can't
    /// distinguish "waiting for `begin`" from "already transitioned".
    pub fn reconcile(&mut self, main: &MainTracker) -> Option<SyntheticStateChange> {
        let next = self.next_state(main);
        self.transition_to(next)
    }

    pub fn apply_command(
        &mut self,
        command: OverlayCommand,
        main: &MainTracker,
    ) -> Result<Option<SyntheticStateChange>, StateMachineError> {
        match command {
            OverlayCommand::Begin => {
                if self.state != OverlayState::Ready {
                    return Err(StateMachineError::InvalidCommand("begin-session"));
                }
                if let Some(change) = self.transition_to(OverlayState::Synchronized) {
                    return Ok(Some(change));
                }
            }
            OverlayCommand::End => {
                if self.state != OverlayState::Stopping {
                    return Err(StateMachineError::InvalidCommand("end-session"));
                }
                if let Some(change) = self.transition_to(OverlayState::Idle) {
                    return Ok(Some(change));
                }
            }
            OverlayCommand::RequestExit => {
                self.exit_requested = true;
            }
        }
        Ok(self.reconcile(main))
    }

    fn transition_to(&mut self, next: OverlayState) -> Option<SyntheticStateChange> {
        if next == self.state {
            return None;
        }
        self.state = next;
        let timestamp = self.clock.now().duration_since(self.epoch).as_nanos() as i64 + 1;
        info!("overlay session transition -> {next:?}");
        Some(SyntheticStateChange { to: next, timestamp })
    }

    fn next_state(&self, main: &MainTracker) -> OverlayState {
        if self.state != OverlayState::LossPending && main.is_lost_or_loss_pending() {
            return OverlayState::LossPending;
        }

        match self.state {
            OverlayState::Unknown => {
                if main.state != MainState::Unknown {
                    OverlayState::Idle
                } else {
                    OverlayState::Unknown
                }
            }
            OverlayState::Idle => {
                if self.exit_requested || main.state == MainState::Exiting {
                    OverlayState::Exiting
                } else if main.running && main.has_ever_waited_frame {
                    OverlayState::Ready
                } else {
                    OverlayState::Idle
                }
            }
            OverlayState::Ready => OverlayState::Ready, // -> Synchronized only via explicit `begin`
            OverlayState::Synchronized => {
                if self.exit_requested || !main.running || main.state == MainState::Stopping {
                    OverlayState::Stopping
                } else if matches!(main.state, MainState::Visible | MainState::Focused) {
                    OverlayState::Visible
                } else {
                    OverlayState::Synchronized
                }
            }
            OverlayState::Visible => {
                if main.state == MainState::Synchronized {
                    OverlayState::Synchronized
                } else if main.state == MainState::Focused {
                    OverlayState::Focused
                } else if self.exit_requested || !main.running || main.state == MainState::Stopping {
                    OverlayState::Synchronized
                } else {
                    OverlayState::Visible
                }
            }
            OverlayState::Focused => {
                if matches!(main.state, MainState::Visible | MainState::Synchronized) {
                    OverlayState::Visible
                } else if self.exit_requested || !main.running || main.state == MainState::Stopping {
                    OverlayState::Visible
                } else {
                    OverlayState::Focused
                }
            }
            OverlayState::Stopping => OverlayState::Stopping, // -> Idle only via explicit `end`
            OverlayState::LossPending | OverlayState::Exiting => self.state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::clock::TestClock;

    fn tracker() -> OverlayTracker {
        OverlayTracker::new(Arc::new(TestClock::new()))
    }

    #[test]
    fn unknown_transitions_to_idle_once_main_departs_unknown() {
        let mut overlay = tracker();
        let mut main = MainTracker::default();
        main.observe(MainState::Idle);
        let change = overlay.reconcile(&main).unwrap();
        assert_eq!(change.to, OverlayState::Idle);
    }

    #[test]
    fn idle_to_ready_requires_running_and_has_waited_frame() {
        let mut overlay = tracker();
        let mut main = MainTracker::default();
        main.observe(MainState::Idle);
        overlay.reconcile(&main);

        main.observe(MainState::Synchronized);
        assert!(overlay.reconcile(&main).is_none(), "has_ever_waited_frame not yet set");

        main.observe_wait_frame();
        let change = overlay.reconcile(&main).unwrap();
        assert_eq!(change.to, OverlayState::Ready);
    }

    #[test]
    fn begin_moves_ready_to_synchronized() {
        let mut overlay = tracker();
        let mut main = MainTracker::default();
        main.observe(MainState::Idle);
        overlay.reconcile(&main);
        main.observe(MainState::Synchronized);
        main.observe_wait_frame();
        overlay.reconcile(&main);
        assert_eq!(overlay.state(), OverlayState::Ready);

        overlay.apply_command(OverlayCommand::Begin, &main).unwrap();
        assert_eq!(overlay.state(), OverlayState::Synchronized);
    }

    #[test]
    fn any_state_moves_to_loss_pending_on_main_loss() {
        let mut overlay = tracker();
        let mut main = MainTracker::default();
        main.observe(MainState::Idle);
        overlay.reconcile(&main);

        main.observe(MainState::Lost);
        let change = overlay.reconcile(&main).unwrap();
        assert_eq!(change.to, OverlayState::LossPending);
    }

    #[test]
    fn stopping_to_idle_only_via_end_command() {
        let mut overlay = OverlayTracker {
            state: OverlayState::Stopping,
            exit_requested: false,
            clock: Arc::new(TestClock::new()),
            epoch: Instant::now(),
        };
        let main = MainTracker::default();
        overlay.apply_command(OverlayCommand::End, &main).unwrap();
        assert_eq!(overlay.state(), OverlayState::Idle);
    }
}
