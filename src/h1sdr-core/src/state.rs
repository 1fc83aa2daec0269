// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Acquisition state machine.
//!
//! `Stopped -> Starting -> Running -> Stopping -> Stopped`, plus a fault edge
//! from any live state straight back to `Stopped`. Transitions not listed in
//! [`AcquisitionStateMachine::next_state`] are rejected.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::HardwareError;

/// Events that can trigger state transitions.
#[derive(Debug, Clone)]
pub enum AcquisitionEvent {
    /// Caller asked to start streaming
    StartRequested,
    /// Hardware configured and read thread running
    Started,
    /// Caller asked to stop streaming
    StopRequested,
    /// Read thread has exited
    Stopped,
    /// Hardware failure that the read loop cannot recover from
    Failed(HardwareError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum AcquisitionState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for AcquisitionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stopped => "Stopped",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
        };
        f.write_str(name)
    }
}

impl AcquisitionState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Starting, Running or Stopping.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Stopped)
    }
}

#[derive(Debug, Clone)]
pub struct AcquisitionStateMachine {
    state: AcquisitionState,
    last_error: Option<HardwareError>,
    transition_count: u64,
    last_transition: Option<Instant>,
}

impl Default for AcquisitionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl AcquisitionStateMachine {
    pub fn new() -> Self {
        Self {
            state: AcquisitionState::Stopped,
            last_error: None,
            transition_count: 0,
            last_transition: None,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    /// Error that caused the most recent fault transition, if any.
    pub fn last_error(&self) -> Option<&HardwareError> {
        self.last_error.as_ref()
    }

    pub fn transition_count(&self) -> u64 {
        self.transition_count
    }

    pub fn time_in_state(&self) -> Option<Duration> {
        self.last_transition.map(|t| t.elapsed())
    }

    /// Process an event and potentially transition to a new state.
    /// Returns true if a transition occurred.
    pub fn process_event(&mut self, event: AcquisitionEvent) -> bool {
        let fault = match &event {
            AcquisitionEvent::Failed(err) => Some(err.clone()),
            _ => None,
        };
        let Some(next) = self.next_state(event) else {
            return false;
        };
        if next == AcquisitionState::Starting {
            self.last_error = None;
        }
        if fault.is_some() {
            self.last_error = fault;
        }
        self.state = next;
        self.transition_count += 1;
        self.last_transition = Some(Instant::now());
        true
    }

    fn next_state(&self, event: AcquisitionEvent) -> Option<AcquisitionState> {
        use AcquisitionEvent as E;
        use AcquisitionState as S;

        match (self.state, event) {
            (S::Stopped, E::StartRequested) => Some(S::Starting),
            (S::Starting, E::Started) => Some(S::Running),
            (S::Starting | S::Running, E::StopRequested) => Some(S::Stopping),
            (S::Stopping, E::Stopped) => Some(S::Stopped),
            // The read thread can exit on its own (e.g. end of a finite source).
            (S::Running, E::Stopped) => Some(S::Stopped),
            (S::Starting | S::Running | S::Stopping, E::Failed(_)) => Some(S::Stopped),
            _ => None,
        }
    }
}
