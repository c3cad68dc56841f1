//! Call lifecycle and the transitions it allows.

use std::fmt;

use tracing::debug;

use crate::error::{Result, SignalError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Calling,
    Ringing,
    Connected,
    Ended,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Idle => write!(f, "idle"),
            CallState::Calling => write!(f, "calling"),
            CallState::Ringing => write!(f, "ringing"),
            CallState::Connected => write!(f, "connected"),
            CallState::Ended => write!(f, "ended"),
        }
    }
}

/// Inputs that move a call between states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    StartCall,
    CallResponseOk,
    CallResponseUnreachable,
    OfferReceived,
    AcceptCall,
    RejectCall,
    LocalAnswerSet,
    AnswerReceived,
    ConnectionClosedOrFailed,
    Reset,
}

impl Transition {
    pub fn name(self) -> &'static str {
        match self {
            Transition::StartCall => "start call",
            Transition::CallResponseOk => "handle call response",
            Transition::CallResponseUnreachable => "handle unreachable response",
            Transition::OfferReceived => "receive offer",
            Transition::AcceptCall => "accept call",
            Transition::RejectCall => "reject call",
            Transition::LocalAnswerSet => "complete answer",
            Transition::AnswerReceived => "apply answer",
            Transition::ConnectionClosedOrFailed => "end call",
            Transition::Reset => "reset",
        }
    }
}

/// Holds the current [`CallState`] and validates every move out of it.
#[derive(Debug)]
pub struct CallStateMachine {
    state: CallState,
}

impl Default for CallStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CallStateMachine {
    pub fn new() -> Self {
        Self {
            state: CallState::Idle,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    /// Where `transition` would lead from the current state, if anywhere.
    pub fn next(&self, transition: Transition) -> Option<CallState> {
        use CallState::*;
        use Transition::*;

        match (self.state, transition) {
            (Idle, StartCall) => Some(Calling),
            (Calling, CallResponseOk) => Some(Calling),
            (Calling, CallResponseUnreachable) => Some(Idle),
            (Idle, OfferReceived) => Some(Ringing),
            (Ringing, AcceptCall) => Some(Calling),
            (Ringing, RejectCall) => Some(Idle),
            (Calling, LocalAnswerSet) => Some(Connected),
            (Calling, AnswerReceived) => Some(Connected),
            (_, ConnectionClosedOrFailed) => Some(Ended),
            (Ended, Reset) => Some(Idle),
            _ => None,
        }
    }

    /// Check that `transition` is allowed without applying it.
    pub fn check(&self, transition: Transition) -> Result<CallState> {
        self.next(transition)
            .ok_or(SignalError::InvalidTransition {
                state: self.state,
                action: transition.name(),
            })
    }

    pub fn apply(&mut self, transition: Transition) -> Result<CallState> {
        let next = self.check(transition)?;
        if next != self.state {
            debug!("Call state {} -> {} ({:?})", self.state, next, transition);
        }
        self.state = next;
        Ok(next)
    }
}
