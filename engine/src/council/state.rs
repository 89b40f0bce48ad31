//! Request lifecycle state machine.
//!
//! ```text
//! Classifying ──► Dispatching ──► Fusing ──► Done
//!                     │  │          │
//!                     │  └──────► Escalating ──► Fusing
//!                     ▼             (at most once)
//!                   Denied
//!
//! any non-terminal state ──► Exhausted
//! ```
//!
//! Every transition is validated and recorded so a response can carry the
//! exact path its request took.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    Classifying,
    Dispatching,
    Fusing,
    Escalating,
    /// Answer produced. Terminal.
    Done,
    /// Budget refused the request. Terminal.
    Denied,
    /// No route produced an answer. Terminal.
    Exhausted,
}

impl RequestPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Denied | Self::Exhausted)
    }
}

impl fmt::Display for RequestPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Classifying => write!(f, "classifying"),
            Self::Dispatching => write!(f, "dispatching"),
            Self::Fusing => write!(f, "fusing"),
            Self::Escalating => write!(f, "escalating"),
            Self::Done => write!(f, "done"),
            Self::Denied => write!(f, "denied"),
            Self::Exhausted => write!(f, "exhausted"),
        }
    }
}

fn is_legal_transition(from: RequestPhase, to: RequestPhase) -> bool {
    use RequestPhase::*;

    if to == Exhausted && !from.is_terminal() {
        return true;
    }

    matches!(
        (from, to),
        (Classifying, Dispatching)
            | (Dispatching, Fusing)
            | (Dispatching, Escalating)
            | (Dispatching, Denied)
            | (Fusing, Escalating)
            | (Fusing, Done)
            | (Escalating, Fusing)
    )
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: RequestPhase,
    pub to: RequestPhase,
    /// Milliseconds since the request started
    pub elapsed_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub from: RequestPhase,
    pub to: RequestPhase,
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "illegal request transition: {} -> {}", self.from, self.to)
    }
}

impl std::error::Error for IllegalTransition {}

pub struct RequestStateMachine {
    current: RequestPhase,
    escalations: u32,
    started_at: Instant,
    transitions: Vec<TransitionRecord>,
}

impl RequestStateMachine {
    /// Start at `Classifying`.
    pub fn new() -> Self {
        Self {
            current: RequestPhase::Classifying,
            escalations: 0,
            started_at: Instant::now(),
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> RequestPhase {
        self.current
    }

    pub fn has_escalated(&self) -> bool {
        self.escalations > 0
    }

    pub fn advance(&mut self, to: RequestPhase, reason: Option<&str>) -> Result<(), IllegalTransition> {
        let illegal = IllegalTransition {
            from: self.current,
            to,
        };
        if !is_legal_transition(self.current, to) {
            return Err(illegal);
        }
        if to == RequestPhase::Escalating {
            if self.escalations > 0 {
                return Err(illegal);
            }
            self.escalations += 1;
        }

        tracing::debug!(from = %self.current, to = %to, reason, "Request phase transition");
        self.transitions.push(TransitionRecord {
            from: self.current,
            to,
            elapsed_ms: self.started_at.elapsed().as_millis() as u64,
            reason: reason.map(String::from),
        });
        self.current = to;
        Ok(())
    }

    pub fn transitions(&self) -> &[TransitionRecord] {
        &self.transitions
    }

    pub fn into_transitions(self) -> Vec<TransitionRecord> {
        self.transitions
    }
}

impl Default for RequestStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use RequestPhase::*;

    #[test]
    fn test_happy_path() {
        let mut sm = RequestStateMachine::new();
        sm.advance(Dispatching, None).unwrap();
        sm.advance(Fusing, None).unwrap();
        sm.advance(Done, Some("fused")).unwrap();
        assert_eq!(sm.current(), Done);
        assert_eq!(sm.transitions().len(), 3);
        assert_eq!(sm.transitions()[2].reason.as_deref(), Some("fused"));
    }

    #[test]
    fn test_escalation_at_most_once() {
        let mut sm = RequestStateMachine::new();
        sm.advance(Dispatching, None).unwrap();
        sm.advance(Fusing, None).unwrap();
        sm.advance(Escalating, None).unwrap();
        sm.advance(Fusing, None).unwrap();
        assert!(sm.has_escalated());
        let err = sm.advance(Escalating, None).unwrap_err();
        assert_eq!(err.from, Fusing);
        sm.advance(Done, None).unwrap();
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut sm = RequestStateMachine::new();
        sm.advance(Dispatching, None).unwrap();
        sm.advance(Denied, None).unwrap();
        assert!(sm.advance(Exhausted, None).is_err());
        assert!(sm.advance(Fusing, None).is_err());
    }

    #[test]
    fn test_cannot_skip_dispatch() {
        let mut sm = RequestStateMachine::new();
        assert!(sm.advance(Fusing, None).is_err());
        assert!(sm.advance(Exhausted, None).is_ok());
    }
}
