//! Bridge lifecycle state machine.
//!
//! ```text
//! Init ─▶ ConnectingBus ─▶ Discovering ─▶ Running ─▶ Disconnecting ─▶ Terminated
//!              │                │                          ▲
//!              └────────────────┴──── (shutdown signal) ───┘
//!
//! any non-terminal state ─▶ Failed
//! ```
//!
//! [`Lifecycle`] publishes the current state through a `tokio::sync::watch`
//! channel and rejects every transition not drawn above.

use std::fmt;

use altherma_types::BridgeError;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Init,
    ConnectingBus,
    Discovering,
    Running,
    Disconnecting,
    Terminated,
    Failed,
}

impl BridgeState {
    pub fn is_terminal(self) -> bool {
        matches!(self, BridgeState::Terminated | BridgeState::Failed)
    }

    pub fn can_transition_to(self, next: BridgeState) -> bool {
        use BridgeState::*;
        if next == Failed {
            return !self.is_terminal();
        }
        matches!(
            (self, next),
            (Init, ConnectingBus)
                | (ConnectingBus, Discovering)
                | (Discovering, Running)
                | (ConnectingBus | Discovering | Running, Disconnecting)
                | (Disconnecting, Terminated)
        )
    }
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Owner of the current [`BridgeState`].
#[derive(Debug)]
pub struct Lifecycle {
    state: watch::Sender<BridgeState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (state, _) = watch::channel(BridgeState::Init);
        Self { state }
    }

    pub fn current(&self) -> BridgeState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    /// Move to `next`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidTransition`] when the move is not allowed; the
    /// state is left unchanged.
    pub fn advance(&self, next: BridgeState) -> Result<(), BridgeError> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                info!(from = %current, to = %next, "bridge state");
                *current = next;
                true
            } else {
                outcome = Err(BridgeError::InvalidTransition {
                    from: current.to_string(),
                    to: next.to_string(),
                });
                false
            }
        });
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_accepted() {
        let lifecycle = Lifecycle::new();
        for next in [
            BridgeState::ConnectingBus,
            BridgeState::Discovering,
            BridgeState::Running,
            BridgeState::Disconnecting,
            BridgeState::Terminated,
        ] {
            lifecycle.advance(next).unwrap();
        }
        assert_eq!(lifecycle.current(), BridgeState::Terminated);
    }

    #[test]
    fn skipping_states_is_rejected() {
        let lifecycle = Lifecycle::new();
        let err = lifecycle.advance(BridgeState::Running).unwrap_err();
        assert_eq!(
            err,
            BridgeError::InvalidTransition {
                from: "Init".to_string(),
                to: "Running".to_string(),
            }
        );
        assert_eq!(lifecycle.current(), BridgeState::Init);
    }

    #[test]
    fn failed_is_reachable_until_terminal() {
        let lifecycle = Lifecycle::new();
        lifecycle.advance(BridgeState::ConnectingBus).unwrap();
        lifecycle.advance(BridgeState::Failed).unwrap();
        assert!(lifecycle.advance(BridgeState::Failed).is_err());
        assert!(lifecycle.advance(BridgeState::Disconnecting).is_err());
    }

    #[test]
    fn startup_can_be_interrupted() {
        assert!(BridgeState::ConnectingBus.can_transition_to(BridgeState::Disconnecting));
        assert!(BridgeState::Discovering.can_transition_to(BridgeState::Disconnecting));
        assert!(!BridgeState::Init.can_transition_to(BridgeState::Disconnecting));
        assert!(!BridgeState::Terminated.can_transition_to(BridgeState::Failed));
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let lifecycle = Lifecycle::new();
        let mut rx = lifecycle.subscribe();
        lifecycle.advance(BridgeState::ConnectingBus).unwrap();

        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), BridgeState::ConnectingBus);
    }
}
