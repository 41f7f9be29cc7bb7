//! Per-message lifecycle as a pure state machine
//!
//! No I/O here. The orchestrator feeds events in and acts on the state it
//! gets back, which keeps the seen-marking rules testable on their own.
//!
//! ```text
//! Unseen --Filtered{false}--> Ignored            (never persisted)
//! Unseen --Filtered{true}---> Dispatched
//! Dispatched --JobSucceeded--> Succeeded --MarkedSeen--> Final
//! Dispatched --JobFailed-----> Failed    --MarkedSeen--> Final
//! Dispatched --ShutdownRequested--> Interrupted      (retried on restart)
//! ```

/// Where a message is in its processing attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Unseen,
    /// Not for us; re-evaluated on the next poll
    Ignored,
    Dispatched,
    Succeeded,
    Failed,
    /// Job abandoned by shutdown; left unmarked
    Interrupted,
    /// Recorded in the seen log
    Final,
}

/// Things that happen to a message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageEvent {
    Filtered { actionable: bool },
    JobSucceeded,
    JobFailed,
    ShutdownRequested,
    MarkedSeen,
}

impl MessageState {
    /// Terminal for this cycle
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageState::Ignored | MessageState::Interrupted | MessageState::Final
        )
    }

    /// Outcome is known and must be persisted before moving on
    pub fn needs_marking(self) -> bool {
        matches!(self, MessageState::Succeeded | MessageState::Failed)
    }
}

/// Pure transition function; `None` for a pair that is not allowed
pub fn transition(state: MessageState, event: MessageEvent) -> Option<MessageState> {
    use MessageEvent as E;
    use MessageState as S;

    match (state, event) {
        (S::Unseen, E::Filtered { actionable: false }) => Some(S::Ignored),
        (S::Unseen, E::Filtered { actionable: true }) => Some(S::Dispatched),
        (S::Dispatched, E::JobSucceeded) => Some(S::Succeeded),
        (S::Dispatched, E::JobFailed) => Some(S::Failed),
        (S::Dispatched, E::ShutdownRequested) => Some(S::Interrupted),
        (S::Succeeded | S::Failed, E::MarkedSeen) => Some(S::Final),
        _ => None,
    }
}
