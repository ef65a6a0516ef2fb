//! Receiver state machine
//!
//! Pure transition function: takes an event, returns (new_state, action).
//! The async driver in `receiver/mod.rs` performs whatever the action implies.
//!
//! ```text
//! Idle -> Listening -> CodeReceived -> ShuttingDown -> Closed
//! Idle -> Listening -> TimedOut  -> Closed
//! Idle -> Listening -> Cancelled -> Closed
//! ```

/// Lifecycle of one loopback receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Idle,
    Listening,
    CodeReceived,
    ShuttingDown,
    TimedOut,
    Cancelled,
    Closed,
}

impl ReceiverState {
    /// Label for logging.
    pub fn label(&self) -> &'static str {
        match self {
            ReceiverState::Idle => "idle",
            ReceiverState::Listening => "listening",
            ReceiverState::CodeReceived => "code_received",
            ReceiverState::ShuttingDown => "shutting_down",
            ReceiverState::TimedOut => "timed_out",
            ReceiverState::Cancelled => "cancelled",
            ReceiverState::Closed => "closed",
        }
    }
}

/// Events that drive receiver transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverEvent {
    /// Listener bound and serving
    Bound,
    /// A request carried a usable authorization code
    CodeArrived,
    /// The waiter's deadline passed
    WaitTimedOut,
    /// The waiter was cancelled from outside
    WaitCancelled,
    /// Shutdown requested after the code was handed over
    ShutdownStarted,
    /// Server task finished or was aborted
    ShutdownComplete,
}

/// What the driver should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverAction {
    /// Hand the code to the waiter and answer 200
    DeliverCode,
    /// A code was already taken; answer 409
    RejectDuplicate,
    /// Stop the server and release the port
    Shutdown,
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(state: ReceiverState, event: ReceiverEvent) -> (ReceiverState, ReceiverAction) {
    use ReceiverAction as A;
    use ReceiverEvent as E;
    use ReceiverState as S;

    match (state, event) {
        (S::Idle, E::Bound) => (S::Listening, A::None),

        (S::Listening, E::CodeArrived) => (S::CodeReceived, A::DeliverCode),
        (other, E::CodeArrived) => (other, A::RejectDuplicate),

        (S::Listening, E::WaitTimedOut) => (S::TimedOut, A::Shutdown),
        (S::Listening, E::WaitCancelled) => (S::Cancelled, A::Shutdown),

        (S::CodeReceived, E::ShutdownStarted) => (S::ShuttingDown, A::Shutdown),

        (S::ShuttingDown | S::TimedOut | S::Cancelled, E::ShutdownComplete) => {
            (S::Closed, A::None)
        }

        (other, _) => (other, A::None),
    }
}
