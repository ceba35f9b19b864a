//! Server lifecycle state machine.
//!
//! # Responsibilities
//! - Name the phases a server moves through
//! - Reject transitions the lifecycle does not allow
//!
//! # Design Decisions
//! - Failed is terminal and only reachable from Starting or Running; a
//!   server that failed to bind or accept never restarts

/// Phase of the server lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Constructed, nothing bound yet.
    Unstarted,
    /// Binding and running start hooks.
    Starting,
    /// Accepting connections.
    Running,
    /// Running stop hooks and closing channels.
    Stopping,
    /// Fully stopped; terminal.
    Stopped,
    /// Startup or accept failed; terminal.
    Failed,
}

impl ServerState {
    /// Whether the lifecycle allows moving from this state to `next`.
    pub fn can_transition_to(self, next: ServerState) -> bool {
        use ServerState::*;
        matches!(
            (self, next),
            (Unstarted, Starting)
                | (Starting, Running)
                | (Starting, Failed)
                | (Running, Stopping)
                | (Running, Failed)
                | (Stopping, Stopped)
        )
    }

    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, ServerState::Stopped | ServerState::Failed)
    }
}

impl std::fmt::Display for ServerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServerState::Unstarted => "unstarted",
            ServerState::Starting => "starting",
            ServerState::Running => "running",
            ServerState::Stopping => "stopping",
            ServerState::Stopped => "stopped",
            ServerState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}
