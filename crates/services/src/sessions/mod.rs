mod coordinator;
mod history;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use coordinator::{
    CustomModelOutcome, DEFAULT_MODEL_TYPES, SessionCollaborators, SessionCoordinator,
    StopOutcome,
};
pub use history::{SessionHistoryItem, SessionHistoryService};
