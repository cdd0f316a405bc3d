use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupervisorState {
    Initializing,
    Ready,
    Terminated,
}

impl SupervisorState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Terminated)
    }
}
