//! Facts pushed to the panel without being asked for.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEvent {
    PrintStarted,
    Paused,
    Resumed,
    PrintFinished,
    PrintCancelled,
    /// Integer percent crossed a reporting step.
    Progress { percent: u8, time_left_sec: Option<u64> },
    LayerChanged { current: u32, total: u32 },
    FanChanged { percent: u8 },
}

impl NotificationEvent {
    pub fn is_state_transition(&self) -> bool {
        matches!(
            self,
            NotificationEvent::PrintStarted
                | NotificationEvent::Paused
                | NotificationEvent::Resumed
                | NotificationEvent::PrintFinished
                | NotificationEvent::PrintCancelled
        )
    }
}

/// Job control the panel may request through host action commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintAction {
    Pause,
    Resume,
    Cancel,
}

impl PrintAction {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "pause" => Some(PrintAction::Pause),
            "resume" => Some(PrintAction::Resume),
            "cancel" => Some(PrintAction::Cancel),
            _ => None,
        }
    }

    /// Management API endpoint path for this action.
    pub fn endpoint(self) -> &'static str {
        match self {
            PrintAction::Pause => "/printer/print/pause",
            PrintAction::Resume => "/printer/print/resume",
            PrintAction::Cancel => "/printer/print/cancel",
        }
    }
}

impl fmt::Display for PrintAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrintAction::Pause => f.write_str("pause"),
            PrintAction::Resume => f.write_str("resume"),
            PrintAction::Cancel => f.write_str("cancel"),
        }
    }
}
