use serde::{Deserialize, Serialize};

use crate::config::PendingEdits;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SurfMode {
    Off,
    JumpOnDelay,
    JumpRandom,
}

impl SurfMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "OFF",
            Self::JumpOnDelay => "JUMP_ON_DELAY",
            Self::JumpRandom => "JUMP_RANDOM",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Off => "Off",
            Self::JumpOnDelay => "Jump Delay",
            Self::JumpRandom => "Jump Random",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ControllerStatus {
    pub mode: &'static str,
    #[serde(rename = "modeLabel")]
    pub mode_label: &'static str,
    pub channel: String,
    pub delay: String,
    #[serde(rename = "schedulerActive")]
    pub scheduler_active: bool,
}

impl ControllerStatus {
    pub fn new(mode: SurfMode, edits: &PendingEdits, scheduler_active: bool) -> Self {
        Self {
            mode: mode.as_str(),
            mode_label: mode.label(),
            channel: edits.channel.clone(),
            delay: edits.delay.clone(),
            scheduler_active,
        }
    }
}
