use rand::Rng;

use crate::{
    catalog::{Action, IrCommand},
    config::SurfConfig,
    types::SurfMode,
};

pub const TICK_INTERVAL_MS: u64 = 1_000;
pub const SETTLE_DELAY_MS: u64 = 400;
pub const TRANSMIT_REPEATS: usize = 3;
pub const RANDOM_INTERVAL_MIN_MS: u64 = 300_000;
pub const RANDOM_INTERVAL_MAX_MS: u64 = 360_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfAction {
    Transmit(IrCommand),
    Delay(u64),
}

/// Prime the receiver for direct tuning, then press the two channel
/// digits, letting it settle after each press.
pub fn tune_sequence(channel: u8) -> Vec<SurfAction> {
    debug_assert!(channel <= 99, "channel out of range: {channel}");
    let tens = (channel / 10) % 10;
    let ones = channel % 10;

    vec![
        SurfAction::Transmit(IrCommand::Action(Action::DirectTune)),
        SurfAction::Delay(SETTLE_DELAY_MS),
        SurfAction::Transmit(IrCommand::Digit(tens)),
        SurfAction::Delay(SETTLE_DELAY_MS),
        SurfAction::Transmit(IrCommand::Digit(ones)),
        SurfAction::Delay(SETTLE_DELAY_MS),
    ]
}

/// Owns its config snapshot for the whole run; a restart with a fresh
/// snapshot is the only way configuration changes reach it.
#[derive(Debug, Clone)]
pub struct SurfScheduler {
    config: SurfConfig,
    next_emit_at_ms: Option<u64>,
}

impl SurfScheduler {
    pub fn new(config: SurfConfig) -> Self {
        // next_emit_at starts unset, so the first tick is always due.
        Self {
            config,
            next_emit_at_ms: None,
        }
    }

    pub fn config(&self) -> &SurfConfig {
        &self.config
    }

    pub fn next_emit_at_ms(&self) -> Option<u64> {
        self.next_emit_at_ms
    }

    pub fn tick(&mut self, now_ms: u64, rng: &mut impl Rng) -> Vec<SurfAction> {
        match self.config.mode {
            SurfMode::Off => Vec::new(),
            SurfMode::JumpOnDelay => {
                if !self.due(now_ms) {
                    return Vec::new();
                }
                self.next_emit_at_ms = Some(now_ms.saturating_add(self.config.fixed_delay_ms));
                tune_sequence(self.config.target_channel)
            }
            SurfMode::JumpRandom => {
                if !self.due(now_ms) {
                    return Vec::new();
                }
                let interval = rng.gen_range(RANDOM_INTERVAL_MIN_MS..RANDOM_INTERVAL_MAX_MS);
                self.next_emit_at_ms = Some(now_ms.saturating_add(interval));
                tune_sequence(self.config.target_channel)
            }
        }
    }

    fn due(&self, now_ms: u64) -> bool {
        self.next_emit_at_ms.map_or(true, |at| now_ms >= at)
    }
}
