use serde::{Deserialize, Serialize};

use crate::types::SurfMode;

pub const DEFAULT_CHANNEL: u8 = 2;
pub const DEFAULT_DELAY_SECS: u64 = 60;

/// Snapshot handed to a scheduler at start; a running scheduler never sees
/// edits made after it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfConfig {
    pub mode: SurfMode,
    pub target_channel: u8,
    pub fixed_delay_ms: u64,
}

impl Default for SurfConfig {
    fn default() -> Self {
        Self {
            mode: SurfMode::Off,
            target_channel: DEFAULT_CHANNEL,
            fixed_delay_ms: DEFAULT_DELAY_SECS * 1_000,
        }
    }
}

/// Last user-submitted raw channel/delay strings, kept for redisplay.
/// Setters only accept values that parse, so the stored strings always
/// parse back; the numeric accessors carry fallbacks anyway so a bad
/// value can never take down the control path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingEdits {
    pub channel: String,
    pub delay: String,
}

impl Default for PendingEdits {
    fn default() -> Self {
        Self {
            channel: DEFAULT_CHANNEL.to_string(),
            delay: DEFAULT_DELAY_SECS.to_string(),
        }
    }
}

impl PendingEdits {
    pub fn set_channel(&mut self, value: Option<&str>) -> bool {
        match value.map(str::trim) {
            Some(v) if parse_channel(v).is_some() => {
                self.channel = v.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn set_delay(&mut self, value: Option<&str>) -> bool {
        match value.map(str::trim) {
            Some(v) if !v.is_empty() && v.parse::<u64>().is_ok() => {
                self.delay = v.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn channel_value(&self) -> u8 {
        parse_channel(&self.channel).unwrap_or(DEFAULT_CHANNEL)
    }

    pub fn delay_secs(&self) -> u64 {
        self.delay.trim().parse().unwrap_or(DEFAULT_DELAY_SECS)
    }

    pub fn build_config(&self, mode: SurfMode) -> SurfConfig {
        SurfConfig {
            mode,
            target_channel: self.channel_value(),
            fixed_delay_ms: self.delay_secs().saturating_mul(1_000),
        }
    }
}

pub fn parse_channel(value: &str) -> Option<u8> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<u8>().ok().filter(|channel| *channel <= 99)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub ap_ssid: String,
    pub ap_pass: String,
    pub http_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ap_ssid: "ChannelSurfer-AP".to_string(),
            ap_pass: "SurferSetup".to_string(),
            http_port: 80,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IrHardwareConfig {
    pub tx_pin: i32,
    pub rmt_channel: u8,
    pub carrier_khz: u32,
}

impl Default for IrHardwareConfig {
    fn default() -> Self {
        Self {
            tx_pin: 4,
            rmt_channel: 0,
            carrier_khz: 38,
        }
    }
}

impl IrHardwareConfig {
    pub fn sanitize(&mut self) {
        if self.tx_pin < 0 {
            self.tx_pin = 4;
        }

        if self.rmt_channel > 7 {
            self.rmt_channel = 0;
        }

        self.carrier_khz = self.carrier_khz.clamp(10, 100);
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub ir: IrHardwareConfig,
}
