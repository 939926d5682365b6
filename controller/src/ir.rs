use core::convert::TryInto;
use std::{
    sync::OnceLock,
    thread,
    time::{Duration, Instant},
};

use anyhow::Context;
use esp_idf_hal::{
    gpio::OutputPin,
    peripheral::Peripheral,
    rmt::{
        config::{CarrierConfig, DutyPercent, TransmitConfig},
        PinState, Pulse, PulseTicks, RmtChannel, TxRmtDriver, VariableLengthSignal,
    },
    units::FromValueType,
};
use log::warn;

use surfer_common::{catalog::Code, scheduler::TRANSMIT_REPEATS, IrCommand};

const IR_TICK_DIVIDER: u8 = 80;
const IR_REPEAT_GAP_MS: u64 = 50;
const MIN_SEND_INTERVAL_MS: u64 = 100;

// NEC frame timing in microseconds; one RMT tick is 1 us at divider 80.
const NEC_LEADER_MARK_US: u16 = 9_000;
const NEC_LEADER_SPACE_US: u16 = 4_500;
const NEC_BIT_MARK_US: u16 = 562;
const NEC_ZERO_SPACE_US: u16 = 562;
const NEC_ONE_SPACE_US: u16 = 1_687;

enum IrBackend {
    Rmt(TxRmtDriver<'static>),
    Disabled,
}

pub struct IrTransmitter {
    backend: IrBackend,
    carrier_khz: u32,
    last_send_ms: Option<u64>,
    sent_frames: u64,
    failed_sends: u64,
    last_error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IrDiagnostics {
    pub enabled: bool,
    pub carrier_khz: u32,
    pub repeat_count: usize,
    pub sent_frames: u64,
    pub failed_sends: u64,
    pub last_error: Option<String>,
}

impl IrTransmitter {
    pub fn new<C, P>(
        channel: impl Peripheral<P = C> + 'static,
        pin: impl Peripheral<P = P> + 'static,
        carrier_khz: u32,
    ) -> anyhow::Result<Self>
    where
        C: RmtChannel,
        P: OutputPin,
    {
        let carrier = CarrierConfig::new()
            .frequency(carrier_khz.kHz().into())
            .carrier_level(PinState::High)
            .duty_percent(DutyPercent::new(33)?);

        let config = TransmitConfig::new()
            .clock_divider(IR_TICK_DIVIDER)
            .carrier(Some(carrier))
            .idle(Some(PinState::Low));

        let tx = TxRmtDriver::new(channel, pin, &config).context("failed to init RMT IR driver")?;

        Ok(Self {
            backend: IrBackend::Rmt(tx),
            carrier_khz,
            last_send_ms: None,
            sent_frames: 0,
            failed_sends: 0,
            last_error: None,
        })
    }

    pub fn disabled() -> Self {
        Self {
            backend: IrBackend::Disabled,
            carrier_khz: 0,
            last_send_ms: None,
            sent_frames: 0,
            failed_sends: 0,
            last_error: None,
        }
    }

    pub fn transmit(&mut self, command: IrCommand) -> anyhow::Result<()> {
        let result = self.send_code(command.code());

        if let Err(err) = &result {
            self.failed_sends = self.failed_sends.saturating_add(1);
            self.last_error = Some(format!("{err:#}"));
        } else {
            self.last_error = None;
        }

        result
    }

    pub fn diagnostics(&self) -> IrDiagnostics {
        IrDiagnostics {
            enabled: matches!(self.backend, IrBackend::Rmt(_)),
            carrier_khz: self.carrier_khz,
            repeat_count: TRANSMIT_REPEATS,
            sent_frames: self.sent_frames,
            failed_sends: self.failed_sends,
            last_error: self.last_error.clone(),
        }
    }

    fn send_code(&mut self, code: Code) -> anyhow::Result<()> {
        if matches!(self.backend, IrBackend::Disabled) {
            warn!(
                "IR disabled, dropping addr=0x{:04X} cmd=0x{:02X}",
                code.address, code.command
            );
            return Ok(());
        }

        self.rate_limit();

        let pulses = nec_pulses(code)?;
        let pulse_refs: Vec<&Pulse> = pulses.iter().collect();
        let mut signal = VariableLengthSignal::with_capacity(pulses.len());
        signal
            .push(pulse_refs)
            .context("failed to convert NEC frame to RMT signal")?;

        if let IrBackend::Rmt(tx) = &mut self.backend {
            for repeat in 0..TRANSMIT_REPEATS {
                tx.start_blocking(&signal)
                    .context("failed to transmit IR frame over RMT")?;
                if repeat + 1 < TRANSMIT_REPEATS {
                    thread::sleep(Duration::from_millis(IR_REPEAT_GAP_MS));
                }
            }
        }

        self.last_send_ms = Some(monotonic_ms());
        self.sent_frames = self.sent_frames.saturating_add(1);
        Ok(())
    }

    fn rate_limit(&mut self) {
        let now = monotonic_ms();
        if let Some(last) = self.last_send_ms {
            let elapsed = now.saturating_sub(last);
            if elapsed < MIN_SEND_INTERVAL_MS {
                thread::sleep(Duration::from_millis(MIN_SEND_INTERVAL_MS - elapsed));
            }
        }
    }
}

// Extended NEC: address low, address high, command, inverted command,
// each byte sent LSB first.
fn nec_pulses(code: Code) -> anyhow::Result<Vec<Pulse>> {
    let payload = (code.address as u32)
        | ((code.command as u32) << 16)
        | (((!code.command) as u32) << 24);

    let mut pulses = Vec::with_capacity(2 + 64 + 1);
    pulses.push(mark(NEC_LEADER_MARK_US)?);
    pulses.push(space(NEC_LEADER_SPACE_US)?);

    for bit in 0..32 {
        let one = (payload >> bit) & 1 == 1;
        pulses.push(mark(NEC_BIT_MARK_US)?);
        pulses.push(space(if one {
            NEC_ONE_SPACE_US
        } else {
            NEC_ZERO_SPACE_US
        })?);
    }

    pulses.push(mark(NEC_BIT_MARK_US)?);
    Ok(pulses)
}

fn mark(ticks: u16) -> anyhow::Result<Pulse> {
    Ok(Pulse::new(
        PinState::High,
        PulseTicks::new(ticks).context("invalid IR mark duration")?,
    ))
}

fn space(ticks: u16) -> anyhow::Result<Pulse> {
    Ok(Pulse::new(
        PinState::Low,
        PulseTicks::new(ticks).context("invalid IR space duration")?,
    ))
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
