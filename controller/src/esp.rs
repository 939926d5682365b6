use core::convert::TryInto;
use std::{
    io::{Read, Write},
    net::{TcpListener, TcpStream},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, OnceLock,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use embedded_svc::wifi::{AccessPointConfiguration, AuthMethod, Configuration};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{gpio::AnyOutputPin, modem::Modem, prelude::Peripherals, rmt::RMT},
    log::EspLogger,
    nvs::EspDefaultNvsPartition,
    wifi::{BlockingWifi, EspWifi},
};
use log::{debug, info, warn};
use rand::{rngs::SmallRng, SeedableRng};

use surfer_common::{
    config::{IrHardwareConfig, NetworkConfig},
    dispatch, parse,
    scheduler::{SurfAction, TICK_INTERVAL_MS},
    ControllerStatus, PendingEdits, RouterOutcome, RuntimeConfig, SurfConfig, SurfMode,
    SurfScheduler,
};

use crate::{ir::IrTransmitter, page};

const MAX_REQUEST_BYTES: usize = 4096;
const STOP_POLL_INTERVAL_MS: u64 = 50;
const SCHEDULER_STACK_BYTES: usize = 8 * 1024;

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut runtime = RuntimeConfig::default();
    apply_build_overrides(&mut runtime);
    runtime.ir.sanitize();

    let Peripherals { modem, rmt, .. } = Peripherals::take()?;

    let ir = match init_ir_transmitter(rmt, &runtime.ir) {
        Ok(transmitter) => {
            info!(
                "IR transmitter on RMT channel{} / GPIO{} @ {}kHz",
                runtime.ir.rmt_channel, runtime.ir.tx_pin, runtime.ir.carrier_khz
            );
            transmitter
        }
        Err(err) => {
            warn!("failed to initialize IR transmitter, running disabled: {err:#}");
            IrTransmitter::disabled()
        }
    };
    let ir = Arc::new(Mutex::new(ir));

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs = EspDefaultNvsPartition::take()?;
    let wifi = start_access_point(modem, sys_loop, nvs, &runtime.network)?;

    // Keep the AP alive for the program lifetime.
    let _wifi = wifi;

    serve(&runtime.network, ir)
}

fn apply_build_overrides(runtime: &mut RuntimeConfig) {
    if let Some(ssid) = option_env!("WIFI_SSID") {
        runtime.network.ap_ssid = ssid.to_string();
    }
    if let Some(pass) = option_env!("WIFI_PASS") {
        runtime.network.ap_pass = pass.to_string();
    }
}

fn serve(network: &NetworkConfig, ir: Arc<Mutex<IrTransmitter>>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", network.http_port))
        .with_context(|| format!("failed to bind control listener on port {}", network.http_port))?;
    info!("control listener on port {}", network.http_port);

    let mut edits = PendingEdits::default();
    let mut mode = SurfMode::Off;
    let mut scheduler: Option<SchedulerHandle> = None;

    // One control connection at a time, handled to completion before the
    // next accept.
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                warn!("accept failed: {err}");
                continue;
            }
        };

        if let Err(err) = handle_connection(stream, &mut edits, &mut mode, &mut scheduler, &ir) {
            warn!("control connection failed: {err:#}");
        }

        debug!("ir {:?}", ir.lock().unwrap().diagnostics());
    }

    Ok(())
}

fn handle_connection(
    mut stream: TcpStream,
    edits: &mut PendingEdits,
    mode: &mut SurfMode,
    scheduler: &mut Option<SchedulerHandle>,
    ir: &Arc<Mutex<IrTransmitter>>,
) -> anyhow::Result<()> {
    let mut captured = String::new();
    let mut buf = [0_u8; 512];

    let parsed = loop {
        let read = stream.read(&mut buf).context("request read failed")?;
        if read == 0 {
            // Client went away before finishing the request.
            return Ok(());
        }
        captured.push_str(&String::from_utf8_lossy(&buf[..read]));

        if let Some(parsed) = parse(&captured) {
            break parsed;
        }
        if captured.len() > MAX_REQUEST_BYTES {
            return Err(anyhow!(
                "request exceeded {MAX_REQUEST_BYTES} bytes without terminating"
            ));
        }
    };

    info!("request: {}", parsed.path);
    let outcome = dispatch(&parsed, edits);
    apply_outcome(outcome, mode, scheduler, ir);

    let status = ControllerStatus::new(*mode, edits, scheduler.is_some());
    stream
        .write_all(page::http_ok(&page::render(&status)).as_bytes())
        .context("response write failed")?;
    Ok(())
}

fn apply_outcome(
    outcome: RouterOutcome,
    mode: &mut SurfMode,
    scheduler: &mut Option<SchedulerHandle>,
    ir: &Arc<Mutex<IrTransmitter>>,
) {
    match outcome {
        RouterOutcome::NoMatch => {}
        RouterOutcome::ParamUpdated => stop_scheduler(scheduler),
        RouterOutcome::ImmediateCommand(actions) => {
            stop_scheduler(scheduler);
            *mode = SurfMode::Off;
            execute_actions(&actions, ir, None);
        }
        RouterOutcome::ModeChanged(config) => {
            stop_scheduler(scheduler);
            *mode = config.mode;
            if config.mode != SurfMode::Off {
                *scheduler = Some(SchedulerHandle::spawn(config, ir.clone()));
            }
        }
    }
}

fn stop_scheduler(scheduler: &mut Option<SchedulerHandle>) {
    if let Some(handle) = scheduler.take() {
        handle.stop();
    }
}

/// The single running background scheduler, if any. Replacing it goes
/// through `stop`, which only returns once the thread has exited.
struct SchedulerHandle {
    stop: Arc<AtomicBool>,
    join: thread::JoinHandle<()>,
}

impl SchedulerHandle {
    fn spawn(config: SurfConfig, ir: Arc<Mutex<IrTransmitter>>) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = stop.clone();

        let join = thread::Builder::new()
            .name("surf-scheduler".into())
            .stack_size(SCHEDULER_STACK_BYTES)
            .spawn(move || scheduler_loop(config, ir, flag))
            .expect("failed to spawn scheduler thread");

        Self { stop, join }
    }

    fn stop(self) {
        self.stop.store(true, Ordering::Relaxed);
        // A scheduler that cannot be torn down would break the
        // one-active-task invariant; failing loudly beats double-scheduling.
        self.join
            .join()
            .expect("scheduler thread panicked during teardown");
    }
}

fn scheduler_loop(config: SurfConfig, ir: Arc<Mutex<IrTransmitter>>, stop: Arc<AtomicBool>) {
    let mut scheduler = SurfScheduler::new(config);
    let mut rng = SmallRng::seed_from_u64(monotonic_ms() ^ 0x9E37_79B9_7F4A_7C15);

    loop {
        if sleep_unless_stopped(&stop, TICK_INTERVAL_MS) {
            return;
        }
        let actions = scheduler.tick(monotonic_ms(), &mut rng);
        if execute_actions(&actions, &ir, Some(&stop)) {
            return;
        }
    }
}

/// Returns true when a stop request interrupted the sequence.
fn execute_actions(
    actions: &[SurfAction],
    ir: &Arc<Mutex<IrTransmitter>>,
    stop: Option<&AtomicBool>,
) -> bool {
    for action in actions {
        if stop.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return true;
        }

        match action {
            SurfAction::Delay(ms) => match stop {
                Some(flag) => {
                    if sleep_unless_stopped(flag, *ms) {
                        return true;
                    }
                }
                None => thread::sleep(Duration::from_millis(*ms)),
            },
            SurfAction::Transmit(command) => {
                if let Err(err) = ir.lock().unwrap().transmit(*command) {
                    warn!("ir transmit failed: {err:#}");
                }
            }
        }
    }

    false
}

fn sleep_unless_stopped(stop: &AtomicBool, total_ms: u64) -> bool {
    let mut remaining = total_ms;
    while remaining > 0 {
        if stop.load(Ordering::Relaxed) {
            return true;
        }
        let chunk = remaining.min(STOP_POLL_INTERVAL_MS);
        thread::sleep(Duration::from_millis(chunk));
        remaining -= chunk;
    }
    stop.load(Ordering::Relaxed)
}

fn start_access_point(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if network.ap_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    };

    wifi.set_configuration(&Configuration::AccessPoint(AccessPointConfiguration {
        ssid: network
            .ap_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("AP SSID too long"))?,
        password: network
            .ap_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("AP password too long"))?,
        auth_method,
        channel: 1,
        ..Default::default()
    }))?;
    wifi.start()?;
    wifi.wait_netif_up()?;

    info!("access point `{}` up", network.ap_ssid);
    Ok(esp_wifi)
}

fn init_ir_transmitter(rmt: RMT, ir: &IrHardwareConfig) -> anyhow::Result<IrTransmitter> {
    if ir.tx_pin < 0 {
        return Err(anyhow!("invalid tx pin: {}", ir.tx_pin));
    }

    let pin = ir.tx_pin;
    let carrier_khz = ir.carrier_khz;

    match ir.rmt_channel {
        0 => unsafe { IrTransmitter::new(rmt.channel0, AnyOutputPin::new(pin), carrier_khz) },
        1 => unsafe { IrTransmitter::new(rmt.channel1, AnyOutputPin::new(pin), carrier_khz) },
        2 => unsafe { IrTransmitter::new(rmt.channel2, AnyOutputPin::new(pin), carrier_khz) },
        3 => unsafe { IrTransmitter::new(rmt.channel3, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        4 => unsafe { IrTransmitter::new(rmt.channel4, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        5 => unsafe { IrTransmitter::new(rmt.channel5, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        6 => unsafe { IrTransmitter::new(rmt.channel6, AnyOutputPin::new(pin), carrier_khz) },
        #[cfg(any(esp32, esp32s3))]
        7 => unsafe { IrTransmitter::new(rmt.channel7, AnyOutputPin::new(pin), carrier_khz) },
        _ => Err(anyhow!("unsupported RMT channel: {}", ir.rmt_channel)),
    }
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
