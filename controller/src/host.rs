use std::{
    net::SocketAddr,
    sync::OnceLock,
    time::{Duration, Instant},
};

use anyhow::Context;
use rand::{rngs::StdRng, SeedableRng};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tracing::{info, warn};

use surfer_common::{
    dispatch, parse,
    scheduler::{SurfAction, TICK_INTERVAL_MS, TRANSMIT_REPEATS},
    ControllerStatus, IrCommand, PendingEdits, RouterOutcome, RuntimeConfig, SurfConfig, SurfMode,
    SurfScheduler,
};

use crate::page;

const MAX_REQUEST_BYTES: usize = 4096;

/// The single running background scheduler, if any. Only one can exist:
/// replacing it goes through `stop`, which returns only once the task is
/// fully torn down.
struct SchedulerHandle {
    join: JoinHandle<()>,
}

impl SchedulerHandle {
    fn spawn<F>(config: SurfConfig, transmit: F) -> Self
    where
        F: Fn(IrCommand) + Send + Sync + 'static,
    {
        let join = tokio::spawn(async move {
            let mut scheduler = SurfScheduler::new(config);
            let mut rng = StdRng::from_entropy();

            loop {
                tokio::time::sleep(Duration::from_millis(TICK_INTERVAL_MS)).await;
                let actions = scheduler.tick(monotonic_ms(), &mut rng);
                execute_actions(&actions, &transmit).await;
            }
        });

        Self { join }
    }

    async fn stop(self) {
        self.join.abort();
        if let Err(err) = self.join.await {
            // An unstoppable scheduler would break the one-active-task
            // invariant; failing loudly beats double-scheduling.
            if !err.is_cancelled() {
                panic!("scheduler task teardown failed: {err}");
            }
        }
    }
}

async fn execute_actions<F: Fn(IrCommand)>(actions: &[SurfAction], transmit: &F) {
    for action in actions {
        match action {
            SurfAction::Delay(ms) => tokio::time::sleep(Duration::from_millis(*ms)).await,
            SurfAction::Transmit(command) => transmit(*command),
        }
    }
}

// ESP32 builds drive the RMT transmitter at this boundary; the host build
// logs the press instead.
fn log_transmit(command: IrCommand) {
    let code = command.code();
    info!(
        "ir transmit {:?}: addr=0x{:04X} cmd=0x{:02X} x{}",
        command, code.address, code.command, TRANSMIT_REPEATS
    );
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let runtime = load_runtime_config();

    let port = std::env::var("SURFER_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(runtime.network.http_port);
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .context("invalid listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind control listener at {addr}"))?;

    info!("controller listening on http://{addr}");

    let mut edits = PendingEdits::default();
    let mut mode = SurfMode::Off;
    let mut scheduler: Option<SchedulerHandle> = None;

    // One control connection at a time, handled to completion before the
    // next accept.
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(connection) => connection,
            Err(err) => {
                warn!("accept failed: {err}");
                continue;
            }
        };

        if let Err(err) = handle_connection(stream, &mut edits, &mut mode, &mut scheduler).await {
            warn!("control connection from {peer} failed: {err:#}");
        }
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    edits: &mut PendingEdits,
    mode: &mut SurfMode,
    scheduler: &mut Option<SchedulerHandle>,
) -> anyhow::Result<()> {
    let mut captured = String::new();
    let mut buf = [0_u8; 512];

    let parsed = loop {
        let read = stream.read(&mut buf).await.context("request read failed")?;
        if read == 0 {
            // Client went away before finishing the request.
            return Ok(());
        }
        captured.push_str(&String::from_utf8_lossy(&buf[..read]));

        if let Some(parsed) = parse(&captured) {
            break parsed;
        }
        if captured.len() > MAX_REQUEST_BYTES {
            anyhow::bail!("request exceeded {MAX_REQUEST_BYTES} bytes without terminating");
        }
    };

    let outcome = dispatch(&parsed, edits);
    info!("dispatched {} -> {}", parsed.path, outcome_name(&outcome));
    apply_outcome(outcome, mode, scheduler, log_transmit).await;

    let status = ControllerStatus::new(*mode, edits, scheduler.is_some());
    info!(
        "state: {}",
        serde_json::to_string(&status).unwrap_or_default()
    );

    let response = page::http_ok(&page::render(&status));
    stream
        .write_all(response.as_bytes())
        .await
        .context("response write failed")?;
    stream.shutdown().await.ok();
    Ok(())
}

async fn apply_outcome<F>(
    outcome: RouterOutcome,
    mode: &mut SurfMode,
    scheduler: &mut Option<SchedulerHandle>,
    transmit: F,
) where
    F: Fn(IrCommand) + Send + Sync + 'static,
{
    match outcome {
        RouterOutcome::NoMatch => {}
        RouterOutcome::ParamUpdated => stop_scheduler(scheduler).await,
        RouterOutcome::ImmediateCommand(actions) => {
            stop_scheduler(scheduler).await;
            *mode = SurfMode::Off;
            execute_actions(&actions, &transmit).await;
        }
        RouterOutcome::ModeChanged(config) => {
            stop_scheduler(scheduler).await;
            *mode = config.mode;
            if config.mode != SurfMode::Off {
                *scheduler = Some(SchedulerHandle::spawn(config, transmit));
            }
        }
    }
}

async fn stop_scheduler(scheduler: &mut Option<SchedulerHandle>) {
    if let Some(handle) = scheduler.take() {
        handle.stop().await;
    }
}

fn outcome_name(outcome: &RouterOutcome) -> &'static str {
    match outcome {
        RouterOutcome::ModeChanged(_) => "mode-changed",
        RouterOutcome::ImmediateCommand(_) => "immediate-command",
        RouterOutcome::ParamUpdated => "param-updated",
        RouterOutcome::NoMatch => "no-match",
    }
}

fn load_runtime_config() -> RuntimeConfig {
    let Some(path) = std::env::var_os("SURFER_CONFIG") else {
        return RuntimeConfig::default();
    };

    match std::fs::read(&path) {
        Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|err| {
            warn!("invalid config file {}: {err}", path.to_string_lossy());
            RuntimeConfig::default()
        }),
        Err(err) => {
            warn!("failed to read config file {}: {err}", path.to_string_lossy());
            RuntimeConfig::default()
        }
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

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;

    fn jump_config() -> SurfConfig {
        SurfConfig {
            mode: SurfMode::JumpOnDelay,
            target_channel: 7,
            fixed_delay_ms: 30_000,
        }
    }

    fn counting_transmit(hits: &Arc<AtomicUsize>) -> impl Fn(IrCommand) + Send + 'static {
        let hits = hits.clone();
        move |_| {
            hits.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_never_overlaps_the_old_scheduler() {
        let hits_a = Arc::new(AtomicUsize::new(0));
        let handle = SchedulerHandle::spawn(jump_config(), counting_transmit(&hits_a));

        tokio::time::sleep(Duration::from_millis(3 * TICK_INTERVAL_MS)).await;
        assert!(hits_a.load(Ordering::SeqCst) >= 1);

        handle.stop().await;
        let after_stop = hits_a.load(Ordering::SeqCst);

        let hits_b = Arc::new(AtomicUsize::new(0));
        let handle = SchedulerHandle::spawn(jump_config(), counting_transmit(&hits_b));
        tokio::time::sleep(Duration::from_millis(5 * TICK_INTERVAL_MS)).await;
        handle.stop().await;

        assert_eq!(hits_a.load(Ordering::SeqCst), after_stop);
        assert!(hits_b.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mode_off_outcome_clears_the_handle() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut mode = SurfMode::Off;
        let mut scheduler = None;

        apply_outcome(
            RouterOutcome::ModeChanged(jump_config()),
            &mut mode,
            &mut scheduler,
            counting_transmit(&hits),
        )
        .await;
        assert_eq!(mode, SurfMode::JumpOnDelay);
        assert!(scheduler.is_some());

        let off = SurfConfig {
            mode: SurfMode::Off,
            ..jump_config()
        };
        apply_outcome(
            RouterOutcome::ModeChanged(off),
            &mut mode,
            &mut scheduler,
            counting_transmit(&hits),
        )
        .await;
        assert_eq!(mode, SurfMode::Off);
        assert!(scheduler.is_none());

        // No emissions sneak in after the stop.
        let settled = hits.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5 * TICK_INTERVAL_MS)).await;
        assert_eq!(hits.load(Ordering::SeqCst), settled);
    }

    #[tokio::test(start_paused = true)]
    async fn param_update_outcome_stops_without_restarting() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut mode = SurfMode::Off;
        let mut scheduler = None;

        apply_outcome(
            RouterOutcome::ModeChanged(jump_config()),
            &mut mode,
            &mut scheduler,
            counting_transmit(&hits),
        )
        .await;
        assert!(scheduler.is_some());

        apply_outcome(
            RouterOutcome::ParamUpdated,
            &mut mode,
            &mut scheduler,
            counting_transmit(&hits),
        )
        .await;
        assert!(scheduler.is_none());
    }
}
