mod replay;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use fcal_engine::{CalibrationHandle, CalibrationService, CalibrationSession, EngineConfig, StateSnapshot};
use fcal_proto::{Inbound, InboundMessage, Outbound, SensorKind, StatusText};

use fcal_link::autodetect::{autodetect_fc, AutodetectResult};
use fcal_link::mav::{self, FcLink};
use fcal_link::state::LinkStatus;
use fcal_link::FcConfig;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

#[derive(Debug, Parser)]
#[command(name = "fcal", version, about = "fcal - flight controller sensor calibration")]
struct Cli {
    /// Optional for `replay`; every other command needs it.
    #[arg(long)]
    config: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Doctor,
    Fc { #[command(subcommand)] cmd: FcCmd },
    /// Run a live calibration. Type `confirm`, `cancel` or `status` on stdin.
    Calibrate {
        /// accel | compass | baro | level
        sensor: SensorKind,
    },
    /// Feed a scripted firmware trace through the engine offline.
    Replay { trace: String },
}

#[derive(Debug, Subcommand)]
enum FcCmd {
    /// Probe serial ports/bauds for MAVLink heartbeats.
    Autodetect,
}

#[derive(Debug, Default, serde::Deserialize)]
struct Config {
    fc: Option<FcConfig>,

    #[serde(flatten)]
    engine: EngineConfig,

    diagnostics: Option<DiagnosticsCfg>,
}

#[derive(Debug, serde::Deserialize)]
struct DiagnosticsCfg {
    export_dir: Option<String>,
}

impl Config {
    fn export_dir(&self) -> Option<&str> {
        self.diagnostics.as_ref().and_then(|d| d.export_dir.as_deref())
    }
}

fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let cfg = match (&cli.config, &cli.cmd) {
        (Some(path), _) => load_config(path)?,
        (None, Command::Replay { .. }) => Config::default(),
        (None, _) => anyhow::bail!("--config is required for this command"),
    };

    match cli.cmd {
        Command::Doctor => doctor(&cfg).await?,
        Command::Fc { cmd } => fc_cmd(&cfg, cmd).await?,
        Command::Calibrate { sensor } => calibrate(&cfg, sensor).await?,
        Command::Replay { trace } => replay_cmd(&cfg, &trace)?,
    }
    Ok(())
}

async fn doctor(cfg: &Config) -> Result<()> {
    info!("doctor: starting");

    cfg.engine.check().context("engine config")?;

    if let Some(fc) = &cfg.fc {
        if fc.enable {
            if fc.autodetect {
                info!("doctor: fc autodetect enabled (OK)");
            } else {
                anyhow::ensure!(fc.serial_dev.as_ref().map(|s| !s.is_empty()).unwrap_or(false), "fc.serial_dev missing");
                anyhow::ensure!(fc.baud.unwrap_or(0) > 0, "fc.baud invalid");
            }
            anyhow::ensure!(fc.sys_id != fc.target_sys, "fc.sys_id must differ from fc.target_sys");
            if let Some(hz) = fc.request_imu_hz {
                anyhow::ensure!(hz > 0.0 && hz <= 400.0, "fc.request_imu_hz out of range: {}", hz);
            }
        } else {
            warn!("doctor: fc.enable=false; live calibration unavailable");
        }
    } else {
        warn!("doctor: no [fc] section; only replay will work");
    }

    if let Some(dir) = cfg.export_dir() {
        let path = Path::new(dir);
        if path.exists() {
            anyhow::ensure!(path.is_dir(), "diagnostics.export_dir is not a directory: {}", dir);
        } else {
            info!("doctor: diagnostics.export_dir {} will be created on first export", dir);
        }
    }

    info!("doctor: OK");
    Ok(())
}

async fn fc_cmd(cfg: &Config, cmd: FcCmd) -> Result<()> {
    match cmd {
        FcCmd::Autodetect => {
            let fc = cfg.fc.as_ref().context("no [fc] config section")?;
            anyhow::ensure!(fc.enable, "fc.enable=false");
            let res = autodetect_fc(fc)?;
            if let Some((dev, baud)) = &res.chosen {
                println!("CHOSEN: {} @ {}", dev, baud);
            } else {
                println!("CHOSEN: none");
            }
            for p in res.probes {
                println!(
                    "probe dev={} baud={} hb={} autopilot={} armed={} {}ms note={}",
                    p.dev,
                    p.baud,
                    p.hb_seen,
                    p.autopilot.as_deref().unwrap_or("-"),
                    p.armed,
                    p.elapsed_ms,
                    p.note
                );
            }
            Ok(())
        }
    }
}

fn resolve_fc_port(fc: &FcConfig) -> Result<(String, u32)> {
    if fc.autodetect {
        let AutodetectResult { chosen, .. } = autodetect_fc(fc)?;
        chosen.context("fc autodetect failed: no heartbeat found")
    } else {
        let dev = fc.serial_dev.clone().context("fc.serial_dev missing (autodetect=false)")?;
        let baud = fc.baud.context("fc.baud missing (autodetect=false)")?;
        Ok((dev, baud))
    }
}

async fn calibrate(cfg: &Config, sensor: SensorKind) -> Result<()> {
    let fc_cfg = cfg.fc.as_ref().context("calibrate needs an [fc] config section")?;
    anyhow::ensure!(fc_cfg.enable, "fc.enable=false");

    let (dev, baud) = resolve_fc_port(fc_cfg)?;
    let link_status = Arc::new(Mutex::new(LinkStatus {
        port: Some(dev.clone()),
        baud: Some(baud),
        ..Default::default()
    }));

    let mut link = FcLink::open(
        &dev, baud,
        fc_cfg.sys_id, fc_cfg.comp_id,
        fc_cfg.target_sys, fc_cfg.target_comp,
        fc_cfg.require_heartbeat,
    )
    .context("FC open")?;
    if let Some(hz) = fc_cfg.request_imu_hz {
        link.request_imu_stream(hz).context("request IMU stream")?;
    }

    let (out_tx, out_rx) = mpsc::unbounded_channel::<Outbound>();
    let (service, handle) = CalibrationService::new(&cfg.engine, out_tx)?;
    let service_task = tokio::spawn(service.run());

    let hb_hz = fc_cfg.send_heartbeat_hz.unwrap_or(1.0).max(0.2);
    let stop = Arc::new(AtomicBool::new(false));
    let link_task = spawn_link_loop(link, handle.clone(), out_rx, link_status.clone(), stop.clone(), hb_hz);

    let id = handle.start(sensor).await?;
    info!(session = %id, "calibration started on {} @ {}", dev, baud);
    println!("session {}: {} calibration", id, sensor);
    println!("commands: confirm | cancel | status");

    let mut snapshots = handle.subscribe();
    let mut stdin = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            changed = snapshots.changed() => {
                if changed.is_err() {
                    break;
                }
                let snap = snapshots.borrow_and_update().clone();
                print_snapshot(&snap);
                if snap.is_terminal() {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("interrupted; cancelling calibration");
                handle.cancel().await?;
            }
            line = stdin.next_line(), if stdin_open => {
                let Some(line) = line.context("read stdin")? else {
                    stdin_open = false;
                    handle.cancel().await?;
                    continue;
                };
                match line.trim() {
                    "" => {}
                    "c" | "confirm" => {
                        if let Err(e) = handle.confirm_current_position().await {
                            warn!("confirm refused: {}", e);
                        }
                    }
                    "x" | "cancel" => handle.cancel().await?,
                    "s" | "status" => {
                        print_snapshot(&handle.snapshot());
                        print_link(&link_status);
                    }
                    other => println!("unknown command: {}", other),
                }
            }
        }
    }

    let session = handle.session().await?;
    // the link loop holds a handle; the service stops once both are gone
    stop.store(true, Ordering::Relaxed);
    drop(handle);
    let _ = link_task.await;
    let _ = service_task.await;

    if let Some(session) = session {
        print_session(&session);
        if let Some(dir) = cfg.export_dir() {
            let path = export_diagnostics(Path::new(dir), &session)?;
            println!("diagnostics written to {}", path.display());
        }
    }
    Ok(())
}

/// Reader/writer loop on a blocking thread (mavlink serial recv can block).
/// It owns the link: outbound commands are drained between reads.
fn spawn_link_loop(
    mut link: FcLink,
    handle: CalibrationHandle,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    status: Arc<Mutex<LinkStatus>>,
    stop: Arc<AtomicBool>,
    hb_hz: f32,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let hb_interval = std::time::Duration::from_secs_f32(1.0 / hb_hz);
        let mut last_hb_send = std::time::Instant::now();

        while !stop.load(Ordering::Relaxed) {
            if last_hb_send.elapsed() >= hb_interval {
                if let Err(e) = link.send_heartbeat() {
                    warn!("FC heartbeat send failed: {:#}", e);
                }
                last_hb_send = std::time::Instant::now();
            }

            loop {
                match outbound.try_recv() {
                    Ok(out) => {
                        if let Err(e) = link.send_command(&out.command) {
                            warn!(session = %out.session, "FC send failed: {:#}", e);
                        }
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => return,
                }
            }

            if let Ok(Some(msg)) = link.poll_once_nonblocking() {
                let inbound = mav::translate(&msg);
                if let Ok(mut st) = status.lock() {
                    st.connected = true;
                    st.frames_seen += 1;
                    st.armed = link.armed();
                    st.last_heartbeat = link.last_heartbeat();
                    if let Some(InboundMessage::StatusText(StatusText { text, .. })) = &inbound {
                        st.last_statustext = Some(text.clone());
                    }
                }
                if let Some(message) = inbound {
                    if handle.deliver_blocking(Inbound::untagged(message)).is_err() {
                        return;
                    }
                }
            }

            std::thread::sleep(std::time::Duration::from_millis(2));
        }
    })
}

fn replay_cmd(cfg: &Config, path: &str) -> Result<()> {
    let trace = replay::load_trace(path)?;
    let out = replay::replay(&cfg.engine, &trace, time::OffsetDateTime::now_utc())?;
    for snap in &out.snapshots {
        print_snapshot(snap);
    }
    if let Some(session) = &out.session {
        print_session(session);
        if let Some(dir) = cfg.export_dir() {
            let path = export_diagnostics(Path::new(dir), session)?;
            println!("diagnostics written to {}", path.display());
        }
    }
    Ok(())
}

fn print_snapshot(s: &StateSnapshot) {
    println!("[{:?} {:>3}%] {}", s.state, s.progress, s.instruction);
    if let Some(alert) = &s.alert {
        println!("  ({:?}) {}", alert.style, alert.text);
    }
}

fn print_link(status: &Arc<Mutex<LinkStatus>>) {
    let Ok(st) = status.lock() else { return };
    println!("link connected={} port={:?} baud={:?}", st.connected, st.port, st.baud);
    println!("link last_heartbeat_age={:?} armed={} frames={}", st.hb_age(), st.armed, st.frames_seen);
    println!("link last_statustext={:?}", st.last_statustext);
}

fn print_session(session: &CalibrationSession) {
    println!("session {} result={:?} retries={}", session.id(), session.result(), session.retry_count());
    for a in session.attempts() {
        println!(
            "  {:<10} accepted={} attempts={} fw={:?}",
            a.name(),
            a.accepted,
            a.attempt_count,
            a.last_firmware_message
        );
    }
    for ev in session.diagnostics().iter() {
        println!("  {}", ev.summary());
    }
}

fn export_diagnostics(dir: &Path, session: &CalibrationSession) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    let path = dir.join(format!("{}.json", session.id()));
    let json = serde_json::to_string_pretty(session).context("serialize session")?;
    std::fs::write(&path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(path)
}
