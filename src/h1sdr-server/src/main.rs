// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

mod config;
mod delivery;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use serde::Serialize;
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use h1sdr_app::{init_logging, ConfigFile};
use h1sdr_core::{DemodMode, DynResult};
use h1sdr_pipeline::{
    Acquisition, ChunkQueue, ConfigHandle, DemodStage, IqSource, MockIqSource, SpectrumStage,
    Supervisor, ThroughputMeter, ToneIqSource, WaterfallStage,
};

use config::{DeviceConfig, ServerConfig, SourceKind};
use delivery::{json_line, ResultBroadcast, StatusFrame};

const PKG_DESCRIPTION: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " - SDR spectrum and demodulation server"
);

#[derive(Debug, Parser)]
#[command(
    author = env!("CARGO_PKG_AUTHORS"),
    version = env!("CARGO_PKG_VERSION"),
    about = PKG_DESCRIPTION,
)]
struct Cli {
    /// Path to configuration file
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
    /// Print example configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,
    /// IQ source to read from
    #[arg(short = 's', long = "source", value_enum)]
    source: Option<SourceKind>,
    /// SoapySDR device args (e.g. "driver=rtlsdr")
    #[arg(short = 'd', long = "device-args")]
    device_args: Option<String>,
    /// Center frequency in Hz
    #[arg(short = 'f', long = "center")]
    center: Option<f64>,
    /// Demodulation mode (SPECTRUM, AM, FM, USB, LSB, CW)
    #[arg(short = 'm', long = "mode")]
    mode: Option<DemodMode>,
    /// Audio bandwidth in Hz
    #[arg(short = 'b', long = "bandwidth")]
    bandwidth: Option<f64>,
    /// Band preset to tune to at startup (e.g. aviation, 2m_band)
    #[arg(long = "band")]
    band: Option<String>,
    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<String>,
    /// Print results as JSON lines on stdout
    #[arg(long = "json")]
    json: bool,
}

/// Fold command-line overrides into the file configuration.
fn apply_cli(cli: &Cli, cfg: &mut ServerConfig) {
    if let Some(source) = cli.source {
        cfg.device.source = source;
    }
    if let Some(ref args) = cli.device_args {
        cfg.device.args = Some(args.clone());
    }
    if let Some(center) = cli.center {
        cfg.device.center_freq = center;
    }
    if let Some(mode) = cli.mode {
        cfg.demod.mode = mode;
        // A bandwidth from the file belongs to the file's mode.
        cfg.demod.bandwidth = None;
    }
    if let Some(bandwidth) = cli.bandwidth {
        cfg.demod.bandwidth = Some(bandwidth);
    }
    if let Some(ref band) = cli.band {
        cfg.demod.band = Some(band.clone());
    }
    if let Some(ref level) = cli.log_level {
        cfg.general.log_level = Some(level.clone());
    }
    if cli.json {
        cfg.output.json = true;
    }
}

fn build_source(device: &DeviceConfig) -> DynResult<Box<dyn IqSource>> {
    match device.source {
        SourceKind::Mock => Ok(Box::new(MockIqSource::new())),
        SourceKind::Tone => Ok(Box::new(
            ToneIqSource::new(device.tone_offset_hz, device.tone_amplitude)
                .with_noise(device.noise_amplitude),
        )),
        #[cfg(feature = "soapysdr")]
        SourceKind::Soapysdr => {
            let args = device.args.as_deref().unwrap_or("");
            Ok(Box::new(h1sdr_pipeline::SoapyIqSource::open(args)?))
        }
        #[cfg(not(feature = "soapysdr"))]
        SourceKind::Soapysdr => {
            Err("source 'soapysdr' requires building with the soapysdr feature".into())
        }
    }
}

async fn wait_for_shutdown(mut shutdown_rx: watch::Receiver<bool>) {
    if *shutdown_rx.borrow() {
        return;
    }
    while shutdown_rx.changed().await.is_ok() {
        if *shutdown_rx.borrow() {
            break;
        }
    }
}

fn print_json<T: Serialize>(kind: &str, value: &T) {
    match json_line(kind, value) {
        Ok(line) => {
            let mut stdout = std::io::stdout().lock();
            if let Err(e) = writeln!(stdout, "{}", line) {
                warn!("Failed to write {} frame: {}", kind, e);
            }
        }
        Err(e) => warn!("Failed to encode {} frame: {}", kind, e),
    }
}

/// Forward a result channel to stdout until shutdown.
fn spawn_json_writer<T>(
    kind: &'static str,
    mut rx: broadcast::Receiver<Arc<T>>,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    T: Serialize + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let forward = async {
            loop {
                match rx.recv().await {
                    Ok(value) => print_json(kind, value.as_ref()),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("JSON {} writer lagged, skipped {} frames", kind, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        };
        tokio::select! {
            _ = forward => {}
            _ = wait_for_shutdown(shutdown_rx) => {}
        }
    })
}

fn report_status(frame: &StatusFrame, json: bool) {
    if json {
        print_json("status", frame);
        return;
    }
    info!(
        state = %frame.acquisition.state,
        chunks = frame.acquisition.chunks_read,
        dropped = frame.queue.dropped,
        read_errors = frame.acquisition.read_errors,
        cycles_per_second = frame.throughput.cycles_per_second,
        last_cycle_ms = frame.throughput.last_cycle_ms,
        failure_rate = frame.supervisor.failure_rate,
        demod_mode = frame.demodulator.as_ref().map(|d| d.mode.as_str()),
        "status"
    );
}

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerConfig::example_toml());
        return Ok(());
    }

    let (mut cfg, config_path) = if let Some(ref path) = cli.config {
        let cfg = ServerConfig::load_from_file(path)?;
        (cfg, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };
    apply_cli(&cli, &mut cfg);
    cfg.validate()
        .map_err(|e| format!("Invalid server configuration: {}", e))?;

    init_logging(cfg.general.log_level.as_deref());

    if let Some(ref path) = config_path {
        info!("Loaded configuration from {}", path.display());
    }

    let control = ConfigHandle::new(cfg.to_pipeline_config())?;
    let mut supervisor = Supervisor::new(control.subscribe(), cfg.pipeline.stage_timeout());
    supervisor.add_stage(Box::new(SpectrumStage::new()));
    let waterfall = WaterfallStage::new(cfg.pipeline.waterfall_lines);
    let waterfall_view = waterfall.handle();
    supervisor.add_stage(Box::new(waterfall));
    let demod = DemodStage::new();
    let demod_view = demod.handle();
    let demod_slot = supervisor.add_stage(Box::new(demod));
    let control = control.with_demod_stage(demod_slot);

    if let Some(ref band) = cfg.demod.band {
        control.tune_to_band(band)?;
    }

    let source = build_source(&cfg.device)?;
    let queue = Arc::new(ChunkQueue::new(cfg.pipeline.queue_capacity));
    let mut acquisition = Acquisition::new(
        source,
        Arc::clone(&queue),
        control.subscribe(),
        cfg.pipeline.acquisition_options(),
    );

    let initial = control.current();
    info!(
        "Starting h1sdr-server (source: {}, center: {} Hz, rate: {} S/s, mode: {})",
        acquisition.status().source,
        initial.center_freq,
        initial.sample_rate,
        initial.demod_mode
    );
    acquisition.start()?;

    let mut results = ResultBroadcast::new();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut task_handles: Vec<JoinHandle<()>> = Vec::new();
    let json = cfg.output.json;
    if json {
        task_handles.push(spawn_json_writer(
            "spectrum",
            results.subscribe_spectrum(),
            shutdown_rx.clone(),
        ));
        task_handles.push(spawn_json_writer(
            "waterfall",
            results.subscribe_waterfall(),
            shutdown_rx.clone(),
        ));
        task_handles.push(spawn_json_writer(
            "audio",
            results.subscribe_audio(),
            shutdown_rx.clone(),
        ));
    }

    let status_interval = cfg.output.status_interval();
    let mut status_tick =
        tokio::time::interval(status_interval.unwrap_or(Duration::from_secs(3600)));
    status_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut meter = ThroughputMeter::new();
    let mut acquiring = true;

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res?;
                info!("Ctrl+C received, shutting down");
                break;
            }
            chunk = queue.recv(), if acquiring => {
                let Some(chunk) = chunk else {
                    // The read thread closes the queue only when it gives up.
                    acquiring = false;
                    let status = acquisition.status();
                    error!(
                        "Acquisition stopped ({}): {}",
                        status.state,
                        status.last_error.as_deref().unwrap_or("no error recorded")
                    );
                    continue;
                };
                let started = Instant::now();
                let reports = supervisor.dispatch(chunk).await;
                meter.record(started.elapsed());
                results.publish(reports);
            }
            _ = status_tick.tick(), if status_interval.is_some() => {
                let frame = StatusFrame {
                    acquisition: acquisition.status(),
                    queue: queue.stats(),
                    supervisor: supervisor.stats(),
                    throughput: meter.snapshot(),
                    config_version: supervisor.config().version,
                    demodulator: demod_view.snapshot(),
                };
                report_status(&frame, json);
            }
        }
    }

    let _ = shutdown_tx.send(true);
    let acquisition = tokio::task::spawn_blocking(move || {
        if !acquisition.stop() {
            warn!("Read thread did not stop in time");
        }
        acquisition
    })
    .await?;

    let stats = supervisor.stats();
    let status = acquisition.status();
    info!(
        cycles = stats.total_executions,
        stage_failures = stats.total_failures,
        chunks = status.chunks_read,
        dropped = status.chunks_dropped,
        read_errors = status.read_errors,
        waterfall_lines = waterfall_view.len(),
        "final statistics"
    );
    for stage in &stats.stages {
        info!(
            stage = %stage.name,
            calls = stage.stats.calls,
            failures = stage.stats.failures,
            average_ms = stage.average_time.as_secs_f64() * 1e3,
            "stage statistics"
        );
    }

    for handle in &task_handles {
        if !handle.is_finished() {
            handle.abort();
        }
    }
    for handle in task_handles {
        let _ = handle.await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_overrides_file_values() {
        let cli = Cli::parse_from([
            "h1sdr-server",
            "--source",
            "mock",
            "--center",
            "145000000",
            "--mode",
            "usb",
            "--json",
        ]);
        let mut cfg = ServerConfig::default();
        cfg.demod.bandwidth = Some(8_000.0);
        apply_cli(&cli, &mut cfg);

        assert_eq!(cfg.device.source, SourceKind::Mock);
        assert_eq!(cfg.device.center_freq, 145e6);
        assert_eq!(cfg.demod.mode, DemodMode::Usb);
        assert_eq!(cfg.demod.bandwidth, None);
        assert!(cfg.output.json);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_cli_rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["h1sdr-server", "--mode", "dsb"]).is_err());
    }

    #[test]
    fn test_build_source_kinds() {
        let mut device = DeviceConfig::default();
        device.source = SourceKind::Mock;
        assert_eq!(build_source(&device).unwrap().name(), "mock");
        device.source = SourceKind::Tone;
        assert!(build_source(&device).is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_returns_after_signal() {
        let (tx, rx) = watch::channel(false);
        let waiter = tokio::spawn(wait_for_shutdown(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
