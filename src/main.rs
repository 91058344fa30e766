//! # Twiddle PID Entry Point
//! Drives a simulated vehicle with a steering and a throttle controller,
//! either of which may tune its own gains online.
//!
//! ## Usage
//! `twiddle_pid [config.toml]`. Without a path the built-in defaults are used
//! (steering tunes from its last known good gains, throttle is fixed).
//!
//! ## Key Architecture
//! - **Vehicle thread:** kinematic model; one telemetry sample per tick over a bounded duplex link.
//! - **Session (main thread):** both controllers, replies with steer/throttle or reset.
//! - **Trace:** reset and final diagnostics appended to CSV.
//!
//! ## Outputs
//! - `data/logs/tuning_trace.csv` (configurable): gains, perturbations and counters per reset.

use std::{env, path::Path, process::ExitCode, thread};

use log::{error, info};

use twiddle_pid::{
    controller::Controller,
    drive::{
        link::duplex,
        session::{DriveSession, TraceEvent, TraceSink},
        vehicle::Vehicle,
    },
    utils::{
        config::{load_from_file, AppConfig},
        export::TraceWriter,
    },
};

const LINK_CAPACITY: usize = 1;

/// Discards diagnostics when export is disabled.
struct NoTrace;

impl TraceSink for NoTrace {
    fn record(&mut self, _event: TraceEvent, _diagnostics: &twiddle_pid::controller::Diagnostics) {}
}

fn main() -> ExitCode {
    env_logger::init();
    info!("=== TWIDDLE PID START ===");

    let config = match env::args().nth(1) {
        Some(path) => match load_from_file(Path::new(&path)) {
            Ok(cfg) => {
                info!("Loaded config from {}", path);
                cfg
            }
            Err(e) => {
                error!("{}", e);
                return ExitCode::FAILURE;
            }
        },
        None => AppConfig::default(),
    };

    match run(config) {
        Ok(()) => {
            info!("=== TWIDDLE PID FINISHED ===");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(config: AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let steer = Controller::from_config(&config.steer)?;
    let throttle = Controller::from_config(&config.throttle)?;
    let mut session = DriveSession::new(steer, throttle, config.throttle_map);

    info!(
        "[Main] steer tuning={}, throttle tuning={}, {} ticks",
        config.steer.tuning, config.throttle.tuning, config.simulation.ticks
    );

    let (vehicle_end, controller_end) = duplex(LINK_CAPACITY);
    let vehicle = Vehicle::new(config.simulation.clone());

    // Vehicle drives the cadence; the session answers until the vehicle hangs up.
    let vehicle_handle = thread::Builder::new()
        .name("vehicle".to_string())
        .spawn(move || vehicle.run(vehicle_end))?;

    match &config.export.trace_path {
        Some(path) => {
            let mut trace = TraceWriter::create(path)?;
            session.serve(&controller_end, &mut trace);
            info!("[Main] {} trace rows written to {:?}", trace.rows(), path);
        }
        None => session.serve(&controller_end, &mut NoTrace),
    }
    drop(controller_end);

    match vehicle_handle.join() {
        Ok(report) => info!(
            "[Main] drive summary: ticks={}, resets={}, manual={}, mean |cte|={:.4}, max |cte|={:.4}",
            report.ticks, report.resets, report.manual, report.mean_abs_cte, report.max_abs_cte
        ),
        Err(_) => error!("[Main] vehicle thread join failed"),
    }

    Ok(())
}
