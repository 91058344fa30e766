//! vehicle.rs
//! Simulated controlled process: kinematic bicycle model on a sinusoidal track.
//! - Fixed cadence: SpinSleeper releases each tick (disabled when interval is 0)
//! - Measurement noise: seeded uniform noise on the reported cross-track error
//! - `Command::Reset` puts the vehicle back on the start line at rest

use std::{
    f64::consts::PI,
    time::{Duration, Instant},
};

use average::{Estimate, Max, Mean};
use log::{debug, info};
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use spin_sleep::{SpinSleeper, SpinStrategy};

use crate::drive::link::{Command, Telemetry, VehicleEnd};

const WHEELBASE_M: f64 = 2.7;
const MAX_STEER_RAD: f64 = 25.0 * PI / 180.0;
const ACCEL: f64 = 8.0;
const DRAG: f64 = 0.15;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Telemetry samples to exchange before hanging up.
    pub ticks: u64,
    /// Wall-clock period between samples. 0 runs as fast as the link allows.
    pub tick_interval_us: u64,
    /// Integration step of the model, seconds.
    pub dt: f64,
    pub seed: u64,
    /// Half-width of the uniform noise added to the reported cte.
    pub noise: f64,
    pub speed_limit: f64,
    /// Peak heading swing of the track, radians.
    pub track_amplitude: f64,
    /// Track length of one heading oscillation, metres.
    pub track_period: f64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            ticks: 20_000,
            tick_interval_us: 0,
            dt: 0.05,
            seed: 42,
            noise: 0.02,
            speed_limit: 30.0,
            track_amplitude: 0.6,
            track_period: 250.0,
        }
    }
}

/// Outcome of one simulated drive.
#[derive(Debug, Clone, Serialize)]
pub struct VehicleReport {
    pub ticks: u64,
    pub resets: u64,
    pub manual: u64,
    pub mean_abs_cte: f64,
    pub max_abs_cte: f64,
    pub distance: f64,
}

pub struct Vehicle {
    config: SimulationConfig,
    rng: StdRng,
    /// Distance along the track centre line.
    s: f64,
    /// Lateral offset from the centre line (the true cte).
    y: f64,
    /// Heading relative to the track tangent.
    heading: f64,
    speed: f64,
    steering_angle: f64,
    throttle: f64,
}

impl Vehicle {
    pub fn new(config: SimulationConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            s: 0.0,
            y: 0.0,
            heading: 0.0,
            speed: 0.0,
            steering_angle: 0.0,
            throttle: 0.0,
        }
    }

    pub fn offset(&self) -> f64 {
        self.y
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn distance(&self) -> f64 {
        self.s
    }

    /// Noisy measurement of the current state.
    pub fn telemetry(&mut self, seq: u64) -> Telemetry {
        let noise = if self.config.noise > 0.0 {
            self.rng.random_range(-self.config.noise..=self.config.noise)
        } else {
            0.0
        };
        Telemetry {
            seq,
            cte: self.y + noise,
            speed: self.speed,
        }
    }

    /// Latch the command and advance the model by one step.
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::Steer { steering_angle, throttle } => {
                self.steering_angle = steering_angle.clamp(-1.0, 1.0);
                self.throttle = throttle.clamp(-1.0, 1.0);
            }
            Command::Reset => {
                self.restart();
                return;
            }
            Command::Manual => {}
        }
        self.integrate();
    }

    fn restart(&mut self) {
        self.s = 0.0;
        self.y = 0.0;
        self.heading = 0.0;
        self.speed = 0.0;
        self.steering_angle = 0.0;
        self.throttle = 0.0;
    }

    fn integrate(&mut self) {
        let dt = self.config.dt;

        self.speed += (ACCEL * self.throttle - DRAG * self.speed) * dt;
        self.speed = self.speed.clamp(0.0, self.config.speed_limit);

        let along = self.speed * self.heading.cos();
        let delta = self.steering_angle * MAX_STEER_RAD;
        let yaw_rate = self.speed / WHEELBASE_M * delta.tan();

        self.y += self.speed * self.heading.sin() * dt;
        self.heading += (yaw_rate - self.curvature() * along) * dt;
        self.s += along * dt;
    }

    // d(track heading)/ds for heading = A * sin(2πs / P)
    fn curvature(&self) -> f64 {
        let k = 2.0 * PI / self.config.track_period;
        self.config.track_amplitude * k * (k * self.s).cos()
    }

    /// Exchange telemetry for commands until `ticks` samples or the peer hangs up.
    pub fn run(mut self, link: VehicleEnd) -> VehicleReport {
        let period = Duration::from_micros(self.config.tick_interval_us);
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);
        let mut next_release = Instant::now() + period;

        let mut abs_cte = Mean::new();
        let mut peak = Max::new();
        let mut resets = 0u64;
        let mut manual = 0u64;
        let mut distance = 0.0;
        let mut ticks = 0u64;

        for seq in 1..=self.config.ticks {
            if !period.is_zero() {
                let now = Instant::now();
                if now < next_release {
                    sleeper.sleep(next_release - now);
                }
                next_release += period;
            }

            let telemetry = self.telemetry(seq);
            abs_cte.add(telemetry.cte.abs());
            peak.add(telemetry.cte.abs());

            let Some(command) = link.exchange(telemetry) else {
                debug!("[Vehicle] controller hung up at seq={}", seq);
                break;
            };
            ticks = seq;

            match command {
                Command::Reset => {
                    resets += 1;
                    distance += self.s;
                }
                Command::Manual => manual += 1,
                Command::Steer { .. } => {}
            }
            self.apply(command);
        }
        distance += self.s;

        let report = VehicleReport {
            ticks,
            resets,
            manual,
            mean_abs_cte: if abs_cte.is_empty() { 0.0 } else { abs_cte.mean() },
            max_abs_cte: if abs_cte.is_empty() { 0.0 } else { peak.max() },
            distance,
        };
        info!(
            "[Vehicle] {} ticks, {} resets, mean |cte|={:.4}, max |cte|={:.4}, distance={:.1} m",
            report.ticks, report.resets, report.mean_abs_cte, report.max_abs_cte, report.distance
        );
        report
    }
}
