//! pid.rs
//! Self-tuning PID controller: per-tick error update, run lifecycle, bound routing.
//!
//! A run starts on the first tick after construction or any reset. While tuning
//! is active the squared error is summed; once the step count passes the ceiling
//! the run continues as a pure stability check. An error sample beyond the bound
//! ends the run in one of three ways depending on where in the run it happened:
//! - before the ceiling: mid-run reset (next twiddle phase on the next run)
//! - between ceiling and lap threshold: full-run reset, ceiling grows to this step
//! - after a full lap: mid-run reset with tuning re-enabled
//!
//! A controller that never tunes has no window to protect: any violation is a
//! plain mid-run reset.

use log::{debug, info, warn};
use serde::Serialize;

use crate::controller::config::{ControllerConfig, ControllerError};
use crate::controller::twiddle::{Coefficient, Gains, Phase, Twiddle};

/// Proportional, integral and derivative error terms.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ErrorTerms {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

/// Diagnostic counters. Never read by the control path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    /// Bound violations before the ceiling. Cleared by a full-run reset.
    pub window_violations: u64,
    /// Ceiling extensions over the controller lifetime.
    pub ceiling_extensions: u64,
    /// Twiddle phase transitions. Cleared by a full-run reset.
    pub coefficient_changes: u64,
    /// Non-first ticks over the controller lifetime.
    pub total_steps: u64,
}

/// Read-only snapshot for logging and export.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostics {
    pub label: String,
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub delta_p: f64,
    pub delta_d: f64,
    pub delta_i: f64,
    pub coefficient: Coefficient,
    pub phase: Phase,
    pub step: u64,
    pub ceiling: u64,
    pub tuning_active: bool,
    pub best_error: Option<f64>,
    pub run_average: Option<f64>,
    pub window_violations: u64,
    pub ceiling_extensions: u64,
    pub coefficient_changes: u64,
    pub total_steps: u64,
    pub lap_completed: bool,
}

pub struct Controller {
    label: String,
    gains: Gains,
    errors: ErrorTerms,

    step: u64,
    ceiling: u64,
    lap_threshold: u64,
    max_error: Option<f64>,

    tuning_enabled: bool,
    tuning_active: bool,
    twiddle: Twiddle,
    run_average: Option<f64>,
    error_sum: Option<f64>,
    /// Squared samples folded into `error_sum` this run.
    samples: u64,

    counters: Counters,
    lap_completed: bool,
    first_tick: bool,
    reset_requested: bool,
}

impl Controller {
    /// Controller with default thresholds (bound 4.0, ceiling 1000, lap 6000).
    pub fn new(kp: f64, ki: f64, kd: f64, tuning: bool, label: &str) -> Result<Self, ControllerError> {
        Self::from_config(&ControllerConfig::new(kp, ki, kd, tuning, label))
    }

    pub fn from_config(config: &ControllerConfig) -> Result<Self, ControllerError> {
        config.validate()?;

        Ok(Self {
            label: config.label.clone(),
            gains: Gains::new(config.kp, config.ki, config.kd),
            errors: ErrorTerms::default(),
            step: 1,
            ceiling: config.initial_ceiling,
            lap_threshold: config.lap_threshold,
            max_error: config.max_error,
            tuning_enabled: config.tuning,
            tuning_active: config.tuning,
            twiddle: Twiddle::new(config.initial_deltas),
            run_average: None,
            error_sum: Some(0.0),
            samples: 0,
            counters: Counters::default(),
            lap_completed: false,
            first_tick: true,
            reset_requested: false,
        })
    }

    /// Feed one error sample. Non-finite samples are rejected and leave state untouched.
    pub fn tick(&mut self, sample: f64) -> Result<(), ControllerError> {
        if !sample.is_finite() {
            return Err(ControllerError::NonFiniteSample {
                label: self.label.clone(),
                sample,
            });
        }

        if self.first_tick {
            self.begin_run(sample);
        } else {
            self.advance_run(sample);
        }
        Ok(())
    }

    /// `-(Kp·p + Kd·d + Ki·i)`.
    #[inline]
    pub fn control(&self) -> f64 {
        -(self.gains.kp() * self.errors.p
            + self.gains.kd() * self.errors.d
            + self.gains.ki() * self.errors.i)
    }

    #[inline]
    pub fn reset_requested(&self) -> bool {
        self.reset_requested
    }

    #[inline]
    pub fn clear_reset_requested(&mut self) {
        self.reset_requested = false;
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    pub fn errors(&self) -> ErrorTerms {
        self.errors
    }

    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn lap_threshold(&self) -> u64 {
        self.lap_threshold
    }

    pub fn tuning_enabled(&self) -> bool {
        self.tuning_enabled
    }

    pub fn tuning_active(&self) -> bool {
        self.tuning_active
    }

    pub fn twiddle(&self) -> &Twiddle {
        &self.twiddle
    }

    pub fn run_average(&self) -> Option<f64> {
        self.run_average
    }

    pub fn counters(&self) -> Counters {
        self.counters
    }

    pub fn lap_completed(&self) -> bool {
        self.lap_completed
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let deltas = self.twiddle.deltas();
        Diagnostics {
            label: self.label.clone(),
            kp: self.gains.kp(),
            ki: self.gains.ki(),
            kd: self.gains.kd(),
            delta_p: deltas[Coefficient::Proportional.index()],
            delta_d: deltas[Coefficient::Derivative.index()],
            delta_i: deltas[Coefficient::Integral.index()],
            coefficient: self.twiddle.coefficient(),
            phase: self.twiddle.phase(),
            step: self.step,
            ceiling: self.ceiling,
            tuning_active: self.tuning_active,
            best_error: self.twiddle.best_error(),
            run_average: self.run_average,
            window_violations: self.counters.window_violations,
            ceiling_extensions: self.counters.ceiling_extensions,
            coefficient_changes: self.counters.coefficient_changes,
            total_steps: self.counters.total_steps,
            lap_completed: self.lap_completed,
        }
    }

    // First tick of a run: no previous sample, so d is left alone.
    fn begin_run(&mut self, sample: f64) {
        self.first_tick = false;
        self.errors.p = sample;
        self.errors.i += sample;

        if !self.tuning_active {
            return;
        }

        self.twiddle.transition(&mut self.gains, self.run_average);
        self.counters.coefficient_changes += 1;
        debug!(
            "[{}] ({}) new gains Kp={}, Kd={}, Ki={} ({:?} on {})",
            self.label,
            self.counter_tag(),
            self.gains.kp(),
            self.gains.kd(),
            self.gains.ki(),
            self.twiddle.phase(),
            self.twiddle.coefficient().name(),
        );

        if self.gains.kp() < 0.0 {
            warn!("[{}] ({}) Kp < 0, reset", self.label, self.counter_tag());
            self.reset();
        }
    }

    fn advance_run(&mut self, sample: f64) {
        self.errors.d = sample - self.errors.p;
        self.errors.p = sample;
        self.errors.i += sample;

        self.step += 1;
        self.counters.total_steps += 1;

        if self.tuning_enabled && !self.lap_completed && self.step > self.lap_threshold {
            self.lap_completed = true;
            info!(
                "[{}] full lap passed, step > {} ({}, besterr={:?}, err={:?})",
                self.label,
                self.lap_threshold,
                self.gain_summary(),
                self.twiddle.best_error(),
                self.window_average(),
            );
        }

        if self.tuning_active {
            self.error_sum = self.error_sum.map(|sum| sum + sample * sample);
            self.samples += 1;

            if self.step > self.ceiling {
                self.tuning_active = false;
                info!(
                    "[{}] ({}, ceiling={}) tuning window closed ({}, besterr={:?}, err={:?})",
                    self.label,
                    self.counter_tag(),
                    self.ceiling,
                    self.gain_summary(),
                    self.twiddle.best_error(),
                    self.window_average(),
                );
            }
        }

        if let Some(bound) = self.max_error {
            if sample.abs() > bound {
                self.route_violation();
            }
        }
    }

    fn route_violation(&mut self) {
        if !self.tuning_enabled {
            warn!(
                "[{}] ({}, step={}) max error, reset ({})",
                self.label,
                self.counter_tag(),
                self.step,
                self.gain_summary(),
            );
            self.reset();
        } else if self.step < self.ceiling {
            self.counters.window_violations += 1;
            warn!(
                "[{}] ({}, step={}) max error inside tuning window, reset ({})",
                self.label,
                self.counter_tag(),
                self.step,
                self.gain_summary(),
            );
            self.reset();
        } else if self.step <= self.lap_threshold {
            self.counters.ceiling_extensions += 1;
            warn!(
                "[{}] ({}, step={}) max error beyond ceiling {}, extending to {} and restarting ({})",
                self.label,
                self.counter_tag(),
                self.step,
                self.ceiling,
                self.step,
                self.gain_summary(),
            );
            self.reset_run();
        } else {
            warn!(
                "[{}] ({}, step={}) max error after full lap, reset ({})",
                self.label,
                self.counter_tag(),
                self.step,
                self.gain_summary(),
            );
            self.tuning_active = self.tuning_enabled;
            self.reset();
        }
    }

    /// Mid-run reset: abandon this run, keep the ceiling and search position.
    fn reset(&mut self) {
        self.errors = ErrorTerms::default();
        self.reset_requested = true;
        self.first_tick = true;

        self.run_average = self.window_average();
        self.error_sum = None;
        self.samples = 0;

        self.step = 1;
        self.tuning_active = self.tuning_enabled;
        self.lap_completed = false;
    }

    /// Full-run reset: ceiling moves to the current step and the search restarts at P.
    fn reset_run(&mut self) {
        self.errors = ErrorTerms::default();
        self.first_tick = true;
        self.reset_requested = false;

        self.ceiling = self.step;
        self.step = 1;

        self.tuning_active = self.tuning_enabled;
        self.twiddle.restart();

        self.run_average = None;
        self.error_sum = Some(0.0);
        self.samples = 0;

        self.counters.window_violations = 0;
        self.counters.coefficient_changes = 0;
        self.lap_completed = false;
    }

    // Mean squared error over the samples taken inside the tuning window.
    // A run that never accumulated has nothing to compare.
    fn window_average(&self) -> Option<f64> {
        match (self.error_sum, self.samples) {
            (Some(sum), n) if n > 0 => Some(sum / n as f64),
            _ => None,
        }
    }

    fn counter_tag(&self) -> String {
        format!(
            "{}:{}:{}:{}",
            self.counters.total_steps,
            self.counters.ceiling_extensions,
            self.counters.coefficient_changes,
            self.counters.window_violations,
        )
    }

    fn gain_summary(&self) -> String {
        let dp = self.twiddle.deltas();
        format!(
            "Kp={}, Kd={}, Ki={}, dp={{{},{},{}}}",
            self.gains.kp(),
            self.gains.kd(),
            self.gains.ki(),
            dp[0],
            dp[1],
            dp[2],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuned(ceiling: u64, lap: u64) -> Controller {
        let cfg = ControllerConfig::new(0.0, 0.0, 0.0, true, "test")
            .with_ceiling(ceiling)
            .with_lap_threshold(lap);
        Controller::from_config(&cfg).unwrap()
    }

    #[test]
    fn control_is_zero_before_first_tick() {
        let c = Controller::new(1.0, 2.0, 3.0, false, "steer").unwrap();
        assert_eq!(c.control(), 0.0);
        assert_eq!(c.step(), 1);
    }

    #[test]
    fn first_tick_leaves_derivative_alone() {
        let mut c = Controller::new(0.0, 0.0, 1.0, false, "steer").unwrap();
        c.tick(1.5).unwrap();
        assert_eq!(c.errors(), ErrorTerms { p: 1.5, i: 1.5, d: 0.0 });
        assert_eq!(c.step(), 1);
        assert_eq!(c.counters().total_steps, 0);
    }

    #[test]
    fn derivative_is_exact_difference() {
        let mut c = Controller::new(0.0, 0.0, 0.0, false, "steer").unwrap();
        c.tick(0.1).unwrap();
        c.tick(0.3).unwrap();
        assert_eq!(c.errors().d, 0.3 - 0.1);
        c.tick(-0.7).unwrap();
        assert_eq!(c.errors().d, -0.7 - 0.3);
    }

    #[test]
    fn non_finite_sample_is_rejected_without_change() {
        let mut c = Controller::new(1.0, 0.0, 0.0, false, "steer").unwrap();
        c.tick(0.5).unwrap();
        let before = c.errors();

        let err = c.tick(f64::NAN).unwrap_err();
        assert!(matches!(err, ControllerError::NonFiniteSample { .. }));
        assert!(c.tick(f64::NEG_INFINITY).is_err());

        assert_eq!(c.errors(), before);
        assert_eq!(c.step(), 1);
    }

    #[test]
    fn untuned_controller_never_touches_gains() {
        let mut c = Controller::new(0.5, 0.1, 2.0, false, "steer").unwrap();
        for s in [0.2, 0.4, -0.1, 5.0, 0.3, 0.3] {
            c.tick(s).unwrap();
            c.clear_reset_requested();
        }
        assert_eq!(c.gains(), Gains::new(0.5, 0.1, 2.0));
        assert_eq!(c.counters().coefficient_changes, 0);
    }

    #[test]
    fn first_tuning_tick_probes_kp() {
        let mut c = tuned(1000, 6000);
        c.tick(0.2).unwrap();
        assert_eq!(c.gains().kp(), 1.0);
        assert_eq!(c.twiddle().phase(), Phase::ProbeDown);
        assert_eq!(c.counters().coefficient_changes, 1);
    }

    #[test]
    fn error_sum_feeds_run_average() {
        let mut c = tuned(1000, 6000);
        c.tick(0.0).unwrap();
        c.tick(1.0).unwrap();
        c.tick(2.0).unwrap();
        c.tick(5.0).unwrap(); // step 4 < ceiling

        assert!(c.reset_requested());
        // (1 + 4 + 25) / 3, the first tick adds nothing
        assert_eq!(c.run_average(), Some(10.0));
        assert_eq!(c.counters().window_violations, 1);
    }

    #[test]
    fn accumulator_unknown_after_mid_run_reset() {
        let mut c = tuned(1000, 6000);
        c.tick(0.0).unwrap();
        c.tick(5.0).unwrap();
        c.clear_reset_requested();
        assert_eq!(c.run_average(), Some(25.0));

        c.tick(0.0).unwrap();
        c.tick(1.0).unwrap();
        c.tick(9.0).unwrap();
        assert_eq!(c.run_average(), None);
    }

    #[test]
    fn probe_down_success_moves_to_next_coefficient() {
        let cfg = ControllerConfig::new(0.5, 0.0, 0.0, true, "steer").with_deltas([1.0, 0.0, 0.0]);
        let mut c = Controller::from_config(&cfg).unwrap();

        c.tick(0.0).unwrap(); // Kp 1.5
        c.tick(5.0).unwrap(); // violation, average known (25)
        c.clear_reset_requested();

        // probe-down compares 25 with no best: improvement, so Kd is probed instead
        c.tick(0.0).unwrap();
        assert_eq!(c.twiddle().coefficient(), Coefficient::Derivative);
        c.tick(5.0).unwrap();
        c.clear_reset_requested();

        // next run's average is unknown: probe-down fails, Kd drops by 2δ = 0
        c.tick(0.0).unwrap();
        assert_eq!(c.twiddle().phase(), Phase::Advance);
        assert_eq!(c.gains().kp(), 1.5);
        assert!(!c.reset_requested());
    }

    #[test]
    fn kp_below_zero_requests_reset_on_first_tick() {
        let mut c = tuned(1000, 6000);
        c.tick(0.0).unwrap(); // Kp = 1
        c.tick(5.0).unwrap();
        c.clear_reset_requested();

        // probe-down: average 25 beats unknown best, so move on to Kd
        c.tick(0.0).unwrap();
        c.tick(5.0).unwrap();
        c.clear_reset_requested();
        // Kd probe fails (no measurement), Kd = -1
        c.tick(0.0).unwrap();
        c.tick(5.0).unwrap();
        c.clear_reset_requested();
        // advance: Kd restored, Ki probed
        c.tick(0.0).unwrap();
        c.tick(5.0).unwrap();
        c.clear_reset_requested();
        // Ki probe fails: Ki = -1
        c.tick(0.0).unwrap();
        c.tick(5.0).unwrap();
        c.clear_reset_requested();
        // advance: Ki restored, Kp probed +1.1 -> 2.1
        c.tick(0.0).unwrap();
        assert!((c.gains().kp() - 2.1).abs() < 1e-12);
        c.tick(5.0).unwrap();
        c.clear_reset_requested();
        // Kp probe fails: 2.1 - 2.2 < 0 triggers an immediate reset
        c.tick(0.0).unwrap();
        assert!(c.gains().kp() < 0.0);
        assert!(c.reset_requested());
        assert_eq!(c.step(), 1);
        assert_eq!(c.errors(), ErrorTerms::default());
    }

    #[test]
    fn ceiling_closes_tuning_window() {
        let mut c = tuned(3, 10);
        for s in [0.1, 0.1, 0.1] {
            c.tick(s).unwrap();
        }
        assert!(c.tuning_active());
        c.tick(0.1).unwrap(); // step 4 > 3
        assert!(!c.tuning_active());
    }

    #[test]
    fn lap_notice_latches_once() {
        let mut c = Controller::from_config(
            &ControllerConfig::new(0.0, 0.0, 0.0, true, "steer")
                .with_ceiling(2)
                .with_lap_threshold(3),
        )
        .unwrap();
        for _ in 0..3 {
            c.tick(0.0).unwrap();
        }
        assert!(!c.lap_completed());
        c.tick(0.0).unwrap();
        assert!(c.lap_completed());
        c.tick(0.0).unwrap();
        assert!(c.lap_completed());
    }

    #[test]
    fn untuned_controller_never_latches_lap() {
        let cfg = ControllerConfig::new(0.0, 0.0, 0.0, false, "throttle")
            .with_ceiling(2)
            .with_lap_threshold(3);
        let mut c = Controller::from_config(&cfg).unwrap();
        for _ in 0..6 {
            c.tick(0.0).unwrap();
        }
        assert!(!c.lap_completed());
    }

    #[test]
    fn untuned_violation_past_ceiling_is_plain_reset() {
        let cfg = ControllerConfig::new(0.0, 1.0, 0.0, false, "throttle")
            .with_ceiling(3)
            .with_lap_threshold(10);
        let mut c = Controller::from_config(&cfg).unwrap();
        for _ in 0..4 {
            c.tick(1.0).unwrap();
        }
        assert_eq!(c.control(), -4.0);

        c.tick(5.0).unwrap(); // step 5, between ceiling and lap
        assert!(c.reset_requested(), "Caller must learn the integral was dropped");
        assert_eq!(c.ceiling(), 3);
        assert_eq!(c.counters().ceiling_extensions, 0);
        assert_eq!(c.counters().window_violations, 0);
        assert_eq!(c.step(), 1);
    }

    #[test]
    fn run_average_ignores_ticks_past_the_window() {
        let run = |violation_step: u64| {
            let mut c = tuned(2, 4);
            // first tick plus two in-window samples of 1.0
            for _ in 0..3 {
                c.tick(1.0).unwrap();
            }
            while c.step() + 1 < violation_step {
                c.tick(0.0).unwrap();
            }
            c.tick(5.0).unwrap();
            assert!(c.reset_requested());
            c.run_average()
        };

        assert_eq!(run(6), Some(1.0));
        assert_eq!(run(26), Some(1.0));
    }

    #[test]
    fn full_run_reset_keeps_request_flag_clear() {
        let mut c = tuned(2, 10);
        for s in [0.0, 0.1, 0.1, 0.1] {
            c.tick(s).unwrap();
        }
        c.tick(5.0).unwrap(); // step 5, between ceiling and lap
        assert!(!c.reset_requested());
        assert_eq!(c.ceiling(), 5);
        assert_eq!(c.step(), 1);
        assert_eq!(c.twiddle().phase(), Phase::ProbeUp);
        assert_eq!(c.counters().ceiling_extensions, 1);
        assert_eq!(c.counters().coefficient_changes, 0);
    }

    #[test]
    fn unbounded_controller_ignores_large_errors() {
        let cfg = ControllerConfig::new(1.0, 0.0, 0.0, false, "throttle").with_max_error(None);
        let mut c = Controller::from_config(&cfg).unwrap();
        c.tick(1.0).unwrap();
        c.tick(100.0).unwrap();
        assert!(!c.reset_requested());
        assert_eq!(c.control(), -100.0);
    }

    #[test]
    fn diagnostics_mirror_state() {
        let mut c = tuned(1000, 6000);
        c.tick(0.5).unwrap();
        let d = c.diagnostics();
        assert_eq!(d.label, "test");
        assert_eq!(d.kp, 1.0);
        assert_eq!(d.delta_p, 1.0);
        assert_eq!(d.phase, Phase::ProbeDown);
        assert_eq!(d.coefficient, Coefficient::Proportional);
        assert_eq!(d.best_error, None);
        assert!(d.tuning_active);
    }
}
