//! session.rs
//! Steering + throttle session: two controllers driven from one telemetry stream.
//!
//! Per sample:
//! - steering = tanh(steer.control()) after feeding the cross-track error
//! - throttle controller is fed |steering| and mapped to base + span * tanh(output)
//! - a reset requested by either controller clears both and becomes `Command::Reset`

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::controller::{Controller, ControllerError, Diagnostics};
use crate::drive::link::{Command, ControllerEnd, Telemetry};

/// Maps the throttle controller output into the actuator range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleMap {
    pub base: f64,
    pub span: f64,
}

impl Default for ThrottleMap {
    fn default() -> Self {
        Self { base: 0.7, span: 0.3 }
    }
}

impl ThrottleMap {
    #[inline]
    pub fn apply(&self, output: f64) -> f64 {
        self.base + self.span * output.tanh()
    }
}

/// Why a diagnostics snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    /// The session answered telemetry `seq` with a reset.
    Reset(u64),
    /// The session ended.
    Final,
}

/// Receives each reset snapshot and the final state of both controllers.
pub trait TraceSink {
    fn record(&mut self, event: TraceEvent, diagnostics: &Diagnostics);
}

impl TraceSink for Vec<(TraceEvent, Diagnostics)> {
    fn record(&mut self, event: TraceEvent, diagnostics: &Diagnostics) {
        self.push((event, diagnostics.clone()));
    }
}

pub struct DriveSession {
    steer: Controller,
    throttle: Controller,
    map: ThrottleMap,
    resets: u64,
    rejected: u64,
}

impl DriveSession {
    pub fn new(steer: Controller, throttle: Controller, map: ThrottleMap) -> Self {
        Self {
            steer,
            throttle,
            map,
            resets: 0,
            rejected: 0,
        }
    }

    pub fn steer(&self) -> &Controller {
        &self.steer
    }

    pub fn throttle(&self) -> &Controller {
        &self.throttle
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    pub fn rejected(&self) -> u64 {
        self.rejected
    }

    /// Run both controllers on one sample and build the reply.
    pub fn handle(&mut self, telemetry: &Telemetry) -> Result<Command, ControllerError> {
        self.steer.tick(telemetry.cte)?;
        let steering_angle = self.steer.control().tanh();

        self.throttle.tick(steering_angle.abs())?;
        let throttle = self.map.apply(self.throttle.control());

        if self.steer.reset_requested() || self.throttle.reset_requested() {
            self.steer.clear_reset_requested();
            self.throttle.clear_reset_requested();
            self.resets += 1;
            return Ok(Command::Reset);
        }

        Ok(Command::Steer { steering_angle, throttle })
    }

    /// Serve telemetry until the process hangs up.
    ///
    /// Rejected samples are answered with `Command::Manual`. Every reset and the
    /// final state of both controllers are handed to `sink`.
    pub fn serve<S: TraceSink>(&mut self, link: &ControllerEnd, sink: &mut S) {
        while let Ok(telemetry) = link.recv() {
            let command = match self.handle(&telemetry) {
                Ok(command) => command,
                Err(e) => {
                    self.rejected += 1;
                    warn!("[Session] seq={} {}", telemetry.seq, e);
                    Command::Manual
                }
            };

            if command == Command::Reset {
                debug!("[Session] seq={} reset requested", telemetry.seq);
                sink.record(TraceEvent::Reset(telemetry.seq), &self.steer.diagnostics());
                sink.record(TraceEvent::Reset(telemetry.seq), &self.throttle.diagnostics());
            }

            if link.send(command).is_err() {
                break;
            }
        }

        let steer = self.steer.diagnostics();
        let throttle = self.throttle.diagnostics();
        sink.record(TraceEvent::Final, &steer);
        sink.record(TraceEvent::Final, &throttle);

        info!(
            "[Session] finished: resets={}, rejected={}, steer Kp={} Kd={} Ki={} (besterr={:?}), throttle Kp={} Kd={} Ki={}",
            self.resets,
            self.rejected,
            steer.kp,
            steer.kd,
            steer.ki,
            steer.best_error,
            throttle.kp,
            throttle.kd,
            throttle.ki,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::ControllerConfig;
    use crate::drive::link::duplex;
    use std::thread;

    fn session(steer_kp: f64, throttle_kp: f64) -> DriveSession {
        let steer = Controller::new(steer_kp, 0.0, 0.0, false, "steer").unwrap();
        let throttle = Controller::new(throttle_kp, 0.0, 0.0, false, "throttle").unwrap();
        DriveSession::new(steer, throttle, ThrottleMap::default())
    }

    fn sample(seq: u64, cte: f64) -> Telemetry {
        Telemetry { seq, cte, speed: 10.0 }
    }

    #[test]
    fn steering_is_tanh_of_control() {
        let mut s = session(0.5, 0.0);
        let cmd = s.handle(&sample(1, 1.0)).unwrap();
        match cmd {
            Command::Steer { steering_angle, throttle } => {
                assert_eq!(steering_angle, (-0.5f64).tanh());
                assert_eq!(throttle, 0.7);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn throttle_backs_off_with_steering() {
        let mut s = session(1.0, 1.0);
        let cmd = s.handle(&sample(1, 2.0)).unwrap();
        let Command::Steer { steering_angle, throttle } = cmd else {
            panic!("expected steer command");
        };
        let expected = 0.7 + 0.3 * (-(steering_angle.abs())).tanh();
        assert_eq!(throttle, expected);
        assert!(throttle < 0.7);
    }

    #[test]
    fn divergence_becomes_reset_and_clears_both_flags() {
        let mut s = session(0.1, 0.0);
        s.handle(&sample(1, 0.5)).unwrap();
        let cmd = s.handle(&sample(2, 6.0)).unwrap();

        assert_eq!(cmd, Command::Reset);
        assert!(!s.steer().reset_requested());
        assert!(!s.throttle().reset_requested());
        assert_eq!(s.resets(), 1);
    }

    #[test]
    fn non_finite_cte_is_rejected() {
        let mut s = session(0.1, 0.0);
        assert!(s.handle(&sample(1, f64::NAN)).is_err());
    }

    #[test]
    fn serve_answers_every_sample_and_records_final_state() {
        let (vehicle, controller) = duplex(4);
        let steer = Controller::from_config(&ControllerConfig::new(0.2, 0.0, 1.0, true, "steer")).unwrap();
        let throttle = Controller::new(1.0, 0.0, 0.0, false, "throttle").unwrap();
        let mut s = DriveSession::new(steer, throttle, ThrottleMap::default());

        let handle = thread::spawn(move || {
            let mut trace: Vec<(TraceEvent, Diagnostics)> = Vec::new();
            s.serve(&controller, &mut trace);
            (s.resets(), s.rejected(), trace)
        });

        let replies: Vec<Command> = [0.1, 0.2, f64::NAN, 9.0, 0.1]
            .iter()
            .enumerate()
            .filter_map(|(i, &cte)| vehicle.exchange(sample(i as u64 + 1, cte)))
            .collect();
        drop(vehicle);

        let (resets, rejected, trace) = handle.join().unwrap();
        assert_eq!(replies.len(), 5);
        assert_eq!(replies[2], Command::Manual);
        assert_eq!(replies[3], Command::Reset);
        assert_eq!(resets, 1);
        assert_eq!(rejected, 1);

        // two rows for the reset, two for the final state
        assert_eq!(trace.len(), 4);
        assert_eq!(trace[0].0, TraceEvent::Reset(4));
        assert_eq!(trace[0].1.label, "steer");
        assert_eq!(trace[3].0, TraceEvent::Final);
        assert_eq!(trace[3].1.label, "throttle");
    }
}
