//! twiddle.rs
//! Coordinate-descent ("twiddle") search over the three PID gains.
//!
//! Per coefficient: try +δ, then -δ, then settle back to baseline.
//! δ grows 10% on success and shrinks 10% when both probes fail.
//! Coefficients are visited round-robin in the order P, D, I.

use serde::Serialize;

const GROW: f64 = 1.1;
const SHRINK: f64 = 0.9;

/// Index into the gain array. Order is fixed: P, D, I.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Coefficient {
    Proportional,
    Derivative,
    Integral,
}

impl Coefficient {
    pub const ALL: [Coefficient; 3] = [
        Coefficient::Proportional,
        Coefficient::Derivative,
        Coefficient::Integral,
    ];

    #[inline]
    pub fn index(self) -> usize {
        match self {
            Coefficient::Proportional => 0,
            Coefficient::Derivative => 1,
            Coefficient::Integral => 2,
        }
    }

    #[inline]
    pub fn next(self) -> Self {
        match self {
            Coefficient::Proportional => Coefficient::Derivative,
            Coefficient::Derivative => Coefficient::Integral,
            Coefficient::Integral => Coefficient::Proportional,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Coefficient::Proportional => "Kp",
            Coefficient::Derivative => "Kd",
            Coefficient::Integral => "Ki",
        }
    }
}

/// The three gains. The array is the only storage; named accessors read from it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Gains([f64; 3]);

impl Gains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self([kp, kd, ki])
    }

    #[inline]
    pub fn kp(&self) -> f64 {
        self.0[Coefficient::Proportional.index()]
    }

    #[inline]
    pub fn kd(&self) -> f64 {
        self.0[Coefficient::Derivative.index()]
    }

    #[inline]
    pub fn ki(&self) -> f64 {
        self.0[Coefficient::Integral.index()]
    }

    #[inline]
    pub fn get(&self, c: Coefficient) -> f64 {
        self.0[c.index()]
    }

    #[inline]
    fn adjust(&mut self, c: Coefficient, amount: f64) {
        self.0[c.index()] += amount;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    /// Add δ to the current coefficient.
    ProbeUp,
    /// Judge the +δ run; on failure move to baseline - δ.
    ProbeDown,
    /// Judge the -δ run; on failure restore baseline. Then move on.
    Advance,
}

/// Search state that survives resets: δ per coefficient, position, best error.
#[derive(Debug, Clone)]
pub struct Twiddle {
    deltas: [f64; 3],
    coefficient: Coefficient,
    phase: Phase,
    best_error: Option<f64>,
}

impl Twiddle {
    pub fn new(deltas: [f64; 3]) -> Self {
        Self {
            deltas,
            coefficient: Coefficient::Proportional,
            phase: Phase::ProbeUp,
            best_error: None,
        }
    }

    pub fn deltas(&self) -> [f64; 3] {
        self.deltas
    }

    pub fn delta(&self, c: Coefficient) -> f64 {
        self.deltas[c.index()]
    }

    pub fn coefficient(&self) -> Coefficient {
        self.coefficient
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn best_error(&self) -> Option<f64> {
        self.best_error
    }

    /// Back to the first coefficient and a fresh probe. δ and best error are kept.
    pub fn restart(&mut self) {
        self.coefficient = Coefficient::Proportional;
        self.phase = Phase::ProbeUp;
    }

    /// One phase transition, run on the first tick of a tuning run.
    ///
    /// `run_average` is the average squared error of the previous run, or
    /// `None` when that run produced no usable measurement. A finished
    /// coefficient chains straight into the probe-up of the next one, so a
    /// single call may change two gains.
    pub fn transition(&mut self, gains: &mut Gains, run_average: Option<f64>) {
        match self.phase {
            Phase::ProbeUp => self.probe_up(gains),
            Phase::ProbeDown => {
                if self.record_if_improved(run_average) {
                    self.deltas[self.coefficient.index()] *= GROW;
                    self.coefficient = self.coefficient.next();
                    self.probe_up(gains);
                } else {
                    gains.adjust(self.coefficient, -2.0 * self.delta(self.coefficient));
                    self.phase = Phase::Advance;
                }
            }
            Phase::Advance => {
                let idx = self.coefficient.index();
                if self.record_if_improved(run_average) {
                    self.deltas[idx] *= GROW;
                } else {
                    gains.adjust(self.coefficient, self.deltas[idx]);
                    self.deltas[idx] *= SHRINK;
                }
                self.coefficient = self.coefficient.next();
                self.probe_up(gains);
            }
        }
    }

    fn probe_up(&mut self, gains: &mut Gains) {
        gains.adjust(self.coefficient, self.delta(self.coefficient));
        self.phase = Phase::ProbeDown;
    }

    // Best error only ever moves down; an unknown average never counts as better.
    fn record_if_improved(&mut self, run_average: Option<f64>) -> bool {
        let improved = match (run_average, self.best_error) {
            (Some(avg), Some(best)) => avg < best,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if improved {
            self.best_error = run_average;
        }
        improved
    }
}
