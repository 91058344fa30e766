//Controller: PID computation + twiddle gain tuning
//One instance per controlled axis (steering, throttle). Tuning mutates the
//gains the PID reads every tick, so both live in one state machine.
pub mod config;
pub mod pid;
pub mod twiddle;

pub use config::{ControllerConfig, ControllerError};
pub use pid::{Controller, Counters, Diagnostics, ErrorTerms};
pub use twiddle::{Coefficient, Gains, Phase, Twiddle};
