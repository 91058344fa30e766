//! # twiddle_pid
//! Self-tuning PID control for processes with unknown dynamics.
//!
//! - **controller:** PID with an online twiddle (coordinate-descent) gain search.
//! - **drive:** steering/throttle session over a duplex link, plus a simulated vehicle.
//! - **utils:** TOML configuration and CSV diagnostics export.

pub mod controller;
pub mod drive;
pub mod utils;

pub use controller::{Controller, ControllerConfig, ControllerError};
