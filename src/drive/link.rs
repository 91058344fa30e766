//! link.rs
//! Duplex channel between the controlled process and the controllers.
//!
//! Stand-in for the external transport: one telemetry sample goes in, one
//! command comes back, per tick. Both directions are bounded crossbeam channels;
//! dropping either end ends the session for the other side.

use crossbeam::channel::{bounded, Receiver, RecvError, SendError, Sender};

/// One telemetry sample from the controlled process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    pub seq: u64,
    /// Cross-track error, the controllers' input.
    pub cte: f64,
    pub speed: f64,
}

/// Reply to one telemetry sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Steer { steering_angle: f64, throttle: f64 },
    /// Abandon the current run: the process returns to its start state.
    Reset,
    /// No usable sample this tick; the process keeps its own inputs.
    Manual,
}

/// Process side: sends telemetry, receives commands.
pub struct VehicleEnd {
    tx: Sender<Telemetry>,
    rx: Receiver<Command>,
}

/// Controller side: receives telemetry, sends commands.
pub struct ControllerEnd {
    rx: Receiver<Telemetry>,
    tx: Sender<Command>,
}

/// Bounded duplex link. `capacity` applies to each direction.
pub fn duplex(capacity: usize) -> (VehicleEnd, ControllerEnd) {
    let (tx_telemetry, rx_telemetry) = bounded(capacity);
    let (tx_command, rx_command) = bounded(capacity);
    (
        VehicleEnd { tx: tx_telemetry, rx: rx_command },
        ControllerEnd { rx: rx_telemetry, tx: tx_command },
    )
}

impl VehicleEnd {
    pub fn send(&self, telemetry: Telemetry) -> Result<(), SendError<Telemetry>> {
        self.tx.send(telemetry)
    }

    pub fn recv(&self) -> Result<Command, RecvError> {
        self.rx.recv()
    }

    /// Send one sample and wait for its reply.
    pub fn exchange(&self, telemetry: Telemetry) -> Option<Command> {
        self.send(telemetry).ok()?;
        self.recv().ok()
    }
}

impl ControllerEnd {
    pub fn recv(&self) -> Result<Telemetry, RecvError> {
        self.rx.recv()
    }

    pub fn send(&self, command: Command) -> Result<(), SendError<Command>> {
        self.tx.send(command)
    }
}
