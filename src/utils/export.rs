//! CSV export of controller diagnostics.
//!
//! One row per controller per reset, plus a final row per controller when the
//! session ends: `event,seq,label,kp,kd,ki,delta_p,delta_d,delta_i,...`.
//! Rows go through a buffered csv writer that is flushed every few batches.

use std::{
    fs::{create_dir_all, File},
    io::{BufWriter, Write},
    path::Path,
};

use csv::Writer;
use log::{error, info};
use serde::Serialize;

use crate::controller::{Coefficient, Diagnostics, Phase};
use crate::drive::session::{TraceEvent, TraceSink};

const FLUSH_ROWS: usize = 64;   // flush to disk after this many rows

#[derive(Debug, Serialize)]
struct TraceRow<'a> {
    event: &'static str,
    seq: Option<u64>,
    label: &'a str,
    kp: f64,
    kd: f64,
    ki: f64,
    delta_p: f64,
    delta_d: f64,
    delta_i: f64,
    coefficient: Coefficient,
    phase: Phase,
    ceiling: u64,
    best_error: Option<f64>,
    run_average: Option<f64>,
    window_violations: u64,
    ceiling_extensions: u64,
    coefficient_changes: u64,
    total_steps: u64,
}

impl<'a> TraceRow<'a> {
    fn new(event: TraceEvent, d: &'a Diagnostics) -> Self {
        let (event, seq) = match event {
            TraceEvent::Reset(seq) => ("reset", Some(seq)),
            TraceEvent::Final => ("final", None),
        };
        Self {
            event,
            seq,
            label: &d.label,
            kp: d.kp,
            kd: d.kd,
            ki: d.ki,
            delta_p: d.delta_p,
            delta_d: d.delta_d,
            delta_i: d.delta_i,
            coefficient: d.coefficient,
            phase: d.phase,
            ceiling: d.ceiling,
            best_error: d.best_error,
            run_average: d.run_average,
            window_violations: d.window_violations,
            ceiling_extensions: d.ceiling_extensions,
            coefficient_changes: d.coefficient_changes,
            total_steps: d.total_steps,
        }
    }
}

/// Buffered CSV sink for session diagnostics.
pub struct TraceWriter<W: Write> {
    wtr: Writer<W>,
    pending: usize,
    rows: usize,
}

impl TraceWriter<BufWriter<File>> {
    /// Create (or truncate) the trace file, creating parent directories.
    pub fn create(path: &Path) -> std::io::Result<Self> {
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() {
                create_dir_all(dir)?;
            }
        }
        let file = File::create(path)?;
        info!("Writing tuning trace to {:?}", path);
        Ok(Self::from_writer(BufWriter::new(file)))
    }
}

impl<W: Write> TraceWriter<W> {
    pub fn from_writer(writer: W) -> Self {
        Self {
            wtr: Writer::from_writer(writer),
            pending: 0,
            rows: 0,
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Flush and hand back the underlying writer.
    pub fn into_inner(mut self) -> Option<W> {
        if let Err(e) = self.wtr.flush() {
            error!("Failed to flush trace: {}", e);
        }
        self.wtr.into_inner().ok()
    }
}

impl<W: Write> TraceSink for TraceWriter<W> {
    fn record(&mut self, event: TraceEvent, diagnostics: &Diagnostics) {
        if let Err(e) = self.wtr.serialize(TraceRow::new(event, diagnostics)) {
            error!("Failed to write trace row: {}", e);
            return;
        }
        self.rows += 1;
        self.pending += 1;

        if self.pending >= FLUSH_ROWS || event == TraceEvent::Final {
            self.wtr.flush().ok();
            self.pending = 0;
        }
    }
}
