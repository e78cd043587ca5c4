// SPDX-License-Identifier: GPL-3.0-only

//! Asynchronous timing CSV writer
//!
//! A dedicated OS thread drains a bounded queue and appends one row per
//! recorded frame. Producers never block: when the queue is full the entry
//! is dropped, and the drop accumulator guarantees the dropped-frame counts
//! survive into the next row that does get written. This is the core
//! accounting argument of the recorder: individual rows are expendable,
//! drop totals are not.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::{debug, error, warn};

use crate::constants::{
    CSV_FLUSH_INTERVAL_ROWS, CSV_LOGGER_STOP_TIMEOUT, CSV_QUEUE_POLL_TIMEOUT,
    CSV_WRITE_BUFFER_SIZE,
};
use crate::errors::RecordingError;

/// CSV file header, written exactly once per file.
pub const CSV_HEADER: &str =
    "frame_number,write_time_unix,sensor_timestamp_ns,dropped_since_last,total_hardware_drops";

/// One queued timing row.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvEntry {
    /// Canonical display frame number; strictly increasing within a file
    pub frame_number: u64,
    /// Wall-clock enqueue time (Unix seconds)
    pub write_time_unix: f64,
    /// Sensor timestamp, empty column when absent
    pub sensor_timestamp_ns: Option<u64>,
    /// Drops carried by this frame, before accumulator override
    pub dropped_since_last: Option<u64>,
}

enum CsvMessage {
    Entry(CsvEntry),
    Stop,
}

#[derive(Debug, Default)]
struct DropCounts {
    /// Drops not yet committed to any CSV row
    accumulated: u64,
    /// Lifetime drops since recording start
    total: u64,
}

/// Out-of-band drop bookkeeping shared by the producer and the writer.
///
/// Invariant: a written row fully consumes `accumulated` under the lock, so
/// counts from entries lost to queue overflow reappear in the next accepted
/// row instead of vanishing.
#[derive(Debug, Default)]
pub struct DropAccumulator {
    inner: Mutex<DropCounts>,
}

impl DropAccumulator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Clear both counters (new recording).
    pub fn reset(&self) {
        let mut counts = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        *counts = DropCounts::default();
    }

    /// Record drops observed on a submitted frame.
    pub fn accumulate(&self, drops: u64) {
        if drops == 0 {
            return;
        }
        let mut counts = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        counts.accumulated += drops;
        counts.total += drops;
    }

    /// Lifetime drop total.
    pub fn total(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).total
    }

    /// Resolve the effective `dropped_since_last` for a row: pending
    /// accumulated drops override the entry's own count and are reset; the
    /// lifetime total is captured under the same lock.
    pub fn consume_for_row(&self, entry_drops: Option<u64>) -> (Option<u64>, u64) {
        let mut counts = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let effective = if counts.accumulated > 0 {
            let pending = counts.accumulated;
            counts.accumulated = 0;
            Some(pending)
        } else {
            entry_drops
        };
        (effective, counts.total)
    }
}

/// Format one CSV row (without trailing newline handling beyond `\n`).
fn format_row(entry: &CsvEntry, dropped_effective: Option<u64>, total_drops: u64) -> String {
    let sensor = entry
        .sensor_timestamp_ns
        .map(|v| v.to_string())
        .unwrap_or_default();
    let dropped = dropped_effective.map(|v| v.to_string()).unwrap_or_default();
    format!(
        "{},{:.6},{},{},{}\n",
        entry.frame_number, entry.write_time_unix, sensor, dropped, total_drops
    )
}

/// Separate-thread CSV logger with a bounded, non-blocking queue.
pub struct CsvLogger {
    camera_id: usize,
    path: PathBuf,
    tx: SyncSender<CsvMessage>,
    done_rx: Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl CsvLogger {
    /// Open the CSV file, write the header, and spawn the writer thread.
    pub fn start(
        camera_id: usize,
        path: &Path,
        accumulator: Arc<DropAccumulator>,
        queue_size: usize,
    ) -> Result<Self, RecordingError> {
        let file = File::create(path).map_err(|e| RecordingError::CsvIo(e.to_string()))?;
        let mut writer = BufWriter::with_capacity(CSV_WRITE_BUFFER_SIZE, file);
        writeln!(writer, "{CSV_HEADER}").map_err(|e| RecordingError::CsvIo(e.to_string()))?;

        let (tx, rx) = sync_channel(queue_size);
        let (done_tx, done_rx) = sync_channel(1);
        let thread = std::thread::Builder::new()
            .name(format!("cam{camera_id}-csv"))
            .spawn(move || {
                writer_loop(camera_id, writer, rx, accumulator);
                let _ = done_tx.send(());
            })
            .map_err(|e| RecordingError::CsvIo(e.to_string()))?;

        debug!(camera = camera_id, path = %path.display(), "CSV logger started");
        Ok(Self {
            camera_id,
            path: path.to_path_buf(),
            tx,
            done_rx,
            thread: Some(thread),
        })
    }

    /// Queue one row without blocking. Returns false when the queue was full
    /// and the entry was dropped (video must not stall for diagnostics).
    pub fn log(&self, entry: CsvEntry) -> bool {
        self.tx.try_send(CsvMessage::Entry(entry)).is_ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send the stop sentinel and join the writer with a bounded wait.
    pub fn stop(self) {
        let Self {
            camera_id,
            path: _,
            tx,
            done_rx,
            mut thread,
        } = self;
        // Sentinel may be lost when the queue is full; dropping the sender
        // guarantees the writer still exits once the backlog drains.
        let _ = tx.try_send(CsvMessage::Stop);
        drop(tx);
        match done_rx.recv_timeout(CSV_LOGGER_STOP_TIMEOUT) {
            Ok(()) => {
                if let Some(thread) = thread.take() {
                    let _ = thread.join();
                }
            }
            Err(_) => {
                warn!(camera = camera_id, "CSV writer did not stop in time, detaching");
            }
        }
        debug!(camera = camera_id, "CSV logger stopped");
    }
}

fn writer_loop(
    camera_id: usize,
    mut writer: BufWriter<File>,
    rx: Receiver<CsvMessage>,
    accumulator: Arc<DropAccumulator>,
) {
    let mut rows_since_flush: u32 = 0;
    let mut write_error_logged = false;

    loop {
        let entry = match rx.recv_timeout(CSV_QUEUE_POLL_TIMEOUT) {
            Ok(CsvMessage::Entry(entry)) => entry,
            Ok(CsvMessage::Stop) => break,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let (dropped_effective, total_drops) = accumulator.consume_for_row(entry.dropped_since_last);

        if entry.frame_number <= 5 || dropped_effective.unwrap_or(0) > 0 {
            debug!(
                camera = camera_id,
                frame = entry.frame_number,
                dropped = ?dropped_effective,
                total = total_drops,
                "CSV row"
            );
        }

        let row = format_row(&entry, dropped_effective, total_drops);
        if let Err(e) = writer.write_all(row.as_bytes()) {
            // A row write failure is logged once and must not kill the
            // writer; drop totals remain correct in the accumulator.
            if !write_error_logged {
                error!(camera = camera_id, error = %e, "CSV write failed");
                write_error_logged = true;
            }
            continue;
        }

        rows_since_flush += 1;
        if rows_since_flush >= CSV_FLUSH_INTERVAL_ROWS {
            if let Err(e) = writer.flush() {
                if !write_error_logged {
                    error!(camera = camera_id, error = %e, "CSV flush failed");
                    write_error_logged = true;
                }
            }
            rows_since_flush = 0;
        }
    }

    if let Err(e) = writer.flush() {
        error!(camera = camera_id, error = %e, "Final CSV flush failed");
    }
    debug!(camera = camera_id, "CSV writer loop exited");
}
