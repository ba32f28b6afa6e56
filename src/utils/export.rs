//! Append-only row log of raw samples.
//!
//! One space-separated line per sample cycle:
//! `timestamp qbpm_avgcurr qbpm_x qbpm_z petra_curr`.
//! The header is written once, when the file is new or empty; existing logs
//! are appended to across restarts.

use std::{
    fs::{File, OpenOptions, create_dir_all},
    path::{Path, PathBuf},
};

use csv::{Writer, WriterBuilder};
use log::{error, info};
use serde::Serialize;

use crate::component_a::{
    history::HistoryStore,
    sensor::{Signal, SignalSource},
};
use crate::error::SinkError;

pub const HEADER: [&str; 5] = ["timestamp", "qbpm_avgcurr", "qbpm_x", "qbpm_z", "petra_curr"];

/// Newest raw values of a store, in log column order.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LogRow {
    pub timestamp: f64,
    pub avg_current: f64,
    pub pos_h: f64,
    pub pos_v: f64,
    pub ring_current: f64,
}

impl LogRow {
    pub fn latest<S: SignalSource>(store: &HistoryStore<S>) -> Self {
        Self {
            timestamp: store.latest_timestamp(),
            avg_current: store.latest_raw(Signal::AvgCurrent),
            pos_h: store.latest_raw(Signal::PosH),
            pos_v: store.latest_raw(Signal::PosV),
            ring_current: store.latest_raw(Signal::RingCurrent),
        }
    }
}

pub struct RowLogger {
    path: PathBuf,
    writer: Writer<File>,
    rows: u64,
}

impl RowLogger {
    /// Opens `path` for appending, creating parent directories as needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let is_new = file.metadata()?.len() == 0;

        let mut writer = WriterBuilder::new()
            .delimiter(b' ')
            .has_headers(false)
            .from_writer(file);
        if is_new {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }
        info!("[Export] logging samples to {}", path.display());
        Ok(Self { path, writer, rows: 0 })
    }

    pub fn append(&mut self, row: &LogRow) -> Result<(), SinkError> {
        self.writer.serialize(row)?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }
}

/// Opens a logger, reporting failure instead of returning it.
pub fn open_or_warn(path: &Path) -> Option<RowLogger> {
    match RowLogger::open(path) {
        Ok(logger) => Some(logger),
        Err(e) => {
            error!("[Export] cannot open {}: {}", path.display(), e);
            None
        }
    }
}
