//! Tick-keyed JSONL diagnostics, written off the scheduling thread.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::{SystemTime, UNIX_EPOCH};

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticEnvelope {
    pub timestamp_ms: u64,
    pub tick: i64,
    pub channel: String,
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub data: serde_json::Value,
}

/// Owned by the caller and handed to the replay runner. Dropping the sink
/// flushes everything recorded so far.
pub struct DiagnosticsSink {
    sender: Option<Sender<DiagnosticEnvelope>>,
    writer: Option<JoinHandle<io::Result<u64>>>,
}

impl DiagnosticsSink {
    pub fn create(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        info!(target: "replay::diagnostics", path = %path.display(), "diagnostics.opened");
        Ok(Self::from_writer(BufWriter::new(file)))
    }

    pub fn from_writer<W>(writer: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let (sender, receiver) = unbounded::<DiagnosticEnvelope>();
        let handle = thread::spawn(move || -> io::Result<u64> {
            let mut written = 0u64;
            let result = write_entries(writer, receiver, &mut written);
            if let Err(err) = &result {
                warn!(
                    target: "replay::diagnostics",
                    written,
                    error = %err,
                    "diagnostics.write_failed"
                );
            }
            result.map(|()| written)
        });
        Self {
            sender: Some(sender),
            writer: Some(handle),
        }
    }

    pub fn record(&self, tick: i64, channel: &str, data: serde_json::Value) {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let envelope = DiagnosticEnvelope {
            timestamp_ms,
            tick,
            channel: channel.to_string(),
            data,
        };
        if let Some(sender) = &self.sender {
            // The writer thread exits on its first failure; later entries drop.
            let _ = sender.send(envelope);
        }
    }

    /// Flushes and returns the number of entries written.
    pub fn close(mut self) -> io::Result<u64> {
        self.finish()
    }

    fn finish(&mut self) -> io::Result<u64> {
        drop(self.sender.take());
        match self.writer.take() {
            Some(handle) => handle.join().unwrap_or_else(|_| {
                Err(io::Error::new(
                    io::ErrorKind::Other,
                    "diagnostics writer panicked",
                ))
            }),
            None => Ok(0),
        }
    }
}

fn write_entries<W: Write>(
    mut writer: W,
    receiver: Receiver<DiagnosticEnvelope>,
    written: &mut u64,
) -> io::Result<()> {
    for envelope in receiver {
        serde_json::to_writer(&mut writer, &envelope).map_err(io::Error::from)?;
        writer.write_all(b"\n")?;
        *written += 1;
    }
    writer.flush()
}

impl Drop for DiagnosticsSink {
    fn drop(&mut self) {
        if let Err(err) = self.finish() {
            warn!(target: "replay::diagnostics", error = %err, "diagnostics.flush_failed");
        }
    }
}
