use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::sync::{Arc, Mutex};

use camino::Utf8Path;
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use crate::error::PipelineError;

/// One-time process logging setup: every event goes to stdout and is
/// appended to the fixed log file.
pub fn init(log_path: &Utf8Path) -> Result<(), PipelineError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path.as_std_path())
        .map_err(|err| PipelineError::Filesystem(format!("open {log_path}: {err}")))?;
    writeln!(file, "--- run started {} ---", Utc::now().to_rfc3339())
        .map_err(|err| PipelineError::Filesystem(err.to_string()))?;
    let file = Arc::new(Mutex::new(file));

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_ansi(false)
        .with_writer(move || TeeWriter { file: file.clone() })
        .init();
    Ok(())
}

struct TeeWriter {
    file: Arc<Mutex<File>>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stdout().write_all(buf)?;
        if let Ok(mut file) = self.file.lock() {
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().flush()?;
        if let Ok(mut file) = self.file.lock() {
            let _ = file.flush();
        }
        Ok(())
    }
}
