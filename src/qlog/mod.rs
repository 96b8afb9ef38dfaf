mod buffered;

pub use buffered::{BufferedCloser, CloseableSink};

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use zstd::stream::write::Encoder;

use crate::tracer::types::{ConnectionId, Perspective};

/// zstd level used for trace files (fastest preset).
const ZSTD_LEVEL: i32 = 1;

/// Write buffer capacity in front of the compressor.
const BUFFER_CAPACITY: usize = 4096;

/// QlogWriter streams an engine-encoded event trace through zstd into a
/// hidden temp file, and on finalize atomically renames it to its final
/// name. The final name never exists in a partially-written state: it is
/// created only by the rename, after the compression trailer is on disk.
pub struct QlogWriter {
    sink: BufferedCloser<Encoder<'static, File>>,
    temp_path: PathBuf,
    final_path: PathBuf,
}

impl QlogWriter {
    /// Opens the trace file pair for one connection, creating `dir` if
    /// absent. Both names derive from {creation time, role, odcid}.
    pub fn create(dir: &Path, role: Perspective, odcid: &ConnectionId) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating trace directory {}", dir.display()))?;

        let timestamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.9fUTC");
        let base = format!("log_{timestamp}_{role}_{odcid}.trace.zst");
        let final_path = dir.join(&base);
        let temp_path = dir.join(format!(".{base}.swp"));

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .with_context(|| format!("creating temp trace file {}", temp_path.display()))?;

        let encoder = Encoder::new(file, ZSTD_LEVEL)
            .with_context(|| format!("initializing zstd stream for {}", temp_path.display()))?;

        Ok(Self {
            sink: BufferedCloser::with_capacity(BUFFER_CAPACITY, encoder),
            temp_path,
            final_path,
        })
    }

    /// The name the trace will be published under once finalized.
    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Flushes the buffer, writes the compression trailer, closes the file,
    /// then renames temp to final. On any failure the temp file stays in
    /// place for recovery and the final name is never created.
    pub fn finalize(self) -> Result<PathBuf> {
        let Self {
            sink,
            temp_path,
            final_path,
        } = self;

        sink.close()
            .with_context(|| format!("closing trace file {}", temp_path.display()))?;

        fs::rename(&temp_path, &final_path).with_context(|| {
            format!(
                "renaming trace file {} to {}",
                temp_path.display(),
                final_path.display()
            )
        })?;

        Ok(final_path)
    }
}

impl Write for QlogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}
