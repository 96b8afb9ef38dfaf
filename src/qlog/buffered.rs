use std::fs::File;
use std::io::{self, BufWriter, Write};

/// CloseableSink is a byte sink with an explicit, consuming close step.
///
/// `close` writes whatever the sink itself still holds (codec trailers, OS
/// buffers) and releases the resource. Dropping a sink without closing it
/// must never publish complete-looking output.
pub trait CloseableSink: Write {
    fn close(self) -> io::Result<()>;
}

impl CloseableSink for File {
    /// Syncs to disk so close errors surface here rather than in the
    /// implicit drop.
    fn close(self) -> io::Result<()> {
        self.sync_all()
    }
}

impl<W: CloseableSink> CloseableSink for zstd::stream::write::Encoder<'_, W> {
    /// Writes the frame trailer, then closes the inner sink. A dropped
    /// encoder never writes its trailer, leaving the stream detectably
    /// truncated.
    fn close(self) -> io::Result<()> {
        self.finish()?.close()
    }
}

/// BufferedCloser puts a buffering layer in front of any closable sink with
/// one ordering guarantee: on close, every buffered byte reaches the sink
/// before the sink's own close runs. A flush failure short-circuits and
/// leaves the sink unclosed.
pub struct BufferedCloser<W: CloseableSink> {
    inner: BufWriter<W>,
}

impl<W: CloseableSink> BufferedCloser<W> {
    pub fn new(sink: W) -> Self {
        Self {
            inner: BufWriter::new(sink),
        }
    }

    pub fn with_capacity(capacity: usize, sink: W) -> Self {
        Self {
            inner: BufWriter::with_capacity(capacity, sink),
        }
    }
}

impl<W: CloseableSink> Write for BufferedCloser<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: CloseableSink> CloseableSink for BufferedCloser<W> {
    fn close(self) -> io::Result<()> {
        match self.inner.into_inner() {
            Ok(sink) => sink.close(),
            Err(e) => Err(e.into_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[derive(Debug, PartialEq)]
    enum SinkEvent {
        Write(usize),
        Close,
    }

    /// Byte sink that records the order of writes and close.
    struct RecordingSink {
        events: Arc<Mutex<Vec<SinkEvent>>>,
    }

    impl Write for RecordingSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.events.lock().unwrap().push(SinkEvent::Write(buf.len()));
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CloseableSink for RecordingSink {
        fn close(self) -> io::Result<()> {
            self.events.lock().unwrap().push(SinkEvent::Close);
            Ok(())
        }
    }

    /// Byte sink that refuses all writes but closes cleanly.
    struct WriteRefusingSink {
        closed: Arc<Mutex<bool>>,
    }

    impl Write for WriteRefusingSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "write refused"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl CloseableSink for WriteRefusingSink {
        fn close(self) -> io::Result<()> {
            *self.closed.lock().unwrap() = true;
            Ok(())
        }
    }

    #[test]
    fn test_close_flushes_buffered_bytes_before_sink_close() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut writer = BufferedCloser::with_capacity(
            1024,
            RecordingSink {
                events: events.clone(),
            },
        );

        writer.write_all(b"hello").expect("buffered write");
        writer.write_all(b" world").expect("buffered write");
        assert!(
            events.lock().unwrap().is_empty(),
            "small writes should stay buffered"
        );

        writer.close().expect("close");

        let events = events.lock().unwrap();
        assert_eq!(
            *events,
            vec![SinkEvent::Write(11), SinkEvent::Close],
            "flush must reach the sink before its close"
        );
    }

    #[test]
    fn test_flush_failure_short_circuits_close() {
        let closed = Arc::new(Mutex::new(false));
        let mut writer = BufferedCloser::with_capacity(
            1024,
            WriteRefusingSink {
                closed: closed.clone(),
            },
        );

        writer.write_all(b"doomed bytes").expect("buffered write");
        let err = writer.close().expect_err("flush into sink must fail");
        assert_eq!(err.kind(), io::ErrorKind::Other);
        assert!(
            !*closed.lock().unwrap(),
            "sink close must not run after a failed flush"
        );
    }

    #[test]
    fn test_large_write_passes_through_before_close() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let mut writer = BufferedCloser::with_capacity(
            16,
            RecordingSink {
                events: events.clone(),
            },
        );

        let payload = vec![0xaa; 64];
        writer.write_all(&payload).expect("write");
        writer.close().expect("close");

        let events = events.lock().unwrap();
        assert_eq!(
            events.last(),
            Some(&SinkEvent::Close),
            "close must come last"
        );
        let written: usize = events
            .iter()
            .filter_map(|e| match e {
                SinkEvent::Write(n) => Some(n),
                SinkEvent::Close => None,
            })
            .sum();
        assert_eq!(written, 64);
    }
}
