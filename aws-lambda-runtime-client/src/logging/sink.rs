use std::fs::File;
use std::io::{self, Write};

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;

use super::{LogFormat, LogLevel};

/// Length of a telemetry frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 16;

const FRAME_MAGIC: u32 = 0xa55a_0000;
const FRAME_TIMESTAMP_FLAG: u32 = 1 << 1;
const FRAME_LEVEL_OFFSET: u32 = 2;

/// Computes the frame type word for a log line.
///
/// ```
/// use aws_lambda_runtime_client::logging::{frame_type, LogFormat, LogLevel};
///
/// assert_eq!(frame_type(LogLevel::Undefined, LogFormat::Json), 0xa55a_0002);
/// assert_eq!(frame_type(LogLevel::Info, LogFormat::Text), 0xa55a_000f);
/// ```
pub fn frame_type(level: LogLevel, format: LogFormat) -> u32 {
    FRAME_MAGIC | (level.ordinal() << FRAME_LEVEL_OFFSET) | FRAME_TIMESTAMP_FLAG | format.code()
}

/// Destination for formatted log lines.
pub trait LogSink: Send + Sync {
    /// Writes one already-formatted log line.
    fn log(&self, level: LogLevel, format: LogFormat, message: &[u8]);

    /// Flushes buffered output.
    fn flush(&self) {}
}

/// Writes log lines to standard output unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdOutLogSink;

impl LogSink for StdOutLogSink {
    fn log(&self, _level: LogLevel, _format: LogFormat, message: &[u8]) {
        let mut out = io::stdout().lock();
        // Nowhere left to report a failed write to stdout.
        let _ = out.write_all(message);
    }

    fn flush(&self) {
        let _ = io::stdout().lock().flush();
    }
}

/// Writes each log line as one telemetry frame.
///
/// A frame is a 16-byte big-endian header followed by the message:
///
/// | bytes | field |
/// |-------|-------|
/// | 0..4  | frame type, see [`frame_type`] |
/// | 4..8  | message length |
/// | 8..16 | timestamp, microseconds since the Unix epoch |
///
/// Frames are written atomically with respect to each other.
pub struct FramedTelemetryLogSink<W: Write + Send = File> {
    writer: Mutex<W>,
}

impl<W: Write + Send> FramedTelemetryLogSink<W> {
    /// Creates a sink writing frames to `writer`.
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Consumes the sink and returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }

    fn write_frame(&self, level: LogLevel, format: LogFormat, message: &[u8]) -> io::Result<()> {
        let timestamp = chrono::Utc::now().timestamp_micros().max(0) as u64;
        let frame = encode_frame(level, format, message, timestamp);
        let mut writer = self.writer.lock();
        writer.write_all(&frame)
    }
}

#[cfg(unix)]
impl FramedTelemetryLogSink<File> {
    /// Creates a sink writing to an inherited file descriptor.
    ///
    /// # Safety
    ///
    /// `fd` must be an open file descriptor that nothing else in the process
    /// owns. The sink takes ownership and closes it on drop.
    pub unsafe fn from_raw_fd(fd: std::os::unix::io::RawFd) -> Self {
        use std::os::unix::io::FromRawFd;
        Self::new(File::from_raw_fd(fd))
    }
}

impl<W: Write + Send> LogSink for FramedTelemetryLogSink<W> {
    fn log(&self, level: LogLevel, format: LogFormat, message: &[u8]) {
        if let Err(error) = self.write_frame(level, format, message) {
            // Going through tracing here would feed back into this sink.
            eprintln!("failed to write telemetry log frame: {}", error);
        }
    }

    fn flush(&self) {
        let _ = self.writer.lock().flush();
    }
}

/// Longest message a frame can carry; longer messages are truncated.
const MAX_FRAME_MESSAGE_LEN: usize = u32::MAX as usize;

/// Returns the prefix of `message` that fits in a frame of at most `limit`
/// message bytes.
fn frame_message(message: &[u8], limit: usize) -> &[u8] {
    &message[..message.len().min(limit)]
}

/// Encodes one telemetry frame.
pub(crate) fn encode_frame(
    level: LogLevel,
    format: LogFormat,
    message: &[u8],
    timestamp_micros: u64,
) -> Bytes {
    let message = frame_message(message, MAX_FRAME_MESSAGE_LEN);
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + message.len());
    buf.put_u32(frame_type(level, format));
    buf.put_u32(message.len() as u32);
    buf.put_u64(timestamp_micros);
    buf.put_slice(message);
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_message_is_truncated_to_limit() {
        let message = b"0123456789";
        assert_eq!(frame_message(message, 4), b"0123");
        assert_eq!(frame_message(message, 10), message);
        assert_eq!(frame_message(message, MAX_FRAME_MESSAGE_LEN), message);
    }

    #[test]
    fn test_frame_type_bits() {
        assert_eq!(frame_type(LogLevel::Undefined, LogFormat::Text), 0xa55a_0003);
        assert_eq!(frame_type(LogLevel::Trace, LogFormat::Json), 0xa55a_0006);
        assert_eq!(frame_type(LogLevel::Fatal, LogFormat::Json), 0xa55a_001a);
    }

    #[test]
    fn test_encode_frame_layout() {
        let frame = encode_frame(LogLevel::Error, LogFormat::Text, b"hello", 42);
        assert_eq!(frame.len(), FRAME_HEADER_LEN + 5);
        assert_eq!(&frame[0..4], &frame_type(LogLevel::Error, LogFormat::Text).to_be_bytes());
        assert_eq!(&frame[4..8], &5u32.to_be_bytes());
        assert_eq!(&frame[8..16], &42u64.to_be_bytes());
        assert_eq!(&frame[16..], b"hello");
    }

    #[test]
    fn test_sink_writes_consecutive_frames() {
        let sink = FramedTelemetryLogSink::new(Vec::new());
        sink.log(LogLevel::Info, LogFormat::Text, b"first\n");
        sink.log(LogLevel::Warn, LogFormat::Json, b"");
        let written = sink.into_inner();

        assert_eq!(written.len(), 2 * FRAME_HEADER_LEN + 6);
        assert_eq!(&written[4..8], &6u32.to_be_bytes());
        assert_eq!(&written[FRAME_HEADER_LEN..FRAME_HEADER_LEN + 6], b"first\n");
        let second = &written[FRAME_HEADER_LEN + 6..];
        assert_eq!(&second[0..4], &frame_type(LogLevel::Warn, LogFormat::Json).to_be_bytes());
        assert_eq!(&second[4..8], &0u32.to_be_bytes());
    }
}
